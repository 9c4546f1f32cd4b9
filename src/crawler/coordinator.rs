//! Harvest coordinator - main run orchestration logic
//!
//! One run goes through these phases:
//! - Discover the frontier and load the watermarks
//! - Diff them into a work queue of new, changed and stale items
//! - For each batch: fetch concurrently, extract, then persist the records
//!   and delete the rows they replace in one transaction
//! - Log progress with a projected remaining time
//! - Record the run summary
//!
//! Cancellation is honored between batches. A batch in flight when the token
//! fires is abandoned without committing anything.

use crate::config::{Config, HarvestConfig, NotFoundPolicy};
use crate::crawler::executor::{FetchExecutor, FetchOutcome, RetryPolicy};
use crate::crawler::{DocumentSource, HttpSource, RateLimiter};
use crate::extract::Extractor;
use crate::frontier::{diff, DiscoverySource, FrontierItem};
use crate::output::{format_duration, ProgressTracker, RunSummary};
use crate::storage::{Batch, BatchPersister, RunStatus, Storage};
use crate::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Main harvest coordinator structure
pub struct Coordinator<S, E> {
    config: HarvestConfig,
    executor: FetchExecutor<S>,
    extractor: Arc<E>,
    persister: BatchPersister,
    cancel: CancellationToken,
    config_hash: String,
}

impl<S: DocumentSource, E: Extractor> Coordinator<S, E> {
    /// Creates a coordinator with its own rate limiter
    ///
    /// # Arguments
    ///
    /// * `config` - Batching, retry and rate limit settings
    /// * `source` - Where documents are fetched from
    /// * `extractor` - Turns fetched documents into records
    pub fn new(config: HarvestConfig, source: Arc<S>, extractor: Arc<E>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        Self::with_limiter(config, source, extractor, limiter)
    }

    /// Creates a coordinator sharing `limiter` with other request issuers
    pub fn with_limiter(
        config: HarvestConfig,
        source: Arc<S>,
        extractor: Arc<E>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let retry = RetryPolicy {
            max_retries: config.max_retries_per_item,
            rate_limited_backoff: config.rate_limited_backoff(),
            transient_backoff: config.transient_backoff(),
        };
        let executor = FetchExecutor::new(source, limiter, retry, config.concurrency());
        let persister = BatchPersister::new(config.batch_size);

        Self {
            config,
            executor,
            extractor,
            persister,
            cancel: CancellationToken::new(),
            config_hash: String::new(),
        }
    }

    /// Uses `token` to stop the run between (or during) batches
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Records `hash` with the run
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Runs one harvest
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - The run finished or was interrupted cleanly
    /// * `Err(HarvestError)` - Discovery, persistence or a worker failed
    pub async fn run<D, St>(&self, discovery: &D, storage: &mut St) -> Result<RunSummary>
    where
        D: DiscoverySource,
        St: Storage,
    {
        let kind = self.extractor.kind();
        let run_id = storage.create_run(kind, &self.config_hash)?;
        tracing::info!("Starting {} harvest run {}", kind, run_id);

        let result = self.harvest(discovery, storage).await;

        match &result {
            Ok(summary) => {
                let status = if summary.interrupted {
                    RunStatus::Interrupted
                } else {
                    RunStatus::Completed
                };
                storage.finish_run(run_id, status, summary)?;
                tracing::info!("Run {} {}: {}", run_id, status.to_db_string(), summary);
            }
            Err(e) => {
                tracing::error!("Run {} failed: {}", run_id, e);
                let failed = storage.finish_run(run_id, RunStatus::Failed, &RunSummary::default());
                if let Err(mark) = failed {
                    tracing::warn!("Failed to mark run {} as failed: {}", run_id, mark);
                }
            }
        }

        result
    }

    async fn harvest<D, St>(&self, discovery: &D, storage: &mut St) -> Result<RunSummary>
    where
        D: DiscoverySource,
        St: Storage,
    {
        let kind = self.extractor.kind();
        let mut summary = RunSummary::default();

        let discovered = discovery.discover().await?;
        let watermarks = storage.load_watermarks(kind)?;
        summary.discovered = discovered.len();

        let work = diff(
            &discovered,
            &watermarks,
            self.config.staleness_threshold(),
            Utc::now(),
        );
        summary.skipped = work.skipped;

        tracing::info!(
            "Discovered {} items, {} to fetch, {} fresh",
            summary.discovered,
            work.to_fetch.len(),
            work.skipped
        );

        // Old rows go only in the transaction that commits their replacement
        let to_retire: HashSet<&str> = work.to_retire.iter().map(String::as_str).collect();

        let total = work.to_fetch.len();
        let mut completed = 0usize;
        let mut tracker = ProgressTracker::new();

        for (index, chunk) in work.to_fetch.chunks(self.config.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, stopping before batch {}", index + 1);
                summary.interrupted = true;
                break;
            }

            let started = Instant::now();

            let outcomes = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::warn!("Cancellation requested, abandoning batch {}", index + 1);
                    summary.interrupted = true;
                    break;
                }
                outcomes = self.executor.fetch_batch(chunk.to_vec(), self.extractor.as_ref()) => {
                    outcomes?
                }
            };

            let batch = self.assemble(kind, outcomes, &to_retire, &mut summary);
            let written = batch.records.len();
            self.persister.persist(storage, &batch)?;
            summary.persisted += written;
            summary.retired += batch.retire.len();

            completed += chunk.len();
            tracker.record(written, started.elapsed());

            let remaining = total - completed;
            match tracker.projected_remaining(remaining) {
                Some(eta) => tracing::info!(
                    batch = index + 1,
                    persisted = written,
                    remaining,
                    "Batch done in {}, projected remaining {}",
                    format_duration(started.elapsed()),
                    format_duration(eta)
                ),
                None => tracing::info!(
                    batch = index + 1,
                    persisted = written,
                    remaining,
                    "Batch done in {}, projected remaining unknown",
                    format_duration(started.elapsed())
                ),
            }
        }

        Ok(summary)
    }

    /// Extracts successful fetches and collects per-item failures
    fn assemble(
        &self,
        kind: &'static str,
        outcomes: Vec<(FrontierItem, FetchOutcome)>,
        to_retire: &HashSet<&str>,
        summary: &mut RunSummary,
    ) -> Batch {
        let mut batch = Batch::new(kind);

        for (item, outcome) in outcomes {
            match outcome {
                FetchOutcome::Success(document) => {
                    summary.fetched += 1;
                    match self.extractor.extract(&document, &item) {
                        Ok(record) => {
                            if to_retire.contains(record.id.as_str()) {
                                batch.retire.push(record.id.clone());
                            }
                            batch.records.push(record);
                        }
                        Err(failure) => {
                            summary.failed += 1;
                            summary.parse_failures += 1;
                            tracing::warn!(
                                id = %item.id,
                                locator = %item.locator,
                                stage = "extract",
                                "{}",
                                failure
                            );
                        }
                    }
                }
                FetchOutcome::NotFound => {
                    summary.failed += 1;
                    summary.not_found += 1;
                    tracing::warn!(
                        id = %item.id,
                        locator = %item.locator,
                        stage = "fetch",
                        "Not found"
                    );
                    if self.config.not_found_policy == NotFoundPolicy::Watermark {
                        if to_retire.contains(item.id.as_str()) {
                            batch.retire.push(item.id.clone());
                        }
                        batch.not_found.push(item);
                    }
                }
                FetchOutcome::RateLimited => {
                    summary.failed += 1;
                    tracing::warn!(
                        id = %item.id,
                        locator = %item.locator,
                        stage = "fetch",
                        "Still rate limited"
                    );
                }
                FetchOutcome::TransientError(error) | FetchOutcome::PermanentError(error) => {
                    summary.failed += 1;
                    tracing::warn!(
                        id = %item.id,
                        locator = %item.locator,
                        stage = "fetch",
                        "{}",
                        error
                    );
                }
            }
        }

        batch
    }
}

/// Runs one harvest against the remote over HTTP
///
/// Builds the HTTP client from the user agent settings and drives a
/// `Coordinator` to completion.
pub async fn run<D, St, E>(
    discovery: &D,
    storage: &mut St,
    extractor: Arc<E>,
    config: &Config,
) -> Result<RunSummary>
where
    D: DiscoverySource,
    St: Storage,
    E: Extractor,
{
    let source = Arc::new(HttpSource::from_config(&config.user_agent)?);
    Coordinator::new(config.harvest.clone(), source, extractor)
        .run(discovery, storage)
        .await
}
