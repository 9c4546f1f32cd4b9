//! Fetch executor
//!
//! Runs the fetch plans of one batch on a bounded pool of tasks. Each request
//! first acquires the shared rate limiter. Retries are a bounded loop per
//! item; every retry starts the item over from its first part.

use crate::crawler::{DocumentSource, RateLimiter, SourceResponse};
use crate::extract::Extractor;
use crate::frontier::FrontierItem;
use crate::{HarvestError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// How follow-up pages of a part are discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// The part is a single page
    None,

    /// The first page is JSON carrying `last_page`; pages `2..=last_page` are
    /// fetched by appending `{param}={n}` to the locator
    LastPage { param: String },
}

/// One request (plus continuations) that makes up part of an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPart {
    pub name: String,
    pub locator: String,
    pub pagination: Pagination,
}

/// Everything that has to be fetched for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub parts: Vec<PlannedPart>,
}

impl FetchPlan {
    /// A plan consisting of the item's own page
    pub fn single(locator: &str) -> Self {
        Self {
            parts: vec![PlannedPart {
                name: "page".to_string(),
                locator: locator.to_string(),
                pagination: Pagination::None,
            }],
        }
    }
}

/// A fetched part: the bodies of all its pages in page order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPart {
    pub name: String,
    pub pages: Vec<String>,
}

/// All fetched bodies of one item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDocument {
    pub parts: Vec<DocumentPart>,
}

impl RawDocument {
    /// A document made of one single-page part
    pub fn single(body: impl Into<String>) -> Self {
        Self {
            parts: vec![DocumentPart {
                name: "page".to_string(),
                pages: vec![body.into()],
            }],
        }
    }

    pub fn part(&self, name: &str) -> Option<&DocumentPart> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// First page of the first part
    pub fn first_page(&self) -> Option<&str> {
        self.parts
            .first()
            .and_then(|part| part.pages.first())
            .map(String::as_str)
    }
}

/// Result of fetching one item
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(RawDocument),
    NotFound,
    RateLimited,
    TransientError(String),
    PermanentError(String),
}

impl FetchOutcome {
    /// Only rate limiting and transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientError(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::TransientError(_) => "transient_error",
            Self::PermanentError(_) => "permanent_error",
        }
    }
}

impl From<SourceResponse> for FetchOutcome {
    fn from(response: SourceResponse) -> Self {
        match response {
            SourceResponse::Ok(body) => Self::Success(RawDocument::single(body)),
            SourceResponse::NotFound => Self::NotFound,
            SourceResponse::RateLimited => Self::RateLimited,
            SourceResponse::ServerError(code) => {
                Self::TransientError(format!("server error ({})", code))
            }
            SourceResponse::Network(error) => Self::TransientError(error),
            SourceResponse::ClientError(code) => {
                Self::PermanentError(format!("client error ({})", code))
            }
        }
    }
}

/// Retry bounds applied to every item
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub rate_limited_backoff: Duration,
    pub transient_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self, outcome: &FetchOutcome) -> Duration {
        match outcome {
            FetchOutcome::RateLimited => self.rate_limited_backoff,
            _ => self.transient_backoff,
        }
    }
}

/// Runs fetch plans under the shared rate limit and a bounded worker pool
pub struct FetchExecutor<S> {
    source: Arc<S>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    pool: Arc<Semaphore>,
}

impl<S> Clone for FetchExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            limiter: self.limiter.clone(),
            retry: self.retry,
            pool: self.pool.clone(),
        }
    }
}

impl<S: DocumentSource> FetchExecutor<S> {
    pub fn new(
        source: Arc<S>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            limiter,
            retry,
            pool: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Fetches every item of a batch concurrently
    ///
    /// Results come back in input order. A panicked worker fails the whole
    /// batch with `HarvestError::Worker`.
    pub async fn fetch_batch<E: Extractor>(
        &self,
        items: Vec<FrontierItem>,
        extractor: &E,
    ) -> Result<Vec<(FrontierItem, FetchOutcome)>> {
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let plan = extractor.plan(&item);
            let worker = self.clone();

            tasks.spawn(async move {
                // The pool is never closed, so acquiring only fails after shutdown
                let _permit = worker.pool.clone().acquire_owned().await;
                let outcome = worker.fetch(&item, &plan).await;
                (index, item, outcome)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        let mut failure = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("Fetch worker failed: {}", e);
                    failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if let Some(message) = failure {
            return Err(HarvestError::Worker(message));
        }

        results.sort_by_key(|(index, _, _)| *index);
        Ok(results
            .into_iter()
            .map(|(_, item, outcome)| (item, outcome))
            .collect())
    }

    /// Fetches one item, retrying rate-limited and transient outcomes
    pub async fn fetch(&self, item: &FrontierItem, plan: &FetchPlan) -> FetchOutcome {
        let mut attempt = 0;

        loop {
            let outcome = self.fetch_plan(plan).await;

            if !outcome.is_retryable() {
                return outcome;
            }

            if attempt >= self.retry.max_retries {
                tracing::warn!(
                    id = %item.id,
                    locator = %item.locator,
                    attempts = attempt + 1,
                    "Giving up on item: {}",
                    outcome.label()
                );
                return outcome;
            }

            attempt += 1;
            let backoff = self.retry.backoff(&outcome);
            tracing::warn!(
                id = %item.id,
                locator = %item.locator,
                attempt,
                backoff_secs = backoff.as_secs(),
                "Retrying item after {}",
                outcome.label()
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn fetch_plan(&self, plan: &FetchPlan) -> FetchOutcome {
        let mut parts = Vec::with_capacity(plan.parts.len());

        for part in &plan.parts {
            match self.fetch_part(part).await {
                Ok(pages) => parts.push(DocumentPart {
                    name: part.name.clone(),
                    pages,
                }),
                Err(outcome) => return outcome,
            }
        }

        FetchOutcome::Success(RawDocument { parts })
    }

    async fn fetch_part(
        &self,
        part: &PlannedPart,
    ) -> std::result::Result<Vec<String>, FetchOutcome> {
        let first = self.get(&part.locator).await?;

        let Pagination::LastPage { param } = &part.pagination else {
            return Ok(vec![first]);
        };

        let last_page = read_last_page(&first);
        let mut pages = vec![first];

        for page in 2..=last_page {
            let locator = page_locator(&part.locator, param, page);
            match self.get(&locator).await {
                Ok(body) => pages.push(body),
                Err(outcome) => {
                    return Err(FetchOutcome::TransientError(format!(
                        "continuation page {} of {} failed: {}",
                        page,
                        part.locator,
                        outcome.label()
                    )))
                }
            }
        }

        Ok(pages)
    }

    async fn get(&self, locator: &str) -> std::result::Result<String, FetchOutcome> {
        self.limiter.acquire().await;

        tracing::debug!(locator, "GET");
        match self.source.get(locator).await {
            SourceResponse::Ok(body) => Ok(body),
            other => Err(FetchOutcome::from(other)),
        }
    }
}

/// Reads `last_page` from a paginated JSON body, defaulting to a single page
fn read_last_page(body: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("last_page").and_then(serde_json::Value::as_u64))
        .unwrap_or(1)
}

fn page_locator(locator: &str, param: &str, page: u64) -> String {
    match url::Url::parse(locator) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair(param, &page.to_string());
            url.to_string()
        }
        Err(_) => {
            let separator = if locator.contains('?') { '&' } else { '?' };
            format!("{}{}{}={}", locator, separator, param, page)
        }
    }
}
