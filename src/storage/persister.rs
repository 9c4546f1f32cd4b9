//! Batch persister
//!
//! Collects the output of one fetch batch and hands it to the store as a
//! single transaction.

use crate::extract::ExtractedRecord;
use crate::frontier::FrontierItem;
use crate::storage::{Storage, StorageError, StorageResult};

/// Records and tombstones committed together
#[derive(Debug, Clone)]
pub struct Batch {
    /// Watermark namespace of the records
    pub kind: &'static str,

    pub records: Vec<ExtractedRecord>,

    /// Items the remote reported missing, watermarked as tombstones
    pub not_found: Vec<FrontierItem>,

    /// Previously harvested ids whose old derived rows this batch replaces
    pub retire: Vec<String>,
}

impl Batch {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            records: Vec::new(),
            not_found: Vec::new(),
            retire: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.not_found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes batches no larger than the configured batch size
#[derive(Debug, Clone, Copy)]
pub struct BatchPersister {
    max_batch_size: usize,
}

impl BatchPersister {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    /// Commits `batch`, all or nothing
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every record and watermark was written
    /// * `Err(StorageError::BatchTooLarge)` - The batch exceeds the limit
    /// * `Err(StorageError)` - The transaction was rolled back
    pub fn persist<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        batch: &Batch,
    ) -> StorageResult<()> {
        if batch.len() > self.max_batch_size {
            return Err(StorageError::BatchTooLarge {
                size: batch.len(),
                limit: self.max_batch_size,
            });
        }

        if batch.is_empty() {
            tracing::debug!("Nothing to persist for this batch");
            return Ok(());
        }

        storage.persist_batch(batch)?;
        tracing::debug!(
            kind = batch.kind,
            records = batch.records.len(),
            tombstones = batch.not_found.len(),
            retired = batch.retire.len(),
            "Batch committed"
        );

        Ok(())
    }
}
