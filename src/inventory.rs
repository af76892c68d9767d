use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use blob_store::BlobStorage;
use bytes::Bytes;
use dashmap::DashMap;
use data_model::{
    file_extension,
    normalize_file_name,
    Category,
    DatasetPatch,
    DatasetRecord,
    InventoryError,
};
use futures::stream::BoxStream;
use inventory_utils::get_epoch_time_in_ms;
use state_store::InventoryState;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Per-item results of a bulk operation. One item's failure never aborts
/// the others.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: HashMap<String, InventoryError>,
}

/// The catalog abstraction over the blob store and the metadata store.
/// Every mutation of a file name is serialized through a per-name lock so
/// the two stores can never be observed out of lockstep; operations on
/// different names do not block each other.
pub struct Inventory {
    state: Arc<InventoryState>,
    blob_storage: Arc<BlobStorage>,
    file_locks: DashMap<String, Arc<Mutex<()>>>,
    blob_op_timeout: Duration,
}

impl Inventory {
    pub fn new(
        state: Arc<InventoryState>,
        blob_storage: Arc<BlobStorage>,
        blob_op_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            blob_storage,
            file_locks: DashMap::new(),
            blob_op_timeout,
        })
    }

    fn lock_for(&self, file_name: &str) -> Arc<Mutex<()>> {
        self.file_locks
            .entry(file_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Bounds a blob-store call with the configured deadline.
    async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, InventoryError> {
        match tokio::time::timeout(self.blob_op_timeout, fut).await {
            Ok(result) => result.map_err(InventoryError::from),
            Err(_) => Err(InventoryError::Timeout {
                op: op.to_string(),
                after_ms: self.blob_op_timeout.as_millis() as u64,
            }),
        }
    }

    /// Stores the file bytes and ensures a metadata record exists for the
    /// name. Re-uploading an existing name overwrites the blob and leaves
    /// the metadata record (and its `uploaded_at`) untouched.
    pub async fn upload(
        &self,
        raw_name: &str,
        data: impl futures::Stream<Item = anyhow::Result<Bytes>> + Send + Unpin,
    ) -> Result<DatasetRecord, InventoryError> {
        let file_name = normalize_file_name(raw_name)?;
        let lock = self.lock_for(&file_name);
        let _guard = lock.lock().await;

        let put_result = self
            .timed("blob put", self.blob_storage.put(&file_name, data))
            .await?;
        let file_size_kb = (put_result.size_bytes as f64 / 1024.0 * 100.0).round() / 100.0;
        let record = self.state.register_upload(
            &file_name,
            &file_extension(&file_name),
            file_size_kb,
            get_epoch_time_in_ms(),
        )?;
        info!(
            "uploaded {} ({} bytes, sha256 {})",
            file_name, put_result.size_bytes, put_result.sha256_hash
        );
        Ok(record)
    }

    /// All records in upload order, optionally restricted to an exact
    /// category match. An empty filter means no filter; a filter that is
    /// not a valid category simply matches nothing.
    pub fn list(&self, category: Option<&str>) -> Result<Vec<DatasetRecord>, InventoryError> {
        let records = self.state.list()?;
        match category {
            None | Some("") => Ok(records),
            Some(filter) => Ok(records
                .into_iter()
                .filter(|r| r.category_name() == filter)
                .collect()),
        }
    }

    pub fn list_categories(&self) -> Vec<&'static str> {
        Category::all_names()
    }

    pub fn get_record(&self, raw_name: &str) -> Result<DatasetRecord, InventoryError> {
        let file_name = normalize_file_name(raw_name)?;
        self.state
            .get(&file_name)?
            .ok_or(InventoryError::NotFound(file_name))
    }

    /// Streams the raw blob for download, with its size in bytes.
    pub async fn get_file(
        &self,
        raw_name: &str,
    ) -> Result<(u64, BoxStream<'static, anyhow::Result<Bytes>>), InventoryError> {
        let file_name = normalize_file_name(raw_name)?;
        let size = self
            .timed("blob stat", self.blob_storage.size(&file_name))
            .await?
            .ok_or_else(|| InventoryError::NotFound(file_name.clone()))?;
        let stream = self
            .timed("blob get", self.blob_storage.get(&file_name))
            .await?;
        Ok((size, stream))
    }

    /// Upserts metadata for an already-uploaded file. Metadata cannot be
    /// attached to a name with no stored blob; that keeps the two stores
    /// in lockstep.
    pub async fn update_metadata(
        &self,
        raw_name: &str,
        patch: &DatasetPatch,
    ) -> Result<DatasetRecord, InventoryError> {
        let file_name = normalize_file_name(raw_name)?;
        patch.validate()?;
        let lock = self.lock_for(&file_name);
        let _guard = lock.lock().await;

        let exists = self
            .timed("blob stat", self.blob_storage.exists(&file_name))
            .await?;
        if !exists {
            return Err(InventoryError::NotFound(file_name));
        }
        self.state.upsert(&file_name, patch, get_epoch_time_in_ms())
    }

    /// Removes blob and metadata record. Once the blob is gone the
    /// operation cannot roll back; a metadata-side failure is retried and
    /// then reported as a partial delete so the caller can retry cleanup.
    pub async fn delete(&self, raw_name: &str) -> Result<(), InventoryError> {
        let file_name = normalize_file_name(raw_name)?;
        let lock = self.lock_for(&file_name);
        let _guard = lock.lock().await;

        let blob_exists = self
            .timed("blob stat", self.blob_storage.exists(&file_name))
            .await?;
        let record_exists = self.state.get(&file_name)?.is_some();
        if !blob_exists && !record_exists {
            return Err(InventoryError::NotFound(file_name));
        }

        if blob_exists {
            self.timed("blob delete", self.blob_storage.delete(&file_name))
                .await?;
        }

        // point of no return: the blob is gone, only the record is left
        if let Err(first) = self.state.delete(&file_name) {
            warn!(
                "metadata delete for {} failed, retrying: {}",
                file_name, first
            );
            if let Err(second) = self.state.delete(&file_name) {
                error!("metadata record for {} is orphaned: {}", file_name, second);
                return Err(InventoryError::PartialDelete {
                    file_name,
                    cause: second.to_string(),
                });
            }
        }
        info!("deleted {}", file_name);
        drop(_guard);
        // drop the lock entry unless another task is already waiting on it
        self.file_locks
            .remove_if(&file_name, |_, entry| Arc::strong_count(entry) <= 2);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn file_lock_count(&self) -> usize {
        self.file_locks.len()
    }

    /// Deletes each name independently and reports per-name results.
    pub async fn bulk_delete(&self, file_names: Vec<String>) -> BulkOutcome {
        let results = futures::future::join_all(file_names.into_iter().map(|name| async move {
            let result = self.delete(&name).await;
            (name, result)
        }))
        .await;
        collect_bulk(results)
    }

    /// Reassigns the category of each name independently. Each item runs
    /// the same category validation before its record is touched, so a bad
    /// value fails every item and no record changes.
    pub async fn bulk_update_category(
        &self,
        file_names: Vec<String>,
        category: &str,
    ) -> BulkOutcome {
        let patch = DatasetPatch::category(category);
        let results = futures::future::join_all(file_names.into_iter().map(|name| {
            let patch = patch.clone();
            async move {
                let result = self.update_metadata(&name, &patch).await.map(|_| ());
                (name, result)
            }
        }))
        .await;
        collect_bulk(results)
    }

    pub fn export(&self) -> Result<Vec<u8>, InventoryError> {
        let records = self.list(None)?;
        crate::export::inventory_workbook(&records)
    }

    /// Single-record export; returns the normalized file name alongside the
    /// workbook so callers can derive a download filename.
    pub fn export_single(&self, raw_name: &str) -> Result<(String, Vec<u8>), InventoryError> {
        let record = self.get_record(raw_name)?;
        let workbook = crate::export::record_workbook(&record)?;
        Ok((record.file_name, workbook))
    }
}

fn collect_bulk(results: Vec<(String, Result<(), InventoryError>)>) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for (name, result) in results {
        match result {
            Ok(()) => outcome.succeeded.push(name),
            Err(err) => {
                outcome.failed.insert(name, err);
            }
        }
    }
    outcome
}
