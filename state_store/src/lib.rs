use std::{
    any::type_name,
    fmt::Debug,
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use data_model::{DatasetPatch, DatasetRecord, InventoryError};
use rocksdb::{
    BoundColumnFamily,
    ColumnFamilyDescriptor,
    Options,
    TransactionDB,
    TransactionDBOptions,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::info;

/// Current on-disk layout version, stored in StateMachineMetadata.
const DB_VERSION: u64 = 1;

#[derive(strum::AsRefStr, strum::Display, strum::EnumIter)]
pub enum InventoryObjectsColumns {
    StateMachineMetadata, //  layout version
    DatasetRecords,       //  file_name -> DatasetRecord
}

impl InventoryObjectsColumns {
    pub fn cf_db<'a>(&'a self, db: &'a TransactionDB) -> Arc<BoundColumnFamily<'a>> {
        db.cf_handle(self.as_ref())
            .unwrap_or_else(|| panic!("failed to get column family handle for {}", self.as_ref()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateMachineMetadata {
    pub db_version: u64,
}

fn encode<T: Serialize + Debug>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| anyhow!("error serializing {} into json: {}", type_name::<T>(), e))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| anyhow!("error deserializing {} from json bytes: {}", type_name::<T>(), e))
}

fn storage<E: Into<anyhow::Error>>(e: E) -> InventoryError {
    InventoryError::Storage(e.into())
}

/// The metadata half of the catalog: one record per file name, persisted in
/// RocksDB. All mutations are read-modify-write inside a transaction so a
/// rejected write never partially applies.
pub struct InventoryState {
    pub db: Arc<TransactionDB>,
    last_sequence: AtomicU64,
}

impl InventoryState {
    pub fn new(path: PathBuf) -> Result<Arc<Self>> {
        fs::create_dir_all(path.clone())
            .map_err(|e| anyhow!("failed to create state store dir: {}", e))?;

        let column_families = InventoryObjectsColumns::iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);
        let db = Arc::new(TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            path,
            column_families,
        )?);

        let state = Self {
            last_sequence: AtomicU64::new(max_sequence(&db)?),
            db,
        };
        state.write_metadata()?;
        Ok(Arc::new(state))
    }

    fn write_metadata(&self) -> Result<()> {
        let meta = StateMachineMetadata {
            db_version: DB_VERSION,
        };
        self.db.put_cf(
            &InventoryObjectsColumns::StateMachineMetadata.cf_db(&self.db),
            b"meta",
            encode(&meta)?,
        )?;
        Ok(())
    }

    pub fn metadata(&self) -> Result<StateMachineMetadata> {
        let bytes = self
            .db
            .get_cf(
                &InventoryObjectsColumns::StateMachineMetadata.cf_db(&self.db),
                b"meta",
            )?
            .ok_or_else(|| anyhow!("state store metadata missing"))?;
        decode(&bytes)
    }

    /// Records an upload. Creates an empty record on first upload of the
    /// name; on re-upload only the blob-derived fields move, the existing
    /// metadata and `uploaded_at` stay untouched.
    pub fn register_upload(
        &self,
        file_name: &str,
        file_type: &str,
        file_size_kb: f64,
        uploaded_at: u64,
    ) -> Result<DatasetRecord, InventoryError> {
        let txn = self.db.transaction();
        let cf = InventoryObjectsColumns::DatasetRecords.cf_db(&self.db);
        let existing = txn
            .get_for_update_cf(&cf, file_name, true)
            .map_err(storage)?;
        let record = match existing {
            Some(bytes) => {
                let mut record: DatasetRecord = decode(&bytes).map_err(storage)?;
                record.file_type = file_type.to_string();
                record.file_size_kb = file_size_kb;
                record
            }
            None => {
                let mut record = DatasetRecord::empty(file_name, uploaded_at);
                record.file_type = file_type.to_string();
                record.file_size_kb = file_size_kb;
                record.sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
                info!("creating dataset record: {}", file_name);
                record
            }
        };
        txn.put_cf(&cf, file_name, encode(&record).map_err(storage)?)
            .map_err(storage)?;
        txn.commit().map_err(storage)?;
        Ok(record)
    }

    /// Merges the patch into the record for `file_name`, creating the
    /// record with empty fields if it does not exist. An invalid category
    /// rejects the whole write.
    pub fn upsert(
        &self,
        file_name: &str,
        patch: &DatasetPatch,
        now: u64,
    ) -> Result<DatasetRecord, InventoryError> {
        patch.validate()?;
        let txn = self.db.transaction();
        let cf = InventoryObjectsColumns::DatasetRecords.cf_db(&self.db);
        let existing = txn
            .get_for_update_cf(&cf, file_name, true)
            .map_err(storage)?;
        let mut record = match existing {
            Some(bytes) => decode(&bytes).map_err(storage)?,
            None => {
                let mut record = DatasetRecord::empty(file_name, now);
                record.sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
                record
            }
        };
        patch.apply_to(&mut record)?;
        txn.put_cf(&cf, file_name, encode(&record).map_err(storage)?)
            .map_err(storage)?;
        txn.commit().map_err(storage)?;
        Ok(record)
    }

    pub fn get(&self, file_name: &str) -> Result<Option<DatasetRecord>, InventoryError> {
        let cf = InventoryObjectsColumns::DatasetRecords.cf_db(&self.db);
        let bytes = self.db.get_cf(&cf, file_name).map_err(storage)?;
        match bytes {
            Some(bytes) => Ok(Some(decode(&bytes).map_err(storage)?)),
            None => Ok(None),
        }
    }

    /// All records in insertion order, first created first.
    pub fn list(&self) -> Result<Vec<DatasetRecord>, InventoryError> {
        let cf = InventoryObjectsColumns::DatasetRecords.cf_db(&self.db);
        let mut records: Vec<DatasetRecord> = Vec::new();
        for kv in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_, value) = kv.map_err(storage)?;
            records.push(decode(&value).map_err(storage)?);
        }
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    /// Removes the record, reporting whether one existed.
    pub fn delete(&self, file_name: &str) -> Result<bool, InventoryError> {
        let txn = self.db.transaction();
        let cf = InventoryObjectsColumns::DatasetRecords.cf_db(&self.db);
        let existing = txn
            .get_for_update_cf(&cf, file_name, true)
            .map_err(storage)?;
        if existing.is_none() {
            return Ok(false);
        }
        txn.delete_cf(&cf, file_name).map_err(storage)?;
        txn.commit().map_err(storage)?;
        Ok(true)
    }
}

fn max_sequence(db: &TransactionDB) -> Result<u64> {
    let cf = InventoryObjectsColumns::DatasetRecords.cf_db(db);
    let mut max = 0;
    for kv in db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
        let (_, value) = kv?;
        let record: DatasetRecord = decode(&value)?;
        max = max.max(record.sequence);
    }
    Ok(max)
}
