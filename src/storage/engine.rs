use dashmap::DashMap;
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::collection::*;
use super::record::{Record, RecordId, StoredRecord, WriteOp};
use crate::error::{CareError, CareResult};

/// Column family holding the pending-write log
pub(crate) const PENDING_CF: &str = "_pending";

/// Result of applying a [`WriteOp`]
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Stored(RecordId),
    Removed(bool),
}

/// Durable keyed storage backed by RocksDB.
///
/// Every collection lives in its own column family, created on first write.
/// Each mutation commits as one write batch covering the record, its index
/// entries, its insertion-order entry and the key counters, and mutations on
/// the same collection are serialized through an async lock.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<RwLock<DB>>,
    path: PathBuf,
    specs: Arc<DashMap<String, CollectionSpec>>,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .finish()
    }
}

impl RecordStore {
    /// Open (or create) a store in `data_dir` with the default collections declared
    pub fn open<P: AsRef<Path>>(data_dir: P) -> CareResult<Self> {
        let path = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        // Keep fewer LOG files (RocksDB info logs, not WALs)
        opts.set_keep_log_file_num(5);

        let mut cf_names = match DB::list_cf(&opts, &path) {
            Ok(cfs) => cfs,
            Err(_) => vec!["default".to_string()],
        };
        if !cf_names.iter().any(|n| n == PENDING_CF) {
            cf_names.push(PENDING_CF.to_string());
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors).map_err(|e| {
            CareError::StorageUnavailable(format!("Failed to open RocksDB: {}", e))
        })?;
        tracing::debug!("Opened record store at {}", path.display());

        let store = Self {
            db: Arc::new(RwLock::new(db)),
            path,
            specs: Arc::new(DashMap::new()),
            write_locks: Arc::new(DashMap::new()),
        };
        for spec in CollectionSpec::defaults() {
            store.declare(spec);
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declare (or redeclare) a collection. Its column family is created
    /// lazily on the first write.
    pub fn declare(&self, spec: CollectionSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn spec(&self, collection: &str) -> CareResult<CollectionSpec> {
        self.specs
            .get(collection)
            .map(|s| s.value().clone())
            .ok_or_else(|| CareError::UnknownCollection(collection.to_string()))
    }

    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    // ==================== Writes ====================

    /// Insert or overwrite a record, returning its id
    pub async fn put(&self, collection: &str, record: Value) -> CareResult<RecordId> {
        let spec = self.writable(collection)?;
        let lock = self.write_lock(collection);
        let _guard = lock.lock().await;
        self.commit(&spec, |db, cf, batch| stage_put(db, cf, &spec, record, batch), |_, _| Ok(()))
    }

    /// Delete a record. Returns `false` when there was nothing to delete.
    pub async fn delete(&self, collection: &str, id: &RecordId) -> CareResult<bool> {
        let spec = self.writable(collection)?;
        let Some(id) = spec.normalize_id(id) else {
            return Ok(false);
        };
        let lock = self.write_lock(collection);
        let _guard = lock.lock().await;
        self.commit(&spec, |db, cf, batch| stage_delete(db, cf, &spec, &id, batch), |_, _| Ok(()))
    }

    /// Apply a write op, staging extra mutations from `also` into the same
    /// atomic batch.
    pub(crate) async fn apply_batched<F>(
        &self,
        collection: &str,
        op: &WriteOp,
        also: F,
    ) -> CareResult<Applied>
    where
        F: FnOnce(&DB, &mut WriteBatch) -> CareResult<()> + Send,
    {
        let spec = self.writable(collection)?;
        let lock = self.write_lock(collection);
        let _guard = lock.lock().await;
        match op {
            WriteOp::Upsert { record } => self
                .commit(
                    &spec,
                    |db, cf, batch| stage_put(db, cf, &spec, record.clone(), batch),
                    also,
                )
                .map(Applied::Stored),
            WriteOp::Delete { id } => {
                let id = spec.normalize_id(id);
                self.commit(
                    &spec,
                    |db, cf, batch| match &id {
                        Some(id) => stage_delete(db, cf, &spec, id, batch),
                        None => Ok(false),
                    },
                    also,
                )
                .map(Applied::Removed)
            }
        }
    }

    /// Apply a write op on its own
    pub async fn apply(&self, collection: &str, op: &WriteOp) -> CareResult<Applied> {
        self.apply_batched(collection, op, |_, _| Ok(())).await
    }

    /// Check that a write op could be applied, without touching storage
    pub fn validate(&self, collection: &str, op: &WriteOp) -> CareResult<()> {
        let spec = self.spec(collection)?;
        match op {
            WriteOp::Upsert { record } => {
                let obj = record.as_object().ok_or_else(|| {
                    CareError::InvalidRecord(format!(
                        "record for '{}' must be a JSON object",
                        collection
                    ))
                })?;
                resolve_id(&spec, obj.get(KEY_FIELD)).map(|_| ())
            }
            WriteOp::Delete { id } => spec.normalize_id(id).map(|_| ()).ok_or_else(|| {
                CareError::InvalidRecord(format!("'{}' is not a valid id for '{}'", id, collection))
            }),
        }
    }

    // ==================== Reads ====================

    pub async fn get(&self, collection: &str, id: &RecordId) -> CareResult<Option<Record>> {
        let spec = self.spec(collection)?;
        let Some(id) = spec.normalize_id(id) else {
            return Ok(None);
        };
        let db = self.db.read();
        let Some(cf) = db.cf_handle(collection) else {
            return Ok(None);
        };
        read_stored(&db, cf, &id)?
            .map(|stored| Ok(Record { id, data: stored.data }))
            .transpose()
    }

    /// All records of a collection in insertion order
    pub async fn get_all(&self, collection: &str) -> CareResult<Vec<Record>> {
        self.spec(collection)?;
        let db = self.db.read();
        let Some(cf) = db.cf_handle(collection) else {
            return Ok(Vec::new());
        };
        scan_pointers(&db, cf, ORD_PREFIX.as_bytes())
    }

    /// Records whose indexed field equals `value`, in insertion order
    pub async fn query_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> CareResult<Vec<Record>> {
        let spec = self.spec(collection)?;
        let index = spec.index(index).ok_or_else(|| CareError::UnknownIndex {
            collection: collection.to_string(),
            index: index.to_string(),
        })?;
        let db = self.db.read();
        let Some(cf) = db.cf_handle(collection) else {
            return Ok(Vec::new());
        };
        scan_pointers(&db, cf, &idx_value_prefix(&index.name, value))
    }

    pub async fn count(&self, collection: &str) -> CareResult<usize> {
        self.spec(collection)?;
        let db = self.db.read();
        let Some(cf) = db.cf_handle(collection) else {
            return Ok(0);
        };
        let prefix = ORD_PREFIX.as_bytes();
        let mut count = 0;
        for item in db.prefix_iterator_cf(cf, prefix) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> CareResult<()> {
        self.db.read().flush()?;
        Ok(())
    }

    // ==================== Internals ====================

    /// Run `f` against the raw database (used by the pending-write log)
    pub(crate) fn with_db<R>(&self, f: impl FnOnce(&DB) -> CareResult<R>) -> CareResult<R> {
        let db = self.db.read();
        f(&*db)
    }

    fn writable(&self, collection: &str) -> CareResult<CollectionSpec> {
        let spec = self.spec(collection)?;
        self.ensure_column_family(collection)?;
        Ok(spec)
    }

    fn ensure_column_family(&self, name: &str) -> CareResult<()> {
        if self.db.read().cf_handle(name).is_some() {
            return Ok(());
        }
        let mut db = self.db.write();
        if db.cf_handle(name).is_none() {
            db.create_cf(name, &Options::default())?;
            tracing::info!("Created collection '{}'", name);
        }
        Ok(())
    }

    fn write_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn commit<T, S, F>(&self, spec: &CollectionSpec, stage: S, also: F) -> CareResult<T>
    where
        S: FnOnce(&DB, &ColumnFamily, &mut WriteBatch) -> CareResult<T>,
        F: FnOnce(&DB, &mut WriteBatch) -> CareResult<()>,
    {
        let db = self.db.read();
        let cf = db.cf_handle(&spec.name).ok_or_else(|| {
            CareError::StorageUnavailable(format!("column family '{}' is missing", spec.name))
        })?;
        let mut batch = WriteBatch::default();
        let result = stage(&*db, cf, &mut batch)?;
        also(&*db, &mut batch)?;
        db.write(batch).map_err(|e| {
            tracing::error!("Write to '{}' failed: {}", spec.name, e);
            CareError::from(e)
        })?;
        Ok(result)
    }
}

fn resolve_id(spec: &CollectionSpec, raw: Option<&Value>) -> CareResult<Option<RecordId>> {
    match (spec.key_policy, raw) {
        (KeyPolicy::AutoIncrement, None | Some(Value::Null)) => Ok(None),
        (KeyPolicy::AutoIncrement, Some(value)) => value
            .as_u64()
            .map(|n| Some(RecordId::Seq(n)))
            .ok_or_else(|| {
                CareError::InvalidRecord(format!(
                    "'{}' ids are integers, got {}",
                    spec.name, value
                ))
            }),
        (KeyPolicy::Explicit, Some(Value::String(s))) if !s.is_empty() => {
            Ok(Some(RecordId::Key(s.clone())))
        }
        (KeyPolicy::Explicit, _) => Err(CareError::InvalidRecord(format!(
            "records in '{}' need a non-empty string '{}'",
            spec.name, KEY_FIELD
        ))),
    }
}

fn read_counter(db: &DB, cf: &ColumnFamily, key: &str) -> CareResult<u64> {
    match db.get_cf(cf, key.as_bytes())? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                CareError::StorageUnavailable(format!("corrupted counter '{}'", key))
            })?;
            Ok(u64::from_be_bytes(arr))
        }
        None => Ok(0),
    }
}

fn decode_stored(bytes: &[u8]) -> CareResult<StoredRecord> {
    serde_json::from_slice(bytes)
        .map_err(|e| CareError::StorageUnavailable(format!("corrupted record: {}", e)))
}

fn read_stored(db: &DB, cf: &ColumnFamily, id: &RecordId) -> CareResult<Option<StoredRecord>> {
    db.get_cf(cf, doc_key(id))?
        .map(|bytes| decode_stored(&bytes))
        .transpose()
}

/// Follow pointer entries (values are document keys) under `prefix`
fn scan_pointers(db: &DB, cf: &ColumnFamily, prefix: &[u8]) -> CareResult<Vec<Record>> {
    let mut records = Vec::new();
    for item in db.prefix_iterator_cf(cf, prefix) {
        let (key, target) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        let Some(bytes) = db.get_cf(cf, &target)? else {
            tracing::warn!("Dangling pointer {}", String::from_utf8_lossy(&key));
            continue;
        };
        let stored = decode_stored(&bytes)?;
        let id = stored
            .data
            .get(KEY_FIELD)
            .and_then(RecordId::from_value)
            .ok_or_else(|| CareError::StorageUnavailable("stored record lost its id".to_string()))?;
        records.push(Record {
            id,
            data: stored.data,
        });
    }
    Ok(records)
}

fn stage_put(
    db: &DB,
    cf: &ColumnFamily,
    spec: &CollectionSpec,
    mut data: Value,
    batch: &mut WriteBatch,
) -> CareResult<RecordId> {
    let obj = data.as_object_mut().ok_or_else(|| {
        CareError::InvalidRecord(format!("record for '{}' must be a JSON object", spec.name))
    })?;

    let id = match resolve_id(spec, obj.get(KEY_FIELD))? {
        Some(RecordId::Seq(n)) => {
            if n > read_counter(db, cf, SEQ_KEY)? {
                batch.put_cf(cf, SEQ_KEY.as_bytes(), n.to_be_bytes());
            }
            RecordId::Seq(n)
        }
        Some(id) => id,
        None => {
            let next = read_counter(db, cf, SEQ_KEY)? + 1;
            batch.put_cf(cf, SEQ_KEY.as_bytes(), next.to_be_bytes());
            RecordId::Seq(next)
        }
    };
    obj.insert(KEY_FIELD.to_string(), id.to_value());

    let key = doc_key(&id);
    let ord = match read_stored(db, cf, &id)? {
        Some(old) => {
            for index in &spec.indexes {
                let old_value = super::record::extract_field_value(&old.data, &index.field);
                if !old_value.is_null() {
                    batch.delete_cf(cf, idx_entry_key(&index.name, &old_value, old.ord));
                }
            }
            old.ord
        }
        None => {
            let ord = read_counter(db, cf, ORD_SEQ_KEY)? + 1;
            batch.put_cf(cf, ORD_SEQ_KEY.as_bytes(), ord.to_be_bytes());
            batch.put_cf(cf, ord_key(ord), &key);
            ord
        }
    };

    for index in &spec.indexes {
        let value = super::record::extract_field_value(&data, &index.field);
        if !value.is_null() {
            batch.put_cf(cf, idx_entry_key(&index.name, &value, ord), &key);
        }
    }

    let stored = StoredRecord {
        ord,
        updated_at: chrono::Utc::now(),
        data,
    };
    batch.put_cf(cf, &key, serde_json::to_vec(&stored)?);
    tracing::debug!("Staged put {}/{}", spec.name, id);
    Ok(id)
}

fn stage_delete(
    db: &DB,
    cf: &ColumnFamily,
    spec: &CollectionSpec,
    id: &RecordId,
    batch: &mut WriteBatch,
) -> CareResult<bool> {
    let Some(old) = read_stored(db, cf, id)? else {
        return Ok(false);
    };
    for index in &spec.indexes {
        let old_value = super::record::extract_field_value(&old.data, &index.field);
        if !old_value.is_null() {
            batch.delete_cf(cf, idx_entry_key(&index.name, &old_value, old.ord));
        }
    }
    batch.delete_cf(cf, ord_key(old.ord));
    batch.delete_cf(cf, doc_key(id));
    tracing::debug!("Staged delete {}/{}", spec.name, id);
    Ok(true)
}
