//! Change-tracking archiver.
//!
//! [`ChangeTracker`] consumes sample batches, keeps the last outcome seen
//! per tag and turns every changed value into an [`ArchiveRow`]. Rows are
//! bucketed by [`StorageKind`] and each non-empty bucket is written with a
//! single bulk insert per batch.
//!
//! | Kind | Value types | Stored as |
//! |------|-------------|-----------|
//! | [`StorageKind::Int`] | bool, byte, sbyte, int16, uint16, int32, uint32, int64 | `i64` |
//! | [`StorageKind::ULong`] | uint64 | `u64` |
//! | [`StorageKind::Double`] | float, double | `f64` |
//!
//! A tag seen for the first time always counts as changed. Read errors are
//! cached like values, so they are never archived but the first good value
//! after one is. A batch published for a failed connect leaves the cache
//! untouched. A failed insert is logged; the cache keeps the values that
//! were attempted.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use s7_archiver::{
//!     ChangeTracker, MemoryStore, Sample, SampleBatch, Settings, StorageKind, TagValue, Value,
//!     ValueType,
//! };
//!
//! let mut tracker = ChangeTracker::new("press", MemoryStore::default(), &Settings::default());
//! let batch = SampleBatch {
//!     timestamp: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap(),
//!     connected: true,
//!     samples: vec![Sample {
//!         tag_id: 7,
//!         value_type: ValueType::Float,
//!         value: TagValue::Value(Value::Float(0.5)),
//!     }],
//! };
//! tracker.process(&batch);
//! tracker.process(&batch);
//! assert_eq!(tracker.store().rows(StorageKind::Double).len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, error};

use crate::codec::Value;
use crate::config::{ArchiveTable, Settings};
use crate::error::Result;
use crate::reader::{SampleBatch, SampleSink, TagValue};

/// Timestamp layout used in archive files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Storage category of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Anything that fits a signed 64-bit integer.
    Int,
    /// Unsigned 64-bit.
    ULong,
    /// Floating point.
    Double,
}

impl StorageKind {
    /// All kinds in insert order.
    pub const ALL: [StorageKind; 3] = [StorageKind::Int, StorageKind::ULong, StorageKind::Double];
}

/// A value widened to its storage category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArchiveValue {
    /// Signed integer bucket.
    Int(i64),
    /// Unsigned 64-bit bucket.
    ULong(u64),
    /// Floating bucket.
    Double(f64),
}

impl ArchiveValue {
    /// Widens a tag value.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::{ArchiveValue, Value};
    ///
    /// assert_eq!(ArchiveValue::from_value(&Value::Bool(true)), ArchiveValue::Int(1));
    /// assert_eq!(ArchiveValue::from_value(&Value::UInt32(7)), ArchiveValue::Int(7));
    /// assert_eq!(ArchiveValue::from_value(&Value::Float(0.5)), ArchiveValue::Double(0.5));
    /// ```
    pub fn from_value(value: &Value) -> Self {
        match *value {
            Value::Bool(v) => ArchiveValue::Int(i64::from(v)),
            Value::Byte(v) => ArchiveValue::Int(i64::from(v)),
            Value::SByte(v) => ArchiveValue::Int(i64::from(v)),
            Value::Int16(v) => ArchiveValue::Int(i64::from(v)),
            Value::UInt16(v) => ArchiveValue::Int(i64::from(v)),
            Value::Int32(v) => ArchiveValue::Int(i64::from(v)),
            Value::UInt32(v) => ArchiveValue::Int(i64::from(v)),
            Value::Int64(v) => ArchiveValue::Int(v),
            Value::UInt64(v) => ArchiveValue::ULong(v),
            Value::Float(v) => ArchiveValue::Double(f64::from(v)),
            Value::Double(v) => ArchiveValue::Double(v),
        }
    }

    /// Storage category of this value.
    pub fn kind(&self) -> StorageKind {
        match self {
            ArchiveValue::Int(_) => StorageKind::Int,
            ArchiveValue::ULong(_) => StorageKind::ULong,
            ArchiveValue::Double(_) => StorageKind::Double,
        }
    }
}

impl fmt::Display for ArchiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveValue::Int(v) => write!(f, "{v}"),
            ArchiveValue::ULong(v) => write!(f, "{v}"),
            ArchiveValue::Double(v) => write!(f, "{v}"),
        }
    }
}

/// One archived change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveRow {
    /// Tag identity.
    pub tag_id: i64,
    /// Time of the batch the change was seen in.
    pub timestamp: NaiveDateTime,
    /// The new value.
    pub value: ArchiveValue,
}

/// Append-only storage backend.
pub trait ArchiveStore {
    /// Appends `rows` to `table` in one operation.
    fn bulk_insert(&mut self, table: &ArchiveTable, rows: &[ArchiveRow]) -> Result<()>;
}

/// In-memory store, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<ArchiveRow>>,
    inserts: usize,
    fail: bool,
}

impl MemoryStore {
    /// Makes every following insert fail (or succeed again).
    pub fn set_failing(&mut self, fail: bool) {
        self.fail = fail;
    }

    /// Rows stored in the named table.
    pub fn table(&self, name: &str) -> &[ArchiveRow] {
        self.tables.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// All stored rows of one storage kind.
    pub fn rows(&self, kind: StorageKind) -> Vec<&ArchiveRow> {
        self.tables
            .values()
            .flatten()
            .filter(|row| row.value.kind() == kind)
            .collect()
    }

    /// Number of successful bulk inserts.
    pub fn insert_calls(&self) -> usize {
        self.inserts
    }

    /// Drops all rows and resets the insert counter.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.inserts = 0;
    }
}

impl ArchiveStore for MemoryStore {
    fn bulk_insert(&mut self, table: &ArchiveTable, rows: &[ArchiveRow]) -> Result<()> {
        if self.fail {
            return Err(std::io::Error::other(format!("insert into {} refused", table.name)).into());
        }
        self.tables
            .entry(table.name.clone())
            .or_default()
            .extend_from_slice(rows);
        self.inserts += 1;
        Ok(())
    }
}

/// Store writing one append-only CSV file per table.
///
/// A new file starts with a header naming the table's three columns.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    /// Creates a store under `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::Io`](crate::S7Error::Io) if the directory cannot be
    /// created.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the file backing `table`.
    pub fn path(&self, table: &ArchiveTable) -> PathBuf {
        self.dir.join(format!("{}.csv", table.name))
    }
}

impl ArchiveStore for CsvStore {
    fn bulk_insert(&mut self, table: &ArchiveTable, rows: &[ArchiveRow]) -> Result<()> {
        let path = self.path(table);
        let new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if new {
            writer.write_record([&table.id_column, &table.date_column, &table.value_column])?;
        }
        for row in rows {
            writer.write_record([
                row.tag_id.to_string(),
                row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                row.value.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Tables the three storage kinds are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Tables {
    int: ArchiveTable,
    ulong: ArchiveTable,
    double: ArchiveTable,
}

impl Tables {
    fn get(&self, kind: StorageKind) -> &ArchiveTable {
        match kind {
            StorageKind::Int => &self.int,
            StorageKind::ULong => &self.ulong,
            StorageKind::Double => &self.double,
        }
    }
}

/// Rows produced from one batch, per storage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessStats {
    /// Rows in the signed-integer bucket.
    pub int_rows: usize,
    /// Rows in the unsigned-64 bucket.
    pub ulong_rows: usize,
    /// Rows in the floating bucket.
    pub double_rows: usize,
    /// Bulk inserts that failed.
    pub failed_inserts: usize,
}

/// Diffs batches against the last outcome per tag and archives changes.
pub struct ChangeTracker<S> {
    name: String,
    store: S,
    tables: Tables,
    last: HashMap<i64, TagValue>,
}

impl<S: ArchiveStore> ChangeTracker<S> {
    /// Creates a tracker writing to the tables named in `settings`.
    pub fn new(name: impl Into<String>, store: S, settings: &Settings) -> Self {
        Self {
            name: name.into(),
            store,
            tables: Tables {
                int: settings.int_archive.clone(),
                ulong: settings.ulong_archive.clone(),
                double: settings.double_archive.clone(),
            },
            last: HashMap::new(),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The backing store, mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Processes one batch: at most one bulk insert per storage kind.
    ///
    /// A batch with `connected` false is ignored.
    pub fn process(&mut self, batch: &SampleBatch) -> ProcessStats {
        if !batch.connected {
            debug!(controller = %self.name, "skipping batch of a failed connect");
            return ProcessStats::default();
        }
        let mut buckets: HashMap<StorageKind, Vec<ArchiveRow>> = HashMap::new();
        for sample in &batch.samples {
            let changed = match self.last.get(&sample.tag_id) {
                None => true,
                Some(previous) => !same_outcome(previous, &sample.value),
            };
            if !changed {
                continue;
            }
            self.last.insert(sample.tag_id, sample.value);
            if let TagValue::Value(value) = &sample.value {
                let value = ArchiveValue::from_value(value);
                buckets.entry(value.kind()).or_default().push(ArchiveRow {
                    tag_id: sample.tag_id,
                    timestamp: batch.timestamp,
                    value,
                });
            }
        }

        let mut stats = ProcessStats::default();
        for kind in StorageKind::ALL {
            let Some(rows) = buckets.get(&kind) else {
                continue;
            };
            match kind {
                StorageKind::Int => stats.int_rows = rows.len(),
                StorageKind::ULong => stats.ulong_rows = rows.len(),
                StorageKind::Double => stats.double_rows = rows.len(),
            }
            let table = self.tables.get(kind);
            match self.store.bulk_insert(table, rows) {
                Ok(()) => debug!(
                    controller = %self.name,
                    table = %table.name,
                    rows = rows.len(),
                    "archived"
                ),
                Err(err) => {
                    stats.failed_inserts += 1;
                    error!(
                        controller = %self.name,
                        table = %table.name,
                        rows = rows.len(),
                        error = %err,
                        "bulk insert failed"
                    );
                }
            }
        }
        stats
    }
}

impl<S: ArchiveStore> SampleSink for ChangeTracker<S> {
    fn publish(&mut self, batch: SampleBatch) {
        self.process(&batch);
    }
}

impl<S> fmt::Debug for ChangeTracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("name", &self.name)
            .field("tables", &self.tables)
            .field("cached", &self.last.len())
            .finish()
    }
}

fn same_outcome(a: &TagValue, b: &TagValue) -> bool {
    match (a, b) {
        (TagValue::Value(x), TagValue::Value(y)) => x.same_as(y),
        (TagValue::ReadError, TagValue::ReadError) => true,
        _ => false,
    }
}
