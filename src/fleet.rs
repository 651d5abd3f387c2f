//! Fleet orchestration.
//!
//! Two CSV sheets describe the fleet. The controller sheet has the columns
//! `ID,Name,Address,Port,Rack,Slot,Description,Enable`; the tag sheet has
//! `ID,PlcID,Address,TagType,Description,Enable`. Only rows whose `Enable`
//! cell is `1` take part.
//!
//! [`plan`] validates both sheets into a [`Plan`]: one entry per enabled
//! controller with at least one valid tag, plus a [`Skipped`] record for
//! every row left out for a reason worth reporting. [`Fleet::start`] then
//! runs one reader thread per planned controller, each archiving through its
//! own [`ChangeTracker`].
//!
//! Rows whose `Enable` cell is not `1`, and tags belonging to a disabled
//! controller, are left out silently.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::thread::JoinHandle;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::archiver::{ArchiveStore, ChangeTracker, CsvStore};
use crate::client::Session;
use crate::codec::ValueType;
use crate::config::Settings;
use crate::error::{Result, S7Error};
use crate::reader::{CancelToken, Tag, TagReader};

/// One row of the controller sheet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerRow {
    /// Controller identity referenced by tags.
    #[serde(rename = "ID")]
    pub id: i64,
    /// Name used in logs and thread names.
    #[serde(rename = "Name")]
    pub name: String,
    /// Host name or IP address.
    #[serde(rename = "Address")]
    pub address: String,
    /// TCP port.
    #[serde(rename = "Port")]
    pub port: u16,
    /// Rack number.
    #[serde(rename = "Rack")]
    pub rack: u8,
    /// Slot number.
    #[serde(rename = "Slot")]
    pub slot: u8,
    /// Free text.
    #[serde(rename = "Description", default)]
    pub description: String,
    /// `1` when enabled.
    #[serde(rename = "Enable", default)]
    pub enable: String,
}

impl ControllerRow {
    /// Whether the row takes part.
    pub fn enabled(&self) -> bool {
        self.enable.trim() == "1"
    }
}

/// One row of the tag sheet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagRow {
    /// Tag identity, written to the archive.
    #[serde(rename = "ID")]
    pub id: i64,
    /// Owning controller.
    #[serde(rename = "PlcID")]
    pub plc_id: i64,
    /// Controller address, e.g. `DB1.DBW4`.
    #[serde(rename = "Address")]
    pub address: String,
    /// Type name, e.g. `int16` or `Single`.
    #[serde(rename = "TagType")]
    pub tag_type: String,
    /// Free text.
    #[serde(rename = "Description", default)]
    pub description: String,
    /// `1` when enabled.
    #[serde(rename = "Enable", default)]
    pub enable: String,
}

impl TagRow {
    /// Whether the row takes part.
    pub fn enabled(&self) -> bool {
        self.enable.trim() == "1"
    }
}

/// Which sheet a skipped row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    /// The controller sheet.
    Controllers,
    /// The tag sheet.
    Tags,
}

impl fmt::Display for SheetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetKind::Controllers => f.write_str("controllers"),
            SheetKind::Tags => f.write_str("tags"),
        }
    }
}

/// Why a row was left out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// The row did not deserialize.
    #[error("malformed row: {0}")]
    Malformed(String),
    /// A controller with the same id appeared earlier.
    #[error("duplicate controller id {0}")]
    DuplicateController(i64),
    /// A tag with the same id appeared earlier for the same controller.
    #[error("duplicate tag id {0}")]
    DuplicateTag(i64),
    /// The tag references a controller id that is not in the sheet.
    #[error("unknown controller id {0}")]
    UnknownController(i64),
    /// The type name is not recognised.
    #[error("unknown tag type '{0}'")]
    UnknownType(String),
    /// The address does not parse.
    #[error("invalid address '{0}'")]
    BadAddress(String),
    /// The address cannot carry the declared type.
    #[error("address '{address}' does not match type {value_type}")]
    TypeMismatch {
        /// The address.
        address: String,
        /// The declared type.
        value_type: ValueType,
    },
    /// The controller ended up with no valid tags.
    #[error("controller has no tags")]
    NoTags,
}

/// A row left out of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    /// Source sheet.
    pub sheet: SheetKind,
    /// One-based line in the sheet, header included.
    pub line: u64,
    /// Why.
    pub reason: SkipReason,
}

impl fmt::Display for Skipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}: {}", self.sheet, self.line, self.reason)
    }
}

/// A controller with its validated tags.
#[derive(Debug, Clone)]
pub struct ControllerPlan {
    /// The controller row.
    pub controller: ControllerRow,
    /// Tags in sheet order.
    pub tags: Vec<Tag>,
}

/// Validated fleet description.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Controllers to run, in sheet order.
    pub controllers: Vec<ControllerPlan>,
    /// Rows left out.
    pub skipped: Vec<Skipped>,
}

impl Plan {
    /// Total number of tags across all controllers.
    pub fn tag_count(&self) -> usize {
        self.controllers.iter().map(|c| c.tags.len()).sum()
    }
}

/// A sheet row with its line number.
pub type SheetRow<T> = (u64, T);

/// Reads a sheet, collecting malformed rows instead of failing on them.
///
/// # Errors
///
/// Returns [`S7Error::Csv`] or [`S7Error::Io`] when the file cannot be
/// opened or its header is unreadable.
pub fn read_sheet<T: DeserializeOwned>(
    path: impl AsRef<Path>,
    sheet: SheetKind,
) -> Result<(Vec<SheetRow<T>>, Vec<Skipped>)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    reader.headers()?;
    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for (index, record) in reader.deserialize::<T>().enumerate() {
        let fallback = index as u64 + 2;
        match record {
            Ok(row) => rows.push((fallback, row)),
            Err(err) => {
                let line = err
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(fallback);
                skipped.push(Skipped {
                    sheet,
                    line,
                    reason: SkipReason::Malformed(err.to_string()),
                });
            }
        }
    }
    Ok((rows, skipped))
}

/// Validates sheet rows into a plan.
///
/// # Example
///
/// ```
/// use s7_archiver::{plan, ControllerRow, TagRow};
///
/// let controllers = vec![(2, ControllerRow {
///     id: 1,
///     name: "press".into(),
///     address: "10.0.0.5".into(),
///     port: 102,
///     rack: 0,
///     slot: 1,
///     description: String::new(),
///     enable: "1".into(),
/// })];
/// let tag = |id, address: &str, ty: &str| TagRow {
///     id,
///     plc_id: 1,
///     address: address.into(),
///     tag_type: ty.into(),
///     description: String::new(),
///     enable: "1".into(),
/// };
/// let tags = vec![
///     (2, tag(10, "DB1.DBW0", "int16")),
///     (3, tag(11, "DB1.DBW2", "bool")),
/// ];
/// let plan = plan(controllers, tags, Vec::new());
/// assert_eq!(plan.tag_count(), 1);
/// assert_eq!(plan.skipped.len(), 1);
/// ```
pub fn plan(
    controllers: Vec<SheetRow<ControllerRow>>,
    tags: Vec<SheetRow<TagRow>>,
    mut skipped: Vec<Skipped>,
) -> Plan {
    let mut order: Vec<(u64, ControllerRow)> = Vec::new();
    let mut disabled = HashSet::new();
    let mut index_of = HashMap::new();
    for (line, row) in controllers {
        if index_of.contains_key(&row.id) || disabled.contains(&row.id) {
            skipped.push(Skipped {
                sheet: SheetKind::Controllers,
                line,
                reason: SkipReason::DuplicateController(row.id),
            });
            continue;
        }
        if !row.enabled() {
            disabled.insert(row.id);
            continue;
        }
        index_of.insert(row.id, order.len());
        order.push((line, row));
    }

    let mut grouped: Vec<Vec<Tag>> = vec![Vec::new(); order.len()];
    let mut seen: Vec<HashSet<i64>> = vec![HashSet::new(); order.len()];
    for (line, row) in tags {
        let skip = |reason| Skipped {
            sheet: SheetKind::Tags,
            line,
            reason,
        };
        let Some(&slot) = index_of.get(&row.plc_id) else {
            if !disabled.contains(&row.plc_id) {
                skipped.push(skip(SkipReason::UnknownController(row.plc_id)));
            }
            continue;
        };
        if !row.enabled() {
            continue;
        }
        match build_tag(&row) {
            Ok(tag) if seen[slot].insert(tag.id) => grouped[slot].push(tag),
            Ok(tag) => skipped.push(skip(SkipReason::DuplicateTag(tag.id))),
            Err(reason) => skipped.push(skip(reason)),
        }
    }

    let mut controllers = Vec::new();
    for ((line, controller), tags) in order.into_iter().zip(grouped) {
        if tags.is_empty() {
            skipped.push(Skipped {
                sheet: SheetKind::Controllers,
                line,
                reason: SkipReason::NoTags,
            });
        } else {
            controllers.push(ControllerPlan { controller, tags });
        }
    }
    Plan {
        controllers,
        skipped,
    }
}

fn build_tag(row: &TagRow) -> std::result::Result<Tag, SkipReason> {
    let value_type = ValueType::from_name(&row.tag_type)
        .map_err(|_| SkipReason::UnknownType(row.tag_type.clone()))?;
    Tag::new(row.id, row.address.trim(), value_type, row.description.clone()).map_err(
        |err| match err {
            S7Error::TypeMismatch { .. } => SkipReason::TypeMismatch {
                address: row.address.clone(),
                value_type,
            },
            _ => SkipReason::BadAddress(row.address.clone()),
        },
    )
}

/// Reads both sheets named in `settings` and validates them.
///
/// # Errors
///
/// Returns an error when either sheet cannot be opened.
pub fn load_plan(settings: &Settings) -> Result<Plan> {
    let (controllers, mut skipped) =
        read_sheet::<ControllerRow>(&settings.controllers_csv, SheetKind::Controllers)?;
    let (tags, tag_skips) = read_sheet::<TagRow>(&settings.tags_csv, SheetKind::Tags)?;
    skipped.extend(tag_skips);
    Ok(plan(controllers, tags, skipped))
}

struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

/// Running readers, one per controller.
pub struct Fleet {
    workers: Vec<Worker>,
    cancel: CancelToken,
}

impl Fleet {
    /// Loads the sheets and starts a reader per controller, archiving to
    /// CSV files under `archive_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when a sheet cannot be read, the archive directory
    /// cannot be created, or a thread cannot be spawned.
    pub fn start(settings: &Settings) -> Result<Self> {
        let plan = load_plan(settings)?;
        let store = CsvStore::new(&settings.archive_dir)?;
        Self::spawn(plan, settings, store)
    }

    /// Starts a reader per planned controller, each with its own clone of
    /// `store`.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::Io`] when a thread cannot be spawned; readers
    /// already started are stopped first.
    pub fn spawn<St>(plan: Plan, settings: &Settings, store: St) -> Result<Self>
    where
        St: ArchiveStore + Clone + Send + 'static,
    {
        for skip in &plan.skipped {
            warn!(sheet = %skip.sheet, line = skip.line, reason = %skip.reason, "row skipped");
        }
        let mut fleet = Fleet {
            workers: Vec::with_capacity(plan.controllers.len()),
            cancel: CancelToken::new(),
        };
        for ControllerPlan { controller, tags } in plan.controllers {
            let config = settings.session_config(
                &controller.address,
                controller.port,
                controller.rack,
                controller.slot,
            );
            info!(
                controller = %controller.name,
                address = %controller.address,
                port = controller.port,
                rack = controller.rack,
                slot = controller.slot,
                tags = tags.len(),
                "starting reader"
            );
            let reader = TagReader::new(
                controller.name.clone(),
                Session::new(config),
                tags,
                settings.reader_config(),
            );
            let tracker = ChangeTracker::new(controller.name.clone(), store.clone(), settings);
            match reader.spawn(tracker, fleet.cancel.clone()) {
                Ok(handle) => fleet.workers.push(Worker {
                    name: controller.name,
                    handle,
                }),
                Err(err) => {
                    fleet.stop();
                    return Err(err);
                }
            }
        }
        info!(controllers = fleet.workers.len(), "fleet started");
        Ok(fleet)
    }

    /// Number of running readers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no reader was started.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Names of the running readers.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.name.as_str())
    }

    /// Signals every reader and waits for all of them to finish.
    pub fn stop(self) {
        self.cancel.cancel();
        let count = self.workers.len();
        for worker in self.workers {
            if worker.handle.join().is_err() {
                error!(controller = %worker.name, "reader thread panicked");
            }
        }
        info!(controllers = count, "fleet stopped");
    }
}

impl fmt::Debug for Fleet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fleet")
            .field("workers", &self.names().collect::<Vec<_>>())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
