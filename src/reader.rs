//! The sampling loop.
//!
//! A [`TagReader`] owns one session and an ordered partition of its tags
//! into groups, each group read in one exchange. Once per period it reads
//! every group and publishes a [`SampleBatch`] to its [`SampleSink`].
//!
//! # Partition repair
//!
//! Tags are sorted by address (area, data block, byte, bit) and groups
//! start as runs of at most [`MAX_VARS`] tags in that order.
//! When a group of more than one tag overflows the negotiated PDU, its last
//! tag moves to the front of the next group (or into a new trailing group)
//! and the shrunken group is read again. The repaired partition is kept for
//! every later cycle. With N tags in a group at most N-1 moves happen before
//! every group fits.
//!
//! # Connection loss
//!
//! When the session cannot connect, the cycle publishes a batch in which
//! every tag is [`TagValue::ReadError`] and `connected` is false, then waits
//! out the backoff window. Such a batch says nothing about the tags, so the
//! archiver leaves its cache alone.
//! A session that drops during a cycle turns its unread groups into read
//! errors; the next cycle reconnects.
//!
//! # Cancellation
//!
//! [`CancelToken`] is polled in [`SLEEP_SLICE`] steps during both the
//! inter-cycle wait and the backoff wait, never during an exchange.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, info_span, warn};

use crate::address::{parse, WireAddress};
use crate::area::WordLength;
use crate::client::PlcSession;
use crate::codec::{Value, ValueType};
use crate::error::{Result, S7Error};
use crate::multivar::{ReadItem, MAX_VARS};

/// Granularity of cancellable sleeps.
pub const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Default sampling period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(60_000);

/// Default wait after a failed connect.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(30_000);

/// A configured, validated tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Tag identity.
    pub id: i64,
    /// Address as configured.
    pub address: String,
    /// Declared value type.
    pub value_type: ValueType,
    /// Human description.
    pub description: String,
    /// Last observed value.
    pub value: TagValue,
    wire: WireAddress,
}

impl Tag {
    /// Creates a tag, checking that the address parses and can carry the
    /// declared type.
    ///
    /// # Errors
    ///
    /// [`S7Error::InvalidAddress`] or [`S7Error::TypeMismatch`].
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::{Tag, ValueType};
    ///
    /// let tag = Tag::new(1, "DB1.DBW4", ValueType::Int16, "level").unwrap();
    /// assert_eq!(tag.address, "DB1.DBW4");
    /// assert!(Tag::new(2, "DB1.DBW4", ValueType::Bool, "").is_err());
    /// ```
    pub fn new(
        id: i64,
        address: impl Into<String>,
        value_type: ValueType,
        description: impl Into<String>,
    ) -> Result<Self> {
        let address = address.into();
        let wire = parse(&address)?.to_wire(value_type)?;
        Ok(Self {
            id,
            address,
            value_type,
            description: description.into(),
            value: TagValue::ReadError,
            wire,
        })
    }

    /// Wire address the tag is read from.
    pub fn wire(&self) -> &WireAddress {
        &self.wire
    }

    /// Position in address order: area, data block, byte, bit.
    fn address_key(&self) -> (u8, u16, u32, u32) {
        let w = &self.wire;
        let (byte, bit) = match w.word_length {
            WordLength::Bit => (w.start / 8, w.start % 8),
            _ => (w.start, 0),
        };
        (w.area.code(), w.db_number, byte, bit)
    }

    fn read_item(&self) -> ReadItem {
        ReadItem::from_wire(&self.wire)
    }

    fn decode(&self, bytes: &[u8]) -> TagValue {
        match Value::decode(self.value_type, bytes) {
            Ok(value) => TagValue::Value(value),
            Err(err) => {
                debug!(tag_id = self.id, error = %err, "undecodable item");
                TagValue::ReadError
            }
        }
    }
}

/// Outcome of reading one tag in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TagValue {
    /// The decoded value.
    Value(Value),
    /// The tag could not be read this cycle.
    #[default]
    ReadError,
}

impl TagValue {
    /// Returns the value, `None` for a read error.
    pub fn value(&self) -> Option<&Value> {
        match self {
            TagValue::Value(v) => Some(v),
            TagValue::ReadError => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Value(v) => write!(f, "{v}"),
            TagValue::ReadError => f.write_str("Read Error"),
        }
    }
}

/// One tag's outcome in a published batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Tag identity.
    pub tag_id: i64,
    /// Declared type.
    pub value_type: ValueType,
    /// Value or read error.
    pub value: TagValue,
}

/// Every tag's outcome for one cycle, in partition order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Wall-clock time the cycle finished reading.
    pub timestamp: NaiveDateTime,
    /// False when the session could not connect for this cycle.
    pub connected: bool,
    /// One entry per tag.
    pub samples: Vec<Sample>,
}

/// Consumer of published batches.
///
/// Implemented for closures, so a channel sender can be wrapped as
/// `move |batch| { let _ = tx.send(batch); }`.
pub trait SampleSink {
    /// Receives one cycle's batch.
    fn publish(&mut self, batch: SampleBatch);
}

impl<F: FnMut(SampleBatch)> SampleSink for F {
    fn publish(&mut self, batch: SampleBatch) {
        self(batch)
    }
}

/// Cooperative stop signal shared between a loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` in [`SLEEP_SLICE`] steps.
    ///
    /// Returns false as soon as cancellation is observed.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::CancelToken;
    /// use std::time::Duration;
    ///
    /// let token = CancelToken::new();
    /// assert!(token.sleep(Duration::from_millis(20)));
    /// token.cancel();
    /// assert!(!token.sleep(Duration::from_secs(60)));
    /// ```
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Timing of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Time between cycle starts.
    pub period: Duration,
    /// Wait after a failed connect.
    pub backoff: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Timings and counters of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleStats {
    /// Time spent in exchanges.
    pub read: Duration,
    /// Time from cycle start until the batch was consumed.
    pub cycle: Duration,
    /// Number of groups after repair.
    pub groups: usize,
    /// Number of partition repairs this cycle.
    pub repairs: usize,
    /// Number of tags published as read errors.
    pub errors: usize,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Groups were read; some may have failed.
    Completed(CycleStats),
    /// The session could not connect; an all-error batch was published.
    Disconnected,
}

/// Sampling loop for one controller.
pub struct TagReader<S> {
    name: String,
    session: S,
    groups: Vec<Vec<Tag>>,
    config: ReaderConfig,
}

impl<S: PlcSession> TagReader<S> {
    /// Creates a reader over `tags`, partitioned in address order.
    ///
    /// Tags at the same address keep their configured order.
    pub fn new(
        name: impl Into<String>,
        session: S,
        mut tags: Vec<Tag>,
        config: ReaderConfig,
    ) -> Self {
        tags.sort_by_key(Tag::address_key);
        let mut groups = Vec::with_capacity(tags.len().div_ceil(MAX_VARS));
        let mut tags = tags.into_iter().peekable();
        while tags.peek().is_some() {
            groups.push(tags.by_ref().take(MAX_VARS).collect());
        }
        Self {
            name: name.into(),
            session,
            groups,
            config,
        }
    }

    /// Controller name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current partition.
    pub fn groups(&self) -> &[Vec<Tag>] {
        &self.groups
    }

    /// The owned session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Runs one cycle and publishes exactly one batch.
    pub fn run_cycle(&mut self, sink: &mut impl SampleSink) -> CycleOutcome {
        let started = Instant::now();
        if !self.session.is_connected() {
            if let Err(err) = self.session.connect() {
                warn!(controller = %self.name, error = %err, "connect failed");
                for tag in self.groups.iter_mut().flatten() {
                    tag.value = TagValue::ReadError;
                }
                sink.publish(self.snapshot(false));
                return CycleOutcome::Disconnected;
            }
        }

        let mut stats = CycleStats::default();
        let mut index = 0;
        while index < self.groups.len() {
            if !self.session.is_connected() {
                self.fail_group(index);
                index += 1;
                continue;
            }
            match self.read_group(index) {
                Ok(values) => {
                    for (tag, value) in self.groups[index].iter_mut().zip(values) {
                        tag.value = value;
                    }
                    index += 1;
                }
                Err(err) if is_overflow(&err) && self.groups[index].len() > 1 => {
                    self.repair(index);
                    stats.repairs += 1;
                }
                Err(err) => {
                    warn!(
                        controller = %self.name,
                        group = index,
                        tags = self.groups[index].len(),
                        error = %err,
                        "group read failed"
                    );
                    self.fail_group(index);
                    index += 1;
                }
            }
        }
        stats.read = started.elapsed();
        stats.groups = self.groups.len();

        let batch = self.snapshot(true);
        stats.errors = batch
            .samples
            .iter()
            .filter(|s| s.value == TagValue::ReadError)
            .count();
        sink.publish(batch);
        stats.cycle = started.elapsed();
        debug!(
            controller = %self.name,
            read_ms = stats.read.as_millis() as u64,
            cycle_ms = stats.cycle.as_millis() as u64,
            groups = stats.groups,
            errors = stats.errors,
            "cycle complete"
        );
        CycleOutcome::Completed(stats)
    }

    /// Runs cycles until `cancel` is signalled, then disconnects.
    pub fn run(mut self, sink: &mut impl SampleSink, cancel: &CancelToken) -> Self {
        let tags: usize = self.groups.iter().map(Vec::len).sum();
        info!(controller = %self.name, tags, "reader started");
        while !cancel.is_cancelled() {
            let wait = match self.run_cycle(sink) {
                CycleOutcome::Completed(stats) => self.config.period.saturating_sub(stats.cycle),
                CycleOutcome::Disconnected => self.config.backoff,
            };
            if !cancel.sleep(wait) {
                break;
            }
        }
        self.session.disconnect();
        info!(controller = %self.name, "reader stopped");
        self
    }

    fn read_group(&mut self, index: usize) -> Result<Vec<TagValue>> {
        let group = &self.groups[index];
        if let [tag] = group.as_slice() {
            let w = tag.wire;
            let bytes = self
                .session
                .read_area(w.area, w.db_number, w.start, 1, w.word_length)?;
            return Ok(vec![tag.decode(&bytes)]);
        }
        let items: Vec<ReadItem> = group.iter().map(Tag::read_item).collect();
        let results = self.session.read_multi(&items)?;
        Ok(group
            .iter()
            .zip(results)
            .map(|(tag, result)| match result {
                Ok(bytes) => tag.decode(&bytes),
                Err(err) => {
                    debug!(tag_id = tag.id, error = %err, "item refused");
                    TagValue::ReadError
                }
            })
            .collect())
    }

    /// Moves the last tag of group `index` to the front of the next group.
    fn repair(&mut self, index: usize) {
        let Some(tag) = self.groups[index].pop() else {
            return;
        };
        info!(
            controller = %self.name,
            group = index,
            tag_id = tag.id,
            "group over PDU size, moving last tag"
        );
        match self.groups.get_mut(index + 1) {
            Some(next) => next.insert(0, tag),
            None => self.groups.push(vec![tag]),
        }
    }

    fn fail_group(&mut self, index: usize) {
        for tag in &mut self.groups[index] {
            tag.value = TagValue::ReadError;
        }
    }

    fn snapshot(&self, connected: bool) -> SampleBatch {
        SampleBatch {
            timestamp: Local::now().naive_local(),
            connected,
            samples: self
                .groups
                .iter()
                .flatten()
                .map(|tag| Sample {
                    tag_id: tag.id,
                    value_type: tag.value_type,
                    value: tag.value,
                })
                .collect(),
        }
    }
}

impl<S: PlcSession + Send + 'static> TagReader<S> {
    /// Runs the loop on a dedicated, named thread inside a per-controller span.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::Io`] if the thread cannot be spawned.
    pub fn spawn<K>(self, mut sink: K, cancel: CancelToken) -> Result<JoinHandle<()>>
    where
        K: SampleSink + Send + 'static,
    {
        let name = self.name.clone();
        thread::Builder::new()
            .name(format!("reader-{name}"))
            .spawn(move || {
                let span = info_span!("controller", name = %name);
                let _entered = span.enter();
                self.run(&mut sink, &cancel);
            })
            .map_err(S7Error::Io)
    }
}

impl<S> fmt::Debug for TagReader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagReader")
            .field("name", &self.name)
            .field("groups", &self.groups.iter().map(Vec::len).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

/// Errors that a smaller group would avoid.
fn is_overflow(err: &S7Error) -> bool {
    err.is_size_over_pdu() || matches!(err, S7Error::TooManyItems { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::{ChangeTracker, MemoryStore, StorageKind};
    use crate::area::Area;
    use crate::config::Settings;
    use crate::error::CpuError;
    use crate::multivar::ItemResult;
    use std::collections::HashMap;

    /// Scripted session: serves values keyed by wire start address and
    /// refuses multi-reads of more than `max_items` items.
    #[derive(Default)]
    struct MockPlc {
        connected: bool,
        refuse_connect: bool,
        max_items: usize,
        memory: HashMap<u32, Vec<u8>>,
        multi_sizes: Vec<usize>,
        area_reads: usize,
        connects: usize,
        drop_after: Option<usize>,
    }

    impl MockPlc {
        fn new(max_items: usize) -> Self {
            Self {
                max_items,
                ..Self::default()
            }
        }

        fn lookup(&self, start: u32, size: usize) -> Vec<u8> {
            self.memory
                .get(&start)
                .cloned()
                .unwrap_or_else(|| vec![0; size])
        }

        fn exchange(&mut self) -> Result<()> {
            if let Some(left) = self.drop_after.as_mut() {
                if *left == 0 {
                    self.connected = false;
                    return Err(S7Error::Timeout);
                }
                *left -= 1;
            }
            Ok(())
        }
    }

    impl PlcSession for MockPlc {
        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            if self.refuse_connect {
                return Err(S7Error::Unreachable {
                    host: "mock".into(),
                });
            }
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn pdu_length(&self) -> usize {
            240
        }

        fn read_area(
            &mut self,
            _area: Area,
            _db_number: u16,
            start: u32,
            amount: usize,
            word_length: WordLength,
        ) -> Result<Vec<u8>> {
            self.exchange()?;
            self.area_reads += 1;
            Ok(self.lookup(start, amount * word_length.size()))
        }

        fn read_multi(&mut self, items: &[ReadItem]) -> Result<Vec<ItemResult>> {
            self.exchange()?;
            if items.len() > self.max_items {
                return Err(CpuError::SizeOverPdu.into());
            }
            self.multi_sizes.push(items.len());
            Ok(items
                .iter()
                .map(|i| Ok(self.lookup(i.start, i.data_size())))
                .collect())
        }
    }

    fn tags(n: usize) -> Vec<Tag> {
        (0..n)
            .map(|i| {
                Tag::new(i as i64 + 1, format!("DB1.DBW{}", i * 2), ValueType::Int16, "").unwrap()
            })
            .collect()
    }

    #[test]
    fn test_initial_partition() {
        let reader = TagReader::new("plc", MockPlc::new(20), tags(45), ReaderConfig::default());
        let sizes: Vec<usize> = reader.groups().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }

    #[test]
    fn test_overflow_repair_moves_last() {
        let mut reader = TagReader::new("plc", MockPlc::new(2), tags(5), ReaderConfig::default());
        let mut batches = Vec::new();
        let outcome = reader.run_cycle(&mut |b| batches.push(b));

        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected a completed cycle");
        };
        assert_eq!(stats.repairs, 4);
        assert_eq!(stats.errors, 0);
        let ids: Vec<Vec<i64>> = reader
            .groups()
            .iter()
            .map(|g| g.iter().map(|t| t.id).collect())
            .collect();
        assert_eq!(ids, vec![vec![1, 2], vec![3, 4], vec![5]]);

        // No tag lost or duplicated, order kept.
        let published: Vec<i64> = batches[0].samples.iter().map(|s| s.tag_id).collect();
        assert_eq!(published, vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.session().area_reads, 1);
    }

    #[test]
    fn test_repaired_partition_is_kept() {
        let mut reader = TagReader::new("plc", MockPlc::new(3), tags(7), ReaderConfig::default());
        let mut sink = |_b: SampleBatch| {};
        reader.run_cycle(&mut sink);
        let after_first: Vec<usize> = reader.groups().iter().map(Vec::len).collect();
        let CycleOutcome::Completed(stats) = reader.run_cycle(&mut sink) else {
            panic!("expected a completed cycle");
        };
        assert_eq!(stats.repairs, 0);
        let after_second: Vec<usize> = reader.groups().iter().map(Vec::len).collect();
        assert_eq!(after_first, after_second);
        assert!(after_second.iter().all(|&n| n <= 3));
        assert_eq!(after_second.iter().sum::<usize>(), 7);
    }

    #[test]
    fn test_single_tag_overflow_is_an_error() {
        let mut reader = TagReader::new("plc", MockPlc::new(0), tags(2), ReaderConfig::default());
        let mut batches = Vec::new();
        reader.run_cycle(&mut |b| batches.push(b));
        // [1, 2] overflows, 2 moves out, both singles go through read_area.
        assert_eq!(reader.groups().len(), 2);
        assert!(batches[0]
            .samples
            .iter()
            .all(|s| s.value != TagValue::ReadError));
    }

    #[test]
    fn test_connect_failure_publishes_all_errors() {
        let mut plc = MockPlc::new(20);
        plc.refuse_connect = true;
        let mut reader = TagReader::new("plc", plc, tags(3), ReaderConfig::default());
        let mut batches = Vec::new();
        let outcome = reader.run_cycle(&mut |b| batches.push(b));
        assert_eq!(outcome, CycleOutcome::Disconnected);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].samples.len(), 3);
        assert!(!batches[0].connected);
        assert!(batches[0]
            .samples
            .iter()
            .all(|s| s.value == TagValue::ReadError));
    }

    #[test]
    fn test_drop_mid_cycle_fails_unreached_groups() {
        let mut plc = MockPlc::new(20);
        plc.drop_after = Some(1);
        let mut reader = TagReader::new("plc", plc, tags(45), ReaderConfig::default());
        let mut batches = Vec::new();
        let CycleOutcome::Completed(stats) = reader.run_cycle(&mut |b| batches.push(b)) else {
            panic!("expected a completed cycle");
        };
        assert_eq!(stats.errors, 25);
        assert!(!reader.session().is_connected());
    }

    #[test]
    fn test_values_are_decoded() {
        let mut plc = MockPlc::new(20);
        plc.memory.insert(0, vec![0xFF, 0xFE]);
        plc.memory.insert(2, vec![0x01, 0x00]);
        let mut reader = TagReader::new("plc", plc, tags(2), ReaderConfig::default());
        let mut batches = Vec::new();
        reader.run_cycle(&mut |b| batches.push(b));
        let values: Vec<TagValue> = batches[0].samples.iter().map(|s| s.value).collect();
        assert_eq!(
            values,
            vec![
                TagValue::Value(Value::Int16(-2)),
                TagValue::Value(Value::Int16(256))
            ]
        );
    }

    #[test]
    fn test_cancel_during_backoff() {
        let mut plc = MockPlc::new(20);
        plc.refuse_connect = true;
        let config = ReaderConfig {
            period: Duration::from_secs(60),
            backoff: Duration::from_secs(60),
        };
        let reader = TagReader::new("plc", plc, tags(1), config);
        let cancel = CancelToken::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = reader
            .spawn(
                move |b: SampleBatch| {
                    let _ = tx.send(b);
                },
                cancel.clone(),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let requested = Instant::now();
        cancel.cancel();
        handle.join().unwrap();
        assert!(requested.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_run_publishes_once_per_cycle() {
        let config = ReaderConfig {
            period: Duration::from_millis(20),
            backoff: Duration::from_millis(20),
        };
        let reader = TagReader::new("plc", MockPlc::new(20), tags(2), config);
        let cancel = CancelToken::new();
        let mut count = 0;
        let stopper = cancel.clone();
        let reader = reader.run(
            &mut |_b: SampleBatch| {
                count += 1;
                if count == 3 {
                    stopper.cancel();
                }
            },
            &cancel,
        );
        assert_eq!(count, 3);
        assert!(!reader.session().is_connected());
        assert_eq!(reader.session().multi_sizes, vec![2, 2, 2]);
    }

    #[test]
    fn test_scenario_only_real_changes() {
        let mut plc = MockPlc::new(2);
        plc.memory.insert(8 * 4 + 1, vec![0x01]);
        plc.memory.insert(6, vec![0x12, 0x34]);
        plc.memory.insert(10, 1.5f32.to_be_bytes().to_vec());
        let tags = vec![
            Tag::new(1, "M4.1", ValueType::Bool, "motor").unwrap(),
            Tag::new(2, "MW6", ValueType::UInt16, "speed").unwrap(),
            Tag::new(3, "MD10", ValueType::Float, "temperature").unwrap(),
        ];
        let mut reader = TagReader::new("plc", plc, tags, ReaderConfig::default());
        let settings = Settings::default();
        let mut tracker = ChangeTracker::new("plc", MemoryStore::default(), &settings);

        reader.run_cycle(&mut tracker);
        assert_eq!(reader.groups().len(), 2);
        assert_eq!(tracker.store().rows(StorageKind::Int).len(), 2);
        assert_eq!(tracker.store().rows(StorageKind::Double).len(), 1);

        tracker.store_mut().clear();
        reader.session.memory.insert(10, 2.5f32.to_be_bytes().to_vec());
        reader.run_cycle(&mut tracker);
        assert_eq!(tracker.store().rows(StorageKind::Int).len(), 0);
        assert_eq!(tracker.store().rows(StorageKind::ULong).len(), 0);
        let doubles = tracker.store().rows(StorageKind::Double);
        assert_eq!(doubles.len(), 1);
        assert_eq!(doubles[0].tag_id, 3);
        assert_eq!(doubles[0].value.to_string(), "2.5");
        assert_eq!(tracker.store().insert_calls(), 1);
    }

    #[test]
    fn test_outage_does_not_rearchive_unchanged_values() {
        let mut plc = MockPlc::new(20);
        plc.memory.insert(0, vec![0x00, 0x07]);
        let tags = vec![Tag::new(1, "DB1.DBW0", ValueType::Int16, "level").unwrap()];
        let mut reader = TagReader::new("plc", plc, tags, ReaderConfig::default());
        let mut tracker = ChangeTracker::new("plc", MemoryStore::default(), &Settings::default());

        reader.run_cycle(&mut tracker);
        reader.session.disconnect();
        reader.session.refuse_connect = true;
        assert_eq!(reader.run_cycle(&mut tracker), CycleOutcome::Disconnected);
        reader.session.refuse_connect = false;
        reader.run_cycle(&mut tracker);

        let rows = tracker.store().rows(StorageKind::Int);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value.to_string(), "7");
        assert_eq!(tracker.store().insert_calls(), 1);
    }

    #[test]
    fn test_initial_partition_follows_address_order() {
        let tags = vec![
            Tag::new(1, "MW10", ValueType::UInt16, "").unwrap(),
            Tag::new(2, "DB2.DBW0", ValueType::Int16, "").unwrap(),
            Tag::new(3, "DB1.DBX4.1", ValueType::Bool, "").unwrap(),
            Tag::new(4, "DB1.DBW2", ValueType::Int16, "").unwrap(),
            Tag::new(5, "DB1.DBX4.0", ValueType::Bool, "").unwrap(),
            Tag::new(6, "MW2", ValueType::UInt16, "").unwrap(),
        ];
        let reader = TagReader::new("plc", MockPlc::new(20), tags, ReaderConfig::default());
        let ids: Vec<i64> = reader.groups()[0].iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![6, 1, 4, 5, 3, 2]);
    }

    #[test]
    fn test_tag_value_display() {
        assert_eq!(TagValue::ReadError.to_string(), "Read Error");
        assert_eq!(TagValue::Value(Value::Bool(true)).to_string(), "true");
        assert!(TagValue::ReadError.value().is_none());
    }
}
