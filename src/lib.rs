//! # S7 Archiver
//!
//! A Rust library for sampling Siemens S7 controllers over ISO-on-TCP and
//! archiving every value change.
//!
//! The crate has two layers:
//!
//! - **Protocol**: a blocking [`Session`] that performs the ISO connect and
//!   PDU negotiation, then serves area reads and writes, multi-variable
//!   batches, the controller clock, CPU status and SZL reads. Each operation
//!   is a bounded request/reply exchange; large transfers are split into
//!   PDU-sized chunks.
//! - **Pipeline**: a [`TagReader`] per controller samples its tags on a fixed
//!   period, repairing batches that exceed the PDU, and hands every snapshot
//!   to a [`ChangeTracker`], which writes changed values to an
//!   [`ArchiveStore`]. A [`Fleet`] runs one reader thread per controller
//!   described in two CSV sheets.
//!
//! ## Quick Start
//!
//! ```no_run
//! use s7_archiver::{Area, Session, SessionConfig, WordLength};
//!
//! fn main() -> s7_archiver::Result<()> {
//!     let config = SessionConfig::new("192.168.0.10").with_rack_slot(0, 1);
//!     let mut session = Session::new(config);
//!     session.connect()?;
//!     println!("PDU size: {}", session.pdu_length());
//!
//!     // 4 bytes from DB1 starting at byte 0
//!     let data = session.read_area(Area::DataBlock, 1, 0, 4, WordLength::Byte)?;
//!     println!("DB1.DBD0 = {:?}", data);
//!
//!     session.write_area(Area::Marker, 0, 10, WordLength::Byte, &[0x12, 0x34])?;
//!     Ok(())
//! }
//! ```
//!
//! ## Addresses and Types
//!
//! Tags are addressed with the usual S7 notation and carry a declared type:
//!
//! | Address | Meaning | Types |
//! |---------|---------|-------|
//! | `DB1.DBX2.3` | bit 3 of byte 2 in DB1 | bool |
//! | `DB1.DBB4` | byte 4 in DB1 | byte, sbyte |
//! | `MW6` | marker word 6 | int16, uint16 |
//! | `ID8` | input double word 8 | int32, uint32, float |
//! | `T5`, `C3` | timer / counter 5 | uint16 |
//!
//! ```
//! use s7_archiver::{parse_address, Tag, ValueType};
//!
//! let addr = parse_address("DB10.DBD4").unwrap();
//! assert_eq!(addr.to_string(), "DB10.DBD4");
//! assert!(Tag::new(1, "DB10.DBD4", ValueType::Float, "flow").is_ok());
//! assert!(Tag::new(2, "DB10.DBD4", ValueType::Int16, "flow").is_err());
//! ```
//!
//! ## Sampling and Archiving
//!
//! ```no_run
//! use s7_archiver::{CancelToken, ChangeTracker, CsvStore, Session, Settings, Tag, TagReader, ValueType};
//!
//! # fn main() -> s7_archiver::Result<()> {
//! let settings = Settings::default();
//! let tags = vec![
//!     Tag::new(1, "DB1.DBW0", ValueType::Int16, "level")?,
//!     Tag::new(2, "DB1.DBD2", ValueType::Float, "temperature")?,
//! ];
//! let session = Session::new(settings.session_config("192.168.0.10", 102, 0, 1));
//! let reader = TagReader::new("press", session, tags, settings.reader_config());
//! let tracker = ChangeTracker::new("press", CsvStore::new("archive")?, &settings);
//!
//! let cancel = CancelToken::new();
//! let worker = reader.spawn(tracker, cancel.clone())?;
//! // ...
//! cancel.cancel();
//! let _ = worker.join();
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`], with [`S7Error`] separating transport
//! and framing failures (which drop the session) from controller-reported
//! errors ([`CpuError`]) and checks made before any I/O.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod address;
mod archiver;
mod area;
mod client;
mod codec;
mod command;
mod config;
mod error;
mod fleet;
mod header;
mod multivar;
mod reader;
mod response;
mod transport;
pub mod utils;

// Public re-exports
pub use address::{
    parse as parse_address, type_matches, AddressDescriptor, ElementWidth, Space, WireAddress,
};
pub use archiver::{
    ArchiveRow, ArchiveStore, ArchiveValue, ChangeTracker, CsvStore, MemoryStore, ProcessStats,
    StorageKind, TIMESTAMP_FORMAT,
};
pub use area::{Area, ConnectionType, TransportSize, WordLength};
pub use client::{PlcSession, Session, SessionConfig, SessionState};
pub use codec::{decode_datetime, encode_datetime, from_bcd, to_bcd, Value, ValueType, DATETIME_SIZE};
pub use command::{
    CpuStatusCommand, NegotiateCommand, ReadAreaCommand, ReadClockCommand, SetClockCommand,
    SzlFirstCommand, SzlNextCommand, WriteAreaCommand, DEFAULT_PDU_SIZE, MAX_PDU_SIZE,
    MIN_PDU_SIZE, READ_REPLY_OVERHEAD, READ_REQUEST_SIZE, WRITE_REQUEST_OVERHEAD,
};
pub use config::{ArchiveTable, LogFormat, Settings};
pub use error::{CpuError, Result, S7Error};
pub use fleet::{
    load_plan, plan, read_sheet, ControllerPlan, ControllerRow, Fleet, Plan, SheetKind, SheetRow,
    SkipReason, Skipped, TagRow,
};
pub use header::{
    check_connection_confirm, frame, ConnectionRequest, TpktHeader, CONNECTION_REQUEST_SIZE,
    COTP_DATA_HEADER_SIZE, ISO_HEADER_SIZE, LOCAL_TSAP, TPKT_HEADER_SIZE,
};
pub use multivar::{
    build_read_request, build_write_request, parse_read_reply, parse_write_reply, ItemResult,
    ReadItem, WriteItem, ITEM_SPEC_SIZE, MAX_VARS, MULTI_HEADER_SIZE,
};
pub use reader::{
    CancelToken, CycleOutcome, CycleStats, ReaderConfig, Sample, SampleBatch, SampleSink, Tag,
    TagReader, TagValue, DEFAULT_BACKOFF, DEFAULT_PERIOD, SLEEP_SLICE,
};
pub use response::{
    check_set_clock_reply, check_write_reply, parse_clock_reply, parse_cpu_status,
    parse_negotiate_reply, CpuStatus, ReadAreaResponse, SzlFragment, SzlRecord,
    MIN_READ_REPLY_SIZE, NEGOTIATE_REPLY_SIZE, WRITE_REPLY_SIZE,
};
pub use transport::{
    resolve, TcpTransport, Timeouts, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, ISO_TCP_PORT,
};
