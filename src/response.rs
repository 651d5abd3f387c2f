//! S7 reply validation.
//!
//! Every parser takes the complete frame returned by the session, TPKT and
//! COTP headers included, so offsets match the table below.
//!
//! | Reply | Size | Status | Payload |
//! |-------|------|--------|---------|
//! | negotiate | exactly 27 | bytes 17-18 zero | PDU size at 25 |
//! | read area | at least 25 | byte 21 = `0xFF` | data from 25 |
//! | write area | exactly 22 | byte 21 = `0xFF` | none |
//! | read clock | over 30 | word 27 zero, byte 29 = `0xFF` | date-time at 35 |
//! | set clock | over 30 | word 27 zero | none |
//! | CPU status | over 44 | word 27 zero, byte 29 = `0xFF` | status byte at 44 |
//! | SZL fragment | over 32 | word 27 zero, byte 29 = `0xFF` | see [`SzlFragment`] |
//!
//! # Example
//!
//! ```
//! use s7_archiver::{CpuError, ReadAreaResponse, S7Error};
//!
//! let mut reply = vec![0u8; 27];
//! reply[21] = 0xFF;
//! reply[25..27].copy_from_slice(&[0x12, 0x34]);
//! let response = ReadAreaResponse::from_bytes(&reply, 2).unwrap();
//! assert_eq!(response.data, vec![0x12, 0x34]);
//!
//! reply[21] = 0x05;
//! let err = ReadAreaResponse::from_bytes(&reply, 2).unwrap_err();
//! assert!(matches!(err, S7Error::Cpu(CpuError::AddressOutOfRange)));
//! ```

use chrono::NaiveDateTime;

use crate::codec::{decode_datetime, DATETIME_SIZE};
use crate::error::{CpuError, Result, S7Error};
use crate::utils::word_at;

/// Size of a negotiation reply.
pub const NEGOTIATE_REPLY_SIZE: usize = 27;
/// Minimum size of a read area reply.
pub const MIN_READ_REPLY_SIZE: usize = 25;
/// Size of a write area reply.
pub const WRITE_REPLY_SIZE: usize = 22;

const ITEM_OK: u8 = 0xFF;
const USERDATA_MIN_SIZE: usize = 30;
const CPU_STATUS_OFFSET: usize = 44;
const CLOCK_OFFSET: usize = 35;

/// Extracts the negotiated PDU size.
///
/// A peer answering with more than was requested is held to the requested
/// size.
///
/// # Errors
///
/// Returns [`S7Error::NegotiatePdu`] for a malformed reply or a zero size.
pub fn parse_negotiate_reply(reply: &[u8], requested: u16) -> Result<u16> {
    if reply.len() != NEGOTIATE_REPLY_SIZE {
        return Err(S7Error::NegotiatePdu {
            reason: format!(
                "reply length {} (expected {})",
                reply.len(),
                NEGOTIATE_REPLY_SIZE
            ),
        });
    }
    if reply[17] != 0 || reply[18] != 0 {
        return Err(S7Error::NegotiatePdu {
            reason: format!("error class 0x{:02X}{:02X}", reply[17], reply[18]),
        });
    }
    match word_at(reply, 25) {
        0 => Err(S7Error::NegotiatePdu {
            reason: "peer returned PDU size 0".to_string(),
        }),
        size => Ok(size.min(requested)),
    }
}

/// Validated reply to a read area request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAreaResponse {
    /// Bytes read, exactly as many as requested.
    pub data: Vec<u8>,
}

impl ReadAreaResponse {
    /// Validates a read reply expected to carry `expected` data bytes.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::Cpu`] when the item status is not success,
    /// [`S7Error::InvalidResponse`] when the reply is too short.
    pub fn from_bytes(reply: &[u8], expected: usize) -> Result<Self> {
        if reply.len() < MIN_READ_REPLY_SIZE {
            return Err(S7Error::invalid_response(format!(
                "read reply too short: expected at least {} bytes, got {}",
                MIN_READ_REPLY_SIZE,
                reply.len()
            )));
        }
        if let Some(err) = CpuError::from_item_status(reply[21]) {
            return Err(err.into());
        }
        let end = MIN_READ_REPLY_SIZE + expected;
        if reply.len() < end {
            return Err(S7Error::invalid_response(format!(
                "read reply carries {} data bytes, expected {}",
                reply.len() - MIN_READ_REPLY_SIZE,
                expected
            )));
        }
        Ok(Self {
            data: reply[MIN_READ_REPLY_SIZE..end].to_vec(),
        })
    }
}

/// Validates a write area reply.
///
/// # Errors
///
/// Returns [`S7Error::InvalidResponse`] for a wrong size and [`S7Error::Cpu`]
/// for a refused item.
pub fn check_write_reply(reply: &[u8]) -> Result<()> {
    if reply.len() != WRITE_REPLY_SIZE {
        return Err(S7Error::invalid_response(format!(
            "write reply length {} (expected {})",
            reply.len(),
            WRITE_REPLY_SIZE
        )));
    }
    match CpuError::from_item_status(reply[21]) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Checks the common user-data reply header.
fn check_userdata(reply: &[u8], min_len: usize, needs_item_ok: bool) -> Result<()> {
    if reply.len() <= min_len {
        return Err(S7Error::InvalidPdu {
            length: reply.len(),
        });
    }
    if let Some(err) = CpuError::from_status(word_at(reply, 27)) {
        return Err(err.into());
    }
    if needs_item_ok {
        if let Some(err) = CpuError::from_item_status(reply[29]) {
            return Err(err.into());
        }
    }
    Ok(())
}

/// Extracts the controller clock from a read clock reply.
pub fn parse_clock_reply(reply: &[u8]) -> Result<NaiveDateTime> {
    check_userdata(reply, USERDATA_MIN_SIZE, true)?;
    if reply.len() < CLOCK_OFFSET + DATETIME_SIZE {
        return Err(S7Error::invalid_response("clock reply too short"));
    }
    Ok(decode_datetime(
        &reply[CLOCK_OFFSET..CLOCK_OFFSET + DATETIME_SIZE],
    ))
}

/// Validates a set clock reply.
pub fn check_set_clock_reply(reply: &[u8]) -> Result<()> {
    check_userdata(reply, USERDATA_MIN_SIZE, false)
}

/// Run state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuStatus {
    /// Program running.
    Run,
    /// Program stopped.
    Stop,
    /// State not reported.
    Unknown,
}

impl CpuStatus {
    /// Maps the status byte of a CPU status reply.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::CpuStatus;
    ///
    /// assert_eq!(CpuStatus::from_code(0x08), CpuStatus::Run);
    /// assert_eq!(CpuStatus::from_code(0x04), CpuStatus::Stop);
    /// assert_eq!(CpuStatus::from_code(0x00), CpuStatus::Unknown);
    /// assert_eq!(CpuStatus::from_code(0x03), CpuStatus::Stop);
    /// ```
    pub fn from_code(code: u8) -> Self {
        match code {
            0x08 => CpuStatus::Run,
            0x00 => CpuStatus::Unknown,
            _ => CpuStatus::Stop,
        }
    }
}

impl std::fmt::Display for CpuStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuStatus::Run => write!(f, "RUN"),
            CpuStatus::Stop => write!(f, "STOP"),
            CpuStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Extracts the run state from a CPU status reply.
pub fn parse_cpu_status(reply: &[u8]) -> Result<CpuStatus> {
    check_userdata(reply, CPU_STATUS_OFFSET, true)?;
    Ok(CpuStatus::from_code(reply[CPU_STATUS_OFFSET]))
}

/// One fragment of a system-info list reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SzlFragment {
    /// True when this is the last fragment.
    pub done: bool,
    /// Sequence number to echo in the next request.
    pub sequence: u8,
    /// Record length, first fragment only.
    pub lenthdr: u16,
    /// Record count, first fragment only.
    pub n_dr: u16,
    /// Record bytes carried by this fragment.
    pub data: Vec<u8>,
}

impl SzlFragment {
    /// Parses one fragment. The first fragment carries an 8-byte list
    /// header in front of the records.
    ///
    /// # Errors
    ///
    /// Returns an error for a short reply, a refused request, or a data
    /// length that runs past the end of the frame.
    pub fn from_bytes(reply: &[u8], first: bool) -> Result<Self> {
        check_userdata(reply, 32, true)?;
        let length = usize::from(word_at(reply, 31));
        let (lenthdr, n_dr, start, size) = if first {
            if reply.len() < 41 || length < 8 {
                return Err(S7Error::invalid_response("SZL header truncated"));
            }
            (word_at(reply, 37), word_at(reply, 39), 41, length - 8)
        } else {
            (0, 0, 37, length)
        };
        let end = start + size;
        if reply.len() < end {
            return Err(S7Error::invalid_response(format!(
                "SZL fragment announces {} bytes, frame holds {}",
                size,
                reply.len().saturating_sub(start)
            )));
        }
        Ok(Self {
            done: reply[26] == 0x00,
            sequence: reply[24],
            lenthdr,
            n_dr,
            data: reply[start..end].to_vec(),
        })
    }
}

/// A complete system-info list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SzlRecord {
    /// Length of one record in bytes.
    pub lenthdr: u16,
    /// Number of records.
    pub n_dr: u16,
    /// Concatenated record bytes.
    pub data: Vec<u8>,
}
