//! TPKT and COTP framing.
//!
//! Every telegram travels inside two headers:
//!
//! | Bytes | Layer | Content |
//! |-------|-------|---------|
//! | 0 | TPKT | version, always `0x03` |
//! | 1 | TPKT | reserved, `0x00` |
//! | 2-3 | TPKT | total length, big-endian, headers included |
//! | 4 | COTP | header length |
//! | 5 | COTP | PDU type (`0xF0` data, `0xE0` connect request, `0xD0` connect confirm) |
//! | 6 | COTP | `0x80` end of transmission (data frames) |
//!
//! Data frames therefore start their S7 payload at [`ISO_HEADER_SIZE`].
//!
//! # Example
//!
//! ```
//! use s7_archiver::{frame, TpktHeader, ISO_HEADER_SIZE};
//!
//! let bytes = frame(&[0x32, 0x01]);
//! assert_eq!(bytes.len(), ISO_HEADER_SIZE + 2);
//! let header = TpktHeader::from_bytes(&bytes).unwrap();
//! assert_eq!(header.length as usize, bytes.len());
//! ```

use crate::error::{Result, S7Error};

/// TPKT header size in bytes.
pub const TPKT_HEADER_SIZE: usize = 4;

/// COTP data header size in bytes.
pub const COTP_DATA_HEADER_SIZE: usize = 3;

/// Combined TPKT + COTP data header size.
pub const ISO_HEADER_SIZE: usize = TPKT_HEADER_SIZE + COTP_DATA_HEADER_SIZE;

/// Size of the connection request and of its confirm.
pub const CONNECTION_REQUEST_SIZE: usize = 22;

/// Local TSAP used for every connection.
pub const LOCAL_TSAP: u16 = 0x0100;

const TPKT_VERSION: u8 = 0x03;
const COTP_DATA: u8 = 0xF0;
const COTP_EOT: u8 = 0x80;
const COTP_CONNECT_REQUEST: u8 = 0xE0;
const COTP_CONNECT_CONFIRM: u8 = 0xD0;

/// The 4-byte outer frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpktHeader {
    /// Total frame length, this header included.
    pub length: u16,
}

impl TpktHeader {
    /// Creates a header announcing `length` bytes.
    pub fn new(length: u16) -> Self {
        Self { length }
    }

    /// Serializes the header.
    pub fn to_bytes(self) -> [u8; TPKT_HEADER_SIZE] {
        let [hi, lo] = self.length.to_be_bytes();
        [TPKT_VERSION, 0x00, hi, lo]
    }

    /// Parses the first four bytes of a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than four bytes are given or the version is not 3.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < TPKT_HEADER_SIZE {
            return Err(S7Error::invalid_response(format!(
                "TPKT header too short: expected {} bytes, got {}",
                TPKT_HEADER_SIZE,
                data.len()
            )));
        }
        if data[0] != TPKT_VERSION {
            return Err(S7Error::invalid_response(format!(
                "unexpected TPKT version 0x{:02X}",
                data[0]
            )));
        }
        Ok(Self {
            length: u16::from_be_bytes([data[2], data[3]]),
        })
    }
}

/// Wraps an S7 payload into a TPKT + COTP data frame.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let total = ISO_HEADER_SIZE + payload.len();
    let mut bytes = Vec::with_capacity(total);
    // Telegram sizes are bounded by the PDU (at most 960 + headers).
    bytes.extend_from_slice(&TpktHeader::new(total as u16).to_bytes());
    bytes.extend_from_slice(&[0x02, COTP_DATA, COTP_EOT]);
    bytes.extend_from_slice(payload);
    bytes
}

/// The COTP connection request sent right after the TCP connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Local transport service access point.
    pub local_tsap: u16,
    /// Remote transport service access point.
    pub remote_tsap: u16,
}

impl ConnectionRequest {
    /// Creates a request for the given remote TSAP.
    pub fn new(remote_tsap: u16) -> Self {
        Self {
            local_tsap: LOCAL_TSAP,
            remote_tsap,
        }
    }

    /// Serializes the request.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::ConnectionRequest;
    ///
    /// let bytes = ConnectionRequest::new(0x0301).to_bytes();
    /// assert_eq!(&bytes[..6], &[0x03, 0x00, 0x00, 0x16, 0x11, 0xE0]);
    /// assert_eq!(&bytes[20..], &[0x03, 0x01]);
    /// ```
    pub fn to_bytes(self) -> [u8; CONNECTION_REQUEST_SIZE] {
        let [lh, ll] = self.local_tsap.to_be_bytes();
        let [rh, rl] = self.remote_tsap.to_be_bytes();
        [
            TPKT_VERSION,
            0x00,
            0x00,
            CONNECTION_REQUEST_SIZE as u8,
            0x11, // COTP header length
            COTP_CONNECT_REQUEST,
            0x00,
            0x00, // destination reference
            0x00,
            0x01, // source reference
            0x00, // class 0
            0xC0, // TPDU size parameter
            0x01,
            0x0A,
            0xC1, // source TSAP
            0x02,
            lh,
            ll,
            0xC2, // destination TSAP
            0x02,
            rh,
            rl,
        ]
    }
}

/// Validates a connection confirm frame.
///
/// # Errors
///
/// Returns [`S7Error::IsoConnect`] unless the frame is exactly 22 bytes
/// with the confirm PDU type.
pub fn check_connection_confirm(reply: &[u8]) -> Result<()> {
    if reply.len() != CONNECTION_REQUEST_SIZE {
        return Err(S7Error::IsoConnect {
            reason: format!(
                "confirm length {} (expected {})",
                reply.len(),
                CONNECTION_REQUEST_SIZE
            ),
        });
    }
    if reply[5] != COTP_CONNECT_CONFIRM {
        return Err(S7Error::IsoConnect {
            reason: format!("unexpected COTP PDU type 0x{:02X}", reply[5]),
        });
    }
    Ok(())
}
