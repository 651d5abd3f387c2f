//! S7 request telegrams.
//!
//! Each request type serializes itself to a complete frame, TPKT and COTP
//! headers included, so byte offsets below are frame offsets.
//!
//! ## Job requests
//! - [`NegotiateCommand`] - PDU size negotiation
//! - [`ReadAreaCommand`] - one bounded area read
//! - [`WriteAreaCommand`] - one bounded area write
//!
//! ## User-data requests
//! - [`ReadClockCommand`] / [`SetClockCommand`] - controller clock
//! - [`CpuStatusCommand`] - run/stop status
//! - [`SzlFirstCommand`] / [`SzlNextCommand`] - system-info list fragments
//!
//! Multi-item requests live in [`multivar`](crate::multivar).
//!
//! # Example
//!
//! ```
//! use s7_archiver::{Area, ReadAreaCommand, WordLength};
//!
//! let cmd = ReadAreaCommand::new(Area::DataBlock, 10, WordLength::Byte, 4 << 3, 2);
//! let bytes = cmd.to_bytes();
//! assert_eq!(bytes.len(), 31);
//! assert_eq!(bytes[27], 0x84);
//! ```

use chrono::NaiveDateTime;

use crate::area::{Area, WordLength};
use crate::codec::encode_datetime;
use crate::error::{Result, S7Error};
use crate::header::frame;

/// S7 protocol identifier.
pub(crate) const PROTOCOL_ID: u8 = 0x32;
/// Job request ROSCTR.
pub(crate) const ROSCTR_JOB: u8 = 0x01;
/// User-data ROSCTR.
const ROSCTR_USERDATA: u8 = 0x07;
/// Read variable function.
pub(crate) const FN_READ_VAR: u8 = 0x04;
/// Write variable function.
pub(crate) const FN_WRITE_VAR: u8 = 0x05;
/// Setup communication function.
const FN_SETUP: u8 = 0xF0;
/// PDU reference used by read/write jobs.
pub(crate) const PDU_REF_RW: u16 = 0x0500;

/// Smallest PDU size that may be requested.
pub const MIN_PDU_SIZE: u16 = 240;
/// Largest PDU size that may be requested.
pub const MAX_PDU_SIZE: u16 = 960;
/// PDU size requested unless configured otherwise.
pub const DEFAULT_PDU_SIZE: u16 = 480;

/// Bytes of a read reply that are not data.
pub const READ_REPLY_OVERHEAD: usize = 18;
/// Bytes of a write request that are not data.
pub const WRITE_REQUEST_OVERHEAD: usize = 35;
/// Size of a read area request.
pub const READ_REQUEST_SIZE: usize = 31;

/// Builds the 10-byte job header that follows the ISO header.
pub(crate) fn job_header(pdu_ref: u16, param_len: u16, data_len: u16) -> [u8; 10] {
    let [rh, rl] = pdu_ref.to_be_bytes();
    let [ph, pl] = param_len.to_be_bytes();
    let [dh, dl] = data_len.to_be_bytes();
    [PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00, rh, rl, ph, pl, dh, dl]
}

/// Builds a 12-byte variable specification.
pub(crate) fn var_spec(
    word_length: WordLength,
    amount: u16,
    area: Area,
    db_number: u16,
    address: u32,
) -> [u8; 12] {
    let [ah, al] = amount.to_be_bytes();
    let db = if area == Area::DataBlock { db_number } else { 0 };
    let [dh, dl] = db.to_be_bytes();
    let [_, a2, a1, a0] = address.to_be_bytes();
    [
        0x12, // variable specification
        0x0A, // length of the rest
        0x10, // syntax id: S7ANY
        word_length.code(),
        ah,
        al,
        dh,
        dl,
        area.code(),
        a2,
        a1,
        a0,
    ]
}

/// PDU size negotiation request (25 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateCommand {
    pdu_size: u16,
}

impl NegotiateCommand {
    /// Creates a negotiation request.
    ///
    /// # Errors
    ///
    /// Returns an error if `pdu_size` is outside 240-960.
    pub fn new(pdu_size: u16) -> Result<Self> {
        if !(MIN_PDU_SIZE..=MAX_PDU_SIZE).contains(&pdu_size) {
            return Err(S7Error::invalid_parameter(
                "pdu_size",
                format!("must be {MIN_PDU_SIZE}-{MAX_PDU_SIZE}"),
            ));
        }
        Ok(Self { pdu_size })
    }

    /// Requested PDU size.
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(18);
        payload.extend_from_slice(&job_header(0x0400, 0x0008, 0x0000));
        payload.extend_from_slice(&[FN_SETUP, 0x00, 0x00, 0x01, 0x00, 0x01]);
        payload.extend_from_slice(&self.pdu_size.to_be_bytes());
        frame(&payload)
    }
}

/// One bounded area read (31 bytes).
///
/// `address` is already in wire form: a bit address for byte-aligned word
/// lengths, an element index for bit, counter and timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAreaCommand {
    area: Area,
    db_number: u16,
    word_length: WordLength,
    address: u32,
    amount: u16,
}

impl ReadAreaCommand {
    /// Creates a read request for `amount` elements.
    pub fn new(
        area: Area,
        db_number: u16,
        word_length: WordLength,
        address: u32,
        amount: u16,
    ) -> Self {
        Self {
            area,
            db_number,
            word_length,
            address,
            amount,
        }
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(READ_REQUEST_SIZE - 7);
        payload.extend_from_slice(&job_header(PDU_REF_RW, 0x000E, 0x0000));
        payload.extend_from_slice(&[FN_READ_VAR, 0x01]);
        payload.extend_from_slice(&var_spec(
            self.word_length,
            self.amount,
            self.area,
            self.db_number,
            self.address,
        ));
        frame(&payload)
    }
}

/// One bounded area write (35 bytes + data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAreaCommand {
    area: Area,
    db_number: u16,
    word_length: WordLength,
    address: u32,
    amount: u16,
    data: Vec<u8>,
}

impl WriteAreaCommand {
    /// Creates a write request. `data` holds `amount` elements.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is empty.
    pub fn new(
        area: Area,
        db_number: u16,
        word_length: WordLength,
        address: u32,
        amount: u16,
        data: Vec<u8>,
    ) -> Result<Self> {
        if data.is_empty() {
            return Err(S7Error::invalid_parameter("data", "must not be empty"));
        }
        Ok(Self {
            area,
            db_number,
            word_length,
            address,
            amount,
            data,
        })
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Bounded by the PDU size, so it fits in u16.
        let size = self.data.len() as u16;
        let mut payload = Vec::with_capacity(WRITE_REQUEST_OVERHEAD - 7 + self.data.len());
        payload.extend_from_slice(&job_header(PDU_REF_RW, 0x000E, size + 4));
        payload.extend_from_slice(&[FN_WRITE_VAR, 0x01]);
        payload.extend_from_slice(&var_spec(
            self.word_length,
            self.amount,
            self.area,
            self.db_number,
            self.address,
        ));
        let bits = if self.word_length.is_element_addressed() {
            size
        } else {
            size << 3
        };
        payload.push(0x00);
        payload.push(self.word_length.write_transport_size().code());
        payload.extend_from_slice(&bits.to_be_bytes());
        payload.extend_from_slice(&self.data);
        frame(&payload)
    }
}

/// Builds a user-data payload from its fixed parameter and data blocks.
fn userdata(pdu_ref: [u8; 2], params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(10 + params.len() + data.len());
    payload.extend_from_slice(&[PROTOCOL_ID, ROSCTR_USERDATA, 0x00, 0x00]);
    payload.extend_from_slice(&pdu_ref);
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.extend_from_slice(params);
    payload.extend_from_slice(data);
    frame(&payload)
}

/// Read controller clock (29 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadClockCommand;

impl ReadClockCommand {
    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        userdata(
            [0x38, 0x00],
            &[0x00, 0x01, 0x12, 0x04, 0x11, 0x47, 0x01, 0x00],
            &[0x0A, 0x00, 0x00, 0x00],
        )
    }
}

/// Set controller clock (39 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetClockCommand {
    datetime: NaiveDateTime,
}

impl SetClockCommand {
    /// Creates a request setting the clock to `datetime`.
    pub fn new(datetime: NaiveDateTime) -> Self {
        Self { datetime }
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0xFF, 0x09, 0x00, 0x0A, 0x00, 0x19];
        data.extend_from_slice(&encode_datetime(&self.datetime));
        userdata(
            [0x89, 0x03],
            &[0x00, 0x01, 0x12, 0x04, 0x11, 0x47, 0x02, 0x00],
            &data,
        )
    }
}

/// Read CPU run/stop status (33 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStatusCommand;

impl CpuStatusCommand {
    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        userdata(
            [0x2C, 0x00],
            &[0x00, 0x01, 0x12, 0x04, 0x11, 0x44, 0x01, 0x00],
            &[0xFF, 0x09, 0x00, 0x04, 0x04, 0x24, 0x00, 0x00],
        )
    }
}

/// First request of a system-info list read (33 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SzlFirstCommand {
    id: u16,
    index: u16,
}

impl SzlFirstCommand {
    /// Creates a request for list `id`, record `index`.
    pub fn new(id: u16, index: u16) -> Self {
        Self { id, index }
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let [ih, il] = self.id.to_be_bytes();
        let [xh, xl] = self.index.to_be_bytes();
        userdata(
            [0x05, 0x00],
            &[0x00, 0x01, 0x12, 0x04, 0x11, 0x44, 0x01, 0x00],
            &[0xFF, 0x09, 0x00, 0x04, ih, il, xh, xl],
        )
    }
}

/// Follow-up request of a system-info list read (33 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SzlNextCommand {
    sequence: u8,
}

impl SzlNextCommand {
    /// Creates a request echoing the sequence number of the last fragment.
    pub fn new(sequence: u8) -> Self {
        Self { sequence }
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        userdata(
            [0x06, 0x00],
            &[
                0x00, 0x01, 0x12, 0x08, 0x12, 0x44, 0x01, self.sequence, 0x00, 0x00, 0x00, 0x00,
            ],
            &[0x0A, 0x00, 0x00, 0x00],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_negotiate_serialization() {
        let bytes = NegotiateCommand::new(480).unwrap().to_bytes();
        assert_eq!(
            hex::encode(bytes),
            "0300001902f08032010000040000080000f0000001000101e0"
        );
    }

    #[test]
    fn test_negotiate_range() {
        assert!(NegotiateCommand::new(239).is_err());
        assert!(NegotiateCommand::new(961).is_err());
        assert!(NegotiateCommand::new(240).is_ok());
        assert!(NegotiateCommand::new(960).is_ok());
    }

    #[test]
    fn test_read_area_serialization() {
        let bytes = ReadAreaCommand::new(Area::DataBlock, 10, WordLength::Byte, 4 << 3, 2).to_bytes();
        assert_eq!(
            hex::encode(bytes),
            "0300001f02f080320100000500000e00000401120a10020002000a84000020"
        );
    }

    #[test]
    fn test_read_area_db_number_only_for_db() {
        let bytes = ReadAreaCommand::new(Area::Marker, 10, WordLength::Bit, 9, 1).to_bytes();
        assert_eq!(&bytes[25..27], &[0x00, 0x00]);
        assert_eq!(bytes[22], 0x01);
        assert_eq!(&bytes[28..31], &[0x00, 0x00, 0x09]);
    }

    #[test]
    fn test_write_area_serialization() {
        let cmd = WriteAreaCommand::new(
            Area::Marker,
            0,
            WordLength::Byte,
            2 << 3,
            2,
            vec![0x12, 0x34],
        )
        .unwrap();
        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), 37);
        assert_eq!(&bytes[2..4], &[0x00, 0x25]);
        assert_eq!(&bytes[15..17], &[0x00, 0x06]);
        assert_eq!(bytes[17], FN_WRITE_VAR);
        assert_eq!(bytes[32], 0x04);
        assert_eq!(&bytes[33..35], &[0x00, 0x10]);
        assert_eq!(&bytes[35..], &[0x12, 0x34]);
    }

    #[test]
    fn test_write_area_timer_length_in_bytes() {
        let cmd =
            WriteAreaCommand::new(Area::Timer, 0, WordLength::Timer, 3, 1, vec![0, 5]).unwrap();
        let bytes = cmd.to_bytes();
        assert_eq!(bytes[22], 0x1D);
        assert_eq!(bytes[32], 0x09);
        assert_eq!(&bytes[33..35], &[0x00, 0x02]);
    }

    #[test]
    fn test_write_area_empty() {
        assert!(WriteAreaCommand::new(Area::Marker, 0, WordLength::Byte, 0, 0, vec![]).is_err());
    }

    #[test]
    fn test_clock_telegrams() {
        assert_eq!(
            hex::encode(ReadClockCommand.to_bytes()),
            "0300001d02f0803207000038000008000400011204114701000a000000"
        );
        let dt = NaiveDate::from_ymd_opt(2013, 12, 6)
            .unwrap()
            .and_hms_opt(17, 37, 13)
            .unwrap();
        let bytes = SetClockCommand::new(dt).to_bytes();
        assert_eq!(bytes.len(), 39);
        assert_eq!(
            hex::encode(&bytes[..31]),
            "0300002702f0803207000089030008000e0001120411470200ff09000a0019"
        );
        assert_eq!(&bytes[31..37], &[0x13, 0x12, 0x06, 0x17, 0x37, 0x13]);
    }

    #[test]
    fn test_status_and_szl_telegrams() {
        assert_eq!(
            hex::encode(CpuStatusCommand.to_bytes()),
            "0300002102f080320700002c00000800080001120411440100ff09000404240000"
        );
        let first = SzlFirstCommand::new(0x0011, 0x0001).to_bytes();
        assert_eq!(first.len(), 33);
        assert_eq!(&first[11..13], &[0x05, 0x00]);
        assert_eq!(&first[29..33], &[0x00, 0x11, 0x00, 0x01]);

        let next = SzlNextCommand::new(0x07).to_bytes();
        assert_eq!(next.len(), 33);
        assert_eq!(next[24], 0x07);
        assert_eq!(&next[13..17], &[0x00, 0x0C, 0x00, 0x04]);
    }
}
