//! Multi-variable batches: up to [`MAX_VARS`] independently addressed items
//! in one exchange.
//!
//! Every item in a reply carries its own status, so one exchange can partly
//! succeed. Results are returned per item in request order.
//!
//! ## Read reply layout (per item, from offset 21)
//!
//! | Bytes | Content |
//! |-------|---------|
//! | 1 | return code, `0xFF` = success |
//! | 1 | transport size |
//! | 2 | data length, in bits unless the transport size is bit, real or octet |
//! | n | data, padded to even length when another item follows |
//!
//! A failed item occupies only its 4-byte header.
//!
//! # Example
//!
//! ```
//! use s7_archiver::{build_read_request, Area, ReadItem, WordLength};
//!
//! let items = [
//!     ReadItem::new(Area::DataBlock, 1, WordLength::Int, 0, 1),
//!     ReadItem::new(Area::Marker, 0, WordLength::Bit, 8 * 2 + 3, 1),
//! ];
//! let request = build_read_request(&items, 480).unwrap();
//! assert_eq!(request.len(), 19 + 2 * 12);
//! assert_eq!(request[18], 2);
//! ```

use crate::address::WireAddress;
use crate::area::{Area, TransportSize, WordLength};
use crate::command::{job_header, var_spec, FN_READ_VAR, FN_WRITE_VAR, PDU_REF_RW};
use crate::error::{CpuError, Result, S7Error};
use crate::header::{frame, ISO_HEADER_SIZE};
use crate::utils::{padded_len, word_at};

/// Maximum number of items in one exchange.
pub const MAX_VARS: usize = 20;

/// Size of the multi-item request header, frame headers included.
pub const MULTI_HEADER_SIZE: usize = 19;

/// Size of one variable specification.
pub const ITEM_SPEC_SIZE: usize = 12;

/// Offset of the first item in a multi-item reply.
const REPLY_ITEMS_OFFSET: usize = 21;

/// Outcome of one item: its data on success, the controller's reason otherwise.
pub type ItemResult = std::result::Result<Vec<u8>, CpuError>;

/// One item of a multi-variable read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadItem {
    /// Memory area.
    pub area: Area,
    /// Data block number, ignored outside data blocks.
    pub db_number: u16,
    /// Element width.
    pub word_length: WordLength,
    /// Bit address for bit items, byte offset or element number otherwise.
    pub start: u32,
    /// Number of elements.
    pub amount: u16,
}

impl ReadItem {
    /// Creates a read item.
    pub fn new(
        area: Area,
        db_number: u16,
        word_length: WordLength,
        start: u32,
        amount: u16,
    ) -> Self {
        Self {
            area,
            db_number,
            word_length,
            start,
            amount,
        }
    }

    /// Creates a single-element read item for a translated address.
    pub fn from_wire(wire: &WireAddress) -> Self {
        Self::new(wire.area, wire.db_number, wire.word_length, wire.start, 1)
    }

    /// Number of data bytes the reply carries for this item.
    pub fn data_size(&self) -> usize {
        usize::from(self.amount) * self.word_length.size()
    }

    fn spec(&self) -> [u8; ITEM_SPEC_SIZE] {
        var_spec(
            self.word_length,
            self.amount,
            self.area,
            self.db_number,
            wire_address(self.word_length, self.start),
        )
    }
}

/// One item of a multi-variable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteItem {
    /// Memory area.
    pub area: Area,
    /// Data block number.
    pub db_number: u16,
    /// Element width.
    pub word_length: WordLength,
    /// Bit address for bit items, byte offset or element number otherwise.
    pub start: u32,
    /// Number of elements.
    pub amount: u16,
    /// Encoded data.
    pub data: Vec<u8>,
}

impl WriteItem {
    /// Creates a write item for a translated address. The element count is
    /// derived from the data length.
    pub fn from_wire(wire: &WireAddress, data: Vec<u8>) -> Self {
        let amount = match wire.word_length {
            WordLength::Bit => 1,
            wl => (data.len() / wl.size()).max(1) as u16,
        };
        Self {
            area: wire.area,
            db_number: wire.db_number,
            word_length: wire.word_length,
            start: wire.start,
            amount,
            data,
        }
    }

    fn spec(&self) -> [u8; ITEM_SPEC_SIZE] {
        let [_, a2, a1, a0] = wire_address(self.word_length, self.start).to_be_bytes();
        let [ah, al] = self.amount.to_be_bytes();
        let [dh, dl] = self.db_number.to_be_bytes();
        // Write items carry the block number whatever the area.
        [
            0x12,
            0x0A,
            0x10,
            self.word_length.code(),
            ah,
            al,
            dh,
            dl,
            self.area.code(),
            a2,
            a1,
            a0,
        ]
    }
}

/// Byte-aligned widths address in bits on the wire.
fn wire_address(word_length: WordLength, start: u32) -> u32 {
    if word_length.is_element_addressed() {
        start
    } else {
        start << 3
    }
}

fn check_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(S7Error::NoItems);
    }
    if count > MAX_VARS {
        return Err(S7Error::TooManyItems {
            count,
            max: MAX_VARS,
        });
    }
    Ok(())
}

/// Size of the S7 part of the reply a read of `items` produces.
fn read_reply_size(items: &[ReadItem]) -> usize {
    let data: usize = items.iter().map(|i| 4 + padded_len(i.data_size())).sum();
    REPLY_ITEMS_OFFSET - ISO_HEADER_SIZE + data
}

/// Builds a multi-variable read request.
///
/// # Errors
///
/// - [`S7Error::NoItems`] / [`S7Error::TooManyItems`] for an empty or
///   oversized item list
/// - [`S7Error::SizeOverPdu`] when the request or its reply would not fit
///   into `pdu_size`
pub fn build_read_request(items: &[ReadItem], pdu_size: usize) -> Result<Vec<u8>> {
    check_count(items.len())?;
    let size = MULTI_HEADER_SIZE + items.len() * ITEM_SPEC_SIZE;
    if size > pdu_size {
        return Err(S7Error::SizeOverPdu {
            size,
            pdu: pdu_size,
        });
    }
    let reply = read_reply_size(items);
    if reply > pdu_size {
        return Err(S7Error::SizeOverPdu {
            size: reply,
            pdu: pdu_size,
        });
    }

    let param_len = (items.len() * ITEM_SPEC_SIZE + 2) as u16;
    let mut payload = Vec::with_capacity(size - ISO_HEADER_SIZE);
    payload.extend_from_slice(&job_header(PDU_REF_RW, param_len, 0));
    payload.push(FN_READ_VAR);
    payload.push(items.len() as u8);
    for item in items {
        payload.extend_from_slice(&item.spec());
    }
    Ok(frame(&payload))
}

/// Splits a multi-variable read reply into per-item results.
///
/// # Errors
///
/// Returns [`S7Error::Cpu`] for a refused exchange, and
/// [`S7Error::InvalidResponse`] for a short reply or an item count different
/// from `count`. Per-item failures are not errors here; they are returned
/// in the item's slot.
pub fn parse_read_reply(reply: &[u8], count: usize) -> Result<Vec<ItemResult>> {
    if reply.len() < 22 {
        return Err(S7Error::invalid_response(format!(
            "multi-read reply too short: {} bytes",
            reply.len()
        )));
    }
    if let Some(err) = CpuError::from_status(word_at(reply, 17)) {
        return Err(err.into());
    }
    if usize::from(reply[20]) != count {
        return Err(S7Error::invalid_response(format!(
            "multi-read reply carries {} items, expected {}",
            reply[20], count
        )));
    }

    let mut results = Vec::with_capacity(count);
    let mut offset = REPLY_ITEMS_OFFSET;
    for index in 0..count {
        let header = reply.get(offset..offset + 4).ok_or_else(|| {
            S7Error::invalid_response(format!("multi-read reply truncated at item {index}"))
        })?;
        if let Some(err) = CpuError::from_item_status(header[0]) {
            results.push(Err(err));
            offset += 4;
            continue;
        }
        let mut size = usize::from(word_at(header, 2));
        if TransportSize::length_in_bits(header[1]) {
            size >>= 3;
        }
        let data = reply.get(offset + 4..offset + 4 + size).ok_or_else(|| {
            S7Error::invalid_response(format!("multi-read item {index} runs past the reply"))
        })?;
        results.push(Ok(data.to_vec()));
        offset += 4 + padded_len(size);
    }
    Ok(results)
}

/// Builds a multi-variable write request.
///
/// # Errors
///
/// Same preconditions as [`build_read_request`], plus
/// [`S7Error::InvalidParameter`] for an item without data.
pub fn build_write_request(items: &[WriteItem], pdu_size: usize) -> Result<Vec<u8>> {
    check_count(items.len())?;
    if let Some(index) = items.iter().position(|i| i.data.is_empty()) {
        return Err(S7Error::invalid_parameter(
            "items",
            format!("item {index} has no data"),
        ));
    }

    let params_len = items.len() * ITEM_SPEC_SIZE + 2;
    let data_len: usize = items.iter().map(|i| 4 + padded_len(i.data.len())).sum();
    let size = MULTI_HEADER_SIZE + items.len() * ITEM_SPEC_SIZE + data_len;
    if size > pdu_size {
        return Err(S7Error::SizeOverPdu {
            size,
            pdu: pdu_size,
        });
    }

    let mut payload = Vec::with_capacity(size - ISO_HEADER_SIZE);
    payload.extend_from_slice(&job_header(
        PDU_REF_RW,
        params_len as u16,
        data_len as u16,
    ));
    payload.push(FN_WRITE_VAR);
    payload.push(items.len() as u8);
    for item in items {
        payload.extend_from_slice(&item.spec());
    }
    for item in items {
        let ts = item.word_length.write_transport_size();
        let len = item.data.len() as u16;
        let len = if matches!(ts, TransportSize::Octet | TransportSize::Bit) {
            len
        } else {
            len << 3
        };
        payload.push(0x00);
        payload.push(ts.code());
        payload.extend_from_slice(&len.to_be_bytes());
        payload.extend_from_slice(&item.data);
        if item.data.len() % 2 == 1 {
            payload.push(0x00);
        }
    }
    Ok(frame(&payload))
}

/// Splits a multi-variable write reply into per-item outcomes.
///
/// # Errors
///
/// Returns [`S7Error::Cpu`] for a refused exchange and
/// [`S7Error::InvalidResponse`] for a short reply.
pub fn parse_write_reply(
    reply: &[u8],
    count: usize,
) -> Result<Vec<std::result::Result<(), CpuError>>> {
    if reply.len() < REPLY_ITEMS_OFFSET + count {
        return Err(S7Error::invalid_response(format!(
            "multi-write reply too short: {} bytes for {} items",
            reply.len(),
            count
        )));
    }
    if let Some(err) = CpuError::from_status(word_at(reply, 17)) {
        return Err(err.into());
    }
    Ok(reply[REPLY_ITEMS_OFFSET..REPLY_ITEMS_OFFSET + count]
        .iter()
        .map(|&code| match CpuError::from_item_status(code) {
            Some(err) => Err(err),
            None => Ok(()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(items: &[&[u8]]) -> Vec<u8> {
        let mut bytes = vec![0u8; REPLY_ITEMS_OFFSET];
        bytes[0] = 0x03;
        bytes[20] = items.len() as u8;
        for item in items {
            bytes.extend_from_slice(item);
        }
        let len = bytes.len() as u16;
        bytes[2..4].copy_from_slice(&len.to_be_bytes());
        bytes
    }

    #[test]
    fn test_read_request_layout() {
        let items = [
            ReadItem::new(Area::DataBlock, 3, WordLength::Real, 8, 1),
            ReadItem::new(Area::Input, 9, WordLength::Bit, 5 * 8 + 1, 1),
        ];
        let bytes = build_read_request(&items, 480).unwrap();
        assert_eq!(&bytes[2..4], &[0x00, 0x2B]);
        assert_eq!(&bytes[13..15], &[0x00, 0x1A]);
        assert_eq!(bytes[17], FN_READ_VAR);
        assert_eq!(
            hex::encode(&bytes[19..31]),
            "120a10080001000384000040"
        );
        // Block number only for data blocks; bit address unshifted.
        assert_eq!(
            hex::encode(&bytes[31..43]),
            "120a10010001000081000029"
        );
    }

    #[test]
    fn test_read_request_preconditions() {
        let item = ReadItem::new(Area::Marker, 0, WordLength::Byte, 0, 1);
        assert!(matches!(build_read_request(&[], 480), Err(S7Error::NoItems)));
        assert!(matches!(
            build_read_request(&[item; 21], 480),
            Err(S7Error::TooManyItems { count: 21, max: 20 })
        ));
        assert!(build_read_request(&[item; 20], 480).is_ok());
        let err = build_read_request(&[item; 20], 240).unwrap_err();
        assert!(err.is_size_over_pdu());
    }

    #[test]
    fn test_read_request_reply_budget() {
        let big = ReadItem::new(Area::DataBlock, 1, WordLength::Byte, 0, 200);
        assert!(build_read_request(&[big], 240).is_ok());
        let err = build_read_request(&[big, big], 240).unwrap_err();
        assert!(matches!(err, S7Error::SizeOverPdu { size: 422, pdu: 240 }));
    }

    #[test]
    fn test_parse_read_reply_mixed() {
        let bytes = reply(&[
            &[0xFF, 0x04, 0x00, 0x10, 0x12, 0x34],
            &[0x0A, 0x00, 0x00, 0x00],
            &[0xFF, 0x03, 0x00, 0x01, 0x01, 0x00],
            &[0xFF, 0x07, 0x00, 0x04, 0x3F, 0x80, 0x00, 0x00],
        ]);
        let results = parse_read_reply(&bytes, 4).unwrap();
        assert_eq!(results[0], Ok(vec![0x12, 0x34]));
        assert_eq!(results[1], Err(CpuError::ItemNotAvailable));
        assert_eq!(results[2], Ok(vec![0x01]));
        assert_eq!(results[3], Ok(vec![0x3F, 0x80, 0x00, 0x00]));
    }

    #[test]
    fn test_parse_read_reply_odd_padding() {
        let bytes = reply(&[
            &[0xFF, 0x04, 0x00, 0x08, 0xAB, 0x00],
            &[0xFF, 0x04, 0x00, 0x08, 0xCD],
        ]);
        let results = parse_read_reply(&bytes, 2).unwrap();
        assert_eq!(results, vec![Ok(vec![0xAB]), Ok(vec![0xCD])]);
    }

    #[test]
    fn test_parse_read_reply_errors() {
        let mut bytes = reply(&[&[0xFF, 0x04, 0x00, 0x08, 0x01]]);
        assert!(parse_read_reply(&bytes, 2).is_err());

        bytes[17..19].copy_from_slice(&0x8500u16.to_be_bytes());
        let err = parse_read_reply(&bytes, 1).unwrap_err();
        assert!(err.is_size_over_pdu());

        let truncated = reply(&[&[0xFF, 0x04, 0x00, 0x20, 0x01]]);
        assert!(parse_read_reply(&truncated, 1).is_err());
    }

    #[test]
    fn test_write_request_layout() {
        let items = vec![
            WriteItem {
                area: Area::Marker,
                db_number: 0,
                word_length: WordLength::Byte,
                start: 4,
                amount: 1,
                data: vec![0x7F],
            },
            WriteItem {
                area: Area::DataBlock,
                db_number: 2,
                word_length: WordLength::Bit,
                start: 17,
                amount: 1,
                data: vec![0x01],
            },
        ];
        let bytes = build_write_request(&items, 480).unwrap();
        let data_start = MULTI_HEADER_SIZE + 2 * ITEM_SPEC_SIZE;
        assert_eq!(bytes.len(), data_start + 12);
        assert_eq!(&bytes[15..17], &[0x00, 0x0C]);
        assert_eq!(bytes[17], FN_WRITE_VAR);
        assert_eq!(&bytes[data_start..data_start + 6], &[0x00, 0x04, 0x00, 0x08, 0x7F, 0x00]);
        assert_eq!(&bytes[data_start + 6..], &[0x00, 0x03, 0x00, 0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_write_request_size_over_pdu() {
        let item = WriteItem {
            area: Area::DataBlock,
            db_number: 1,
            word_length: WordLength::Byte,
            start: 0,
            amount: 200,
            data: vec![0; 200],
        };
        assert!(build_write_request(std::slice::from_ref(&item), 240).is_ok());
        let err = build_write_request(&[item.clone(), item], 240).unwrap_err();
        assert!(err.is_size_over_pdu());
    }

    #[test]
    fn test_parse_write_reply() {
        let mut bytes = vec![0u8; 23];
        bytes[21] = 0xFF;
        bytes[22] = 0x05;
        let results = parse_write_reply(&bytes, 2).unwrap();
        assert_eq!(results, vec![Ok(()), Err(CpuError::AddressOutOfRange)]);
        assert!(parse_write_reply(&bytes, 3).is_err());
    }
}
