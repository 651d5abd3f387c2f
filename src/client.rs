//! S7 session: handshake, PDU negotiation and bounded exchanges.
//!
//! This module provides the [`Session`] struct, the only component that
//! owns a socket to a controller.
//!
//! # Overview
//!
//! A session walks `Disconnected → Connecting → Negotiating → Ready`:
//!
//! 1. the remote TSAP is computed from rack, slot and connection type
//! 2. the peer is probed with a short timeout
//! 3. the stream is opened and the COTP connection is requested
//! 4. the PDU size is negotiated; every later request is bounded by it
//!
//! Any transport or framing error, in any state, drops the session back to
//! `Disconnected`. Errors the controller reports for a request or an item
//! leave the session as it is. There is no implicit reconnect.
//!
//! # Example
//!
//! ```no_run
//! use s7_archiver::{Area, Session, SessionConfig, WordLength};
//!
//! let config = SessionConfig::new("192.168.0.10").with_rack_slot(0, 2);
//! let mut session = Session::new(config);
//! session.connect()?;
//!
//! // 4 bytes from DB10.DBB0
//! let data = session.read_area(Area::DataBlock, 10, 0, 4, WordLength::Byte)?;
//! println!("{data:?}, PDU {}", session.pdu_length());
//! # Ok::<(), s7_archiver::S7Error>(())
//! ```
//!
//! # Thread Safety
//!
//! A `Session` is `Send` but not shared: every operation takes `&mut self`
//! and blocks for at most the configured read/write timeouts.

use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info, trace, warn};

use crate::area::{Area, ConnectionType, WordLength};
use crate::command::{
    CpuStatusCommand, NegotiateCommand, ReadAreaCommand, ReadClockCommand, SetClockCommand,
    SzlFirstCommand, SzlNextCommand, WriteAreaCommand, DEFAULT_PDU_SIZE, MAX_PDU_SIZE,
    MIN_PDU_SIZE, READ_REPLY_OVERHEAD, WRITE_REQUEST_OVERHEAD,
};
use crate::error::{CpuError, Result, S7Error};
use crate::header::{
    check_connection_confirm, ConnectionRequest, TpktHeader, COTP_DATA_HEADER_SIZE,
    ISO_HEADER_SIZE, TPKT_HEADER_SIZE,
};
use crate::multivar::{
    build_read_request, build_write_request, parse_read_reply, parse_write_reply, ItemResult,
    ReadItem, WriteItem,
};
use crate::response::{
    check_set_clock_reply, check_write_reply, parse_clock_reply, parse_cpu_status,
    parse_negotiate_reply, CpuStatus, ReadAreaResponse, SzlFragment, SzlRecord,
};
use crate::transport::{resolve, TcpTransport, Timeouts, ISO_TCP_PORT};
use crate::utils::format_hex;

/// Smallest frame that can carry an S7 PDU.
const MIN_ISO_PACKET: usize = 16;

/// Upper bound for a reassembled system-info list.
const MAX_SZL_SIZE: usize = 0x10000;

/// Configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Controller host name or IP address.
    pub host: String,
    /// TCP port (default 102).
    pub port: u16,
    /// Rack number.
    pub rack: u8,
    /// Slot number.
    pub slot: u8,
    /// Connection type placed in the remote TSAP.
    pub connection_type: ConnectionType,
    /// PDU size requested during negotiation.
    pub pdu_size: u16,
    /// Socket timeouts.
    pub timeouts: Timeouts,
}

impl SessionConfig {
    /// Creates a configuration for `host` with rack 0, slot 1, port 102, a
    /// basic connection and a 480-byte PDU request.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::SessionConfig;
    ///
    /// let config = SessionConfig::new("10.0.0.5");
    /// assert_eq!(config.port, 102);
    /// assert_eq!(config.remote_tsap(), 0x0301);
    /// ```
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: ISO_TCP_PORT,
            rack: 0,
            slot: 1,
            connection_type: ConnectionType::default(),
            pdu_size: DEFAULT_PDU_SIZE,
            timeouts: Timeouts::default(),
        }
    }

    /// Sets a custom port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets rack and slot.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::{ConnectionType, SessionConfig};
    ///
    /// let config = SessionConfig::new("10.0.0.5")
    ///     .with_rack_slot(0, 2)
    ///     .with_connection_type(ConnectionType::Pg);
    /// assert_eq!(config.remote_tsap(), 0x0102);
    /// ```
    pub fn with_rack_slot(mut self, rack: u8, slot: u8) -> Self {
        self.rack = rack;
        self.slot = slot;
        self
    }

    /// Sets the connection type.
    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Sets the requested PDU size, clamped to 240-960.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::SessionConfig;
    ///
    /// assert_eq!(SessionConfig::new("plc").with_pdu_size(100).pdu_size, 240);
    /// assert_eq!(SessionConfig::new("plc").with_pdu_size(4096).pdu_size, 960);
    /// ```
    pub fn with_pdu_size(mut self, pdu_size: u16) -> Self {
        self.pdu_size = pdu_size.clamp(MIN_PDU_SIZE, MAX_PDU_SIZE);
        self
    }

    /// Sets all three socket timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the probe and connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    /// Remote TSAP derived from connection type, rack and slot.
    pub fn remote_tsap(&self) -> u16 {
        self.connection_type.remote_tsap(self.rack, self.slot)
    }
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No stream.
    #[default]
    Disconnected,
    /// Stream opening, COTP connection requested.
    Connecting,
    /// PDU size negotiation in progress.
    Negotiating,
    /// Negotiated, ready for exchanges.
    Ready,
}

/// One S7 connection.
pub struct Session {
    config: SessionConfig,
    transport: Option<TcpTransport>,
    state: SessionState,
    pdu_length: u16,
    last_error: Option<String>,
}

impl Session {
    /// Creates a disconnected session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: None,
            state: SessionState::Disconnected,
            pdu_length: 0,
            last_error: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true once negotiation has completed.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Negotiated PDU size, 0 while disconnected.
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    /// Message of the last error that failed a connect or dropped the session.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Connects and negotiates the PDU size.
    ///
    /// An existing connection is closed first. On failure the session is
    /// left disconnected and the call may simply be repeated.
    ///
    /// # Errors
    ///
    /// - [`S7Error::Unreachable`] when the probe fails
    /// - [`S7Error::IsoConnect`] when the connection is not confirmed
    /// - [`S7Error::NegotiatePdu`] when negotiation fails
    /// - any transport error
    pub fn connect(&mut self) -> Result<()> {
        self.disconnect();
        self.state = SessionState::Connecting;
        match self.handshake() {
            Ok(pdu) => {
                self.pdu_length = pdu;
                self.state = SessionState::Ready;
                self.last_error = None;
                info!(
                    host = %self.config.host,
                    rack = self.config.rack,
                    slot = self.config.slot,
                    pdu = pdu,
                    "connected"
                );
                Ok(())
            }
            Err(err) => {
                debug!(host = %self.config.host, error = %err, "connect failed");
                self.drop_transport();
                Err(self.remember(err))
            }
        }
    }

    fn handshake(&mut self) -> Result<u16> {
        let peer = resolve(&self.config.host, self.config.port)?;
        TcpTransport::probe(peer, self.config.timeouts.connect)?;
        self.transport = Some(TcpTransport::connect(peer, self.config.timeouts)?);

        let request = ConnectionRequest::new(self.config.remote_tsap());
        let confirm = self.exchange(&request.to_bytes())?;
        check_connection_confirm(&confirm)?;

        self.state = SessionState::Negotiating;
        let negotiate = NegotiateCommand::new(self.config.pdu_size)?;
        let reply = self.exchange(&negotiate.to_bytes())?;
        parse_negotiate_reply(&reply, self.config.pdu_size)
    }

    /// Closes the stream. Does nothing when already disconnected.
    pub fn disconnect(&mut self) {
        if self.transport.is_some() {
            info!(host = %self.config.host, "disconnected");
        }
        self.drop_transport();
    }

    fn drop_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
        self.state = SessionState::Disconnected;
        self.pdu_length = 0;
    }

    fn remember(&mut self, err: S7Error) -> S7Error {
        self.last_error = Some(err.to_string());
        err
    }

    /// Drops the session on transport and framing errors.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Err(err) if err.is_fatal() => {
                warn!(host = %self.config.host, error = %err, "session dropped");
                self.drop_transport();
                Err(self.remember(err))
            }
            other => other,
        }
    }

    /// Sends one telegram and returns the reply frame.
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(S7Error::NotConnected)?;
        trace!(tx = %format_hex(request));
        transport.send(request)?;
        let reply = self.recv_iso_packet()?;
        trace!(rx = %format_hex(&reply));
        Ok(reply)
    }

    /// Receives one ISO data packet, skipping empty keep-alive frames.
    fn recv_iso_packet(&mut self) -> Result<Vec<u8>> {
        let max = usize::from(self.config.pdu_size) + ISO_HEADER_SIZE;
        let transport = self.transport.as_mut().ok_or(S7Error::NotConnected)?;
        loop {
            let mut tpkt = [0u8; TPKT_HEADER_SIZE];
            transport.recv_exact(&mut tpkt)?;
            let length = usize::from(TpktHeader::from_bytes(&tpkt)?.length);
            if length == ISO_HEADER_SIZE {
                let mut cotp = [0u8; COTP_DATA_HEADER_SIZE];
                transport.recv_exact(&mut cotp)?;
                continue;
            }
            if length > max || length < MIN_ISO_PACKET {
                return Err(S7Error::InvalidPdu { length });
            }
            let mut packet = vec![0u8; length];
            packet[..TPKT_HEADER_SIZE].copy_from_slice(&tpkt);
            transport.recv_exact(&mut packet[TPKT_HEADER_SIZE..])?;
            return Ok(packet);
        }
    }

    fn ready_pdu(&self) -> Result<usize> {
        if self.state != SessionState::Ready {
            return Err(S7Error::NotConnected);
        }
        Ok(usize::from(self.pdu_length))
    }

    /// Reads `amount` elements of `word_length` starting at `start`.
    ///
    /// `start` is a byte offset, or a bit address (`byte * 8 + bit`) for
    /// [`WordLength::Bit`], or an element number for counters and timers.
    /// Counter and timer areas force their own word length, bit reads
    /// transfer exactly one element. Large ranges are split into as many
    /// requests as the negotiated PDU requires.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::Cpu`] when the controller refuses a chunk; the
    /// bytes of earlier chunks are discarded.
    pub fn read_area(
        &mut self,
        area: Area,
        db_number: u16,
        start: u32,
        amount: usize,
        word_length: WordLength,
    ) -> Result<Vec<u8>> {
        let result = self.read_area_chunks(area, db_number, start, amount, word_length);
        self.track(result)
    }

    fn read_area_chunks(
        &mut self,
        area: Area,
        db_number: u16,
        start: u32,
        amount: usize,
        word_length: WordLength,
    ) -> Result<Vec<u8>> {
        let pdu = self.ready_pdu()?;
        let (word_length, mut remaining, word_size) = normalize(area, word_length, amount);
        let max_elements = pdu.saturating_sub(READ_REPLY_OVERHEAD) / word_size;
        if max_elements == 0 {
            return Err(S7Error::SizeOverPdu {
                size: READ_REPLY_OVERHEAD + word_size,
                pdu,
            });
        }

        let mut data = Vec::with_capacity(remaining * word_size);
        let mut start = start;
        while remaining > 0 {
            let elements = remaining.min(max_elements);
            let size = elements * word_size;
            let address = if word_length.is_element_addressed() {
                start
            } else {
                start << 3
            };
            // Bounded by the PDU size, so it fits in u16.
            let cmd = ReadAreaCommand::new(area, db_number, word_length, address, elements as u16);
            let reply = self.exchange(&cmd.to_bytes())?;
            let response = ReadAreaResponse::from_bytes(&reply, size)?;
            debug!(%area, db_number, start, bytes = size, "read area chunk");
            data.extend_from_slice(&response.data);
            remaining -= elements;
            start += advance(word_length, elements, word_size);
        }
        Ok(data)
    }

    /// Writes `data` starting at `start`, addressed like [`Session::read_area`].
    ///
    /// For counters and timers `data` holds two bytes per element; for bits
    /// one byte holding 0 or 1.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::InvalidParameter`] for empty or misaligned data and
    /// [`S7Error::Cpu`] when the controller refuses a chunk. Chunks before
    /// the refused one stay written.
    pub fn write_area(
        &mut self,
        area: Area,
        db_number: u16,
        start: u32,
        word_length: WordLength,
        data: &[u8],
    ) -> Result<()> {
        let result = self.write_area_chunks(area, db_number, start, word_length, data);
        self.track(result)
    }

    fn write_area_chunks(
        &mut self,
        area: Area,
        db_number: u16,
        start: u32,
        word_length: WordLength,
        data: &[u8],
    ) -> Result<()> {
        let pdu = self.ready_pdu()?;
        let coerced = area.coerce_word_length(word_length);
        let amount = match coerced {
            WordLength::Bit => 1,
            wl if wl.is_element_addressed() => {
                if data.len() % wl.size() != 0 {
                    return Err(S7Error::invalid_parameter(
                        "data",
                        format!("{} bytes is not a whole number of elements", data.len()),
                    ));
                }
                data.len() / wl.size()
            }
            wl => data.len() / wl.size(),
        };
        if data.is_empty() || amount == 0 {
            return Err(S7Error::invalid_parameter("data", "must not be empty"));
        }
        let (word_length, mut remaining, word_size) = normalize(area, word_length, amount);
        let max_elements = pdu.saturating_sub(WRITE_REQUEST_OVERHEAD) / word_size;
        if max_elements == 0 {
            return Err(S7Error::SizeOverPdu {
                size: WRITE_REQUEST_OVERHEAD + word_size,
                pdu,
            });
        }

        let mut offset = 0;
        let mut start = start;
        while remaining > 0 {
            let elements = remaining.min(max_elements);
            let size = elements * word_size;
            let address = if word_length.is_element_addressed() {
                start
            } else {
                start << 3
            };
            let chunk = data[offset..offset + size].to_vec();
            let cmd = WriteAreaCommand::new(
                area,
                db_number,
                word_length,
                address,
                elements as u16,
                chunk,
            )?;
            let reply = self.exchange(&cmd.to_bytes())?;
            check_write_reply(&reply)?;
            debug!(%area, db_number, start, bytes = size, "wrote area chunk");
            offset += size;
            remaining -= elements;
            start += advance(word_length, elements, word_size);
        }
        Ok(())
    }

    /// Reads up to 20 items in one exchange.
    ///
    /// # Errors
    ///
    /// Precondition errors ([`S7Error::NoItems`], [`S7Error::TooManyItems`],
    /// [`S7Error::SizeOverPdu`]) are raised before any I/O. A refused
    /// exchange is [`S7Error::Cpu`]; refused items come back in their slot.
    pub fn read_multi(&mut self, items: &[ReadItem]) -> Result<Vec<ItemResult>> {
        let result = self.ready_pdu().and_then(|pdu| {
            let request = build_read_request(items, pdu)?;
            let reply = self.exchange(&request)?;
            parse_read_reply(&reply, items.len())
        });
        self.track(result)
    }

    /// Writes up to 20 items in one exchange.
    ///
    /// # Errors
    ///
    /// Same as [`Session::read_multi`].
    pub fn write_multi(
        &mut self,
        items: &[WriteItem],
    ) -> Result<Vec<std::result::Result<(), CpuError>>> {
        let result = self.ready_pdu().and_then(|pdu| {
            let request = build_write_request(items, pdu)?;
            let reply = self.exchange(&request)?;
            parse_write_reply(&reply, items.len())
        });
        self.track(result)
    }

    /// Reads the controller clock.
    pub fn get_plc_datetime(&mut self) -> Result<NaiveDateTime> {
        let result = self.ready_pdu().and_then(|_| {
            let reply = self.exchange(&ReadClockCommand.to_bytes())?;
            parse_clock_reply(&reply)
        });
        self.track(result)
    }

    /// Sets the controller clock.
    pub fn set_plc_datetime(&mut self, datetime: NaiveDateTime) -> Result<()> {
        let result = self.ready_pdu().and_then(|_| {
            let reply = self.exchange(&SetClockCommand::new(datetime).to_bytes())?;
            check_set_clock_reply(&reply)
        });
        self.track(result)
    }

    /// Reads the run/stop state.
    pub fn get_cpu_status(&mut self) -> Result<CpuStatus> {
        let result = self.ready_pdu().and_then(|_| {
            let reply = self.exchange(&CpuStatusCommand.to_bytes())?;
            parse_cpu_status(&reply)
        });
        self.track(result)
    }

    /// Reads a complete system-info list, following continuation fragments
    /// until the controller marks the last one.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use s7_archiver::{Session, SessionConfig};
    ///
    /// let mut session = Session::new(SessionConfig::new("192.168.0.10"));
    /// session.connect()?;
    /// // Module identification
    /// let record = session.read_szl(0x0011, 0x0000)?;
    /// println!("{} records of {} bytes", record.n_dr, record.lenthdr);
    /// # Ok::<(), s7_archiver::S7Error>(())
    /// ```
    pub fn read_szl(&mut self, id: u16, index: u16) -> Result<SzlRecord> {
        let result = self.ready_pdu().and_then(|_| self.read_szl_fragments(id, index));
        self.track(result)
    }

    fn read_szl_fragments(&mut self, id: u16, index: u16) -> Result<SzlRecord> {
        let reply = self.exchange(&SzlFirstCommand::new(id, index).to_bytes())?;
        let first = SzlFragment::from_bytes(&reply, true)?;
        let mut record = SzlRecord {
            lenthdr: first.lenthdr,
            n_dr: first.n_dr,
            data: first.data,
        };
        let (mut done, mut sequence) = (first.done, first.sequence);
        while !done {
            let reply = self.exchange(&SzlNextCommand::new(sequence).to_bytes())?;
            let fragment = SzlFragment::from_bytes(&reply, false)?;
            record.data.extend_from_slice(&fragment.data);
            if record.data.len() > MAX_SZL_SIZE {
                return Err(S7Error::invalid_response(format!(
                    "SZL {id:#06X} exceeds {MAX_SZL_SIZE} bytes"
                )));
            }
            done = fragment.done;
            sequence = fragment.sequence;
        }
        debug!(id, index, bytes = record.data.len(), "read SZL");
        Ok(record)
    }
}

/// Maps a requested word length to the one sent and the element size.
///
/// Widths other than bit, counter and timer are sent as bytes.
fn normalize(area: Area, word_length: WordLength, amount: usize) -> (WordLength, usize, usize) {
    match area.coerce_word_length(word_length) {
        WordLength::Bit => (WordLength::Bit, 1, 1),
        wl if wl.is_element_addressed() => (wl, amount, wl.size()),
        wl => (WordLength::Byte, amount * wl.size(), 1),
    }
}

/// How far `start` moves after a chunk of `elements`.
fn advance(word_length: WordLength, elements: usize, word_size: usize) -> u32 {
    let step = if word_length.is_element_addressed() {
        elements
    } else {
        elements * word_size
    };
    step as u32
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("rack", &self.config.rack)
            .field("slot", &self.config.slot)
            .field("state", &self.state)
            .field("pdu_length", &self.pdu_length)
            .field("transport", &self.transport)
            .finish()
    }
}

/// The part of a session the sampling loop needs.
///
/// Implemented by [`Session`]; tests drive the loop with scripted fakes.
pub trait PlcSession {
    /// Connects and negotiates.
    fn connect(&mut self) -> Result<()>;

    /// Closes the connection.
    fn disconnect(&mut self);

    /// Returns true when ready for exchanges.
    fn is_connected(&self) -> bool;

    /// Negotiated PDU size.
    fn pdu_length(&self) -> usize;

    /// Bounded area read, see [`Session::read_area`].
    fn read_area(
        &mut self,
        area: Area,
        db_number: u16,
        start: u32,
        amount: usize,
        word_length: WordLength,
    ) -> Result<Vec<u8>>;

    /// Multi-item read, see [`Session::read_multi`].
    fn read_multi(&mut self, items: &[ReadItem]) -> Result<Vec<ItemResult>>;
}

impl PlcSession for Session {
    fn connect(&mut self) -> Result<()> {
        Session::connect(self)
    }

    fn disconnect(&mut self) {
        Session::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        Session::is_connected(self)
    }

    fn pdu_length(&self) -> usize {
        usize::from(Session::pdu_length(self))
    }

    fn read_area(
        &mut self,
        area: Area,
        db_number: u16,
        start: u32,
        amount: usize,
        word_length: WordLength,
    ) -> Result<Vec<u8>> {
        Session::read_area(self, area, db_number, start, amount, word_length)
    }

    fn read_multi(&mut self, items: &[ReadItem]) -> Result<Vec<ItemResult>> {
        Session::read_multi(self, items)
    }
}
