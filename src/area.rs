//! Memory areas, word lengths and transport sizes of the S7 protocol.
//!
//! # Areas
//!
//! | Area | Code | Description |
//! |------|:----:|-------------|
//! | [`Area::Peripheral`] | 0x80 | Peripheral inputs/outputs (PI/PQ) |
//! | [`Area::Input`] | 0x81 | Process image inputs |
//! | [`Area::Output`] | 0x82 | Process image outputs |
//! | [`Area::Marker`] | 0x83 | Markers (flags) |
//! | [`Area::DataBlock`] | 0x84 | Data blocks |
//! | [`Area::Counter`] | 0x1C | Counters |
//! | [`Area::Timer`] | 0x1D | Timers |
//!
//! # Example
//!
//! ```
//! use s7_archiver::{Area, WordLength};
//!
//! assert_eq!(Area::DataBlock.code(), 0x84);
//! assert_eq!(Area::DataBlock.to_string(), "DB");
//! assert_eq!(WordLength::Real.size(), 4);
//! ```

use serde::{Deserialize, Serialize};

/// Memory areas of an S7 controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// Peripheral I/O.
    Peripheral,
    /// Process image inputs.
    Input,
    /// Process image outputs.
    Output,
    /// Markers.
    Marker,
    /// Data blocks.
    DataBlock,
    /// Counters.
    Counter,
    /// Timers.
    Timer,
}

impl Area {
    /// Returns the wire code of the area.
    pub fn code(self) -> u8 {
        match self {
            Area::Peripheral => 0x80,
            Area::Input => 0x81,
            Area::Output => 0x82,
            Area::Marker => 0x83,
            Area::DataBlock => 0x84,
            Area::Counter => 0x1C,
            Area::Timer => 0x1D,
        }
    }

    /// Maps an area to the word length the controller requires for it.
    ///
    /// Counter and timer areas force their own word length, every other
    /// area keeps the one asked for.
    pub fn coerce_word_length(self, requested: WordLength) -> WordLength {
        match self {
            Area::Counter => WordLength::Counter,
            Area::Timer => WordLength::Timer,
            _ => requested,
        }
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Area::Peripheral => write!(f, "P"),
            Area::Input => write!(f, "I"),
            Area::Output => write!(f, "Q"),
            Area::Marker => write!(f, "M"),
            Area::DataBlock => write!(f, "DB"),
            Area::Counter => write!(f, "C"),
            Area::Timer => write!(f, "T"),
        }
    }
}

/// Element width of an addressed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordLength {
    /// Single bit.
    Bit,
    /// Unsigned byte.
    Byte,
    /// Signed byte.
    Char,
    /// Unsigned 16-bit word.
    Word,
    /// Signed 16-bit integer.
    Int,
    /// Unsigned 32-bit double word.
    DWord,
    /// Signed 32-bit integer.
    DInt,
    /// 32-bit float.
    Real,
    /// Counter (2 bytes).
    Counter,
    /// Timer (2 bytes).
    Timer,
}

impl WordLength {
    /// Returns the wire code of the word length.
    pub fn code(self) -> u8 {
        match self {
            WordLength::Bit => 0x01,
            WordLength::Byte => 0x02,
            WordLength::Char => 0x03,
            WordLength::Word => 0x04,
            WordLength::Int => 0x05,
            WordLength::DWord => 0x06,
            WordLength::DInt => 0x07,
            WordLength::Real => 0x08,
            WordLength::Counter => 0x1C,
            WordLength::Timer => 0x1D,
        }
    }

    /// Returns the size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            WordLength::Bit | WordLength::Byte | WordLength::Char => 1,
            WordLength::Word | WordLength::Int | WordLength::Counter | WordLength::Timer => 2,
            WordLength::DWord | WordLength::DInt | WordLength::Real => 4,
        }
    }

    /// Returns true for the widths addressed by element index instead of
    /// bit offset.
    pub(crate) fn is_element_addressed(self) -> bool {
        matches!(
            self,
            WordLength::Bit | WordLength::Counter | WordLength::Timer
        )
    }

    /// Transport size written in front of the data of a write item.
    pub(crate) fn write_transport_size(self) -> TransportSize {
        match self {
            WordLength::Bit => TransportSize::Bit,
            WordLength::Counter | WordLength::Timer => TransportSize::Octet,
            _ => TransportSize::Byte,
        }
    }
}

/// Transport size carried in data items of replies and write requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportSize {
    /// Bit access, length in bytes.
    Bit,
    /// Byte/word/dword access, length in bits.
    Byte,
    /// Integer access, length in bits.
    Int,
    /// Real access, length in bytes.
    Real,
    /// Octet string, length in bytes.
    Octet,
}

impl TransportSize {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            TransportSize::Bit => 0x03,
            TransportSize::Byte => 0x04,
            TransportSize::Int => 0x05,
            TransportSize::Real => 0x07,
            TransportSize::Octet => 0x09,
        }
    }

    /// Returns true when the length field for a data item with this code
    /// counts bits rather than bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::TransportSize;
    ///
    /// assert!(TransportSize::length_in_bits(0x04));
    /// assert!(!TransportSize::length_in_bits(0x09));
    /// assert!(!TransportSize::length_in_bits(0x07));
    /// assert!(!TransportSize::length_in_bits(0x03));
    /// ```
    pub fn length_in_bits(code: u8) -> bool {
        code != TransportSize::Octet.code()
            && code != TransportSize::Real.code()
            && code != TransportSize::Bit.code()
    }
}

/// Kind of connection requested from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Programming device connection.
    Pg,
    /// Operator panel connection.
    Op,
    /// Basic (S7 basic) connection.
    #[default]
    Basic,
}

impl ConnectionType {
    /// Returns the connection type code placed in the remote TSAP high byte.
    pub fn code(self) -> u16 {
        match self {
            ConnectionType::Pg => 0x01,
            ConnectionType::Op => 0x02,
            ConnectionType::Basic => 0x03,
        }
    }

    /// Computes the remote TSAP for a rack/slot pair.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::ConnectionType;
    ///
    /// assert_eq!(ConnectionType::Pg.remote_tsap(0, 2), 0x0102);
    /// assert_eq!(ConnectionType::Basic.remote_tsap(0, 1), 0x0301);
    /// assert_eq!(ConnectionType::Op.remote_tsap(1, 3), 0x0223);
    /// ```
    pub fn remote_tsap(self, rack: u8, slot: u8) -> u16 {
        (self.code() << 8) + u16::from(rack) * 0x20 + u16::from(slot)
    }
}
