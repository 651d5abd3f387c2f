//! Error types for the S7 protocol and the archiving pipeline.
//!
//! Errors fall into five groups, and callers react to each group differently:
//!
//! | Group | Variants | Effect on a session |
//! |-------|----------|---------------------|
//! | Transport | [`S7Error::Timeout`], [`S7Error::Io`], [`S7Error::NotConnected`], [`S7Error::Unreachable`] | disconnects |
//! | Framing | [`S7Error::InvalidResponse`], [`S7Error::InvalidPdu`], [`S7Error::IsoConnect`], [`S7Error::NegotiatePdu`] | disconnects |
//! | Peer | [`S7Error::Cpu`] | none, scoped to the request or item |
//! | Address | [`S7Error::InvalidAddress`], [`S7Error::TypeMismatch`], [`S7Error::UnknownType`] | detected before I/O |
//! | Precondition | [`S7Error::TooManyItems`], [`S7Error::NoItems`], [`S7Error::SizeOverPdu`], [`S7Error::InvalidParameter`] | detected before I/O |

use std::io;
use thiserror::Error;

/// Result type alias for S7 operations.
pub type Result<T> = std::result::Result<T, S7Error>;

/// Functional errors reported by the controller, mapped from its status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CpuError {
    /// The addressed range does not exist in the controller.
    #[error("address out of range")]
    AddressOutOfRange,
    /// The transport size does not fit the addressed area.
    #[error("invalid transport size")]
    InvalidTransportSize,
    /// The written data does not match the declared size.
    #[error("write data size mismatch")]
    WriteDataSizeMismatch,
    /// The requested item does not exist.
    #[error("item not available")]
    ItemNotAvailable,
    /// The request or its reply does not fit into the negotiated PDU.
    #[error("size over PDU")]
    SizeOverPdu,
    /// A value in the request was rejected.
    #[error("invalid value")]
    InvalidValue,
    /// The function is not supported by this CPU.
    #[error("function not available")]
    FunctionNotAvailable,
    /// The function is protected by a password.
    #[error("password required")]
    NeedPassword,
    /// The supplied password was rejected.
    #[error("invalid password")]
    InvalidPassword,
    /// There is no password to set or clear.
    #[error("no password to set or clear")]
    NoPasswordToSetOrClear,
    /// Any other refusal.
    #[error("function refused")]
    FunctionRefused,
}

impl CpuError {
    /// Maps a controller status word to a semantic error.
    ///
    /// Returns `None` for the success code `0x0000`. Unknown codes map to
    /// [`CpuError::FunctionRefused`].
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::CpuError;
    ///
    /// assert_eq!(CpuError::from_status(0x8500), Some(CpuError::SizeOverPdu));
    /// assert_eq!(CpuError::from_status(0xD209), Some(CpuError::ItemNotAvailable));
    /// assert_eq!(CpuError::from_status(0x1234), Some(CpuError::FunctionRefused));
    /// assert_eq!(CpuError::from_status(0), None);
    /// ```
    pub fn from_status(code: u16) -> Option<Self> {
        let err = match code {
            0x0000 => return None,
            0x0005 => CpuError::AddressOutOfRange,
            0x0006 => CpuError::InvalidTransportSize,
            0x0007 => CpuError::WriteDataSizeMismatch,
            0x000A | 0xD209 => CpuError::ItemNotAvailable,
            0x8500 => CpuError::SizeOverPdu,
            0xDC01 => CpuError::InvalidValue,
            0x8104 => CpuError::FunctionNotAvailable,
            0xD241 => CpuError::NeedPassword,
            0xD602 => CpuError::InvalidPassword,
            0xD604 | 0xD605 => CpuError::NoPasswordToSetOrClear,
            _ => CpuError::FunctionRefused,
        };
        Some(err)
    }

    /// Maps a per-item return code (`0xFF` = success) to a semantic error.
    pub fn from_item_status(code: u8) -> Option<Self> {
        if code == 0xFF {
            return None;
        }
        // A zero item code is not a success marker.
        Some(Self::from_status(u16::from(code)).unwrap_or(CpuError::FunctionRefused))
    }
}

/// Errors that can occur while talking to a controller or running the pipeline.
#[derive(Debug, Error)]
pub enum S7Error {
    /// Functional error reported by the controller.
    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),

    /// Communication timeout.
    #[error("Communication timeout")]
    Timeout,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation attempted without an established session.
    #[error("Not connected")]
    NotConnected,

    /// The connectivity probe could not reach the controller.
    #[error("Controller unreachable: {host}")]
    Unreachable {
        /// Host and port that were probed.
        host: String,
    },

    /// Malformed or undersized reply.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the response error.
        reason: String,
    },

    /// The outer frame announced an impossible length.
    #[error("Invalid PDU length: {length}")]
    InvalidPdu {
        /// Length taken from the frame header.
        length: usize,
    },

    /// The connection request was not confirmed.
    #[error("ISO connect failed: {reason}")]
    IsoConnect {
        /// Description of the failure.
        reason: String,
    },

    /// The PDU size negotiation failed.
    #[error("PDU negotiation failed: {reason}")]
    NegotiatePdu {
        /// Description of the failure.
        reason: String,
    },

    /// The address string does not match any supported shape.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The offending address string.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The address shape cannot carry the requested value type.
    #[error("Address '{address}' is not compatible with type {value_type}")]
    TypeMismatch {
        /// The address string.
        address: String,
        /// Name of the requested type.
        value_type: String,
    },

    /// The type name is not recognised.
    #[error("Unknown tag type '{name}'")]
    UnknownType {
        /// The offending type name.
        name: String,
    },

    /// More items than one exchange may carry.
    #[error("Too many items: {count} (max {max})")]
    TooManyItems {
        /// Number of items passed.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// An item list was empty.
    #[error("No items given")]
    NoItems,

    /// A request would not fit into the negotiated PDU.
    #[error("Request size {size} exceeds PDU size {pdu}")]
    SizeOverPdu {
        /// Encoded request size.
        size: usize,
        /// Negotiated PDU size.
        pdu: usize,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// A definition sheet or archive file could not be processed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The settings file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// The settings could not be serialized.
    #[error("Config serialization error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl S7Error {
    /// Creates a new `InvalidResponse` error.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::S7Error;
    ///
    /// let err = S7Error::invalid_response("reply too short");
    /// assert!(err.is_framing());
    /// ```
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidAddress` error.
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by the byte stream itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            S7Error::Timeout | S7Error::Io(_) | S7Error::NotConnected | S7Error::Unreachable { .. }
        )
    }

    /// Returns true for malformed, undersized or unexpected replies.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            S7Error::InvalidResponse { .. }
                | S7Error::InvalidPdu { .. }
                | S7Error::IsoConnect { .. }
                | S7Error::NegotiatePdu { .. }
        )
    }

    /// Returns true when the session must be dropped after this error.
    pub fn is_fatal(&self) -> bool {
        self.is_transport() || self.is_framing()
    }

    /// Returns true when a request did not fit the negotiated PDU.
    ///
    /// Covers both the controller's own report and the local check
    /// made before any I/O.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::{CpuError, S7Error};
    ///
    /// assert!(S7Error::Cpu(CpuError::SizeOverPdu).is_size_over_pdu());
    /// assert!(S7Error::SizeOverPdu { size: 500, pdu: 480 }.is_size_over_pdu());
    /// assert!(!S7Error::Timeout.is_size_over_pdu());
    /// ```
    pub fn is_size_over_pdu(&self) -> bool {
        matches!(
            self,
            S7Error::Cpu(CpuError::SizeOverPdu) | S7Error::SizeOverPdu { .. }
        )
    }
}

/// Maps socket-level errors to transport errors, folding both timeout kinds.
pub(crate) fn map_io(err: io::Error) -> S7Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => S7Error::Timeout,
        _ => S7Error::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        let cases = [
            (0x0005, CpuError::AddressOutOfRange),
            (0x0006, CpuError::InvalidTransportSize),
            (0x0007, CpuError::WriteDataSizeMismatch),
            (0x000A, CpuError::ItemNotAvailable),
            (0xD209, CpuError::ItemNotAvailable),
            (0x8500, CpuError::SizeOverPdu),
            (0xDC01, CpuError::InvalidValue),
            (0x8104, CpuError::FunctionNotAvailable),
            (0xD241, CpuError::NeedPassword),
            (0xD602, CpuError::InvalidPassword),
            (0xD604, CpuError::NoPasswordToSetOrClear),
            (0xD605, CpuError::NoPasswordToSetOrClear),
            (0xFFFF, CpuError::FunctionRefused),
        ];
        for (code, expected) in cases {
            assert_eq!(CpuError::from_status(code), Some(expected), "code {code:#06x}");
        }
    }

    #[test]
    fn test_item_status() {
        assert_eq!(CpuError::from_item_status(0xFF), None);
        assert_eq!(
            CpuError::from_item_status(0x05),
            Some(CpuError::AddressOutOfRange)
        );
        assert_eq!(
            CpuError::from_item_status(0x0A),
            Some(CpuError::ItemNotAvailable)
        );
        assert_eq!(
            CpuError::from_item_status(0x00),
            Some(CpuError::FunctionRefused)
        );
    }

    #[test]
    fn test_classification() {
        assert!(S7Error::Timeout.is_fatal());
        assert!(S7Error::InvalidPdu { length: 3 }.is_fatal());
        assert!(!S7Error::Cpu(CpuError::ItemNotAvailable).is_fatal());
        assert!(!S7Error::NoItems.is_fatal());
    }

    #[test]
    fn test_map_io_timeout() {
        let err = map_io(io::Error::new(io::ErrorKind::WouldBlock, "x"));
        assert!(matches!(err, S7Error::Timeout));
        let err = map_io(io::Error::new(io::ErrorKind::ConnectionReset, "x"));
        assert!(matches!(err, S7Error::Io(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            S7Error::Cpu(CpuError::SizeOverPdu).to_string(),
            "CPU error: size over PDU"
        );
        assert_eq!(
            S7Error::invalid_address("DB1.X", "no shape matches").to_string(),
            "Invalid address 'DB1.X': no shape matches"
        );
    }
}
