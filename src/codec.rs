//! Value codec: typed values to and from their wire layout.
//!
//! All multi-byte values are big-endian on the wire.
//!
//! | Type | Bytes | Layout |
//! |------|:-----:|--------|
//! | bool | 1 | `1` = true, anything else false |
//! | byte / sbyte | 1 | raw, sbyte sign-extended |
//! | int16 / uint16 | 2 | big-endian |
//! | int32 / uint32 | 4 | big-endian |
//! | float | 4 | IEEE-754 single, big-endian |
//! | date-time | 8 | packed BCD, see [`encode_datetime`] |
//!
//! # Example
//!
//! ```
//! use s7_archiver::{Value, ValueType};
//!
//! let bytes = Value::Int16(-2).encode().unwrap();
//! assert_eq!(bytes, vec![0xFF, 0xFE]);
//! assert_eq!(Value::decode(ValueType::Int16, &bytes).unwrap(), Value::Int16(-2));
//! ```

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::area::WordLength;
use crate::error::{Result, S7Error};

/// Size of a packed BCD date-time.
pub const DATETIME_SIZE: usize = 8;

/// Declared type of a tag value.
///
/// Double, Int64 and UInt64 are known type names that no address shape can
/// carry; they exist so configuration can name them and be rejected cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Single bit.
    Bool,
    /// Unsigned byte.
    Byte,
    /// Signed byte.
    SByte,
    /// Signed 16-bit.
    Int16,
    /// Unsigned 16-bit.
    UInt16,
    /// Signed 32-bit.
    Int32,
    /// Unsigned 32-bit.
    UInt32,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Signed 64-bit.
    Int64,
    /// Unsigned 64-bit.
    UInt64,
}

impl ValueType {
    /// Resolves a configured type name, case-insensitively.
    ///
    /// Both short names (`uint16`, `float`) and the long spellings used by
    /// older definition sheets (`UInt16`, `Single`, `Boolean`) are accepted,
    /// with or without a `System.` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::UnknownType`] for anything else.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::ValueType;
    ///
    /// assert_eq!(ValueType::from_name("Boolean").unwrap(), ValueType::Bool);
    /// assert_eq!(ValueType::from_name("single").unwrap(), ValueType::Float);
    /// assert_eq!(ValueType::from_name("System.UInt16").unwrap(), ValueType::UInt16);
    /// assert!(ValueType::from_name("decimal").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let short = lower.strip_prefix("system.").unwrap_or(&lower);
        let ty = match short {
            "bool" | "boolean" => ValueType::Bool,
            "byte" => ValueType::Byte,
            "sbyte" => ValueType::SByte,
            "double" => ValueType::Double,
            "float" | "single" => ValueType::Float,
            "int32" => ValueType::Int32,
            "uint32" => ValueType::UInt32,
            "int64" => ValueType::Int64,
            "uint64" => ValueType::UInt64,
            "int16" => ValueType::Int16,
            "uint16" => ValueType::UInt16,
            _ => {
                return Err(S7Error::UnknownType {
                    name: name.to_string(),
                })
            }
        };
        Ok(ty)
    }

    /// Canonical short name.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Byte => "byte",
            ValueType::SByte => "sbyte",
            ValueType::Int16 => "int16",
            ValueType::UInt16 => "uint16",
            ValueType::Int32 => "int32",
            ValueType::UInt32 => "uint32",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::Int64 => "int64",
            ValueType::UInt64 => "uint64",
        }
    }

    /// Word length used on the wire, `None` for types no controller area carries.
    pub fn word_length(self) -> Option<WordLength> {
        match self {
            ValueType::Bool => Some(WordLength::Bit),
            ValueType::Byte => Some(WordLength::Byte),
            ValueType::SByte => Some(WordLength::Char),
            ValueType::UInt16 => Some(WordLength::Word),
            ValueType::Int16 => Some(WordLength::Int),
            ValueType::UInt32 => Some(WordLength::DWord),
            ValueType::Int32 => Some(WordLength::DInt),
            ValueType::Float => Some(WordLength::Real),
            ValueType::Double | ValueType::Int64 | ValueType::UInt64 => None,
        }
    }

    /// Number of bytes one value occupies on the wire.
    pub fn wire_size(self) -> Option<usize> {
        self.word_length().map(WordLength::size)
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed tag value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Bit value.
    Bool(bool),
    /// Unsigned byte.
    Byte(u8),
    /// Signed byte.
    SByte(i8),
    /// Signed 16-bit.
    Int16(i16),
    /// Unsigned 16-bit.
    UInt16(u16),
    /// Signed 32-bit.
    Int32(i32),
    /// Unsigned 32-bit.
    UInt32(u32),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Signed 64-bit.
    Int64(i64),
    /// Unsigned 64-bit.
    UInt64(u64),
}

impl Value {
    /// Returns the type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Byte(_) => ValueType::Byte,
            Value::SByte(_) => ValueType::SByte,
            Value::Int16(_) => ValueType::Int16,
            Value::UInt16(_) => ValueType::UInt16,
            Value::Int32(_) => ValueType::Int32,
            Value::UInt32(_) => ValueType::UInt32,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt64(_) => ValueType::UInt64,
        }
    }

    /// Encodes the value into its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::InvalidParameter`] for 64-bit types.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = match *self {
            Value::Bool(v) => vec![u8::from(v)],
            Value::Byte(v) => vec![v],
            Value::SByte(v) => v.to_be_bytes().to_vec(),
            Value::Int16(v) => v.to_be_bytes().to_vec(),
            Value::UInt16(v) => v.to_be_bytes().to_vec(),
            Value::Int32(v) => v.to_be_bytes().to_vec(),
            Value::UInt32(v) => v.to_be_bytes().to_vec(),
            Value::Float(v) => v.to_be_bytes().to_vec(),
            Value::Double(_) | Value::Int64(_) | Value::UInt64(_) => {
                return Err(S7Error::invalid_parameter(
                    "value",
                    format!("{} has no wire encoding", self.value_type()),
                ))
            }
        };
        Ok(bytes)
    }

    /// Decodes a value of type `ty` from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is shorter than the wire size or the type
    /// has no wire encoding.
    pub fn decode(ty: ValueType, bytes: &[u8]) -> Result<Self> {
        let size = ty.wire_size().ok_or_else(|| {
            S7Error::invalid_parameter("type", format!("{ty} has no wire encoding"))
        })?;
        if bytes.len() < size {
            return Err(S7Error::invalid_response(format!(
                "{} needs {} bytes, got {}",
                ty,
                size,
                bytes.len()
            )));
        }
        let b = bytes;
        let value = match ty {
            ValueType::Bool => Value::Bool(b[0] == 1),
            ValueType::Byte => Value::Byte(b[0]),
            ValueType::SByte => Value::SByte(i8::from_be_bytes([b[0]])),
            ValueType::Int16 => Value::Int16(i16::from_be_bytes([b[0], b[1]])),
            ValueType::UInt16 => Value::UInt16(u16::from_be_bytes([b[0], b[1]])),
            ValueType::Int32 => Value::Int32(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            ValueType::UInt32 => Value::UInt32(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            ValueType::Float => Value::Float(f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            ValueType::Double | ValueType::Int64 | ValueType::UInt64 => {
                return Err(S7Error::invalid_parameter(
                    "type",
                    format!("{ty} has no wire encoding"),
                ))
            }
        };
        Ok(value)
    }

    /// Compares two values, treating floats bitwise so NaN equals itself.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Parses a textual value of type `ty`. Bits accept `0`, `1`, `true`
    /// and `false`.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::InvalidParameter`] when `text` does not parse.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_archiver::{Value, ValueType};
    ///
    /// assert_eq!(Value::parse(ValueType::Bool, "1").unwrap(), Value::Bool(true));
    /// assert_eq!(Value::parse(ValueType::Int16, "-42").unwrap(), Value::Int16(-42));
    /// assert!(Value::parse(ValueType::Byte, "300").is_err());
    /// ```
    pub fn parse(ty: ValueType, text: &str) -> Result<Self> {
        fn num<T: std::str::FromStr>(text: &str) -> Option<T> {
            text.parse().ok()
        }
        let text = text.trim();
        let value = match ty {
            ValueType::Bool => match text.to_ascii_lowercase().as_str() {
                "1" | "true" => Some(Value::Bool(true)),
                "0" | "false" => Some(Value::Bool(false)),
                _ => None,
            },
            ValueType::Byte => num(text).map(Value::Byte),
            ValueType::SByte => num(text).map(Value::SByte),
            ValueType::Int16 => num(text).map(Value::Int16),
            ValueType::UInt16 => num(text).map(Value::UInt16),
            ValueType::Int32 => num(text).map(Value::Int32),
            ValueType::UInt32 => num(text).map(Value::UInt32),
            ValueType::Float => num(text).map(Value::Float),
            ValueType::Double => num(text).map(Value::Double),
            ValueType::Int64 => num(text).map(Value::Int64),
            ValueType::UInt64 => num(text).map(Value::UInt64),
        };
        value.ok_or_else(|| {
            S7Error::invalid_parameter("value", format!("'{text}' is not a valid {ty}"))
        })
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::SByte(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
        }
    }
}

/// Packs a two-digit value into BCD.
pub fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Unpacks a BCD byte, `None` if either nibble is above 9.
pub fn from_bcd(byte: u8) -> Option<u8> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    (hi <= 9 && lo <= 9).then_some(hi * 10 + lo)
}

/// Encodes a date-time into the controller's 8-byte BCD layout.
///
/// Bytes: year (two digits), month, day, hour, minute, second, the two high
/// millisecond digits, then the low millisecond digit and the day of week
/// (Sunday = 1) sharing the last byte.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use s7_archiver::{decode_datetime, encode_datetime};
///
/// let dt = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
///     .and_hms_milli_opt(13, 45, 30, 123).unwrap();
/// let bytes = encode_datetime(&dt);
/// assert_eq!(bytes, [0x24, 0x03, 0x15, 0x13, 0x45, 0x30, 0x12, 0x36]);
/// assert_eq!(decode_datetime(&bytes), dt);
/// ```
pub fn encode_datetime(dt: &NaiveDateTime) -> [u8; DATETIME_SIZE] {
    // Leap-second representation can push milliseconds past 999.
    let ms = (dt.nanosecond() / 1_000_000).min(999);
    let dow = dt.weekday().number_from_sunday();
    // Every field below is < 100 so the casts are lossless.
    [
        to_bcd((dt.year().rem_euclid(100)) as u8),
        to_bcd(dt.month() as u8),
        to_bcd(dt.day() as u8),
        to_bcd(dt.hour() as u8),
        to_bcd(dt.minute() as u8),
        to_bcd(dt.second() as u8),
        to_bcd((ms / 10) as u8),
        to_bcd(((ms % 10) * 10 + dow) as u8),
    ]
}

/// Decodes an 8-byte BCD date-time.
///
/// Two-digit years below 90 belong to the 2000s, the rest to the 1900s.
/// Malformed BCD or an impossible calendar date yields the Unix epoch.
pub fn decode_datetime(bytes: &[u8]) -> NaiveDateTime {
    try_decode_datetime(bytes).unwrap_or_default()
}

fn try_decode_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    let b = bytes.get(..DATETIME_SIZE)?;
    let year = u32::from(from_bcd(b[0])?);
    let year = if year < 90 { 2000 + year } else { 1900 + year };
    let month = u32::from(from_bcd(b[1])?);
    let day = u32::from(from_bcd(b[2])?);
    let hour = u32::from(from_bcd(b[3])?);
    let minute = u32::from(from_bcd(b[4])?);
    let second = u32::from(from_bcd(b[5])?);
    let ms = u32::from(from_bcd(b[6])?) * 10 + u32::from(from_bcd(b[7])?) / 10;
    NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_milli_opt(hour, minute, second, ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = v.encode().unwrap();
        assert_eq!(Some(bytes.len()), v.value_type().wire_size());
        let back = Value::decode(v.value_type(), &bytes).unwrap();
        assert!(back.same_as(&v), "{v:?} -> {back:?}");
    }

    #[test]
    fn test_roundtrip_boundaries() {
        for v in [
            Value::Bool(true),
            Value::Bool(false),
            Value::Byte(0),
            Value::Byte(u8::MAX),
            Value::SByte(i8::MIN),
            Value::SByte(-1),
            Value::SByte(i8::MAX),
            Value::Int16(i16::MIN),
            Value::Int16(0),
            Value::Int16(i16::MAX),
            Value::UInt16(u16::MAX),
            Value::Int32(i32::MIN),
            Value::Int32(-123_456),
            Value::Int32(i32::MAX),
            Value::UInt32(u32::MAX),
            Value::Float(0.0),
            Value::Float(-1.5),
            Value::Float(f32::MAX),
            Value::Float(f32::MIN_POSITIVE),
        ] {
            roundtrip(v);
        }
    }

    #[test]
    fn test_big_endian_layout() {
        assert_eq!(
            Value::UInt32(0x1234_5678).encode().unwrap(),
            vec![0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            Value::Float(1.0).encode().unwrap(),
            vec![0x3F, 0x80, 0x00, 0x00]
        );
    }

    #[test]
    fn test_bool_only_one_is_true() {
        assert_eq!(
            Value::decode(ValueType::Bool, &[2]).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            Value::decode(ValueType::Bool, &[1]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_sbyte_sign_extension() {
        assert_eq!(
            Value::decode(ValueType::SByte, &[0x80]).unwrap(),
            Value::SByte(-128)
        );
        assert_eq!(
            Value::decode(ValueType::SByte, &[0x7F]).unwrap(),
            Value::SByte(127)
        );
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(Value::decode(ValueType::Int32, &[0, 1]).is_err());
    }

    #[test]
    fn test_wide_types_have_no_encoding() {
        assert!(Value::Double(1.0).encode().is_err());
        assert!(Value::decode(ValueType::UInt64, &[0; 8]).is_err());
        assert_eq!(ValueType::Int64.wire_size(), None);
    }

    #[test]
    fn test_type_names() {
        let names = [
            ("bool", ValueType::Bool),
            ("BYTE", ValueType::Byte),
            ("SByte", ValueType::SByte),
            ("Double", ValueType::Double),
            ("Float", ValueType::Float),
            ("Single", ValueType::Float),
            ("Int32", ValueType::Int32),
            ("UInt32", ValueType::UInt32),
            ("Int64", ValueType::Int64),
            ("UInt64", ValueType::UInt64),
            ("Int16", ValueType::Int16),
            ("uint16", ValueType::UInt16),
        ];
        for (name, ty) in names {
            assert_eq!(ValueType::from_name(name).unwrap(), ty, "{name}");
        }
        assert!(matches!(
            ValueType::from_name("string"),
            Err(S7Error::UnknownType { .. })
        ));
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(Value::parse(ValueType::Bool, "FALSE").unwrap(), Value::Bool(false));
        assert_eq!(Value::parse(ValueType::Float, " 2.5 ").unwrap(), Value::Float(2.5));
        assert_eq!(Value::parse(ValueType::UInt64, "18446744073709551615").unwrap(), Value::UInt64(u64::MAX));
        assert!(Value::parse(ValueType::Bool, "2").is_err());
        assert!(Value::parse(ValueType::UInt16, "-1").is_err());
    }

    #[test]
    fn test_bcd() {
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x59), Some(59));
        assert_eq!(from_bcd(0x5A), None);
    }

    #[test]
    fn test_datetime_century_rule() {
        let late = NaiveDate::from_ymd_opt(1995, 12, 31)
            .unwrap()
            .and_hms_milli_opt(23, 59, 59, 999)
            .unwrap();
        assert_eq!(decode_datetime(&encode_datetime(&late)), late);

        let early = NaiveDate::from_ymd_opt(2089, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 0, 7)
            .unwrap();
        assert_eq!(decode_datetime(&encode_datetime(&early)), early);
    }

    #[test]
    fn test_datetime_day_of_week() {
        // 2024-03-17 is a Sunday
        let dt = NaiveDate::from_ymd_opt(2024, 3, 17)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(encode_datetime(&dt)[7] & 0x0F, 1);
    }

    #[test]
    fn test_datetime_invalid_is_epoch() {
        let epoch = NaiveDateTime::default();
        assert_eq!(decode_datetime(&[0x24, 0x13, 0x01, 0, 0, 0, 0, 0]), epoch);
        assert_eq!(decode_datetime(&[0xAA; 8]), epoch);
        assert_eq!(decode_datetime(&[0x24, 0x02]), epoch);
    }
}
