//! Symbolic S7 addresses.
//!
//! [`parse`] turns strings such as `DB10.DBW4` or `M3.7` into an
//! [`AddressDescriptor`]; [`type_matches`] checks that the shape can carry a
//! value type; [`AddressDescriptor::to_wire`] produces the quadruple used on
//! the wire. Everything here is pure.
//!
//! # Supported shapes
//!
//! Matching is case-insensitive and must consume the whole string. Every
//! number has at most five digits and must fit in `u16`; bit digits are 0-7.
//!
//! | Shape | Example | Width |
//! |-------|---------|-------|
//! | `DB<n>.DB[BWD]<off>` | `DB1.DBW20` | byte/word/dword |
//! | `DB<n>.DBX<off>.<bit>` | `DB1.DBX0.3` | bit |
//! | `P[IQ][BWD]<off>` | `PIW256` | byte/word/dword |
//! | `P[IQ]<off>.<bit>` | `PQ4.0` | bit |
//! | `[IQM][BWD]<off>` | `MD100` | byte/word/dword |
//! | `[IQM]<off>.<bit>` | `I0.1` | bit |
//! | `T<n>` / `C<n>` | `T5` | word |
//!
//! # Example
//!
//! ```
//! use s7_archiver::{parse_address, type_matches, Area, ValueType, WordLength};
//!
//! let addr = parse_address("db515.dbx0.1").unwrap();
//! assert!(type_matches(&addr, ValueType::Bool));
//! assert!(!type_matches(&addr, ValueType::Int16));
//!
//! let wire = addr.to_wire(ValueType::Bool).unwrap();
//! assert_eq!(wire.area, Area::DataBlock);
//! assert_eq!(wire.word_length, WordLength::Bit);
//! assert_eq!(wire.db_number, 515);
//! assert_eq!(wire.start, 1);
//! ```

use std::str::FromStr;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::area::{Area, WordLength};
use crate::codec::ValueType;
use crate::error::{Result, S7Error};

/// Memory space an address points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    /// Data block with its number.
    DataBlock(u16),
    /// Peripheral inputs.
    PeripheralInput,
    /// Peripheral outputs.
    PeripheralOutput,
    /// Process image inputs.
    Input,
    /// Process image outputs.
    Output,
    /// Markers.
    Marker,
    /// Timers.
    Timer,
    /// Counters.
    Counter,
}

impl Space {
    /// Wire area for this space. Both peripheral directions share one area.
    pub fn area(self) -> Area {
        match self {
            Space::DataBlock(_) => Area::DataBlock,
            Space::PeripheralInput | Space::PeripheralOutput => Area::Peripheral,
            Space::Input => Area::Input,
            Space::Output => Area::Output,
            Space::Marker => Area::Marker,
            Space::Timer => Area::Timer,
            Space::Counter => Area::Counter,
        }
    }
}

/// Element width encoded in the address shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementWidth {
    /// Single bit (`X` or `<off>.<bit>`).
    Bit,
    /// Byte (`B`).
    Byte,
    /// Word (`W`, timers, counters).
    Word,
    /// Double word (`D`).
    DWord,
}

/// Parsed form of a symbolic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressDescriptor {
    /// Memory space, including the block number for data blocks.
    pub space: Space,
    /// Element width.
    pub width: ElementWidth,
    /// Byte offset, or element number for timers and counters.
    pub offset: u16,
    /// Bit number for bit shapes, 0 otherwise.
    pub bit: u8,
}

/// Wire quadruple for one addressed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireAddress {
    /// Area code.
    pub area: Area,
    /// Word length code.
    pub word_length: WordLength,
    /// Data block number, 0 outside data blocks.
    pub db_number: u16,
    /// Bit address for bit shapes, byte offset or element number otherwise.
    pub start: u32,
}

impl AddressDescriptor {
    /// Data block number, 0 outside data blocks.
    pub fn db_number(&self) -> u16 {
        match self.space {
            Space::DataBlock(n) => n,
            _ => 0,
        }
    }

    /// Translates the address into the wire quadruple for `ty`.
    ///
    /// The word length follows the value type, so `DB1.DBB0` yields Byte for
    /// `byte` and Char for `sbyte`. Timers and counters always use their own
    /// word lengths.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::TypeMismatch`] when [`type_matches`] is false.
    pub fn to_wire(&self, ty: ValueType) -> Result<WireAddress> {
        let word_length = match ty.word_length() {
            Some(wl) if type_matches(self, ty) => wl,
            _ => {
                return Err(S7Error::TypeMismatch {
                    address: self.to_string(),
                    value_type: ty.to_string(),
                })
            }
        };
        let area = self.space.area();
        let start = match self.width {
            ElementWidth::Bit => u32::from(self.offset) * 8 + u32::from(self.bit),
            _ => u32::from(self.offset),
        };
        Ok(WireAddress {
            area,
            word_length: area.coerce_word_length(word_length),
            db_number: self.db_number(),
            start,
        })
    }
}

impl std::fmt::Display for AddressDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = match self.width {
            ElementWidth::Bit => "",
            ElementWidth::Byte => "B",
            ElementWidth::Word => "W",
            ElementWidth::DWord => "D",
        };
        let prefix = match self.space {
            Space::DataBlock(n) => {
                return match self.width {
                    ElementWidth::Bit => write!(f, "DB{}.DBX{}.{}", n, self.offset, self.bit),
                    _ => write!(f, "DB{}.DB{}{}", n, width, self.offset),
                }
            }
            Space::Timer => return write!(f, "T{}", self.offset),
            Space::Counter => return write!(f, "C{}", self.offset),
            Space::PeripheralInput => "PI",
            Space::PeripheralOutput => "PQ",
            Space::Input => "I",
            Space::Output => "Q",
            Space::Marker => "M",
        };
        match self.width {
            ElementWidth::Bit => write!(f, "{}{}.{}", prefix, self.offset, self.bit),
            _ => write!(f, "{}{}{}", prefix, width, self.offset),
        }
    }
}

impl FromStr for AddressDescriptor {
    type Err = S7Error;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

#[derive(Clone, Copy)]
enum Shape {
    DbWord,
    DbBit,
    PeripheralWord,
    PeripheralBit,
    ImageWord,
    ImageBit,
    TimerCounter,
}

const PATTERNS: [(Shape, &str); 7] = [
    (Shape::DbWord, r"^(?i)DB([0-9]{1,5})\.DB([BWD])([0-9]{1,5})$"),
    (Shape::DbBit, r"^(?i)DB([0-9]{1,5})\.DBX([0-9]{1,5})\.([0-7])$"),
    (Shape::PeripheralWord, r"^(?i)P([IQ])([BWD])([0-9]{1,5})$"),
    (Shape::PeripheralBit, r"^(?i)P([IQ])([0-9]{1,5})\.([0-7])$"),
    (Shape::ImageWord, r"^(?i)([IQM])([BWD])([0-9]{1,5})$"),
    (Shape::ImageBit, r"^(?i)([IQM])([0-9]{1,5})\.([0-7])$"),
    (Shape::TimerCounter, r"^(?i)([TC])([0-9]{1,5})$"),
];

/// Compiled [`PATTERNS`], in the same order.
fn shapes() -> &'static [(Shape, Regex)] {
    static SHAPES: OnceLock<Vec<(Shape, Regex)>> = OnceLock::new();
    SHAPES.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|&(shape, pattern)| Regex::new(pattern).ok().map(|re| (shape, re)))
            .collect()
    })
}

/// Parses a symbolic address.
///
/// # Errors
///
/// Returns [`S7Error::InvalidAddress`] if no shape matches the whole string
/// or a number exceeds 65535.
///
/// # Example
///
/// ```
/// use s7_archiver::{parse_address, ElementWidth, Space};
///
/// let addr = parse_address("PIW256").unwrap();
/// assert_eq!(addr.space, Space::PeripheralInput);
/// assert_eq!(addr.width, ElementWidth::Word);
/// assert_eq!(addr.offset, 256);
///
/// assert!(parse_address("DB1.DBW70000").is_err());
/// assert!(parse_address("M0.8").is_err());
/// assert!(parse_address(" MW2").is_err());
/// ```
pub fn parse(address: &str) -> Result<AddressDescriptor> {
    let (shape, caps) = shapes()
        .iter()
        .find_map(|(shape, re)| re.captures(address).map(|caps| (*shape, caps)))
        .ok_or_else(|| S7Error::invalid_address(address, "no address shape matches"))?;

    let num = |i: usize| number(address, &caps, i);
    let letter = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().chars().next())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_default()
    };

    let descriptor = match shape {
        Shape::DbWord => AddressDescriptor {
            space: Space::DataBlock(num(1)?),
            width: width_of(letter(2)),
            offset: num(3)?,
            bit: 0,
        },
        Shape::DbBit => AddressDescriptor {
            space: Space::DataBlock(num(1)?),
            width: ElementWidth::Bit,
            offset: num(2)?,
            bit: bit_of(&caps, 3),
        },
        Shape::PeripheralWord => AddressDescriptor {
            space: peripheral(letter(1)),
            width: width_of(letter(2)),
            offset: num(3)?,
            bit: 0,
        },
        Shape::PeripheralBit => AddressDescriptor {
            space: peripheral(letter(1)),
            width: ElementWidth::Bit,
            offset: num(2)?,
            bit: bit_of(&caps, 3),
        },
        Shape::ImageWord => AddressDescriptor {
            space: image(letter(1)),
            width: width_of(letter(2)),
            offset: num(3)?,
            bit: 0,
        },
        Shape::ImageBit => AddressDescriptor {
            space: image(letter(1)),
            width: ElementWidth::Bit,
            offset: num(2)?,
            bit: bit_of(&caps, 3),
        },
        Shape::TimerCounter => AddressDescriptor {
            space: if letter(1) == 'T' {
                Space::Timer
            } else {
                Space::Counter
            },
            width: ElementWidth::Word,
            offset: num(2)?,
            bit: 0,
        },
    };
    Ok(descriptor)
}

fn number(address: &str, caps: &Captures<'_>, index: usize) -> Result<u16> {
    caps.get(index)
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .ok_or_else(|| S7Error::invalid_address(address, "number out of range 0-65535"))
}

fn bit_of(caps: &Captures<'_>, index: usize) -> u8 {
    caps.get(index)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or_default()
}

fn width_of(letter: char) -> ElementWidth {
    match letter {
        'B' => ElementWidth::Byte,
        'W' => ElementWidth::Word,
        _ => ElementWidth::DWord,
    }
}

fn peripheral(letter: char) -> Space {
    if letter == 'I' {
        Space::PeripheralInput
    } else {
        Space::PeripheralOutput
    }
}

fn image(letter: char) -> Space {
    match letter {
        'I' => Space::Input,
        'Q' => Space::Output,
        _ => Space::Marker,
    }
}

/// Returns true if a value of type `ty` can be read from `address`.
///
/// | Type | Accepted shapes |
/// |------|-----------------|
/// | bool | bit shapes |
/// | byte, sbyte | `B` shapes |
/// | uint16 | `W` shapes, timers, counters |
/// | int16 | `W` shapes |
/// | uint32, int32, float | `D` shapes |
///
/// No shape accepts double, int64 or uint64.
pub fn type_matches(address: &AddressDescriptor, ty: ValueType) -> bool {
    let timer_or_counter = matches!(address.space, Space::Timer | Space::Counter);
    match ty {
        ValueType::Bool => address.width == ElementWidth::Bit,
        ValueType::Byte | ValueType::SByte => address.width == ElementWidth::Byte,
        ValueType::UInt16 => address.width == ElementWidth::Word,
        ValueType::Int16 => address.width == ElementWidth::Word && !timer_or_counter,
        ValueType::UInt32 | ValueType::Int32 | ValueType::Float => {
            address.width == ElementWidth::DWord
        }
        ValueType::Double | ValueType::Int64 | ValueType::UInt64 => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for (_, pattern) in PATTERNS {
            assert!(Regex::new(pattern).is_ok(), "{pattern}");
        }
        assert_eq!(shapes().len(), PATTERNS.len());
    }

    #[test]
    fn test_every_shape() {
        let cases = [
            ("DB1.DBB2", Space::DataBlock(1), ElementWidth::Byte, 2, 0),
            ("DB1.DBW2", Space::DataBlock(1), ElementWidth::Word, 2, 0),
            ("DB1.DBD2", Space::DataBlock(1), ElementWidth::DWord, 2, 0),
            ("DB65535.DBX65535.7", Space::DataBlock(65535), ElementWidth::Bit, 65535, 7),
            ("PIB1", Space::PeripheralInput, ElementWidth::Byte, 1, 0),
            ("PQW2", Space::PeripheralOutput, ElementWidth::Word, 2, 0),
            ("PID3", Space::PeripheralInput, ElementWidth::DWord, 3, 0),
            ("PQ4.5", Space::PeripheralOutput, ElementWidth::Bit, 4, 5),
            ("IB0", Space::Input, ElementWidth::Byte, 0, 0),
            ("QW10", Space::Output, ElementWidth::Word, 10, 0),
            ("MD100", Space::Marker, ElementWidth::DWord, 100, 0),
            ("M3.7", Space::Marker, ElementWidth::Bit, 3, 7),
            ("I0.0", Space::Input, ElementWidth::Bit, 0, 0),
            ("T5", Space::Timer, ElementWidth::Word, 5, 0),
            ("C12", Space::Counter, ElementWidth::Word, 12, 0),
        ];
        for (text, space, width, offset, bit) in cases {
            let d = parse(text).unwrap_or_else(|e| panic!("{text}: {e}"));
            assert_eq!(d.space, space, "{text}");
            assert_eq!(d.width, width, "{text}");
            assert_eq!(d.offset, offset, "{text}");
            assert_eq!(d.bit, bit, "{text}");
            assert_eq!(d.to_string(), text);
        }
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(parse("db2.dbw4").unwrap(), parse("DB2.DBW4").unwrap());
        assert_eq!(parse("pqb1").unwrap().space, Space::PeripheralOutput);
        assert_eq!(parse("t1").unwrap().space, Space::Timer);
    }

    #[test]
    fn test_rejects_extra_characters() {
        for text in [
            " MW2", "MW2 ", "MW2x", "xMW2", "DB1.DBW2.1", "DB1.DBX2", "M0.8", "M0.", "I0.12",
            "DB1DBW2", "MX0", "T", "DB.DBW1", "PW2", "", "M0,1",
        ] {
            assert!(parse(text).is_err(), "{text:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(parse("DB65536.DBW0").is_err());
        assert!(parse("DB1.DBW65536").is_err());
        assert!(parse("MW99999").is_err());
        assert!(parse("T65536").is_err());
        assert!(parse("MW123456").is_err());
        assert!(parse("MW65535").is_ok());
    }

    #[test]
    fn test_type_matches_table() {
        let all = [
            ValueType::Bool,
            ValueType::Byte,
            ValueType::SByte,
            ValueType::Int16,
            ValueType::UInt16,
            ValueType::Int32,
            ValueType::UInt32,
            ValueType::Float,
            ValueType::Double,
            ValueType::Int64,
            ValueType::UInt64,
        ];
        let expect: [(&str, &[ValueType]); 6] = [
            ("DB1.DBX0.0", &[ValueType::Bool]),
            ("MB1", &[ValueType::Byte, ValueType::SByte]),
            ("DB1.DBW0", &[ValueType::Int16, ValueType::UInt16]),
            ("PID0", &[ValueType::Int32, ValueType::UInt32, ValueType::Float]),
            ("T1", &[ValueType::UInt16]),
            ("C1", &[ValueType::UInt16]),
        ];
        for (text, allowed) in expect {
            let d = parse(text).unwrap();
            for ty in all {
                assert_eq!(
                    type_matches(&d, ty),
                    allowed.contains(&ty),
                    "{text} with {ty}"
                );
            }
        }
    }

    #[test]
    fn test_to_wire() {
        let wire = parse("M3.7").unwrap().to_wire(ValueType::Bool).unwrap();
        assert_eq!(wire.area, Area::Marker);
        assert_eq!(wire.start, 31);

        let wire = parse("PQW4").unwrap().to_wire(ValueType::Int16).unwrap();
        assert_eq!(wire.area, Area::Peripheral);
        assert_eq!(wire.word_length, WordLength::Int);
        assert_eq!(wire.db_number, 0);
        assert_eq!(wire.start, 4);

        let wire = parse("DB7.DBB1").unwrap().to_wire(ValueType::SByte).unwrap();
        assert_eq!(wire.word_length, WordLength::Char);
        assert_eq!(wire.db_number, 7);

        let wire = parse("T9").unwrap().to_wire(ValueType::UInt16).unwrap();
        assert_eq!(wire.area, Area::Timer);
        assert_eq!(wire.word_length, WordLength::Timer);
        assert_eq!(wire.start, 9);

        let err = parse("DB1.DBW0").unwrap().to_wire(ValueType::Bool);
        assert!(matches!(err, Err(S7Error::TypeMismatch { .. })));
    }
}
