//! Packed binary layouts for register sensors.
//!
//! A structure is written in the compact notation used by Python's `struct`
//! module: an optional byte-order prefix followed by format codes, each with
//! an optional repeat count (`">2h"`, `"6s"`, `">Hxx?b"`). Only standard
//! sizes are supported and there is never any alignment padding.
//!
//! | Code | Value          | Bytes |
//! |------|----------------|-------|
//! | `x`  | pad (no value) | 1     |
//! | `c`  | 1-byte bytes   | 1     |
//! | `b` / `B` | i8 / u8   | 1     |
//! | `?`  | bool           | 1     |
//! | `h` / `H` | i16 / u16 | 2     |
//! | `i` `l` / `I` `L` | i32 / u32 | 4 |
//! | `q` / `Q` | i64 / u64 | 8     |
//! | `e` / `f` / `d` | f16 / f32 / f64 | 2 / 4 / 8 |
//! | `s`  | byte string, count is its length | n |
//! | `p`  | length-prefixed byte string      | n |

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use crate::config::{ConfigError, DataKind};
use crate::decode::{DecodeError, Scalar};

/// Errors from parsing a structure format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructError {
    #[error("bad char '{0}' in struct format")]
    BadChar(char),
    #[error("repeat count given without format specifier")]
    DanglingCount,
    #[error("total struct size too long")]
    TooLarge,
}

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    fn from_prefix(c: char) -> Option<Self> {
        match c {
            '>' | '!' => Some(Endian::Big),
            '<' => Some(Endian::Little),
            // Native order, but standard sizes: there is no native alignment here.
            '=' | '@' => Some(if cfg!(target_endian = "little") {
                Endian::Little
            } else {
                Endian::Big
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Code {
    Pad,
    Char,
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    F32,
    F64,
    Bytes,
    Pascal,
}

impl Code {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'x' => Code::Pad,
            'c' => Code::Char,
            'b' => Code::I8,
            'B' => Code::U8,
            '?' => Code::Bool,
            'h' => Code::I16,
            'H' => Code::U16,
            'i' | 'l' => Code::I32,
            'I' | 'L' => Code::U32,
            'q' => Code::I64,
            'Q' => Code::U64,
            'e' => Code::F16,
            'f' => Code::F32,
            'd' => Code::F64,
            's' => Code::Bytes,
            'p' => Code::Pascal,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Code::Pad | Code::Char | Code::I8 | Code::U8 | Code::Bool => 1,
            Code::I16 | Code::U16 | Code::F16 => 2,
            Code::I32 | Code::U32 | Code::F32 => 4,
            Code::I64 | Code::U64 | Code::F64 => 8,
            // The repeat count is the length for string codes.
            Code::Bytes | Code::Pascal => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    code: Code,
    count: usize,
}

/// A parsed structure format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructFormat {
    source: String,
    endian: Endian,
    fields: Vec<Field>,
    size: usize,
}

impl StructFormat {
    /// Parse a format string.
    ///
    /// Without a byte-order prefix fields are big-endian, the order Modbus
    /// puts on the wire.
    pub fn parse(format: &str) -> Result<Self, StructError> {
        let mut chars = format.chars().peekable();

        let endian = match chars.peek().copied().and_then(Endian::from_prefix) {
            Some(endian) => {
                chars.next();
                endian
            }
            None => Endian::Big,
        };

        let mut fields = Vec::new();
        let mut size = 0usize;

        while let Some(c) = chars.next() {
            if c.is_whitespace() {
                continue;
            }

            let (count, code_char) = if let Some(digit) = c.to_digit(10) {
                let mut count = digit as usize;
                loop {
                    match chars.next() {
                        Some(d) if d.is_ascii_digit() => {
                            count = count
                                .checked_mul(10)
                                .and_then(|n| n.checked_add(d as usize - '0' as usize))
                                .ok_or(StructError::TooLarge)?;
                        }
                        Some(code) => break (count, code),
                        None => return Err(StructError::DanglingCount),
                    }
                }
            } else {
                (1, c)
            };

            let code = Code::from_char(code_char).ok_or(StructError::BadChar(code_char))?;
            let bytes = code.size().checked_mul(count).ok_or(StructError::TooLarge)?;
            size = size.checked_add(bytes).ok_or(StructError::TooLarge)?;
            fields.push(Field { code, count });
        }

        Ok(Self {
            source: format.to_string(),
            endian,
            fields,
            size,
        })
    }

    /// The format string as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of bytes the format consumes.
    pub fn byte_size(&self) -> usize {
        self.size
    }

    /// Unpack `data` into scalars, in format order.
    pub fn unpack(&self, data: &[u8]) -> Result<Vec<Scalar>, DecodeError> {
        if data.len() != self.size {
            return Err(DecodeError::Length {
                expected: self.size,
                actual: data.len(),
            });
        }

        let mut values = Vec::new();
        let mut pos = 0;

        for field in &self.fields {
            match field.code {
                Code::Pad => pos += field.count,
                Code::Bytes => {
                    values.push(Scalar::Bytes(data[pos..pos + field.count].to_vec()));
                    pos += field.count;
                }
                Code::Pascal => {
                    let chunk = &data[pos..pos + field.count];
                    let value = match chunk.split_first() {
                        Some((&len, rest)) => rest[..(len as usize).min(rest.len())].to_vec(),
                        None => Vec::new(),
                    };
                    values.push(Scalar::Bytes(value));
                    pos += field.count;
                }
                code => {
                    let width = code.size();
                    for _ in 0..field.count {
                        values.push(self.scalar(code, &data[pos..pos + width]));
                        pos += width;
                    }
                }
            }
        }

        Ok(values)
    }

    fn scalar(&self, code: Code, raw: &[u8]) -> Scalar {
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..raw.len()];
        bytes.copy_from_slice(raw);
        if self.endian == Endian::Little {
            bytes.reverse();
        }
        // Big-endian from here on.
        let unsigned = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        match code {
            Code::Bool => Scalar::Bool(unsigned != 0),
            Code::I8 => Scalar::Int(i128::from(unsigned as u8 as i8)),
            Code::I16 => Scalar::Int(i128::from(unsigned as u16 as i16)),
            Code::I32 => Scalar::Int(i128::from(unsigned as u32 as i32)),
            Code::I64 => Scalar::Int(i128::from(unsigned as i64)),
            Code::U8 | Code::U16 | Code::U32 | Code::U64 => Scalar::Int(i128::from(unsigned)),
            Code::F16 => Scalar::Float(f16_to_f64(unsigned as u16)),
            Code::F32 => Scalar::Float(f64::from(f32::from_bits(unsigned as u32))),
            Code::F64 => Scalar::Float(f64::from_bits(unsigned)),
            Code::Char | Code::Pad | Code::Bytes | Code::Pascal => Scalar::Bytes(raw.to_vec()),
        }
    }
}

impl fmt::Display for StructFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// IEEE 754 binary16 to f64.
fn f16_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f64::from(bits & 0x03ff);

    match exponent {
        0 => sign * mantissa * 2f64.powi(-24),
        0x1f if mantissa == 0.0 => sign * f64::INFINITY,
        0x1f => f64::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f64.powi(exponent - 15),
    }
}

/// Struct codes for the numeric data kinds, keyed by register count.
static DEFAULT_STRUCT_FORMAT: LazyLock<HashMap<(DataKind, u16), &'static str>> =
    LazyLock::new(|| {
        HashMap::from([
            ((DataKind::Int, 1), "h"),
            ((DataKind::Int, 2), "i"),
            ((DataKind::Int, 4), "q"),
            ((DataKind::Uint, 1), "H"),
            ((DataKind::Uint, 2), "I"),
            ((DataKind::Uint, 4), "Q"),
            ((DataKind::Float, 1), "e"),
            ((DataKind::Float, 2), "f"),
            ((DataKind::Float, 4), "d"),
        ])
    });

/// A structure validated against its sensor's register count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFormat {
    format: StructFormat,
}

impl ResolvedFormat {
    pub fn format(&self) -> &StructFormat {
        &self.format
    }

    pub fn byte_size(&self) -> usize {
        self.format.byte_size()
    }
}

/// Pick the structure for a sensor and check it covers exactly `count` registers.
pub fn resolve(
    name: &str,
    kind: DataKind,
    count: u16,
    structure: Option<&str>,
) -> Result<ResolvedFormat, ConfigError> {
    if count == 0 {
        return Err(ConfigError::ZeroCount {
            name: name.to_string(),
        });
    }

    let source = match kind {
        DataKind::String => format!("{}s", usize::from(count) * 2),
        DataKind::Custom => structure
            .ok_or_else(|| ConfigError::MissingStructure {
                name: name.to_string(),
            })?
            .to_string(),
        DataKind::Int | DataKind::Uint | DataKind::Float => {
            let code = DEFAULT_STRUCT_FORMAT.get(&(kind, count)).ok_or_else(|| {
                ConfigError::UnsupportedType {
                    name: name.to_string(),
                    kind,
                    count,
                }
            })?;
            format!(">{}", code)
        }
    };

    let format = StructFormat::parse(&source).map_err(|source_err| {
        ConfigError::InvalidStructure {
            name: name.to_string(),
            structure: source.clone(),
            source: source_err,
        }
    })?;

    if format.byte_size() != usize::from(count) * 2 {
        return Err(ConfigError::SizeMismatch {
            name: name.to_string(),
            size: format.byte_size(),
            count,
        });
    }

    Ok(ResolvedFormat { format })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_entries_match_register_count() {
        for (&(kind, count), code) in DEFAULT_STRUCT_FORMAT.iter() {
            let resolved = resolve("s", kind, count, None).unwrap();
            assert_eq!(resolved.byte_size(), usize::from(count) * 2, "{kind} x{count}");
            assert_eq!(resolved.format().as_str(), format!(">{}", code));
        }
    }

    #[test]
    fn test_unsupported_counts_rejected() {
        for kind in [DataKind::Int, DataKind::Uint, DataKind::Float] {
            for count in [3u16, 5, 8] {
                assert!(matches!(
                    resolve("s", kind, count, None),
                    Err(ConfigError::UnsupportedType { .. })
                ));
            }
        }
    }

    #[test]
    fn test_string_always_resolves() {
        for count in 1..=10u16 {
            let resolved = resolve("s", DataKind::String, count, None).unwrap();
            assert_eq!(resolved.format().as_str(), format!("{}s", count * 2));
            assert_eq!(resolved.byte_size(), usize::from(count) * 2);
        }
    }

    #[test]
    fn test_custom_structure() {
        let resolved = resolve("s", DataKind::Custom, 2, Some(">2H")).unwrap();
        assert_eq!(resolved.format().as_str(), ">2H");

        assert!(matches!(
            resolve("s", DataKind::Custom, 2, None),
            Err(ConfigError::MissingStructure { .. })
        ));
    }

    #[test]
    fn test_custom_size_mismatch() {
        let err = resolve("meter", DataKind::Custom, 2, Some(">q")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::SizeMismatch { size: 8, count: 2, .. }
        ));
    }

    #[test]
    fn test_custom_malformed() {
        let err = resolve("meter", DataKind::Custom, 1, Some(">z")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidStructure {
                source: StructError::BadChar('z'),
                ..
            }
        ));
    }

    #[test]
    fn test_zero_count_rejected() {
        assert!(matches!(
            resolve("s", DataKind::String, 0, None),
            Err(ConfigError::ZeroCount { .. })
        ));
    }

    #[test]
    fn test_parse_sizes() {
        let cases = [
            (">h", 2),
            ("h", 2),
            ("<i", 4),
            ("!q", 8),
            ("=e", 2),
            ("@d", 8),
            (">2H", 4),
            (">Hxx?b", 6),
            ("10s", 10),
            ("4p", 4),
            (">h i", 6),
            ("", 0),
            ("0s", 0),
        ];

        for (format, size) in cases {
            assert_eq!(StructFormat::parse(format).unwrap().byte_size(), size, "{format}");
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(StructFormat::parse(">n"), Err(StructError::BadChar('n')));
        assert_eq!(StructFormat::parse("P"), Err(StructError::BadChar('P')));
        assert_eq!(StructFormat::parse(">2"), Err(StructError::DanglingCount));
        assert_eq!(StructFormat::parse("2 h"), Err(StructError::BadChar(' ')));
        assert_eq!(
            StructFormat::parse("99999999999999999999999h"),
            Err(StructError::TooLarge)
        );
    }

    #[test]
    fn test_unpack_integers() {
        let format = StructFormat::parse(">hHbB").unwrap();
        let values = format.unpack(&[0xff, 0xfe, 0xff, 0xfe, 0x80, 0x80]).unwrap();
        assert_eq!(
            values,
            vec![
                Scalar::Int(-2),
                Scalar::Int(65534),
                Scalar::Int(-128),
                Scalar::Int(128)
            ]
        );
    }

    #[test]
    fn test_unpack_little_endian() {
        let format = StructFormat::parse("<I").unwrap();
        let values = format.unpack(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(values, vec![Scalar::Int(0x0403_0201)]);
    }

    #[test]
    fn test_unpack_floats() {
        let format = StructFormat::parse(">efd").unwrap();
        let mut data = vec![0x3c, 0x00];
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.extend_from_slice(&(-0.25f64).to_be_bytes());

        let values = format.unpack(&data).unwrap();
        assert_eq!(
            values,
            vec![Scalar::Float(1.0), Scalar::Float(1.5), Scalar::Float(-0.25)]
        );
    }

    #[test]
    fn test_half_float_special_values() {
        assert_eq!(f16_to_f64(0xc000), -2.0);
        assert_eq!(f16_to_f64(0x7c00), f64::INFINITY);
        assert!(f16_to_f64(0x7e00).is_nan());
        assert_eq!(f16_to_f64(0x0001), 2f64.powi(-24));
    }

    #[test]
    fn test_unpack_strings_and_padding() {
        let format = StructFormat::parse("2sx?3pc").unwrap();
        let data = [b'o', b'k', 0x00, 0x01, 0x05, b'a', b'b', b'Z'];
        let values = format.unpack(&data).unwrap();

        assert_eq!(
            values,
            vec![
                Scalar::Bytes(b"ok".to_vec()),
                Scalar::Bool(true),
                Scalar::Bytes(b"ab".to_vec()),
                Scalar::Bytes(b"Z".to_vec()),
            ]
        );
    }

    #[test]
    fn test_unpack_wrong_length() {
        let format = StructFormat::parse(">i").unwrap();
        assert_eq!(
            format.unpack(&[0, 1]),
            Err(DecodeError::Length {
                expected: 4,
                actual: 2
            })
        );
    }
}
