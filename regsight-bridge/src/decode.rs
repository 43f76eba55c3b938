//! Register words to sensor text.
//!
//! Words are laid out most significant byte first, optionally after
//! reversing the register order, then unpacked with the sensor's
//! [`StructFormat`](crate::structure::StructFormat). A single numeric value
//! gets `scale * value + offset` and the configured precision. Formats that
//! yield several values are reported as a comma-separated list of the raw
//! values with no scaling, which is what existing dashboards expect.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::DataKind;
use crate::structure::ResolvedFormat;

/// Errors from decoding a register block that passed configuration.
///
/// None of these occur for a block of the configured length, except invalid
/// UTF-8 in a string sensor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected {expected} bytes of register data, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("register text is not valid UTF-8: {0}")]
    Text(#[from] std::string::FromUtf8Error),
    #[error("structure produced no values")]
    Empty,
}

/// A configured scale or offset, kept integral when written as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Default for Number {
    fn default() -> Self {
        Number::Int(0)
    }
}

impl From<Number> for Numeric {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Numeric::Int(i128::from(i)),
            Number::Float(f) => Numeric::Float(f),
        }
    }
}

/// One value unpacked from a structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i128),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => f.write_str(&float_repr(*v)),
            Scalar::Bool(true) => f.write_str("True"),
            Scalar::Bool(false) => f.write_str("False"),
            Scalar::Bytes(b) => f.write_str(&bytes_repr(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Int(i128),
    Float(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }

    fn mul(self, other: Numeric) -> Numeric {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => a
                .checked_mul(b)
                .map_or_else(|| Numeric::Float(a as f64 * b as f64), Numeric::Int),
            _ => Numeric::Float(self.as_f64() * other.as_f64()),
        }
    }

    fn add(self, other: Numeric) -> Numeric {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => a
                .checked_add(b)
                .map_or_else(|| Numeric::Float(a as f64 + b as f64), Numeric::Int),
            _ => Numeric::Float(self.as_f64() + other.as_f64()),
        }
    }
}

/// Lay register words out as bytes, most significant byte first.
///
/// With `reverse_order` the registers (not the bytes within them) are taken
/// last to first.
pub fn assemble_bytes(words: &[u16], reverse_order: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    if reverse_order {
        for word in words.iter().rev() {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
    } else {
        for word in words {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
    }
    bytes
}

/// Decoding settings of one register sensor.
#[derive(Debug, Clone)]
pub struct ValueDecoder {
    format: ResolvedFormat,
    kind: DataKind,
    reverse_order: bool,
    scale: Number,
    offset: Number,
    precision: usize,
}

impl ValueDecoder {
    pub fn new(
        format: ResolvedFormat,
        kind: DataKind,
        reverse_order: bool,
        scale: Number,
        offset: Number,
        precision: u32,
    ) -> Self {
        Self {
            format,
            kind,
            reverse_order,
            scale,
            offset,
            precision: precision as usize,
        }
    }

    pub fn format(&self) -> &ResolvedFormat {
        &self.format
    }

    /// Decode one register block into the sensor's text value.
    pub fn decode(&self, words: &[u16]) -> Result<String, DecodeError> {
        let bytes = assemble_bytes(words, self.reverse_order);

        if self.kind == DataKind::String {
            if bytes.len() != self.format.byte_size() {
                return Err(DecodeError::Length {
                    expected: self.format.byte_size(),
                    actual: bytes.len(),
                });
            }
            return Ok(String::from_utf8(bytes)?);
        }

        let mut values = self.format.format().unpack(&bytes)?;
        match values.len() {
            0 => Err(DecodeError::Empty),
            1 => Ok(self.transform(values.remove(0))),
            _ => Ok(values
                .iter()
                .map(Scalar::to_string)
                .collect::<Vec<_>>()
                .join(",")),
        }
    }

    fn transform(&self, value: Scalar) -> String {
        let raw = match value {
            Scalar::Int(i) => Numeric::Int(i),
            Scalar::Float(f) => Numeric::Float(f),
            other => return other.to_string(),
        };

        let scaled = Numeric::from(self.scale).mul(raw).add(self.offset.into());
        match scaled {
            Numeric::Int(i) if self.precision == 0 => i.to_string(),
            other => fixed_point(other.as_f64(), self.precision),
        }
    }
}

/// Fixed-point text with `precision` decimals.
///
/// Rounds half to even on the exact binary value, so 2.5 becomes "2" and
/// 0.125 becomes "0.12".
pub fn fixed_point(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    format!("{:.*}", precision, value)
}

/// Shortest round-trip text of a float.
///
/// Integral values keep a trailing ".0"; values below 1e-4 or from 1e16 up
/// switch to exponent notation with a signed, two-digit exponent.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{:e}", value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let n = digits.len() as i32;
    let point = exp + 1;

    if !(-4..16).contains(&exp) {
        let (first, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() {
            String::new()
        } else {
            format!(".{}", rest)
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{}{}{}e{}{:02}", sign, first, fraction, exp_sign, exp.abs());
    }

    if point <= 0 {
        format!("{}0.{}{}", sign, "0".repeat((-point) as usize), digits)
    } else if point >= n {
        format!("{}{}{}.0", sign, digits, "0".repeat((point - n) as usize))
    } else {
        let (int_part, frac_part) = digits.split_at(point as usize);
        format!("{}{}.{}", sign, int_part, frac_part)
    }
}

/// Quoted, escaped text of a byte string, e.g. `b'ok\x00'`.
pub fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            _ if b as char == quote => {
                out.push('\\');
                out.push(quote);
            }
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push(quote);
    out
}
