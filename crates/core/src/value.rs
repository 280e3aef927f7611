//! Value types for table rows
//!
//! This module defines:
//! - ColumnType: the SQL column types a table may declare
//! - Value: a single cell of a row
//!
//! ## Type Rules
//!
//! - Integral values compare equal across widths (`TinyInt(1) == BigInt(1)`)
//!   so that rows saved before a column was widened still match their keys.
//! - Float uses IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`
//! - `Bytes` are not `String`
//!
//! Conversions between column types only happen through [`Value::coerce_to`],
//! which is what restore uses when a column type changed after a snapshot.

use crate::error::CoercionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 8-bit signed integer
    TinyInt,
    /// 16-bit signed integer
    SmallInt,
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    BigInt,
    /// 64-bit IEEE-754 float
    Float,
    /// UTF-8 string
    Varchar,
    /// Raw bytes
    Varbinary,
    /// Microseconds since the Unix epoch
    Timestamp,
}

impl ColumnType {
    /// SQL spelling of the type
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::TinyInt => "TINYINT",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Varbinary => "VARBINARY",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// True for the four integer widths
    pub fn is_integral(&self) -> bool {
        self.integral_range().is_some()
    }

    /// Inclusive value range for integer types
    pub fn integral_range(&self) -> Option<(i64, i64)> {
        match self {
            ColumnType::TinyInt => Some((i8::MIN as i64, i8::MAX as i64)),
            ColumnType::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            ColumnType::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
            ColumnType::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell of a table row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// TINYINT value
    TinyInt(i8),
    /// SMALLINT value
    SmallInt(i16),
    /// INTEGER value
    Integer(i32),
    /// BIGINT value
    BigInt(i64),
    /// FLOAT value
    Float(f64),
    /// VARCHAR value
    String(String),
    /// VARBINARY value
    Bytes(Vec<u8>),
    /// TIMESTAMP value (microseconds since epoch)
    Timestamp(i64),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_integral(), other.as_integral()) {
            return a == b;
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            // IEEE-754: NaN != NaN, -0.0 == 0.0
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Integer(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "VARCHAR",
            Value::Bytes(_) => "VARBINARY",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload of any integral variant, widened to i64
    pub fn as_integral(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as i64 for integral and timestamp values
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Timestamp(v) => Some(*v),
            other => other.as_integral(),
        }
    }

    /// Get as f64 if this is a Float value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[u8] if this is a Bytes value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Canonical byte encoding used for hashing and key comparison.
    ///
    /// Integral values of every width encode identically so the partition a
    /// row hashes to does not change when its column is widened.
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        self.write_key_bytes(&mut out);
        out
    }

    /// Append the canonical key encoding of this value to `out`
    pub fn write_key_bytes(&self, out: &mut Vec<u8>) {
        if let Some(v) = self.as_integral() {
            out.push(1);
            out.extend_from_slice(&v.to_le_bytes());
            return;
        }
        match self {
            Value::Null => out.push(0),
            Value::Float(f) => {
                out.push(2);
                // -0.0 and 0.0 must produce the same key
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                out.extend_from_slice(&normalized.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                out.push(3);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(4);
                out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                out.extend_from_slice(b);
            }
            Value::Timestamp(t) => {
                out.push(5);
                out.extend_from_slice(&t.to_le_bytes());
            }
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Integer(_) | Value::BigInt(_) => {
                unreachable!("integral values are encoded above")
            }
        }
    }

    /// Convert this value to `target`.
    ///
    /// Integer narrowing is range-checked; floats convert to integers only
    /// when they are whole and in range. Null converts to anything.
    pub fn coerce_to(&self, target: ColumnType) -> Result<Value, CoercionError> {
        if self.is_null() {
            return Ok(Value::Null);
        }

        if let Some((min, max)) = target.integral_range() {
            let v = match self {
                Value::Float(f) => {
                    // max + 1 is a power of two, so it is exact where max is not
                    if !f.is_finite() || *f < min as f64 || *f >= max as f64 + 1.0 {
                        return Err(self.out_of_range(target));
                    }
                    if f.fract() != 0.0 {
                        return Err(CoercionError::PrecisionLoss {
                            value: self.to_string(),
                            target,
                        });
                    }
                    *f as i64
                }
                Value::Timestamp(t) => *t,
                other => other.as_integral().ok_or(CoercionError::Incompatible {
                    from: other.type_name(),
                    target,
                })?,
            };
            if v < min || v > max {
                return Err(self.out_of_range(target));
            }
            return Ok(match target {
                ColumnType::TinyInt => Value::TinyInt(v as i8),
                ColumnType::SmallInt => Value::SmallInt(v as i16),
                ColumnType::Integer => Value::Integer(v as i32),
                _ => Value::BigInt(v),
            });
        }

        match (self, target) {
            (Value::Float(f), ColumnType::Float) => Ok(Value::Float(*f)),
            (v, ColumnType::Float) if v.as_integral().is_some() => {
                Ok(Value::Float(v.as_integral().unwrap_or_default() as f64))
            }
            (Value::String(s), ColumnType::Varchar) => Ok(Value::String(s.clone())),
            (v, ColumnType::Varchar) if v.as_integral().is_some() || v.as_f64().is_some() => {
                Ok(Value::String(v.to_string()))
            }
            (Value::Bytes(b), ColumnType::Varbinary) => Ok(Value::Bytes(b.clone())),
            (Value::Timestamp(t), ColumnType::Timestamp) => Ok(Value::Timestamp(*t)),
            (v, ColumnType::Timestamp) if v.as_integral().is_some() => {
                Ok(Value::Timestamp(v.as_integral().unwrap_or_default()))
            }
            (other, target) => Err(CoercionError::Incompatible {
                from: other.type_name(),
                target,
            }),
        }
    }

    /// True if this value can be stored in a column of type `ty` as-is
    pub fn matches_type(&self, ty: ColumnType) -> bool {
        match (self, ty) {
            (Value::Null, _) => true,
            (Value::TinyInt(_), ColumnType::TinyInt)
            | (Value::SmallInt(_), ColumnType::SmallInt)
            | (Value::Integer(_), ColumnType::Integer)
            | (Value::BigInt(_), ColumnType::BigInt)
            | (Value::Float(_), ColumnType::Float)
            | (Value::String(_), ColumnType::Varchar)
            | (Value::Bytes(_), ColumnType::Varbinary)
            | (Value::Timestamp(_), ColumnType::Timestamp) => true,
            _ => false,
        }
    }

    fn out_of_range(&self, target: ColumnType) -> CoercionError {
        CoercionError::OutOfRange {
            value: self.to_string(),
            target,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            Value::Timestamp(t) => write!(f, "{}", t),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
