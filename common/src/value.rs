use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::Error;

/// The declared type of a column, stable across the on-disk schema encoding.
///
/// The discriminant is persisted (see `catalog::codec`), so reordering or
/// removing a variant is a breaking change to every stored schema.
#[derive(IntoPrimitive, TryFromPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum DataType {
    TinyInt = 0,
    SmallInt = 1,
    Int = 2,
    BigInt = 3,
    Double = 4,
    Float = 5,
    Timestamp = 6,
    Boolean = 7,
    Text = 8,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::TinyInt => "TinyInt",
            DataType::SmallInt => "SmallInt",
            DataType::Int => "Int",
            DataType::BigInt => "BigInt",
            DataType::Double => "Double",
            DataType::Float => "Float",
            DataType::Timestamp => "Timestamp",
            DataType::Boolean => "Boolean",
            DataType::Text => "Text",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TINYINT" => Some(DataType::TinyInt),
            "SMALLINT" => Some(DataType::SmallInt),
            "INT" => Some(DataType::Int),
            "BIGINT" => Some(DataType::BigInt),
            "DOUBLE" => Some(DataType::Double),
            "FLOAT" => Some(DataType::Float),
            "TIMESTAMP" => Some(DataType::Timestamp),
            "BOOLEAN" => Some(DataType::Boolean),
            "TEXT" => Some(DataType::Text),
            _ => None,
        }
    }

    fn int_bounds(self) -> Option<(i64, i64)> {
        match self {
            DataType::TinyInt => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

/// A fully-typed storage value. This is both the runtime representation
/// produced by coercion (§4.3) and the shape handed back to clients.
///
/// Timestamps are always `(seconds, nanoseconds)`, regardless of which of
/// the three wire shapes produced them -- coercion happens in exactly one
/// place, see [`Value::coerce`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Float(f32),
    Timestamp(i64, i32),
    Boolean(bool),
    Text(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::TinyInt(_) => DataType::TinyInt,
            Value::SmallInt(_) => DataType::SmallInt,
            Value::Int(_) => DataType::Int,
            Value::BigInt(_) => DataType::BigInt,
            Value::Double(_) => DataType::Double,
            Value::Float(_) => DataType::Float,
            Value::Timestamp(_, _) => DataType::Timestamp,
            Value::Boolean(_) => DataType::Boolean,
            Value::Text(_) => DataType::Text,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::TinyInt(v) => Some(v as i64),
            Value::SmallInt(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::BigInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            Value::Float(v) => Some(v as f64),
            Value::TinyInt(v) => Some(v as f64),
            Value::SmallInt(v) => Some(v as f64),
            Value::Int(v) => Some(v as f64),
            Value::BigInt(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<(i64, i32)> {
        match *self {
            Value::Timestamp(s, n) => Some((s, n)),
            _ => None,
        }
    }

    /// Scale this value by a multiplicative adjustment factor (§4.5.5).
    /// Non-numeric values pass through untouched.
    pub fn scaled(&self, factor: f64) -> Value {
        match self {
            Value::Double(v) => Value::Double(v * factor),
            Value::Float(v) => Value::Float((*v as f64 * factor) as f32),
            Value::TinyInt(v) => Value::Double(*v as f64 * factor),
            Value::SmallInt(v) => Value::Double(*v as f64 * factor),
            Value::Int(v) => Value::Double(*v as f64 * factor),
            Value::BigInt(v) => Value::Double(*v as f64 * factor),
            other => other.clone(),
        }
    }

    /// Coerce an untyped runtime value into `declared`, following §4.3.
    ///
    /// This is the single funnel every insert/bind path goes through --
    /// wire timestamps as `[seconds, nanoseconds]` and internal single-int
    /// timestamps both end up here.
    pub fn coerce(declared: DataType, raw: &RawValue, column: &str) -> CoerceResult {
        let type_err = |got: String| {
            Error::Type {
                column: column.to_string(),
                expected: declared.name(),
                got,
            }
        };

        match declared {
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
                let i = raw
                    .as_integer()
                    .ok_or_else(|| type_err(raw.describe()))?;
                let (lo, hi) = declared.int_bounds().unwrap();
                let saturated = i.clamp(lo, hi);
                Ok(match declared {
                    DataType::TinyInt => Value::TinyInt(saturated as i8),
                    DataType::SmallInt => Value::SmallInt(saturated as i16),
                    DataType::Int => Value::Int(saturated as i32),
                    DataType::BigInt => Value::BigInt(saturated),
                    _ => unreachable!(),
                })
            }
            DataType::Double => {
                let f = raw.as_number().ok_or_else(|| type_err(raw.describe()))?;
                Ok(Value::Double(f))
            }
            DataType::Float => {
                let f = raw.as_number().ok_or_else(|| type_err(raw.describe()))?;
                Ok(Value::Float(f as f32))
            }
            DataType::Boolean => {
                let b = raw.as_bool().ok_or_else(|| type_err(raw.describe()))?;
                Ok(Value::Boolean(b))
            }
            DataType::Text => {
                let s = raw.as_text().ok_or_else(|| type_err(raw.describe()))?;
                Ok(Value::Text(s))
            }
            DataType::Timestamp => raw
                .as_timestamp()
                .map(|(s, n)| Value::Timestamp(s, n))
                .ok_or_else(|| type_err(raw.describe())),
        }
    }
}

pub type CoerceResult = Result<Value, Error>;

/// The untyped value a caller presents before coercion: either a SQL
/// literal lowered by the parser, or a bound argument arriving off the
/// wire. Both paths collapse into this before [`Value::coerce`] runs.
#[derive(Clone, Debug, PartialEq)]
pub enum RawValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    /// `[seconds, nanoseconds]` as received on the wire.
    TimestampPair(i64, i64),
    Null,
}

impl RawValue {
    fn describe(&self) -> String {
        match self {
            RawValue::Integer(v) => format!("integer {v}"),
            RawValue::Float(v) => format!("float {v}"),
            RawValue::Text(v) => format!("text {v:?}"),
            RawValue::Boolean(v) => format!("boolean {v}"),
            RawValue::TimestampPair(s, n) => format!("timestamp ({s}, {n})"),
            RawValue::Null => "null".to_string(),
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match *self {
            RawValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match *self {
            RawValue::Integer(v) => Some(v as f64),
            RawValue::Float(v) => Some(v),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match *self {
            RawValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Implements the legacy encoding quirk from §4.3: a bare integer whose
    /// upper 32 bits are non-zero is `(seconds = upper32, nanoseconds =
    /// lower32)`; a `[seconds, nanoseconds]` pair is taken as-is; an
    /// RFC-3339 string is parsed to its epoch components.
    fn as_timestamp(&self) -> Option<(i64, i32)> {
        match self {
            RawValue::Integer(v) => {
                let upper = (*v as u64 >> 32) as u32;
                if upper != 0 {
                    Some((upper as i64, (*v as u64 & 0xFFFF_FFFF) as i32))
                } else {
                    Some((*v, 0))
                }
            }
            RawValue::TimestampPair(s, n) => Some((*s, *n as i32)),
            RawValue::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| (dt.timestamp(), dt.timestamp_subsec_nanos() as i32)),
            _ => None,
        }
    }
}
