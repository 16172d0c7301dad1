use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::io::{FluxRead, FluxWrite};
use crate::protocol::{
    WireTag, NULL_DECIMAL, NULL_FLOAT64, NULL_INT16, NULL_INT32, NULL_INT64, NULL_INT8,
};
use crate::{FluxlineError, Result};

mod decimal;
mod timestamp;

pub use decimal::Decimal;
pub use timestamp::Timestamp;


/// A raw wire value: one of the nine scalar types or a homogeneous array.
/// Decoded null sentinels become [`Value::Null`]; nulls inside arrays are
/// encoded back as the element type's sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Decimal(Decimal),
    String(String),
    Varbinary(Vec<u8>),
    Timestamp(Timestamp),
    Array(WireTag, Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The wire tag this value encodes under, if it determines one.
    /// `Null` has no tag of its own.
    pub fn tag(&self) -> Option<WireTag> {
        Some(match self {
            Value::Null => return None,
            Value::Int8(_) => WireTag::Int8,
            Value::Int16(_) => WireTag::Int16,
            Value::Int32(_) => WireTag::Int32,
            Value::Int64(_) => WireTag::Int64,
            Value::Float64(_) => WireTag::Float64,
            Value::Decimal(_) => WireTag::Decimal,
            Value::String(_) => WireTag::String,
            Value::Varbinary(_) => WireTag::Varbinary,
            Value::Timestamp(_) => WireTag::Timestamp,
            Value::Array(..) => WireTag::Array,
        })
    }

    /// Builds a homogeneous array value over `tag` elements.
    pub fn array(tag: WireTag, values: Vec<Value>) -> Value {
        Value::Array(tag, values)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
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
        Value::Varbinary(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

fn element_mismatch(tag: WireTag, value: &Value) -> FluxlineError {
    FluxlineError::Encoding(format!("cannot encode {value:?} as {tag}"))
}

/// Writes a value body under a known scalar tag. `Null` becomes the tag's
/// sentinel bytes.
pub(crate) async fn write_scalar_body<W: FluxWrite>(
    tag: WireTag,
    value: &Value,
    writer: &mut W,
) -> Result<()> {
    match (tag, value) {
        (WireTag::Int8, Value::Int8(x)) => writer.write_i8(*x).await?,
        (WireTag::Int8, Value::Null) => writer.write_i8(NULL_INT8).await?,
        (WireTag::Int16, Value::Int16(x)) => writer.write_i16(*x).await?,
        (WireTag::Int16, Value::Null) => writer.write_i16(NULL_INT16).await?,
        (WireTag::Int32, Value::Int32(x)) => writer.write_i32(*x).await?,
        (WireTag::Int32, Value::Null) => writer.write_i32(NULL_INT32).await?,
        (WireTag::Int64, Value::Int64(x)) => writer.write_i64(*x).await?,
        (WireTag::Int64, Value::Null) => writer.write_i64(NULL_INT64).await?,
        (WireTag::Float64, Value::Float64(x)) => writer.write_f64(*x).await?,
        (WireTag::Float64, Value::Null) => writer.write_f64(NULL_FLOAT64).await?,
        (WireTag::Timestamp, Value::Timestamp(x)) => writer.write_i64(x.micros()).await?,
        (WireTag::Timestamp, Value::Null) => writer.write_i64(NULL_INT64).await?,
        (WireTag::Decimal, Value::Decimal(x)) => writer.write_i128(x.scaled()).await?,
        (WireTag::Decimal, Value::Null) => writer.write_i128(NULL_DECIMAL).await?,
        (WireTag::String, Value::String(x)) => writer.write_wire_string(Some(x)).await?,
        (WireTag::String, Value::Null) => writer.write_wire_string(None).await?,
        (WireTag::Varbinary, Value::Varbinary(x)) => writer.write_wire_bytes(Some(x)).await?,
        (WireTag::Varbinary, Value::Null) => writer.write_wire_bytes(None).await?,
        (tag, value) => return Err(element_mismatch(tag, value)),
    }
    Ok(())
}

/// Reads a value body under a known scalar tag, mapping the tag's sentinel
/// to [`Value::Null`].
pub(crate) async fn read_scalar_body<R: FluxRead>(tag: WireTag, reader: &mut R) -> Result<Value> {
    Ok(match tag {
        WireTag::Int8 => match reader.read_i8().await? {
            NULL_INT8 => Value::Null,
            x => Value::Int8(x),
        },
        WireTag::Int16 => match reader.read_i16().await? {
            NULL_INT16 => Value::Null,
            x => Value::Int16(x),
        },
        WireTag::Int32 => match reader.read_i32().await? {
            NULL_INT32 => Value::Null,
            x => Value::Int32(x),
        },
        WireTag::Int64 => match reader.read_i64().await? {
            NULL_INT64 => Value::Null,
            x => Value::Int64(x),
        },
        WireTag::Float64 => {
            let x = reader.read_f64().await?;
            // the sentinel is a floor, not an exact bit pattern
            if x <= NULL_FLOAT64 {
                Value::Null
            } else {
                Value::Float64(x)
            }
        }
        WireTag::Timestamp => match reader.read_i64().await? {
            NULL_INT64 => Value::Null,
            x => Value::Timestamp(Timestamp::from_micros(x)),
        },
        WireTag::Decimal => match reader.read_i128().await? {
            NULL_DECIMAL => Value::Null,
            x => Value::Decimal(Decimal::from_scaled(x)),
        },
        WireTag::String => match reader.read_wire_string().await? {
            Some(x) => Value::String(x),
            None => Value::Null,
        },
        WireTag::Varbinary => match reader.read_wire_bytes().await? {
            Some(x) => Value::Varbinary(x),
            None => Value::Null,
        },
        WireTag::Array => {
            return Err(FluxlineError::Protocol(
                "ARRAY is not a valid column type".to_string(),
            ))
        }
    })
}
