use crate::protocol::WireTag;
use crate::values::{Decimal, Timestamp, Value};
use crate::{FluxlineError, Result};

/// A Rust type that converts into a wire [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

/// A Rust type that can be extracted from a decoded column value. The
/// requested type must match the column's declared wire type exactly;
/// anything else is a cast error.
pub trait FromValue: Sized {
    fn from_value(tag: WireTag, value: Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(_tag: WireTag, value: Value) -> Result<Self> {
        Ok(value)
    }
}

pub(crate) fn cast_error(tag: WireTag, requested: &str) -> FluxlineError {
    FluxlineError::Cast(format!("column is {tag}, requested {requested}"))
}

macro_rules! scalar_conversions {
    ($($ty:ty: $variant:ident / $tag:ident),* $(,)?) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self.into())
                }
            }

            impl FromValue for $ty {
                fn from_value(tag: WireTag, value: Value) -> Result<Self> {
                    if tag != WireTag::$tag {
                        return Err(cast_error(tag, stringify!($ty)));
                    }
                    match value {
                        Value::$variant(x) => Ok(x),
                        Value::Null => Err(FluxlineError::Cast(format!(
                            "null value in a non-nullable {} accessor",
                            stringify!($ty)
                        ))),
                        other => Err(FluxlineError::Cast(format!(
                            "column declared {tag} but holds {other:?}"
                        ))),
                    }
                }
            }

            impl FromValue for Option<$ty> {
                fn from_value(tag: WireTag, value: Value) -> Result<Self> {
                    if tag != WireTag::$tag {
                        return Err(cast_error(tag, stringify!(Option<$ty>)));
                    }
                    match value {
                        Value::Null => Ok(None),
                        Value::$variant(x) => Ok(Some(x)),
                        other => Err(FluxlineError::Cast(format!(
                            "column declared {tag} but holds {other:?}"
                        ))),
                    }
                }
            }
        )*
    };
}

scalar_conversions!(
    i8: Int8 / Int8,
    i16: Int16 / Int16,
    i32: Int32 / Int32,
    i64: Int64 / Int64,
    f64: Float64 / Float64,
    Decimal: Decimal / Decimal,
    String: String / String,
    Timestamp: Timestamp / Timestamp,
);

// Varbinary is spelled out because `Vec<u8>` also backs the array
// conversions below.
impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::Varbinary(self)
    }
}

impl FromValue for Vec<u8> {
    fn from_value(tag: WireTag, value: Value) -> Result<Self> {
        if tag != WireTag::Varbinary {
            return Err(cast_error(tag, "Vec<u8>"));
        }
        match value {
            Value::Varbinary(x) => Ok(x),
            Value::Null => Err(FluxlineError::Cast(
                "null value in a non-nullable Vec<u8> accessor".to_string(),
            )),
            other => Err(FluxlineError::Cast(format!(
                "column declared {tag} but holds {other:?}"
            ))),
        }
    }
}

impl FromValue for Option<Vec<u8>> {
    fn from_value(tag: WireTag, value: Value) -> Result<Self> {
        if tag != WireTag::Varbinary {
            return Err(cast_error(tag, "Option<Vec<u8>>"));
        }
        match value {
            Value::Null => Ok(None),
            Value::Varbinary(x) => Ok(Some(x)),
            other => Err(FluxlineError::Cast(format!(
                "column declared {tag} but holds {other:?}"
            ))),
        }
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

macro_rules! array_conversions {
    ($($ty:ty: $tag:ident),* $(,)?) => {
        $(
            impl IntoValue for Vec<$ty> {
                fn into_value(self) -> Value {
                    Value::Array(
                        WireTag::$tag,
                        self.into_iter().map(IntoValue::into_value).collect(),
                    )
                }
            }

            impl IntoValue for Vec<Option<$ty>> {
                fn into_value(self) -> Value {
                    Value::Array(
                        WireTag::$tag,
                        self.into_iter()
                            .map(|v| v.map(IntoValue::into_value).unwrap_or(Value::Null))
                            .collect(),
                    )
                }
            }
        )*
    };
}

array_conversions!(
    i8: Int8,
    i16: Int16,
    i32: Int32,
    i64: Int64,
    f64: Float64,
    Decimal: Decimal,
    String: String,
    Timestamp: Timestamp,
    Vec<u8>: Varbinary,
);
