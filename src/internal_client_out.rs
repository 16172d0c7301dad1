use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;

use crate::io::FluxWrite;
use crate::protocol::{WireTag, MAX_MESSAGE_SIZE, SERVICE_NAME};
use crate::values::{write_scalar_body, Value};
use crate::{FluxlineError, Result, PROTOCOL_VERSION};

pub struct InternalClientOut<W: FluxWrite> {
    writer: W,
}

impl<W: FluxWrite> InternalClientOut<W> {
    pub fn new(writer: W) -> Self {
        InternalClientOut { writer }
    }

    /// Frames and writes one message: 4-byte big-endian length (excluding
    /// itself), protocol version byte, then the payload.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() + 1 > MAX_MESSAGE_SIZE {
            return Err(FluxlineError::Encoding(format!(
                "message of {} bytes exceeds maximum of {MAX_MESSAGE_SIZE}",
                payload.len() + 1
            )));
        }
        self.writer.write_i32(payload.len() as i32 + 1).await?;
        self.writer.write_u8(PROTOCOL_VERSION).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn send_login(&mut self, username: &str, password: &str) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_wire_string(Some(SERVICE_NAME)).await?;
        payload.write_wire_string(Some(username)).await?;
        let digest = Sha1::digest(password.as_bytes());
        payload.write_all(digest.as_slice()).await?;
        self.send_frame(&payload).await
    }
}

/// Encodes a parameter vector: count, then a tag byte and value body per
/// parameter. A bare `Null` goes out as a null STRING; typed nulls inside
/// arrays use the element sentinel.
pub async fn encode_parameters(params: &[Value]) -> Result<Vec<u8>> {
    if params.len() > i16::MAX as usize {
        return Err(FluxlineError::Encoding(format!(
            "{} parameters exceed the wire limit of {}",
            params.len(),
            i16::MAX
        )));
    }
    let mut out = Vec::new();
    out.write_i16(params.len() as i16).await?;
    for param in params {
        match param {
            Value::Array(element_tag, values) => {
                if *element_tag == WireTag::Array {
                    return Err(FluxlineError::Encoding(
                        "nested arrays are not encodable".to_string(),
                    ));
                }
                if values.len() > i16::MAX as usize {
                    return Err(FluxlineError::Encoding(format!(
                        "array of {} elements exceeds the wire limit of {}",
                        values.len(),
                        i16::MAX
                    )));
                }
                out.write_i8(WireTag::Array as i8).await?;
                out.write_i8(*element_tag as i8).await?;
                out.write_i16(values.len() as i16).await?;
                for value in values {
                    write_scalar_body(*element_tag, value, &mut out).await?;
                }
            }
            Value::Null => {
                out.write_i8(WireTag::String as i8).await?;
                out.write_wire_string(None).await?;
            }
            scalar => {
                let Some(tag) = scalar.tag() else {
                    return Err(FluxlineError::Encoding(format!(
                        "cannot determine wire type for {scalar:?}"
                    )));
                };
                out.write_i8(tag as i8).await?;
                write_scalar_body(tag, scalar, &mut out).await?;
            }
        }
    }
    Ok(out)
}

/// Assembles a full invocation payload around pre-encoded parameters.
pub async fn encode_invocation(
    handle: i64,
    procedure: &str,
    timeout_hint_ms: i32,
    param_bytes: &[u8],
) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    payload.write_i64(handle).await?;
    payload.write_wire_string(Some(procedure)).await?;
    payload.write_i32(timeout_hint_ms).await?;
    payload.write_all(param_bytes).await?;
    Ok(payload)
}
