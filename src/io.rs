use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::MAX_FIELD_SIZE;
use crate::{FluxlineError, Result};

/// Reader extension for the wire's length-prefixed fields. The fixed-width
/// primitives come straight from [`AsyncReadExt`], which is big-endian.
#[async_trait]
pub trait FluxRead: AsyncRead + Unpin + Send + Sync + 'static {
    async fn read_wire_string(&mut self) -> Result<Option<String>>;

    async fn read_wire_bytes(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
impl<T: AsyncRead + Unpin + Send + Sync + 'static> FluxRead for T {
    async fn read_wire_string(&mut self) -> Result<Option<String>> {
        match self.read_wire_bytes().await? {
            Some(buf) => Ok(Some(String::from_utf8(buf).map_err(|e| {
                FluxlineError::Protocol(format!("invalid utf-8 in string field: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn read_wire_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.read_i32().await?;
        if len < 0 {
            if len != -1 {
                return Err(FluxlineError::Protocol(format!(
                    "impossible field length: {len}"
                )));
            }
            return Ok(None);
        }
        if len as usize > MAX_FIELD_SIZE {
            return Err(FluxlineError::Protocol(format!(
                "field of {len} bytes exceeds maximum of {MAX_FIELD_SIZE}"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf[..]).await?;
        Ok(Some(buf))
    }
}

#[async_trait]
pub trait FluxWrite: AsyncWrite + Unpin + Send + Sync + 'static {
    async fn write_wire_string(&mut self, value: Option<&str>) -> Result<()>;

    async fn write_wire_bytes(&mut self, value: Option<&[u8]>) -> Result<()>;
}

#[async_trait]
impl<T: AsyncWrite + Unpin + Send + Sync + 'static> FluxWrite for T {
    async fn write_wire_string(&mut self, value: Option<&str>) -> Result<()> {
        self.write_wire_bytes(value.map(|v| v.as_bytes())).await
    }

    async fn write_wire_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        let Some(value) = value else {
            self.write_i32(-1).await?;
            return Ok(());
        };
        if value.len() > MAX_FIELD_SIZE {
            return Err(FluxlineError::Encoding(format!(
                "value of {} bytes exceeds maximum field size of {MAX_FIELD_SIZE}",
                value.len()
            )));
        }
        self.write_i32(value.len() as i32).await?;
        self.write_all(value).await?;
        Ok(())
    }
}
