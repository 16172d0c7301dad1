use std::io::Cursor;

use log::trace;
use tokio::io::AsyncReadExt;

use crate::io::FluxRead;
use crate::protocol::{
    LoginError, LoginResponse, ProcedureStatus, ResponseFrame, FIELD_APP_STATUS,
    FIELD_APP_STATUS_STRING, FIELD_STATUS_STRING, MAX_MESSAGE_SIZE,
};
use crate::table::Table;
use crate::{FluxlineError, Result, PROTOCOL_VERSION};

pub struct InternalClientIn<R: FluxRead> {
    reader: R,
}

impl<R: FluxRead> InternalClientIn<R> {
    pub fn new(reader: R) -> Self {
        InternalClientIn { reader }
    }

    /// Reads one framed message and returns its payload with the version
    /// byte stripped.
    async fn receive_frame(&mut self) -> Result<Cursor<Vec<u8>>> {
        let length = self.reader.read_i32().await?;
        if length < 1 || length as usize > MAX_MESSAGE_SIZE {
            return Err(FluxlineError::Protocol(format!(
                "impossible message length: {length}"
            )));
        }
        let version = self.reader.read_u8().await?;
        if version != PROTOCOL_VERSION {
            return Err(FluxlineError::Protocol(format!(
                "unknown protocol version: {version}"
            )));
        }
        let mut payload = vec![0u8; length as usize - 1];
        self.reader.read_exact(&mut payload[..]).await?;
        Ok(Cursor::new(payload))
    }

    pub async fn receive_login_response(&mut self) -> Result<LoginResponse> {
        let mut payload = self.receive_frame().await?;
        let result = payload.read_i8().await?;
        if result != 0 {
            return Err(FluxlineError::Authentication(LoginError::from_code(result)));
        }
        let host_id = payload.read_i32().await?;
        let connection_id = payload.read_i64().await?;
        let instance_timestamp_ms = payload.read_i64().await?;
        let leader_addr = payload.read_u32().await?.into();
        let build_string = payload.read_wire_string().await?.unwrap_or_default();
        let response = LoginResponse {
            host_id,
            connection_id,
            instance_timestamp_ms,
            leader_addr,
            build_string,
        };
        trace!("login response received: {response:?}");
        Ok(response)
    }

    pub async fn receive_response(&mut self) -> Result<ResponseFrame> {
        let mut payload = self.receive_frame().await?;
        let client_handle = payload.read_i64().await?;
        let fields = payload.read_u8().await?;
        let app_status = if fields & FIELD_APP_STATUS != 0 {
            Some(payload.read_i8().await?)
        } else {
            None
        };
        let app_status_string = if fields & FIELD_APP_STATUS_STRING != 0 {
            payload.read_wire_string().await?
        } else {
            None
        };
        let status = ProcedureStatus::from_i8(payload.read_i8().await?)?;
        let status_string = if fields & FIELD_STATUS_STRING != 0 {
            payload.read_wire_string().await?
        } else {
            None
        };
        let cluster_round_trip_ms = payload.read_i32().await?;
        let table_count = payload.read_i16().await?;
        if table_count < 0 {
            return Err(FluxlineError::Protocol(format!(
                "impossible result table count: {table_count}"
            )));
        }
        let mut tables = Vec::with_capacity(table_count as usize);
        for _ in 0..table_count {
            tables.push(Table::read(&mut payload).await?);
        }
        let frame = ResponseFrame {
            client_handle,
            app_status,
            app_status_string,
            status,
            status_string,
            cluster_round_trip_ms,
            tables,
        };
        trace!(
            "response frame received: handle={} status={:?} tables={}",
            frame.client_handle,
            frame.status,
            frame.tables.len()
        );
        Ok(frame)
    }
}
