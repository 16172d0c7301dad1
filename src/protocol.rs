use std::fmt;
use std::net::Ipv4Addr;

use crate::table::Table;
use crate::{FluxlineError, Result};

/// Largest single string or varbinary value accepted on the wire, in bytes.
pub const MAX_FIELD_SIZE: usize = 1_048_576;

/// Sanity cap on a whole inbound message.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Service string sent in the login frame.
pub const SERVICE_NAME: &str = "database";

pub const NULL_INT8: i8 = i8::MIN;
pub const NULL_INT16: i16 = i16::MIN;
pub const NULL_INT32: i32 = i32::MIN;
pub const NULL_INT64: i64 = i64::MIN;
pub const NULL_FLOAT64: f64 = -1.7e308;
pub const NULL_DECIMAL: i128 = i128::MIN;

// Fields-present bits in a response frame.
pub const FIELD_APP_STATUS: u8 = 0x80;
pub const FIELD_APP_STATUS_STRING: u8 = 0x40;
pub const FIELD_STATUS_STRING: u8 = 0x20;

/// Wire type tag for values in parameter vectors and table columns.
#[repr(i8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireTag {
    Int8 = 3,
    Int16 = 4,
    Int32 = 5,
    Int64 = 6,
    Float64 = 8,
    String = 9,
    Timestamp = 11,
    Decimal = 22,
    Varbinary = 25,
    Array = -99,
}

impl WireTag {
    pub fn from_i8(i: i8) -> Result<Self> {
        Ok(match i {
            3 => WireTag::Int8,
            4 => WireTag::Int16,
            5 => WireTag::Int32,
            6 => WireTag::Int64,
            8 => WireTag::Float64,
            9 => WireTag::String,
            11 => WireTag::Timestamp,
            22 => WireTag::Decimal,
            25 => WireTag::Varbinary,
            -99 => WireTag::Array,
            x => {
                return Err(FluxlineError::Protocol(format!(
                    "invalid type tag from server: {x}"
                )))
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireTag::Int8 => "INT8",
            WireTag::Int16 => "INT16",
            WireTag::Int32 => "INT32",
            WireTag::Int64 => "INT64",
            WireTag::Float64 => "FLOAT64",
            WireTag::String => "STRING",
            WireTag::Timestamp => "TIMESTAMP",
            WireTag::Decimal => "DECIMAL",
            WireTag::Varbinary => "VARBINARY",
            WireTag::Array => "ARRAY",
        }
    }
}

impl fmt::Display for WireTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the server refused a login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginError {
    CredentialMismatch,
    UserNotFound,
    UnhashedPasswordRejected,
    ServerUnavailable,
    Other(i8),
}

impl LoginError {
    pub fn from_code(code: i8) -> Self {
        match code {
            1 => LoginError::CredentialMismatch,
            2 => LoginError::UserNotFound,
            3 => LoginError::UnhashedPasswordRejected,
            5 => LoginError::ServerUnavailable,
            x => LoginError::Other(x),
        }
    }
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginError::CredentialMismatch => f.write_str("credential mismatch"),
            LoginError::UserNotFound => f.write_str("user not found"),
            LoginError::UnhashedPasswordRejected => f.write_str("unhashed password rejected"),
            LoginError::ServerUnavailable => f.write_str("server unavailable"),
            LoginError::Other(code) => write!(f, "authentication failure (code {code})"),
        }
    }
}

/// Status code of a procedure response.
#[repr(i8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcedureStatus {
    Success = 1,
    UserAbort = -1,
    GracefulFailure = -2,
    UnexpectedFailure = -3,
    ConnectionLost = -4,
    ServerUnavailable = -5,
    ConnectionTimeout = -6,
    ResponseUnknown = -7,
    TransactionRestart = -8,
    OperationalFailure = -9,
}

impl ProcedureStatus {
    pub fn from_i8(i: i8) -> Result<Self> {
        Ok(match i {
            1 => ProcedureStatus::Success,
            -1 => ProcedureStatus::UserAbort,
            -2 => ProcedureStatus::GracefulFailure,
            -3 => ProcedureStatus::UnexpectedFailure,
            -4 => ProcedureStatus::ConnectionLost,
            -5 => ProcedureStatus::ServerUnavailable,
            -6 => ProcedureStatus::ConnectionTimeout,
            -7 => ProcedureStatus::ResponseUnknown,
            -8 => ProcedureStatus::TransactionRestart,
            -9 => ProcedureStatus::OperationalFailure,
            x => {
                return Err(FluxlineError::Protocol(format!(
                    "invalid response status from server: {x}"
                )))
            }
        })
    }
}

/// Decoded payload of the server's login reply.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub host_id: i32,
    pub connection_id: i64,
    pub instance_timestamp_ms: i64,
    pub leader_addr: Ipv4Addr,
    pub build_string: String,
}

/// Decoded shape of a server procedure reply.
#[derive(Debug)]
pub struct ResponseFrame {
    pub client_handle: i64,
    pub app_status: Option<i8>,
    pub app_status_string: Option<String>,
    pub status: ProcedureStatus,
    pub status_string: Option<String>,
    pub cluster_round_trip_ms: i32,
    pub tables: Vec<Table>,
}
