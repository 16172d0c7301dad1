use thiserror::Error;

use crate::protocol::{LoginError, ProcedureStatus};

pub type Result<T, E = FluxlineError> = std::result::Result<T, E>;

/// All errors surfaced by fluxline, either synchronously from an operation
/// or through a call's completion.
#[derive(Error, Debug)]
pub enum FluxlineError {
    /// Rejected before any I/O was attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The server refused the login exchange.
    #[error("authentication rejected: {0}")]
    Authentication(LoginError),

    /// Socket closure or read/write failure. Fans out to every in-flight
    /// call on the affected connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Unparseable frame, unknown protocol version, unknown type tag or an
    /// impossible length. The connection enters the failed state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The call's deadline passed before a server reply arrived.
    #[error("call timed out")]
    Timeout,

    /// The call was cancelled locally.
    #[error("call aborted")]
    Aborted,

    /// A non-blocking submit found the outstanding-transaction window full.
    #[error("outstanding-transaction window is full")]
    WindowFull,

    /// The procedure completed with a non-ok status. Status code and
    /// message are carried verbatim from the server.
    #[error("server error {status:?}: {message}")]
    Server {
        status: ProcedureStatus,
        message: String,
    },

    /// A table accessor requested a type incompatible with the column.
    #[error("cast error: {0}")]
    Cast(String),

    /// Parameters could not be encoded for the wire.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
