/// Wire protocol version spoken by this client.
pub const PROTOCOL_VERSION: u8 = 0;

/// Default server port for the native wire protocol.
pub const DEFAULT_PORT: u16 = 21212;

mod io;
mod internal_client_out;
mod internal_client_in;
mod protocol;
mod call;
mod client;
mod config;
mod connection;
mod convert;
mod stats;
mod table;
mod values;
pub mod errors;

pub use call::{CallOptions, CallResponse, CallStatus, PendingCall};
pub use client::Client;
pub use config::Config;
pub use connection::{ConnectionState, NodeConnection, NodeIdentity, SWEEP_INTERVAL};
pub use convert::{FromValue, IntoValue};
pub use errors::{FluxlineError, Result};
pub use protocol::{LoginError, ProcedureStatus, WireTag};
pub use stats::{bucket_floor_micros, ProcedureStatistics, StatisticsSnapshot, HISTOGRAM_BUCKETS};
pub use table::{Row, Table};
pub use values::*;
