use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::Instant;

use crate::call::{CallOptions, CallResponse, PendingCall};
use crate::config::Config;
use crate::connection::{ConnectionState, NodeConnection};
use crate::stats::StatisticsSnapshot;
use crate::values::Value;
use crate::{FluxlineError, Result};

/// Cluster-level client: one persistent [`NodeConnection`] per configured
/// host, with least-in-flight routing across the healthy ones. Safe to
/// share and use from any number of tasks.
///
/// Membership is static: a failed connection stays failed and is skipped
/// by routing; rebuild the client to re-establish it.
pub struct Client {
    connections: Vec<Arc<NodeConnection>>,
    next: AtomicUsize,
    config: Config,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl Client {
    /// Connects to every configured host. Fails if any host cannot be
    /// reached or rejects the login.
    pub async fn connect(config: Config) -> Result<Client> {
        config.validate()?;
        let mut connections = Vec::with_capacity(config.hosts.len());
        for host in &config.hosts {
            connections.push(NodeConnection::connect(host, &config).await?);
        }
        Ok(Client {
            connections,
            next: AtomicUsize::new(0),
            config,
        })
    }

    /// Connects from a `key=value;…` connection string.
    pub async fn connect_str(s: &str) -> Result<Client> {
        Self::connect(Config::from_connection_string(s)?).await
    }

    /// Invokes a stored procedure; await the returned token for the result.
    pub async fn call(&self, procedure: &str, params: Vec<Value>) -> Result<PendingCall> {
        self.call_with_options(procedure, params, CallOptions::default())
            .await
    }

    pub async fn call_with_options(
        &self,
        procedure: &str,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Result<PendingCall> {
        self.check_procedure(procedure)?;
        self.route()?.submit(procedure, &params, options).await
    }

    /// Invokes a stored procedure and hands the completion to `callback`
    /// on the shared executor.
    pub async fn call_with_callback(
        &self,
        procedure: &str,
        params: Vec<Value>,
        callback: impl FnOnce(Result<CallResponse>) + Send + 'static,
    ) -> Result<()> {
        self.check_procedure(procedure)?;
        self.route()?
            .submit_with_callback(procedure, &params, CallOptions::default(), callback)
            .await
    }

    /// Submits and waits in one step.
    pub async fn execute(&self, procedure: &str, params: Vec<Value>) -> Result<CallResponse> {
        self.call(procedure, params).await?.wait().await
    }

    /// Liveness probe against one healthy node. Not subject to the
    /// system-procedure gate.
    pub async fn ping(&self) -> Result<()> {
        self.route()?
            .submit("@Ping", &[], CallOptions::default())
            .await?
            .wait()
            .await?;
        Ok(())
    }

    fn check_procedure(&self, procedure: &str) -> Result<()> {
        if procedure == "@AdHoc" {
            if !self.config.allow_ad_hoc {
                return Err(FluxlineError::Configuration(
                    "ad hoc queries are disabled; enable AllowAdHocQueries".to_string(),
                ));
            }
        } else if procedure.starts_with('@') && !self.config.allow_system_calls {
            return Err(FluxlineError::Configuration(format!(
                "system procedure {procedure} is disabled; enable AllowSystemCalls"
            )));
        }
        Ok(())
    }

    /// Least in-flight across healthy nodes, rotating the scan start for
    /// round-robin tie-breaking.
    fn route(&self) -> Result<&Arc<NodeConnection>> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut best: Option<&Arc<NodeConnection>> = None;
        for offset in 0..self.connections.len() {
            let conn = &self.connections[start.wrapping_add(offset) % self.connections.len()];
            if conn.state() != ConnectionState::Authenticated {
                continue;
            }
            best = match best {
                Some(best) if best.in_flight() <= conn.in_flight() => Some(best),
                _ => Some(conn),
            };
        }
        best.ok_or_else(|| {
            FluxlineError::Connection("no healthy connections in the cluster".to_string())
        })
    }

    /// Stops accepting submits everywhere and waits until every node's
    /// in-flight map has no pending calls, or `deadline` passes. Returns
    /// whether all nodes went pending-free.
    pub async fn drain(&self, deadline: Option<Instant>) -> bool {
        join_all(self.connections.iter().map(|conn| conn.drain(deadline)))
            .await
            .into_iter()
            .all(|idle| idle)
    }

    /// Drains and tears down every connection.
    pub async fn close(&self) {
        join_all(self.connections.iter().map(|conn| conn.close())).await;
    }

    pub fn connections(&self) -> &[Arc<NodeConnection>] {
        &self.connections
    }

    /// Calls currently occupying a handle anywhere in the cluster.
    pub fn total_in_flight(&self) -> usize {
        self.connections.iter().map(|conn| conn.in_flight()).sum()
    }

    /// All-time per-procedure counters aggregated over every node; `None`
    /// when statistics are disabled.
    pub fn statistics(&self) -> Option<StatisticsSnapshot> {
        self.aggregate(NodeConnection::statistics)
    }

    pub fn statistics_since_reset(&self) -> Option<StatisticsSnapshot> {
        self.aggregate(NodeConnection::statistics_since_reset)
    }

    /// Returns the since-reset aggregate and starts a new reset window on
    /// every node.
    pub fn statistics_and_reset(&self) -> Option<StatisticsSnapshot> {
        self.aggregate(NodeConnection::statistics_and_reset)
    }

    fn aggregate(
        &self,
        snapshot: impl Fn(&NodeConnection) -> Option<StatisticsSnapshot>,
    ) -> Option<StatisticsSnapshot> {
        if !self.config.statistics {
            return None;
        }
        let mut total = StatisticsSnapshot::default();
        for conn in &self.connections {
            if let Some(node) = snapshot(conn) {
                total.merge(&node);
            }
        }
        Some(total)
    }
}
