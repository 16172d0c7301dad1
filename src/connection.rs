use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, error, info};
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::call::{CallOptions, CallRegistry, CallResponse, PendingCall};
use crate::config::Config;
use crate::internal_client_in::InternalClientIn;
use crate::internal_client_out::{encode_invocation, encode_parameters, InternalClientOut};
use crate::io::{FluxRead, FluxWrite};
use crate::protocol::LoginResponse;
use crate::stats::{ConnectionStats, StatisticsSnapshot};
use crate::values::Value;
use crate::{FluxlineError, Result};

/// Interval of the timer that expires overdue calls. Timeout precision is
/// bounded by it: a call completes no earlier than its deadline and no
/// later than roughly deadline + `SWEEP_INTERVAL`.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

const WRITE_QUEUE_DEPTH: usize = 1024;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticated = 1,
    Draining = 2,
    Closed = 3,
    Failed = 4,
}

impl ConnectionState {
    fn from_u8(i: u8) -> ConnectionState {
        match i {
            1 => ConnectionState::Authenticated,
            2 => ConnectionState::Draining,
            3 => ConnectionState::Closed,
            4 => ConnectionState::Failed,
            _ => ConnectionState::Connecting,
        }
    }
}

/// Server-assigned identity received in the login exchange.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub host_id: i32,
    pub connection_id: i64,
    /// Cluster-identity timestamp, milliseconds.
    pub instance_timestamp_ms: i64,
    pub leader_addr: Ipv4Addr,
    pub build_string: String,
}

impl From<LoginResponse> for NodeIdentity {
    fn from(login: LoginResponse) -> Self {
        NodeIdentity {
            host_id: login.host_id,
            connection_id: login.connection_id,
            instance_timestamp_ms: login.instance_timestamp_ms,
            leader_addr: login.leader_addr,
            build_string: login.build_string,
        }
    }
}

/// One persistent connection to a cluster node. Owns its socket: a reader
/// task dispatches inbound frames against the in-flight map, a writer task
/// drains the outbound queue, and a sweeper expires overdue calls. Submits
/// enqueue; they never touch the socket directly.
pub struct NodeConnection {
    host: String,
    identity: NodeIdentity,
    state: AtomicU8,
    registry: CallRegistry,
    writer_tx: mpsc::Sender<Vec<u8>>,
    default_timeout: Duration,
    stats: Option<Arc<ConnectionStats>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeConnection {
    /// Connects and authenticates. Login rejection surfaces here as an
    /// [`FluxlineError::Authentication`] error.
    pub async fn connect(host: &str, config: &Config) -> Result<Arc<NodeConnection>> {
        let endpoint = config.endpoint(host);
        let stream = TcpStream::connect(&endpoint).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut input = InternalClientIn::new(BufReader::new(read_half));
        let mut output = InternalClientOut::new(BufWriter::new(write_half));

        output.send_login(&config.user, &config.password).await?;
        let login = input.receive_login_response().await?;
        info!(
            "authenticated to {endpoint}: host id {}, connection id {}",
            login.host_id, login.connection_id
        );

        let stats = config.statistics.then(|| Arc::new(ConnectionStats::new()));
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let conn = Arc::new(NodeConnection {
            host: endpoint,
            identity: login.into(),
            state: AtomicU8::new(ConnectionState::Authenticated as u8),
            registry: CallRegistry::new(config.max_outstanding, stats.clone()),
            writer_tx,
            default_timeout: config.command_timeout,
            stats,
            workers: Mutex::new(Vec::new()),
        });

        let workers = vec![
            tokio::spawn(run_reader(Arc::downgrade(&conn), input)),
            tokio::spawn(run_writer(Arc::downgrade(&conn), output, writer_rx)),
            tokio::spawn(run_sweeper(Arc::downgrade(&conn))),
        ];
        match conn.workers.lock() {
            Ok(mut slot) => *slot = workers,
            Err(poisoned) => *poisoned.into_inner() = workers,
        }
        Ok(conn)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Calls currently occupying a handle, including timed-out and aborted
    /// ones whose reply has not arrived yet.
    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }

    /// Submits an invocation and returns an awaitable token.
    pub async fn submit(
        &self,
        procedure: &str,
        params: &[Value],
        options: CallOptions,
    ) -> Result<PendingCall> {
        let (param_bytes, deadline) = self.prepare(params, &options).await?;
        let slot = self.acquire_slot(&options, deadline).await?;
        self.ensure_open()?;
        let (handle, pending) = self.registry.register_waiter(procedure, deadline, slot);
        self.enqueue(handle, procedure, &options, &param_bytes)
            .await?;
        Ok(pending)
    }

    /// Submits an invocation whose completion is handed to `callback` on
    /// the shared executor.
    pub async fn submit_with_callback(
        &self,
        procedure: &str,
        params: &[Value],
        options: CallOptions,
        callback: impl FnOnce(Result<CallResponse>) + Send + 'static,
    ) -> Result<()> {
        let (param_bytes, deadline) = self.prepare(params, &options).await?;
        let slot = self.acquire_slot(&options, deadline).await?;
        self.ensure_open()?;
        let handle =
            self.registry
                .register_callback(procedure, deadline, Box::new(callback), slot);
        self.enqueue(handle, procedure, &options, &param_bytes)
            .await
    }

    async fn prepare(
        &self,
        params: &[Value],
        options: &CallOptions,
    ) -> Result<(Vec<u8>, Instant)> {
        self.ensure_open()?;
        let param_bytes = encode_parameters(params).await?;
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        Ok((param_bytes, Instant::now() + timeout))
    }

    async fn acquire_slot(
        &self,
        options: &CallOptions,
        deadline: Instant,
    ) -> Result<tokio::sync::OwnedSemaphorePermit> {
        if options.no_block {
            self.registry.try_acquire_slot()
        } else {
            self.registry.acquire_slot(deadline).await
        }
    }

    async fn enqueue(
        &self,
        handle: i64,
        procedure: &str,
        options: &CallOptions,
        param_bytes: &[u8],
    ) -> Result<()> {
        let timeout_hint_ms = options
            .timeout
            .map(|t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX))
            .unwrap_or(-1);
        let payload = match encode_invocation(handle, procedure, timeout_hint_ms, param_bytes).await
        {
            Ok(payload) => payload,
            Err(e) => {
                self.registry.discard(handle);
                return Err(e);
            }
        };
        if self.writer_tx.send(payload).await.is_err() {
            self.registry.discard(handle);
            return Err(FluxlineError::Connection(
                "connection closed".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Authenticated => Ok(()),
            ConnectionState::Draining => Err(FluxlineError::Connection(
                "connection is draining".to_string(),
            )),
            ConnectionState::Closed => Err(FluxlineError::Connection(
                "connection is closed".to_string(),
            )),
            ConnectionState::Failed => Err(FluxlineError::Connection(
                "connection has failed".to_string(),
            )),
            ConnectionState::Connecting => Err(FluxlineError::Connection(
                "connection is not authenticated yet".to_string(),
            )),
        }
    }

    /// Stops accepting submits and waits until no pending call remains
    /// (replies arrived or deadlines passed). Returns whether the in-flight
    /// map went pending-free before `deadline`.
    pub async fn drain(&self, deadline: Option<Instant>) -> bool {
        let _ = self.state.compare_exchange(
            ConnectionState::Authenticated as u8,
            ConnectionState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.registry.wait_idle(deadline).await
    }

    /// Drains, then tears the connection down.
    pub async fn close(&self) {
        self.drain(None).await;
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.registry.clear();
        let workers = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect::<Vec<_>>(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for worker in workers {
            worker.abort();
        }
        debug!("connection to {} closed", self.host);
    }

    /// Moves to the failed state and fans the error out to every in-flight
    /// call.
    fn fail(&self, message: &str) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == ConnectionState::Closed as u8 || current == ConnectionState::Failed as u8
            {
                break;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    ConnectionState::Failed as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }
        self.registry.fail_all(message);
    }

    /// All-time per-procedure counters; `None` when statistics are off.
    pub fn statistics(&self) -> Option<StatisticsSnapshot> {
        self.stats.as_ref().map(|stats| stats.snapshot())
    }

    pub fn statistics_since_reset(&self) -> Option<StatisticsSnapshot> {
        self.stats.as_ref().map(|stats| stats.snapshot_since_reset())
    }

    pub fn statistics_and_reset(&self) -> Option<StatisticsSnapshot> {
        self.stats.as_ref().map(|stats| stats.snapshot_and_reset())
    }
}

impl Drop for NodeConnection {
    fn drop(&mut self) {
        if let Ok(workers) = self.workers.get_mut() {
            for worker in workers.drain(..) {
                worker.abort();
            }
        }
    }
}

async fn run_reader<R: FluxRead>(conn: Weak<NodeConnection>, mut input: InternalClientIn<R>) {
    loop {
        let frame = input.receive_response().await;
        let Some(conn) = conn.upgrade() else { return };
        match frame {
            Ok(frame) => conn.registry.resolve(frame),
            Err(e) => {
                if conn.state() != ConnectionState::Closed {
                    error!("connection to {} lost: {e}", conn.host);
                    conn.fail(&format!("connection lost: {e}"));
                }
                return;
            }
        }
    }
}

async fn run_writer<W: FluxWrite>(
    conn: Weak<NodeConnection>,
    mut output: InternalClientOut<W>,
    mut queue: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(payload) = queue.recv().await {
        if let Err(e) = output.send_frame(&payload).await {
            let Some(conn) = conn.upgrade() else { return };
            if conn.state() != ConnectionState::Closed {
                error!("write to {} failed: {e}", conn.host);
                conn.fail(&format!("connection lost: {e}"));
            }
            return;
        }
    }
}

async fn run_sweeper(conn: Weak<NodeConnection>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(conn) = conn.upgrade() else { return };
        match conn.state() {
            ConnectionState::Authenticated | ConnectionState::Draining => {
                conn.registry.expire_due(Instant::now());
            }
            _ => return,
        }
    }
}
