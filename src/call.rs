use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::protocol::{ProcedureStatus, ResponseFrame};
use crate::stats::ConnectionStats;
use crate::table::Table;
use crate::{FluxlineError, Result};

/// Completion status of a call. Exactly one terminal transition happens per
/// call, decided by a compare-and-swap.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStatus {
    Pending = 0,
    Success = 1,
    Failed = 2,
    TimedOut = 3,
    Aborted = 4,
}

impl CallStatus {
    fn from_u8(i: u8) -> CallStatus {
        match i {
            1 => CallStatus::Success,
            2 => CallStatus::Failed,
            3 => CallStatus::TimedOut,
            4 => CallStatus::Aborted,
            _ => CallStatus::Pending,
        }
    }
}

/// Per-call knobs for a submit.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the connection's command timeout.
    pub timeout: Option<Duration>,
    /// Fail with [`FluxlineError::WindowFull`] instead of waiting when the
    /// outstanding-transaction window is full.
    pub no_block: bool,
}

/// A successful procedure response.
#[derive(Debug)]
pub struct CallResponse {
    status: ProcedureStatus,
    app_status: Option<i8>,
    app_status_string: Option<String>,
    cluster_round_trip_ms: i32,
    tables: Vec<Table>,
}

impl CallResponse {
    pub(crate) fn from_frame(frame: ResponseFrame) -> Result<CallResponse> {
        match frame.status {
            ProcedureStatus::Success => Ok(CallResponse {
                status: frame.status,
                app_status: frame.app_status,
                app_status_string: frame.app_status_string,
                cluster_round_trip_ms: frame.cluster_round_trip_ms,
                tables: frame.tables,
            }),
            status => Err(FluxlineError::Server {
                status,
                message: frame.status_string.unwrap_or_default(),
            }),
        }
    }

    pub fn status(&self) -> ProcedureStatus {
        self.status
    }

    /// Procedure-defined status byte, if the procedure set one.
    pub fn app_status(&self) -> Option<i8> {
        self.app_status
    }

    pub fn app_status_string(&self) -> Option<&str> {
        self.app_status_string.as_deref()
    }

    pub fn cluster_round_trip_ms(&self) -> i32 {
        self.cluster_round_trip_ms
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn into_tables(self) -> Vec<Table> {
        self.tables
    }

    pub fn first_table(&self) -> Option<&Table> {
        self.tables.first()
    }
}

pub(crate) type Callback = Box<dyn FnOnce(Result<CallResponse>) + Send + 'static>;

enum CompletionSink {
    Waiter(oneshot::Sender<Result<CallResponse>>),
    Callback(Callback),
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("handle", &self.handle)
            .field("procedure", &self.procedure)
            .field("status", &self.status())
            .finish()
    }
}

/// One in-flight invocation.
pub(crate) struct Call {
    handle: i64,
    procedure: String,
    submitted_at: Instant,
    deadline: Instant,
    status: AtomicU8,
    sink: Mutex<Option<CompletionSink>>,
    stats: Option<Arc<ConnectionStats>>,
}

impl Call {
    pub fn status(&self) -> CallStatus {
        CallStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Attempts the terminal transition. Returns true only for the single
    /// winner; the losing path must not touch the outcome.
    pub fn complete(&self, status: CallStatus, outcome: Result<CallResponse>) -> bool {
        debug_assert_ne!(status, CallStatus::Pending);
        if self
            .status
            .compare_exchange(
                CallStatus::Pending as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        if let Some(stats) = &self.stats {
            stats.record_completion(&self.procedure, self.submitted_at.elapsed(), status);
        }
        let sink = match self.sink.lock() {
            Ok(mut sink) => sink.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sink {
            Some(CompletionSink::Waiter(tx)) => {
                let _ = tx.send(outcome);
            }
            Some(CompletionSink::Callback(callback)) => {
                // User code runs on the shared executor, never on the
                // reader or the sweeper.
                tokio::spawn(async move { callback(outcome) });
            }
            None => {}
        }
        true
    }
}

/// A token for an in-flight call whose completion is awaited rather than
/// delivered to a callback.
#[derive(Debug)]
pub struct PendingCall {
    call: Arc<Call>,
    receiver: oneshot::Receiver<Result<CallResponse>>,
}

impl PendingCall {
    pub fn handle(&self) -> i64 {
        self.call.handle
    }

    pub fn procedure(&self) -> &str {
        &self.call.procedure
    }

    pub fn status(&self) -> CallStatus {
        self.call.status()
    }

    /// Cancels the call locally. The handle stays occupied until the
    /// matching server reply arrives; there is no server-side cancel.
    pub fn cancel(&self) {
        self.call
            .complete(CallStatus::Aborted, Err(FluxlineError::Aborted));
    }

    /// Waits for the call's terminal transition.
    pub async fn wait(self) -> Result<CallResponse> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(FluxlineError::Connection(
                "connection dropped before the call completed".to_string(),
            )),
        }
    }
}

/// A map entry: the call plus the window slot it occupies. The slot frees
/// exactly when the entry leaves the map, so a timed-out or aborted call
/// keeps consuming its slot until the matching reply arrives.
struct InFlight {
    call: Arc<Call>,
    _slot: OwnedSemaphorePermit,
}

/// The in-flight map of one connection: handles, deadlines, the credit
/// window, and the statistics hooks.
pub(crate) struct CallRegistry {
    calls: Mutex<HashMap<i64, InFlight>>,
    next_handle: AtomicI64,
    window: Arc<Semaphore>,
    idle: Notify,
    stats: Option<Arc<ConnectionStats>>,
}

impl CallRegistry {
    pub fn new(max_outstanding: usize, stats: Option<Arc<ConnectionStats>>) -> Self {
        CallRegistry {
            calls: Mutex::new(HashMap::new()),
            next_handle: AtomicI64::new(1),
            window: Arc::new(Semaphore::new(max_outstanding)),
            idle: Notify::new(),
            stats,
        }
    }

    /// Waits for a window slot, up to the call's deadline.
    pub async fn acquire_slot(&self, deadline: Instant) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout_at(deadline, self.window.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(FluxlineError::Connection(
                "connection closed while waiting for a window slot".to_string(),
            )),
            Err(_elapsed) => Err(FluxlineError::Timeout),
        }
    }

    pub fn try_acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        match self.window.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => Err(FluxlineError::WindowFull),
            Err(TryAcquireError::Closed) => Err(FluxlineError::Connection(
                "connection closed while acquiring a window slot".to_string(),
            )),
        }
    }

    /// Registers a waiter-completed call and returns its token.
    pub fn register_waiter(
        &self,
        procedure: &str,
        deadline: Instant,
        slot: OwnedSemaphorePermit,
    ) -> (i64, PendingCall) {
        let (tx, rx) = oneshot::channel();
        let (handle, call) = self.register(procedure, deadline, CompletionSink::Waiter(tx), slot);
        (handle, PendingCall { call, receiver: rx })
    }

    /// Registers a callback-completed call.
    pub fn register_callback(
        &self,
        procedure: &str,
        deadline: Instant,
        callback: Callback,
        slot: OwnedSemaphorePermit,
    ) -> i64 {
        self.register(procedure, deadline, CompletionSink::Callback(callback), slot)
            .0
    }

    fn register(
        &self,
        procedure: &str,
        deadline: Instant,
        sink: CompletionSink,
        slot: OwnedSemaphorePermit,
    ) -> (i64, Arc<Call>) {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let call = Arc::new(Call {
            handle,
            procedure: procedure.to_string(),
            submitted_at: Instant::now(),
            deadline,
            status: AtomicU8::new(CallStatus::Pending as u8),
            sink: Mutex::new(Some(sink)),
            stats: self.stats.clone(),
        });
        if let Some(stats) = &self.stats {
            stats.record_submit(procedure);
        }
        self.map().insert(
            handle,
            InFlight {
                call: call.clone(),
                _slot: slot,
            },
        );
        (handle, call)
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<i64, InFlight>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Removes a call that never made it onto the wire.
    pub fn discard(&self, handle: i64) {
        self.map().remove(&handle);
        self.notify_if_idle();
    }

    /// Resolves a server reply against the in-flight map. The handle and
    /// its window slot are released either way; a reply for an
    /// already-terminal call is discarded silently.
    pub fn resolve(&self, frame: ResponseFrame) {
        let handle = frame.client_handle;
        let Some(entry) = self.map().remove(&handle) else {
            log::warn!("discarding response for unknown handle {handle}");
            return;
        };
        let outcome = CallResponse::from_frame(frame);
        let status = match &outcome {
            Ok(_) => CallStatus::Success,
            Err(_) => CallStatus::Failed,
        };
        if !entry.call.complete(status, outcome) {
            debug!(
                "late reply for handle {handle} ({:?}); slot released",
                entry.call.status()
            );
        }
        self.notify_if_idle();
    }

    /// Completes every pending call whose deadline has passed. Expired
    /// calls keep their handle and window slot until the reply arrives.
    pub fn expire_due(&self, now: Instant) {
        let due: Vec<Arc<Call>> = self
            .map()
            .values()
            .filter(|entry| {
                entry.call.status() == CallStatus::Pending && entry.call.deadline() <= now
            })
            .map(|entry| entry.call.clone())
            .collect();
        for call in due {
            if call.complete(CallStatus::TimedOut, Err(FluxlineError::Timeout)) {
                debug!(
                    "call {} ({}) timed out client-side",
                    call.handle, call.procedure
                );
            }
        }
        self.notify_if_idle();
    }

    /// Fails every in-flight call and clears the map. Used when the
    /// connection is lost; window slots are all released.
    pub fn fail_all(&self, message: &str) {
        let drained: Vec<InFlight> = self.map().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.call.complete(
                CallStatus::Failed,
                Err(FluxlineError::Connection(message.to_string())),
            );
        }
        self.idle.notify_waiters();
    }

    /// Drops every remaining entry without completing it. Only used after
    /// drain, when nothing is pending.
    pub fn clear(&self) {
        self.map().clear();
        self.idle.notify_waiters();
    }

    pub fn in_flight(&self) -> usize {
        self.map().len()
    }

    pub fn pending(&self) -> usize {
        self.map()
            .values()
            .filter(|entry| entry.call.status() == CallStatus::Pending)
            .count()
    }

    fn notify_if_idle(&self) {
        if self.pending() == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Waits until no pending calls remain, or the deadline passes.
    /// Returns whether the map went pending-free.
    pub async fn wait_idle(&self, deadline: Option<Instant>) -> bool {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // register for wakeups before re-checking, so a notification
            // between the check and the await is not lost
            notified.as_mut().enable();
            if self.pending() == 0 {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.pending() == 0;
                    }
                }
                None => notified.await,
            }
        }
    }
}
