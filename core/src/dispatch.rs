//! Notification dispatcher
//!
//! Native stacks invoke property callbacks on their own threads and must never be
//! blocked or unwound into. The dispatcher moves every listener invocation onto a
//! grow-as-needed blocking pool and isolates listener failures.
//!
//! Work is grouped into lanes, one per `(source address, property kind)`. Tasks of
//! the same lane run one after another in submission order; different lanes run
//! concurrently with no ordering between them.

use crate::address::Address;
use crate::config::DispatcherConfig;
use crate::error::{ListenerExecutionError, TransportError};
use crate::notification::PropertyKind;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, info, warn};

/// A unit of listener work
type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Ordering domain of dispatched work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaneKey {
    pub address: Address,
    pub property: PropertyKind,
}

impl LaneKey {
    pub fn new(address: Address, property: PropertyKind) -> Self {
        Self { address, property }
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.property)
    }
}

/// How `Dispatcher::shutdown` treats work that is still queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait up to the given duration for queued and running tasks to finish
    Drain(Duration),
    /// Return immediately; queued tasks may never run
    Abandon,
}

#[derive(Default)]
struct Lane {
    queue: VecDeque<Task>,
    draining: bool,
}

#[derive(Default)]
struct LaneTable {
    lanes: HashMap<LaneKey, Lane>,
    /// Tasks queued or running across all lanes
    pending: usize,
}

impl LaneTable {
    /// Drop every queued task of one lane; returns how many were dropped
    fn discard_queued(&mut self, lane: &LaneKey) -> usize {
        let dropped = self
            .lanes
            .get_mut(lane)
            .map(|l| l.queue.drain(..).count())
            .unwrap_or(0);
        self.pending -= dropped;
        dropped
    }
}

struct Shared {
    table: Mutex<LaneTable>,
    idle: Condvar,
    closed: AtomicBool,
    abandoned: AtomicBool,
}

/// Fire-and-forget executor for listener invocations
pub struct Dispatcher {
    shared: Arc<Shared>,
    handle: Handle,
    /// Present when the dispatcher built its own runtime
    runtime: Mutex<Option<Runtime>>,
    drain_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher backed by its own runtime
    pub fn new(config: &DispatcherConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_threads)
            .thread_keep_alive(Duration::from_millis(config.keep_alive_ms))
            .thread_name(config.thread_name.clone())
            .build()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;

        info!(
            "Notification dispatcher started (up to {} listener threads)",
            config.max_threads
        );

        Ok(Self {
            shared: Arc::new(Shared::new()),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
        })
    }

    /// Create a dispatcher that runs listeners on the blocking pool of an existing runtime.
    ///
    /// If that runtime goes away first, the dispatcher shuts itself down and drops
    /// the affected work with a warning.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            handle,
            runtime: Mutex::new(None),
            drain_timeout: Duration::from_millis(DispatcherConfig::default().drain_timeout_ms),
        }
    }

    /// Submit a task for asynchronous execution on the given lane.
    ///
    /// Never blocks on listener work. Tasks submitted after shutdown are dropped.
    pub fn dispatch<F>(&self, lane: LaneKey, task: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let start_drainer = {
            let mut table = self.shared.table.lock();
            if self.shared.closed.load(Ordering::Acquire) {
                warn!("Dropping {} notification: dispatcher is shut down", lane);
                return;
            }
            table.pending += 1;
            let entry = table.lanes.entry(lane.clone()).or_default();
            entry.queue.push_back(Box::new(task));
            !std::mem::replace(&mut entry.draining, true)
        };

        if start_drainer {
            let drainer = Drainer {
                shared: Arc::clone(&self.shared),
                lane: Some(lane),
            };
            self.handle.spawn_blocking(move || drainer.run());
        }
    }

    /// Number of tasks queued or running
    pub fn pending(&self) -> usize {
        self.shared.table.lock().pending
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Block until no work is pending or the timeout elapses; returns true when idle
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.wait_idle(timeout)
    }

    /// Stop accepting work and release the worker pool. Idempotent.
    ///
    /// Must not be called from inside a listener.
    pub fn shutdown(&self, mode: ShutdownMode) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let runtime = self.runtime.lock().take();
        match mode {
            ShutdownMode::Drain(timeout) => {
                let started = Instant::now();
                if !self.shared.wait_idle(timeout) {
                    warn!(
                        "Dispatcher drain timed out with {} notification(s) pending",
                        self.pending()
                    );
                }
                if let Some(runtime) = runtime {
                    runtime.shutdown_timeout(timeout.saturating_sub(started.elapsed()));
                }
            }
            ShutdownMode::Abandon => {
                let abandoned = self.shared.abandon();
                if abandoned > 0 {
                    debug!("Abandoned {} queued notification(s)", abandoned);
                }
                if let Some(runtime) = runtime {
                    runtime.shutdown_background();
                }
            }
        }
        info!("Notification dispatcher stopped");
    }

    /// Drain timeout taken from the configuration this dispatcher was built with
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Dropping a Runtime from async context panics; shutdown_background never does
        if let Some(runtime) = self.runtime.get_mut().take() {
            self.shared.closed.store(true, Ordering::Release);
            runtime.shutdown_background();
        }
    }
}

impl Shared {
    fn new() -> Self {
        Self {
            table: Mutex::new(LaneTable::default()),
            idle: Condvar::new(),
            closed: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
        }
    }

    /// Drop all queued work; tasks already running finish on their own
    fn abandon(&self) -> usize {
        let mut table = self.table.lock();
        self.abandoned.store(true, Ordering::Release);
        let lanes: Vec<LaneKey> = table.lanes.keys().cloned().collect();
        let dropped = lanes.iter().map(|lane| table.discard_queued(lane)).sum();
        self.idle.notify_all();
        dropped
    }

    /// Forget a lane whose drainer will never run
    fn discard_lane(&self, lane: &LaneKey) -> usize {
        let mut table = self.table.lock();
        let dropped = table.discard_queued(lane);
        table.lanes.remove(lane);
        self.idle.notify_all();
        dropped
    }

    /// Run the tasks of one lane until its queue is empty
    fn drain(&self, lane: LaneKey) {
        loop {
            let task = {
                let mut table = self.table.lock();
                if self.abandoned.load(Ordering::Acquire) {
                    table.discard_queued(&lane);
                }
                let next = table.lanes.get_mut(&lane).and_then(|l| l.queue.pop_front());
                match next {
                    Some(task) => task,
                    None => {
                        table.lanes.remove(&lane);
                        return;
                    }
                }
            };

            if let Some(reason) = run_isolated(task) {
                let failure =
                    ListenerExecutionError::new(lane.address.clone(), lane.property, reason);
                error!(
                    address = %lane.address,
                    property = %lane.property,
                    "{}",
                    failure
                );
            }

            let mut table = self.table.lock();
            table.pending -= 1;
            if table.pending == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut table = self.table.lock();
        while table.pending > 0 {
            if self.idle.wait_until(&mut table, deadline).timed_out() {
                return table.pending == 0;
            }
        }
        true
    }
}

/// Drains one lane on the blocking pool.
///
/// A runtime that is shutting down drops blocking work without running it; the
/// lane is then discarded and the dispatcher closed so later work is rejected.
struct Drainer {
    shared: Arc<Shared>,
    lane: Option<LaneKey>,
}

impl Drainer {
    fn run(mut self) {
        if let Some(lane) = self.lane.take() {
            self.shared.drain(lane);
        }
    }
}

impl Drop for Drainer {
    fn drop(&mut self) {
        let Some(lane) = self.lane.take() else {
            return;
        };
        let was_closed = self.shared.closed.swap(true, Ordering::AcqRel);
        let dropped = self.shared.discard_lane(&lane);
        if was_closed {
            debug!("Discarded {} queued {} notification(s)", dropped, lane);
        } else {
            warn!(
                "Runtime is gone; dropped {} {} notification(s) and shut the dispatcher down",
                dropped, lane
            );
        }
    }
}

/// Run a task, turning an error or a panic into a failure description
fn run_isolated(task: Task) -> Option<String> {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn lane(device: &str, property: PropertyKind) -> LaneKey {
        let address = Address::adapter("tinyb", "11:22:33:44:55:66")
            .and_then(|a| a.with_device(device))
            .expect("Valid address");
        LaneKey::new(address, property)
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&DispatcherConfig::default()).expect("Dispatcher")
    }

    #[test]
    fn test_same_lane_runs_in_submission_order() {
        let dispatcher = dispatcher();
        let key = lane("12:34:56:78:90:12", PropertyKind::Rssi);
        let (tx, rx) = mpsc::channel();

        for i in 0..200 {
            let tx = tx.clone();
            dispatcher.dispatch(key.clone(), move || {
                tx.send(i)?;
                Ok(())
            });
        }

        let received: Vec<i32> = (0..200)
            .map(|_| rx.recv_timeout(TIMEOUT).expect("Delivered"))
            .collect();
        assert_eq!(received, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_failing_task_does_not_stop_the_lane() {
        let dispatcher = dispatcher();
        let key = lane("12:34:56:78:90:12", PropertyKind::Connected);
        let (tx, rx) = mpsc::channel();

        dispatcher.dispatch(key.clone(), || Err(anyhow::anyhow!("listener rejected value")));
        dispatcher.dispatch(key.clone(), || panic!("listener blew up"));
        dispatcher.dispatch(key, move || {
            tx.send("delivered")?;
            Ok(())
        });

        assert_eq!(rx.recv_timeout(TIMEOUT), Ok("delivered"));
        assert!(dispatcher.wait_idle(TIMEOUT));
    }

    #[test]
    fn test_blocked_lane_does_not_block_other_lanes() {
        let dispatcher = dispatcher();
        let slow = lane("12:34:56:78:90:12", PropertyKind::Rssi);
        let fast = lane("AA:BB:CC:DD:EE:FF", PropertyKind::Rssi);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        dispatcher.dispatch(slow, move || {
            release_rx.recv_timeout(TIMEOUT)?;
            Ok(())
        });
        dispatcher.dispatch(fast, move || {
            done_tx.send(())?;
            Ok(())
        });

        assert!(done_rx.recv_timeout(TIMEOUT).is_ok());
        release_tx.send(()).expect("Release slow lane");
        assert!(dispatcher.wait_idle(TIMEOUT));
    }

    #[test]
    fn test_property_kinds_are_separate_lanes() {
        let connected = lane("12:34:56:78:90:12", PropertyKind::Connected);
        let rssi = lane("12:34:56:78:90:12", PropertyKind::Rssi);

        assert_ne!(connected, rssi);
        assert_eq!(connected.to_string(), "tinyb://11:22:33:44:55:66/12:34:56:78:90:12#connected");
    }

    #[test]
    fn test_pending_counts_queued_work() {
        let dispatcher = dispatcher();
        let key = lane("12:34:56:78:90:12", PropertyKind::Blocked);
        let (release_tx, release_rx) = mpsc::channel::<()>();

        dispatcher.dispatch(key.clone(), move || {
            release_rx.recv_timeout(TIMEOUT)?;
            Ok(())
        });
        dispatcher.dispatch(key, || Ok(()));

        assert_eq!(dispatcher.pending(), 2);
        release_tx.send(()).expect("Release");
        assert!(dispatcher.wait_idle(TIMEOUT));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_drain_shutdown_waits_for_queued_work() {
        let dispatcher = dispatcher();
        let key = lane("12:34:56:78:90:12", PropertyKind::Value);
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            dispatcher.dispatch(key.clone(), move || {
                std::thread::sleep(Duration::from_millis(5));
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        dispatcher.shutdown(ShutdownMode::Drain(TIMEOUT));

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert!(dispatcher.is_shut_down());
    }

    #[test]
    fn test_dispatch_after_shutdown_is_dropped() {
        let dispatcher = dispatcher();
        dispatcher.shutdown(ShutdownMode::Abandon);
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        dispatcher.dispatch(lane("12:34:56:78:90:12", PropertyKind::Powered), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(dispatcher.pending(), 0);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_abandon_discards_work_queued_behind_running_task() {
        let dispatcher = dispatcher();
        let key = lane("12:34:56:78:90:12", PropertyKind::Value);
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch(key.clone(), move || {
            started_tx.send(())?;
            gate_rx.recv_timeout(TIMEOUT)?;
            Ok(())
        });
        started_rx.recv_timeout(TIMEOUT).expect("Gated task running");
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            dispatcher.dispatch(key.clone(), move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(dispatcher.pending(), 6);

        dispatcher.shutdown(ShutdownMode::Abandon);
        assert_eq!(dispatcher.pending(), 1);
        gate_tx.send(()).expect("Release gated task");

        assert!(dispatcher.wait_idle(TIMEOUT));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_after_runtime_is_gone_is_rejected() {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .expect("Runtime");
        let dispatcher = Dispatcher::with_handle(runtime.handle().clone());
        drop(runtime);
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            dispatcher.dispatch(lane("12:34:56:78:90:12", PropertyKind::Rssi), move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert!(dispatcher.is_shut_down());
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let dispatcher = dispatcher();

        dispatcher.shutdown(ShutdownMode::Drain(Duration::from_millis(100)));
        dispatcher.shutdown(ShutdownMode::Abandon);

        assert!(dispatcher.is_shut_down());
    }

    #[test]
    fn test_with_handle_uses_existing_runtime() {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .expect("Runtime");
        let dispatcher = Dispatcher::with_handle(runtime.handle().clone());
        let (tx, rx) = mpsc::channel();

        dispatcher.dispatch(lane("12:34:56:78:90:12", PropertyKind::Rssi), move || {
            tx.send(-42i16)?;
            Ok(())
        });

        assert_eq!(rx.recv_timeout(TIMEOUT), Ok(-42));
        dispatcher.shutdown(ShutdownMode::Drain(TIMEOUT));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = DispatcherConfig {
            max_threads: 0,
            ..DispatcherConfig::default()
        };

        assert!(matches!(
            Dispatcher::new(&config),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_run_isolated_reports_failures() {
        let panicking: Task = Box::new(|| -> anyhow::Result<()> { panic!("boom") });
        let failing: Task = Box::new(|| -> anyhow::Result<()> { Err(anyhow::anyhow!("nope")) });
        let succeeding: Task = Box::new(|| -> anyhow::Result<()> { Ok(()) });

        assert_eq!(run_isolated(panicking).as_deref(), Some("panicked: boom"));
        assert_eq!(run_isolated(failing).as_deref(), Some("nope"));
        assert_eq!(run_isolated(succeeding), None);
    }
}
