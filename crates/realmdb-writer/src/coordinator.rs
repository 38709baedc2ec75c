//! Coalescing write queue and its background threads
//!
//! The queue is an insertion-ordered map behind a fair lock. Re-queuing an
//! identifier removes the pending item and appends the new one, so the
//! worker always runs the most recent submission and runs it once.
//!
//! Two threads exist while the coordinator is running:
//!
//! - **executor**: takes the head of the queue, runs it outside the lock, and
//!   parks when the queue is empty.
//! - **notifier**: drains a channel of [`WriteEvent`]s and hands each to the
//!   registered observers, so slow observers never hold up the executor.
//!
//! A restarted run's notifier waits for the previous one to exit, so
//! observers see every event of one run before any event of the next.
//! Dropping the last [`WriteCoordinator`] clone stops the threads after the
//! queue drains.

use crate::config::WriterConfig;
use crate::observer::{
    FailureCause, FailureHandler, ObserverId, WorkFailure, WriteEvent, WriteObserver, log_failure,
    panic_message,
};
use crate::state::{AtomicState, CoordinatorState};
use crate::{Result, WriterError};
use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use parking_lot::{Condvar, FairMutex, Mutex, RwLock};
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Outcome of a queued item.
pub type WorkResult = std::result::Result<(), Box<dyn Error + Send + Sync>>;

/// A queued item.
pub type Work = Box<dyn FnOnce() -> WorkResult + Send + 'static>;

enum Signal {
    Event(WriteEvent),
    Exit,
}

enum Step {
    Run(String, Work),
    Park,
    Retry,
    Exit,
}

struct Shared {
    config: WriterConfig,
    state: AtomicState,
    queue: FairMutex<IndexMap<String, Work>>,
    /// Set by `wake`, consumed by `park`
    wake_flag: Mutex<bool>,
    wake_signal: Condvar,
    events: Mutex<Option<Sender<Signal>>>,
    /// Disconnects when the most recent notifier exits
    notifier_done: Mutex<Option<Receiver<()>>>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn WriteObserver>)>>,
    next_observer: AtomicU64,
    failure_handler: RwLock<FailureHandler>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Stops the threads once the last coordinator handle is dropped.
struct Owner(Arc<Shared>);

impl Drop for Owner {
    fn drop(&mut self) {
        self.0.stop(false);
    }
}

/// Runs queued index writes on a dedicated background thread.
///
/// Cloning is cheap and every clone drives the same queue and threads. The
/// threads only hold the shared state, so dropping every clone stops them
/// once pending work has run.
#[derive(Clone)]
pub struct WriteCoordinator {
    shared: Arc<Shared>,
    _owner: Arc<Owner>,
}

impl WriteCoordinator {
    /// Create a stopped coordinator. Threads start on the first `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::InvalidArgument`] if the configuration is invalid.
    pub fn new(config: WriterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// The process-wide coordinator, created on first use with default
    /// configuration.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<WriteCoordinator> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::build(WriterConfig::default()))
    }

    fn build(config: WriterConfig) -> Self {
        let failure_handler: FailureHandler = Arc::new(log_failure);
        let shared = Arc::new(Shared {
            config,
            state: AtomicState::new(CoordinatorState::Stopped),
            queue: FairMutex::new(IndexMap::new()),
            wake_flag: Mutex::new(false),
            wake_signal: Condvar::new(),
            events: Mutex::new(None),
            notifier_done: Mutex::new(None),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(0),
            failure_handler: RwLock::new(failure_handler),
            threads: Mutex::new(Vec::new()),
        });
        Self {
            _owner: Arc::new(Owner(Arc::clone(&shared))),
            shared,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &WriterConfig {
        &self.shared.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> CoordinatorState {
        self.shared.state.load()
    }

    /// Number of items waiting to run
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether an item is waiting under `identifier`
    pub fn is_queued(&self, identifier: &str) -> bool {
        self.shared.queue.lock().contains_key(identifier)
    }

    /// Queue `work` under `identifier`, replacing any pending item with the
    /// same identifier.
    ///
    /// Starts the background threads if the coordinator is stopped. While a
    /// `stop(false)` is draining, the item joins that drain and the call
    /// returns without waiting. An idle worker is woken early once more than
    /// `wake_threshold` items wait; otherwise it picks the work up when its
    /// park times out.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::InvalidArgument`] for an empty identifier,
    /// [`WriterError::Terminated`] once `stop(true)` has been called and
    /// [`WriterError::Spawn`] if the threads cannot be started.
    pub fn queue<F>(&self, identifier: impl Into<String>, work: F) -> Result<()>
    where
        F: FnOnce() -> WorkResult + Send + 'static,
    {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(WriterError::InvalidArgument(
                "identifier must not be empty".to_string(),
            ));
        }
        if self.state().is_terminated() {
            return Err(WriterError::Terminated);
        }

        let pending = {
            let mut queue = self.shared.queue.lock();
            let replaced = queue.shift_remove(&identifier).is_some();
            trace!(identifier = %identifier, replaced, "Queued index write");
            queue.insert(identifier.clone(), Box::new(work));
            queue.len()
        };

        if let Err(e) = self.ensure_started() {
            self.shared.queue.lock().shift_remove(&identifier);
            return Err(e);
        }

        if pending > self.shared.config.wake_threshold && self.state() == CoordinatorState::Idle {
            debug!("{} writes pending, waking idle writer", pending);
            self.shared.wake();
        }
        Ok(())
    }

    /// Remove a pending item before it runs.
    ///
    /// Returns false if nothing was pending under `identifier`, including
    /// when the item is already running. Cancelling the last pending item
    /// also publishes [`WriteEvent::QueueDrained`].
    pub fn cancel(&self, identifier: &str) -> bool {
        let (removed, drained) = {
            let mut queue = self.shared.queue.lock();
            let removed = queue.shift_remove(identifier).is_some();
            (removed, queue.is_empty())
        };
        if removed {
            trace!(identifier = %identifier, "Cancelled index write");
            self.shared.publish(WriteEvent::Cancelled {
                identifier: identifier.to_string(),
            });
            if drained {
                self.shared.publish(WriteEvent::QueueDrained);
            }
        }
        removed
    }

    /// Wake the worker if it is parked.
    pub fn wake(&self) {
        self.shared.wake();
    }

    /// Register an observer for completion events.
    pub fn add_observer(&self, observer: impl WriteObserver + 'static) -> ObserverId {
        let id = ObserverId(self.shared.next_observer.fetch_add(1, Ordering::Relaxed));
        let observer: Arc<dyn WriteObserver> = Arc::new(observer);
        self.shared.observers.write().push((id, observer));
        id
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Replace the handler called for items that fail or panic.
    ///
    /// The default handler logs the failure with `tracing::error!`.
    pub fn set_failure_handler(&self, handler: impl Fn(&WorkFailure) + Send + Sync + 'static) {
        *self.shared.failure_handler.write() = Arc::new(handler);
    }

    /// Ask the worker to stop.
    ///
    /// With `terminate == false` the queue is drained first and the
    /// coordinator can be restarted by a later `queue`. With `terminate ==
    /// true` the worker stops after the current item, pending items are
    /// dropped, and the coordinator ends in [`CoordinatorState::Done`].
    /// Calling this again, or on a stopped coordinator, is harmless.
    pub fn stop(&self, terminate: bool) {
        self.shared.stop(terminate);
    }

    /// Wait for the background threads of every run so far to exit.
    ///
    /// Threads of a run started while waiting, by a `queue` racing the stop,
    /// are not waited for. Must not be called from inside queued work or an
    /// observer.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.shared.threads.lock());
        for handle in handles {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!("Index writer thread {} panicked", name);
            }
        }
    }

    /// `stop` followed by `join`.
    pub fn shutdown(&self, terminate: bool) {
        self.stop(terminate);
        self.join();
    }

    fn ensure_started(&self) -> Result<()> {
        loop {
            match self.state() {
                CoordinatorState::Stopped => {
                    if self
                        .shared
                        .state
                        .transition(CoordinatorState::Stopped, CoordinatorState::Starting)
                    {
                        return self.shared.spawn_threads();
                    }
                }
                CoordinatorState::Terminating | CoordinatorState::Done => {
                    return Err(WriterError::Terminated);
                }
                // A stopping worker drains the queue before it exits and
                // restarts if anything arrives after its last look
                CoordinatorState::Stopping
                | CoordinatorState::Starting
                | CoordinatorState::Idle
                | CoordinatorState::Running => return Ok(()),
            }
        }
    }
}

impl fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn stop(&self, terminate: bool) {
        loop {
            let current = self.state.load();
            let target = match current {
                CoordinatorState::Starting
                | CoordinatorState::Idle
                | CoordinatorState::Running => {
                    if terminate {
                        CoordinatorState::Terminating
                    } else {
                        CoordinatorState::Stopping
                    }
                }
                CoordinatorState::Stopping if terminate => CoordinatorState::Terminating,
                CoordinatorState::Stopped if terminate => CoordinatorState::Done,
                _ => return,
            };

            if self.state.transition(current, target) {
                info!("Index writer {} -> {}", current, target);
                self.wake();
                return;
            }
        }
    }

    /// Start both threads. The caller has moved the state to `Starting`.
    fn spawn_threads(self: &Arc<Self>) -> Result<()> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        *self.events.lock() = Some(sender);
        *self.wake_flag.lock() = false;

        let (done, done_signal) = crossbeam_channel::bounded::<()>(0);
        let previous = self.notifier_done.lock().replace(done_signal);

        let notifier_name = self.config.notifier_thread_name();
        let shared = Arc::clone(self);
        let notifier = thread::Builder::new()
            .name(notifier_name.clone())
            .spawn(move || {
                let _done = done;
                if let Some(previous) = previous {
                    // Disconnects once the previous run's notifier is gone
                    let _ = previous.recv();
                }
                shared.run_notifier(&receiver);
            });
        let notifier = match notifier {
            Ok(handle) => handle,
            Err(source) => {
                self.abort_start();
                return Err(WriterError::Spawn {
                    name: notifier_name,
                    source,
                });
            }
        };

        let worker_name = self.config.thread_name.clone();
        let shared = Arc::clone(self);
        let worker = thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || shared.run_worker());
        let worker = match worker {
            Ok(handle) => handle,
            Err(source) => {
                // The notifier exits once its sender is dropped
                self.abort_start();
                return Err(WriterError::Spawn {
                    name: worker_name,
                    source,
                });
            }
        };

        let mut threads = self.threads.lock();
        threads.retain(|handle| !handle.is_finished());
        threads.push(notifier);
        threads.push(worker);
        info!("Index writer started on thread {}", worker_name);
        Ok(())
    }

    fn abort_start(&self) {
        self.events.lock().take();
        self.state
            .transition(CoordinatorState::Starting, CoordinatorState::Stopped);
    }

    fn run_worker(self: &Arc<Self>) {
        // Park once before the first drain so early submissions can coalesce
        if self
            .state
            .transition(CoordinatorState::Starting, CoordinatorState::Idle)
        {
            if self.queue.lock().len() <= self.config.wake_threshold {
                self.park();
            }
            self.state
                .transition(CoordinatorState::Idle, CoordinatorState::Running);
        }

        let mut drained_notified = true;
        loop {
            match self.next_step(&mut drained_notified) {
                Step::Run(identifier, work) => self.execute(identifier, work),
                Step::Park => {
                    self.park();
                    self.state
                        .transition(CoordinatorState::Idle, CoordinatorState::Running);
                }
                Step::Retry => {}
                Step::Exit => break,
            }
        }

        self.finish();
    }

    fn next_step(&self, drained_notified: &mut bool) -> Step {
        let mut queue = self.queue.lock();
        let state = self.state.load();
        match state {
            CoordinatorState::Running | CoordinatorState::Idle => {
                if let Some((identifier, work)) = queue.shift_remove_index(0) {
                    *drained_notified = false;
                    return Step::Run(identifier, work);
                }
                if !*drained_notified {
                    *drained_notified = true;
                    self.publish(WriteEvent::QueueDrained);
                }
                if state == CoordinatorState::Idle
                    || self
                        .state
                        .transition(CoordinatorState::Running, CoordinatorState::Idle)
                {
                    Step::Park
                } else {
                    // A stop landed between the load and the transition
                    Step::Retry
                }
            }
            CoordinatorState::Stopping => {
                if let Some((identifier, work)) = queue.shift_remove_index(0) {
                    *drained_notified = false;
                    Step::Run(identifier, work)
                } else {
                    if !*drained_notified {
                        *drained_notified = true;
                        self.publish(WriteEvent::QueueDrained);
                    }
                    Step::Exit
                }
            }
            CoordinatorState::Terminating
            | CoordinatorState::Stopped
            | CoordinatorState::Starting
            | CoordinatorState::Done => Step::Exit,
        }
    }

    fn execute(&self, identifier: String, work: Work) {
        trace!(identifier = %identifier, "Running index write");
        let cause = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(FailureCause::Error(e)),
            Err(payload) => Some(FailureCause::Panic(panic_message(payload.as_ref()))),
        };

        let succeeded = cause.is_none();
        if let Some(cause) = cause {
            self.report_failure(&WorkFailure {
                identifier: identifier.clone(),
                cause,
            });
        }

        self.publish(WriteEvent::Completed {
            identifier,
            succeeded,
        });
    }

    fn report_failure(&self, failure: &WorkFailure) {
        let handler = Arc::clone(&*self.failure_handler.read());
        if panic::catch_unwind(AssertUnwindSafe(|| handler(failure))).is_err() {
            warn!("Failure handler panicked while reporting: {}", failure);
        }
    }

    fn finish(self: &Arc<Self>) {
        let final_state = loop {
            let current = self.state.load();
            let next = current.next();
            if current == CoordinatorState::Terminating {
                let abandoned = {
                    let mut queue = self.queue.lock();
                    let count = queue.len();
                    queue.clear();
                    count
                };
                if abandoned > 0 {
                    warn!("Index writer terminated with {} writes abandoned", abandoned);
                }
            }

            // Detach the notifier before the state change so a restart
            // installs a fresh channel that this run cannot close.
            if let Some(sender) = self.events.lock().take() {
                let _ = sender.send(Signal::Exit);
            }

            if self.state.transition(current, next) {
                break next;
            }
        };
        info!("Index writer exited ({})", final_state);

        // Work queued while this run was deciding to exit
        if final_state == CoordinatorState::Stopped
            && !self.queue.lock().is_empty()
            && self
                .state
                .transition(CoordinatorState::Stopped, CoordinatorState::Starting)
        {
            debug!("Writes queued during stop, restarting index writer");
            if let Err(e) = self.spawn_threads() {
                error!("Failed to restart index writer: {}", e);
            }
        }
    }

    fn publish(&self, event: WriteEvent) {
        if let Some(sender) = self.events.lock().as_ref() {
            let _ = sender.send(Signal::Event(event));
        }
    }

    fn run_notifier(&self, receiver: &Receiver<Signal>) {
        for signal in receiver {
            match signal {
                Signal::Event(event) => self.notify_observers(&event),
                Signal::Exit => break,
            }
        }
        debug!("Index writer notifier exited");
    }

    fn notify_observers(&self, event: &WriteEvent) {
        let observers: Vec<Arc<dyn WriteObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                warn!("Write observer panicked on {:?}", event);
            }
        }
    }

    fn park(&self) {
        let mut woken = self.wake_flag.lock();
        if !*woken {
            let _ = self
                .wake_signal
                .wait_for(&mut woken, self.config.idle_timeout());
        }
        *woken = false;
    }

    fn wake(&self) {
        *self.wake_flag.lock() = true;
        self.wake_signal.notify_one();
    }
}
