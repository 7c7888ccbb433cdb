//! Worker: a dedicated thread hosting its own event loop and task queue.
//!
//! A [`Worker`] is the standard way for receiver objects to acquire thread
//! affinity away from the caller's thread. It owns a private OS thread
//! running a cooperative event loop, a FIFO queue of async tasks processed
//! serially on that loop, and a start/stop lifecycle with graceful drain.
//!
//! Signal connections to objects bound to a worker's
//! [`ExecutionContext`](crate::ExecutionContext) follow the usual rules:
//! emissions from other threads are queued onto the worker's loop.
//!
//! # Example
//!
//! ```no_run
//! use tsignal_core::Worker;
//!
//! let worker = Worker::new();
//!
//! // The closure is the worker's main coroutine; it receives the stop
//! // event and must await it at some point for `stop` to return promptly.
//! worker
//!     .start(|stop| async move {
//!         // ... set up receivers bound to this thread ...
//!         stop.wait().await;
//!     })
//!     .unwrap();
//!
//! worker
//!     .queue_task(async {
//!         // Runs on the worker thread, after previously queued tasks.
//!     })
//!     .unwrap();
//!
//! worker.stop(); // drains the queue, then joins the thread
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::context::ExecutionContext;
use crate::error::WorkerError;
use crate::logging::targets;
use crate::signal::Signal;

/// Default name for worker threads.
const DEFAULT_THREAD_NAME: &str = "tsignal-worker";

/// Configuration for creating a [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for the worker thread.
    pub name: String,
    /// Stack size for the worker thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for creating workers with custom configuration.
#[derive(Debug, Default)]
pub struct WorkerBuilder {
    config: WorkerConfig,
}

impl WorkerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the stack size for the worker thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Build the worker. It is created in the `Created` state; call
    /// [`Worker::start`] to bring up the thread and loop.
    pub fn build(self) -> Worker {
        Worker::with_config(self.config)
    }
}

/// Lifecycle state of a [`Worker`].
///
/// ```text
/// Created --start--> Starting --(loop ready)--> Running
///         --stop--> Stopping --(queue drained)--> Stopped
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Built but not started.
    Created,
    /// `start` was called; the thread and loop are coming up.
    Starting,
    /// The loop is live and the main coroutine is scheduled.
    Running,
    /// `stop` was called; remaining work is draining.
    Stopping,
    /// The thread has been joined.
    Stopped,
}

/// The stop-event handle shared between a worker and its main coroutine.
///
/// [`Worker::stop`] sets the event; the user-supplied `run` coroutine is
/// expected to await [`StopEvent::wait`] so the worker can shut down
/// promptly.
#[derive(Clone)]
pub struct StopEvent {
    inner: Arc<StopEventState>,
}

struct StopEventState {
    set: AtomicBool,
    notify: Notify,
}

impl StopEvent {
    fn new() -> Self {
        Self {
            inner: Arc::new(StopEventState {
                set: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Set the event, waking all waiters. Setting an already-set event is a
    /// no-op.
    pub fn set(&self) {
        if !self.inner.set.swap(true, Ordering::Release) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the event has been set.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::Acquire)
    }

    /// Wait asynchronously until the event is set.
    ///
    /// Returns immediately if already set.
    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
            if self.is_set() {
                return;
            }
        }
    }
}

/// A task queued onto the worker's loop.
type QueuedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// State shared between the [`Worker`] handle and its thread.
struct WorkerShared {
    state: Mutex<WorkerState>,
    context: Mutex<Option<ExecutionContext>>,
    task_tx: Mutex<Option<mpsc::UnboundedSender<QueuedTask>>>,
    stop: StopEvent,
    started: Signal<()>,
    stopped: Signal<()>,
}

/// A dedicated thread with its own event loop, task queue, and lifecycle.
///
/// # Thread Safety
///
/// `Worker` is `Send + Sync`; tasks may be queued from any thread.
pub struct Worker {
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    config: WorkerConfig,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    /// Create a worker with default configuration, in the `Created` state.
    pub fn new() -> Self {
        Self::with_config(WorkerConfig::default())
    }

    /// Create a worker with custom configuration, in the `Created` state.
    pub fn with_config(config: WorkerConfig) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                state: Mutex::new(WorkerState::Created),
                context: Mutex::new(None),
                task_tx: Mutex::new(None),
                stop: StopEvent::new(),
                started: Signal::new(),
                stopped: Signal::new(),
            }),
            thread: Mutex::new(None),
            config,
        }
    }

    /// Start configuring a worker via [`WorkerBuilder`].
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Whether the worker is in the `Running` state.
    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// The worker's execution context, available once `start` has returned.
    ///
    /// Receiver objects constructed with (or rebound to) this context get
    /// their queued deliveries on the worker thread.
    pub fn execution_context(&self) -> Option<ExecutionContext> {
        self.shared.context.lock().clone()
    }

    /// The stop-event handle. The same handle is passed to `run`.
    pub fn stop_event(&self) -> StopEvent {
        self.shared.stop.clone()
    }

    /// Signal emitted on the worker thread once the loop is live.
    pub fn on_started(&self) -> &Signal<()> {
        &self.shared.started
    }

    /// Signal emitted on the worker thread just before it exits.
    pub fn on_stopped(&self) -> &Signal<()> {
        &self.shared.stopped
    }

    /// Start the worker thread and block until it is running.
    ///
    /// Spawns the thread, brings up its event loop, records the worker's
    /// [`ExecutionContext`], schedules `run(stop_event)` and the task-queue
    /// processor, and only then returns; afterwards
    /// [`queue_task`](Self::queue_task) and signal connections observe a
    /// valid context. Arguments for `run` are passed as closure captures.
    ///
    /// `run` must await the stop event at some point, otherwise
    /// [`stop`](Self::stop) cannot return promptly; the queue is processed
    /// concurrently with `run` on the same loop.
    ///
    /// # Errors
    ///
    /// [`WorkerError::AlreadyStarted`] unless the worker is in the
    /// `Created` state; [`WorkerError::ThreadSpawn`] /
    /// [`WorkerError::RuntimeCreation`] when the thread or its loop cannot
    /// be brought up.
    pub fn start<F, Fut>(&self, run: F) -> std::result::Result<(), WorkerError>
    where
        F: FnOnce(StopEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if *state != WorkerState::Created {
                return Err(WorkerError::AlreadyStarted(*state));
            }
            *state = WorkerState::Starting;
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();

        let mut builder = thread::Builder::new().name(self.config.name.clone());
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let spawned = builder.spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    *shared.state.lock() = WorkerState::Stopped;
                    let _ = ready_tx.send(Err(WorkerError::RuntimeCreation(err.to_string())));
                    return;
                }
            };

            let (task_tx, task_rx) = mpsc::unbounded_channel();

            runtime.block_on(async {
                *shared.context.lock() = Some(ExecutionContext::current());
                *shared.task_tx.lock() = Some(task_tx);

                let stop = shared.stop.clone();
                let queue = tokio::spawn(process_queue(task_rx, stop.clone()));
                let run_task = tokio::spawn(run(stop.clone()));

                *shared.state.lock() = WorkerState::Running;
                shared.started.emit(());
                tracing::info!(target: targets::WORKER, "worker running");
                let _ = ready_tx.send(Ok(()));

                stop.wait().await;

                // run honors the stop event; wait for it to wind down
                // before the loop goes away.
                if let Err(err) = run_task.await {
                    if err.is_panic() {
                        tracing::error!(
                            target: targets::WORKER,
                            "worker run coroutine panicked"
                        );
                    }
                }

                // Remaining queued tasks run to completion before the loop
                // goes away.
                let _ = queue.await;

                shared.stopped.emit(());
                tracing::debug!(target: targets::WORKER, "worker loop finished");
            });
        });

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
            }
            Err(err) => {
                *self.shared.state.lock() = WorkerState::Stopped;
                return Err(WorkerError::ThreadSpawn(err.to_string()));
            }
        }

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.join_thread();
                Err(err)
            }
            Err(_) => {
                self.join_thread();
                *self.shared.state.lock() = WorkerState::Stopped;
                Err(WorkerError::ThreadSpawn(
                    "worker thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Start the worker with a main coroutine that only awaits the stop
    /// event, leaving the task queue as the worker's sole workload.
    pub fn start_default(&self) -> std::result::Result<(), WorkerError> {
        self.start(|stop| async move {
            stop.wait().await;
        })
    }

    /// Enqueue a task for serial execution on the worker loop.
    ///
    /// Tasks run in submission order; each runs to completion (including
    /// its awaits) before the next one starts. A panicking task is logged
    /// and does not stop the worker.
    ///
    /// # Errors
    ///
    /// [`WorkerError::NotStarted`] before `start`;
    /// [`WorkerError::Stopped`] once `stop` has been requested.
    pub fn queue_task<Fut>(&self, task: Fut) -> std::result::Result<(), WorkerError>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self.state() {
            WorkerState::Created | WorkerState::Starting => return Err(WorkerError::NotStarted),
            WorkerState::Stopping | WorkerState::Stopped => {
                tracing::warn!(
                    target: targets::WORKER,
                    "task rejected: worker is stopped"
                );
                return Err(WorkerError::Stopped);
            }
            WorkerState::Running => {}
        }

        let sender = self.shared.task_tx.lock().clone();
        let Some(sender) = sender else {
            return Err(WorkerError::NotStarted);
        };
        sender.send(Box::pin(task)).map_err(|_| {
            tracing::warn!(
                target: targets::WORKER,
                "task rejected: worker queue already closed"
            );
            WorkerError::Stopped
        })
    }

    /// Stop the worker and wait for the thread to join.
    ///
    /// Sets the stop event, lets `run` finish, drains the remaining queued
    /// tasks to completion, and returns once the thread has been joined.
    /// A no-op from `Created` and `Stopped`; idempotent from `Stopping`.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            match *state {
                WorkerState::Created | WorkerState::Stopped => return,
                WorkerState::Stopping => {}
                WorkerState::Starting | WorkerState::Running => *state = WorkerState::Stopping,
            }
        }

        tracing::info!(target: targets::WORKER, "stopping worker");
        self.shared.stop.set();
        self.join_thread();
        *self.shared.state.lock() = WorkerState::Stopped;
        tracing::info!(target: targets::WORKER, "worker stopped");
    }

    fn join_thread(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Don't block in drop - just request shutdown.
        self.shared.stop.set();
    }
}

/// Drain the task queue serially until the stop event fires and the
/// remaining backlog has run.
async fn process_queue(mut task_rx: mpsc::UnboundedReceiver<QueuedTask>, stop: StopEvent) {
    let mut draining = false;
    loop {
        tokio::select! {
            task = task_rx.recv() => match task {
                Some(task) => run_queued_task(task).await,
                None => break,
            },
            _ = stop.wait(), if !draining => {
                // Refuse new tasks, but run out everything already queued.
                task_rx.close();
                draining = true;
            }
        }
    }
}

/// Run one queued task, containing panics so the queue keeps going.
async fn run_queued_task(task: QueuedTask) {
    let handle = tokio::spawn(task);
    if let Err(err) = handle.await {
        if err.is_panic() {
            tracing::error!(
                target: targets::WORKER,
                "queued task panicked; worker continues"
            );
        }
    }
}
