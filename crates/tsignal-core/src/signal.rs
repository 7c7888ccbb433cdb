//! Signal/slot primitive for tsignal-core.
//!
//! A [`Signal`] is an emission point owned by some object. Slots (callables)
//! are connected to it and invoked, in connect order, whenever the signal is
//! emitted. Slots may be plain procedures or async procedures, free
//! callables or methods of a receiver object, and each connection carries a
//! delivery mode, an optional one-shot flag, and an optional weak receiver
//! reference.
//!
//! # Connection Types
//!
//! - **Direct**: slot is called immediately in the emitting thread
//! - **Queued**: slot execution is posted to the receiver's event loop
//! - **Auto**: direct if same thread and sync, queued otherwise (default)
//!
//! # Thread Safety
//!
//! `Signal<Args>` is `Send + Sync`; emits may happen from any thread
//! concurrently. Emission never holds the connection-list lock while a slot
//! runs, so slots are free to connect, disconnect, and emit recursively.
//! An emission works on a snapshot of the connection list: changes made
//! while it is in progress only affect subsequent emits.
//!
//! # Example
//!
//! ```
//! use tsignal_core::Signal;
//!
//! let text_changed = Signal::<String>::new();
//!
//! let conn_id = text_changed.connect(|text| {
//!     println!("Text changed to: {}", text);
//! });
//!
//! text_changed.emit("Hello, World!".to_string());
//!
//! text_changed.disconnect(conn_id);
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::connection::{ConnectionRecord, ReceiverRef, Slot, SlotFuture};
use crate::context::{ContextBound, ExecutionContext};
use crate::dispatch::{self, DeliveryOutcome};
use crate::error::ConnectError;
use crate::logging::targets;

pub use crate::connection::{ConnectionId, ConnectionType};

/// A signal with a typed argument profile and any number of connected slots.
///
/// # Type Parameter
///
/// - `Args`: the argument payload passed to slots. Use `()` for signals
///   without arguments, or a tuple like `(String, i32)` for several. The
///   payload is cloned once per queued delivery to cross threads; direct
///   deliveries borrow it.
///
/// # Lifetime
///
/// A signal lives exactly as long as its owner. Dropping the signal drops
/// every connection with it; already-posted queued invocations still run.
pub struct Signal<Args> {
    /// Live connections in insertion order, which is also delivery order.
    connections: Mutex<Vec<Arc<ConnectionRecord<Args>>>>,
    /// Number of emissions currently in progress, for diagnostics only.
    emit_depth: AtomicUsize,
}

impl<Args: Clone + Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            emit_depth: AtomicUsize::new(0),
        }
    }

    /// Begin a connection with explicit mode and flags.
    ///
    /// The returned [`ConnectionBuilder`] finishes with one of its terminal
    /// methods, choosing the slot shape:
    ///
    /// ```
    /// use tsignal_core::{ConnectionType, Signal};
    ///
    /// let signal = Signal::<i32>::new();
    /// signal
    ///     .connection()
    ///     .with_type(ConnectionType::Direct)
    ///     .one_shot()
    ///     .slot(|n| println!("{n}"));
    /// signal.emit(1);
    /// signal.emit(2); // one-shot: nothing happens
    /// ```
    pub fn connection(&self) -> ConnectionBuilder<'_, Args> {
        ConnectionBuilder {
            signal: self,
            mode: ConnectionType::Auto,
            one_shot: false,
        }
    }

    /// Connect a free callable with [`ConnectionType::Auto`].
    ///
    /// Returns a [`ConnectionId`] for later disconnection.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connection().slot(slot)
    }

    /// Connect a free callable with a specific connection type.
    ///
    /// ```
    /// use tsignal_core::{ConnectionType, Signal};
    ///
    /// let signal = Signal::<i32>::new();
    /// // Always invoke inline in the emitting thread.
    /// signal.connect_with_type(|n| println!("{}", n), ConnectionType::Direct);
    /// signal.emit(42);
    /// ```
    pub fn connect_with_type<F>(&self, slot: F, connection_type: ConnectionType) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connection().with_type(connection_type).slot(slot)
    }

    /// Connect a free async callable.
    ///
    /// Async slots are always queued under [`ConnectionType::Auto`]: the
    /// returned future is scheduled on the receiver's loop, or the emitting
    /// thread's loop for free callables like this one.
    pub fn connect_async<F, Fut>(&self, slot: F) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connection().async_slot(slot)
    }

    /// Connect a method of a receiver object, holding the receiver strongly.
    ///
    /// The connection keeps `receiver` alive until disconnected. Queued
    /// deliveries run on the receiver's execution context.
    pub fn connect_to<R, F>(&self, receiver: &Arc<R>, slot: F) -> ConnectionId
    where
        R: ContextBound,
        F: Fn(&R, &Args) + Send + Sync + 'static,
    {
        self.connection().to(receiver, slot)
    }

    /// Connect a method of a receiver object, holding the receiver weakly.
    ///
    /// The connection is removed automatically once the receiver is dropped
    /// and a subsequent emit observes the loss. Fails with
    /// [`ConnectError::ReceiverDropped`] if the receiver is already gone.
    pub fn connect_to_weak<R, F>(
        &self,
        receiver: &Weak<R>,
        slot: F,
    ) -> std::result::Result<ConnectionId, ConnectError>
    where
        R: ContextBound,
        F: Fn(&R, &Args) + Send + Sync + 'static,
    {
        self.connection().to_weak(receiver, slot)
    }

    /// Connect an async method of a receiver object, holding it strongly.
    pub fn connect_async_to<R, F, Fut>(&self, receiver: &Arc<R>, slot: F) -> ConnectionId
    where
        R: ContextBound,
        F: Fn(Arc<R>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connection().async_to(receiver, slot)
    }

    /// Connect an async method of a receiver object, holding it weakly.
    pub fn connect_async_to_weak<R, F, Fut>(
        &self,
        receiver: &Weak<R>,
        slot: F,
    ) -> std::result::Result<ConnectionId, ConnectError>
    where
        R: ContextBound,
        F: Fn(Arc<R>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connection().async_to_weak(receiver, slot)
    }

    /// Connect a free callable with automatic disconnection when the
    /// returned guard is dropped.
    pub fn connect_scoped<F>(&self, slot: F) -> ConnectionGuard<'_, Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        ConnectionGuard {
            signal: self,
            id: self.connect(slot),
        }
    }

    /// Disconnect a specific connection by its id.
    ///
    /// Returns `true` if the connection was found and removed. Already
    /// posted queued invocations are unaffected and still run.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.lock();
            let before = connections.len();
            connections.retain(|record| record.id != id);
            before - connections.len()
        };
        if removed > 0 {
            tracing::info!(target: targets::SIGNAL, connection = ?id, "slot disconnected");
        }
        removed > 0
    }

    /// Disconnect every connection bound to `receiver`.
    ///
    /// Matches both strong and weak connections by receiver identity.
    /// Returns the number of connections removed.
    pub fn disconnect_receiver<R: ContextBound>(&self, receiver: &Arc<R>) -> usize {
        let addr = Arc::as_ptr(receiver) as *const ();
        let removed = {
            let mut connections = self.connections.lock();
            let before = connections.len();
            connections.retain(|record| record.receiver.addr() != Some(addr));
            before - connections.len()
        };
        tracing::info!(target: targets::SIGNAL, removed, "receiver disconnected");
        removed
    }

    /// Disconnect all slots from this signal.
    ///
    /// Returns the number of connections removed.
    pub fn disconnect_all(&self) -> usize {
        let removed = {
            let mut connections = self.connections.lock();
            let count = connections.len();
            connections.clear();
            count
        };
        tracing::info!(target: targets::SIGNAL, removed, "all slots disconnected");
        removed
    }

    /// Get the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether an emission is currently in progress on any thread.
    ///
    /// Diagnostic only; the value may be stale by the time it is read.
    pub fn is_emitting(&self) -> bool {
        self.emit_depth.load(Ordering::Acquire) > 0
    }

    /// Emit the signal, delivering to every connected slot in connect order.
    ///
    /// The connection list is snapshotted up front: connects and
    /// disconnects performed while the emission runs (including from inside
    /// a slot) only affect subsequent emits. Slot panics and undeliverable
    /// queued invocations are logged and skipped; they never abort the
    /// emission. Emitting with no connections is a no-op.
    #[tracing::instrument(skip_all, target = "tsignal_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        self.emit_depth.fetch_add(1, Ordering::AcqRel);

        let snapshot: Vec<_> = self.connections.lock().clone();
        tracing::trace!(
            target: targets::SIGNAL,
            connections = snapshot.len(),
            "emitting signal"
        );

        let emitter = ExecutionContext::current();
        let mut stale = Vec::new();

        for record in &snapshot {
            match dispatch::deliver(record, &args, &emitter) {
                DeliveryOutcome::Delivered => {
                    if record.one_shot {
                        stale.push(record.id);
                    }
                }
                DeliveryOutcome::Expired | DeliveryOutcome::AlreadyFired => {
                    stale.push(record.id);
                }
                DeliveryOutcome::Dropped => {}
            }
        }

        // Stale records may already be gone if a concurrent disconnect beat
        // us to them; retain tolerates that.
        if !stale.is_empty() {
            let removed = {
                let mut connections = self.connections.lock();
                let before = connections.len();
                connections.retain(|record| !stale.contains(&record.id));
                before - connections.len()
            };
            tracing::debug!(
                target: targets::SIGNAL,
                removed,
                "cleaned up expired and one-shot connections"
            );
        }

        self.emit_depth.fetch_sub(1, Ordering::AcqRel);
    }

    fn insert(
        &self,
        receiver: ReceiverRef,
        slot: Slot<Args>,
        mode: ConnectionType,
        one_shot: bool,
        receiver_context: Option<ExecutionContext>,
    ) -> ConnectionId {
        let record = Arc::new(ConnectionRecord::new(
            receiver,
            slot,
            mode,
            one_shot,
            receiver_context,
        ));
        let id = record.id;

        let count = {
            let mut connections = self.connections.lock();
            if let Some(addr) = record.receiver.addr() {
                if connections
                    .iter()
                    .any(|existing| existing.receiver.addr() == Some(addr))
                {
                    tracing::warn!(
                        target: targets::SIGNAL,
                        connection = ?id,
                        "receiver already connected; duplicate connections deliver independently"
                    );
                }
            }
            connections.push(record);
            connections.len()
        };

        tracing::info!(
            target: targets::SIGNAL,
            connection = ?id,
            mode = ?mode,
            one_shot,
            connections = count,
            "slot connected"
        );
        id
    }
}

/// Builder for connections with explicit mode and flags.
///
/// Created by [`Signal::connection`]. Terminal methods pick the slot shape
/// and receiver strength and return the new [`ConnectionId`].
pub struct ConnectionBuilder<'a, Args> {
    signal: &'a Signal<Args>,
    mode: ConnectionType,
    one_shot: bool,
}

impl<'a, Args: Clone + Send + 'static> ConnectionBuilder<'a, Args> {
    /// Set the connection type. Defaults to [`ConnectionType::Auto`].
    pub fn with_type(mut self, mode: ConnectionType) -> Self {
        self.mode = mode;
        self
    }

    /// Remove the connection automatically after its first delivery.
    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    /// Finish with a free sync callable.
    pub fn slot<F>(self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.signal.insert(
            ReceiverRef::None,
            Slot::Sync(Arc::new(slot)),
            self.mode,
            self.one_shot,
            None,
        )
    }

    /// Finish with a free async callable.
    pub fn async_slot<F, Fut>(self, slot: F) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let erased = move |args: Args| -> SlotFuture { Box::pin(slot(args)) };
        self.signal.insert(
            ReceiverRef::None,
            Slot::Async(Arc::new(erased)),
            self.mode,
            self.one_shot,
            None,
        )
    }

    /// Finish with a sync method of `receiver`, held strongly.
    pub fn to<R, F>(self, receiver: &Arc<R>, slot: F) -> ConnectionId
    where
        R: ContextBound,
        F: Fn(&R, &Args) + Send + Sync + 'static,
    {
        let context = receiver.execution_context().clone();
        let bound = receiver.clone();
        let erased = move |args: &Args| slot(&bound, args);
        self.signal.insert(
            ReceiverRef::Strong(receiver.clone()),
            Slot::Sync(Arc::new(erased)),
            self.mode,
            self.one_shot,
            Some(context),
        )
    }

    /// Finish with a sync method of `receiver`, held weakly.
    pub fn to_weak<R, F>(
        self,
        receiver: &Weak<R>,
        slot: F,
    ) -> std::result::Result<ConnectionId, ConnectError>
    where
        R: ContextBound,
        F: Fn(&R, &Args) + Send + Sync + 'static,
    {
        let strong = receiver.upgrade().ok_or(ConnectError::ReceiverDropped)?;
        let context = strong.execution_context().clone();
        let erased_receiver: Arc<dyn std::any::Any + Send + Sync> = strong;

        let bound = receiver.clone();
        let erased = move |args: &Args| {
            if let Some(receiver) = bound.upgrade() {
                slot(&receiver, args);
            }
        };
        Ok(self.signal.insert(
            ReceiverRef::Weak(Arc::downgrade(&erased_receiver)),
            Slot::Sync(Arc::new(erased)),
            self.mode,
            self.one_shot,
            Some(context),
        ))
    }

    /// Finish with an async method of `receiver`, held strongly.
    pub fn async_to<R, F, Fut>(self, receiver: &Arc<R>, slot: F) -> ConnectionId
    where
        R: ContextBound,
        F: Fn(Arc<R>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let context = receiver.execution_context().clone();
        let bound = receiver.clone();
        let erased = move |args: Args| -> SlotFuture { Box::pin(slot(bound.clone(), args)) };
        self.signal.insert(
            ReceiverRef::Strong(receiver.clone()),
            Slot::Async(Arc::new(erased)),
            self.mode,
            self.one_shot,
            Some(context),
        )
    }

    /// Finish with an async method of `receiver`, held weakly.
    pub fn async_to_weak<R, F, Fut>(
        self,
        receiver: &Weak<R>,
        slot: F,
    ) -> std::result::Result<ConnectionId, ConnectError>
    where
        R: ContextBound,
        F: Fn(Arc<R>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let strong = receiver.upgrade().ok_or(ConnectError::ReceiverDropped)?;
        let context = strong.execution_context().clone();
        let erased_receiver: Arc<dyn std::any::Any + Send + Sync> = strong;

        let bound = receiver.clone();
        let erased = move |args: Args| -> SlotFuture {
            match bound.upgrade() {
                Some(receiver) => Box::pin(slot(receiver, args)),
                None => Box::pin(async {}),
            }
        };
        Ok(self.signal.insert(
            ReceiverRef::Weak(Arc::downgrade(&erased_receiver)),
            Slot::Async(Arc::new(erased)),
            self.mode,
            self.one_shot,
            Some(context),
        ))
    }
}

/// A connection that disconnects itself when dropped.
///
/// Created via [`Signal::connect_scoped`]. Useful for RAII-style connection
/// management when the slot must not outlive some scope.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
/// use tsignal_core::Signal;
///
/// let signal = Signal::<i32>::new();
/// let counter = Arc::new(AtomicI32::new(0));
/// {
///     let counter = counter.clone();
///     let _guard = signal.connect_scoped(move |&n| {
///         counter.fetch_add(n, Ordering::SeqCst);
///     });
///     signal.emit(42);
/// }
/// signal.emit(43); // guard dropped; nothing happens
/// assert_eq!(counter.load(Ordering::SeqCst), 42);
/// ```
pub struct ConnectionGuard<'a, Args: Clone + Send + 'static> {
    signal: &'a Signal<Args>,
    id: ConnectionId,
}

impl<Args: Clone + Send + 'static> ConnectionGuard<'_, Args> {
    /// The id of the guarded connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl<Args: Clone + Send + 'static> Drop for ConnectionGuard<'_, Args> {
    fn drop(&mut self) {
        self.signal.disconnect(self.id);
    }
}
