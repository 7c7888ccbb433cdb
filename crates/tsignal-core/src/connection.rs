//! Connection records: one entry in a signal's subscriber list.
//!
//! A [`ConnectionRecord`] binds one slot to one signal together with its
//! delivery mode, one-shot flag, and (possibly weak) receiver reference.
//! Records are reference-counted so that an in-flight emission can keep
//! working on its snapshot while the live list changes underneath it.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::context::ExecutionContext;

/// Counter backing [`ConnectionId`] allocation.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a signal-slot connection.
///
/// Returned by the `connect` family on [`Signal`](crate::Signal) and used to
/// disconnect a specific connection via
/// [`Signal::disconnect`](crate::Signal::disconnect). Ids are unique across
/// all signals in the process and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Specifies how a connected slot should be invoked when the signal is
/// emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionType {
    /// Invoke the slot immediately in the emitting thread.
    ///
    /// Fastest option; the slot must be safe to call from any thread the
    /// signal may be emitted from.
    Direct,

    /// Queue the slot invocation to the receiver's event loop.
    ///
    /// Safe for cross-thread communication. The slot runs when the target
    /// loop processes the posted invocation.
    Queued,

    /// Choose Direct or Queued at emit time.
    ///
    /// Async slots are always queued. Sync slots run directly when the
    /// emitting thread is the receiver's thread (or the slot has no
    /// receiver), and are queued otherwise. This is the default.
    #[default]
    Auto,
}

/// Whether a slot is an ordinary procedure or produces a future.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Sync,
    Async,
}

/// A boxed future produced by an async slot.
pub(crate) type SlotFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The callable bound into a connection, tagged by kind.
pub(crate) enum Slot<Args> {
    /// An ordinary procedure, invoked with a reference to the arguments.
    Sync(Arc<dyn Fn(&Args) + Send + Sync>),
    /// A future-producing procedure, invoked with owned arguments so the
    /// future can cross threads.
    Async(Arc<dyn Fn(Args) -> SlotFuture + Send + Sync>),
}

impl<Args> Slot<Args> {
    pub(crate) fn kind(&self) -> SlotKind {
        match self {
            Self::Sync(_) => SlotKind::Sync,
            Self::Async(_) => SlotKind::Async,
        }
    }
}

impl<Args> Clone for Slot<Args> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(f.clone()),
            Self::Async(f) => Self::Async(f.clone()),
        }
    }
}

/// How a connection holds on to its receiver, if it has one.
pub(crate) enum ReceiverRef {
    /// Free callable; no receiver object.
    None,
    /// The connection keeps the receiver alive.
    Strong(Arc<dyn Any + Send + Sync>),
    /// The connection does not keep the receiver alive; it expires when the
    /// receiver is dropped.
    Weak(Weak<dyn Any + Send + Sync>),
}

impl ReceiverRef {
    /// Whether a weak receiver has been dropped.
    pub(crate) fn is_expired(&self) -> bool {
        match self {
            Self::None | Self::Strong(_) => false,
            Self::Weak(weak) => weak.strong_count() == 0,
        }
    }

    /// Address of the receiver allocation, for identity matching.
    ///
    /// Expired weak receivers have no address; their records are matched by
    /// nothing and cleaned up by the next emit instead.
    pub(crate) fn addr(&self) -> Option<*const ()> {
        match self {
            Self::None => None,
            Self::Strong(arc) => Some(Arc::as_ptr(arc) as *const ()),
            Self::Weak(weak) => weak
                .upgrade()
                .map(|arc| Arc::as_ptr(&arc) as *const ()),
        }
    }
}

/// One entry in a signal's subscriber list.
pub(crate) struct ConnectionRecord<Args> {
    pub(crate) id: ConnectionId,
    pub(crate) receiver: ReceiverRef,
    pub(crate) slot: Slot<Args>,
    pub(crate) mode: ConnectionType,
    pub(crate) one_shot: bool,
    /// Set once the single delivery of a one-shot record has been claimed.
    /// Shared through the snapshot, so concurrent emits race on the claim
    /// rather than each delivering.
    pub(crate) fired: AtomicBool,
    /// The receiver's context, cached at connect time. `Some` iff the
    /// record has a receiver.
    pub(crate) receiver_context: Option<ExecutionContext>,
}

impl<Args> ConnectionRecord<Args> {
    pub(crate) fn new(
        receiver: ReceiverRef,
        slot: Slot<Args>,
        mode: ConnectionType,
        one_shot: bool,
        receiver_context: Option<ExecutionContext>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            receiver,
            slot,
            mode,
            one_shot,
            fired: AtomicBool::new(false),
            receiver_context,
        }
    }

    /// Claim the single delivery of a one-shot record.
    ///
    /// Returns `false` when a concurrent emit already claimed it; the
    /// record must then be skipped. Only called for one-shot records.
    pub(crate) fn claim_one_shot(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_weak_receiver_expiry() {
        let receiver: Arc<dyn Any + Send + Sync> = Arc::new(Probe);
        let weak = ReceiverRef::Weak(Arc::downgrade(&receiver));

        assert!(!weak.is_expired());
        drop(receiver);
        assert!(weak.is_expired());
    }

    #[test]
    fn test_strong_receiver_never_expires() {
        let receiver: Arc<dyn Any + Send + Sync> = Arc::new(Probe);
        let strong = ReceiverRef::Strong(receiver.clone());

        drop(receiver);
        assert!(!strong.is_expired());
    }

    #[test]
    fn test_receiver_identity_matching() {
        let receiver: Arc<dyn Any + Send + Sync> = Arc::new(Probe);
        let strong = ReceiverRef::Strong(receiver.clone());
        let weak = ReceiverRef::Weak(Arc::downgrade(&receiver));
        let other: Arc<dyn Any + Send + Sync> = Arc::new(Probe);

        assert_eq!(strong.addr(), weak.addr());
        assert_ne!(strong.addr(), Some(Arc::as_ptr(&other) as *const ()));
        assert_eq!(ReceiverRef::None.addr(), None);
    }

    #[test]
    fn test_one_shot_claim_is_single() {
        let record: ConnectionRecord<i32> = ConnectionRecord::new(
            ReceiverRef::None,
            Slot::Sync(Arc::new(|_| {})),
            ConnectionType::Auto,
            true,
            None,
        );

        assert!(record.claim_one_shot());
        assert!(!record.claim_one_shot());
    }
}
