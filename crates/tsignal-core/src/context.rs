//! Execution contexts: the `(thread, event loop)` pair an object is bound to.
//!
//! Every receiver object participating in queued signal delivery is bound to
//! exactly one cooperative event loop running on one OS thread. An
//! [`ExecutionContext`] records that pair. The dispatcher consults it to
//! decide between invoking a slot inline and posting the invocation to the
//! receiver's loop, and uses [`ExecutionContext::post`] /
//! [`ExecutionContext::schedule`] to hand work over.
//!
//! Contexts are captured with [`ExecutionContext::current`], typically in a
//! receiver's constructor while its loop is running on the current thread:
//!
//! ```
//! use tsignal_core::{ContextBound, ExecutionContext};
//!
//! struct Display {
//!     ctx: ExecutionContext,
//! }
//!
//! impl Display {
//!     fn new() -> Self {
//!         Self { ctx: ExecutionContext::current() }
//!     }
//! }
//!
//! impl ContextBound for Display {
//!     fn execution_context(&self) -> &ExecutionContext {
//!         &self.ctx
//!     }
//! }
//! # let _ = Display::new();
//! ```
//!
//! A context captured on a thread with no running loop is *unbound*: direct
//! deliveries from its own thread still work, but any queued delivery fails
//! with [`DeliveryError::NoLoop`](crate::DeliveryError::NoLoop).

use std::fmt;
use std::future::Future;
use std::thread::ThreadId;

use tokio::runtime::Handle;

use crate::error::DeliveryError;
use crate::logging::targets;

/// The `(thread, loop)` pair a signal-capable object is bound to.
///
/// Cloning a context is cheap; clones refer to the same loop.
#[derive(Clone)]
pub struct ExecutionContext {
    thread_id: ThreadId,
    handle: Option<Handle>,
}

impl ExecutionContext {
    /// Capture the calling thread's context.
    ///
    /// Records the current thread id and, when the call is made inside a
    /// running Tokio runtime, a handle to that runtime's loop. Outside a
    /// runtime the context is unbound.
    pub fn current() -> Self {
        let handle = Handle::try_current().ok();
        if handle.is_none() {
            tracing::trace!(
                target: targets::CONTEXT,
                "captured unbound context; queued deliveries to it will fail"
            );
        }
        Self {
            thread_id: std::thread::current().id(),
            handle,
        }
    }

    /// The thread this context is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether a loop is bound to this context.
    ///
    /// Unbound contexts can only serve direct deliveries.
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the calling thread is the context's thread.
    #[inline]
    pub fn is_current_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Request the bound loop to run `closure` at its next opportunity.
    ///
    /// Returns immediately. Closures posted from the same caller run on the
    /// target loop in FIFO order. Posting to an unbound context fails with
    /// [`DeliveryError::NoLoop`]; posting to a loop that has already shut
    /// down is silently discarded by the runtime.
    pub fn post<F>(&self, closure: F) -> std::result::Result<(), DeliveryError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.handle.as_ref().ok_or(DeliveryError::NoLoop)?;
        handle.spawn(async move {
            closure();
        });
        Ok(())
    }

    /// Enqueue a future on the bound loop.
    ///
    /// The future is polled to completion on the loop's thread for
    /// current-thread loops such as those hosted by
    /// [`Worker`](crate::Worker).
    pub fn schedule<Fut>(&self, future: Fut) -> std::result::Result<(), DeliveryError>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.as_ref().ok_or(DeliveryError::NoLoop)?;
        handle.spawn(future);
        Ok(())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("thread_id", &self.thread_id)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Trait for receiver objects with thread affinity.
///
/// Implementors embed an [`ExecutionContext`] captured at construction time
/// (or adopted from a [`Worker`](crate::Worker) via
/// [`Worker::execution_context`](crate::Worker::execution_context)). The
/// dispatcher caches this context on each connection record and delivers
/// queued invocations to it.
pub trait ContextBound: Send + Sync + 'static {
    /// The context this object is bound to.
    fn execution_context(&self) -> &ExecutionContext;
}
