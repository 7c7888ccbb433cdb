//! Per-emit dispatch: mode resolution and slot delivery.
//!
//! [`Signal::emit`](crate::Signal::emit) snapshots its connection list and
//! hands each record to [`deliver`], which decides between invoking the slot
//! inline in the emitting thread and posting the invocation to the
//! receiver's event loop. Failures during delivery are logged and never
//! propagate: one bad subscriber must not poison a broadcast.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::connection::{ConnectionRecord, ConnectionType, Slot, SlotFuture, SlotKind};
use crate::context::ExecutionContext;
use crate::error::DeliveryError;
use crate::logging::targets;

/// The effective delivery mode of one record for one emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DispatchMode {
    Direct,
    Queued,
}

/// What became of one record during one emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    /// The slot was invoked or its invocation was accepted by the target
    /// loop.
    Delivered,
    /// The weak receiver was gone; the record must be removed.
    Expired,
    /// A concurrent emit already claimed this one-shot record.
    AlreadyFired,
    /// Delivery failed (no loop); the record stays and the failure was
    /// logged.
    Dropped,
}

/// Resolve the effective mode for one record.
///
/// `Auto` is resolved at emit time because the emitting thread is unknown
/// at connect time: async slots always queue; sync slots run directly when
/// they have no receiver context or when the emitter is already on the
/// receiver's thread, and queue otherwise.
pub(crate) fn resolve_connection_type(
    requested: ConnectionType,
    slot_kind: SlotKind,
    receiver_context: Option<&ExecutionContext>,
    emitter_thread: ThreadId,
) -> DispatchMode {
    match requested {
        ConnectionType::Direct => DispatchMode::Direct,
        ConnectionType::Queued => DispatchMode::Queued,
        ConnectionType::Auto => {
            if slot_kind == SlotKind::Async {
                return DispatchMode::Queued;
            }
            match receiver_context {
                None => DispatchMode::Direct,
                Some(ctx) if ctx.thread_id() == emitter_thread => DispatchMode::Direct,
                Some(_) => DispatchMode::Queued,
            }
        }
    }
}

/// Deliver one record of an emission snapshot.
///
/// `emitter` is the context of the emitting thread, captured once per emit.
/// Arguments are cloned only for deliveries that cross onto a loop.
pub(crate) fn deliver<Args: Clone + Send + 'static>(
    record: &Arc<ConnectionRecord<Args>>,
    args: &Args,
    emitter: &ExecutionContext,
) -> DeliveryOutcome {
    if record.receiver.is_expired() {
        tracing::debug!(
            target: targets::DISPATCH,
            connection = ?record.id,
            "receiver dropped; connection will be cleaned up"
        );
        return DeliveryOutcome::Expired;
    }

    let mode = resolve_connection_type(
        record.mode,
        record.slot.kind(),
        record.receiver_context.as_ref(),
        emitter.thread_id(),
    );
    tracing::debug!(
        target: targets::DISPATCH,
        connection = ?record.id,
        requested = ?record.mode,
        resolved = ?mode,
        slot_kind = ?record.slot.kind(),
        "dispatch decision"
    );

    match mode {
        DispatchMode::Direct => deliver_direct(record, args, emitter),
        DispatchMode::Queued => deliver_queued(record, args, emitter),
    }
}

fn deliver_direct<Args: Clone + Send + 'static>(
    record: &Arc<ConnectionRecord<Args>>,
    args: &Args,
    emitter: &ExecutionContext,
) -> DeliveryOutcome {
    match &record.slot {
        Slot::Sync(slot) => {
            if record.one_shot && !record.claim_one_shot() {
                return DeliveryOutcome::AlreadyFired;
            }
            invoke_sync(record, slot, args);
            DeliveryOutcome::Delivered
        }
        Slot::Async(slot) => {
            // A Direct connection with an async slot still needs a loop for
            // the returned future; the handler itself is invoked inline.
            if !emitter.is_bound() {
                log_no_loop(record);
                return DeliveryOutcome::Dropped;
            }
            if record.one_shot && !record.claim_one_shot() {
                return DeliveryOutcome::AlreadyFired;
            }
            let slot = slot.clone();
            let call_args = args.clone();
            match catch_unwind(AssertUnwindSafe(move || slot(call_args))) {
                Ok(future) => {
                    let id = record.id;
                    let posted = emitter.post(move || spawn_slot_future(id, future));
                    debug_assert!(posted.is_ok());
                }
                Err(_) => log_handler_fault(record),
            }
            DeliveryOutcome::Delivered
        }
    }
}

fn deliver_queued<Args: Clone + Send + 'static>(
    record: &Arc<ConnectionRecord<Args>>,
    args: &Args,
    emitter: &ExecutionContext,
) -> DeliveryOutcome {
    // Free callables have no receiver context; their queued invocations run
    // on the loop of the emitting thread.
    let target = match &record.receiver_context {
        Some(ctx) => ctx.clone(),
        None => emitter.clone(),
    };
    if !target.is_bound() {
        log_no_loop(record);
        return DeliveryOutcome::Dropped;
    }
    if record.one_shot && !record.claim_one_shot() {
        return DeliveryOutcome::AlreadyFired;
    }

    let posted = match &record.slot {
        Slot::Sync(slot) => {
            let slot = slot.clone();
            let call_args = args.clone();
            let shared = record.clone();
            target.post(move || invoke_sync(&shared, &slot, &call_args))
        }
        Slot::Async(slot) => {
            // The handler is invoked on the receiver's loop and its future
            // is scheduled on that same loop.
            let slot = slot.clone();
            let call_args = args.clone();
            let shared = record.clone();
            target.post(move || {
                let id = shared.id;
                match catch_unwind(AssertUnwindSafe(move || slot(call_args))) {
                    Ok(future) => spawn_slot_future(id, future),
                    Err(_) => log_handler_fault(&shared),
                }
            })
        }
    };

    match posted {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(DeliveryError::NoLoop) => {
            log_no_loop(record);
            DeliveryOutcome::Dropped
        }
    }
}

/// Invoke a sync slot, containing panics so the emission continues.
fn invoke_sync<Args>(
    record: &ConnectionRecord<Args>,
    slot: &Arc<dyn Fn(&Args) + Send + Sync>,
    args: &Args,
) {
    if catch_unwind(AssertUnwindSafe(|| slot(args))).is_err() {
        log_handler_fault(record);
    }
}

/// Schedule an async slot's future on the current loop, logging an
/// unhandled panic in it.
///
/// Must be called from within a runtime (the posted closures always are).
fn spawn_slot_future(id: crate::ConnectionId, future: SlotFuture) {
    let task = tokio::spawn(future);
    tokio::spawn(async move {
        if let Err(err) = task.await {
            if err.is_panic() {
                tracing::error!(
                    target: targets::DISPATCH,
                    connection = ?id,
                    "async slot panicked; emission unaffected"
                );
            }
        }
    });
}

fn log_handler_fault<Args>(record: &ConnectionRecord<Args>) {
    tracing::error!(
        target: targets::DISPATCH,
        connection = ?record.id,
        "slot panicked; continuing with remaining connections"
    );
}

fn log_no_loop<Args>(record: &ConnectionRecord<Args>) {
    tracing::error!(
        target: targets::DISPATCH,
        connection = ?record.id,
        error = %DeliveryError::NoLoop,
        "queued delivery dropped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ReceiverRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bound_context() -> (tokio::runtime::Runtime, ExecutionContext) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let ctx = {
            let _guard = runtime.enter();
            ExecutionContext::current()
        };
        (runtime, ctx)
    }

    #[test]
    fn test_explicit_modes_resolve_verbatim() {
        let thread = std::thread::current().id();
        assert_eq!(
            resolve_connection_type(ConnectionType::Direct, SlotKind::Async, None, thread),
            DispatchMode::Direct
        );
        assert_eq!(
            resolve_connection_type(ConnectionType::Queued, SlotKind::Sync, None, thread),
            DispatchMode::Queued
        );
    }

    #[test]
    fn test_auto_queues_async_slots() {
        let ctx = ExecutionContext::current();
        assert_eq!(
            resolve_connection_type(
                ConnectionType::Auto,
                SlotKind::Async,
                Some(&ctx),
                ctx.thread_id()
            ),
            DispatchMode::Queued
        );
        assert_eq!(
            resolve_connection_type(
                ConnectionType::Auto,
                SlotKind::Async,
                None,
                std::thread::current().id()
            ),
            DispatchMode::Queued
        );
    }

    #[test]
    fn test_auto_sync_without_receiver_is_direct() {
        assert_eq!(
            resolve_connection_type(
                ConnectionType::Auto,
                SlotKind::Sync,
                None,
                std::thread::current().id()
            ),
            DispatchMode::Direct
        );
    }

    #[test]
    fn test_auto_sync_follows_thread_affinity() {
        let ctx = ExecutionContext::current();
        assert_eq!(
            resolve_connection_type(
                ConnectionType::Auto,
                SlotKind::Sync,
                Some(&ctx),
                ctx.thread_id()
            ),
            DispatchMode::Direct
        );

        let other_thread = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();
        assert_eq!(
            resolve_connection_type(ConnectionType::Auto, SlotKind::Sync, Some(&ctx), other_thread),
            DispatchMode::Queued
        );
    }

    #[test]
    fn test_queued_without_any_loop_is_dropped() {
        let record: Arc<ConnectionRecord<i32>> = Arc::new(ConnectionRecord::new(
            ReceiverRef::None,
            Slot::Sync(Arc::new(|_| {})),
            ConnectionType::Queued,
            false,
            None,
        ));
        let emitter = ExecutionContext::current();

        assert_eq!(deliver(&record, &1, &emitter), DeliveryOutcome::Dropped);
    }

    #[test]
    fn test_direct_slot_panic_is_contained() {
        let record: Arc<ConnectionRecord<i32>> = Arc::new(ConnectionRecord::new(
            ReceiverRef::None,
            Slot::Sync(Arc::new(|_| panic!("slot failure"))),
            ConnectionType::Direct,
            false,
            None,
        ));
        let emitter = ExecutionContext::current();

        assert_eq!(deliver(&record, &1, &emitter), DeliveryOutcome::Delivered);
    }

    #[test]
    fn test_one_shot_no_loop_keeps_claim_open() {
        // A one-shot record whose delivery is dropped must stay claimable,
        // so a later emit with a loop available can still deliver it once.
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let record: Arc<ConnectionRecord<i32>> = Arc::new(ConnectionRecord::new(
            ReceiverRef::None,
            Slot::Sync(Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            })),
            ConnectionType::Queued,
            true,
            None,
        ));

        let unbound = ExecutionContext::current();
        assert_eq!(deliver(&record, &1, &unbound), DeliveryOutcome::Dropped);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let (runtime, bound) = bound_context();
        assert_eq!(deliver(&record, &2, &bound), DeliveryOutcome::Delivered);
        assert_eq!(deliver(&record, &3, &bound), DeliveryOutcome::AlreadyFired);

        runtime.block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_sync_runs_on_target_loop() {
        let (runtime, ctx) = bound_context();
        let seen_thread = Arc::new(parking_lot::Mutex::new(None));

        let seen_clone = seen_thread.clone();
        let record: Arc<ConnectionRecord<i32>> = Arc::new(ConnectionRecord::new(
            ReceiverRef::None,
            Slot::Sync(Arc::new(move |_| {
                *seen_clone.lock() = Some(std::thread::current().id());
            })),
            ConnectionType::Queued,
            false,
            Some(ctx),
        ));

        // Emit from a thread with no loop of its own.
        let emitter_record = record.clone();
        let outcome = std::thread::spawn(move || {
            let emitter = ExecutionContext::current();
            deliver(&emitter_record, &7, &emitter)
        })
        .join()
        .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let loop_thread = runtime.block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            std::thread::current().id()
        });
        assert_eq!(*seen_thread.lock(), Some(loop_thread));
    }
}
