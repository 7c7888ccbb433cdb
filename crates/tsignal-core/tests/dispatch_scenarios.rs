//! End-to-end dispatch scenarios across threads and loops.

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tsignal_core::{ContextBound, ExecutionContext, Signal, Worker};

/// A receiver with thread affinity, recording what it saw and from where.
struct Probe {
    ctx: ExecutionContext,
    seen: Mutex<Vec<(ThreadId, i32)>>,
}

impl Probe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            ctx: ExecutionContext::current(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn with_context(ctx: ExecutionContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn values(&self) -> Vec<i32> {
        self.seen.lock().iter().map(|&(_, v)| v).collect()
    }
}

impl ContextBound for Probe {
    fn execution_context(&self) -> &ExecutionContext {
        &self.ctx
    }
}

/// Spin until `predicate` holds or the deadline passes.
fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn same_thread_sync_slot_delivers_synchronously() {
    tsignal_core::logging::init();

    struct Counter {
        count: Mutex<i32>,
        count_changed: Signal<i32>,
    }

    impl Counter {
        fn increment(&self) {
            let value = {
                let mut count = self.count.lock();
                *count += 1;
                *count
            };
            self.count_changed.emit(value);
        }
    }

    let counter = Counter {
        count: Mutex::new(0),
        count_changed: Signal::new(),
    };
    let display = Probe::new();

    counter.count_changed.connect_to(&display, |probe, &value| {
        probe.seen.lock().push((std::thread::current().id(), value));
    });

    counter.increment();
    // Same thread, sync slot, auto mode: each delivery completed before
    // emit returned.
    assert_eq!(display.values(), vec![1]);
    counter.increment();
    counter.increment();
    assert_eq!(display.values(), vec![1, 2, 3]);

    let this_thread = std::thread::current().id();
    assert!(display.seen.lock().iter().all(|&(t, _)| t == this_thread));
}

#[test]
fn cross_thread_async_slot_runs_on_receiver_thread() {
    let worker = Worker::new();
    worker.start_default().unwrap();
    let worker_ctx = worker.execution_context().unwrap();
    let worker_thread = worker_ctx.thread_id();

    let receiver = Probe::with_context(worker_ctx);
    let value_changed = Arc::new(Signal::<i32>::new());

    value_changed.connect_async_to(&receiver, |probe, value| async move {
        probe
            .seen
            .lock()
            .push((std::thread::current().id(), value));
    });

    // Emit from a thread that is neither the test thread nor the worker.
    let signal = value_changed.clone();
    std::thread::spawn(move || signal.emit(42)).join().unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !receiver.seen.lock().is_empty()
    }));
    assert_eq!(*receiver.seen.lock(), vec![(worker_thread, 42)]);

    worker.stop();
}

#[test]
fn one_shot_weak_connection_cleans_up() {
    let signal = Signal::<i32>::new();
    let receiver = Probe::new();

    signal
        .connection()
        .one_shot()
        .to_weak(&Arc::downgrade(&receiver), |probe, &value| {
            probe.seen.lock().push((std::thread::current().id(), value));
        })
        .unwrap();

    signal.emit(1);
    assert_eq!(receiver.values(), vec![1]);

    // One-shot: gone after its single delivery.
    signal.emit(2);
    assert_eq!(receiver.values(), vec![1]);
    assert_eq!(signal.connection_count(), 0);

    // Dropping the receiver and emitting again must be harmless.
    drop(receiver);
    signal.emit(3);
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn weak_connection_expires_after_receiver_drop() {
    let signal = Signal::<i32>::new();
    let receiver = Probe::new();

    signal
        .connect_to_weak(&Arc::downgrade(&receiver), |probe, &value| {
            probe.seen.lock().push((std::thread::current().id(), value));
        })
        .unwrap();

    signal.emit(1);
    drop(receiver);

    // The record lingers until an emit observes the loss.
    assert_eq!(signal.connection_count(), 1);
    signal.emit(2);
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn disconnect_after_emit_lets_posted_delivery_run() {
    let worker = Worker::new();
    worker.start_default().unwrap();

    let receiver = Probe::with_context(worker.execution_context().unwrap());
    let signal = Signal::<i32>::new();

    let id = signal.connect_to(&receiver, |probe, &value| {
        probe.seen.lock().push((std::thread::current().id(), value));
    });

    // The post was accepted during emit; disconnecting immediately
    // afterwards must not recall it.
    signal.emit(1);
    assert!(signal.disconnect(id));

    assert!(wait_until(Duration::from_secs(2), || {
        !receiver.seen.lock().is_empty()
    }));
    assert_eq!(receiver.values(), vec![1]);

    // A second emit after the disconnect delivers nothing.
    signal.emit(2);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(receiver.values(), vec![1]);

    worker.stop();
}

#[test]
fn emits_from_one_thread_arrive_in_order() {
    let worker = Worker::new();
    worker.start_default().unwrap();

    let receiver = Probe::with_context(worker.execution_context().unwrap());
    let signal = Signal::<i32>::new();

    signal.connect_to(&receiver, |probe, &value| {
        probe.seen.lock().push((std::thread::current().id(), value));
    });

    for i in 0..20 {
        signal.emit(i);
    }

    assert!(wait_until(Duration::from_secs(2), || {
        receiver.seen.lock().len() == 20
    }));
    assert_eq!(receiver.values(), (0..20).collect::<Vec<_>>());

    worker.stop();
}

#[test]
fn slot_panic_is_isolated_from_other_slots() {
    let signal = Signal::<i32>::new();
    let before = Probe::new();
    let after = Probe::new();

    signal.connect_to(&before, |probe, &value| {
        probe.seen.lock().push((std::thread::current().id(), value));
    });
    signal.connect(|_| panic!("faulty slot"));
    signal.connect_to(&after, |probe, &value| {
        probe.seen.lock().push((std::thread::current().id(), value));
    });

    signal.emit(1);
    assert_eq!(before.values(), vec![1]);
    assert_eq!(after.values(), vec![1]);

    // The signal survives the fault and keeps all three connections.
    signal.emit(2);
    assert_eq!(before.values(), vec![1, 2]);
    assert_eq!(after.values(), vec![1, 2]);
    assert_eq!(signal.connection_count(), 3);
}
