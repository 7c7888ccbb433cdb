//! Thread-aware signal/slot dispatch for tsignal.
//!
//! This crate provides the core of the tsignal event-dispatch library:

#![warn(missing_docs)]
// Allow complex types at the slot-erasure seams of the signal system
#![allow(clippy::type_complexity)]
//!
//! - **Signal/Slot System**: typed publish/subscribe with sync and async
//!   slots, connected in Direct, Queued, or Auto mode
//! - **Execution Contexts**: the `(thread, event loop)` pair receiver
//!   objects are bound to, and the post/schedule primitives built on it
//! - **Dispatch Engine**: per-emit mode resolution with snapshot semantics,
//!   one-shot and weak-connection cleanup, and failure isolation
//! - **Worker**: a dedicated-thread event-loop host with a serial task
//!   queue and a start/stop lifecycle
//!
//! # Signal/Slot Example
//!
//! ```
//! use tsignal_core::Signal;
//!
//! let value_changed = Signal::<i32>::new();
//!
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! value_changed.emit(42);
//!
//! value_changed.disconnect(conn_id);
//! ```
//!
//! # Cross-Thread Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tsignal_core::{ContextBound, ExecutionContext, Signal, Worker};
//!
//! struct Display {
//!     ctx: ExecutionContext,
//! }
//!
//! impl ContextBound for Display {
//!     fn execution_context(&self) -> &ExecutionContext {
//!         &self.ctx
//!     }
//! }
//!
//! let worker = Worker::new();
//! let value_changed = Arc::new(Signal::<i32>::new());
//!
//! let signal = value_changed.clone();
//! worker
//!     .start(move |stop| async move {
//!         // The receiver is constructed on the worker thread, so queued
//!         // deliveries land on the worker's loop.
//!         let display = Arc::new(Display { ctx: ExecutionContext::current() });
//!         signal.connect_to(&display, |_display, value| {
//!             println!("Received {} on the worker thread", value);
//!         });
//!         stop.wait().await;
//!     })
//!     .unwrap();
//!
//! value_changed.emit(42); // queued onto the worker's loop
//! worker.stop();
//! ```
//!
//! # Logging
//!
//! The crate is instrumented with `tracing`; see [`logging`] for target
//! names, the `TSIGNAL_DEBUG` toggle, and an optional subscriber
//! initializer.

mod connection;
pub mod context;
mod dispatch;
mod error;
pub mod logging;
pub mod signal;
pub mod worker;

pub use context::{ContextBound, ExecutionContext};
pub use error::{ConnectError, DeliveryError, Result, TsignalError, WorkerError};
pub use signal::{ConnectionBuilder, ConnectionGuard, ConnectionId, ConnectionType, Signal};
pub use worker::{StopEvent, Worker, WorkerBuilder, WorkerConfig, WorkerState};
