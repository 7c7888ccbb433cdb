//! Error types for tsignal-core.

use std::fmt;

use crate::worker::WorkerState;

/// The main error type for tsignal-core operations.
#[derive(Debug)]
pub enum TsignalError {
    /// Connection setup failed.
    Connect(ConnectError),
    /// Worker lifecycle or queue failure.
    Worker(WorkerError),
    /// Cross-thread delivery failure.
    Delivery(DeliveryError),
}

impl fmt::Display for TsignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(err) => write!(f, "Connect error: {err}"),
            Self::Worker(err) => write!(f, "Worker error: {err}"),
            Self::Delivery(err) => write!(f, "Delivery error: {err}"),
        }
    }
}

impl std::error::Error for TsignalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(err) => Some(err),
            Self::Worker(err) => Some(err),
            Self::Delivery(err) => Some(err),
        }
    }
}

impl From<ConnectError> for TsignalError {
    fn from(err: ConnectError) -> Self {
        Self::Connect(err)
    }
}

impl From<WorkerError> for TsignalError {
    fn from(err: WorkerError) -> Self {
        Self::Worker(err)
    }
}

impl From<DeliveryError> for TsignalError {
    fn from(err: DeliveryError) -> Self {
        Self::Delivery(err)
    }
}

/// Errors raised while establishing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// A weak receiver was already dropped when the connection was made.
    ReceiverDropped,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReceiverDropped => {
                write!(f, "Weak receiver was dropped before the connection was made")
            }
        }
    }
}

impl std::error::Error for ConnectError {}

/// Errors raised by the worker lifecycle and task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// `start` was called while the worker was not in the `Created` state.
    AlreadyStarted(WorkerState),
    /// The worker has not been started yet.
    NotStarted,
    /// The worker has been stopped; no further tasks are accepted.
    Stopped,
    /// The worker's event loop could not be created.
    RuntimeCreation(String),
    /// The worker thread could not be spawned.
    ThreadSpawn(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted(state) => {
                write!(f, "Worker already started (state: {state:?})")
            }
            Self::NotStarted => write!(f, "Worker has not been started"),
            Self::Stopped => write!(f, "Worker has been stopped"),
            Self::RuntimeCreation(msg) => {
                write!(f, "Failed to create the worker event loop: {msg}")
            }
            Self::ThreadSpawn(msg) => write!(f, "Failed to spawn the worker thread: {msg}"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Errors raised while delivering a queued invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The target execution context has no event loop bound to it.
    NoLoop,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLoop => write!(f, "No event loop is bound to the target execution context"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// A specialized Result type for tsignal-core operations.
pub type Result<T> = std::result::Result<T, TsignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert!(ConnectError::ReceiverDropped.to_string().contains("dropped"));
        assert!(WorkerError::NotStarted.to_string().contains("not been started"));
        assert!(DeliveryError::NoLoop.to_string().contains("event loop"));
    }

    #[test]
    fn test_conversion_into_crate_error() {
        let err: TsignalError = WorkerError::Stopped.into();
        assert!(matches!(err, TsignalError::Worker(WorkerError::Stopped)));

        let err: TsignalError = ConnectError::ReceiverDropped.into();
        assert!(matches!(
            err,
            TsignalError::Connect(ConnectError::ReceiverDropped)
        ));

        let err: TsignalError = DeliveryError::NoLoop.into();
        assert!(err.to_string().contains("Delivery"));
    }
}
