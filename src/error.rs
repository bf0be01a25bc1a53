//! Error types for taskloaf.

use thiserror::Error;

use crate::Address;

/// Main error type for all taskloaf operations.
#[derive(Debug, Error)]
pub enum TaskloafError {
    /// I/O error from a transport implementation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed or truncated envelope.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Protocol error (oversized payload, bad envelope contents, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No handler registered for the given type code.
    #[error("Handler not found for type code: {0}")]
    HandlerNotFound(u16),

    /// A WORK envelope named a task type this worker never registered.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The transport has no route to the address.
    #[error("Address {0} is unreachable")]
    Unreachable(Address),

    /// Transport-level failure other than an unknown address.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A reference's bytes were read on a worker that does not hold them.
    #[error("Reference {creator}:{id} has no local bytes on worker {address}")]
    NotLocal {
        /// Creator of the reference.
        creator: Address,
        /// Creator-local id.
        id: u64,
        /// Worker that attempted the read.
        address: Address,
    },

    /// A distributed reference was decoded outside `MsgPackCodec::decode_in`.
    #[error("Distributed reference decoded without a worker context")]
    NoWorkerContext,

    /// A work item returned an error.
    #[error("Task failed: {0}")]
    Task(String),

    /// A work item or offloaded function panicked.
    #[error("Task panicked: {0}")]
    Panic(String),

    /// Blocking work was offloaded outside a tokio runtime.
    #[error("No tokio runtime to offload \"{0}\" onto")]
    NoRuntime(String),

    /// The entry future was still running when the worker shut down.
    #[error("Cancelled by shutdown")]
    Cancelled,
}

impl TaskloafError {
    /// Build a [`TaskloafError::Task`] from any displayable message.
    pub fn task(message: impl std::fmt::Display) -> Self {
        Self::Task(message.to_string())
    }

    /// Build a [`TaskloafError::Panic`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panic(message)
    }
}

/// Result type alias using TaskloafError.
pub type Result<T> = std::result::Result<T, TaskloafError>;
