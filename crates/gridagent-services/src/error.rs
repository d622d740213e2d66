//! Error types shared across the services crate.

use gridagent_core::ReplyTag;

pub use crate::chunk_queue::QueueError;
pub use crate::state_machine::InvalidTransition;

/// Malformed message sequences. Fatal to the call, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("unknown or unset message case: {0}")]
    UnknownCase(String),
    #[error("interleaved reply groups: {open} group still open, got {got}")]
    Interleaved { open: ReplyTag, got: ReplyTag },
    #[error("{0} stream ended before its terminal message")]
    UnexpectedEnd(String),
    #[error("no data produced")]
    NoData,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Why a streaming agent call ended without a reply.
///
/// Token, storage and submission failures are not here: those are
/// answered in-band.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("transport failed: {0}")]
    Transport(anyhow::Error),
    #[error("call cancelled")]
    Cancelled,
}

impl From<InvalidTransition> for AgentError {
    fn from(e: InvalidTransition) -> Self {
        Self::Protocol(e.into())
    }
}
