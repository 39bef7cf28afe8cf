use fabric_types::NodeId;
use thiserror::Error;

/// Errors raised by the network facade and its backends.
#[derive(Debug, Error)]
pub enum NetError {
    /// No backend is responsible for the node.
    #[error("no network for node {0}")]
    UnknownNode(NodeId),

    /// Two backends were loaded under the same name.
    #[error("duplicate network backend: {0}")]
    DuplicateBackend(String),

    #[error("node {node} routed to both {existing} and {backend}")]
    NodeAlreadyRouted {
        node: NodeId,
        existing: String,
        backend: String,
    },

    #[error("node {node} above max node {max}")]
    NodeOutOfRange { node: NodeId, max: NodeId },

    #[error("no network backends loaded")]
    NoBackends,

    /// A lifecycle operation was called out of order.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("attach failed on {backend}: {reason}")]
    AttachFailed { backend: String, reason: String },

    #[error("detach failed on {backend}: {reason}")]
    DetachFailed { backend: String, reason: String },

    #[error("collective failed: {0}")]
    CollectiveFailed(String),

    /// A caller-supplied buffer had the wrong length.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
