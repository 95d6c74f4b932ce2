use thiserror::Error;

/// Typed failures raised by the workspace. Library functions return `anyhow::Result`, these
/// can be recovered with `downcast_ref`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("protocol desync: {tag}")]
    ProtocolDesync { tag: String },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("non finite gradient encountered, optimizer step skipped")]
    NonFiniteGradient,
    #[error("trajectory buffer is full (capacity {capacity})")]
    BufferFull { capacity: usize },
    #[error("cannot split {entries} entries into {mini_batches} mini batches")]
    InvalidBatching { entries: usize, mini_batches: usize },
    #[error("worker channel closed")]
    WorkerGone,
}
