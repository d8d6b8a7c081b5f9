//! Error types, one enum per layer: engine misuse, persistence I/O, and sync transport.

use thiserror::Error;

use crate::ids::VertexId;

/// Result type for engine-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the in-memory engine (store, tree, vertex, space).
///
/// The engine itself never fails on malformed or conflicting *input* — bad
/// ops are dropped silently. These variants cover misuse of the public API
/// (asking for a tree that was never loaded) and truly exceptional states.
#[derive(Error, Debug)]
pub enum Error {
    #[error("vertex not found: {0}")]
    VertexNotFound(VertexId),

    #[error("tree not loaded: {0}")]
    MissingTree(String),

    #[error("space is invalid: {0}")]
    InvalidSpace(String),

    #[error("loaded tree root id {loaded} does not match declared space id {declared}")]
    SpaceIdMismatch { declared: String, loaded: String },
}

/// Errors from the append-only op persistence layer.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed op line: {0}")]
    MalformedOp(String),

    #[error("secret decryption failed")]
    SecretDecryptFailed,
}

/// Errors from the op sync layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("channel closed")]
    ChannelClosed,
}
