//! reptree: a local-first, multi-peer replicated tree CRDT engine.
//!
//! The core engine (`ids`, `value`, `ops`, `store`, `observer`, `tree`,
//! `vertex`, `space`) is plain synchronous Rust with no internal locking —
//! a `RepTree` has exactly one writer. `tokio` is used only at the I/O
//! boundary: `persistence` (op log + secrets on disk) and `sync`
//! (filesystem watching, wire message shapes). A process embeds a
//! `RepTree` behind a single owning task or actor and talks to it over a
//! channel; the engine itself never spawns a thread or holds a lock.

pub mod error;
pub mod ids;
pub mod observer;
pub mod ops;
pub mod persistence;
pub mod space;
pub mod store;
pub mod sync;
pub mod tree;
pub mod value;
pub mod vertex;

pub use error::{Error, PersistError, Result, SyncError};
pub use ids::{LamportClock, OpId, PeerId, VertexId};
pub use ops::Operation;
pub use space::{AppTree, Space};
pub use tree::RepTree;
pub use value::PropertyValue;
pub use vertex::Vertex;
