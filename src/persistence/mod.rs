//! Disk persistence: append-only op logs plus the encrypted secrets blob,
//! and the periodic flush that drains a tree's locally-produced ops to disk.

pub mod jsonl;
pub mod secrets;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PersistError;
use crate::ids::PeerId;
use crate::tree::RepTree;

/// Drains `tree`'s buffered local ops and appends them under `space_root`.
/// Call this after every local mutation batch, or on the flush interval in
/// [`spawn_flush_loop`]. A no-op when there is nothing new to write.
pub async fn flush_tree(space_root: &Path, tree_id: &str, tree: &mut RepTree) -> Result<(), PersistError> {
    let ops = tree.pop_local_ops();
    if ops.is_empty() {
        return Ok(());
    }
    jsonl::append_ops(space_root, tree_id, &tree.peer_id().to_string(), &ops).await
}

/// Reload every persisted op for `tree_id` and hand it to a freshly
/// constructed tree — the read path used on process start and when an
/// AppTree is loaded on demand.
pub async fn load_tree(space_root: &Path, tree_id: &str, peer_id: impl Into<PeerId>) -> Result<RepTree, PersistError> {
    let ops = jsonl::load_tree_ops(space_root, tree_id).await?;
    Ok(RepTree::new(peer_id, ops))
}

/// Spawns a background task that periodically flushes `tree` every
/// `interval`. The task owns the tree for its lifetime; callers that need
/// to keep mutating the tree from elsewhere should prefer the actor shape
/// described in the crate root docs instead of this raw helper.
pub fn spawn_flush_loop(
    space_root: PathBuf,
    tree_id: String,
    mut tree: RepTree,
    interval: Duration,
) -> (tokio::task::JoinHandle<RepTree>, tokio::sync::mpsc::Sender<()>) {
    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = flush_tree(&space_root, &tree_id, &mut tree).await {
                        tracing::warn!(%err, tree_id = %tree_id, "flush failed, will retry next tick");
                    }
                }
                _ = stop_rx.recv() => {
                    let _ = flush_tree(&space_root, &tree_id, &mut tree).await;
                    break;
                }
            }
        }
        tree
    });
    (handle, stop_tx)
}
