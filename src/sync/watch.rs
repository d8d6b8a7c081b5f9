//! Bridges filesystem change notifications into tree merges: another
//! process (or another peer sharing the same on-disk space, e.g. over a
//! synced folder) writes a `.jsonl` op file, and this module notices,
//! reloads it, and feeds the new ops into the in-memory `RepTree`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::ids::PeerId;
use crate::ops::Operation;
use crate::persistence::jsonl;

/// What a filesystem change resolved to, once we know which tree (and
/// whether it matters) it touches.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// New ops appeared for `tree_id`, written by some peer other than us.
    TreeChanged { tree_id: String, ops: Vec<Operation> },
    /// The space's `secrets` blob was rewritten on disk.
    SecretsChanged,
}

/// Watches `space_root` recursively and emits [`WatchEvent`]s for changes
/// not caused by `own_peer_id` itself — a peer never needs to react to its
/// own writes, it already has the ops in memory.
pub struct SpaceWatcher {
    _watcher: RecommendedWatcher,
    pub events: mpsc::Receiver<WatchEvent>,
}

impl SpaceWatcher {
    pub fn start(space_root: impl Into<PathBuf>, own_peer_id: impl Into<PeerId>) -> Result<Self, SyncError> {
        let space_root = space_root.into();
        let own_peer_id = own_peer_id.into();
        let (raw_tx, mut raw_rx) = mpsc::channel::<Event>(256);
        let (tx, rx) = mpsc::channel::<WatchEvent>(256);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.blocking_send(event);
            }
        })?;
        watcher.watch(&space_root, RecursiveMode::Recursive)?;

        tokio::spawn(async move {
            let mut seen_dates: HashSet<PathBuf> = HashSet::new();
            while let Some(event) = raw_rx.recv().await {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in event.paths {
                    if path.file_name().and_then(|n| n.to_str()) == Some("secrets") {
                        if tx.send(WatchEvent::SecretsChanged).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    let Some(watch_event) =
                        resolve_jsonl_change(&space_root, &path, &own_peer_id, &mut seen_dates).await
                    else {
                        continue;
                    };
                    if tx.send(watch_event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher, events: rx })
    }
}

async fn resolve_jsonl_change(
    space_root: &Path,
    path: &Path,
    own_peer_id: &PeerId,
    seen_dates: &mut HashSet<PathBuf>,
) -> Option<WatchEvent> {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return None;
    }
    let peer_id = path.file_stem().and_then(|s| s.to_str())?;
    if peer_id == own_peer_id {
        return None;
    }
    // path looks like <space_root>/ops/<tt>/<rest>/<date>/<peer>.jsonl
    let date_dir = path.parent()?;
    let rest_dir = date_dir.parent()?;
    let tt_dir = rest_dir.parent()?;
    let ops_dir = tt_dir.parent()?;
    if ops_dir.file_name()?.to_str()? != "ops" {
        return None;
    }
    let tt = tt_dir.file_name()?.to_str()?;
    let rest = rest_dir.file_name()?.to_str()?;
    let tree_id = if rest == "_" { tt.to_string() } else { format!("{tt}{rest}") };

    seen_dates.insert(date_dir.to_path_buf());
    let ops = jsonl::load_tree_ops(space_root, &tree_id).await.ok()?;
    Some(WatchEvent::TreeChanged { tree_id, ops })
}
