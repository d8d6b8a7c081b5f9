//! Append-only per-peer JSONL op log, partitioned by tree/date.
//!
//! Directory layout: `ops/<tt>/<rest>/<YYYY-MM-DD>/<peerId>.jsonl`, where
//! `tt` is the first two characters of the tree id and `<rest>` the
//! remainder. Files are append-only; one writer per (tree, day, peer) — the
//! owning peer.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tokio::io::AsyncWriteExt;

use crate::error::PersistError;
use crate::ids::PeerId;
use crate::ops::Operation;

/// The directory holding all date-partitioned op files for `tree_id`.
pub fn tree_dir(space_root: &Path, tree_id: &str) -> PathBuf {
    let split = tree_id.char_indices().nth(2).map(|(i, _)| i).unwrap_or(tree_id.len());
    let (tt, rest) = tree_id.split_at(split);
    let rest = if rest.is_empty() { "_" } else { rest };
    space_root.join("ops").join(tt).join(rest)
}

fn is_date_dir_name(name: &str) -> bool {
    NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok()
}

/// Append this peer's non-transient ops for `tree_id` to today's file.
/// Transient ops are filtered out here — this is the single point where
/// the "never persist transient ops" invariant is enforced.
pub async fn append_ops(
    space_root: &Path,
    tree_id: &str,
    peer_id: &PeerId,
    ops: &[Operation],
) -> Result<(), PersistError> {
    let lines: Vec<String> = ops
        .iter()
        .filter(|op| !op.is_transient())
        .map(Operation::encode_line)
        .collect();
    if lines.is_empty() {
        return Ok(());
    }

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let dir = tree_dir(space_root, tree_id).join(today);
    tokio::fs::create_dir_all(&dir).await?;
    let file_path = dir.join(format!("{peer_id}.jsonl"));

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file_path)
        .await?;
    let mut buf = String::new();
    for line in lines {
        buf.push_str(&line);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Load every op ever recorded for `tree_id`, across all peers and dates,
/// in no particular order — the engine's merge is commutative. Malformed
/// lines are skipped and logged, not propagated: a corrupt line in one
/// file shouldn't prevent loading everything else.
pub async fn load_tree_ops(space_root: &Path, tree_id: &str) -> Result<Vec<Operation>, PersistError> {
    let dir = tree_dir(space_root, tree_id);
    let mut ops = Vec::new();

    let mut dates = match tokio::fs::read_dir(&dir).await {
        Ok(rd) => collect_date_dirs(rd).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ops),
        Err(e) => return Err(e.into()),
    };
    dates.sort();

    for date in dates {
        let date_dir = dir.join(&date);
        let mut entries = tokio::fs::read_dir(&date_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let peer_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let content = tokio::fs::read_to_string(&path).await?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Operation::decode_line(line, &peer_id) {
                    Ok(op) => ops.push(op),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "skipping malformed op line");
                    }
                }
            }
        }
    }
    Ok(ops)
}

async fn collect_date_dirs(mut rd: tokio::fs::ReadDir) -> Result<Vec<String>, PersistError> {
    let mut dates = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_date_dir_name(name) {
                dates.push(name.to_string());
            }
        }
    }
    Ok(dates)
}
