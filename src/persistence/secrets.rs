//! Secrets blob: an opaque `Record<string,string>` held in memory, NOT part
//! of the RepTree, persisted as a separate AES-GCM encrypted blob.
//!
//! Layout: `<space>/secrets` — `base64(iv(12) || ciphertext)`. Key = the
//! space id's UTF-8 bytes, truncated/padded to 32 bytes for AES-256-GCM
//! (see DESIGN.md for the key-derivation rationale).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::error::PersistError;

const NONCE_LEN: usize = 12;

fn derive_key(space_id: &str) -> Key<Aes256Gcm> {
    let mut key_bytes = [0u8; 32];
    let src = space_id.as_bytes();
    let n = src.len().min(32);
    key_bytes[..n].copy_from_slice(&src[..n]);
    Key::<Aes256Gcm>::from(key_bytes)
}

/// Encrypt `secrets` for storage at `<space>/secrets`.
pub fn encrypt(space_id: &str, secrets: &HashMap<String, String>) -> Result<String, PersistError> {
    let plaintext = serde_json::to_vec(secrets)?;
    let cipher = Aes256Gcm::new(&derive_key(space_id));

    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|_| PersistError::SecretDecryptFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt a previously-saved blob. On any failure — corrupt blob, wrong
/// key, truncated IV — returns an empty map rather than propagating an
/// error: the space is still usable, the user just re-enters keys.
pub fn decrypt(space_id: &str, blob_base64: &str) -> HashMap<String, String> {
    try_decrypt(space_id, blob_base64).unwrap_or_default()
}

fn try_decrypt(space_id: &str, blob_base64: &str) -> Option<HashMap<String, String>> {
    let blob = BASE64.decode(blob_base64.trim()).ok()?;
    if blob.len() < NONCE_LEN {
        return None;
    }
    let (iv, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(&derive_key(space_id));
    let plaintext = cipher.decrypt(Nonce::from_slice(iv), ciphertext).ok()?;
    serde_json::from_slice(&plaintext).ok()
}

pub async fn save(space_root: &Path, space_id: &str, secrets: &HashMap<String, String>) -> Result<(), PersistError> {
    let encoded = encrypt(space_id, secrets)?;
    tokio::fs::write(space_root.join("secrets"), encoded).await?;
    Ok(())
}

/// Load the secrets blob from disk, decrypting it. Returns an empty map if
/// the file is missing (new space) or fails to decrypt.
pub async fn load(space_root: &Path, space_id: &str) -> HashMap<String, String> {
    match tokio::fs::read_to_string(space_root.join("secrets")).await {
        Ok(contents) => decrypt(space_id, &contents),
        Err(_) => HashMap::new(),
    }
}

/// Save `secrets` only if they differ from `last_saved`, to avoid rewriting
/// the file (and bumping its mtime, which would wake other peers' watchers
/// for nothing) when nothing actually changed. Updates `last_saved` on a
/// successful write.
pub async fn save_if_changed(
    space_root: &Path,
    space_id: &str,
    secrets: &HashMap<String, String>,
    last_saved: &mut Option<HashMap<String, String>>,
) -> Result<bool, PersistError> {
    if last_saved.as_ref() == Some(secrets) {
        return Ok(false);
    }
    save(space_root, space_id, secrets).await?;
    *last_saved = Some(secrets.clone());
    Ok(true)
}

/// Spawns a background task that polls `<space>/secrets` every `interval`
/// (spec: every 1s) and sends the decrypted map whenever its content
/// changes from what was last observed — either by this process (after
/// `save_if_changed`) or by another peer writing a new blob. The caller
/// reads from the returned channel to pick up out-of-band updates; it does
/// not itself drive writes.
pub fn spawn_poll_loop(
    space_root: PathBuf,
    space_id: String,
    interval: Duration,
) -> (tokio::task::JoinHandle<()>, tokio::sync::mpsc::Receiver<HashMap<String, String>>) {
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let handle = tokio::spawn(async move {
        let mut last_seen: Option<HashMap<String, String>> = None;
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let current = load(&space_root, &space_id).await;
            if last_seen.as_ref() != Some(&current) {
                last_seen = Some(current.clone());
                if tx.send(current).await.is_err() {
                    break;
                }
            }
        }
    });
    (handle, rx)
}
