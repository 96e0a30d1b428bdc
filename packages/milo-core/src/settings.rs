//! Dot-path settings store with atomic persistence and change notification.
//!
//! Settings live in a single `settings.json` document under the configured
//! data directory, addressed by dot-paths (`"volume.persist_debounce_ms"`).
//! Writes take an exclusive async lock, are applied to an in-memory copy,
//! then persisted via write-to-temp-file + rename so a crash mid-write never
//! leaves a torn file behind. A timestamped copy is kept under `backups/`
//! before each overwrite.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::error::{MiloError, MiloResult};
use crate::utils::now_millis;

/// Default settings document, seeded on first run.
fn default_settings() -> Value {
    serde_json::json!({
        "volume": {
            "persist_debounce_ms": crate::constants::DEFAULT_VOLUME_PERSIST_DEBOUNCE_MS,
            "min_db": crate::constants::DEFAULT_VOLUME_MIN_DB,
            "max_db": crate::constants::DEFAULT_VOLUME_MAX_DB,
            "restore_last_volume": crate::constants::DEFAULT_RESTORE_LAST_VOLUME,
        },
        "spotify": {
            "auto_disconnect_delay": crate::constants::DEFAULT_SPOTIFY_AUTO_DISCONNECT_DELAY_SECS,
        },
        "routing": {
            "mode": "direct",
            "equalizer": false,
        },
    })
}

/// Walks a dot-path (`"a.b.c"`) into a JSON value, returning `None` if any
/// segment is missing or not an object.
fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Walks/creates a dot-path into a JSON value and assigns `value` at the leaf.
fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        current = current
            .as_object_mut()
            .expect("just ensured object")
            .entry(*segment)
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    current
        .as_object_mut()
        .expect("just ensured object")
        .insert(segments[segments.len() - 1].to_string(), value);
}

/// A single setting change, broadcast to watchers after persistence succeeds.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub path: String,
    pub value: Value,
    pub updated_at: u64,
}

/// Dot-path settings store backed by a JSON document on disk.
pub struct SettingsStore {
    path: PathBuf,
    backups_dir: PathBuf,
    data: Mutex<Value>,
    watch_tx: watch::Sender<Option<SettingsChange>>,
}

impl SettingsStore {
    /// Loads settings from `data_dir/settings.json`, creating it with
    /// defaults if it does not yet exist.
    pub async fn load(data_dir: impl AsRef<Path>) -> MiloResult<Arc<Self>> {
        let data_dir = data_dir.as_ref();
        let path = data_dir.join("settings.json");
        let backups_dir = data_dir.join("backups");

        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| MiloError::Config(format!("creating data dir: {e}")))?;
        tokio::fs::create_dir_all(&backups_dir)
            .await
            .map_err(|e| MiloError::Config(format!("creating backups dir: {e}")))?;

        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, "settings.json is corrupted, falling back to the most recent backup");
                    match Self::load_most_recent_backup(&backups_dir).await {
                        Some(value) => value,
                        None => {
                            tracing::error!("no usable settings backup found, falling back to defaults");
                            default_settings()
                        }
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = default_settings();
                Self::write_atomic(&path, &defaults).await?;
                defaults
            }
            Err(e) => return Err(MiloError::Config(format!("reading settings.json: {e}"))),
        };

        let (watch_tx, _) = watch::channel(None);

        Ok(Arc::new(Self {
            path,
            backups_dir,
            data: Mutex::new(data),
            watch_tx,
        }))
    }

    /// Reads a value at `path`, or `None` if it doesn't exist.
    pub async fn get(&self, path: &str) -> Option<Value> {
        let data = self.data.lock().await;
        get_path(&data, path).cloned()
    }

    /// Sets a value at `path`, persists the whole document, then notifies
    /// watchers. Holds the store's lock for the duration of the write so
    /// concurrent `set` calls serialize.
    pub async fn set(&self, path: &str, value: Value) -> MiloResult<()> {
        let mut data = self.data.lock().await;

        self.backup(&data).await?;
        let mut next = data.clone();
        set_path(&mut next, path, value.clone());
        Self::write_atomic(&self.path, &next).await?;
        *data = next;

        let change = SettingsChange {
            path: path.to_string(),
            value,
            updated_at: now_millis(),
        };
        // No receivers is not an error: watching is optional.
        let _ = self.watch_tx.send(Some(change));

        Ok(())
    }

    /// Subscribes to settings changes. The initial value is `None`; every
    /// subsequent `set()` call produces `Some(change)`.
    pub fn watch(&self) -> watch::Receiver<Option<SettingsChange>> {
        self.watch_tx.subscribe()
    }

    /// Scans `backups_dir` for `settings-{ts}.json` snapshots and returns the
    /// parsed contents of the newest one that actually parses, trying older
    /// snapshots in turn if a newer one is itself corrupted.
    async fn load_most_recent_backup(backups_dir: &Path) -> Option<Value> {
        let mut entries = tokio::fs::read_dir(backups_dir).await.ok()?;
        let mut candidates = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(ts) = name.strip_prefix("settings-").and_then(|s| s.strip_suffix(".json")) {
                if let Ok(ts) = ts.parse::<u64>() {
                    candidates.push((ts, entry.path()));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, path) in candidates {
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(value) => return Some(value),
                    Err(e) => tracing::warn!(error = %e, path = %path.display(), "backup snapshot is also corrupted, trying an older one"),
                },
                Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to read backup snapshot"),
            }
        }
        None
    }

    /// Copies the current on-disk document into `backups/` before an
    /// overwrite, so a bad write can be recovered from manually. Best effort:
    /// failures here don't block the write itself, only log.
    async fn backup(&self, current: &Value) -> MiloResult<()> {
        let ts = now_millis();
        let backup_path = self.backups_dir.join(format!("settings-{ts}.json"));
        let bytes = serde_json::to_vec_pretty(current)
            .map_err(|e| MiloError::Persistence(format!("serializing backup: {e}")))?;
        if let Err(e) = tokio::fs::write(&backup_path, bytes).await {
            tracing::warn!(error = %e, "failed to write settings backup, continuing");
        }
        Ok(())
    }

    /// Writes `value` to `path` via a temp file in the same directory
    /// followed by a rename, so a crash never leaves a half-written file.
    async fn write_atomic(path: &Path, value: &Value) -> MiloResult<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| MiloError::Persistence(format!("serializing settings: {e}")))?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| MiloError::Persistence(format!("writing temp settings file: {e}")))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| MiloError::Persistence(format!("renaming settings file: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        let value = store.get("volume.persist_debounce_ms").await.unwrap();
        assert_eq!(value, serde_json::json!(500));
    }

    #[tokio::test]
    async fn set_persists_and_is_readable_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        store
            .set("routing.equalizer", serde_json::json!(true))
            .await
            .unwrap();

        let reloaded = SettingsStore::load(dir.path()).await.unwrap();
        let value = reloaded.get("routing.equalizer").await.unwrap();
        assert_eq!(value, serde_json::json!(true));
    }

    #[tokio::test]
    async fn set_creates_new_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        store
            .set("podcast.resume_min_position_secs", serde_json::json!(10.0))
            .await
            .unwrap();
        assert_eq!(
            store.get("podcast.resume_min_position_secs").await,
            Some(serde_json::json!(10.0))
        );
    }

    #[tokio::test]
    async fn watchers_see_changes_after_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        let mut rx = store.watch();

        store
            .set("volume.persist_debounce_ms", serde_json::json!(750))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        let change = rx.borrow().clone().unwrap();
        assert_eq!(change.path, "volume.persist_debounce_ms");
        assert_eq!(change.value, serde_json::json!(750));
    }

    #[tokio::test]
    async fn corrupted_primary_falls_back_to_newest_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        store
            .set("routing.equalizer", serde_json::json!(true))
            .await
            .unwrap();

        tokio::fs::write(dir.path().join("settings.json"), b"not json")
            .await
            .unwrap();

        let reloaded = SettingsStore::load(dir.path()).await.unwrap();
        assert_eq!(
            reloaded.get("routing.equalizer").await,
            Some(serde_json::json!(true))
        );
    }

    #[tokio::test]
    async fn corrupted_primary_and_backups_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let _store = SettingsStore::load(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("settings.json"), b"not json")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("backups").join("settings-1.json"), b"also not json")
            .await
            .unwrap();

        let reloaded = SettingsStore::load(dir.path()).await.unwrap();
        assert_eq!(
            reloaded.get("volume.persist_debounce_ms").await,
            Some(serde_json::json!(crate::constants::DEFAULT_VOLUME_PERSIST_DEBOUNCE_MS))
        );
    }

    #[tokio::test]
    async fn backup_directory_receives_a_copy_before_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        store
            .set("routing.equalizer", serde_json::json!(true))
            .await
            .unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("backups")).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert!(count >= 1);
    }
}
