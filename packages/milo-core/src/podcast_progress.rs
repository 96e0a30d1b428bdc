//! Podcast progress tracking: per-episode resume position, persisted to its
//! own `podcast_data.json` document independent of the main settings store.
//!
//! Position updates arrive at player-tick frequency and would thrash the
//! disk if written synchronously, so updates only mark an episode dirty in
//! memory; a background ticker flushes dirty entries every
//! [`crate::constants::PODCAST_PERSIST_INTERVAL_SECS`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::constants::PODCAST_PERSIST_INTERVAL_SECS;
use crate::error::{MiloError, MiloResult};
use crate::events::{Event, EventEmitter};
use crate::model::PodcastProgress;
use crate::utils::now_millis;

/// On-disk shape of `podcast_data.json`. Subscriptions/favorites/preferences
/// are opaque to the core; only `progress` is read and written here.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct PodcastData {
    #[serde(default)]
    progress: HashMap<Uuid, PodcastProgress>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

pub struct PodcastProgressService {
    path: PathBuf,
    progress: DashMap<Uuid, PodcastProgress>,
    dirty: DashMap<Uuid, ()>,
    other: Mutex<serde_json::Map<String, serde_json::Value>>,
    write_lock: Mutex<()>,
    emitter: Arc<dyn EventEmitter>,
}

impl PodcastProgressService {
    /// Loads `data_dir/podcast_data.json`, creating an empty document if it
    /// does not yet exist, and spawns the persistence ticker.
    pub async fn load(data_dir: impl AsRef<Path>, emitter: Arc<dyn EventEmitter>) -> MiloResult<Arc<Self>> {
        let path = data_dir.as_ref().join("podcast_data.json");

        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<PodcastData>(&bytes)
                .map_err(|e| MiloError::Config(format!("parsing podcast_data.json: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PodcastData::default(),
            Err(e) => return Err(MiloError::Config(format!("reading podcast_data.json: {e}"))),
        };

        let progress = DashMap::new();
        for (uuid, p) in data.progress {
            progress.insert(uuid, p);
        }

        let service = Arc::new(Self {
            path,
            progress,
            dirty: DashMap::new(),
            other: Mutex::new(data.other),
            write_lock: Mutex::new(()),
            emitter,
        });

        service.clone().spawn_persist_ticker();
        Ok(service)
    }

    fn spawn_persist_ticker(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(PODCAST_PERSIST_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = self.flush_dirty().await {
                    tracing::warn!(error = %e, "failed to persist podcast progress");
                }
            }
        });
    }

    /// Records a position tick for `episode`, recomputing the completion
    /// invariant and marking the entry dirty for the next periodic flush.
    pub async fn on_position(&self, episode: Uuid, position_s: f64, duration_s: f64) {
        let now = now_millis();
        let completed = {
            let mut entry = self.progress.entry(episode).or_default();
            entry.update(position_s, duration_s, now);
            entry.completed
        };
        self.dirty.insert(episode, ());

        if completed {
            self.emitter.emit_podcast(Event::podcast(
                "podcast.completed",
                serde_json::json!({ "episode_uuid": episode }),
            ));
        }
    }

    /// Returns the saved progress for `episode`, if any has ever been recorded.
    pub async fn load_progress(&self, episode: Uuid) -> Option<PodcastProgress> {
        self.progress.get(&episode).map(|r| r.clone())
    }

    pub async fn mark_completed(&self, episode: Uuid) {
        let now = now_millis();
        {
            let mut entry = self.progress.entry(episode).or_default();
            entry.completed = true;
            entry.position_seconds = 0.0;
            entry.updated_at = now;
        }
        self.dirty.insert(episode, ());
        let _ = self.flush_dirty().await;
    }

    /// Forces an immediate persist of `episode` if dirty, used on plugin stop
    /// so a shutdown mid-episode doesn't lose up to
    /// [`PODCAST_PERSIST_INTERVAL_SECS`] of position tracking.
    pub async fn flush(&self, episode: Uuid) {
        if self.dirty.remove(&episode).is_some() {
            if let Err(e) = self.persist().await {
                tracing::warn!(error = %e, episode = %episode, "failed to flush podcast progress");
            }
        }
    }

    async fn flush_dirty(&self) -> MiloResult<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        self.dirty.clear();
        self.persist().await
    }

    async fn persist(&self) -> MiloResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut progress = HashMap::new();
        for entry in self.progress.iter() {
            progress.insert(*entry.key(), entry.value().clone());
        }
        let other = self.other.lock().await.clone();
        let data = PodcastData { progress, other };

        let bytes = serde_json::to_vec_pretty(&data)
            .map_err(|e| MiloError::Persistence(format!("serializing podcast_data.json: {e}")))?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| MiloError::Persistence(format!("writing temp podcast_data.json: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| MiloError::Persistence(format!("renaming podcast_data.json: {e}")))?;
        Ok(())
    }
}
