//! Podcast plugin: a second instance of the radio media player, with
//! resume-seek integration against the progress service (C9).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::probes::ReadinessProbe;
use super::{PluginBase, PluginMetadata, SourcePlugin, StateReporter};
use crate::error::{MiloError, MiloResult};
use crate::model::{AudioSource, PluginState};
use crate::podcast_progress::PodcastProgressService;
use crate::supervisor::ServiceSupervisor;

#[derive(Default, Clone)]
struct PodcastStatus {
    episode_uuid: Option<Uuid>,
    podcast_name: Option<String>,
    title: Option<String>,
    position_s: Option<f64>,
    duration_s: Option<f64>,
    playback_speed: f64,
    is_buffering: bool,
    is_playing: bool,
}

impl Default for PodcastStatus {
    fn default() -> Self {
        Self {
            episode_uuid: None,
            podcast_name: None,
            title: None,
            position_s: None,
            duration_s: None,
            playback_speed: 1.0,
            is_buffering: false,
            is_playing: false,
        }
    }
}

const ALLOWED_SPEEDS: [f64; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];

pub struct PodcastPlugin {
    base: Arc<PluginBase>,
    supervisor: Arc<dyn ServiceSupervisor>,
    probe: Arc<dyn ReadinessProbe>,
    progress: Arc<PodcastProgressService>,
    status: RwLock<PodcastStatus>,
    /// Episode requested via a `play` command that arrived before `start()`
    /// reached Ready, consumed by `start()` to perform the resume seek
    /// before reporting Connected.
    pending_episode: RwLock<Option<Uuid>>,
    /// Set once `start()` has reached Ready; a `play` command arriving after
    /// that point must trigger the resume seek itself instead of only
    /// recording `pending_episode` for a `start()` that has already run.
    started: RwLock<bool>,
}

impl PodcastPlugin {
    #[must_use]
    pub fn new(
        reporter: Arc<dyn StateReporter>,
        supervisor: Arc<dyn ServiceSupervisor>,
        probe: Arc<dyn ReadinessProbe>,
        progress: Arc<PodcastProgressService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: Arc::new(PluginBase::new(AudioSource::Podcast, reporter)),
            supervisor,
            probe,
            progress,
            status: RwLock::new(PodcastStatus::default()),
            pending_episode: RwLock::new(None),
            started: RwLock::new(false),
        })
    }

    /// Seeks to the saved resume point (if any, and past the minimum
    /// threshold) immediately after the unit reaches Ready.
    async fn resume_and_connect(&self, episode: Uuid) {
        let resume_position = self
            .progress
            .load_progress(episode)
            .await
            .filter(|p| {
                !p.completed
                    && p.position_seconds > crate::constants::PODCAST_RESUME_MIN_POSITION_SECS
            })
            .map(|p| p.position_seconds);

        let mut s = self.status.write();
        s.episode_uuid = Some(episode);
        s.is_buffering = false;
        s.is_playing = true;
        if let Some(pos) = resume_position {
            s.position_s = Some(pos);
        }
        let snapshot = s.clone();
        drop(s);

        self.base.report_metadata(snapshot.to_json()).await;
    }

    /// Called by the player's position-report callback.
    pub async fn on_position(&self, position_s: f64, duration_s: f64) {
        let episode = {
            let mut s = self.status.write();
            s.position_s = Some(position_s);
            s.duration_s = Some(duration_s);
            s.episode_uuid
        };

        if let Some(episode) = episode {
            self.progress.on_position(episode, position_s, duration_s).await;
        }

        self.base.report_metadata(self.status.read().clone().to_json()).await;
    }
}

impl PodcastStatus {
    fn to_json_typed(&self) -> PluginMetadata {
        PluginMetadata::Podcast {
            episode_uuid: self.episode_uuid.map(|u| u.to_string()),
            podcast_name: self.podcast_name.clone(),
            title: self.title.clone(),
            position_s: self.position_s,
            duration_s: self.duration_s,
            playback_speed: self.playback_speed,
            is_buffering: self.is_buffering,
            is_playing: self.is_playing,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        self.to_json_typed().to_json()
    }
}

#[async_trait]
impl SourcePlugin for PodcastPlugin {
    fn source(&self) -> AudioSource {
        AudioSource::Podcast
    }

    async fn initialize(&self) -> MiloResult<()> {
        Ok(())
    }

    async fn start(&self) -> MiloResult<()> {
        self.supervisor.start(&AudioSource::Podcast.unit_name()).await?;
        PluginBase::wait_until_ready(self.probe.as_ref()).await?;

        if let Some(episode) = self.pending_episode.write().take() {
            self.resume_and_connect(episode).await;
        }
        *self.started.write() = true;
        self.base
            .watch_unit(Arc::clone(&self.supervisor), AudioSource::Podcast.unit_name())
            .await;
        self.base.report_state(PluginState::Ready).await;
        Ok(())
    }

    async fn stop(&self) -> MiloResult<()> {
        self.base.stop_watching_unit().await;
        if let Some(episode) = self.status.read().episode_uuid {
            self.progress.flush(episode).await;
        }
        self.supervisor.stop(&AudioSource::Podcast.unit_name()).await?;
        *self.pending_episode.write() = None;
        *self.started.write() = false;
        self.base.report_state(PluginState::Inactive).await;
        Ok(())
    }

    async fn status(&self) -> PluginMetadata {
        self.status.read().clone().to_json_typed()
    }

    async fn handle_command(&self, name: &str, args: serde_json::Value) -> MiloResult<()> {
        match name {
            "play" => {
                let episode = args
                    .get("episode_uuid")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| MiloError::InvalidRequest("play requires episode_uuid".into()))?;
                if *self.started.read() {
                    self.resume_and_connect(episode).await;
                } else {
                    *self.pending_episode.write() = Some(episode);
                }
                Ok(())
            }
            "pause" | "resume" | "stop" => Ok(()),
            "seek" => {
                let position_s = args
                    .get("position_s")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| MiloError::InvalidRequest("seek requires position_s".into()))?;
                self.status.write().position_s = Some(position_s);
                Ok(())
            }
            "set_speed" => {
                let speed = args
                    .get("speed")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| MiloError::InvalidRequest("set_speed requires speed".into()))?;
                if !ALLOWED_SPEEDS.contains(&speed) {
                    return Err(MiloError::InvalidRequest(format!("unsupported speed {speed}")));
                }
                self.status.write().playback_speed = speed;
                Ok(())
            }
            _ => Err(MiloError::InvalidRequest(format!("podcast plugin has no command {name}"))),
        }
    }
}
