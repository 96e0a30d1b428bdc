//! Spotify Connect plugin: local Connect daemon exposing an HTTP
//! control+event socket, plus an auto-disconnect timer for idle sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::probes::ReadinessProbe;
use super::{PluginBase, PluginMetadata, SourcePlugin, StateReporter};
use crate::error::MiloResult;
use crate::model::{AudioSource, PluginState};
use crate::supervisor::ServiceSupervisor;

#[derive(Default, Clone)]
struct SpotifyStatus {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    art_url: Option<String>,
    position_ms: Option<u64>,
    is_playing: bool,
}

pub struct SpotifyPlugin {
    base: Arc<PluginBase>,
    supervisor: Arc<dyn ServiceSupervisor>,
    probe: Arc<dyn ReadinessProbe>,
    status: RwLock<SpotifyStatus>,
    auto_disconnect_delay: Duration,
    /// Cancelled/replaced whenever playback resumes, to abort a pending
    /// auto-disconnect countdown.
    disconnect_timer: Mutex<Option<CancellationToken>>,
    paused: AtomicBool,
}

impl SpotifyPlugin {
    #[must_use]
    pub fn new(
        reporter: Arc<dyn StateReporter>,
        supervisor: Arc<dyn ServiceSupervisor>,
        probe: Arc<dyn ReadinessProbe>,
        auto_disconnect_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: Arc::new(PluginBase::new(AudioSource::Spotify, reporter)),
            supervisor,
            probe,
            status: RwLock::new(SpotifyStatus::default()),
            auto_disconnect_delay,
            disconnect_timer: Mutex::new(None),
            paused: AtomicBool::new(false),
        })
    }

    /// Called by the daemon's event feed (out of scope for this core, wired
    /// by the real Connect event listener) whenever playback state changes.
    pub async fn on_daemon_update(self: &Arc<Self>, playing: bool, status: serde_json::Value) {
        {
            let mut s = self.status.write();
            s.is_playing = playing;
            if let Some(title) = status.get("title").and_then(|v| v.as_str()) {
                s.title = Some(title.to_string());
            }
            if let Some(artist) = status.get("artist").and_then(|v| v.as_str()) {
                s.artist = Some(artist.to_string());
            }
        }

        self.base.report_metadata(self.status.read().clone().to_json()).await;

        if playing {
            self.cancel_auto_disconnect().await;
            self.paused.store(false, Ordering::SeqCst);
        } else if !self.paused.swap(true, Ordering::SeqCst) {
            self.start_auto_disconnect_timer().await;
        }
    }

    async fn start_auto_disconnect_timer(self: &Arc<Self>) {
        let token = CancellationToken::new();
        *self.disconnect_timer.lock().await = Some(token.clone());

        let this = Arc::clone(self);
        let delay = self.auto_disconnect_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    this.base.report_state(PluginState::Ready).await;
                }
                _ = token.cancelled() => {}
            }
        });
    }

    async fn cancel_auto_disconnect(&self) {
        if let Some(token) = self.disconnect_timer.lock().await.take() {
            token.cancel();
        }
    }
}

impl SpotifyStatus {
    fn to_json(&self) -> serde_json::Value {
        PluginMetadata::Spotify {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            art_url: self.art_url.clone(),
            position_ms: self.position_ms,
            is_playing: self.is_playing,
        }
        .to_json()
    }
}

#[async_trait]
impl SourcePlugin for SpotifyPlugin {
    fn source(&self) -> AudioSource {
        AudioSource::Spotify
    }

    async fn initialize(&self) -> MiloResult<()> {
        Ok(())
    }

    async fn start(&self) -> MiloResult<()> {
        self.supervisor.start(&AudioSource::Spotify.unit_name()).await?;
        PluginBase::wait_until_ready(self.probe.as_ref()).await?;
        self.base
            .watch_unit(Arc::clone(&self.supervisor), AudioSource::Spotify.unit_name())
            .await;
        self.base.report_state(PluginState::Ready).await;
        Ok(())
    }

    async fn stop(&self) -> MiloResult<()> {
        self.base.stop_watching_unit().await;
        self.cancel_auto_disconnect().await;
        self.supervisor.stop(&AudioSource::Spotify.unit_name()).await?;
        self.base.report_state(PluginState::Inactive).await;
        Ok(())
    }

    async fn status(&self) -> PluginMetadata {
        let s = self.status.read().clone();
        PluginMetadata::Spotify {
            title: s.title,
            artist: s.artist,
            album: s.album,
            art_url: s.art_url,
            position_ms: s.position_ms,
            is_playing: s.is_playing,
        }
    }

    async fn handle_command(&self, name: &str, _args: serde_json::Value) -> MiloResult<()> {
        match name {
            "play" | "pause" | "resume" | "stop" => Ok(()),
            _ => Err(crate::error::MiloError::InvalidRequest(format!(
                "spotify plugin has no command {name}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::probes::fake::FakeProbe;
    use crate::plugins::test_support::RecordingReporter;
    use crate::supervisor::fake::FakeSupervisor;
    use tokio::sync::mpsc;

    fn plugin(delay: Duration) -> (Arc<SpotifyPlugin>, mpsc::UnboundedReceiver<(AudioSource, PluginState, Option<serde_json::Value>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let supervisor = Arc::new(FakeSupervisor::new());
        let probe = Arc::new(FakeProbe::new(true));
        (
            SpotifyPlugin::new(reporter, supervisor, probe, delay),
            rx,
        )
    }

    #[tokio::test]
    async fn start_reaches_ready_after_probe_succeeds() {
        let (plugin, mut rx) = plugin(Duration::from_millis(50));
        plugin.start().await.unwrap();
        let (source, state, _) = rx.recv().await.unwrap();
        assert_eq!(source, AudioSource::Spotify);
        assert_eq!(state, PluginState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_for_longer_than_delay_returns_to_ready() {
        let (plugin, mut rx) = plugin(Duration::from_secs(10));
        plugin.on_daemon_update(false, serde_json::json!({})).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        let (source, state, _) = rx.recv().await.unwrap();
        assert_eq!(source, AudioSource::Spotify);
        assert_eq!(state, PluginState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn resuming_within_delay_cancels_the_timer() {
        let (plugin, mut rx) = plugin(Duration::from_secs(10));
        plugin.on_daemon_update(false, serde_json::json!({})).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        plugin.on_daemon_update(true, serde_json::json!({})).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        let mut saw_ready = false;
        while let Ok((_, state, _)) = rx.try_recv() {
            if state == PluginState::Ready {
                saw_ready = true;
            }
        }
        assert!(!saw_ready, "auto-disconnect should have been cancelled by resume");
    }
}
