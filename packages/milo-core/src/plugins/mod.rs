//! Source plugin contract and shared base behavior (C5), plus the concrete
//! plugins (C6).

mod bluetooth;
mod lan;
mod podcast;
pub mod probes;
mod radio;
mod spotify;

pub use bluetooth::BluetoothPlugin;
pub use lan::LanPlugin;
pub use podcast::PodcastPlugin;
pub use radio::RadioPlugin;
pub use spotify::SpotifyPlugin;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::MiloResult;
use crate::model::AudioSource;
use crate::supervisor::{ServiceSupervisor, UnitState};

/// Typed per-plugin payload. Flattened to `serde_json::Value` only at the
/// state machine / REST boundary, per the untyped-metadata-bag redesign note.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PluginMetadata {
    Spotify {
        title: Option<String>,
        artist: Option<String>,
        album: Option<String>,
        art_url: Option<String>,
        position_ms: Option<u64>,
        is_playing: bool,
    },
    Bluetooth {
        device_name: Option<String>,
        mac: Option<String>,
        is_playing: bool,
    },
    Lan {
        sender_name: Option<String>,
        is_playing: bool,
    },
    Radio {
        station_id: Option<String>,
        station_name: Option<String>,
        favicon: Option<String>,
        is_buffering: bool,
        is_playing: bool,
    },
    Podcast {
        episode_uuid: Option<String>,
        podcast_name: Option<String>,
        title: Option<String>,
        position_s: Option<f64>,
        duration_s: Option<f64>,
        playback_speed: f64,
        is_buffering: bool,
        is_playing: bool,
    },
}

impl PluginMetadata {
    /// Flattens to an untyped JSON object for delivery over the state
    /// machine / REST boundary.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Every source plugin exposes this contract. Lifecycle transitions MUST be
/// reported through the injected state-machine callback, never mutated
/// directly, so C7 remains the single authority for `PluginState`.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    fn source(&self) -> AudioSource;

    /// One-shot setup, called once at process start for every registered
    /// plugin (the plugin registry is immutable thereafter, per §9).
    async fn initialize(&self) -> MiloResult<()>;

    /// Brings the plugin to Ready: typically start the unit then probe.
    async fn start(&self) -> MiloResult<()>;

    /// Brings the plugin to Inactive. Idempotent.
    async fn stop(&self) -> MiloResult<()>;

    /// Opaque metadata snapshot.
    async fn status(&self) -> PluginMetadata;

    /// Dispatches a named command with JSON args.
    async fn handle_command(&self, name: &str, args: serde_json::Value) -> MiloResult<()>;
}

/// Callback through which a plugin reports state/metadata changes to C7,
/// without holding a direct reference to the state machine type.
#[async_trait]
pub trait StateReporter: Send + Sync {
    async fn report_plugin_state(
        &self,
        source: AudioSource,
        state: crate::model::PluginState,
        metadata: Option<serde_json::Value>,
    );
}

/// Shared behavior every concrete plugin composes rather than inherits:
/// metadata coalescing over a 100 ms window and unit-failure escalation.
pub struct PluginBase {
    source: AudioSource,
    reporter: Arc<dyn StateReporter>,
    pending: Mutex<Option<(serde_json::Value, tokio::task::JoinHandle<()>)>>,
    unit_watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PluginBase {
    #[must_use]
    pub fn new(source: AudioSource, reporter: Arc<dyn StateReporter>) -> Self {
        Self {
            source,
            reporter,
            pending: Mutex::new(None),
            unit_watcher: Mutex::new(None),
        }
    }

    /// Reports a `PluginState` transition immediately (no coalescing —
    /// state transitions are discrete, unlike metadata bursts).
    pub async fn report_state(&self, state: crate::model::PluginState) {
        self.reporter.report_plugin_state(self.source, state, None).await;
    }

    /// Reports a metadata update, collapsing bursts of updates within a
    /// 100 ms window into a single emission carrying the latest snapshot.
    pub async fn report_metadata(self: &Arc<Self>, metadata: serde_json::Value) {
        let mut pending = self.pending.lock().await;

        if let Some((_, handle)) = pending.take() {
            handle.abort();
        }

        let this = Arc::clone(self);
        let snapshot = metadata.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(
                crate::constants::METADATA_COALESCE_WINDOW_MS,
            ))
            .await;
            this.reporter
                .report_plugin_state(this.source, crate::model::PluginState::Connected, Some(snapshot))
                .await;
        });

        *pending = Some((metadata, handle));
    }

    /// Polls `probe` until it reports ready or the plugin readiness timeout
    /// elapses (`constants::PLUGIN_READINESS_TIMEOUT_SECS`).
    pub async fn wait_until_ready(
        probe: &dyn probes::ReadinessProbe,
    ) -> MiloResult<()> {
        let deadline = Duration::from_secs(crate::constants::PLUGIN_READINESS_TIMEOUT_SECS);
        tokio::time::timeout(deadline, async {
            loop {
                if probe.is_ready().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .map_err(|_| crate::error::MiloError::Transition("plugin readiness probe timed out".into()))
    }

    /// Called when the service supervisor reports a unit has failed:
    /// escalates to `Error` then requests `Stop`.
    pub async fn handle_unit_failure(&self) {
        self.reporter
            .report_plugin_state(self.source, crate::model::PluginState::Error, None)
            .await;
        self.reporter
            .report_plugin_state(self.source, crate::model::PluginState::Stopping, None)
            .await;
        self.reporter
            .report_plugin_state(self.source, crate::model::PluginState::Inactive, None)
            .await;
    }

    /// Starts polling `unit`'s systemd state in the background; once it
    /// observes `Failed`, escalates via `handle_unit_failure` and stops.
    /// Replaces (aborting) any watcher already running for this plugin, so a
    /// `stop()`/`start()` cycle never leaves more than one in flight.
    pub async fn watch_unit(self: &Arc<Self>, supervisor: Arc<dyn ServiceSupervisor>, unit: String) {
        let mut slot = self.unit_watcher.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let interval = Duration::from_secs(crate::constants::UNIT_FAILURE_POLL_INTERVAL_SECS);
            loop {
                tokio::time::sleep(interval).await;
                match supervisor.state(&unit).await {
                    Ok(UnitState::Failed) => {
                        tracing::warn!(%unit, "unit reported Failed, escalating plugin state");
                        this.handle_unit_failure().await;
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, %unit, "unit watcher failed to query state"),
                }
            }
        });
        *slot = Some(handle);
    }

    /// Cancels a running unit watcher, called before a deliberate `stop()` so
    /// the expected Active-to-Inactive transition is never mistaken for a crash.
    pub async fn stop_watching_unit(&self) {
        if let Some(handle) = self.unit_watcher.lock().await.take() {
            handle.abort();
        }
    }
}

/// Registers all five concrete plugins against a keyed map, built once at
/// startup and never mutated afterward (immutable-registry redesign note).
pub type PluginRegistry = HashMap<AudioSource, Arc<dyn SourcePlugin>>;


#[cfg(test)]
mod tests {
    use super::test_support::RecordingReporter;
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn metadata_bursts_coalesce_into_latest_snapshot() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let base = Arc::new(PluginBase::new(AudioSource::Radio, reporter));

        for i in 0..5 {
            base.report_metadata(serde_json::json!({ "n": i })).await;
        }

        let (_, _, metadata) = tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata, Some(serde_json::json!({ "n": 4 })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unit_failure_escalates_through_error_then_inactive() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let base = PluginBase::new(AudioSource::Bluetooth, reporter);

        base.handle_unit_failure().await;

        let (_, s1, _) = rx.recv().await.unwrap();
        let (_, s2, _) = rx.recv().await.unwrap();
        let (_, s3, _) = rx.recv().await.unwrap();
        assert_eq!(s1, crate::model::PluginState::Error);
        assert_eq!(s2, crate::model::PluginState::Stopping);
        assert_eq!(s3, crate::model::PluginState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn unit_watcher_escalates_once_supervisor_reports_failed() {
        use crate::supervisor::fake::FakeSupervisor;
        use crate::supervisor::UnitState;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let base = Arc::new(PluginBase::new(AudioSource::Radio, reporter));
        let supervisor = Arc::new(FakeSupervisor::new());
        supervisor.set_state("milo-radio.service", UnitState::Active);

        base.watch_unit(Arc::clone(&supervisor) as Arc<dyn super::ServiceSupervisor>, "milo-radio.service".into())
            .await;

        supervisor.set_state("milo-radio.service", UnitState::Failed);
        tokio::time::advance(Duration::from_secs(crate::constants::UNIT_FAILURE_POLL_INTERVAL_SECS + 1)).await;

        let (_, s1, _) = rx.recv().await.unwrap();
        assert_eq!(s1, crate::model::PluginState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_watching_unit_prevents_escalation_after_deliberate_stop() {
        use crate::supervisor::fake::FakeSupervisor;
        use crate::supervisor::UnitState;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let base = Arc::new(PluginBase::new(AudioSource::Radio, reporter));
        let supervisor = Arc::new(FakeSupervisor::new());
        supervisor.set_state("milo-radio.service", UnitState::Active);

        base.watch_unit(Arc::clone(&supervisor) as Arc<dyn super::ServiceSupervisor>, "milo-radio.service".into())
            .await;
        base.stop_watching_unit().await;
        supervisor.set_state("milo-radio.service", UnitState::Inactive);

        tokio::time::advance(Duration::from_secs(crate::constants::UNIT_FAILURE_POLL_INTERVAL_SECS + 1)).await;
        assert!(rx.try_recv().is_err());
    }
}
