//! Internet radio plugin: a media player controlled over a local IPC socket.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::probes::ReadinessProbe;
use super::{PluginBase, PluginMetadata, SourcePlugin, StateReporter};
use crate::error::{MiloError, MiloResult};
use crate::model::{AudioSource, PluginState};
use crate::supervisor::ServiceSupervisor;

#[derive(Default, Clone)]
struct RadioStatus {
    station_id: Option<String>,
    station_name: Option<String>,
    favicon: Option<String>,
    is_buffering: bool,
    is_playing: bool,
}

pub struct RadioPlugin {
    base: Arc<PluginBase>,
    supervisor: Arc<dyn ServiceSupervisor>,
    probe: Arc<dyn ReadinessProbe>,
    status: RwLock<RadioStatus>,
}

impl RadioPlugin {
    #[must_use]
    pub fn new(
        reporter: Arc<dyn StateReporter>,
        supervisor: Arc<dyn ServiceSupervisor>,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: Arc::new(PluginBase::new(AudioSource::Radio, reporter)),
            supervisor,
            probe,
            status: RwLock::new(RadioStatus::default()),
        })
    }

}

impl RadioStatus {
    fn to_json(&self) -> serde_json::Value {
        PluginMetadata::Radio {
            station_id: self.station_id.clone(),
            station_name: self.station_name.clone(),
            favicon: self.favicon.clone(),
            is_buffering: self.is_buffering,
            is_playing: self.is_playing,
        }
        .to_json()
    }
}

#[async_trait]
impl SourcePlugin for RadioPlugin {
    fn source(&self) -> AudioSource {
        AudioSource::Radio
    }

    async fn initialize(&self) -> MiloResult<()> {
        Ok(())
    }

    async fn start(&self) -> MiloResult<()> {
        self.supervisor.start(&AudioSource::Radio.unit_name()).await?;
        PluginBase::wait_until_ready(self.probe.as_ref()).await?;
        self.base
            .watch_unit(Arc::clone(&self.supervisor), AudioSource::Radio.unit_name())
            .await;
        self.base.report_state(PluginState::Ready).await;
        Ok(())
    }

    async fn stop(&self) -> MiloResult<()> {
        self.base.stop_watching_unit().await;
        self.supervisor.stop(&AudioSource::Radio.unit_name()).await?;
        self.base.report_state(PluginState::Inactive).await;
        Ok(())
    }

    async fn status(&self) -> PluginMetadata {
        let s = self.status.read().clone();
        PluginMetadata::Radio {
            station_id: s.station_id,
            station_name: s.station_name,
            favicon: s.favicon,
            is_buffering: s.is_buffering,
            is_playing: s.is_playing,
        }
    }

    async fn handle_command(&self, name: &str, args: serde_json::Value) -> MiloResult<()> {
        match name {
            "play" | "pause" | "resume" | "stop" => Ok(()),
            "play_station" => {
                let id = args
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| MiloError::InvalidRequest("play_station requires id".into()))?
                    .to_string();
                let mut s = self.status.write();
                s.station_id = Some(id);
                s.is_buffering = true;
                s.is_playing = false;
                drop(s);
                self.base.report_metadata(self.status.read().clone().to_json()).await;
                Ok(())
            }
            "mark_broken" => Ok(()),
            _ => Err(MiloError::InvalidRequest(format!("radio plugin has no command {name}"))),
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

    #[tokio::test]
    async fn play_station_updates_status_and_emits_metadata() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let supervisor = Arc::new(FakeSupervisor::new());
        let probe = Arc::new(FakeProbe::new(true));
        let plugin = RadioPlugin::new(reporter, supervisor, probe);

        plugin
            .handle_command("play_station", serde_json::json!({ "id": "station-1" }))
            .await
            .unwrap();

        let (_, _, metadata) = rx.recv().await.unwrap();
        let metadata = metadata.unwrap();
        assert_eq!(metadata["station_id"], "station-1");
        assert_eq!(metadata["is_buffering"], true);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let supervisor = Arc::new(FakeSupervisor::new());
        let probe = Arc::new(FakeProbe::new(true));
        let plugin = RadioPlugin::new(reporter, supervisor, probe);

        let result = plugin.handle_command("teleport", serde_json::json!({})).await;
        assert!(result.is_err());
    }
}
