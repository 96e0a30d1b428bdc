//! Bluetooth A2DP plugin: a local daemon + player unit pair.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::probes::ReadinessProbe;
use super::{PluginBase, PluginMetadata, SourcePlugin, StateReporter};
use crate::error::MiloResult;
use crate::model::{AudioSource, PluginState};
use crate::supervisor::ServiceSupervisor;

#[derive(Default, Clone)]
struct BluetoothStatus {
    device_name: Option<String>,
    mac: Option<String>,
    is_playing: bool,
}

pub struct BluetoothPlugin {
    base: Arc<PluginBase>,
    supervisor: Arc<dyn ServiceSupervisor>,
    probe: Arc<dyn ReadinessProbe>,
    status: RwLock<BluetoothStatus>,
    player_unit: String,
}

impl BluetoothPlugin {
    #[must_use]
    pub fn new(
        reporter: Arc<dyn StateReporter>,
        supervisor: Arc<dyn ServiceSupervisor>,
        probe: Arc<dyn ReadinessProbe>,
        player_unit: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: Arc::new(PluginBase::new(AudioSource::Bluetooth, reporter)),
            supervisor,
            probe,
            status: RwLock::new(BluetoothStatus::default()),
            player_unit: player_unit.into(),
        })
    }

    /// Called by the A2DP bridge's pairing/connect callback.
    pub async fn on_device_connected(self: &Arc<Self>, device_name: String, mac: String) {
        {
            let mut s = self.status.write();
            s.device_name = Some(device_name);
            s.mac = Some(mac);
            s.is_playing = true;
        }
        self.base.report_metadata(self.status.read().clone().to_json()).await;
    }
}

impl BluetoothStatus {
    fn to_json(&self) -> serde_json::Value {
        PluginMetadata::Bluetooth {
            device_name: self.device_name.clone(),
            mac: self.mac.clone(),
            is_playing: self.is_playing,
        }
        .to_json()
    }
}

#[async_trait]
impl SourcePlugin for BluetoothPlugin {
    fn source(&self) -> AudioSource {
        AudioSource::Bluetooth
    }

    async fn initialize(&self) -> MiloResult<()> {
        Ok(())
    }

    async fn start(&self) -> MiloResult<()> {
        self.supervisor.start(&AudioSource::Bluetooth.unit_name()).await?;
        self.supervisor.start(&self.player_unit).await?;
        PluginBase::wait_until_ready(self.probe.as_ref()).await?;
        self.base
            .watch_unit(Arc::clone(&self.supervisor), AudioSource::Bluetooth.unit_name())
            .await;
        self.base.report_state(PluginState::Ready).await;
        Ok(())
    }

    async fn stop(&self) -> MiloResult<()> {
        self.base.stop_watching_unit().await;
        self.supervisor.stop(&self.player_unit).await?;
        self.supervisor.stop(&AudioSource::Bluetooth.unit_name()).await?;
        self.base.report_state(PluginState::Inactive).await;
        Ok(())
    }

    async fn status(&self) -> PluginMetadata {
        let s = self.status.read().clone();
        PluginMetadata::Bluetooth {
            device_name: s.device_name,
            mac: s.mac,
            is_playing: s.is_playing,
        }
    }

    async fn handle_command(&self, name: &str, _args: serde_json::Value) -> MiloResult<()> {
        match name {
            "play" | "pause" | "resume" | "stop" => Ok(()),
            _ => Err(crate::error::MiloError::InvalidRequest(format!(
                "bluetooth plugin has no command {name}"
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

    #[tokio::test]
    async fn start_requires_both_units_before_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(RecordingReporter { tx });
        let supervisor = Arc::new(FakeSupervisor::new());
        let probe = Arc::new(FakeProbe::new(true));
        let plugin = BluetoothPlugin::new(reporter, supervisor, probe, "milo-bt-player.service");

        plugin.start().await.unwrap();
        let (_, state, _) = rx.recv().await.unwrap();
        assert_eq!(state, PluginState::Ready);
    }
}
