//! LAN receiver plugin: a local packet receiver bound to RTP/repair/control
//! ports, ready once a packet has been observed or the unit has run long
//! enough unattended.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::probes::ReadinessProbe;
use super::{PluginBase, PluginMetadata, SourcePlugin, StateReporter};
use crate::error::MiloResult;
use crate::model::{AudioSource, PluginState};
use crate::supervisor::ServiceSupervisor;

#[derive(Default, Clone)]
struct LanStatus {
    sender_name: Option<String>,
    is_playing: bool,
}

pub struct LanPlugin {
    base: Arc<PluginBase>,
    supervisor: Arc<dyn ServiceSupervisor>,
    probe: Arc<dyn ReadinessProbe>,
    status: RwLock<LanStatus>,
}

impl LanPlugin {
    #[must_use]
    pub fn new(
        reporter: Arc<dyn StateReporter>,
        supervisor: Arc<dyn ServiceSupervisor>,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: Arc::new(PluginBase::new(AudioSource::Lan, reporter)),
            supervisor,
            probe,
            status: RwLock::new(LanStatus::default()),
        })
    }

    pub async fn on_sender_seen(self: &Arc<Self>, sender_name: String) {
        {
            let mut s = self.status.write();
            s.sender_name = Some(sender_name);
            s.is_playing = true;
        }
        self.base.report_metadata(self.status.read().clone().to_json()).await;
    }
}

impl LanStatus {
    fn to_json(&self) -> serde_json::Value {
        PluginMetadata::Lan {
            sender_name: self.sender_name.clone(),
            is_playing: self.is_playing,
        }
        .to_json()
    }
}

#[async_trait]
impl SourcePlugin for LanPlugin {
    fn source(&self) -> AudioSource {
        AudioSource::Lan
    }

    async fn initialize(&self) -> MiloResult<()> {
        Ok(())
    }

    async fn start(&self) -> MiloResult<()> {
        self.supervisor.start(&AudioSource::Lan.unit_name()).await?;
        PluginBase::wait_until_ready(self.probe.as_ref()).await?;
        self.base
            .watch_unit(Arc::clone(&self.supervisor), AudioSource::Lan.unit_name())
            .await;
        self.base.report_state(PluginState::Ready).await;
        Ok(())
    }

    async fn stop(&self) -> MiloResult<()> {
        self.base.stop_watching_unit().await;
        self.supervisor.stop(&AudioSource::Lan.unit_name()).await?;
        self.base.report_state(PluginState::Inactive).await;
        Ok(())
    }

    async fn status(&self) -> PluginMetadata {
        let s = self.status.read().clone();
        PluginMetadata::Lan {
            sender_name: s.sender_name,
            is_playing: s.is_playing,
        }
    }

    async fn handle_command(&self, name: &str, _args: serde_json::Value) -> MiloResult<()> {
        match name {
            "play" | "pause" | "resume" | "stop" => Ok(()),
            _ => Err(crate::error::MiloError::InvalidRequest(format!(
                "lan plugin has no command {name}"
            ))),
        }
    }
}
