//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::constants::{
    BLUETOOTH_PLAYER_UNIT, DEFAULT_SPOTIFY_AUTO_DISCONNECT_DELAY_SECS, DEFAULT_TRANSPORT_ENDPOINT,
    HTTP_CLIENT_TIMEOUT_SECS, PODCAST_SOCKET_FILE, RADIO_SOCKET_FILE, SPOTIFY_STATUS_URL,
};
use crate::error::MiloResult;
use crate::events::{Broadcaster, EventEmitter};
use crate::model::AudioSource;
use crate::plugins::probes::{HttpReadinessProbe, LanReadinessProbe, SocketReadinessProbe, UnitsActiveProbe};
use crate::plugins::{BluetoothPlugin, LanPlugin, PluginRegistry, PodcastPlugin, RadioPlugin, SourcePlugin, SpotifyPlugin, StateReporter};
use crate::podcast_progress::PodcastProgressService;
use crate::routing::transport::{HttpTransportClient, TransportClient};
use crate::routing::{ActiveSourceQuery, RoutingEngine};
use crate::settings::SettingsStore;
use crate::state_machine::StateMachine;
use crate::supervisor::{ServiceSupervisor, SystemdSupervisor};
use crate::volume::{AlsaMixerActuator, TransportVolumeActuator, VolumeController};

/// Deployment-time configuration, distinct from the runtime-tunable values
/// kept in `settings.json` (see [`crate::settings`]).
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `settings.json`, `podcast_data.json`, `routing.env`,
    /// and the `backups/` directory.
    pub data_dir: PathBuf,
    /// Whether to pass `--user` to `systemctl` (unprivileged orchestrator).
    pub systemd_user_mode: bool,
    /// JSON-RPC endpoint of the multiroom transport.
    pub transport_endpoint: String,
    /// Preferred HTTP bind port for the REST/WebSocket server, 0 for auto.
    pub bind_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/milo"),
            systemd_user_mode: false,
            transport_endpoint: DEFAULT_TRANSPORT_ENDPOINT.to_string(),
            bind_port: 0,
        }
    }
}

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub settings: Arc<SettingsStore>,
    pub supervisor: Arc<dyn ServiceSupervisor>,
    pub volume: Arc<VolumeController>,
    pub state_machine: Arc<StateMachine>,
    pub routing: Arc<RoutingEngine>,
    pub podcast_progress: Arc<PodcastProgressService>,
    /// Concrete fan-out used by the WebSocket boundary to register subscribers.
    pub broadcaster: Broadcaster,
    pub config: Config,
    /// Shared HTTP client for connection pooling (Spotify probe, transport RPC).
    http_client: Client,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Initiates graceful shutdown: stops the active source (if any) so its
    /// unit is brought down cleanly, flushes podcast progress, then signals
    /// every background task to stop.
    pub async fn shutdown(&self) {
        tracing::info!("beginning graceful shutdown");

        let active = self.state_machine.snapshot().active_source;
        if active != AudioSource::None {
            if let Err(e) = self.state_machine.request_source(AudioSource::None).await {
                tracing::warn!(error = %e, "failed to stop active source during shutdown");
            }
        }

        self.cancel_token.cancel();
        tracing::info!("shutdown complete");
    }
}

/// Creates the shared HTTP client used by the Spotify readiness probe and
/// the multiroom transport's JSON-RPC client.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
        .build()
        .expect("failed to build HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (HTTP client, cancellation token)
/// 2. Settings store (everything downstream reads its own tunables from it)
/// 3. Service supervisor and event broadcaster
/// 4. Volume controller and podcast progress service (leaf consumers of 2-3)
/// 5. State machine, constructed before the plugin registry it will own
///    (the registry↔machine cycle is broken with a two-phase `attach_registry`)
/// 6. The five concrete plugins, each holding the state machine as its
///    [`StateReporter`]
/// 7. Routing engine, constructed after the state machine so it can hold it
///    as an [`ActiveSourceQuery`], then wired back via `attach_routing`
///
/// # Errors
///
/// Returns an error if the settings store, podcast progress service, or
/// routing engine fail to load their on-disk state.
pub async fn bootstrap_services(config: Config) -> MiloResult<BootstrappedServices> {
    let http_client = create_http_client();
    let cancel_token = CancellationToken::new();

    let settings = SettingsStore::load(&config.data_dir).await?;
    let supervisor: Arc<dyn ServiceSupervisor> = Arc::new(SystemdSupervisor::new(config.systemd_user_mode));
    let broadcaster = Broadcaster::new();
    let emitter: Arc<dyn EventEmitter> = Arc::new(broadcaster.clone());

    let volume_transport: Arc<dyn TransportClient> =
        Arc::new(HttpTransportClient::new(http_client.clone(), config.transport_endpoint.clone()));
    let volume = VolumeController::new(
        Arc::clone(&settings),
        Arc::clone(&emitter),
        Arc::new(AlsaMixerActuator::new()),
        Arc::new(TransportVolumeActuator::new(volume_transport)),
    );
    let podcast_progress = PodcastProgressService::load(&config.data_dir, Arc::clone(&emitter)).await?;

    let state_machine = StateMachine::new(Arc::clone(&emitter));

    let auto_disconnect_delay = settings
        .get("spotify.auto_disconnect_delay")
        .await
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_SPOTIFY_AUTO_DISCONNECT_DELAY_SECS);

    let registry = build_plugin_registry(
        &state_machine,
        &supervisor,
        &http_client,
        &podcast_progress,
        &config,
        Duration::from_secs(auto_disconnect_delay),
    );

    for plugin in registry.values() {
        plugin.initialize().await?;
    }
    state_machine.attach_registry(registry);

    let transport: Arc<dyn TransportClient> =
        Arc::new(HttpTransportClient::new(http_client.clone(), config.transport_endpoint.clone()));
    let active_source: Arc<dyn ActiveSourceQuery> = Arc::clone(&state_machine) as Arc<dyn ActiveSourceQuery>;
    let routing = RoutingEngine::new(
        Arc::clone(&settings),
        Arc::clone(&supervisor),
        transport,
        Arc::clone(&emitter),
        active_source,
        config.data_dir.clone(),
    )
    .await;
    state_machine.attach_routing(Arc::clone(&routing));

    Ok(BootstrappedServices {
        settings,
        supervisor,
        volume,
        state_machine,
        routing,
        podcast_progress,
        broadcaster,
        config,
        http_client,
        cancel_token,
    })
}

fn build_plugin_registry(
    state_machine: &Arc<StateMachine>,
    supervisor: &Arc<dyn ServiceSupervisor>,
    http_client: &Client,
    podcast_progress: &Arc<PodcastProgressService>,
    config: &Config,
    auto_disconnect_delay: Duration,
) -> PluginRegistry {
    let mut registry: PluginRegistry = HashMap::new();
    let reporter = || Arc::clone(state_machine) as Arc<dyn StateReporter>;

    let spotify_probe = Arc::new(HttpReadinessProbe::new(http_client.clone(), SPOTIFY_STATUS_URL));
    registry.insert(
        AudioSource::Spotify,
        SpotifyPlugin::new(reporter(), Arc::clone(supervisor), spotify_probe, auto_disconnect_delay),
    );

    let bluetooth_probe = Arc::new(UnitsActiveProbe::new(
        Arc::clone(supervisor),
        vec![AudioSource::Bluetooth.unit_name(), BLUETOOTH_PLAYER_UNIT.to_string()],
    ));
    registry.insert(
        AudioSource::Bluetooth,
        BluetoothPlugin::new(reporter(), Arc::clone(supervisor), bluetooth_probe, BLUETOOTH_PLAYER_UNIT),
    );

    let lan_probe = Arc::new(LanReadinessProbe::new(Arc::clone(supervisor), AudioSource::Lan.unit_name()));
    registry.insert(
        AudioSource::Lan,
        LanPlugin::new(reporter(), Arc::clone(supervisor), lan_probe),
    );

    let radio_probe = Arc::new(SocketReadinessProbe::new(config.data_dir.join(RADIO_SOCKET_FILE)));
    registry.insert(
        AudioSource::Radio,
        RadioPlugin::new(reporter(), Arc::clone(supervisor), radio_probe),
    );

    let podcast_probe = Arc::new(SocketReadinessProbe::new(config.data_dir.join(PODCAST_SOCKET_FILE)));
    registry.insert(
        AudioSource::Podcast,
        PodcastPlugin::new(reporter(), Arc::clone(supervisor), podcast_probe, Arc::clone(podcast_progress)),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_has_timeout() {
        let client = create_http_client();
        assert!(client.get("http://example.com").build().is_ok());
    }

    #[tokio::test]
    async fn bootstrap_wires_every_plugin_and_reaches_none_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            systemd_user_mode: false,
            transport_endpoint: DEFAULT_TRANSPORT_ENDPOINT.to_string(),
            bind_port: 0,
        };

        let services = bootstrap_services(config).await.unwrap();
        let snapshot = services.state_machine.snapshot();
        assert_eq!(snapshot.active_source, AudioSource::None);
        services.shutdown().await;
    }
}
