//! REST surface (C10): thin handlers mapping 1:1 to C1/C3/C4/C7/C6
//! operations. No business logic lives here.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::constants::SERVICE_ID;
use crate::error::{MiloError, MiloResult};
use crate::model::{AudioSource, RoutingState};

/// Settings key groups exposed over `GET`/`PUT /api/settings/<key>`; every
/// other top-level group is internal and rejected with `NotFound`.
const SETTINGS_KEY_WHITELIST: &[&str] = &["volume", "spotify", "routing"];

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/health", get(health))
        .route("/api/audio/source", post(set_source))
        .route("/api/audio/state", get(get_state))
        .route("/api/audio/{source}/command", post(send_command))
        .route("/api/settings/{*key}", get(get_setting).put(put_setting))
        .route("/api/routing", get(get_routing).put(put_routing))
        .route("/api/volume/{target}", get(get_volume).put(put_volume))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_source(raw: &str) -> MiloResult<AudioSource> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| MiloError::InvalidRequest(format!("unknown audio source {raw}")))
}

/// `GET /api/ping` — bare liveness check, no dependency on bootstrapped state.
async fn ping() -> Response {
    api_ok()
}

/// `GET /api/health` — readiness: reachable as long as the process is up and
/// the state machine can hand back a snapshot.
async fn health(State(state): State<AppState>) -> Response {
    let snapshot = state.state_machine.snapshot();
    api_success(serde_json::json!({
        "service": SERVICE_ID,
        "active_source": snapshot.active_source,
    }))
}

#[derive(Deserialize)]
struct SetSourceRequest {
    target: AudioSource,
}

/// `POST /api/audio/source {target}` → C7 `request_source`.
async fn set_source(
    State(state): State<AppState>,
    Json(body): Json<SetSourceRequest>,
) -> Result<Response, MiloError> {
    state.state_machine.request_source(body.target).await?;
    Ok(api_ok())
}

/// `GET /api/audio/state` → C7 snapshot.
async fn get_state(State(state): State<AppState>) -> Response {
    api_success(state.state_machine.snapshot())
}

#[derive(Deserialize)]
struct CommandRequest {
    name: String,
    #[serde(default)]
    args: Value,
}

/// `POST /api/audio/<source>/command {name, args}` → C6 `handle_command`,
/// dispatched through C7 so only the currently active source can be
/// commanded.
async fn send_command(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Json(body): Json<CommandRequest>,
) -> Result<Response, MiloError> {
    let source = parse_source(&source)?;
    state.state_machine.dispatch_command(source, &body.name, body.args).await?;
    Ok(api_ok())
}

/// `GET /api/settings/<key>` → C1, gated by the key-group whitelist.
async fn get_setting(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response, MiloError> {
    check_settings_whitelist(&key)?;
    let value = state
        .settings
        .get(&key)
        .await
        .ok_or_else(|| MiloError::NotFound(format!("setting {key}")))?;
    Ok(api_success(value))
}

#[derive(Deserialize)]
struct SettingValueRequest {
    value: Value,
}

/// `PUT /api/settings/<key> {value}` → C1, gated by the key-group whitelist.
async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SettingValueRequest>,
) -> Result<Response, MiloError> {
    check_settings_whitelist(&key)?;
    state.settings.set(&key, body.value).await?;
    Ok(api_ok())
}

fn check_settings_whitelist(key: &str) -> MiloResult<()> {
    let group = key.split('.').next().unwrap_or(key);
    if SETTINGS_KEY_WHITELIST.contains(&group) {
        Ok(())
    } else {
        Err(MiloError::NotFound(format!("setting {key}")))
    }
}

/// `GET /api/routing` → C4 current configuration.
async fn get_routing(State(state): State<AppState>) -> Response {
    api_success(state.routing.current().await)
}

/// `PUT /api/routing {mode, equalizer}` → C4 `set`.
async fn put_routing(
    State(state): State<AppState>,
    Json(body): Json<RoutingState>,
) -> Result<Response, MiloError> {
    state.routing.set(body).await?;
    Ok(api_ok())
}

/// `GET /api/volume/<target>` → C3 current state.
async fn get_volume(State(state): State<AppState>, Path(target): Path<String>) -> Response {
    api_success(state.volume.get(&target).await)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VolumeRequest {
    Level { level_db: f64 },
    Mute { muted: bool },
}

/// `PUT /api/volume/<target> {level_db}` or `{muted}` → C3.
async fn put_volume(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Json(body): Json<VolumeRequest>,
) -> Result<Response, MiloError> {
    match body {
        VolumeRequest::Level { level_db } => state.volume.set_level(&target, level_db).await?,
        VolumeRequest::Mute { muted } => state.volume.set_muted(&target, muted).await?,
    }
    Ok(api_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::api::WsConnectionManager;
    use crate::events::{Broadcaster, EventEmitter, NoopEventEmitter};
    use crate::model::AudioSource;
    use crate::routing::transport::fake::FakeTransportClient;
    use crate::routing::transport::TransportClient;
    use crate::routing::{ActiveSourceQuery, RoutingEngine};
    use crate::settings::SettingsStore;
    use crate::state_machine::StateMachine;
    use crate::supervisor::fake::FakeSupervisor;
    use crate::supervisor::ServiceSupervisor;
    use crate::volume::fake::FakeVolumeActuator;
    use crate::volume::VolumeController;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let state_machine = StateMachine::new(Arc::clone(&emitter));
        let volume = VolumeController::new(
            Arc::clone(&settings),
            Arc::clone(&emitter),
            Arc::new(FakeVolumeActuator::default()),
            Arc::new(FakeVolumeActuator::default()),
        );

        let supervisor: Arc<dyn ServiceSupervisor> = Arc::new(FakeSupervisor::new());
        let transport: Arc<dyn TransportClient> = Arc::new(FakeTransportClient::with_groups(&["group-1"]));
        let active_source = Arc::clone(&state_machine) as Arc<dyn ActiveSourceQuery>;
        let routing = RoutingEngine::new(
            Arc::clone(&settings),
            supervisor,
            transport,
            Arc::clone(&emitter),
            active_source,
            dir.path(),
        )
        .await;

        let state = AppState {
            settings,
            volume,
            state_machine,
            routing,
            broadcaster: Broadcaster::new(),
            ws_manager: Arc::new(WsConnectionManager::default()),
            bind_port: 0,
        };
        (state, dir)
    }

    #[test]
    fn parse_source_accepts_known_variants() {
        assert_eq!(parse_source("spotify").unwrap(), AudioSource::Spotify);
        assert_eq!(parse_source("none").unwrap(), AudioSource::None);
    }

    #[test]
    fn parse_source_rejects_unknown_variant() {
        assert!(matches!(parse_source("chromecast"), Err(MiloError::InvalidRequest(_))));
    }

    #[test]
    fn settings_whitelist_allows_known_groups_and_nested_keys() {
        assert!(check_settings_whitelist("volume").is_ok());
        assert!(check_settings_whitelist("routing.equalizer").is_ok());
    }

    #[test]
    fn settings_whitelist_rejects_internal_groups() {
        assert!(matches!(check_settings_whitelist("supervisor"), Err(MiloError::NotFound(_))));
    }

    #[tokio::test]
    async fn ping_and_health_respond_ok() {
        let (state, _dir) = test_state().await;
        let _ = ping().await;
        let _ = health(State(state)).await;
    }

    #[tokio::test]
    async fn set_source_then_get_state_reflects_transition() {
        // No plugins attached, so the only reachable target is `None`, which
        // is always a no-op transition regardless of the empty registry.
        let (state, _dir) = test_state().await;
        set_source(State(state.clone()), Json(SetSourceRequest { target: AudioSource::None }))
            .await
            .unwrap();
        let _ = get_state(State(state)).await;
    }

    #[tokio::test]
    async fn send_command_to_non_active_source_is_rejected() {
        let (state, _dir) = test_state().await;
        let result = send_command(
            State(state),
            Path("spotify".to_string()),
            Json(CommandRequest { name: "play".into(), args: Value::Null }),
        )
        .await;
        assert!(matches!(result, Err(MiloError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn put_then_get_setting_round_trips_through_whitelist() {
        let (state, _dir) = test_state().await;
        put_setting(
            State(state.clone()),
            Path("volume.default_target".to_string()),
            Json(SettingValueRequest { value: Value::String("local".into()) }),
        )
        .await
        .unwrap();

        let _ = get_setting(State(state), Path("volume.default_target".to_string())).await.unwrap();
    }

    #[tokio::test]
    async fn get_setting_rejects_key_outside_whitelist() {
        let (state, _dir) = test_state().await;
        let result = get_setting(State(state), Path("supervisor.unit".to_string())).await;
        assert!(matches!(result, Err(MiloError::NotFound(_))));
    }

    #[tokio::test]
    async fn put_then_get_routing_round_trips() {
        let (state, _dir) = test_state().await;
        let desired = RoutingState {
            mode: crate::model::RoutingMode::Multiroom,
            equalizer: true,
        };
        put_routing(State(state.clone()), Json(desired.clone())).await.unwrap();
        let _ = get_routing(State(state)).await;
    }

    #[tokio::test]
    async fn put_volume_level_then_get_reflects_it() {
        let (state, _dir) = test_state().await;
        put_volume(
            State(state.clone()),
            Path("local".to_string()),
            Json(VolumeRequest::Level { level_db: -20.0 }),
        )
        .await
        .unwrap();
        let _ = get_volume(State(state), Path("local".to_string())).await;
    }

    #[tokio::test]
    async fn put_volume_mute_is_accepted() {
        let (state, _dir) = test_state().await;
        put_volume(State(state), Path("local".to_string()), Json(VolumeRequest::Mute { muted: true }))
            .await
            .unwrap();
    }
}
