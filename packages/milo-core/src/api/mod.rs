//! HTTP/WebSocket API layer (C10).
//!
//! This module contains thin handlers that delegate to services; it
//! provides router construction and server startup. No business logic
//! lives here — every handler maps 1:1 to a C3/C4/C7/C6 operation.

use std::sync::Arc;

use thiserror::Error;

use crate::events::Broadcaster;
use crate::routing::RoutingEngine;
use crate::settings::SettingsStore;
use crate::state_machine::StateMachine;
use crate::volume::VolumeController;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services. All business
/// logic lives in the services themselves (settings, volume, routing, the
/// state machine, podcast progress).
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub volume: Arc<VolumeController>,
    pub state_machine: Arc<StateMachine>,
    pub routing: Arc<RoutingEngine>,
    /// Fan-out used by the `/ws` handler to register subscribers.
    pub broadcaster: Broadcaster,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Preferred bind port, 0 for auto-discovery in the 49400-49410 range.
    pub bind_port: u16,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    settings: Option<Arc<SettingsStore>>,
    volume: Option<Arc<VolumeController>>,
    state_machine: Option<Arc<StateMachine>>,
    routing: Option<Arc<RoutingEngine>>,
    broadcaster: Option<Broadcaster>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    bind_port: u16,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates every shared service field from a `BootstrappedServices`
    /// container, leaving only `ws_manager` (owned by the API layer, not
    /// bootstrap) and `bind_port` to be set individually.
    pub fn from_services(mut self, services: &crate::BootstrappedServices) -> Self {
        self.settings = Some(Arc::clone(&services.settings));
        self.volume = Some(Arc::clone(&services.volume));
        self.state_machine = Some(Arc::clone(&services.state_machine));
        self.routing = Some(Arc::clone(&services.routing));
        self.broadcaster = Some(services.broadcaster.clone());
        self.bind_port = services.config.bind_port;
        self
    }

    /// Sets the WebSocket connection manager.
    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    /// Sets the preferred bind port.
    pub fn bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            settings: self.settings.expect("settings is required"),
            volume: self.volume.expect("volume is required"),
            state_machine: self.state_machine.expect("state_machine is required"),
            routing: self.routing.expect("routing is required"),
            broadcaster: self.broadcaster.expect("broadcaster is required"),
            ws_manager: self.ws_manager.unwrap_or_default(),
            bind_port: self.bind_port,
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

async fn find_available_port(start: u16, end: u16) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let (port, listener) = if state.bind_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.bind_port));
        (state.bind_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(49400, 49410).await?
    };

    tracing::info!(port, "server listening");
    let app = http::create_router(state);

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;
    Ok(())
}
