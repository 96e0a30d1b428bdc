//! Milo Core - shared library for the Milo audio orchestrator.
//!
//! This crate provides the core functionality for Milo: a multi-source
//! audio orchestrator that exposes exactly one logical active audio source
//! at a time among heterogeneous source plugins (Spotify Connect, Bluetooth
//! A2DP, a LAN receiver, internet radio, and a podcast player), and
//! coordinates plugin lifecycle, ALSA output routing, and real-time state
//! fan-out to connected UIs over a push channel.
//!
//! # Architecture
//!
//! - [`model`]: shared data model (`AudioSource`, `PluginState`, `RoutingState`, ...)
//! - [`settings`]: dot-path settings store with atomic persistence (C1)
//! - [`supervisor`]: service-unit lifecycle supervision (C2)
//! - [`volume`]: per-target volume control with debounced persistence (C3)
//! - [`routing`]: ALSA routing engine and multiroom transport client (C4)
//! - [`plugins`]: source plugin contract and the five concrete plugins (C5/C6)
//! - [`state_machine`]: unified state machine, single authority for active source (C7)
//! - [`events`]: event schema and subscriber broadcaster (C8)
//! - [`podcast_progress`]: per-episode resume position tracking (C9)
//! - [`api`]: HTTP/WebSocket boundary (C10)
//! - [`bootstrap`]: composition root wiring every component together
//! - [`error`]: centralized error types

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod constants;
pub mod error;
pub mod events;
pub mod model;
pub mod plugins;
pub mod podcast_progress;
pub mod routing;
pub mod settings;
pub mod state_machine;
pub mod supervisor;
pub mod utils;
pub mod volume;

pub use bootstrap::{bootstrap_services, BootstrappedServices, Config};
pub use error::{ErrorCode, MiloError, MiloResult};
pub use events::{Broadcaster, Event, EventCategory, EventEmitter};
pub use model::{AudioSource, PluginState, RoutingMode, RoutingState, SystemAudioState, VolumeState};
pub use state_machine::StateMachine;
pub use utils::now_millis;

pub use api::{start_server, AppState, AppStateBuilder, ServerError};
