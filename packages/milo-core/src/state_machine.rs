//! Unified state machine (C7): the single authority for `SystemAudioState`.
//!
//! Every mutation to the active source or its plugin state passes through
//! here, so the causal order observed by subscribers matches the order in
//! which these calls actually happened. The transition lock is held for the
//! whole stop-then-start procedure; `report_plugin_state` is deliberately
//! NOT gated by that same lock (a `tokio::sync::Mutex` isn't reentrant and
//! plugin callbacks fire from within the very task holding it) — instead it
//! checks whether the reporting source is the one currently occupying
//! `active_source`, which is updated at exactly the points the algorithm
//! below transfers ownership.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use crate::constants::TRANSITION_TIMEOUT_SECS;
use crate::error::{MiloError, MiloResult};
use crate::events::{Event, EventEmitter};
use crate::model::{AudioSource, PluginState, SystemAudioState};
use crate::plugins::{PluginRegistry, StateReporter};
use crate::routing::{ActiveSourceQuery, RoutingEngine};

pub struct StateMachine {
    /// Set once via [`Self::attach_registry`] — every concrete plugin holds
    /// a `StateReporter` reference back to this state machine, so the
    /// registry can only be built after the machine itself exists.
    registry: OnceLock<PluginRegistry>,
    emitter: Arc<dyn EventEmitter>,
    snapshot: RwLock<SystemAudioState>,
    transition_lock: tokio::sync::Mutex<()>,
    /// Target of the in-flight transition, if any; checked without waiting
    /// on `transition_lock` so a same-target call can dedup immediately
    /// rather than queueing behind an equivalent one already running.
    in_flight_target: Mutex<Option<AudioSource>>,
    /// Set once, after construction, via [`Self::attach_routing`] — breaks
    /// the construction cycle between the state machine and the routing
    /// engine (the latter depends on `Arc<dyn ActiveSourceQuery>`, which is
    /// this type).
    routing: OnceLock<Arc<RoutingEngine>>,
}

impl StateMachine {
    #[must_use]
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Arc<Self> {
        Arc::new(Self {
            registry: OnceLock::new(),
            emitter,
            snapshot: RwLock::new(SystemAudioState::default()),
            transition_lock: tokio::sync::Mutex::new(()),
            in_flight_target: Mutex::new(None),
            routing: OnceLock::new(),
        })
    }

    /// Wires in the plugin registry once every plugin has been constructed
    /// against an `Arc::clone` of this state machine. Must be called exactly
    /// once during bootstrap, before any `request_source`.
    pub fn attach_registry(&self, registry: PluginRegistry) {
        let _ = self.registry.set(registry);
    }

    /// Wires in the routing engine once it has been constructed. Must be
    /// called exactly once during bootstrap, before any `request_source`.
    pub fn attach_routing(&self, routing: Arc<RoutingEngine>) {
        let _ = self.routing.set(routing);
    }

    fn registry(&self) -> &PluginRegistry {
        self.registry.get().expect("plugin registry attached during bootstrap")
    }

    #[must_use]
    pub fn snapshot(&self) -> SystemAudioState {
        self.snapshot.read().clone()
    }

    /// Dispatches a named command to `source`'s plugin. Only valid against
    /// the currently active source — a command aimed at anything else would
    /// act on a plugin that isn't actually producing audio.
    pub async fn dispatch_command(
        &self,
        source: AudioSource,
        name: &str,
        args: serde_json::Value,
    ) -> MiloResult<()> {
        if self.snapshot.read().active_source != source {
            return Err(MiloError::InvalidRequest(format!("{source} is not the active source")));
        }
        let plugin = self
            .registry()
            .get(&source)
            .cloned()
            .ok_or_else(|| MiloError::NotFound(format!("no plugin registered for {source}")))?;
        plugin.handle_command(name, args).await
    }

    /// External intent to switch the active source, running the full
    /// stop-old/start-new transition under the transition lock.
    /// `Rejected("busy")` only for a same-target call
    /// racing an identical one already in flight; a different target simply
    /// queues behind the transition lock.
    pub async fn request_source(&self, target: AudioSource) -> MiloResult<()> {
        {
            let in_flight = self.in_flight_target.lock();
            if *in_flight == Some(target) {
                return Err(MiloError::Rejected("busy".into()));
            }
        }

        let _permit = self.transition_lock.lock().await;
        *self.in_flight_target.lock() = Some(target);
        let result = self.run_transition(target).await;
        *self.in_flight_target.lock() = None;
        result
    }

    async fn run_transition(&self, target: AudioSource) -> MiloResult<()> {
        self.set_transitioning(true);
        self.emitter
            .emit_system(Event::system("system.transition_started", json!({ "target": target })));

        let current = self.snapshot.read().active_source;
        if current == target {
            self.finish_transition();
            return Ok(());
        }

        if current != AudioSource::None {
            self.stop_source(current).await;
        }

        if target != AudioSource::None {
            self.start_source(target).await;
        } else {
            let mut snap = self.snapshot.write();
            snap.active_source = AudioSource::None;
            snap.plugin_state = PluginState::Inactive;
            snap.metadata = json!({});
        }

        if target != AudioSource::None {
            if let Some(routing) = self.routing.get() {
                if let Err(e) = routing.on_plugin_started(target).await {
                    tracing::warn!(error = %e, %target, "routing reconciliation after start failed");
                }
            }
        }

        self.finish_transition();
        Ok(())
    }

    async fn stop_source(&self, source: AudioSource) {
        self.set_plugin_state(source, PluginState::Stopping);

        let Some(plugin) = self.registry().get(&source).cloned() else {
            return;
        };
        let deadline = Duration::from_secs(TRANSITION_TIMEOUT_SECS);
        match tokio::time::timeout(deadline, plugin.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, %source, "plugin stop returned an error"),
            Err(_) => {
                tracing::warn!(%source, "plugin stop timed out, forcing Error");
                self.set_plugin_state(source, PluginState::Error);
            }
        }
    }

    async fn start_source(&self, target: AudioSource) {
        {
            let mut snap = self.snapshot.write();
            snap.active_source = target;
            snap.plugin_state = PluginState::Starting;
            snap.metadata = json!({});
        }
        self.emitter
            .emit_plugin(Event::plugin("plugin.state_changed", target, json!({ "state": "starting" })));

        let Some(plugin) = self.registry().get(&target).cloned() else {
            tracing::warn!(%target, "request_source target has no registered plugin");
            self.fail_start(target);
            return;
        };

        let deadline = Duration::from_secs(TRANSITION_TIMEOUT_SECS);
        match tokio::time::timeout(deadline, plugin.start()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, %target, "plugin start returned an error");
                self.fail_start(target);
            }
            Err(_) => {
                tracing::warn!(%target, "plugin start timed out, forcing Error");
                self.fail_start(target);
            }
        }
    }

    /// A failed start leaves `active_source = None`, `plugin_state =
    /// Inactive`, not stuck on the half-started target.
    fn fail_start(&self, target: AudioSource) {
        self.set_plugin_state(target, PluginState::Error);
        let mut snap = self.snapshot.write();
        snap.active_source = AudioSource::None;
        snap.plugin_state = PluginState::Inactive;
        snap.metadata = json!({});
    }

    fn set_plugin_state(&self, source: AudioSource, state: PluginState) {
        {
            let mut snap = self.snapshot.write();
            if snap.active_source != source {
                return;
            }
            snap.plugin_state = state;
        }
        self.emitter.emit_plugin(Event::plugin("plugin.state_changed", source, json!({})));
    }

    fn set_transitioning(&self, value: bool) {
        self.snapshot.write().transitioning = value;
    }

    fn finish_transition(&self) {
        self.set_transitioning(false);
        let snap = self.snapshot();
        self.emitter.emit_system(Event::system(
            "system.transition_finished",
            json!({ "active_source": snap.active_source, "plugin_state": snap.plugin_state }),
        ));
    }
}

#[async_trait]
impl StateReporter for StateMachine {
    /// Reports from the source currently occupying `active_source` (the one
    /// being started, or still being stopped) update the snapshot and emit
    /// immediately. Anything else is a stray report from a plugin that has
    /// already been relinquished — logged at `warn` since an operator
    /// debugging a stuck transition needs the signal, and dropped rather
    /// than forwarded.
    async fn report_plugin_state(
        &self,
        source: AudioSource,
        state: PluginState,
        metadata: Option<serde_json::Value>,
    ) {
        let applied = {
            let mut snap = self.snapshot.write();
            if snap.active_source != source {
                false
            } else {
                snap.plugin_state = state;
                if let Some(ref m) = metadata {
                    snap.metadata = m.clone();
                }
                true
            }
        };

        if !applied {
            tracing::warn!(%source, ?state, "dropping plugin report for non-active source");
            return;
        }

        let kind = if metadata.is_some() {
            "plugin.metadata_changed"
        } else {
            "plugin.state_changed"
        };
        let data = metadata.unwrap_or_else(|| json!({}));
        self.emitter.emit_plugin(Event::plugin(kind, source, data));
    }
}

impl ActiveSourceQuery for StateMachine {
    fn active_source(&self) -> AudioSource {
        self.snapshot.read().active_source
    }
}
