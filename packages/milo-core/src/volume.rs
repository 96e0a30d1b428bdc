//! Volume control: dB-domain state, clamping, and debounced persistence.
//!
//! Every target (the local amplifier, or a multiroom transport client) has
//! its own [`VolumeState`]. Changes are applied to memory immediately and
//! reflected in a coalesced `volume.changed` event, but persistence to
//! settings is debounced so a volume slider being dragged doesn't hammer
//! the settings file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::constants::{ALSA_MIXER_NAME, LOCAL_VOLUME_TARGET};
use crate::error::{MiloError, MiloResult};
use crate::events::{Event, EventEmitter};
use crate::model::VolumeState;
use crate::routing::transport::TransportClient;
use crate::settings::SettingsStore;

fn clamp_db(level_db: f64, min_db: f64, max_db: f64) -> f64 {
    level_db.clamp(min_db, max_db)
}

/// Converts a clamped dB level to the underlying actuator's 0-100% scale.
/// Monotonic: `pct = round(100 * (db - min) / (max - min))`.
fn db_to_pct(level_db: f64, min_db: f64, max_db: f64) -> u8 {
    let pct = 100.0 * (level_db - min_db) / (max_db - min_db);
    pct.round().clamp(0.0, 100.0) as u8
}

/// Applies a clamped volume percentage to whatever physically owns a
/// target's output. One implementation per target class: the local ALSA
/// mixer, or the multiroom transport's per-group volume control.
#[async_trait]
pub trait VolumeActuator: Send + Sync {
    async fn apply(&self, target: &str, pct: u8) -> MiloResult<()>;
}

/// Drives the local amplifier via `amixer sset`.
pub struct AlsaMixerActuator {
    mixer_name: String,
}

impl AlsaMixerActuator {
    #[must_use]
    pub fn new() -> Self {
        Self { mixer_name: ALSA_MIXER_NAME.to_string() }
    }
}

impl Default for AlsaMixerActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeActuator for AlsaMixerActuator {
    async fn apply(&self, _target: &str, pct: u8) -> MiloResult<()> {
        let output = tokio::process::Command::new("amixer")
            .args(["sset", &self.mixer_name, &format!("{pct}%")])
            .output()
            .await
            .map_err(|e| MiloError::ServiceControl(format!("spawning amixer: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(MiloError::ServiceControl(format!(
                "amixer sset {} {pct}% failed: {}",
                self.mixer_name,
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}

/// Drives a multiroom transport group's volume over the same JSON-RPC client
/// the routing engine uses to bind streams.
pub struct TransportVolumeActuator {
    transport: Arc<dyn TransportClient>,
}

impl TransportVolumeActuator {
    #[must_use]
    pub fn new(transport: Arc<dyn TransportClient>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl VolumeActuator for TransportVolumeActuator {
    async fn apply(&self, target: &str, pct: u8) -> MiloResult<()> {
        self.transport.set_volume(target, pct).await
    }
}

/// Pending debounce task for one target, so a later change can cancel and
/// replace it without touching other targets.
struct PendingPersist {
    handle: JoinHandle<()>,
}

/// Owns every target's volume state and the debounce timers that persist it.
pub struct VolumeController {
    settings: Arc<SettingsStore>,
    emitter: Arc<dyn EventEmitter>,
    local_actuator: Arc<dyn VolumeActuator>,
    remote_actuator: Arc<dyn VolumeActuator>,
    states: DashMap<String, VolumeState>,
    pending: AsyncMutex<HashMap<String, PendingPersist>>,
}

impl VolumeController {
    #[must_use]
    pub fn new(
        settings: Arc<SettingsStore>,
        emitter: Arc<dyn EventEmitter>,
        local_actuator: Arc<dyn VolumeActuator>,
        remote_actuator: Arc<dyn VolumeActuator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            emitter,
            local_actuator,
            remote_actuator,
            states: DashMap::new(),
            pending: AsyncMutex::new(HashMap::new()),
        })
    }

    /// `(min_db, max_db)` — the shared clamp range every target obeys, read
    /// fresh from settings so an operator can retune it without a rebuild.
    pub async fn limits(&self) -> (f64, f64) {
        let min_db = self
            .settings
            .get("volume.min_db")
            .await
            .and_then(|v| v.as_f64())
            .unwrap_or(crate::constants::DEFAULT_VOLUME_MIN_DB);
        let max_db = self
            .settings
            .get("volume.max_db")
            .await
            .and_then(|v| v.as_f64())
            .unwrap_or(crate::constants::DEFAULT_VOLUME_MAX_DB);
        (min_db, max_db)
    }

    /// Current state for `target`, defaulting to `max_db` unmuted if never set.
    pub async fn get(&self, target: &str) -> VolumeState {
        if let Some(state) = self.states.get(target).map(|s| *s) {
            return state;
        }
        let (_, max_db) = self.limits().await;
        VolumeState { level_db: max_db, muted: false }
    }

    async fn restore_last_volume_enabled(&self) -> bool {
        self.settings
            .get("volume.restore_last_volume")
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(crate::constants::DEFAULT_RESTORE_LAST_VOLUME)
    }

    fn actuator_for(&self, target: &str) -> &Arc<dyn VolumeActuator> {
        if target == LOCAL_VOLUME_TARGET {
            &self.local_actuator
        } else {
            &self.remote_actuator
        }
    }

    /// Sets the level for `target`, clamping to the valid dB range, applying
    /// it to the underlying actuator, and — only once that succeeds —
    /// emitting `volume.changed` and scheduling a debounced persist.
    pub async fn set_level(self: &Arc<Self>, target: &str, level_db: f64) -> MiloResult<()> {
        let (min_db, max_db) = self.limits().await;
        let clamped = clamp_db(level_db, min_db, max_db);
        self.actuator_for(target)
            .apply(target, db_to_pct(clamped, min_db, max_db))
            .await?;

        let mut state = self.get(target).await;
        state.level_db = clamped;
        self.states.insert(target.to_string(), state);

        self.emitter.emit_volume(Event::volume(
            "volume.changed",
            target,
            json!({ "levelDb": state.level_db, "muted": state.muted }),
        ));

        self.schedule_persist(target).await;
        Ok(())
    }

    /// Adjusts `target`'s level by `delta_db`, clamping the result, following
    /// the same actuator-then-emit-then-persist path as `set_level`.
    pub async fn bump(self: &Arc<Self>, target: &str, delta_db: f64) -> MiloResult<()> {
        let current = self.get(target).await.level_db;
        self.set_level(target, current + delta_db).await
    }

    /// Sets the mute flag for `target`. Muting drives the actuator to 0% so
    /// the physical output actually goes silent; unmuting restores the
    /// actuator to the last known level.
    pub async fn set_muted(self: &Arc<Self>, target: &str, muted: bool) -> MiloResult<()> {
        let (min_db, max_db) = self.limits().await;
        let mut state = self.get(target).await;
        let pct = if muted { 0 } else { db_to_pct(state.level_db, min_db, max_db) };
        self.actuator_for(target).apply(target, pct).await?;

        state.muted = muted;
        self.states.insert(target.to_string(), state);

        self.emitter.emit_volume(Event::volume(
            "volume.changed",
            target,
            json!({ "levelDb": state.level_db, "muted": state.muted }),
        ));

        self.schedule_persist(target).await;
        Ok(())
    }

    /// Debounce interval, read fresh from settings each time so operators can
    /// retune it without a restart.
    async fn debounce(&self) -> Duration {
        let ms = self
            .settings
            .get("volume.persist_debounce_ms")
            .await
            .and_then(|v| v.as_u64())
            .unwrap_or(crate::constants::DEFAULT_VOLUME_PERSIST_DEBOUNCE_MS);
        Duration::from_millis(ms)
    }

    /// Cancels any in-flight persist timer for `target` and starts a fresh
    /// one, so only the last change in a debounce window actually hits disk.
    /// A no-op unless `volume.restore_last_volume` is set.
    async fn schedule_persist(self: &Arc<Self>, target: &str) {
        if !self.restore_last_volume_enabled().await {
            return;
        }

        let debounce = self.debounce().await;
        let mut pending = self.pending.lock().await;

        if let Some(existing) = pending.remove(target) {
            existing.handle.abort();
        }

        let this = Arc::clone(self);
        let target = target.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(e) = this.persist(&target).await {
                tracing::warn!(target = %target, error = %e, "failed to persist volume");
            }
        });

        pending.insert(target, PendingPersist { handle });
    }

    async fn persist(&self, target: &str) -> MiloResult<()> {
        let state = self.get(target).await;
        self.settings
            .set(
                &format!("volume.targets.{target}"),
                json!({ "levelDb": state.level_db, "muted": state.muted }),
            )
            .await
            .map_err(|e| MiloError::Persistence(format!("persisting volume for {target}: {e}")))
    }
}

/// Test-only actuator that records every call instead of touching real
/// hardware or a transport process.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::{MiloResult, VolumeActuator};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct FakeVolumeActuator {
        pub calls: Mutex<Vec<(String, u8)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl VolumeActuator for FakeVolumeActuator {
        async fn apply(&self, target: &str, pct: u8) -> MiloResult<()> {
            if self.fail {
                return Err(crate::error::MiloError::ServiceControl("fake failure".into()));
            }
            self.calls.lock().push((target.to_string(), pct));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeVolumeActuator;
    use super::*;
    use crate::events::NoopEventEmitter;
    use std::time::Duration as StdDuration;

    async fn controller() -> Arc<VolumeController> {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        VolumeController::new(
            settings,
            Arc::new(NoopEventEmitter),
            Arc::new(FakeVolumeActuator::default()),
            Arc::new(FakeVolumeActuator::default()),
        )
    }

    #[test]
    fn db_to_pct_is_monotonic_and_bounded() {
        use crate::constants::{DEFAULT_VOLUME_MAX_DB as MAX_DB, DEFAULT_VOLUME_MIN_DB as MIN_DB};
        assert_eq!(db_to_pct(MIN_DB, MIN_DB, MAX_DB), 0);
        assert_eq!(db_to_pct(MAX_DB, MIN_DB, MAX_DB), 100);
        assert!(db_to_pct(-30.0, MIN_DB, MAX_DB) > db_to_pct(MIN_DB, MIN_DB, MAX_DB));
        assert!(db_to_pct(-30.0, MIN_DB, MAX_DB) < db_to_pct(MAX_DB, MIN_DB, MAX_DB));
    }

    #[tokio::test]
    async fn set_level_clamps_to_valid_range() {
        let ctrl = controller().await;
        let (min_db, max_db) = ctrl.limits().await;

        ctrl.set_level("local", 10.0).await.unwrap();
        assert_eq!(ctrl.get("local").await.level_db, max_db);

        ctrl.set_level("local", -200.0).await.unwrap();
        assert_eq!(ctrl.get("local").await.level_db, min_db);
    }

    #[tokio::test]
    async fn bump_adjusts_relative_to_current_level() {
        let ctrl = controller().await;
        ctrl.set_level("local", -20.0).await.unwrap();
        ctrl.bump("local", 5.0).await.unwrap();
        assert_eq!(ctrl.get("local").await.level_db, -15.0);
    }

    #[tokio::test]
    async fn limits_reports_the_shared_clamp_range() {
        let ctrl = controller().await;
        assert_eq!(
            ctrl.limits().await,
            (crate::constants::DEFAULT_VOLUME_MIN_DB, crate::constants::DEFAULT_VOLUME_MAX_DB)
        );
    }

    #[tokio::test]
    async fn limits_reflect_overridden_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        settings.set("volume.min_db", json!(-40.0)).await.unwrap();
        settings.set("volume.max_db", json!(-5.0)).await.unwrap();
        let ctrl = VolumeController::new(
            settings,
            Arc::new(NoopEventEmitter),
            Arc::new(FakeVolumeActuator::default()),
            Arc::new(FakeVolumeActuator::default()),
        );

        assert_eq!(ctrl.limits().await, (-40.0, -5.0));

        ctrl.set_level("local", 10.0).await.unwrap();
        assert_eq!(ctrl.get("local").await.level_db, -5.0);
    }

    #[tokio::test]
    async fn set_muted_preserves_level_and_zeroes_the_actuator() {
        let ctrl = controller().await;
        ctrl.set_level("local", -10.0).await.unwrap();
        ctrl.set_muted("local", true).await.unwrap();
        let state = ctrl.get("local").await;
        assert!(state.muted);
        assert_eq!(state.level_db, -10.0);
    }

    #[tokio::test]
    async fn remote_target_is_routed_to_the_remote_actuator() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        let local = Arc::new(FakeVolumeActuator::default());
        let remote = Arc::new(FakeVolumeActuator::default());
        let ctrl = VolumeController::new(
            settings,
            Arc::new(NoopEventEmitter),
            Arc::clone(&local) as Arc<dyn VolumeActuator>,
            Arc::clone(&remote) as Arc<dyn VolumeActuator>,
        );

        ctrl.set_level("group-1", -10.0).await.unwrap();
        assert!(local.calls.lock().is_empty());
        assert_eq!(remote.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn actuator_failure_prevents_state_update_and_emit() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        let failing = Arc::new(FakeVolumeActuator { fail: true, ..Default::default() });
        let ctrl = VolumeController::new(
            settings,
            Arc::new(NoopEventEmitter),
            failing,
            Arc::new(FakeVolumeActuator::default()),
        );

        let result = ctrl.set_level("local", -10.0).await;
        assert!(result.is_err());
        let (_, max_db) = ctrl.limits().await;
        assert_eq!(ctrl.get("local").await.level_db, max_db);
    }

    #[tokio::test]
    async fn persistence_is_skipped_when_restore_last_volume_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        settings.set("volume.restore_last_volume", json!(false)).await.unwrap();
        let ctrl = VolumeController::new(
            Arc::clone(&settings),
            Arc::new(NoopEventEmitter),
            Arc::new(FakeVolumeActuator::default()),
            Arc::new(FakeVolumeActuator::default()),
        );

        ctrl.set_level("local", -10.0).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert_eq!(settings.get("volume.targets.local").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_coalesce_into_one_persisted_value() {
        let ctrl = controller().await;
        for level in [-10.0, -20.0, -30.0] {
            ctrl.set_level("local", level).await.unwrap();
        }
        tokio::time::advance(StdDuration::from_millis(600)).await;
        tokio::task::yield_now().await;

        let persisted = ctrl
            .settings
            .get("volume.targets.local")
            .await
            .expect("expected persisted value");
        assert_eq!(persisted["levelDb"], json!(-30.0));
    }
}
