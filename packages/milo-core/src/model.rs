//! Shared data model: the entities every component reasons about.
//!
//! These types cross component boundaries (state machine, routing, events,
//! plugins) so they live here rather than inside any one component's module.

use serde::{Deserialize, Serialize};

/// Identifies which plugin, if any, currently owns the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    None,
    Spotify,
    Bluetooth,
    Lan,
    Radio,
    Podcast,
}

impl AudioSource {
    /// Lowercase identifier used in ALSA device names and routing keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Spotify => "spotify",
            Self::Bluetooth => "bluetooth",
            Self::Lan => "roc",
            Self::Radio => "radio",
            Self::Podcast => "podcast",
        }
    }

    /// Identifier used in this source's systemd unit name, distinct from the
    /// ALSA device identifier (the LAN receiver's unit is `milo-lan.service`
    /// even though its ALSA devices are named `milo_roc_*`).
    #[must_use]
    pub fn plugin_id(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Spotify => "spotify",
            Self::Bluetooth => "bluetooth",
            Self::Lan => "lan",
            Self::Radio => "radio",
            Self::Podcast => "podcast",
        }
    }

    /// Primary systemd unit name for this source's plugin daemon.
    #[must_use]
    pub fn unit_name(self) -> String {
        format!("milo-{}.service", self.plugin_id())
    }
}

impl std::fmt::Display for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single plugin.
///
/// `Inactive -> Starting -> Ready -> Connected -> Ready -> Stopping -> Inactive`,
/// with any state able to transition to `Error` (then `Stopping -> Inactive`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Inactive,
    Starting,
    Ready,
    Connected,
    Error,
    Stopping,
}

/// Output route: local amplifier vs a per-source loopback capture multiplexed
/// by a separate multiroom transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Direct,
    Multiroom,
}

/// Current ALSA routing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingState {
    pub mode: RoutingMode,
    pub equalizer: bool,
}

impl RoutingState {
    #[must_use]
    pub fn device_suffix(&self) -> &'static str {
        match (self.mode, self.equalizer) {
            (RoutingMode::Direct, false) => "direct",
            (RoutingMode::Direct, true) => "direct_eq",
            (RoutingMode::Multiroom, false) => "multiroom",
            (RoutingMode::Multiroom, true) => "multiroom_eq",
        }
    }

    /// The logical ALSA device name for a given source under this configuration.
    #[must_use]
    pub fn device_name(&self, source: AudioSource) -> String {
        format!("milo_{}_{}", source.as_str(), self.device_suffix())
    }
}

impl Default for RoutingState {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Direct,
            equalizer: false,
        }
    }
}

/// Process-wide snapshot of the active source and its lifecycle state.
///
/// Owned exclusively by the state machine (C7); every field here is
/// read-only outside of it. `snapshot()` hands out a clone, never a
/// reference, so callers never hold a lock across an await point.
#[derive(Debug, Clone, Serialize)]
pub struct SystemAudioState {
    pub active_source: AudioSource,
    pub plugin_state: PluginState,
    pub transitioning: bool,
    /// Opaque per-plugin payload, flattened to JSON at this boundary.
    /// See [`crate::plugins::PluginMetadata`] for the typed form plugins produce.
    pub metadata: serde_json::Value,
    pub routing: RoutingState,
}

impl Default for SystemAudioState {
    fn default() -> Self {
        Self {
            active_source: AudioSource::None,
            plugin_state: PluginState::Inactive,
            transitioning: false,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            routing: RoutingState::default(),
        }
    }
}

/// Authoritative dB-domain volume for one logical target ("local" or a
/// transport-client identifier).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeState {
    pub level_db: f64,
    pub muted: bool,
}

/// Per-episode resume state (C9).
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PodcastProgress {
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub completed: bool,
    pub updated_at: u64,
}

impl PodcastProgress {
    /// Applies a new position reading, recomputing the completion invariant:
    /// `completed <=> duration - position <= COMPLETION_THRESHOLD`. On
    /// completion, position resets to 0 so a later replay starts over.
    pub fn update(&mut self, position_seconds: f64, duration_seconds: f64, now_ms: u64) {
        self.duration_seconds = duration_seconds;
        let remaining = duration_seconds - position_seconds;
        if remaining <= crate::constants::PODCAST_COMPLETION_THRESHOLD_SECS {
            self.completed = true;
            self.position_seconds = 0.0;
        } else {
            self.completed = false;
            self.position_seconds = position_seconds;
        }
        self.updated_at = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_name_differs_from_alsa_identifier_for_lan() {
        assert_eq!(AudioSource::Lan.as_str(), "roc");
        assert_eq!(AudioSource::Lan.unit_name(), "milo-lan.service");
    }

    #[test]
    fn device_name_reflects_mode_and_eq() {
        let direct = RoutingState {
            mode: RoutingMode::Direct,
            equalizer: false,
        };
        assert_eq!(direct.device_name(AudioSource::Spotify), "milo_spotify_direct");

        let multiroom_eq = RoutingState {
            mode: RoutingMode::Multiroom,
            equalizer: true,
        };
        assert_eq!(
            multiroom_eq.device_name(AudioSource::Lan),
            "milo_roc_multiroom_eq"
        );
    }

    #[test]
    fn progress_marks_completed_near_end() {
        let mut p = PodcastProgress {
            position_seconds: 0.0,
            duration_seconds: 0.0,
            completed: false,
            updated_at: 0,
        };
        p.update(1797.0, 1800.0, 42);
        assert!(p.completed);
        assert_eq!(p.position_seconds, 0.0);
    }

    #[test]
    fn progress_stays_open_with_headroom() {
        let mut p = PodcastProgress {
            position_seconds: 0.0,
            duration_seconds: 0.0,
            completed: false,
            updated_at: 0,
        };
        p.update(123.0, 1800.0, 42);
        assert!(!p.completed);
        assert_eq!(p.position_seconds, 123.0);
    }
}
