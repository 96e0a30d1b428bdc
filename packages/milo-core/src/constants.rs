//! Fixed protocol and timing constants.
//!
//! Values here are either mandated by an external contract (ALSA device
//! naming, the multiroom transport RPC shape) or are timeouts/capacities
//! called out explicitly in the design. Tunables that an operator might
//! reasonably want to change live in `settings.json` (see [`crate::settings`]),
//! not here.

// ─────────────────────────────────────────────────────────────────────────────
// Transition & Service Control Timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for a source transition to complete (plugin stop + start), seconds.
pub const TRANSITION_TIMEOUT_SECS: u64 = 15;

/// Timeout waiting for a service unit to reach a target state, seconds.
pub const UNIT_WAIT_TIMEOUT_SECS: u64 = 10;

/// Timeout for a plugin's readiness probe, seconds.
pub const PLUGIN_READINESS_TIMEOUT_SECS: u64 = 5;

/// Delay before a single service-control retry, seconds.
pub const SERVICE_CONTROL_RETRY_DELAY_SECS: u64 = 2;

/// Poll interval for the background unit-failure watcher started once a
/// plugin reaches Ready, seconds.
pub const UNIT_FAILURE_POLL_INTERVAL_SECS: u64 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Metadata Coalescing
// ─────────────────────────────────────────────────────────────────────────────

/// Window over which a plugin's metadata updates are collapsed into one
/// `plugin.metadata_changed` event.
pub const METADATA_COALESCE_WINDOW_MS: u64 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Volume
// ─────────────────────────────────────────────────────────────────────────────

/// Default debounce interval for persisting volume changes, milliseconds.
/// Exposed as the `volume.persist_debounce_ms` setting, tunable without a rebuild.
pub const DEFAULT_VOLUME_PERSIST_DEBOUNCE_MS: u64 = 500;

/// Default lower bound of the dB clamp range, seeded into `volume.min_db`.
pub const DEFAULT_VOLUME_MIN_DB: f64 = -60.0;

/// Default upper bound of the dB clamp range, seeded into `volume.max_db`.
pub const DEFAULT_VOLUME_MAX_DB: f64 = 0.0;

/// Whether the last set volume is persisted and restored on restart by
/// default, seeded into `volume.restore_last_volume`.
pub const DEFAULT_RESTORE_LAST_VOLUME: bool = true;

/// Target id reserved for the local amplifier; every other target id is
/// routed to the multiroom transport's volume control instead.
pub const LOCAL_VOLUME_TARGET: &str = "local";

/// ALSA simple-mixer control name driven by the local volume actuator.
pub const ALSA_MIXER_NAME: &str = "Master";

// ─────────────────────────────────────────────────────────────────────────────
// Spotify
// ─────────────────────────────────────────────────────────────────────────────

/// Default auto-disconnect delay after the Spotify daemon reports paused, seconds.
pub const DEFAULT_SPOTIFY_AUTO_DISCONNECT_DELAY_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// LAN Receiver Readiness
// ─────────────────────────────────────────────────────────────────────────────

/// Window in which a first packet must be observed for fast readiness, seconds.
pub const LAN_PACKET_READINESS_WINDOW_SECS: u64 = 5;

/// Minimum time the LAN receiver unit must stay active before we treat it as
/// ready even without having observed a packet.
pub const LAN_ACTIVE_READINESS_FLOOR_SECS: u64 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Podcast Progress
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between persistence ticks for dirty podcast progress entries, seconds.
pub const PODCAST_PERSIST_INTERVAL_SECS: u64 = 10;

/// Resume threshold: only seek on resume if the saved position exceeds this, seconds.
pub const PODCAST_RESUME_MIN_POSITION_SECS: f64 = 10.0;

/// An episode is considered completed once duration minus position is within
/// this many seconds.
pub const PODCAST_COMPLETION_THRESHOLD_SECS: f64 = 5.0;

// ─────────────────────────────────────────────────────────────────────────────
// Event Broadcaster
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of each subscriber's bounded event channel.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier used in the health endpoint response.
pub const SERVICE_ID: &str = "milo-core";

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

/// Name of the env-file consumed by the ALSA device resolver.
pub const ROUTING_ENV_FILE: &str = "routing.env";

/// Service units that must be active while routing is in Multiroom mode.
pub const MULTIROOM_TRANSPORT_UNITS: &[&str] = &["milo-multiroom.service"];

/// Stream id the transport binds every group to once Multiroom is engaged.
pub const MULTIROOM_STREAM_ID: &str = "Multiroom";

/// Default loopback endpoint for the multiroom transport's JSON-RPC control API.
pub const DEFAULT_TRANSPORT_ENDPOINT: &str = "http://127.0.0.1:1780/jsonrpc";

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Daemon Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for the shared HTTP client used for the Spotify status probe and
/// the multiroom transport RPC, seconds.
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 10;

/// Companion unit that plays back a connected Bluetooth source, started and
/// stopped alongside `milo-bluetooth.service`.
pub const BLUETOOTH_PLAYER_UNIT: &str = "milo-bluetooth-player.service";

/// Local status endpoint polled by the Spotify readiness probe.
pub const SPOTIFY_STATUS_URL: &str = "http://127.0.0.1:24879/status";

/// Name of the radio media player's control socket, under the data directory.
pub const RADIO_SOCKET_FILE: &str = "radio.sock";

/// Name of the podcast media player's control socket, under the data directory.
pub const PODCAST_SOCKET_FILE: &str = "podcast.sock";
