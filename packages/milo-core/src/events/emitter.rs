//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! broadcaster, which keeps them testable and lets alternative transports be
//! substituted without touching domain code.

use super::Event;

/// One method per category, mirroring [`super::EventCategory`].
pub trait EventEmitter: Send + Sync {
    fn emit_plugin(&self, event: Event);
    fn emit_system(&self, event: Event);
    fn emit_routing(&self, event: Event);
    fn emit_volume(&self, event: Event);
    fn emit_dsp(&self, event: Event);
    fn emit_podcast(&self, event: Event);
}

/// Discards every event. Useful for tests and embedding contexts where no
/// transport is wired up.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_plugin(&self, _event: Event) {}
    fn emit_system(&self, _event: Event) {}
    fn emit_routing(&self, _event: Event) {}
    fn emit_volume(&self, _event: Event) {}
    fn emit_dsp(&self, _event: Event) {}
    fn emit_podcast(&self, _event: Event) {}
}

/// Logs every event at debug level instead of delivering it anywhere.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_plugin(&self, event: Event) {
        tracing::debug!(?event, "plugin_event");
    }
    fn emit_system(&self, event: Event) {
        tracing::debug!(?event, "system_event");
    }
    fn emit_routing(&self, event: Event) {
        tracing::debug!(?event, "routing_event");
    }
    fn emit_volume(&self, event: Event) {
        tracing::debug!(?event, "volume_event");
    }
    fn emit_dsp(&self, event: Event) {
        tracing::debug!(?event, "dsp_event");
    }
    fn emit_podcast(&self, event: Event) {
        tracing::debug!(?event, "podcast_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AudioSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts events per category without caring about payload contents.
    struct CountingEventEmitter {
        plugin_count: AtomicUsize,
        system_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                plugin_count: AtomicUsize::new(0),
                system_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_plugin(&self, _event: Event) {
            self.plugin_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_system(&self, _event: Event) {
            self.system_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_routing(&self, _event: Event) {}
        fn emit_volume(&self, _event: Event) {}
        fn emit_dsp(&self, _event: Event) {}
        fn emit_podcast(&self, _event: Event) {}
    }

    #[test]
    fn counting_emitter_tracks_events_per_category() {
        let emitter = CountingEventEmitter::new();

        emitter.emit_plugin(Event::plugin(
            "plugin.state_changed",
            AudioSource::Spotify,
            serde_json::json!({}),
        ));
        emitter.emit_system(Event::system("system.transition_started", serde_json::json!({})));
        emitter.emit_system(Event::system("system.transition_finished", serde_json::json!({})));

        assert_eq!(emitter.plugin_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.system_count.load(Ordering::SeqCst), 2);
    }
}
