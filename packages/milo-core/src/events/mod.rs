//! Event schema for real-time client communication.
//!
//! This module defines the [`Event`] envelope pushed to subscribers over the
//! WebSocket boundary. The actual fan-out/backpressure mechanics live in
//! [`broadcaster`]; domain services emit through the [`EventEmitter`] trait
//! so they stay decoupled from transport.

mod broadcaster;
mod emitter;

pub use broadcaster::{Broadcaster, CloseReason, Subscriber, SubscriberId};
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::model::AudioSource;
use crate::utils::now_millis;

/// The six event categories named in the data model. `plugin` and `volume`
/// are droppable under backpressure; `system` and `routing` are not (see
/// [`broadcaster`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Plugin,
    System,
    Routing,
    Volume,
    Dsp,
    Podcast,
}

impl EventCategory {
    /// Whether the broadcaster may drop the oldest queued event of this
    /// category under backpressure, rather than closing the subscriber.
    #[must_use]
    pub fn is_droppable(self) -> bool {
        matches!(self, Self::Plugin | Self::Volume)
    }
}

/// An event delivered to subscribers, in publish order per subscriber.
///
/// `seq` is assigned by the broadcaster at publish time under a single
/// mutex (see [`broadcaster::Broadcaster`]); `ts` is a wall-clock stamp for
/// display purposes only and carries no ordering guarantee.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub category: EventCategory,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<AudioSource>,
    pub data: serde_json::Value,
    pub ts: u64,
    /// Per-subscriber monotonic sequence number, stamped in at delivery time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl Event {
    /// Builds an event with the current wall-clock timestamp and no sequence
    /// number assigned yet (the broadcaster stamps `seq` at publish time).
    #[must_use]
    pub fn new(
        category: EventCategory,
        kind: impl Into<String>,
        source: Option<AudioSource>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            category,
            kind: kind.into(),
            source,
            data,
            ts: now_millis(),
            seq: None,
        }
    }

    pub fn system(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(EventCategory::System, kind, None, data)
    }

    pub fn plugin(kind: impl Into<String>, source: AudioSource, data: serde_json::Value) -> Self {
        Self::new(EventCategory::Plugin, kind, Some(source), data)
    }

    pub fn routing(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(EventCategory::Routing, kind, None, data)
    }

    pub fn volume(kind: impl Into<String>, target_id: &str, data: serde_json::Value) -> Self {
        let mut data = data;
        if let serde_json::Value::Object(ref mut map) = data {
            map.insert("targetId".into(), serde_json::Value::String(target_id.into()));
        }
        Self::new(EventCategory::Volume, kind, None, data)
    }

    pub fn dsp(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(EventCategory::Dsp, kind, None, data)
    }

    pub fn podcast(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(EventCategory::Podcast, kind, Some(AudioSource::Podcast), data)
    }
}
