//! Readiness probes used by concrete plugins, abstracted behind a trait so
//! plugin lifecycle logic can be tested without real sockets/HTTP/systemd.

use async_trait::async_trait;

/// A plugin-specific check for whether its backing service is not only
/// `active` but actually usable.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// Ready once an HTTP `GET` to `url` returns 200, used by the Spotify plugin.
pub struct HttpReadinessProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpReadinessProbe {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn is_ready(&self) -> bool {
        matches!(self.client.get(&self.url).send().await, Ok(resp) if resp.status().is_success())
    }
}

/// Ready once every listed systemd unit reports `active`, used by Bluetooth
/// (daemon + player pair).
pub struct UnitsActiveProbe {
    supervisor: std::sync::Arc<dyn crate::supervisor::ServiceSupervisor>,
    units: Vec<String>,
}

impl UnitsActiveProbe {
    #[must_use]
    pub fn new(
        supervisor: std::sync::Arc<dyn crate::supervisor::ServiceSupervisor>,
        units: Vec<String>,
    ) -> Self {
        Self { supervisor, units }
    }
}

#[async_trait]
impl ReadinessProbe for UnitsActiveProbe {
    async fn is_ready(&self) -> bool {
        for unit in &self.units {
            match self.supervisor.state(unit).await {
                Ok(crate::supervisor::UnitState::Active) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Ready once a Unix domain socket can be connected to, used by Radio and
/// Podcast (both front a local media-player IPC socket).
pub struct SocketReadinessProbe {
    path: std::path::PathBuf,
}

impl SocketReadinessProbe {
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReadinessProbe for SocketReadinessProbe {
    #[cfg(unix)]
    async fn is_ready(&self) -> bool {
        tokio::net::UnixStream::connect(&self.path).await.is_ok()
    }

    #[cfg(not(unix))]
    async fn is_ready(&self) -> bool {
        false
    }
}

/// Ready once a packet has been observed within a window, or the unit has
/// simply been active long enough, used by the LAN receiver. The packet
/// timestamp is updated externally by the packet-receiver process; this
/// probe only reasons about those two readiness conditions.
pub struct LanReadinessProbe {
    supervisor: std::sync::Arc<dyn crate::supervisor::ServiceSupervisor>,
    unit: String,
    activated_at: std::sync::Arc<parking_lot::Mutex<Option<std::time::Instant>>>,
    last_packet_at: std::sync::Arc<parking_lot::Mutex<Option<std::time::Instant>>>,
}

impl LanReadinessProbe {
    #[must_use]
    pub fn new(
        supervisor: std::sync::Arc<dyn crate::supervisor::ServiceSupervisor>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            supervisor,
            unit: unit.into(),
            activated_at: std::sync::Arc::new(parking_lot::Mutex::new(None)),
            last_packet_at: std::sync::Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Called by the packet receiver whenever a frame arrives.
    pub fn record_packet(&self) {
        *self.last_packet_at.lock() = Some(std::time::Instant::now());
    }
}

#[async_trait]
impl ReadinessProbe for LanReadinessProbe {
    async fn is_ready(&self) -> bool {
        if !matches!(
            self.supervisor.state(&self.unit).await,
            Ok(crate::supervisor::UnitState::Active)
        ) {
            return false;
        }

        let mut activated = self.activated_at.lock();
        if activated.is_none() {
            *activated = Some(std::time::Instant::now());
        }
        let activated_elapsed = activated.expect("just set").elapsed();
        drop(activated);

        let packet_recent = self
            .last_packet_at
            .lock()
            .map(|t| t.elapsed() <= std::time::Duration::from_secs(crate::constants::LAN_PACKET_READINESS_WINDOW_SECS))
            .unwrap_or(false);

        packet_recent
            || activated_elapsed >= std::time::Duration::from_secs(crate::constants::LAN_ACTIVE_READINESS_FLOOR_SECS)
    }
}

#[cfg(test)]
pub mod fake {
    use super::ReadinessProbe;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct FakeProbe {
        pub ready: AtomicBool,
    }

    impl FakeProbe {
        pub fn new(ready: bool) -> Self {
            Self {
                ready: AtomicBool::new(ready),
            }
        }

        pub fn set_ready(&self, ready: bool) {
            self.ready.store(ready, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ReadinessProbe for FakeProbe {
        async fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }
}
