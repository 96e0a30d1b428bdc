//! Service-unit lifecycle supervision.
//!
//! Each plugin is backed by a systemd service unit (`milo-spotify.service`,
//! `milo-bluetooth.service`, ...). [`ServiceSupervisor`] is the seam between
//! that process-management reality and the rest of the crate, so tests never
//! have to shell out.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::{SERVICE_CONTROL_RETRY_DELAY_SECS, UNIT_WAIT_TIMEOUT_SECS};
use crate::error::{MiloError, MiloResult};

/// Observed state of a systemd unit, as reported by `systemctl is-active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Activating,
    Inactive,
    Failed,
    Unknown,
}

impl UnitState {
    fn parse(s: &str) -> Self {
        match s.trim() {
            "active" => Self::Active,
            "activating" => Self::Activating,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Controls the lifecycle of a single named service unit.
///
/// Implementations must never block the async runtime: all process spawning
/// goes through `tokio::process::Command`, never `std::process::Command`.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Starts the unit. Idempotent if already active.
    async fn start(&self, unit: &str) -> MiloResult<()>;

    /// Stops the unit. Idempotent if already inactive.
    async fn stop(&self, unit: &str) -> MiloResult<()>;

    /// Restarts the unit.
    async fn restart(&self, unit: &str) -> MiloResult<()>;

    /// Queries current unit state.
    async fn state(&self, unit: &str) -> MiloResult<UnitState>;

    /// Blocks until the unit reaches `target`, or returns a timeout error.
    async fn wait_for(&self, unit: &str, target: UnitState) -> MiloResult<()> {
        let deadline = Duration::from_secs(UNIT_WAIT_TIMEOUT_SECS);
        timeout(deadline, async {
            loop {
                if self.state(unit).await? == target {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
        .await
        .map_err(|_| {
            MiloError::ServiceControl(format!(
                "timed out waiting for {unit} to reach {target:?}"
            ))
        })?
    }
}

/// `systemctl`-backed supervisor for production use.
pub struct SystemdSupervisor {
    /// Whether to pass `--user` to systemctl (useful when the orchestrator
    /// itself runs unprivileged).
    user_mode: bool,
}

impl SystemdSupervisor {
    #[must_use]
    pub fn new(user_mode: bool) -> Self {
        Self { user_mode }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("systemctl");
        if self.user_mode {
            cmd.arg("--user");
        }
        cmd.args(args);
        cmd
    }

    async fn run(&self, args: &[&str]) -> MiloResult<std::process::Output> {
        self.command(args)
            .output()
            .await
            .map_err(|e| MiloError::ServiceControl(format!("spawning systemctl: {e}")))
    }

    /// Runs a systemctl action, retrying once after a short delay on failure.
    async fn run_with_retry(&self, action: &str, unit: &str) -> MiloResult<()> {
        let output = self.run(&[action, unit]).await?;
        if output.status.success() {
            return Ok(());
        }

        tracing::warn!(unit, action, "systemctl action failed, retrying once");
        tokio::time::sleep(Duration::from_secs(SERVICE_CONTROL_RETRY_DELAY_SECS)).await;

        let retry = self.run(&[action, unit]).await?;
        if retry.status.success() {
            return Ok(());
        }

        Err(MiloError::ServiceControl(format!(
            "systemctl {action} {unit} failed: {}",
            String::from_utf8_lossy(&retry.stderr)
        )))
    }
}

#[async_trait]
impl ServiceSupervisor for SystemdSupervisor {
    async fn start(&self, unit: &str) -> MiloResult<()> {
        self.run_with_retry("start", unit).await
    }

    async fn stop(&self, unit: &str) -> MiloResult<()> {
        self.run_with_retry("stop", unit).await
    }

    async fn restart(&self, unit: &str) -> MiloResult<()> {
        self.run_with_retry("restart", unit).await
    }

    async fn state(&self, unit: &str) -> MiloResult<UnitState> {
        // is-active exits non-zero for inactive/failed units; that's expected,
        // not a command failure, so we read stdout regardless of exit code.
        let output = self.run(&["is-active", unit]).await?;
        Ok(UnitState::parse(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// In-memory supervisor for tests: tracks state transitions without
/// touching the system service manager.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::{ServiceSupervisor, UnitState};
    use crate::error::MiloResult;
    use async_trait::async_trait;
    use dashmap::DashMap;

    pub struct FakeSupervisor {
        states: DashMap<String, UnitState>,
        pub fail_starts_for: DashMap<String, ()>,
    }

    impl FakeSupervisor {
        pub fn new() -> Self {
            Self {
                states: DashMap::new(),
                fail_starts_for: DashMap::new(),
            }
        }

        pub fn set_state(&self, unit: &str, state: UnitState) {
            self.states.insert(unit.to_string(), state);
        }
    }

    impl Default for FakeSupervisor {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ServiceSupervisor for FakeSupervisor {
        async fn start(&self, unit: &str) -> MiloResult<()> {
            if self.fail_starts_for.contains_key(unit) {
                return Err(crate::error::MiloError::ServiceControl(format!(
                    "fake failure starting {unit}"
                )));
            }
            self.states.insert(unit.to_string(), UnitState::Active);
            Ok(())
        }

        async fn stop(&self, unit: &str) -> MiloResult<()> {
            self.states.insert(unit.to_string(), UnitState::Inactive);
            Ok(())
        }

        async fn restart(&self, unit: &str) -> MiloResult<()> {
            self.states.insert(unit.to_string(), UnitState::Active);
            Ok(())
        }

        async fn state(&self, unit: &str) -> MiloResult<UnitState> {
            Ok(self
                .states
                .get(unit)
                .map(|s| *s)
                .unwrap_or(UnitState::Inactive))
        }

        async fn wait_for(&self, unit: &str, target: UnitState) -> MiloResult<()> {
            if self.state(unit).await? == target {
                Ok(())
            } else {
                Err(crate::error::MiloError::ServiceControl(format!(
                    "{unit} never reached {target:?} in fake supervisor"
                )))
            }
        }
    }
}
