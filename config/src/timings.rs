use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

/// Every interval, budget and timeout the session uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub join_interval_secs: u64,
    pub join_budget_secs: u64,
    pub overlay_probe_ms: u64,
    pub name_probe_ms: u64,
    pub join_probe_ms: u64,
    pub admission_timeout_secs: u64,
    pub waiting_probe_ms: u64,
    pub auth_poll_secs: u64,
    pub settle_secs: u64,
    pub discovery_interval_secs: u64,
    pub chunk_interval_ms: u64,
    pub presence_interval_secs: u64,
    pub presence_grace_secs: u64,
    pub presence_exit_delay_secs: u64,
    pub drain_secs: u64,
    pub leave_probe_ms: u64,
    pub leave_signal_secs: u64,
    pub browser_close_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            join_interval_secs: 2,
            join_budget_secs: 60,
            overlay_probe_ms: 500,
            name_probe_ms: 1000,
            join_probe_ms: 2000,
            admission_timeout_secs: 300,
            waiting_probe_ms: 2000,
            auth_poll_secs: 1,
            settle_secs: 5,
            discovery_interval_secs: 3,
            chunk_interval_ms: 1000,
            presence_interval_secs: 3,
            presence_grace_secs: 10,
            presence_exit_delay_secs: 15,
            drain_secs: 2,
            leave_probe_ms: 2000,
            leave_signal_secs: 1,
            browser_close_secs: 10,
        }
    }
}

impl Timings {
    pub fn join_interval(&self) -> Duration {
        Duration::from_secs(self.join_interval_secs)
    }

    /// Wall-clock time the join attempts may take together.
    pub fn join_budget(&self) -> Duration {
        Duration::from_secs(self.join_budget_secs)
    }

    /// Upper bound on join attempts: as many as fit into the join budget, at
    /// least one.
    pub fn join_attempts(&self) -> u64 {
        (self.join_budget_secs / self.join_interval_secs.max(1)).max(1)
    }

    pub fn overlay_probe(&self) -> Duration {
        Duration::from_millis(self.overlay_probe_ms)
    }

    pub fn name_probe(&self) -> Duration {
        Duration::from_millis(self.name_probe_ms)
    }

    pub fn join_probe(&self) -> Duration {
        Duration::from_millis(self.join_probe_ms)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_secs(self.admission_timeout_secs)
    }

    pub fn waiting_probe(&self) -> Duration {
        Duration::from_millis(self.waiting_probe_ms)
    }

    pub fn auth_poll(&self) -> Duration {
        Duration::from_secs(self.auth_poll_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs)
    }

    pub fn presence_grace(&self) -> Duration {
        Duration::from_secs(self.presence_grace_secs)
    }

    pub fn presence_exit_delay(&self) -> Duration {
        Duration::from_secs(self.presence_exit_delay_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }

    pub fn leave_probe(&self) -> Duration {
        Duration::from_millis(self.leave_probe_ms)
    }

    pub fn leave_signal(&self) -> Duration {
        Duration::from_secs(self.leave_signal_secs)
    }

    pub fn browser_close(&self) -> Duration {
        Duration::from_secs(self.browser_close_secs)
    }
}
