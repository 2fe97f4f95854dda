//! Runtime state of a supervised service.

use serde::Serialize;

/// Lifecycle position of a service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ServiceStatus {
    /// A process exists or is being brought up.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ServiceStatus::Starting | ServiceStatus::Running | ServiceStatus::Stopping
        )
    }
}

/// Live view of one process.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRuntime {
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub started_at_ms: Option<u64>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub healthy: bool,
    pub consecutive_probe_failures: u32,
}

impl Default for ServiceRuntime {
    fn default() -> Self {
        Self {
            status: ServiceStatus::Stopped,
            pid: None,
            started_at_ms: None,
            restart_count: 0,
            last_exit_code: None,
            cpu_percent: 0.0,
            memory_bytes: 0,
            healthy: true,
            consecutive_probe_failures: 0,
        }
    }
}

impl ServiceRuntime {
    /// Clear per-process fields after the process went away.
    pub(crate) fn clear_process(&mut self) {
        self.pid = None;
        self.cpu_percent = 0.0;
        self.memory_bytes = 0;
    }
}

/// Snapshot handed to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub internal_port: u16,
    pub auto_restart: bool,
    #[serde(flatten)]
    pub runtime: ServiceRuntime,
}
