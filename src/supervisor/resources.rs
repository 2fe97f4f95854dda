//! CPU and memory sampling for supervised processes and the gateway itself.

use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::broadcast;

use crate::config::SupervisorConfig;
use crate::observability::metrics;
use crate::storage::{best_effort, unix_millis, SharedStore};
use crate::supervisor::manager::ServiceManager;

/// Name the gateway's own process is reported under.
pub const GATEWAY_PROCESS: &str = "guardian";

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSample {
    pub service: String,
    pub pid: u32,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub at_ms: u64,
}

pub struct ResourceSampler {
    services: ServiceManager,
    store: SharedStore,
    system: System,
    own_pid: Option<Pid>,
    interval: Duration,
    persist_interval: Duration,
    ttl: Duration,
    last_persist: Option<Instant>,
}

impl ResourceSampler {
    pub fn new(services: ServiceManager, store: SharedStore, config: &SupervisorConfig) -> Self {
        Self {
            services,
            store,
            system: System::new(),
            own_pid: sysinfo::get_current_pid().ok(),
            interval: Duration::from_secs(config.sample_interval_secs.max(1)),
            persist_interval: Duration::from_secs(config.persist_interval_secs),
            ttl: Duration::from_secs(config.metrics_ttl_secs),
            last_persist: None,
        }
    }

    /// Query every live pid once. Processes that vanished are skipped.
    pub fn sample(&mut self) -> Vec<ResourceSample> {
        let mut targets = self.services.pids();
        if let Some(pid) = self.own_pid {
            targets.push((GATEWAY_PROCESS.to_string(), pid.as_u32()));
        }

        let pids: Vec<Pid> = targets.iter().map(|(_, pid)| Pid::from_u32(*pid)).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        let at_ms = unix_millis();
        targets
            .into_iter()
            .filter_map(|(service, pid)| {
                let process = self.system.process(Pid::from_u32(pid))?;
                Some(ResourceSample {
                    service,
                    pid,
                    cpu_percent: process.cpu_usage(),
                    memory_bytes: process.memory(),
                    at_ms,
                })
            })
            .collect()
    }

    /// Push samples into runtime state and gauges; persist at most once per
    /// persist interval.
    pub fn publish(&mut self, samples: &[ResourceSample]) {
        for sample in samples {
            self.services
                .update_resources(&sample.service, sample.cpu_percent, sample.memory_bytes);
            metrics::record_resources(&sample.service, sample.cpu_percent, sample.memory_bytes);
        }

        let due = self
            .last_persist
            .map_or(true, |at| at.elapsed() >= self.persist_interval);
        if !due {
            return;
        }
        self.last_persist = Some(Instant::now());

        for sample in samples {
            let key = format!("metrics:{}:{:013}", sample.service, sample.at_ms);
            if let Ok(value) = serde_json::to_value(sample) {
                best_effort("persist resource sample", self.store.set(&key, value, Some(self.ttl)));
            }
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Resource sampler starting");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let samples = self.sample();
                    self.publish(&samples);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Resource sampler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
