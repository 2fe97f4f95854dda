//! Service process manager.
//!
//! # Responsibilities
//! - Spawn supervised services with their environment and `PORT`
//! - Capture stdout/stderr into a ring buffer, storage and subscribers
//! - Restart crashed services after a fixed delay
//! - Stop services with SIGTERM, then kill after a grace period
//!
//! # Design Decisions
//! - Every spawn bumps a generation counter; timers and exit watchers carrying
//!   an older generation are ignored
//! - The exit watcher owns the `Child`; everyone else talks to it through a
//!   oneshot stop request and a watch channel signalling exit

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, watch};

use crate::config::{ServiceConfig, SupervisorConfig};
use crate::health::state::{apply_probe, HealthTransition};
use crate::observability::metrics;
use crate::storage::{best_effort, unix_millis, SharedStore};
use crate::supervisor::logs::{LogBuffer, LogLine, LogStream};
use crate::supervisor::service::{ServiceInfo, ServiceRuntime, ServiceStatus};

const LOG_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("service {0} is already running")]
    AlreadyRunning(String),

    #[error("service {0} is not running")]
    NotRunning(String),

    #[error("failed to spawn {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: io::Error,
    },
}

struct ProcessControl {
    stop_tx: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
}

struct ServiceHandle {
    descriptor: ServiceConfig,
    runtime: ServiceRuntime,
    logs: LogBuffer,
    desired_running: bool,
    generation: u64,
    process: Option<ProcessControl>,
}

impl ServiceHandle {
    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.descriptor.name.clone(),
            internal_port: self.descriptor.internal_port,
            auto_restart: self.descriptor.auto_restart,
            runtime: self.runtime.clone(),
        }
    }

    /// Record an unexpected end of the current process. Returns whether a
    /// restart should be scheduled.
    fn crash(&mut self, exit_code: Option<i32>) -> bool {
        self.process = None;
        self.runtime.clear_process();
        self.runtime.last_exit_code = exit_code;
        self.runtime.status = ServiceStatus::Crashed;
        self.descriptor.auto_restart
    }
}

struct Inner {
    services: DashMap<String, ServiceHandle>,
    config: SupervisorConfig,
    store: SharedStore,
    log_tx: broadcast::Sender<LogLine>,
    log_seq: AtomicU64,
}

/// Supervises every service that has a command configured.
#[derive(Clone)]
pub struct ServiceManager {
    inner: Arc<Inner>,
}

impl ServiceManager {
    pub fn new(services: &[ServiceConfig], config: SupervisorConfig, store: SharedStore) -> Self {
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        let table = DashMap::new();
        for descriptor in services.iter().filter(|s| s.command.is_some()) {
            table.insert(
                descriptor.name.clone(),
                ServiceHandle {
                    descriptor: descriptor.clone(),
                    runtime: ServiceRuntime::default(),
                    logs: LogBuffer::new(config.log_buffer_lines),
                    desired_running: false,
                    generation: 0,
                    process: None,
                },
            );
        }

        Self {
            inner: Arc::new(Inner {
                services: table,
                config,
                store,
                log_tx,
                log_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<ServiceInfo> {
        self.inner.services.get(name).map(|h| h.info())
    }

    /// Every supervised service, sorted by name.
    pub fn get_all(&self) -> Vec<ServiceInfo> {
        let mut all: Vec<ServiceInfo> = self.inner.services.iter().map(|h| h.info()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.services.get(name).map(|h| h.runtime.status)
    }

    /// Supervised and administratively stopped. Unsupervised services are never stopped.
    pub fn is_stopped(&self, name: &str) -> bool {
        self.status(name) == Some(ServiceStatus::Stopped)
    }

    /// Supervised and currently unable to take traffic.
    pub fn is_unavailable(&self, name: &str) -> bool {
        matches!(
            self.status(name),
            Some(ServiceStatus::Starting | ServiceStatus::Crashed)
        )
    }

    /// Recent output of a service, oldest first.
    pub fn logs(&self, name: &str) -> Option<Vec<LogLine>> {
        self.inner.services.get(name).map(|h| h.logs.snapshot())
    }

    /// Live feed of output lines from every service.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.inner.log_tx.subscribe()
    }

    /// Pids of live processes, keyed by service.
    pub fn pids(&self) -> Vec<(String, u32)> {
        self.inner
            .services
            .iter()
            .filter(|h| h.runtime.status.is_active())
            .filter_map(|h| h.runtime.pid.map(|pid| (h.descriptor.name.clone(), pid)))
            .collect()
    }

    /// Health-check targets: running services and their probe path.
    pub fn probe_targets(&self) -> Vec<(String, u16, String)> {
        self.inner
            .services
            .iter()
            .filter(|h| h.runtime.status == ServiceStatus::Running)
            .map(|h| {
                (
                    h.descriptor.name.clone(),
                    h.descriptor.internal_port,
                    h.descriptor.health_path.clone(),
                )
            })
            .collect()
    }

    pub fn update_resources(&self, name: &str, cpu_percent: f32, memory_bytes: u64) {
        if let Some(mut handle) = self.inner.services.get_mut(name) {
            handle.runtime.cpu_percent = cpu_percent;
            handle.runtime.memory_bytes = memory_bytes;
        }
    }

    /// Fold one liveness probe into the service's health. Returns the
    /// resulting health flag.
    pub fn record_probe(&self, name: &str, success: bool, threshold: u32) -> Option<bool> {
        let mut handle = self.inner.services.get_mut(name)?;
        let runtime = &mut handle.runtime;
        match apply_probe(
            &mut runtime.healthy,
            &mut runtime.consecutive_probe_failures,
            success,
            threshold,
        ) {
            HealthTransition::BecameUnhealthy => {
                tracing::warn!(service = %name, failures = runtime.consecutive_probe_failures, "Service marked unhealthy");
            }
            HealthTransition::BecameHealthy => {
                tracing::info!(service = %name, "Service healthy again");
            }
            HealthTransition::Unchanged => {}
        }
        Some(runtime.healthy)
    }

    /// Spawn a service. Returns the new pid.
    pub fn start(&self, name: &str) -> Result<u32, SupervisorError> {
        let (descriptor, generation) = {
            let mut entry = self
                .inner
                .services
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;
            let handle = &mut *entry;
            if handle.runtime.status.is_active() {
                return Err(SupervisorError::AlreadyRunning(name.to_string()));
            }
            handle.desired_running = true;
            handle.generation += 1;
            handle.runtime.status = ServiceStatus::Starting;
            handle.runtime.clear_process();
            (handle.descriptor.clone(), handle.generation)
        };
        self.spawn_process(descriptor, generation)
    }

    /// Stop a service and wait for its process to exit.
    pub async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let mut exited = {
            let mut entry = self
                .inner
                .services
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;
            let handle = &mut *entry;
            handle.desired_running = false;
            match handle.process.as_mut() {
                Some(process) => {
                    handle.runtime.status = ServiceStatus::Stopping;
                    if let Some(stop_tx) = process.stop_tx.take() {
                        let _ = stop_tx.send(());
                    }
                    process.exited.clone()
                }
                None => {
                    let previous = handle.runtime.status;
                    handle.runtime.status = ServiceStatus::Stopped;
                    handle.runtime.clear_process();
                    return if previous == ServiceStatus::Stopped {
                        Err(SupervisorError::NotRunning(name.to_string()))
                    } else {
                        Ok(())
                    };
                }
            }
        };

        tracing::info!(service = %name, "Stopping service");
        let _ = exited.wait_for(|done| *done).await;
        Ok(())
    }

    /// Stop, wait the restart delay, start again.
    pub async fn restart(&self, name: &str) -> Result<u32, SupervisorError> {
        match self.stop(name).await {
            Ok(()) | Err(SupervisorError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        tokio::time::sleep(self.restart_delay()).await;
        if let Some(mut handle) = self.inner.services.get_mut(name) {
            handle.runtime.restart_count += 1;
        }
        metrics::record_restart(name);
        self.start(name)
    }

    pub fn start_all(&self) {
        for name in self.names() {
            match self.start(&name) {
                Ok(pid) => tracing::debug!(service = %name, pid, "Autostarted service"),
                Err(e) => tracing::warn!(service = %name, error = %e, "Failed to start service"),
            }
        }
    }

    pub async fn stop_all(&self) {
        let names = self.names();
        let results = join_all(names.iter().map(|name| self.stop(name))).await;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(()) | Err(SupervisorError::NotRunning(_)) => {}
                Err(e) => tracing::warn!(service = %name, error = %e, "Failed to stop service"),
            }
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.services.iter().map(|h| h.key().clone()).collect();
        names.sort();
        names
    }

    fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.inner.config.restart_delay_ms)
    }

    fn spawn_process(&self, descriptor: ServiceConfig, generation: u64) -> Result<u32, SupervisorError> {
        let name = descriptor.name.clone();
        let spawned = command_for(&descriptor).and_then(|mut command| command.spawn());
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(service = %name, error = %source, "Failed to spawn service");
                let restart = match self.inner.services.get_mut(&name) {
                    Some(mut handle) if handle.generation == generation => handle.crash(None),
                    _ => false,
                };
                if restart {
                    self.schedule_restart(name.clone(), generation);
                }
                return Err(SupervisorError::Spawn {
                    service: name,
                    source,
                });
            }
        };
        let pid = child.id().unwrap_or_default();

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        if let Some(mut entry) = self.inner.services.get_mut(&name) {
            let handle = &mut *entry;
            // A stop that raced this spawn drops `stop_tx`, which terminates the child.
            if handle.generation == generation && handle.desired_running {
                handle.runtime.pid = Some(pid);
                handle.runtime.started_at_ms = Some(unix_millis());
                handle.runtime.last_exit_code = None;
                handle.runtime.healthy = true;
                handle.runtime.consecutive_probe_failures = 0;
                handle.process = Some(ProcessControl {
                    stop_tx: Some(stop_tx),
                    exited: exited_rx,
                });
            }
        }

        if let Some(stdout) = child.stdout.take() {
            self.spawn_log_reader(name.clone(), LogStream::Stdout, stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_log_reader(name.clone(), LogStream::Stderr, stderr);
        }
        tokio::spawn(
            self.clone()
                .watch_process(name.clone(), generation, child, stop_rx, exited_tx),
        );
        self.schedule_ready_check(name.clone(), generation);

        tracing::info!(service = %name, pid, "Service process spawned");
        Ok(pid)
    }

    async fn watch_process(
        self,
        name: String,
        generation: u64,
        mut child: Child,
        stop_rx: oneshot::Receiver<()>,
        exited_tx: watch::Sender<bool>,
    ) {
        let natural = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop_rx => None,
        };
        let status = match natural {
            Some(status) => status,
            None => terminate(&name, &mut child, Duration::from_millis(self.inner.config.stop_grace_ms)).await,
        };
        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "Failed to collect exit status");
                None
            }
        };

        self.on_exit(&name, generation, exit_code);
        let _ = exited_tx.send(true);
    }

    fn on_exit(&self, name: &str, generation: u64, exit_code: Option<i32>) {
        let restart = {
            let Some(mut handle) = self.inner.services.get_mut(name) else {
                return;
            };
            if handle.generation != generation {
                return;
            }
            if !handle.desired_running {
                handle.process = None;
                handle.runtime.clear_process();
                handle.runtime.last_exit_code = exit_code;
                handle.runtime.status = ServiceStatus::Stopped;
                tracing::info!(service = %name, exit_code = ?exit_code, "Service stopped");
                return;
            }
            tracing::warn!(service = %name, exit_code = ?exit_code, "Service exited unexpectedly");
            handle.crash(exit_code)
        };
        if restart {
            self.schedule_restart(name.to_string(), generation);
        }
    }

    fn schedule_restart(&self, name: String, generation: u64) {
        let manager = self.clone();
        let delay = self.restart_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let Some(mut handle) = manager.inner.services.get_mut(&name) else {
                    return;
                };
                if handle.generation != generation
                    || handle.runtime.status != ServiceStatus::Crashed
                    || !handle.desired_running
                {
                    return;
                }
                handle.runtime.restart_count += 1;
            }
            metrics::record_restart(&name);
            tracing::info!(service = %name, "Restarting crashed service");
            if let Err(e) = manager.start(&name) {
                tracing::warn!(service = %name, error = %e, "Restart failed");
            }
        });
    }

    fn schedule_ready_check(&self, name: String, generation: u64) {
        let manager = self.clone();
        let grace = Duration::from_millis(self.inner.config.ready_grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(mut handle) = manager.inner.services.get_mut(&name) {
                if handle.generation == generation && handle.runtime.status == ServiceStatus::Starting {
                    handle.runtime.status = ServiceStatus::Running;
                    tracing::info!(service = %name, pid = ?handle.runtime.pid, "Service running");
                }
            }
        });
    }

    fn spawn_log_reader<R>(&self, name: String, stream: LogStream, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(&['\r', '\n'][..])
                            .to_string();
                        manager.record_log(&name, stream, line);
                    }
                    Err(e) => {
                        tracing::debug!(service = %name, error = %e, "Output stream closed");
                        break;
                    }
                }
            }
        });
    }

    fn record_log(&self, name: &str, stream: LogStream, line: String) {
        let entry = LogLine {
            service: name.to_string(),
            stream,
            line,
            at_ms: unix_millis(),
        };
        if self.inner.config.persist_logs {
            let seq = self.inner.log_seq.fetch_add(1, Ordering::Relaxed) % 1_000_000;
            let key = format!("logs:{}:{:013}:{:06}", name, entry.at_ms, seq);
            let ttl = Duration::from_secs(self.inner.config.log_ttl_secs);
            if let Ok(value) = serde_json::to_value(&entry) {
                best_effort("persist log line", self.inner.store.set(&key, value, Some(ttl)));
            }
        }

        if let Some(mut handle) = self.inner.services.get_mut(name) {
            handle.logs.push(entry.clone());
        }
        // No subscribers is fine.
        let _ = self.inner.log_tx.send(entry);
    }
}

fn command_for(descriptor: &ServiceConfig) -> io::Result<Command> {
    let program = descriptor
        .command
        .as_deref()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no command configured"))?;

    let mut command = Command::new(program);
    command
        .args(&descriptor.args)
        .env("PORT", descriptor.internal_port.to_string())
        .envs(&descriptor.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    if let Some(dir) = &descriptor.working_dir {
        command.current_dir(dir);
    }
    Ok(command)
}

/// SIGTERM, then SIGKILL once `grace` runs out.
async fn terminate(name: &str, child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                        return status;
                    }
                    tracing::warn!(service = %name, pid, "Service ignored SIGTERM, killing");
                }
                Err(e) => tracing::warn!(service = %name, pid, error = %e, "Failed to send SIGTERM"),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::warn!(service = %name, error = %e, "Failed to kill service");
    }
    child.wait().await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::storage::{ListOptions, MemoryStore, Store};
    use std::time::Instant;

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            restart_delay_ms: 100,
            ready_grace_ms: 100,
            stop_grace_ms: 300,
            log_buffer_lines: 50,
            ..SupervisorConfig::default()
        }
    }

    fn manager_with(services: Vec<ServiceConfig>) -> (ServiceManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(None));
        let manager = ServiceManager::new(&services, fast_config(), store.clone());
        (manager, store)
    }

    async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn sigkill(pid: u32) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    }

    #[tokio::test]
    async fn start_moves_through_starting_to_running() {
        let (manager, _) = manager_with(vec![ServiceConfig::supervised("sleeper", "sleep", &["30"], 4501)]);

        assert!(manager.is_stopped("sleeper"));
        let pid = manager.start("sleeper").unwrap();
        assert!(pid > 0);
        assert_eq!(manager.status("sleeper"), Some(ServiceStatus::Starting));
        assert!(matches!(manager.start("sleeper"), Err(SupervisorError::AlreadyRunning(_))));

        assert!(eventually(|| manager.status("sleeper") == Some(ServiceStatus::Running)).await);
        assert_eq!(manager.get("sleeper").unwrap().runtime.pid, Some(pid));
        assert_eq!(manager.pids(), vec![("sleeper".to_string(), pid)]);

        manager.stop("sleeper").await.unwrap();
        let info = manager.get("sleeper").unwrap();
        assert_eq!(info.runtime.status, ServiceStatus::Stopped);
        assert_eq!(info.runtime.pid, None);
        assert_eq!(info.runtime.restart_count, 0);
        assert!(matches!(manager.stop("sleeper").await, Err(SupervisorError::NotRunning(_))));
    }

    #[tokio::test]
    async fn crashed_service_is_restarted_once_per_crash() {
        let (manager, _) = manager_with(vec![ServiceConfig::supervised("sleeper", "sleep", &["30"], 4502)]);
        let first_pid = manager.start("sleeper").unwrap();
        assert!(eventually(|| manager.status("sleeper") == Some(ServiceStatus::Running)).await);

        sigkill(first_pid);

        assert!(
            eventually(|| {
                let info = manager.get("sleeper").unwrap();
                info.runtime.status == ServiceStatus::Running
                    && info.runtime.pid.is_some_and(|pid| pid != first_pid)
            })
            .await
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(manager.get("sleeper").unwrap().runtime.restart_count, 1);

        manager.stop_all().await;
        assert!(manager.is_stopped("sleeper"));
    }

    #[tokio::test]
    async fn crash_without_auto_restart_stays_crashed() {
        let mut descriptor = ServiceConfig::supervised("oneshot", "sh", &["-c", "exit 3"], 4503);
        descriptor.auto_restart = false;
        let (manager, _) = manager_with(vec![descriptor]);

        manager.start("oneshot").unwrap();
        assert!(eventually(|| manager.status("oneshot") == Some(ServiceStatus::Crashed)).await);
        let info = manager.get("oneshot").unwrap();
        assert_eq!(info.runtime.last_exit_code, Some(3));
        assert!(manager.is_unavailable("oneshot"));

        // A crashed service can be started again by hand.
        manager.start("oneshot").unwrap();
    }

    #[tokio::test]
    async fn captures_output_with_port_and_env() {
        let mut descriptor = ServiceConfig::supervised(
            "talker",
            "sh",
            &["-c", "echo port=$PORT; echo greeting=$GREETING; echo oops >&2; exec sleep 30"],
            4504,
        );
        descriptor.env.insert("GREETING".into(), "hello".into());
        let (manager, store) = manager_with(vec![descriptor]);
        let mut feed = manager.subscribe_logs();

        manager.start("talker").unwrap();
        assert!(eventually(|| manager.logs("talker").unwrap().len() == 3).await);

        let logs = manager.logs("talker").unwrap();
        assert!(logs.iter().any(|l| l.line == "port=4504" && l.stream == LogStream::Stdout));
        assert!(logs.iter().any(|l| l.line == "greeting=hello"));
        assert!(logs.iter().any(|l| l.line == "oops" && l.stream == LogStream::Stderr));

        let first = feed.recv().await.unwrap();
        assert_eq!(first.service, "talker");

        let persisted = store.list("logs:talker:", ListOptions::default()).unwrap();
        assert_eq!(persisted.len(), 3);

        manager.stop("talker").await.unwrap();
    }

    #[tokio::test]
    async fn stop_escalates_to_kill() {
        let (manager, _) = manager_with(vec![ServiceConfig::supervised(
            "stubborn",
            "sh",
            &["-c", "trap '' TERM; exec sleep 30"],
            4505,
        )]);
        manager.start("stubborn").unwrap();
        assert!(eventually(|| manager.status("stubborn") == Some(ServiceStatus::Running)).await);

        let started = Instant::now();
        manager.stop("stubborn").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(manager.status("stubborn"), Some(ServiceStatus::Stopped));
    }

    #[tokio::test]
    async fn restart_counts_and_replaces_process() {
        let (manager, _) = manager_with(vec![ServiceConfig::supervised("sleeper", "sleep", &["30"], 4506)]);
        let first = manager.start("sleeper").unwrap();

        let second = manager.restart("sleeper").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.get("sleeper").unwrap().runtime.restart_count, 1);

        manager.stop("sleeper").await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_marks_crashed() {
        let mut descriptor = ServiceConfig::supervised("ghost", "/nonexistent/guardian-test-binary", &[], 4507);
        descriptor.auto_restart = false;
        let (manager, _) = manager_with(vec![descriptor]);

        assert!(matches!(manager.start("ghost"), Err(SupervisorError::Spawn { .. })));
        assert_eq!(manager.status("ghost"), Some(ServiceStatus::Crashed));
    }

    #[tokio::test]
    async fn unsupervised_services_are_unknown() {
        let (manager, _) = manager_with(vec![ServiceConfig::external("dashboard", 9002)]);
        assert!(manager.get_all().is_empty());
        assert!(!manager.is_stopped("dashboard"));
        assert!(matches!(manager.start("dashboard"), Err(SupervisorError::UnknownService(_))));
    }

    #[tokio::test]
    async fn probes_flip_health_at_threshold() {
        let (manager, _) = manager_with(vec![ServiceConfig::supervised("sleeper", "sleep", &["30"], 4508)]);
        assert_eq!(manager.record_probe("sleeper", false, 2), Some(true));
        assert_eq!(manager.record_probe("sleeper", false, 2), Some(false));
        assert_eq!(manager.record_probe("sleeper", true, 2), Some(true));
        assert_eq!(manager.record_probe("missing", true, 2), None);
    }
}
