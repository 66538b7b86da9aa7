//! Process supervisor for the three local AI services.
//!
//! Owns every child process handle the bridge spawns. Starting is idempotent: a service that
//! is already up (container found by name, or a live child handle) is reported as
//! [`Readiness::AlreadyRunning`] without spawning anything.
//!
//! - **store**: vector database stack via `docker-compose up -d` in the workspace root.
//! - **inference**: `run_llama_server.{sh,bat}`, ready on `"server listening"` or after 10s.
//! - **agent**: `run_agent_server.{sh,bat}`, ready on `"Starting VS Code integration server"` or after 15s.

mod launch;
mod platform;

pub use launch::{
    find_stop_script, LaunchSpec, AGENT_READY_MARKER, AGENT_SCRIPT_STEM, COMPOSE_FILE,
    INFERENCE_READY_MARKER, INFERENCE_SCRIPT_STEM, STOP_SCRIPT_STEM,
};
pub use platform::Platform;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use crate::error::StartError;

/// How long to poll for an exit status after a service closes stdout without its marker.
const EARLY_EXIT_GRACE: Duration = Duration::from_millis(250);

/// The three cooperating background services, in startup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceName {
    Store,
    Inference,
    Agent,
}

impl ServiceName {
    /// Dependency order: the agent needs inference, both need the store.
    pub const STARTUP_ORDER: [ServiceName; 3] = [ServiceName::Store, ServiceName::Inference, ServiceName::Agent];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceName::Store => "store",
            ServiceName::Inference => "inference",
            ServiceName::Agent => "agent",
        }
    }

    /// Human-readable name for progress messages.
    pub fn label(self) -> &'static str {
        match self {
            ServiceName::Store => "vector store",
            ServiceName::Inference => "LLM server",
            ServiceName::Agent => "agent server",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// The service signalled readiness (marker seen, or compose exited 0).
    Confirmed,
    /// The startup timeout elapsed first. The service is assumed to still be coming up.
    Assumed,
    /// Nothing was spawned; the service was already up.
    AlreadyRunning,
}

/// Filesystem and tooling parameters for launching services.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub workspace_root: PathBuf,
    pub container_cli: String,
    pub compose_cli: String,
    pub store_container_filter: String,
    pub inference_startup_timeout: Duration,
    pub agent_startup_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            container_cli: "docker".to_string(),
            compose_cli: "docker-compose".to_string(),
            store_container_filter: "weaviate".to_string(),
            inference_startup_timeout: Duration::from_secs(10),
            agent_startup_timeout: Duration::from_secs(15),
        }
    }
}

/// A spawned inference or agent process.
struct ManagedProcess {
    service: ServiceName,
    child: Child,
    pid: Option<u32>,
}

/// Owns the service child processes. One live handle per service at most.
pub struct ProcessSupervisor {
    settings: LaunchSettings,
    platform: Platform,
    processes: Mutex<HashMap<ServiceName, ManagedProcess>>,
    /// Serializes `start` so two callers cannot both miss the running check and spawn.
    start_lock: Mutex<()>,
}

impl ProcessSupervisor {
    pub fn new(settings: LaunchSettings) -> Self {
        Self::with_platform(settings, Platform::detect())
    }

    pub fn with_platform(settings: LaunchSettings, platform: Platform) -> Self {
        Self {
            settings,
            platform,
            processes: Mutex::new(HashMap::new()),
            start_lock: Mutex::new(()),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn workspace_root(&self) -> &Path {
        &self.settings.workspace_root
    }

    /// Store: asks the container runtime. Inference/agent: checks the tracked handle, clearing it
    /// if the process has exited.
    pub async fn is_running(&self, service: ServiceName) -> bool {
        match service {
            ServiceName::Store => self.store_container_running().await,
            _ => self.handle_alive(service).await,
        }
    }

    /// Pid of the tracked process for `service`, if one is live.
    pub async fn pid(&self, service: ServiceName) -> Option<u32> {
        if !self.handle_alive(service).await {
            return None;
        }
        self.processes.lock().await.get(&service).and_then(|p| p.pid)
    }

    async fn store_container_running(&self) -> bool {
        let filter = &self.settings.store_container_filter;
        let output = Command::new(&self.settings.container_cli)
            .args(["ps", "--filter", &format!("name={}", filter), "--format", "{{.Names}}"])
            .output()
            .await;
        match output {
            Ok(out) => out.status.success() && String::from_utf8_lossy(&out.stdout).contains(filter.as_str()),
            Err(e) => {
                tracing::debug!(error = %e, cli = %self.settings.container_cli, "container runtime probe failed");
                false
            }
        }
    }

    async fn handle_alive(&self, service: ServiceName) -> bool {
        let mut processes = self.processes.lock().await;
        let Some(proc) = processes.get_mut(&service) else {
            return false;
        };
        match proc.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(service = %proc.service, code = ?status.code(), "service process exited");
                processes.remove(&service);
                false
            }
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "could not poll service process; dropping handle");
                processes.remove(&service);
                false
            }
        }
    }

    /// Start `service` unless it is already running.
    pub async fn start(&self, service: ServiceName) -> Result<Readiness, StartError> {
        let _guard = self.start_lock.lock().await;

        if self.is_running(service).await {
            tracing::info!(service = %service, "✅ already running");
            return Ok(Readiness::AlreadyRunning);
        }

        let spec = LaunchSpec::resolve(service, &self.settings, self.platform)?;
        match spec {
            LaunchSpec::Compose { compose_file } => self.compose_up(service, &compose_file).await,
            LaunchSpec::Script {
                script,
                ready_marker,
                startup_timeout,
            } => self.spawn_script(service, &script, ready_marker, startup_timeout).await,
        }
    }

    async fn compose_up(&self, service: ServiceName, compose_file: &Path) -> Result<Readiness, StartError> {
        tracing::info!(service = %service, file = %compose_file.display(), "🚀 starting container stack");
        let output = Command::new(&self.settings.compose_cli)
            .args(["up", "-d"])
            .current_dir(&self.settings.workspace_root)
            .output()
            .await
            .map_err(|e| StartError::Spawn {
                service,
                reason: format!("{}: {}", self.settings.compose_cli, e),
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!(service = %service, "{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::debug!(service = %service, "{}", line);
        }

        if output.status.success() {
            tracing::info!(service = %service, "✅ container stack up");
            Ok(Readiness::Confirmed)
        } else {
            Err(StartError::NonZeroExit {
                service,
                code: output.status.code(),
            })
        }
    }

    async fn spawn_script(
        &self,
        service: ServiceName,
        script: &Path,
        ready_marker: &'static str,
        startup_timeout: Duration,
    ) -> Result<Readiness, StartError> {
        self.platform.prepare_script(script)?;

        tracing::info!(service = %service, script = %script.display(), "🚀 launching");
        let mut child = self
            .platform
            .launch_command(script, &self.settings.workspace_root)
            .spawn()
            .map_err(|e| StartError::Spawn {
                service,
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(launch::forward_stdout(service, stdout, ready_marker, ready_tx));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(launch::forward_stderr(service, stderr));
        }

        self.processes
            .lock()
            .await
            .insert(service, ManagedProcess { service, child, pid });

        match tokio::time::timeout(startup_timeout, ready_rx).await {
            Ok(Ok(())) => {
                tracing::info!(service = %service, pid = ?pid, "✅ ready");
                Ok(Readiness::Confirmed)
            }
            Ok(Err(_)) => self.after_stdout_closed(service, pid).await,
            Err(_) if !self.processes.lock().await.contains_key(&service) => {
                tracing::info!(service = %service, "stopped while waiting for ready marker");
                Err(StartError::Cancelled { service })
            }
            Err(_) => {
                tracing::info!(
                    service = %service,
                    pid = ?pid,
                    timeout_secs = startup_timeout.as_secs_f32(),
                    "no ready marker before timeout; assuming service is still starting"
                );
                Ok(Readiness::Assumed)
            }
        }
    }

    /// Stdout closed before the marker. A non-zero exit is a failed start and a handle removed by
    /// `stop` is a cancelled one; anything else is treated like a timeout.
    async fn after_stdout_closed(&self, service: ServiceName, pid: Option<u32>) -> Result<Readiness, StartError> {
        let deadline = tokio::time::Instant::now() + EARLY_EXIT_GRACE;
        loop {
            {
                let mut processes = self.processes.lock().await;
                let status = match processes.get_mut(&service) {
                    Some(proc) => proc.child.try_wait().ok().flatten(),
                    None => {
                        tracing::info!(service = %service, "stopped before ready marker");
                        return Err(StartError::Cancelled { service });
                    }
                };
                if let Some(status) = status {
                    processes.remove(&service);
                    if status.success() {
                        tracing::info!(service = %service, "launcher exited cleanly before ready marker");
                        return Ok(Readiness::Assumed);
                    }
                    return Err(StartError::EarlyExit {
                        service,
                        code: status.code(),
                    });
                }
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::info!(service = %service, pid = ?pid, "stdout closed before ready marker; assuming service is starting");
                return Ok(Readiness::Assumed);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Stop one service. Prefers the unified stop script; otherwise terminates directly.
    /// Never fails; errors are logged.
    pub async fn stop(&self, service: ServiceName) {
        if let Some(script) = find_stop_script(&self.settings.workspace_root, self.platform) {
            self.run_stop_script(&script).await;
            self.processes.lock().await.remove(&service);
            return;
        }

        match service {
            ServiceName::Store => self.compose_down().await,
            _ => self.terminate(service).await,
        }
    }

    /// Stop everything: agent, inference, then the container stack. Always completes.
    pub async fn stop_all(&self) {
        if let Some(script) = find_stop_script(&self.settings.workspace_root, self.platform) {
            self.run_stop_script(&script).await;
            self.processes.lock().await.clear();
            return;
        }

        self.terminate(ServiceName::Agent).await;
        self.terminate(ServiceName::Inference).await;
        self.compose_down().await;
    }

    async fn terminate(&self, service: ServiceName) {
        let proc = self.processes.lock().await.remove(&service);
        let Some(proc) = proc else {
            return;
        };
        match proc.pid {
            Some(pid) => self.platform.terminate(proc.service.as_str(), pid).await,
            None => tracing::debug!(service = %proc.service, "process already reaped"),
        }
    }

    async fn compose_down(&self) {
        let result = Command::new(&self.settings.compose_cli)
            .arg("down")
            .current_dir(&self.settings.workspace_root)
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => tracing::info!(service = "store", "container stack stopped"),
            Ok(out) => tracing::warn!(
                service = "store",
                code = ?out.status.code(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "container stack teardown failed"
            ),
            Err(e) => tracing::warn!(service = "store", error = %e, "could not run compose teardown"),
        }
    }

    async fn run_stop_script(&self, script: &Path) {
        if let Err(e) = self.platform.prepare_script(script) {
            tracing::warn!(script = %script.display(), error = %e, "could not mark stop script executable");
        }
        tracing::info!(script = %script.display(), "🛑 running unified stop script");
        match self
            .platform
            .oneshot_command(script, &self.settings.workspace_root)
            .output()
            .await
        {
            Ok(out) if out.status.success() => tracing::info!("stop script completed"),
            Ok(out) => tracing::warn!(
                code = ?out.status.code(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "stop script failed"
            ),
            Err(e) => tracing::warn!(error = %e, "could not run stop script"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_order_is_store_inference_agent() {
        assert_eq!(
            ServiceName::STARTUP_ORDER,
            [ServiceName::Store, ServiceName::Inference, ServiceName::Agent]
        );
    }

    #[test]
    fn service_names_render_lowercase() {
        assert_eq!(ServiceName::Inference.to_string(), "inference");
        assert_eq!(serde_json::to_value(ServiceName::Agent).unwrap(), "agent");
    }

    #[tokio::test]
    async fn untracked_services_are_not_running() {
        let sup = ProcessSupervisor::new(LaunchSettings::default());
        assert!(!sup.is_running(ServiceName::Inference).await);
        assert!(!sup.is_running(ServiceName::Agent).await);
        assert_eq!(sup.pid(ServiceName::Agent).await, None);
    }

    #[tokio::test]
    async fn store_probe_with_missing_cli_reports_not_running() {
        let settings = LaunchSettings {
            container_cli: "/nonexistent/aidev-container-cli".to_string(),
            ..LaunchSettings::default()
        };
        let sup = ProcessSupervisor::new(settings);
        assert!(!sup.is_running(ServiceName::Store).await);
    }

    #[tokio::test]
    async fn stop_without_handles_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LaunchSettings {
            workspace_root: dir.path().to_path_buf(),
            compose_cli: "/nonexistent/aidev-compose".to_string(),
            ..LaunchSettings::default()
        };
        let sup = ProcessSupervisor::new(settings);
        sup.stop(ServiceName::Agent).await;
        sup.stop_all().await;
        assert!(!sup.is_running(ServiceName::Agent).await);
    }
}
