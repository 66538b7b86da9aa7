//! Integration test: process supervisor and orchestrator with stand-in launch scripts.
//!
//! Verifies that:
//! 1. A started service is tracked and a second start spawns nothing.
//! 2. Concurrent `ensure_running` calls spawn each service exactly once.
//! 3. Missing launch artifacts fail the startup and leave the set stopped.
//! 4. Readiness falls back to "assumed" when no marker appears in time.
//! 5. A shutdown during startup cancels the remaining stages.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aidev_core::{
    LaunchSettings, LogProgress, ProcessSupervisor, Readiness, ServiceName, ServiceOrchestrator, ServiceState,
    StartError,
};

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

/// Workspace with compose file, both launch scripts, and stand-in container/compose CLIs.
/// Every launch appends its service name to `spawns.log`.
fn workspace(root: &Path) -> LaunchSettings {
    fs::create_dir_all(root.join("scripts")).unwrap();
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("docker-compose.yml"), "services: {}\n").unwrap();
    write_script(
        &root.join("scripts").join("run_llama_server.sh"),
        "echo inference >> spawns.log\necho 'main: server listening on 127.0.0.1:8080'\nexec sleep 30",
    );
    write_script(
        &root.join("scripts").join("run_agent_server.sh"),
        "echo agent >> spawns.log\necho 'Starting VS Code integration server'\nexec sleep 30",
    );
    write_script(&root.join("bin").join("container"), "exit 0");
    write_script(&root.join("bin").join("compose"), "echo \"compose $*\" >> compose.log\nexit 0");

    LaunchSettings {
        workspace_root: root.to_path_buf(),
        container_cli: root.join("bin").join("container").display().to_string(),
        compose_cli: root.join("bin").join("compose").display().to_string(),
        inference_startup_timeout: Duration::from_secs(5),
        agent_startup_timeout: Duration::from_secs(5),
        ..LaunchSettings::default()
    }
}

fn spawn_count(root: &Path, service: &str) -> usize {
    fs::read_to_string(root.join("spawns.log"))
        .unwrap_or_default()
        .lines()
        .filter(|l| l.trim() == service)
        .count()
}

#[tokio::test]
async fn started_service_is_tracked_and_not_respawned() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new(workspace(dir.path()));

    let readiness = supervisor.start(ServiceName::Agent).await.unwrap();
    assert_eq!(readiness, Readiness::Confirmed);
    assert!(supervisor.is_running(ServiceName::Agent).await);
    assert!(supervisor.pid(ServiceName::Agent).await.is_some());

    let again = supervisor.start(ServiceName::Agent).await.unwrap();
    assert_eq!(again, Readiness::AlreadyRunning);
    assert_eq!(spawn_count(dir.path(), "agent"), 1);

    supervisor.stop(ServiceName::Agent).await;
    assert!(!supervisor.is_running(ServiceName::Agent).await);
}

#[tokio::test]
async fn concurrent_ensure_running_spawns_each_service_once() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = ServiceOrchestrator::new(ProcessSupervisor::new(workspace(dir.path())));

    let a = orchestrator.clone();
    let b = orchestrator.clone();
    let (first, second) = tokio::join!(
        a.ensure_running(Arc::new(LogProgress)),
        b.ensure_running(Arc::new(LogProgress)),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second, "both callers observe the same attempt");
    assert_eq!(first.stages.len(), 3);

    assert_eq!(spawn_count(dir.path(), "inference"), 1);
    assert_eq!(spawn_count(dir.path(), "agent"), 1);
    assert_eq!(orchestrator.state().await, ServiceState::Running);

    let report = orchestrator.ensure_running(Arc::new(LogProgress)).await.unwrap();
    assert!(report.already_running);

    orchestrator.shutdown().await;
    assert_eq!(orchestrator.state().await, ServiceState::Stopped);
    let compose_log = fs::read_to_string(dir.path().join("compose.log")).unwrap();
    assert!(compose_log.contains("compose up -d"));
    assert!(compose_log.contains("compose down"));
}

#[tokio::test]
async fn missing_artifacts_fail_startup_and_stay_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let settings = LaunchSettings {
        workspace_root: dir.path().to_path_buf(),
        container_cli: dir.path().join("no-such-cli").display().to_string(),
        ..LaunchSettings::default()
    };
    let orchestrator = ServiceOrchestrator::new(ProcessSupervisor::new(settings));

    let err = orchestrator.ensure_running(Arc::new(LogProgress)).await.unwrap_err();
    assert!(matches!(err, StartError::MissingArtifact { .. }));
    assert!(err.to_string().contains("docker-compose.yml"));
    assert_eq!(orchestrator.state().await, ServiceState::Stopped);
}

#[tokio::test]
async fn silent_service_is_assumed_ready_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = workspace(dir.path());
    write_script(&dir.path().join("scripts").join("run_llama_server.sh"), "exec sleep 30");
    settings.inference_startup_timeout = Duration::from_millis(300);
    let supervisor = ProcessSupervisor::new(settings);

    let readiness = supervisor.start(ServiceName::Inference).await.unwrap();
    assert_eq!(readiness, Readiness::Assumed);
    assert!(supervisor.is_running(ServiceName::Inference).await);

    supervisor.stop_all().await;
    assert!(!supervisor.is_running(ServiceName::Inference).await);
}

#[tokio::test]
async fn shutdown_during_startup_cancels_remaining_stages() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = workspace(dir.path());
    write_script(
        &dir.path().join("scripts").join("run_llama_server.sh"),
        "echo inference >> spawns.log\nexec sleep 30",
    );
    settings.inference_startup_timeout = Duration::from_millis(800);
    let orchestrator = ServiceOrchestrator::new(ProcessSupervisor::new(settings));

    let starting = orchestrator.clone();
    let attempt = tokio::spawn(async move { starting.ensure_running(Arc::new(LogProgress)).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.state().await, ServiceState::Starting);
    orchestrator.shutdown().await;

    let err = attempt.await.unwrap().unwrap_err();
    assert!(matches!(err, StartError::Cancelled { .. }), "unexpected: {err:?}");
    // Let a late agent launch show up if one was going to happen.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(orchestrator.state().await, ServiceState::Stopped);
    assert!(!orchestrator.supervisor().is_running(ServiceName::Inference).await);
    assert!(!orchestrator.supervisor().is_running(ServiceName::Agent).await);
    assert_eq!(spawn_count(dir.path(), "inference"), 1);
    assert_eq!(spawn_count(dir.path(), "agent"), 0);
}

#[tokio::test]
async fn failing_launcher_reports_early_exit() {
    let dir = tempfile::tempdir().unwrap();
    let settings = workspace(dir.path());
    write_script(&dir.path().join("scripts").join("run_agent_server.sh"), "echo 'no model found' >&2\nexit 3");
    let supervisor = ProcessSupervisor::new(settings);

    let err = supervisor.start(ServiceName::Agent).await.unwrap_err();
    assert_eq!(
        err,
        StartError::EarlyExit {
            service: ServiceName::Agent,
            code: Some(3),
        }
    );
    assert!(!supervisor.is_running(ServiceName::Agent).await);
}

#[tokio::test]
async fn stop_script_handles_unified_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new(workspace(dir.path()));
    write_script(&dir.path().join("stop_services.sh"), "echo stopped >> stop.log");

    supervisor.start(ServiceName::Agent).await.unwrap();
    let pid = supervisor.pid(ServiceName::Agent).await.unwrap();
    supervisor.stop_all().await;

    assert_eq!(fs::read_to_string(dir.path().join("stop.log")).unwrap().trim(), "stopped");
    assert!(!supervisor.is_running(ServiceName::Agent).await);
    assert!(!dir.path().join("compose.log").exists());

    // The stand-in stop script does not kill anything; clean up the stray child.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}
