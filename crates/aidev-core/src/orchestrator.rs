//! Service orchestrator: brings the store, inference and agent services up in dependency order.
//!
//! Callers that arrive while a startup is in flight await the same attempt instead of starting
//! their own, so each service is spawned at most once.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::StartError;
use crate::supervisor::{ProcessSupervisor, Readiness, ServiceName};

/// Receives human-readable progress lines while services start.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, message: &str);
}

/// Progress sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, message: &str) {
        tracing::info!(target: "aidev::progress", "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub service: ServiceName,
    pub readiness: Readiness,
}

/// What a call to [`ServiceOrchestrator::ensure_running`] observed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StartupReport {
    /// The set was already running; nothing was started.
    pub already_running: bool,
    pub stages: Vec<StageOutcome>,
}

impl StartupReport {
    fn already_running() -> Self {
        Self {
            already_running: true,
            stages: Vec::new(),
        }
    }

    /// Services whose readiness was assumed after the startup timeout rather than confirmed.
    pub fn assumed(&self) -> impl Iterator<Item = ServiceName> + '_ {
        self.stages
            .iter()
            .filter(|s| s.readiness == Readiness::Assumed)
            .map(|s| s.service)
    }
}

type StartupAttempt = Shared<BoxFuture<'static, Result<StartupReport, StartError>>>;

enum Phase {
    Stopped,
    Starting(StartupAttempt),
    Running,
}

struct Inner {
    supervisor: ProcessSupervisor,
    phase: Mutex<Phase>,
    /// Bumped by every new attempt and every shutdown. A finishing attempt only publishes its
    /// result if its generation is still current.
    generation: AtomicU64,
}

/// Owns the [`ProcessSupervisor`] and the overall service-set state. Cheap to clone.
#[derive(Clone)]
pub struct ServiceOrchestrator {
    inner: Arc<Inner>,
}

impl ServiceOrchestrator {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        Self {
            inner: Arc::new(Inner {
                supervisor,
                phase: Mutex::new(Phase::Stopped),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.inner.supervisor
    }

    pub async fn state(&self) -> ServiceState {
        match &*self.inner.phase.lock().await {
            Phase::Stopped => ServiceState::Stopped,
            Phase::Starting(_) => ServiceState::Starting,
            Phase::Running => ServiceState::Running,
        }
    }

    /// Start store, inference and agent in order unless the set is already running.
    ///
    /// A failing stage aborts the sequence and leaves the state `Stopped`; services that did
    /// start are left running. A [`shutdown`](Self::shutdown) that lands mid-startup ends the
    /// attempt with [`StartError::Cancelled`] before any later stage launches.
    pub async fn ensure_running(&self, progress: Arc<dyn ProgressReporter>) -> Result<StartupReport, StartError> {
        let attempt = {
            let mut phase = self.inner.phase.lock().await;
            match &*phase {
                Phase::Running => return Ok(StartupReport::already_running()),
                Phase::Starting(attempt) => {
                    tracing::debug!("joining in-flight service startup");
                    attempt.clone()
                }
                Phase::Stopped => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let inner = Arc::clone(&self.inner);
                    let attempt = async move { inner.run_startup(generation, progress).await }
                        .boxed()
                        .shared();
                    // Drive the attempt even if every caller stops waiting on it.
                    tokio::spawn(attempt.clone());
                    *phase = Phase::Starting(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Stop every service and mark the set `Stopped`. Never fails.
    pub async fn shutdown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("🛑 stopping services");
        self.inner.supervisor.stop_all().await;
        *self.inner.phase.lock().await = Phase::Stopped;
        tracing::info!("services stopped");
    }

    /// Host deactivation hook. Schedules [`shutdown`](Self::shutdown) on the runtime and returns
    /// immediately; the handle may be dropped.
    pub async fn deactivate(&self) -> Option<JoinHandle<()>> {
        if self.state().await == ServiceState::Stopped {
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.shutdown().await }))
    }
}

impl Inner {
    async fn run_startup(
        self: Arc<Self>,
        generation: u64,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<StartupReport, StartError> {
        let mut report = StartupReport::default();

        for service in ServiceName::STARTUP_ORDER {
            if !self.is_current(generation) {
                tracing::info!(service = %service, "startup superseded by shutdown; skipping remaining stages");
                return Err(StartError::Cancelled { service });
            }
            progress.report(&format!("Starting {}...", service.label()));
            match self.supervisor.start(service).await {
                // A shutdown that ran while this stage was launching may have missed its handle.
                Ok(_) if !self.is_current(generation) => {
                    tracing::info!(service = %service, "startup superseded by shutdown; stopping stage");
                    self.supervisor.stop(service).await;
                    return Err(StartError::Cancelled { service });
                }
                Ok(readiness) => report.stages.push(StageOutcome { service, readiness }),
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "service startup failed");
                    progress.report(&format!("Failed to start {}: {}", service.label(), e));
                    self.publish(generation, Phase::Stopped).await;
                    return Err(e);
                }
            }
        }

        progress.report("All services started.");
        self.publish(generation, Phase::Running).await;
        Ok(report)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn publish(&self, generation: u64, next: Phase) {
        let mut phase = self.phase.lock().await;
        if self.is_current(generation) {
            *phase = next;
        } else {
            tracing::debug!(generation, "startup attempt superseded; state left unchanged");
        }
    }
}
