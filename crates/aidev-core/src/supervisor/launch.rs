//! Launch artifact resolution and startup output handling.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;

use super::platform::Platform;
use super::{LaunchSettings, ServiceName};
use crate::error::StartError;

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const INFERENCE_SCRIPT_STEM: &str = "run_llama_server";
pub const AGENT_SCRIPT_STEM: &str = "run_agent_server";
pub const STOP_SCRIPT_STEM: &str = "stop_services";

/// Stdout marker printed by llama.cpp once its HTTP server is bound.
pub const INFERENCE_READY_MARKER: &str = "server listening";
/// Stdout marker printed by the agent integration server on startup.
pub const AGENT_READY_MARKER: &str = "Starting VS Code integration server";

/// How a service is brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSpec {
    /// `<compose_cli> up -d` against this file; readiness is the command's exit status.
    Compose { compose_file: PathBuf },
    /// A long-running script; readiness is `ready_marker` on stdout or `startup_timeout`.
    Script {
        script: PathBuf,
        ready_marker: &'static str,
        startup_timeout: Duration,
    },
}

impl LaunchSpec {
    /// Locate the launch artifact for `service`. Scripts are looked up in `scripts/` first,
    /// then in the workspace root.
    pub fn resolve(
        service: ServiceName,
        settings: &LaunchSettings,
        platform: Platform,
    ) -> Result<Self, StartError> {
        let root = &settings.workspace_root;
        match service {
            ServiceName::Store => {
                let compose_file = root.join(COMPOSE_FILE);
                if !compose_file.exists() {
                    return Err(StartError::MissingArtifact {
                        service,
                        artifact: COMPOSE_FILE.to_string(),
                    });
                }
                Ok(LaunchSpec::Compose { compose_file })
            }
            ServiceName::Inference => Ok(LaunchSpec::Script {
                script: find_script(service, root, &platform.script_file(INFERENCE_SCRIPT_STEM))?,
                ready_marker: INFERENCE_READY_MARKER,
                startup_timeout: settings.inference_startup_timeout,
            }),
            ServiceName::Agent => Ok(LaunchSpec::Script {
                script: find_script(service, root, &platform.script_file(AGENT_SCRIPT_STEM))?,
                ready_marker: AGENT_READY_MARKER,
                startup_timeout: settings.agent_startup_timeout,
            }),
        }
    }
}

fn find_script(service: ServiceName, root: &Path, file_name: &str) -> Result<PathBuf, StartError> {
    [root.join("scripts").join(file_name), root.join(file_name)]
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| StartError::MissingArtifact {
            service,
            artifact: file_name.to_string(),
        })
}

/// Unified stop script at the workspace root, if present.
pub fn find_stop_script(root: &Path, platform: Platform) -> Option<PathBuf> {
    let path = root.join(platform.script_file(STOP_SCRIPT_STEM));
    path.exists().then_some(path)
}

/// Forward a service's stdout to tracing and fire `ready` on the first line containing `marker`.
pub(crate) async fn forward_stdout<R>(
    service: ServiceName,
    stream: R,
    marker: &'static str,
    ready: oneshot::Sender<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(service = %service, "{}", line);
        if line.contains(marker) {
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }
        }
    }
}

pub(crate) async fn forward_stderr<R>(service: ServiceName, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(service = %service, "{}", line);
    }
}
