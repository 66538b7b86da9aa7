//! Platform launch/termination strategy, selected once per supervisor.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// `CREATE_NEW_PROCESS_GROUP`, so the service survives console signals aimed at the host.
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux, macOS and other Unix-likes: `.sh` scripts, process groups, `SIGTERM`.
    Unix,
    /// `.bat` scripts via `cmd /C`, teardown via `taskkill /T`.
    Windows,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    pub fn script_extension(self) -> &'static str {
        match self {
            Platform::Unix => "sh",
            Platform::Windows => "bat",
        }
    }

    /// `stem` plus this platform's script extension.
    pub fn script_file(self, stem: &str) -> String {
        format!("{}.{}", stem, self.script_extension())
    }

    /// Mark a script executable. No-op on Windows.
    pub fn prepare_script(self, script: &Path) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            if self == Platform::Unix {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = std::fs::metadata(script)?.permissions();
                perms.set_mode(0o755);
                std::fs::set_permissions(script, perms)?;
            }
        }
        #[cfg(not(unix))]
        let _ = script;
        Ok(())
    }

    fn script_command(self, script: &Path) -> Command {
        match self {
            Platform::Unix => Command::new(script),
            Platform::Windows => {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(script);
                cmd
            }
        }
    }

    /// Command for a long-running service script: detached into its own process group, output piped.
    pub fn launch_command(self, script: &Path, cwd: &Path) -> Command {
        let mut cmd = self.script_command(script);
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

        cmd
    }

    /// Command for a short, synchronous script (the unified stop script).
    pub fn oneshot_command(self, script: &Path, cwd: &Path) -> Command {
        let mut cmd = self.script_command(script);
        cmd.current_dir(cwd).stdin(Stdio::null());
        cmd
    }

    /// Terminate the process tree rooted at `pid`. Failures are logged, never returned.
    pub async fn terminate(self, service: &str, pid: u32) {
        match self {
            Platform::Unix => terminate_process_group(service, pid),
            Platform::Windows => {
                let result = Command::new("taskkill")
                    .args(["/F", "/T", "/PID", &pid.to_string()])
                    .output()
                    .await;
                match result {
                    Ok(output) if output.status.success() => {
                        tracing::info!(service, pid, "taskkill terminated process tree");
                    }
                    Ok(output) => {
                        tracing::warn!(
                            service,
                            pid,
                            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                            "taskkill reported failure"
                        );
                    }
                    Err(e) => tracing::error!(service, pid, error = %e, "failed to run taskkill"),
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate_process_group(service: &str, pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        tracing::warn!(service, pid, "pid out of range for a process group");
        return;
    };
    // The child was spawned with process_group(0), so its pid is the group id.
    let rc = unsafe { libc::kill(-pgid, libc::SIGTERM) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        tracing::warn!(service, pid, error = %err, "SIGTERM to process group failed");
    } else {
        tracing::info!(service, pid, "sent SIGTERM to process group");
    }
}

#[cfg(not(unix))]
fn terminate_process_group(service: &str, pid: u32) {
    tracing::warn!(service, pid, "process-group termination is unavailable on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_names_follow_platform() {
        assert_eq!(Platform::Unix.script_file("run_llama_server"), "run_llama_server.sh");
        assert_eq!(Platform::Windows.script_file("run_agent_server"), "run_agent_server.bat");
    }

    #[test]
    fn detect_matches_target() {
        if cfg!(windows) {
            assert_eq!(Platform::detect(), Platform::Windows);
        } else {
            assert_eq!(Platform::detect(), Platform::Unix);
        }
    }

    #[cfg(unix)]
    #[test]
    fn prepare_script_sets_exec_bits() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        Platform::Unix.prepare_script(&script).unwrap();
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
