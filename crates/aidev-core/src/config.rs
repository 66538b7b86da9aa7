//! Bridge configuration and persisted user settings.
//!
//! Two layers:
//! - [`BridgeConfig`]: deployment config loaded from `config/aidev.toml` (or `AIDEV_CONFIG`)
//!   and `AIDEV__*` environment variables. Read-only at runtime.
//! - [`UserSettings`]: the global-scope settings file the bridge itself writes. A successful
//!   endpoint discovery is persisted here so later sessions go straight to the right port.
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | agent_api_url | http://localhost:5000/api/agent | Agent POST endpoint when no discovery file exists. |
//! | auto_start_services | false | Run start-services when the host activates. |
//! | request_timeout_secs | 15 | Timeout for the primary request. |
//! | fallback_timeout_secs | 5 | Timeout for each candidate port during the scan. |
//! | candidate_ports | 5002, 5000, 5001, 5003, 5004, 5005 | Scan order after a connection failure. |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SettingsError;
use crate::supervisor::LaunchSettings;

/// Default agent endpoint when neither discovery nor configuration says otherwise.
pub const DEFAULT_AGENT_API_URL: &str = "http://localhost:5000/api/agent";

/// Ports tried, in order, when the resolved endpoint refuses connections.
pub const DEFAULT_CANDIDATE_PORTS: [u16; 6] = [5002, 5000, 5001, 5003, 5004, 5005];

/// File name the agent backend writes its bound port to, inside the OS temp dir.
pub const DISCOVERY_FILE_NAME: &str = "vscode_ai_agent_port.txt";

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_agent_api_url() -> String {
    DEFAULT_AGENT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_fallback_timeout_secs() -> u64 {
    5
}

fn default_candidate_ports() -> Vec<u16> {
    DEFAULT_CANDIDATE_PORTS.to_vec()
}

fn default_inference_startup_timeout_secs() -> u64 {
    10
}

fn default_agent_startup_timeout_secs() -> u64 {
    15
}

fn default_container_cli() -> String {
    "docker".to_string()
}

fn default_compose_cli() -> String {
    "docker-compose".to_string()
}

fn default_store_container_filter() -> String {
    "weaviate".to_string()
}

/// Deployment configuration for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Directory holding `docker-compose.yml`, the launch scripts and the optional stop script.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Configured agent endpoint. A persisted user setting takes priority over this value.
    #[serde(default = "default_agent_api_url")]
    pub agent_api_url: String,
    #[serde(default)]
    pub auto_start_services: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_fallback_timeout_secs")]
    pub fallback_timeout_secs: u64,
    #[serde(default = "default_candidate_ports")]
    pub candidate_ports: Vec<u16>,
    #[serde(default = "default_inference_startup_timeout_secs")]
    pub inference_startup_timeout_secs: u64,
    #[serde(default = "default_agent_startup_timeout_secs")]
    pub agent_startup_timeout_secs: u64,
    /// Container runtime used for the store "already running" probe.
    #[serde(default = "default_container_cli")]
    pub container_cli: String,
    /// Compose tool used to bring the store stack up and down.
    #[serde(default = "default_compose_cli")]
    pub compose_cli: String,
    /// Substring matched against running container names.
    #[serde(default = "default_store_container_filter")]
    pub store_container_filter: String,
    /// Override for the discovery file location (defaults to `<tempdir>/vscode_ai_agent_port.txt`).
    #[serde(default)]
    pub discovery_file: Option<PathBuf>,
    /// Override for the user settings file (defaults to `<config_dir>/aidev-bridge/settings.toml`).
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            agent_api_url: default_agent_api_url(),
            auto_start_services: false,
            request_timeout_secs: default_request_timeout_secs(),
            fallback_timeout_secs: default_fallback_timeout_secs(),
            candidate_ports: default_candidate_ports(),
            inference_startup_timeout_secs: default_inference_startup_timeout_secs(),
            agent_startup_timeout_secs: default_agent_startup_timeout_secs(),
            container_cli: default_container_cli(),
            compose_cli: default_compose_cli(),
            store_container_filter: default_store_container_filter(),
            discovery_file: None,
            settings_path: None,
        }
    }
}

/// `AIDEV__*` variables. `AIDEV__CANDIDATE_PORTS` takes a comma-separated list.
fn environment() -> config::Environment {
    config::Environment::with_prefix("AIDEV")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("candidate_ports")
}

impl BridgeConfig {
    /// Load config from file and environment. Precedence: env `AIDEV_CONFIG` path > `config/aidev.toml` > defaults,
    /// with `AIDEV__*` environment variables applied last.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("AIDEV_CONFIG").unwrap_or_else(|_| "config/aidev.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load config from an explicit file (skipped when absent) plus the environment.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: &Path, env: config::Environment) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("agent_api_url", DEFAULT_AGENT_API_URL)?
            .set_default("auto_start_services", false)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder.add_source(env).build()?;

        built.try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }

    /// Where the agent backend publishes its bound port.
    pub fn discovery_path(&self) -> PathBuf {
        self.discovery_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DISCOVERY_FILE_NAME))
    }

    /// Global-scope settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.settings_path.clone().unwrap_or_else(UserSettings::default_path)
    }

    /// Launch parameters handed to the process supervisor.
    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            workspace_root: self.workspace_root.clone(),
            container_cli: self.container_cli.clone(),
            compose_cli: self.compose_cli.clone(),
            store_container_filter: self.store_container_filter.clone(),
            inference_startup_timeout: Duration::from_secs(self.inference_startup_timeout_secs),
            agent_startup_timeout: Duration::from_secs(self.agent_startup_timeout_secs),
        }
    }

    /// Agent URL the user sees: persisted setting first, then this config.
    pub fn effective_agent_api_url(&self, settings: &UserSettings) -> String {
        settings
            .agent_api_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.agent_api_url.clone())
    }

    pub fn effective_auto_start(&self, settings: &UserSettings) -> bool {
        settings.auto_start_services.unwrap_or(self.auto_start_services)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// USER SETTINGS (global scope, written by the bridge)
// ══════════════════════════════════════════════════════════════════════════════

/// User-scope settings persisted across editor sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Agent endpoint; rewritten whenever a candidate port answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start_services: Option<bool>,

    /// When `agent_api_url` was last rewritten by discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_discovered_at: Option<DateTime<Utc>>,
}

impl UserSettings {
    /// `<config_dir>/aidev-bridge/settings.toml`, or `./aidev_settings.toml` when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("aidev-bridge").join("settings.toml"))
            .unwrap_or_else(|| PathBuf::from("aidev_settings.toml"))
    }
}

/// File-backed store for [`UserSettings`]. Last writer wins.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings file. A missing file yields defaults.
    pub fn load(&self) -> Result<UserSettings, SettingsError> {
        if !self.path.exists() {
            return Ok(UserSettings::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, settings: &UserSettings) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Persist a discovered agent endpoint.
    pub fn set_agent_api_url(&self, url: &str) -> Result<(), SettingsError> {
        let mut settings = self.load()?;
        settings.agent_api_url = Some(url.to_string());
        settings.last_discovered_at = Some(Utc::now());
        self.save(&settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.agent_api_url, "http://localhost:5000/api/agent");
        assert_eq!(cfg.candidate_ports, vec![5002, 5000, 5001, 5003, 5004, 5005]);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.fallback_timeout(), Duration::from_secs(5));
        assert!(!cfg.auto_start_services);
    }

    #[test]
    fn environment_overrides_file_and_splits_port_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aidev.toml");
        std::fs::write(&path, "candidate_ports = [7000]\nrequest_timeout_secs = 9\n").unwrap();

        let vars: config::Map<String, String> = [
            ("AIDEV__CANDIDATE_PORTS", "5010,5011"),
            ("AIDEV__REQUEST_TIMEOUT_SECS", "30"),
            ("AIDEV__AUTO_START_SERVICES", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cfg = BridgeConfig::load_with_env(&path, environment().source(Some(vars))).unwrap();
        assert_eq!(cfg.candidate_ports, vec![5010, 5011]);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert!(cfg.auto_start_services);
        assert_eq!(cfg.agent_api_url, DEFAULT_AGENT_API_URL);
    }

    #[test]
    fn load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aidev.toml");
        fs::write(
            &path,
            "agent_api_url = \"http://127.0.0.1:6000/api/agent\"\nauto_start_services = true\ncandidate_ports = [7000, 7001]\n",
        )
        .unwrap();

        let cfg = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(cfg.agent_api_url, "http://127.0.0.1:6000/api/agent");
        assert!(cfg.auto_start_services);
        assert_eq!(cfg.candidate_ports, vec![7000, 7001]);
        assert_eq!(cfg.request_timeout_secs, 15);
    }

    #[test]
    fn user_setting_wins_over_config() {
        let cfg = BridgeConfig::default();
        let mut settings = UserSettings::default();
        assert_eq!(cfg.effective_agent_api_url(&settings), DEFAULT_AGENT_API_URL);

        settings.agent_api_url = Some("http://localhost:5003/api/agent".to_string());
        assert_eq!(cfg.effective_agent_api_url(&settings), "http://localhost:5003/api/agent");
    }

    #[test]
    fn settings_store_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.toml"));
        assert_eq!(store.load().unwrap(), UserSettings::default());

        store.set_agent_api_url("http://localhost:5001/api/agent").unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.agent_api_url.as_deref(), Some("http://localhost:5001/api/agent"));
        assert!(loaded.last_discovered_at.is_some());
    }
}
