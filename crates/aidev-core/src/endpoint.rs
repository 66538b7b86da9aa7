//! Agent endpoint resolution with a per-session cache.
//!
//! Priority: the discovery file written by the agent backend, then the persisted user setting,
//! then the configured default. A resolved URL is reused until a call against it fails to
//! connect.

use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::config::{BridgeConfig, SettingsStore};
use crate::error::SettingsError;

pub struct EndpointResolver {
    discovery_path: PathBuf,
    configured_url: String,
    settings: SettingsStore,
    cached: RwLock<Option<String>>,
}

impl EndpointResolver {
    pub fn new(discovery_path: impl Into<PathBuf>, configured_url: impl Into<String>, settings: SettingsStore) -> Self {
        Self {
            discovery_path: discovery_path.into(),
            configured_url: configured_url.into(),
            settings,
            cached: RwLock::new(None),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.discovery_path(),
            config.agent_api_url.clone(),
            SettingsStore::new(config.settings_path()),
        )
    }

    pub fn discovery_path(&self) -> &Path {
        &self.discovery_path
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Resolve the agent base URL from scratch, ignoring the session cache.
    pub async fn resolve_base_url(&self) -> String {
        if let Some(port) = self.read_discovered_port().await {
            let url = format!("http://localhost:{}/api/agent", port);
            tracing::debug!(url = %url, "agent endpoint from discovery file");
            return url;
        }
        self.configured_base_url()
    }

    /// Persisted user setting, then the configured default.
    fn configured_base_url(&self) -> String {
        let persisted = match self.settings.load() {
            Ok(settings) => settings.agent_api_url,
            Err(e) => {
                tracing::warn!(path = %self.settings.path().display(), error = %e, "ignoring unreadable user settings");
                None
            }
        };
        persisted
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.configured_url.clone())
    }

    async fn read_discovered_port(&self) -> Option<u16> {
        let content = tokio::fs::read_to_string(&self.discovery_path).await.ok()?;
        match content.trim().parse::<u16>() {
            Ok(port) if port > 0 => Some(port),
            _ => {
                tracing::debug!(
                    path = %self.discovery_path.display(),
                    content = %content.trim(),
                    "discovery file does not hold a valid port"
                );
                None
            }
        }
    }

    /// Cached base URL for this session, resolving it on first use.
    pub async fn current_base_url(&self) -> String {
        if let Some(url) = self.cached.read().await.clone() {
            return url;
        }
        let url = self.resolve_base_url().await;
        *self.cached.write().await = Some(url.clone());
        url
    }

    /// Forget the cached URL after a connection-level failure.
    pub async fn invalidate(&self) {
        self.cached.write().await.take();
    }

    /// Cache `url` for the session and persist it as the user's `agent_api_url`.
    pub async fn record_success(&self, url: &str) -> Result<(), SettingsError> {
        *self.cached.write().await = Some(url.to_string());
        self.settings.set_agent_api_url(url)?;
        tracing::info!(url, "✅ recorded working agent endpoint");
        Ok(())
    }
}
