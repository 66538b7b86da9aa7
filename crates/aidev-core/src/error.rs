//! Error types for service lifecycle, the agent API client and persisted settings.

use thiserror::Error;

use crate::supervisor::ServiceName;

/// Failure to bring a service up.
///
/// `Clone` because a single startup attempt is shared between every caller of
/// `ServiceOrchestrator::ensure_running` that arrives while it is in flight.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("{artifact} not found for the {service} service")]
    MissingArtifact { service: ServiceName, artifact: String },

    #[error("{service} service launch exited with code {code:?}")]
    NonZeroExit { service: ServiceName, code: Option<i32> },

    #[error("{service} service exited during startup with code {code:?}")]
    EarlyExit { service: ServiceName, code: Option<i32> },

    #[error("failed to spawn the {service} service: {reason}")]
    Spawn { service: ServiceName, reason: String },

    /// Services were shut down while this startup was in flight.
    #[error("startup of the {service} service was cancelled by shutdown")]
    Cancelled { service: ServiceName },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StartError {
    fn from(err: std::io::Error) -> Self {
        StartError::Io(err.to_string())
    }
}

/// Failure talking to the agent HTTP API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No HTTP response at all (refused, timed out, reset). Triggers the candidate port scan.
    #[error("could not reach agent API at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status. Never retried.
    #[error("agent API at {url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("agent API at {url} returned an unreadable body: {reason}")]
    Decode { url: String, reason: String },

    #[error("invalid agent API URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// True when no HTTP response was received.
    pub fn is_connection(&self) -> bool {
        matches!(self, ApiError::Connection { .. })
    }

    /// HTTP status carried by the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure reading or writing the persisted user settings file.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
