//! aidev-core: editor bridge for the local AI dev team services.
//!
//! Starts and stops the store, inference and agent services, and talks to the agent's HTTP API
//! with port discovery and a candidate-port fallback. The host editor only sees the command
//! dispatcher.

mod client;
mod commands;
mod config;
mod endpoint;
mod error;
mod orchestrator;
mod protocol;
pub mod supervisor;

// Service lifecycle
pub use orchestrator::{LogProgress, ProgressReporter, ServiceOrchestrator, ServiceState, StageOutcome, StartupReport};
pub use supervisor::{LaunchSettings, Platform, ProcessSupervisor, Readiness, ServiceName};

// Agent API
pub use client::{failure_message, ApiClient, CONNECTIVITY_MESSAGE, SERVICES_NOT_RUNNING_MESSAGE};
pub use endpoint::EndpointResolver;
pub use protocol::{ApiRequest, ApiResponse, HealthStatus, QueryContext, RequestKind, ResponseStatus};

// Host boundary
pub use commands::{
    context_before_cursor, BridgeCommand, CommandDispatcher, EditorContext, Host, MenuAction,
    COMPLETION_CONTEXT_LINES,
};

// Configuration and errors
pub use config::{
    BridgeConfig, SettingsStore, UserSettings, DEFAULT_AGENT_API_URL, DEFAULT_CANDIDATE_PORTS, DISCOVERY_FILE_NAME,
};
pub use error::{ApiError, SettingsError, StartError};
