//! HTTP client for the agent API.
//!
//! Every request goes to the resolver's current base URL. When nothing answers there, the client
//! walks the candidate ports in order and remembers the first one that does.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BridgeConfig, DEFAULT_CANDIDATE_PORTS};
use crate::endpoint::EndpointResolver;
use crate::error::ApiError;
use crate::protocol::{ApiRequest, ApiResponse, HealthStatus, QueryContext, RequestKind};

/// Shown when the agent answers 404: the endpoint is up but the agent service is not.
pub const SERVICES_NOT_RUNNING_MESSAGE: &str =
    "The AI agent API was not found (HTTP 404). The services do not appear to be running; start them and try again.";

/// Shown for every other transport or protocol failure.
pub const CONNECTIVITY_MESSAGE: &str =
    "Sorry, I could not reach the AI agent. Check that the services are running and that the agent API URL is correct.";

pub struct ApiClient {
    http: reqwest::Client,
    endpoint: Arc<EndpointResolver>,
    request_timeout: Duration,
    fallback_timeout: Duration,
    candidate_ports: Vec<u16>,
}

impl ApiClient {
    pub fn new(endpoint: Arc<EndpointResolver>) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint,
            request_timeout: Duration::from_secs(15),
            fallback_timeout: Duration::from_secs(5),
            candidate_ports: DEFAULT_CANDIDATE_PORTS.to_vec(),
        }
    }

    /// Client with timeouts and candidate ports taken from `config`.
    pub fn from_config(config: &BridgeConfig, endpoint: Arc<EndpointResolver>) -> Self {
        Self::new(endpoint)
            .with_timeouts(config.request_timeout(), config.fallback_timeout())
            .with_candidate_ports(config.candidate_ports.clone())
    }

    pub fn with_timeouts(mut self, request: Duration, fallback: Duration) -> Self {
        self.request_timeout = request;
        self.fallback_timeout = fallback;
        self
    }

    pub fn with_candidate_ports(mut self, ports: Vec<u16>) -> Self {
        self.candidate_ports = ports;
        self
    }

    pub fn endpoint(&self) -> &EndpointResolver {
        &self.endpoint
    }

    /// POST `request` to the current base URL plus `suffix`.
    ///
    /// A connection-level failure invalidates the cached URL and triggers the candidate scan. If no
    /// candidate answers, the original error is returned. HTTP error statuses are never retried.
    pub async fn call(&self, suffix: &str, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let base = self.endpoint.current_base_url().await;
        let url = format!("{}{}", base, suffix);

        match self.post(&url, request, self.request_timeout).await {
            Err(e) if e.is_connection() => {
                tracing::warn!(url = %url, error = %e, "agent API unreachable; scanning candidate ports");
                self.endpoint.invalidate().await;
                match self.scan_candidates(&base, suffix, request).await {
                    Some(response) => Ok(response),
                    None => {
                        tracing::error!(url = %url, "no candidate port answered");
                        Err(e)
                    }
                }
            }
            other => other,
        }
    }

    async fn scan_candidates(&self, base: &str, suffix: &str, request: &ApiRequest) -> Option<ApiResponse> {
        for &port in &self.candidate_ports {
            let Some(candidate) = with_port(base, port) else {
                tracing::warn!(base, port, "cannot derive candidate URL");
                continue;
            };
            let url = format!("{}{}", candidate, suffix);
            match self.post(&url, request, self.fallback_timeout).await {
                Ok(response) => {
                    tracing::info!(url = %url, "🔎 agent API found on candidate port");
                    if let Err(e) = self.endpoint.record_success(&candidate).await {
                        tracing::warn!(url = %candidate, error = %e, "could not persist discovered endpoint");
                    }
                    return Some(response);
                }
                Err(e) => tracing::debug!(url = %url, error = %e, "candidate port failed"),
            }
        }
        None
    }

    async fn post(&self, url: &str, request: &ApiRequest, timeout: Duration) -> Result<ApiResponse, ApiError> {
        tracing::debug!(url, kind = ?request.kind(), "POST agent API");
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|source| classify_send_error(url, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<ApiResponse>().await.map_err(|e| ApiError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// `GET /health` on the origin of the current base URL. True when the backend reports `ok`.
    pub async fn health(&self) -> Result<bool, ApiError> {
        let base = self.endpoint.current_base_url().await;
        let mut url = reqwest::Url::parse(&base).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base, e)))?;
        url.set_path("/health");
        url.set_query(None);
        let url = url.to_string();

        let response = self
            .http
            .get(&url)
            .timeout(self.fallback_timeout)
            .send()
            .await
            .map_err(|source| classify_send_error(&url, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                url,
                status: status.as_u16(),
            });
        }
        let body: HealthStatus = response.json().await.map_err(|e| ApiError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(body.status == "ok")
    }

    // ══════════════════════════════════════════════════════════════════════════════
    // Request wrappers. These never fail; every error becomes display text.
    // ══════════════════════════════════════════════════════════════════════════════

    pub async fn query(&self, question: &str, use_memory: bool) -> String {
        self.query_with_context(question, use_memory, None).await
    }

    /// General question with the active file attached as context.
    pub async fn query_with_context(&self, question: &str, use_memory: bool, context: Option<QueryContext>) -> String {
        let request = ApiRequest::GeneralQuery {
            query: question.to_string(),
            use_memory,
            context,
        };
        self.run(&request).await.unwrap_or_else(|message| message)
    }

    pub async fn explain_code(&self, code: &str, file_type: &str) -> String {
        let request = ApiRequest::CodeExplanation {
            code: code.to_string(),
            file_type: file_type.to_string(),
        };
        self.run(&request).await.unwrap_or_else(|message| message)
    }

    pub async fn complete_code(&self, code_context: &str, file_type: &str, request_text: &str) -> String {
        let request = ApiRequest::CodeCompletion {
            code_context: code_context.to_string(),
            file_type: file_type.to_string(),
            request: request_text.to_string(),
        };
        self.run(&request).await.unwrap_or_else(|message| message)
    }

    /// Improved code, or `code` unchanged when the agent reports an error.
    pub async fn improve_code(&self, code: &str, file_type: &str) -> String {
        let request = ApiRequest::CodeImprovement {
            code: code.to_string(),
            file_type: file_type.to_string(),
        };
        match self.call("", &request).await {
            Ok(response) if !response.is_success() => {
                tracing::warn!(message = ?response.message, "agent could not improve code; keeping original");
                code.to_string()
            }
            Ok(response) => response
                .into_result(RequestKind::CodeImprovement)
                .unwrap_or_else(|message| message),
            Err(e) => failure_message(&e),
        }
    }

    /// `Ok(result)` on success; `Err(text)` is the display text for any failure.
    async fn run(&self, request: &ApiRequest) -> Result<String, String> {
        match self.call("", request).await {
            Ok(response) => response.into_result(request.kind()),
            Err(e) => Err(failure_message(&e)),
        }
    }
}

fn classify_send_error(url: &str, source: reqwest::Error) -> ApiError {
    if source.is_builder() {
        ApiError::InvalidUrl(format!("{}: {}", url, source))
    } else {
        ApiError::Connection {
            url: url.to_string(),
            source,
        }
    }
}

/// `base` with its port replaced. Scheme, host, path and query are kept.
fn with_port(base: &str, port: u16) -> Option<String> {
    let mut url = reqwest::Url::parse(base).ok()?;
    url.set_port(Some(port)).ok()?;
    Some(url.to_string())
}

/// Display text for a failed call.
pub fn failure_message(err: &ApiError) -> String {
    tracing::warn!(error = %err, "agent request failed");
    match err.status() {
        Some(404) => SERVICES_NOT_RUNNING_MESSAGE.to_string(),
        _ => CONNECTIVITY_MESSAGE.to_string(),
    }
}
