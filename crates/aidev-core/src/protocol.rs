//! Wire envelopes for the agent's single POST endpoint.

use serde::{Deserialize, Serialize};

/// Request envelope. The `type` discriminator selects the backend handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiRequest {
    GeneralQuery {
        query: String,
        use_memory: bool,
        /// Optional file context (`{"file": ..., "language": ...}`) the backend folds into the prompt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<QueryContext>,
    },
    CodeExplanation {
        code: String,
        file_type: String,
    },
    CodeCompletion {
        code_context: String,
        file_type: String,
        request: String,
    },
    CodeImprovement {
        code: String,
        file_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub file: String,
    pub language: String,
}

/// Which result field a request kind expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    GeneralQuery,
    CodeExplanation,
    CodeCompletion,
    CodeImprovement,
}

impl ApiRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            ApiRequest::GeneralQuery { .. } => RequestKind::GeneralQuery,
            ApiRequest::CodeExplanation { .. } => RequestKind::CodeExplanation,
            ApiRequest::CodeCompletion { .. } => RequestKind::CodeCompletion,
            ApiRequest::CodeImprovement { .. } => RequestKind::CodeImprovement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Response envelope. On success exactly one result field is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<String>,
    /// Older backends reply with `improved_code`.
    #[serde(default, alias = "improved_code", skip_serializing_if = "Option::is_none")]
    pub improvements: Option<String>,
}

impl ApiResponse {
    pub fn success(field: RequestKind, text: impl Into<String>) -> Self {
        let mut out = Self {
            status: ResponseStatus::Success,
            message: None,
            response: None,
            explanation: None,
            completion: None,
            improvements: None,
        };
        let text = Some(text.into());
        match field {
            RequestKind::GeneralQuery => out.response = text,
            RequestKind::CodeExplanation => out.explanation = text,
            RequestKind::CodeCompletion => out.completion = text,
            RequestKind::CodeImprovement => out.improvements = text,
        }
        out
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
            response: None,
            explanation: None,
            completion: None,
            improvements: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Result text for `kind`: the generic `response` field first, then the kind-specific one.
    pub fn result_for(&self, kind: RequestKind) -> Option<&str> {
        let specific = match kind {
            RequestKind::GeneralQuery => None,
            RequestKind::CodeExplanation => self.explanation.as_deref(),
            RequestKind::CodeCompletion => self.completion.as_deref(),
            RequestKind::CodeImprovement => self.improvements.as_deref(),
        };
        self.response.as_deref().or(specific)
    }

    /// Interpret the envelope: `Ok(text)` on success, `Err(message)` on `status: "error"`.
    pub fn into_result(self, kind: RequestKind) -> Result<String, String> {
        if !self.is_success() {
            return Err(self
                .message
                .unwrap_or_else(|| "The agent reported an error without a message.".to_string()));
        }
        match self.result_for(kind) {
            Some(text) => Ok(text.to_string()),
            None => Err("The agent returned an empty response.".to_string()),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_type_discriminator() {
        let req = ApiRequest::CodeImprovement {
            code: "x=1".to_string(),
            file_type: "python".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"type": "code_improvement", "code": "x=1", "file_type": "python"}));

        let query = ApiRequest::GeneralQuery {
            query: "hello".to_string(),
            use_memory: true,
            context: None,
        };
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value, json!({"type": "general_query", "query": "hello", "use_memory": true}));
    }

    #[test]
    fn completion_field_names() {
        let req = ApiRequest::CodeCompletion {
            code_context: "fn main() {".to_string(),
            file_type: "rust".to_string(),
            request: "print hello".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "code_completion");
        assert_eq!(value["code_context"], "fn main() {");
        assert_eq!(value["request"], "print hello");
    }

    #[test]
    fn response_prefers_generic_field_then_specific() {
        let resp: ApiResponse =
            serde_json::from_value(json!({"status": "success", "explanation": "it adds"})).unwrap();
        assert_eq!(resp.result_for(RequestKind::CodeExplanation), Some("it adds"));
        assert_eq!(resp.result_for(RequestKind::GeneralQuery), None);

        let resp: ApiResponse =
            serde_json::from_value(json!({"status": "success", "response": "generic", "completion": "x"})).unwrap();
        assert_eq!(resp.result_for(RequestKind::CodeCompletion), Some("generic"));
    }

    #[test]
    fn improved_code_alias_is_accepted() {
        let resp: ApiResponse =
            serde_json::from_value(json!({"status": "success", "improved_code": "x = 1"})).unwrap();
        assert_eq!(resp.into_result(RequestKind::CodeImprovement), Ok("x = 1".to_string()));
    }

    #[test]
    fn error_status_surfaces_message() {
        let resp: ApiResponse = serde_json::from_value(json!({"status": "error", "message": "boom"})).unwrap();
        assert_eq!(resp.into_result(RequestKind::GeneralQuery), Err("boom".to_string()));
    }
}
