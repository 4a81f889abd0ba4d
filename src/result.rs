//! Agent execution results.
//!
//! [`AgentResult`] is built once per execution attempt and never mutated
//! afterwards; annotation helpers consume the value and hand back a new one.

use serde::Serialize;
use serde_json::{Map, Value};

/// Return code used for infrastructure-level failures (spawn, timeout, cancel).
pub const INFRA_RETURNCODE: i32 = -1;

/// Terminal state of one agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Error,
    AuthError,
    Timeout,
    Cancelled,
}

impl AgentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::AuthError => "auth_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one agent execution, serialized as-is across the MCP boundary.
///
/// `stderr` is always present in the payload (possibly `null`); `message`,
/// `raw` and `request_id` only when set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub output: String,
    pub stderr: Option<String>,
    pub returncode: i32,
    pub duration_ms: u64,
    pub agent_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AgentResult {
    /// An infrastructure failure: empty output, `-1` return code.
    pub fn infra_error(agent_index: usize, stderr: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: AgentStatus::Error,
            output: String::new(),
            stderr: Some(stderr.into()),
            returncode: INFRA_RETURNCODE,
            duration_ms,
            agent_index,
            message: None,
            raw: None,
            request_id: None,
        }
    }

    pub const fn cancelled(agent_index: usize) -> Self {
        Self {
            status: AgentStatus::Cancelled,
            output: String::new(),
            stderr: None,
            returncode: INFRA_RETURNCODE,
            duration_ms: 0,
            agent_index,
            message: None,
            raw: None,
            request_id: None,
        }
    }

    /// Copy with one more entry in the annotation bag.
    #[must_use]
    pub fn with_raw_entry(mut self, key: &str, value: Value) -> Self {
        self.raw
            .get_or_insert_with(Map::new)
            .insert(key.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_owned());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({"status": "error", "message": format!("failed to serialize result: {e}")})
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> AgentResult {
        AgentResult {
            status: AgentStatus::Success,
            output: "done".to_owned(),
            stderr: None,
            returncode: 0,
            duration_ms: 100,
            agent_index: 0,
            message: None,
            raw: None,
            request_id: None,
        }
    }

    #[test]
    fn test_base_fields_only() {
        let value = base().to_value();
        assert_eq!(
            value,
            json!({
                "status": "success",
                "output": "done",
                "stderr": null,
                "returncode": 0,
                "duration_ms": 100,
                "agent_index": 0
            })
        );
    }

    #[test]
    fn test_optional_fields_present_when_set() {
        let value = base()
            .with_message("Run: kimi login")
            .with_raw_entry("quality_signals", json!({"has_diff": true}))
            .with_request_id("req-1")
            .to_value();
        assert_eq!(value["message"], "Run: kimi login");
        assert_eq!(value["raw"]["quality_signals"]["has_diff"], true);
        assert_eq!(value["request_id"], "req-1");
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(json!(AgentStatus::AuthError), json!("auth_error"));
        assert_eq!(AgentStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_cancelled_shape() {
        let result = AgentResult::cancelled(3);
        assert_eq!(result.status, AgentStatus::Cancelled);
        assert_eq!(result.returncode, INFRA_RETURNCODE);
        assert_eq!(result.agent_index, 3);
        assert!(result.output.is_empty());
    }
}
