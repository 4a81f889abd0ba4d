//! Tool dispatcher: validates MCP tool calls and routes them.
//!
//! Every call gets a fresh request id and its own tracing span. Failures are
//! returned to the caller as `{"status": "error", "message": ...}` payloads;
//! nothing a caller sends can take the server down. The final content always
//! passes the response circuit breaker.

pub mod catalog;
pub mod runner;
pub mod spawn;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::adapters::Adapter;
use crate::config::{BridgeConfig, MAX_PROMPT_CHARS};
use crate::error::{BridgeError, BridgeResult};
use crate::limits::enforce_response_limit;
use crate::server::{ContentItem, ToolCallResult, ToolDefinition};
pub use runner::{AgentRunner, LocalRunner};

/// Resolve the working directory for a call and check it against the
/// allow-list.
///
/// The path is fully resolved (`..` and symlinks collapsed) before the
/// containment check, so a link inside an allowed root that points outside
/// it is rejected. Relative paths are taken from `workspace`.
pub fn validate_cwd(config: &BridgeConfig, workspace: &Path, requested: Option<&str>) -> BridgeResult<PathBuf> {
    let requested = requested.map(str::trim).filter(|p| !p.is_empty());
    if requested.is_some_and(|p| p.contains('\0')) {
        return Err(BridgeError::validation("cwd contains null byte"));
    }
    let raw = match requested {
        Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
        Some(path) => workspace.join(path),
        None => workspace.to_path_buf(),
    };
    let resolved = raw.canonicalize().map_err(|e| {
        BridgeError::validation(format!("cwd is not accessible: {} ({e})", raw.display()))
    })?;
    if !resolved.is_dir() {
        return Err(BridgeError::validation(format!(
            "cwd is not a directory: {}",
            resolved.display()
        )));
    }
    if !config.permits(&resolved) {
        return Err(BridgeError::validation(format!(
            "cwd is not in OA_BRIDGE_ALLOWED_DIRS: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

pub fn validate_prompt(prompt: &str) -> BridgeResult<()> {
    if prompt.trim().is_empty() {
        return Err(BridgeError::validation("prompt cannot be empty"));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(BridgeError::validation(format!(
            "prompt exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(())
}

pub fn validate_thinking(adapter: Adapter, thinking: bool) -> BridgeResult<bool> {
    if thinking && !adapter.descriptor().supports_thinking {
        return Err(BridgeError::validation(format!(
            "{} adapter does not support thinking mode",
            adapter.name()
        )));
    }
    Ok(thinking)
}

/// Decode tool arguments; a missing argument object counts as empty.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> BridgeResult<T> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments)
        .map_err(|e| BridgeError::validation(format!("invalid arguments: {e}")))
}

/// Routes MCP tool calls to the bridge's tools.
pub struct ToolDispatcher {
    config: Arc<BridgeConfig>,
    /// Default working directory for calls without `cwd`.
    workspace: PathBuf,
    runner: Arc<dyn AgentRunner>,
}

impl ToolDispatcher {
    /// A dispatcher that runs agents on this host.
    pub fn new(config: Arc<BridgeConfig>, workspace: PathBuf) -> Self {
        let runner = Arc::new(LocalRunner::from_config(&config));
        Self::with_runner(config, workspace, runner)
    }

    pub fn with_runner(config: Arc<BridgeConfig>, workspace: PathBuf, runner: Arc<dyn AgentRunner>) -> Self {
        Self {
            config,
            workspace,
            runner,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub(crate) fn runner(&self) -> Arc<dyn AgentRunner> {
        Arc::clone(&self.runner)
    }

    pub(crate) fn resolve_cwd(&self, requested: Option<&str>) -> BridgeResult<PathBuf> {
        validate_cwd(&self.config, &self.workspace, requested)
    }

    /// All tools with their JSON Schema definitions.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools = vec![
            spawn::spawn_agent_definition(&self.config),
            spawn::spawn_agents_parallel_definition(&self.config),
        ];
        tools.extend(catalog::tool_definitions(&self.config));
        tools
    }

    /// Run a tool call to completion or until `cancel` fires.
    pub async fn call_tool(&self, name: &str, arguments: Value, cancel: CancellationToken) -> ToolCallResult {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("handle_tool", tool = name, request_id = request_id.as_str());

        let outcome = async {
            debug!("dispatching tool call");
            match name {
                "spawn_agent" => spawn::spawn_agent(self, arguments, &request_id, &cancel).await,
                "spawn_agents_parallel" => {
                    spawn::spawn_agents_parallel(self, arguments, &request_id, &cancel).await
                }
                "list_adapters" => catalog::list_adapters(self, &cancel).await,
                "list_models" => catalog::list_models(self, arguments, &cancel).await,
                "check_status" => catalog::check_status(self, arguments, &cancel).await,
                _ => Err(BridgeError::validation(format!("Unknown tool: {name}"))),
            }
        }
        .instrument(span.clone())
        .await;

        let _entered = span.enter();
        let (content, is_error) = match outcome {
            Ok(payload) => (vec![ContentItem::json(&payload)], false),
            Err(e) => {
                if e.is_validation() {
                    warn!(error = %e, "validation error");
                } else {
                    error!(error = %e, "tool call failed");
                }
                let payload = json!({"status": "error", "message": e.to_string()});
                (vec![ContentItem::json(&payload)], true)
            }
        };
        ToolCallResult {
            content: enforce_response_limit(content, name, self.config.max_response_bytes),
            is_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restricted(root: &Path) -> BridgeConfig {
        let mut cfg = BridgeConfig::default();
        cfg.allowed_dirs = Some(vec![root.canonicalize().expect("canonical root")]);
        cfg
    }

    #[test]
    fn test_cwd_defaults_to_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolved = validate_cwd(&BridgeConfig::default(), dir.path(), None).expect("cwd");
        assert_eq!(resolved, dir.path().canonicalize().expect("canonical"));
    }

    #[test]
    fn test_cwd_inside_allow_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("proj")).expect("mkdir");
        let cfg = restricted(dir.path());
        let resolved = validate_cwd(&cfg, dir.path(), Some("proj")).expect("cwd");
        assert!(resolved.ends_with("proj"));
    }

    #[test]
    fn test_cwd_dotdot_escape_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let allowed = dir.path().join("allowed");
        std::fs::create_dir(&allowed).expect("mkdir");
        std::fs::create_dir(dir.path().join("outside")).expect("mkdir");
        let cfg = restricted(&allowed);
        let err = validate_cwd(&cfg, &allowed, Some("../outside")).expect_err("escape");
        assert!(err.is_validation());
        assert!(err.to_string().contains("OA_BRIDGE_ALLOWED_DIRS"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cwd_symlink_escape_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let allowed = dir.path().join("allowed");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&allowed).expect("mkdir");
        std::fs::create_dir(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, allowed.join("escape")).expect("symlink");
        let cfg = restricted(&allowed);

        let path = allowed.join("escape");
        let err = validate_cwd(&cfg, &allowed, path.to_str()).expect_err("escape");
        assert!(err.is_validation());
    }

    #[test]
    fn test_sibling_prefix_is_not_containment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let allowed = dir.path().join("app");
        let sibling = dir.path().join("app-secrets");
        std::fs::create_dir(&allowed).expect("mkdir");
        std::fs::create_dir(&sibling).expect("mkdir");
        let cfg = restricted(&allowed);
        assert!(validate_cwd(&cfg, &allowed, sibling.to_str()).is_err());
    }

    #[test]
    fn test_unresolvable_allow_list_rejects_real_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = BridgeConfig::from_lookup(|key| {
            (key == "OA_BRIDGE_ALLOWED_DIRS").then(|| "/nonexistent/allowed".to_owned())
        });
        let err = validate_cwd(&cfg, dir.path(), Some("/etc")).expect_err("fails closed");
        assert!(err.is_validation());
        assert!(validate_cwd(&cfg, dir.path(), None).is_err());
    }

    #[test]
    fn test_missing_cwd_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = validate_cwd(&BridgeConfig::default(), dir.path(), Some("nope")).expect_err("missing");
        assert!(err.is_validation());
    }

    #[test]
    fn test_prompt_rules() {
        assert!(validate_prompt("fix the bug").is_ok());
        assert!(validate_prompt("   \n").is_err());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_CHARS)).is_ok());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_CHARS + 1)).is_err());
    }

    #[test]
    fn test_thinking_requires_support() {
        assert!(validate_thinking(Adapter::Kimi, true).expect("kimi"));
        assert!(!validate_thinking(Adapter::Codex, false).expect("off"));
        let err = validate_thinking(Adapter::Codex, true).expect_err("codex");
        assert_eq!(err.to_string(), "codex adapter does not support thinking mode");
    }

    #[tokio::test]
    async fn test_oversized_tool_response_trips_breaker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = BridgeConfig::default();
        cfg.max_response_bytes = 64;
        let dispatcher = ToolDispatcher::new(Arc::new(cfg), dir.path().to_path_buf());

        let result = dispatcher
            .call_tool("list_models", json!({"adapter": "codex"}), CancellationToken::new())
            .await;

        assert_eq!(result.content.len(), 1);
        let payload: Value = serde_json::from_str(&result.content[0].text).expect("json payload");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["message"], "Response payload too large");
        let breaker = &payload["circuit_breaker"];
        assert_eq!(breaker["triggered"], true);
        assert_eq!(breaker["tool"], "list_models");
        assert_eq!(breaker["max_bytes"], 64);
        assert!(breaker["original_bytes"].as_u64().is_some_and(|n| n > 64));
    }

    #[tokio::test]
    async fn test_response_within_limit_is_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dispatcher = ToolDispatcher::new(Arc::new(BridgeConfig::default()), dir.path().to_path_buf());

        let result = dispatcher
            .call_tool("list_models", json!({"adapter": "codex"}), CancellationToken::new())
            .await;

        assert!(!result.is_error);
        let payload: Value = serde_json::from_str(&result.content[0].text).expect("json payload");
        assert_eq!(payload["adapter"], "codex");
        assert!(payload.get("circuit_breaker").is_none());
    }
}
