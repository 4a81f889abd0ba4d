//! Catalog tools: `list_adapters`, `list_models`, `check_status`.

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::{ToolDispatcher, parse_args};
use crate::adapters::{self, Adapter};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::exec::ExecutionRequest;
use crate::result::{AgentResult, AgentStatus};
use crate::server::ToolDefinition;

const STATUS_PROMPT: &str = "status check";

#[derive(Debug, Default, Deserialize)]
struct AdapterParams {
    #[serde(default)]
    adapter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelParams {
    #[serde(default)]
    adapter: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    refresh: bool,
}

/// Outcome of a short authenticated run of the adapter's CLI.
enum StatusCheck {
    NotInstalled,
    Ran(AgentResult),
}

async fn status_check(dispatcher: &ToolDispatcher, adapter: Adapter, cancel: &CancellationToken) -> BridgeResult<StatusCheck> {
    let runner = dispatcher.runner();
    if !runner.is_installed(adapter) {
        return Ok(StatusCheck::NotInstalled);
    }
    let request = ExecutionRequest {
        cwd: dispatcher.resolve_cwd(None)?,
        prompt: STATUS_PROMPT.to_owned(),
        thinking: false,
        timeout: dispatcher.config().status_check_timeout(),
        model: None,
        reasoning_effort: None,
        agent_index: 0,
    };
    Ok(StatusCheck::Ran(runner.run_status_check(adapter, request, cancel.child_token()).await))
}

pub async fn list_adapters(dispatcher: &ToolDispatcher, cancel: &CancellationToken) -> BridgeResult<Value> {
    let mut entries = Vec::with_capacity(Adapter::ALL.len());
    for adapter in Adapter::ALL {
        let descriptor = adapter.descriptor();
        let (installed, authenticated) = match status_check(dispatcher, adapter, cancel).await? {
            StatusCheck::NotInstalled => (false, false),
            StatusCheck::Ran(result) => (true, result.status == AgentStatus::Success),
        };
        entries.push(json!({
            "name": descriptor.name,
            "description": descriptor.tool_description,
            "supports_thinking": descriptor.supports_thinking,
            "known_models": descriptor.known_models,
            "installed": installed,
            "authenticated": authenticated,
        }));
    }
    Ok(Value::Array(entries))
}

pub async fn list_models(
    dispatcher: &ToolDispatcher,
    arguments: Value,
    cancel: &CancellationToken,
) -> BridgeResult<Value> {
    let params: ModelParams = parse_args(arguments)?;
    let adapter = dispatcher.config().adapter(params.adapter.as_deref())?;
    let descriptor = adapter.descriptor();
    let provider = params
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if provider.is_some() && !descriptor.supports_provider_filter {
        return Err(BridgeError::validation(format!(
            "{} adapter does not support provider filtering",
            descriptor.name
        )));
    }
    let cwd = dispatcher.resolve_cwd(None)?;
    let timeout = dispatcher.config().status_check_timeout();
    let catalog = adapter
        .list_models(&cwd, provider, params.refresh, timeout, cancel)
        .await?;

    let mut payload = json!({
        "adapter": descriptor.name,
        "models": catalog.models,
        "source": catalog.source,
    });
    if let Some(default_model) = descriptor.default_model {
        payload["default_model"] = json!(default_model);
    }
    if let Some(provider) = provider {
        payload["provider"] = json!(provider);
    }
    Ok(payload)
}

pub async fn check_status(
    dispatcher: &ToolDispatcher,
    arguments: Value,
    cancel: &CancellationToken,
) -> BridgeResult<Value> {
    let params: AdapterParams = parse_args(arguments)?;
    let adapter = dispatcher.config().adapter(params.adapter.as_deref())?;
    let descriptor = adapter.descriptor();
    let payload = match status_check(dispatcher, adapter, cancel).await? {
        StatusCheck::NotInstalled => json!({
            "status": "error",
            "message": format!("{} CLI not found. Install: {}", descriptor.name, descriptor.install_hint),
        }),
        StatusCheck::Ran(result) => match result.status {
            AgentStatus::Success => json!({
                "status": "success",
                "message": format!("{} CLI available and authenticated", descriptor.name),
            }),
            AgentStatus::AuthError => json!({
                "status": "auth_error",
                "message": descriptor.auth_message,
            }),
            _ => json!({
                "status": "error",
                "message": format!("{} CLI error", descriptor.name),
                "details": result.to_value(),
            }),
        },
    };
    Ok(payload)
}

fn adapter_property(description: &str) -> Value {
    json!({
        "type": "string",
        "enum": adapters::names(),
        "description": description,
    })
}

pub fn tool_definitions(config: &BridgeConfig) -> Vec<ToolDefinition> {
    let status_target = config
        .adapter(None)
        .map_or(crate::config::DEFAULT_ADAPTER, Adapter::name);
    vec![
        ToolDefinition {
            name: "list_adapters".to_owned(),
            description: "List available adapters and their status".to_owned(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "list_models".to_owned(),
            description: "List model options for an adapter (static and/or dynamic catalogs)."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "adapter": adapter_property("Adapter to list models for. Defaults to OA_BRIDGE_ADAPTER."),
                    "provider": {
                        "type": "string",
                        "description": "Optional provider filter (opencode only), e.g. 'openrouter'."
                    },
                    "refresh": {
                        "type": "boolean",
                        "description": "Refresh the catalog from the CLI where supported.",
                        "default": false
                    }
                }
            }),
        },
        ToolDefinition {
            name: "check_status".to_owned(),
            description: format!("Verify {status_target} CLI is installed and authenticated"),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "adapter": adapter_property("Adapter to check. Defaults to OA_BRIDGE_ADAPTER.")
                }
            }),
        },
    ]
}
