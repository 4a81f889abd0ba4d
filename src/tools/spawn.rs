//! `spawn_agent` and `spawn_agents_parallel`.
//!
//! Every spec in a call is validated and resolved before anything is
//! launched. A single call is a batch of one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ToolDispatcher, parse_args, validate_prompt, validate_thinking};
use crate::adapters::{self, Adapter};
use crate::config::{BridgeConfig, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS, REASONING_EFFORTS};
use crate::error::{BridgeError, BridgeResult};
use crate::exec::ExecutionRequest;
use crate::result::AgentResult;
use crate::server::ToolDefinition;

/// How long a cancelled batch waits for its agents to report back before
/// their tasks are aborted.
const CANCEL_SETTLE: Duration = Duration::from_secs(5);

/// Arguments for one agent execution.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub prompt: String,
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParallelParams {
    agents: Vec<AgentSpec>,
}

/// A validated execution waiting to be launched.
#[derive(Debug)]
pub struct PlannedRun {
    pub adapter: Adapter,
    pub request: ExecutionRequest,
}

/// Validate `spec` and resolve its per-call settings.
pub fn plan(dispatcher: &ToolDispatcher, spec: &AgentSpec, agent_index: usize) -> BridgeResult<PlannedRun> {
    let config = dispatcher.config();
    let adapter = config.adapter(spec.adapter.as_deref())?;
    validate_prompt(&spec.prompt)?;
    let thinking = validate_thinking(adapter, spec.thinking)?;
    let timeout = config.resolve_timeout(adapter, spec.timeout_seconds)?;
    let model = config.resolve_model(adapter, spec.model.as_deref())?;
    let reasoning_effort = config.resolve_reasoning_effort(adapter, spec.reasoning_effort.as_deref())?;
    let cwd = dispatcher.resolve_cwd(spec.cwd.as_deref())?;
    Ok(PlannedRun {
        adapter,
        request: ExecutionRequest {
            cwd,
            prompt: spec.prompt.clone(),
            thinking,
            timeout,
            model,
            reasoning_effort,
            agent_index,
        },
    })
}

pub async fn spawn_agent(
    dispatcher: &ToolDispatcher,
    arguments: Value,
    request_id: &str,
    cancel: &CancellationToken,
) -> BridgeResult<Value> {
    let spec: AgentSpec = parse_args(arguments)?;
    let planned = plan(dispatcher, &spec, 0)?;
    let mut results = run_batch(dispatcher, vec![planned], request_id, cancel).await;
    let result = results
        .pop()
        .unwrap_or_else(|| AgentResult::cancelled(0).with_request_id(request_id));
    Ok(result.to_value())
}

pub async fn spawn_agents_parallel(
    dispatcher: &ToolDispatcher,
    arguments: Value,
    request_id: &str,
    cancel: &CancellationToken,
) -> BridgeResult<Value> {
    let params: ParallelParams = parse_args(arguments)?;
    let max_agents = dispatcher.config().max_agents;
    if params.agents.is_empty() {
        return Err(BridgeError::validation("agents cannot be empty"));
    }
    if params.agents.len() > max_agents {
        return Err(BridgeError::validation(format!("Max {max_agents} agents allowed")));
    }
    let planned = params
        .agents
        .iter()
        .enumerate()
        .map(|(index, spec)| plan(dispatcher, spec, index))
        .collect::<BridgeResult<Vec<_>>>()?;
    let results = run_batch(dispatcher, planned, request_id, cancel).await;
    Ok(Value::Array(results.iter().map(AgentResult::to_value).collect()))
}

/// Launch every planned run concurrently and collect results in index order.
///
/// Runs whose CLI is not installed short-circuit to an error result without
/// being launched. When `cancel` fires, agents still running are told to
/// stop; any index without a terminal result comes back `cancelled`.
pub async fn run_batch(
    dispatcher: &ToolDispatcher,
    planned: Vec<PlannedRun>,
    request_id: &str,
    cancel: &CancellationToken,
) -> Vec<AgentResult> {
    let runner = dispatcher.runner();
    let mut finished: BTreeMap<usize, AgentResult> = BTreeMap::new();
    let mut launched = Vec::with_capacity(planned.len());
    let mut tasks = JoinSet::new();

    for PlannedRun { adapter, request } in planned {
        let index = request.agent_index;
        if !runner.is_installed(adapter) {
            let descriptor = adapter.descriptor();
            warn!(agent_index = index, adapter = descriptor.name, "adapter CLI not installed");
            let message = format!(
                "{} CLI not found. Install: {}",
                descriptor.name, descriptor.install_hint
            );
            finished.insert(index, AgentResult::infra_error(index, message, 0));
            continue;
        }
        launched.push(index);
        let runner = Arc::clone(&runner);
        let token = cancel.child_token();
        tasks.spawn(async move { (index, runner.run(adapter, request, token).await) });
    }

    let cancelled = loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break false,
                Some(Ok((index, result))) => {
                    finished.insert(index, result);
                }
                Some(Err(e)) => error!(error = %e, "agent task failed"),
            },
            () = cancel.cancelled() => break true,
        }
    };

    if cancelled {
        info!(pending = tasks.len(), "call cancelled, stopping agents");
        let settled = tokio::time::timeout(CANCEL_SETTLE, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok((index, result)) = joined {
                    finished.insert(index, result);
                }
            }
        })
        .await;
        if settled.is_err() {
            tasks.abort_all();
        }
    }

    for index in launched {
        finished.entry(index).or_insert_with(|| {
            if cancelled {
                AgentResult::cancelled(index)
            } else {
                AgentResult::infra_error(index, "agent task failed", 0)
            }
        });
    }
    finished
        .into_values()
        .map(|result| result.with_request_id(request_id))
        .collect()
}

fn agent_properties(config: &BridgeConfig) -> Value {
    let mut timeout = json!({
        "type": "integer",
        "description": "Max execution time (30-3600s). Adapter-specific defaults apply when unset.",
        "minimum": MIN_TIMEOUT_SECS,
        "maximum": MAX_TIMEOUT_SECS,
    });
    if (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&config.default_timeout_secs) {
        timeout["default"] = json!(config.default_timeout_secs);
    }
    json!({
        "prompt": {
            "type": "string",
            "description": "Instructions for the agent (task, context, constraints)"
        },
        "adapter": {
            "type": "string",
            "enum": adapters::names(),
            "description": "Backend to use. Defaults to OA_BRIDGE_ADAPTER (kimi when unset)."
        },
        "thinking": {
            "type": "boolean",
            "description": "Enable extended reasoning mode for complex tasks",
            "default": false
        },
        "timeout_seconds": timeout,
        "model": {
            "type": "string",
            "description": "Model to use. Falls back to OA_BRIDGE_{ADAPTER}_MODEL or OA_BRIDGE_MODEL."
        },
        "reasoning_effort": {
            "type": "string",
            "enum": REASONING_EFFORTS,
            "description": "Reasoning effort for Codex. Ignored by other adapters."
        },
        "cwd": {
            "type": "string",
            "description": "Working directory for the agent. Defaults to the server workspace."
        }
    })
}

fn default_description(config: &BridgeConfig) -> &'static str {
    config
        .adapter(None)
        .map_or(adapters::kimi::DESCRIPTOR.tool_description, |adapter| {
            adapter.descriptor().tool_description
        })
}

pub fn spawn_agent_definition(config: &BridgeConfig) -> ToolDefinition {
    ToolDefinition {
        name: "spawn_agent".to_owned(),
        description: default_description(config).to_owned(),
        input_schema: json!({
            "type": "object",
            "properties": agent_properties(config),
            "required": ["prompt"]
        }),
    }
}

pub fn spawn_agents_parallel_definition(config: &BridgeConfig) -> ToolDefinition {
    ToolDefinition {
        name: "spawn_agents_parallel".to_owned(),
        description: format!("{} Run multiple agents in parallel.", default_description(config)),
        input_schema: json!({
            "type": "object",
            "properties": {
                "agents": {
                    "type": "array",
                    "description": "Agent specs; results come back in the same order",
                    "minItems": 1,
                    "maxItems": config.max_agents,
                    "items": {
                        "type": "object",
                        "properties": agent_properties(config),
                        "required": ["prompt"]
                    }
                }
            },
            "required": ["agents"]
        }),
    }
}
