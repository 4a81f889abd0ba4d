//! OpenCode CLI adapter.
//!
//! OpenCode fronts many providers; models use the `provider/model` form
//! (for example `openrouter/minimax/minimax-m2.5`). It is the only adapter
//! with a dynamic model catalog.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AdapterDescriptor, CatalogSource, ModelCatalog, reject_flag, safe_env};
use crate::error::{BridgeError, BridgeResult};

pub static DESCRIPTOR: AdapterDescriptor = AdapterDescriptor {
    name: "opencode",
    cli_command: "opencode",
    tool_description: "Spawn an OpenCode agent to execute tasks. \
        OpenCode supports many providers; models use the 'provider/model' form \
        (example: 'openrouter/minimax/minimax-m2.5').",
    extra_env_keys: &[
        "OPENCODE_CONFIG",
        "OPENCODE_CONFIG_DIR",
        "OPENCODE_CONFIG_CONTENT",
        "OPENROUTER_API_KEY",
    ],
    auth_patterns: &[
        "unauthorized",
        "authentication",
        "api key",
        "not authenticated",
        "login required",
        "401",
        "403",
    ],
    auth_message: "Run: opencode auth login",
    install_hint: "curl -fsSL https://opencode.ai/install | bash",
    supports_thinking: false,
    supports_provider_filter: true,
    known_models: &["openrouter/minimax/minimax-m2.5"],
    // Multi-step agent loops.
    default_timeout_secs: 1200,
    default_model: Some("openrouter/minimax/minimax-m2.5"),
    default_reasoning_effort: None,
};

#[allow(clippy::expect_used)]
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("ANSI escape pattern is valid")
});

/// `opencode run [-m MODEL] -- PROMPT`
pub fn build_command(prompt: &str, model: Option<&str>) -> Vec<String> {
    let mut cmd = vec![DESCRIPTOR.cli_command.to_owned(), "run".to_owned()];
    if let Some(model) = model {
        cmd.extend(["-m".to_owned(), model.to_owned()]);
    }
    cmd.extend(["--".to_owned(), prompt.to_owned()]);
    cmd
}

/// `opencode models [PROVIDER] [--refresh]`
pub fn models_command(provider: Option<&str>, refresh: bool) -> BridgeResult<Vec<String>> {
    let mut cmd = vec![DESCRIPTOR.cli_command.to_owned(), "models".to_owned()];
    if let Some(provider) = provider {
        reject_flag("provider", provider)?;
        cmd.push(provider.to_owned());
    }
    if refresh {
        cmd.push("--refresh".to_owned());
    }
    Ok(cmd)
}

/// Ask the CLI for its model list.
pub async fn list_models(
    cwd: &Path,
    provider: Option<&str>,
    refresh: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> BridgeResult<ModelCatalog> {
    let argv = models_command(provider, refresh)?;
    debug!(?argv, "listing opencode models");

    let stdout = capture_listing(&argv, cwd, safe_env(&DESCRIPTOR), timeout, cancel).await?;
    let models = parse_model_listing(&stdout);
    if models.is_empty() {
        return Err(listing_failed("no models returned".to_owned()));
    }
    Ok(ModelCatalog {
        models,
        source: CatalogSource::Dynamic,
    })
}

fn listing_failed(reason: String) -> BridgeError {
    BridgeError::Subprocess {
        command: "opencode models".to_owned(),
        reason,
    }
}

/// Run `argv` and return its stdout. Dropping the child on timeout or
/// cancellation kills it.
async fn capture_listing(
    argv: &[String],
    cwd: &Path,
    env: HashMap<String, String>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> BridgeResult<String> {
    let Some((program, args)) = argv.split_first() else {
        return Err(listing_failed("empty command".to_owned()));
    };
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(listing_failed("cancelled".to_owned())),
        res = tokio::time::timeout(timeout, cmd.output()) => res
            .map_err(|_| listing_failed(format!("timed out after {}s", timeout.as_secs())))?
            .map_err(|e| listing_failed(e.to_string()))?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("unknown error")
            .to_owned();
        return Err(listing_failed(message));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// One model per line; ANSI colour codes and usage banners dropped.
pub fn parse_model_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| ANSI_ESCAPE.replace_all(line, "").trim().to_owned())
        .filter(|line| !line.is_empty() && !line.starts_with("Usage:"))
        .collect()
}
