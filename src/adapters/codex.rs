//! Codex CLI adapter.

use super::{AdapterDescriptor, BASE_TIMEOUT_SECS};

pub static DESCRIPTOR: AdapterDescriptor = AdapterDescriptor {
    name: "codex",
    cli_command: "codex",
    tool_description: "Spawn a Codex agent to execute tasks. \
        Codex excels at code implementation and automated development workflows.",
    extra_env_keys: &["OPENAI_API_KEY"],
    auth_patterns: &[
        "unauthorized",
        "authentication",
        "api key",
        "invalid key",
        "not logged in",
        "401",
        "403",
    ],
    auth_message: "Run: codex login",
    install_hint: "See https://github.com/openai/codex",
    supports_thinking: false,
    supports_provider_filter: false,
    known_models: &["gpt-5.3-codex", "gpt-5.2-codex", "gpt-5.2"],
    default_timeout_secs: BASE_TIMEOUT_SECS,
    default_model: Some("gpt-5.3-codex"),
    default_reasoning_effort: Some("xhigh"),
};

/// `codex exec --skip-git-repo-check --full-auto [-m MODEL] [-c model_reasoning_effort="E"] -- PROMPT`
///
/// The prompt is positional, hence the `--` separator.
pub fn build_command(
    prompt: &str,
    model: Option<&str>,
    reasoning_effort: Option<&str>,
) -> Vec<String> {
    let mut cmd: Vec<String> = [
        DESCRIPTOR.cli_command,
        "exec",
        "--skip-git-repo-check",
        "--full-auto",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();
    if let Some(model) = model {
        cmd.extend(["-m".to_owned(), model.to_owned()]);
    }
    if let Some(effort) = reasoning_effort {
        cmd.extend([
            "-c".to_owned(),
            format!("model_reasoning_effort=\"{effort}\""),
        ]);
    }
    cmd.extend(["--".to_owned(), prompt.to_owned()]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        assert_eq!(
            build_command("hello world", None, None),
            ["codex", "exec", "--skip-git-repo-check", "--full-auto", "--", "hello world"]
        );
    }

    #[test]
    fn test_model_and_effort() {
        assert_eq!(
            build_command("hello world", Some("gpt-5.2-codex"), Some("high")),
            [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--full-auto",
                "-m",
                "gpt-5.2-codex",
                "-c",
                "model_reasoning_effort=\"high\"",
                "--",
                "hello world"
            ]
        );
    }

    #[test]
    fn test_dash_prompt_after_separator() {
        let cmd = build_command("-n --help", None, None);
        assert_eq!(cmd[cmd.len() - 2..], ["--", "-n --help"]);
    }
}
