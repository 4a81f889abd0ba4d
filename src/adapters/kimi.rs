//! Kimi CLI adapter.

use super::{AdapterDescriptor, BASE_TIMEOUT_SECS};

pub static DESCRIPTOR: AdapterDescriptor = AdapterDescriptor {
    name: "kimi",
    cli_command: "kimi",
    tool_description: "Spawn a Kimi K2.5 agent in the current directory. \
        Kimi excels at frontend development and visual coding.",
    extra_env_keys: &["KIMI_CONFIG_PATH"],
    auth_patterns: &[
        "login required",
        "unauthorized",
        "authentication failed",
        "401",
        "403",
    ],
    auth_message: "Run: kimi login",
    install_hint: "uv tool install kimi-cli",
    supports_thinking: true,
    supports_provider_filter: false,
    known_models: &["kimi-k2.5"],
    default_timeout_secs: BASE_TIMEOUT_SECS,
    default_model: None,
    default_reasoning_effort: None,
};

/// `kimi --print [--thinking] [-m MODEL] --prompt PROMPT`
///
/// The prompt is the value of `--prompt`, so a leading `-` is harmless.
pub fn build_command(prompt: &str, thinking: bool, model: Option<&str>) -> Vec<String> {
    let mut cmd = vec![DESCRIPTOR.cli_command.to_owned(), "--print".to_owned()];
    if thinking {
        cmd.push("--thinking".to_owned());
    }
    if let Some(model) = model {
        cmd.extend(["-m".to_owned(), model.to_owned()]);
    }
    cmd.extend(["--prompt".to_owned(), prompt.to_owned()]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        assert_eq!(
            build_command("hello world", false, None),
            ["kimi", "--print", "--prompt", "hello world"]
        );
    }

    #[test]
    fn test_thinking_and_model() {
        assert_eq!(
            build_command("hello world", true, Some("kimi-k2.5")),
            ["kimi", "--print", "--thinking", "-m", "kimi-k2.5", "--prompt", "hello world"]
        );
    }

    #[test]
    fn test_dash_prompt_stays_a_value() {
        let cmd = build_command("-n --help", false, None);
        assert_eq!(cmd[cmd.len() - 2..], ["--prompt", "-n --help"]);
    }
}
