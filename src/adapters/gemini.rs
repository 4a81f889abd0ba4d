//! Gemini CLI adapter.

use super::AdapterDescriptor;

pub static DESCRIPTOR: AdapterDescriptor = AdapterDescriptor {
    name: "gemini",
    cli_command: "gemini",
    tool_description: "Spawn a Gemini CLI agent to execute tasks. \
        Gemini supports fast multimodal and coding workflows.",
    extra_env_keys: &[
        "GEMINI_API_KEY",
        "GOOGLE_API_KEY",
        "GOOGLE_CLOUD_PROJECT",
        "GOOGLE_CLOUD_LOCATION",
        "GOOGLE_GENAI_USE_VERTEXAI",
    ],
    auth_patterns: &[
        "unauthorized",
        "authentication",
        "api key",
        "login required",
        "not authenticated",
        "401",
        "403",
    ],
    auth_message: "Run: gemini (complete login flow) or set GEMINI_API_KEY",
    install_hint: "npm install -g @google/gemini-cli",
    supports_thinking: false,
    supports_provider_filter: false,
    known_models: &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"],
    default_timeout_secs: 1200,
    default_model: Some("gemini-2.5-pro"),
    default_reasoning_effort: None,
};

/// `gemini --approval-mode yolo --output-format text [-m MODEL] -p PROMPT`
pub fn build_command(prompt: &str, model: Option<&str>) -> Vec<String> {
    let mut cmd: Vec<String> = [
        DESCRIPTOR.cli_command,
        "--approval-mode",
        "yolo",
        "--output-format",
        "text",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();
    if let Some(model) = model {
        cmd.extend(["-m".to_owned(), model.to_owned()]);
    }
    cmd.extend(["-p".to_owned(), prompt.to_owned()]);
    cmd
}
