//! Adapter registry: the closed set of coding-agent backends.
//!
//! Each backend is a variant of [`Adapter`] with an immutable
//! [`AdapterDescriptor`] and its own argv builder. The registry is the single
//! source of truth for which names are valid.
//!
//! Command builders never enforce capabilities (thinking support, provider
//! filters); that happens in validation one layer up. They only guarantee
//! that caller-supplied values cannot be parsed as flags.

pub mod codex;
pub mod gemini;
pub mod kimi;
pub mod opencode;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult};

/// Baseline execution timeout in seconds; descriptors that differ from it
/// take precedence over the global default.
pub const BASE_TIMEOUT_SECS: u64 = 600;

/// Environment keys every adapter may forward.
const COMMON_ENV_KEYS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "SHELL",
    "TMPDIR",
    "TMP",
    "TEMP",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "XDG_CACHE_HOME",
    "LC_ALL",
    "LC_CTYPE",
    "SSL_CERT_FILE",
    "REQUESTS_CA_BUNDLE",
    "CURL_CA_BUNDLE",
];

/// Static description of one backend CLI.
#[derive(Debug)]
pub struct AdapterDescriptor {
    pub name: &'static str,
    pub cli_command: &'static str,
    pub tool_description: &'static str,
    /// Backend-specific keys forwarded in addition to [`COMMON_ENV_KEYS`].
    pub extra_env_keys: &'static [&'static str],
    /// Lowercase substrings of stderr that indicate an authentication failure.
    pub auth_patterns: &'static [&'static str],
    pub auth_message: &'static str,
    pub install_hint: &'static str,
    pub supports_thinking: bool,
    pub supports_provider_filter: bool,
    pub known_models: &'static [&'static str],
    pub default_timeout_secs: u64,
    pub default_model: Option<&'static str>,
    pub default_reasoning_effort: Option<&'static str>,
}

impl AdapterDescriptor {
    /// All environment variable names this adapter may see.
    pub fn env_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        COMMON_ENV_KEYS
            .iter()
            .chain(self.extra_env_keys.iter())
            .copied()
    }

    /// Upper-case token used in per-adapter environment overrides.
    pub fn env_token(&self) -> String {
        self.name.to_ascii_uppercase()
    }
}

/// Model listing for one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCatalog {
    pub models: Vec<String>,
    pub source: CatalogSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    Static,
    Dynamic,
}

/// A known coding-agent backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Adapter {
    Kimi,
    Codex,
    Opencode,
    Gemini,
}

impl Adapter {
    /// Registry order.
    pub const ALL: [Self; 4] = [Self::Kimi, Self::Codex, Self::Opencode, Self::Gemini];

    pub const fn descriptor(self) -> &'static AdapterDescriptor {
        match self {
            Self::Kimi => &kimi::DESCRIPTOR,
            Self::Codex => &codex::DESCRIPTOR,
            Self::Opencode => &opencode::DESCRIPTOR,
            Self::Gemini => &gemini::DESCRIPTOR,
        }
    }

    pub const fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Build the argv for one execution.
    ///
    /// Deterministic for identical inputs. Fails with
    /// [`BridgeError::FlagInjection`] when `model` starts with `-`.
    pub fn build_command(
        self,
        prompt: &str,
        thinking: bool,
        model: Option<&str>,
        reasoning_effort: Option<&str>,
    ) -> BridgeResult<Vec<String>> {
        if let Some(model) = model {
            reject_flag("model", model)?;
        }
        let argv = match self {
            Self::Kimi => kimi::build_command(prompt, thinking, model),
            Self::Codex => codex::build_command(prompt, model, reasoning_effort),
            Self::Opencode => opencode::build_command(prompt, model),
            Self::Gemini => gemini::build_command(prompt, model),
        };
        Ok(argv)
    }

    /// Resolve the CLI on `PATH` without executing it.
    pub fn check_installed(self) -> (bool, Option<PathBuf>) {
        match which::which(self.descriptor().cli_command) {
            Ok(path) => (true, Some(path)),
            Err(_) => (false, None),
        }
    }

    /// List model options, statically or by asking the CLI.
    pub async fn list_models(
        self,
        cwd: &Path,
        provider: Option<&str>,
        refresh: bool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> BridgeResult<ModelCatalog> {
        match self {
            Self::Opencode => opencode::list_models(cwd, provider, refresh, timeout, cancel).await,
            Self::Kimi | Self::Codex | Self::Gemini => Ok(static_model_catalog(self.descriptor())),
        }
    }
}

/// Look up an adapter by name.
pub fn get(name: &str) -> BridgeResult<Adapter> {
    Adapter::ALL
        .into_iter()
        .find(|adapter| adapter.name() == name)
        .ok_or_else(|| BridgeError::UnknownAdapter {
            name: name.to_owned(),
            valid: names().into_iter().map(str::to_owned).collect(),
        })
}

/// Registered adapter names, in registry order.
pub fn names() -> Vec<&'static str> {
    Adapter::ALL.iter().map(|adapter| adapter.name()).collect()
}

/// A fresh copy of the descriptor's known models.
pub fn static_model_catalog(descriptor: &AdapterDescriptor) -> ModelCatalog {
    ModelCatalog {
        models: descriptor
            .known_models
            .iter()
            .map(|m| (*m).to_owned())
            .collect(),
        source: CatalogSource::Static,
    }
}

/// Reject values that would be parsed as a CLI flag.
pub fn reject_flag(field: &'static str, value: &str) -> BridgeResult<()> {
    if value.starts_with('-') {
        return Err(BridgeError::FlagInjection {
            field,
            value: value.to_owned(),
        });
    }
    Ok(())
}

/// Environment for a subprocess: whitelisted keys from `lookup`, plus `PATH`.
pub fn safe_env_from(
    descriptor: &AdapterDescriptor,
    lookup: impl Fn(&str) -> Option<String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = descriptor
        .env_keys()
        .filter_map(|key| lookup(key).map(|value| (key.to_owned(), value)))
        .collect();
    if !env.contains_key("PATH") {
        if let Some(path) = lookup("PATH") {
            env.insert("PATH".to_owned(), path);
        }
    }
    env
}

/// [`safe_env_from`] against the process environment.
pub fn safe_env(descriptor: &AdapterDescriptor) -> HashMap<String, String> {
    safe_env_from(descriptor, |key| std::env::var(key).ok())
}
