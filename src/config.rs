//! Server configuration captured from `OA_BRIDGE_*` environment variables.
//!
//! The environment is read once, through a lookup function, and the result
//! is shared read-only. Per-call values (timeout, model, reasoning effort)
//! are resolved through precedence chains: explicit argument, then the
//! adapter-specific variable, then the global variable, then the adapter's
//! own default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::adapters::{self, Adapter, BASE_TIMEOUT_SECS};
use crate::error::{BridgeError, BridgeResult};
use crate::exec::OutputLimits;
use crate::sandbox::{DEFAULT_MAX_COPY_BYTES, DEFAULT_MAX_DIFF_BYTES, SandboxOptions};

pub const ENV_PREFIX: &str = "OA_BRIDGE_";

pub const DEFAULT_ADAPTER: &str = "kimi";
pub const MIN_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 3600;
pub const MAX_PROMPT_CHARS: usize = 100_000;
pub const DEFAULT_MAX_AGENTS: usize = 10;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 2_000_000;
/// Status checks never wait longer than this.
pub const STATUS_CHECK_TIMEOUT_CAP_SECS: u64 = 60;
pub const REASONING_EFFORTS: &[&str] = &["low", "medium", "high", "xhigh"];

const ADAPTER_SUFFIXES: &[&str] = &["TIMEOUT", "MODEL", "REASONING_EFFORT"];

fn var_name(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

fn adapter_var_name(adapter: Adapter, suffix: &str) -> String {
    format!("{ENV_PREFIX}{}_{suffix}", adapter.descriptor().env_token())
}

/// Trimmed value, `None` when blank.
fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn parse_flag(value: Option<&str>, extra_truthy: &[&str]) -> bool {
    let Some(value) = normalize(value) else {
        return false;
    };
    let value = value.to_ascii_lowercase();
    ["1", "true", "yes"].contains(&value.as_str()) || extra_truthy.contains(&value.as_str())
}

fn parse_number<T: std::str::FromStr + Copy + std::fmt::Display + PartialOrd>(
    key: &str,
    value: Option<&str>,
    default: T,
    min: T,
) -> T {
    let Some(raw) = normalize(value) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(n) if n >= min => n,
        _ => {
            warn!(key, value = %raw, default = %default, "invalid numeric setting, using default");
            default
        }
    }
}

/// One step of a precedence chain; `Ok(None)` passes to the next step.
pub type Resolver<'a, T> = Box<dyn FnOnce() -> BridgeResult<Option<T>> + 'a>;

/// Evaluate `chain` in order and return the first value produced.
pub fn resolve_chain<T>(chain: Vec<Resolver<'_, T>>) -> BridgeResult<Option<T>> {
    for step in chain {
        if let Some(value) = step()? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Process-wide settings for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub default_adapter: String,
    pub default_timeout_secs: u64,
    pub default_model: Option<String>,
    pub default_reasoning_effort: Option<String>,
    pub max_agents: usize,
    /// Canonical allow-listed roots; `None` means unrestricted. A configured
    /// list whose entries could not be resolved is empty and permits nothing.
    pub allowed_dirs: Option<Vec<PathBuf>>,
    pub strict: bool,
    pub sandbox_enabled: bool,
    pub sandbox: SandboxOptions,
    pub output: OutputLimits,
    pub max_response_bytes: usize,
    /// Raw `OA_BRIDGE_<ADAPTER>_*` values, keyed by variable name.
    adapter_overrides: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl BridgeConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |suffix: &str| lookup(&var_name(suffix));

        let allowed_dirs = normalize(get("ALLOWED_DIRS").as_deref())
            .map(|raw| {
                std::env::split_paths(&raw)
                    .filter(|p| !p.as_os_str().is_empty())
                    .filter_map(|p| match p.canonicalize() {
                        Ok(real) => Some(real),
                        Err(e) => {
                            warn!(path = %p.display(), error = %e, "ignoring unusable allowed directory");
                            None
                        }
                    })
                    .collect::<Vec<_>>()
            });
        if allowed_dirs.as_ref().is_some_and(Vec::is_empty) {
            warn!("no entry of OA_BRIDGE_ALLOWED_DIRS resolves; every cwd will be rejected");
        }

        let mut adapter_overrides = HashMap::new();
        for adapter in Adapter::ALL {
            for suffix in ADAPTER_SUFFIXES {
                let key = adapter_var_name(adapter, suffix);
                if let Some(value) = lookup(&key) {
                    adapter_overrides.insert(key, value);
                }
            }
        }

        let defaults = OutputLimits::default();
        Self {
            default_adapter: normalize(get("ADAPTER").as_deref())
                .unwrap_or_else(|| DEFAULT_ADAPTER.to_owned()),
            default_timeout_secs: parse_number(
                "TIMEOUT",
                get("TIMEOUT").as_deref(),
                BASE_TIMEOUT_SECS,
                1,
            ),
            default_model: normalize(get("MODEL").as_deref()),
            default_reasoning_effort: normalize(get("REASONING_EFFORT").as_deref()),
            max_agents: parse_number(
                "MAX_AGENTS",
                get("MAX_AGENTS").as_deref(),
                DEFAULT_MAX_AGENTS,
                1,
            ),
            allowed_dirs,
            strict: parse_flag(get("STRICT").as_deref(), &[]),
            sandbox_enabled: parse_flag(get("SANDBOX").as_deref(), &["copy"]),
            sandbox: SandboxOptions {
                max_diff_bytes: parse_number(
                    "SANDBOX_MAX_DIFF",
                    get("SANDBOX_MAX_DIFF").as_deref(),
                    DEFAULT_MAX_DIFF_BYTES,
                    1,
                ),
                max_copy_bytes: parse_number(
                    "SANDBOX_MAX_COPY",
                    get("SANDBOX_MAX_COPY").as_deref(),
                    DEFAULT_MAX_COPY_BYTES,
                    1,
                ),
                keep: parse_flag(get("SANDBOX_KEEP").as_deref(), &[]),
            },
            output: OutputLimits {
                max_output_chars: parse_number(
                    "MAX_OUTPUT_CHARS",
                    get("MAX_OUTPUT_CHARS").as_deref(),
                    defaults.max_output_chars,
                    1,
                ),
                timeout_tail_chars: parse_number(
                    "TIMEOUT_TAIL_CHARS",
                    get("TIMEOUT_TAIL_CHARS").as_deref(),
                    defaults.timeout_tail_chars,
                    1,
                ),
            },
            max_response_bytes: parse_number(
                "MAX_RESPONSE_BYTES",
                get("MAX_RESPONSE_BYTES").as_deref(),
                DEFAULT_MAX_RESPONSE_BYTES,
                1,
            ),
            adapter_overrides,
        }
    }

    fn adapter_value(&self, adapter: Adapter, suffix: &str) -> Option<String> {
        normalize(
            self.adapter_overrides
                .get(&adapter_var_name(adapter, suffix))
                .map(String::as_str),
        )
    }

    /// The named adapter, or the configured default when `name` is absent
    /// or blank.
    pub fn adapter(&self, name: Option<&str>) -> BridgeResult<Adapter> {
        match normalize(name) {
            Some(name) => adapters::get(&name),
            None => adapters::get(&self.default_adapter),
        }
    }

    /// Resolve and range-check the timeout for one call.
    pub fn resolve_timeout(&self, adapter: Adapter, explicit: Option<u64>) -> BridgeResult<Duration> {
        let descriptor = adapter.descriptor();
        let key = adapter_var_name(adapter, "TIMEOUT");
        let chain: Vec<Resolver<'_, u64>> = vec![
            Box::new(|| Ok(explicit)),
            Box::new(|| {
                self.adapter_value(adapter, "TIMEOUT")
                    .map(|raw| {
                        raw.parse::<u64>().map_err(|_| {
                            BridgeError::validation(format!("{key} must be an integer, got {raw:?}"))
                        })
                    })
                    .transpose()
            }),
            Box::new(|| {
                Ok((descriptor.default_timeout_secs != BASE_TIMEOUT_SECS)
                    .then_some(descriptor.default_timeout_secs))
            }),
            Box::new(|| Ok(Some(self.default_timeout_secs))),
        ];
        let secs = resolve_chain(chain)?.unwrap_or(BASE_TIMEOUT_SECS);
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) {
            return Err(BridgeError::validation(format!(
                "timeout_seconds must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {secs}"
            )));
        }
        Ok(Duration::from_secs(secs))
    }

    /// Resolve the model for one call. Blank candidates count as absent.
    pub fn resolve_model(&self, adapter: Adapter, explicit: Option<&str>) -> BridgeResult<Option<String>> {
        let chain: Vec<Resolver<'_, String>> = vec![
            Box::new(|| Ok(normalize(explicit))),
            Box::new(|| Ok(self.adapter_value(adapter, "MODEL"))),
            Box::new(|| Ok(self.default_model.clone())),
            Box::new(|| Ok(adapter.descriptor().default_model.map(str::to_owned))),
        ];
        let model = resolve_chain(chain)?;
        if let Some(model) = &model {
            adapters::reject_flag("model", model)?;
        }
        Ok(model)
    }

    /// Resolve the reasoning effort for one call.
    pub fn resolve_reasoning_effort(
        &self,
        adapter: Adapter,
        explicit: Option<&str>,
    ) -> BridgeResult<Option<String>> {
        let chain: Vec<Resolver<'_, String>> = vec![
            Box::new(|| Ok(normalize(explicit))),
            Box::new(|| Ok(self.adapter_value(adapter, "REASONING_EFFORT"))),
            Box::new(|| Ok(self.default_reasoning_effort.clone())),
            Box::new(|| Ok(adapter.descriptor().default_reasoning_effort.map(str::to_owned))),
        ];
        let effort = resolve_chain(chain)?;
        if let Some(effort) = &effort {
            if !REASONING_EFFORTS.contains(&effort.as_str()) {
                return Err(BridgeError::validation(format!(
                    "reasoning_effort must be one of {}, got {effort:?}",
                    REASONING_EFFORTS.join(", ")
                )));
            }
        }
        Ok(effort)
    }

    /// Timeout used by status checks and `list_adapters`.
    pub fn status_check_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs.min(STATUS_CHECK_TIMEOUT_CAP_SECS))
    }

    pub const fn is_unrestricted(&self) -> bool {
        self.allowed_dirs.is_none()
    }

    /// Whether the canonical path `resolved` lies inside the allow-list.
    pub fn permits(&self, resolved: &Path) -> bool {
        self.allowed_dirs
            .as_ref()
            .is_none_or(|roots| roots.iter().any(|root| resolved.starts_with(root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(vars: &[(&str, &str)]) -> BridgeConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        BridgeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.default_adapter, "kimi");
        assert_eq!(cfg.default_timeout_secs, 600);
        assert_eq!(cfg.max_agents, 10);
        assert!(cfg.is_unrestricted());
        assert!(!cfg.strict);
        assert!(!cfg.sandbox_enabled);
        assert_eq!(cfg.sandbox.max_diff_bytes, 500_000);
        assert_eq!(cfg.sandbox.max_copy_bytes, 500 * 1024 * 1024);
        assert_eq!(cfg.output.max_output_chars, 120_000);
        assert_eq!(cfg.output.timeout_tail_chars, 20_000);
        assert_eq!(cfg.max_response_bytes, 2_000_000);
    }

    #[test]
    fn test_malformed_numbers_fall_back() {
        let cfg = config(&[
            ("OA_BRIDGE_TIMEOUT", "soon"),
            ("OA_BRIDGE_MAX_AGENTS", "0"),
            ("OA_BRIDGE_MAX_RESPONSE_BYTES", "-5"),
        ]);
        assert_eq!(cfg.default_timeout_secs, 600);
        assert_eq!(cfg.max_agents, 10);
        assert_eq!(cfg.max_response_bytes, 2_000_000);
    }

    #[test]
    fn test_flags() {
        let cfg = config(&[
            ("OA_BRIDGE_SANDBOX", "copy"),
            ("OA_BRIDGE_SANDBOX_KEEP", "Yes"),
            ("OA_BRIDGE_STRICT", "0"),
        ]);
        assert!(cfg.sandbox_enabled);
        assert!(cfg.sandbox.keep);
        assert!(!cfg.strict);
        assert!(!config(&[("OA_BRIDGE_STRICT", "copy")]).strict);
    }

    #[test]
    fn test_blank_adapter_falls_back_to_kimi() {
        let cfg = config(&[("OA_BRIDGE_ADAPTER", "  ")]);
        assert_eq!(cfg.adapter(None).expect("adapter"), Adapter::Kimi);
        let cfg = config(&[("OA_BRIDGE_ADAPTER", "codex")]);
        assert_eq!(cfg.adapter(None).expect("adapter"), Adapter::Codex);
        assert_eq!(cfg.adapter(Some("gemini")).expect("adapter"), Adapter::Gemini);
        assert!(cfg.adapter(Some("nope")).is_err());
    }

    #[test]
    fn test_allowed_dirs_are_canonical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = dir.path().join(".").display().to_string();
        let cfg = config(&[("OA_BRIDGE_ALLOWED_DIRS", raw.as_str())]);
        assert_eq!(
            cfg.allowed_dirs,
            Some(vec![dir.path().canonicalize().expect("canonical")])
        );
        assert!(!cfg.is_unrestricted());
    }

    #[test]
    fn test_unresolvable_allow_list_denies_everything() {
        let cfg = config(&[("OA_BRIDGE_ALLOWED_DIRS", "/nonexistent/allowed")]);
        assert!(!cfg.is_unrestricted());
        assert_eq!(cfg.allowed_dirs, Some(Vec::new()));
        assert!(!cfg.permits(Path::new("/etc")));
        assert!(!cfg.permits(Path::new("/nonexistent/allowed")));
    }

    #[test]
    fn test_blank_allow_list_is_unset() {
        let cfg = config(&[("OA_BRIDGE_ALLOWED_DIRS", "  ")]);
        assert!(cfg.is_unrestricted());
        assert!(cfg.permits(Path::new("/etc")));
    }

    #[test]
    fn test_resolve_chain_stops_at_first_value() {
        let chain: Vec<Resolver<'_, u8>> = vec![
            Box::new(|| Ok(None)),
            Box::new(|| Ok(Some(2))),
            Box::new(|| Err(BridgeError::validation("never evaluated"))),
        ];
        assert_eq!(resolve_chain(chain).expect("chain"), Some(2));
    }

    #[test]
    fn test_timeout_precedence() {
        let cfg = config(&[
            ("OA_BRIDGE_TIMEOUT", "900"),
            ("OA_BRIDGE_CODEX_TIMEOUT", "120"),
        ]);
        let secs = |adapter, explicit| {
            cfg.resolve_timeout(adapter, explicit)
                .expect("timeout")
                .as_secs()
        };
        assert_eq!(secs(Adapter::Codex, Some(45)), 45);
        assert_eq!(secs(Adapter::Codex, None), 120);
        // Gemini declares its own non-baseline default.
        assert_eq!(secs(Adapter::Gemini, None), 1200);
        assert_eq!(secs(Adapter::Kimi, None), 900);
    }

    #[test]
    fn test_timeout_range_enforced() {
        let cfg = BridgeConfig::default();
        for bad in [0, 29, 3601] {
            let err = cfg.resolve_timeout(Adapter::Kimi, Some(bad)).expect_err("out of range");
            assert!(err.is_validation());
        }
        assert!(cfg.resolve_timeout(Adapter::Kimi, Some(30)).is_ok());
        assert!(cfg.resolve_timeout(Adapter::Kimi, Some(3600)).is_ok());

        let cfg = config(&[("OA_BRIDGE_TIMEOUT", "5")]);
        assert!(cfg.resolve_timeout(Adapter::Kimi, None).is_err());
    }

    #[test]
    fn test_garbage_adapter_timeout_is_validation_error() {
        let cfg = config(&[("OA_BRIDGE_KIMI_TIMEOUT", "later")]);
        let err = cfg.resolve_timeout(Adapter::Kimi, None).expect_err("garbage");
        assert!(err.is_validation());
        assert!(err.to_string().contains("OA_BRIDGE_KIMI_TIMEOUT"));
    }

    #[test]
    fn test_model_precedence() {
        let cfg = config(&[
            ("OA_BRIDGE_MODEL", "global-model"),
            ("OA_BRIDGE_GEMINI_MODEL", "gemini-2.5-flash"),
        ]);
        let model = |adapter, explicit| cfg.resolve_model(adapter, explicit).expect("model");
        assert_eq!(model(Adapter::Gemini, Some(" pinned ")), Some("pinned".to_owned()));
        assert_eq!(model(Adapter::Gemini, Some("   ")), Some("gemini-2.5-flash".to_owned()));
        assert_eq!(model(Adapter::Codex, None), Some("global-model".to_owned()));

        let bare = BridgeConfig::default();
        assert_eq!(
            bare.resolve_model(Adapter::Codex, None).expect("model"),
            Some("gpt-5.3-codex".to_owned())
        );
        assert_eq!(bare.resolve_model(Adapter::Kimi, None).expect("model"), None);
    }

    #[test]
    fn test_model_flag_injection_rejected() {
        let cfg = BridgeConfig::default();
        let err = cfg
            .resolve_model(Adapter::Kimi, Some("--dangerous"))
            .expect_err("flag");
        assert!(matches!(err, BridgeError::FlagInjection { field: "model", .. }));

        let cfg = config(&[("OA_BRIDGE_MODEL", "-x")]);
        assert!(cfg.resolve_model(Adapter::Kimi, None).is_err());
    }

    #[test]
    fn test_reasoning_effort_precedence_and_values() {
        let cfg = config(&[
            ("OA_BRIDGE_REASONING_EFFORT", "low"),
            ("OA_BRIDGE_CODEX_REASONING_EFFORT", "medium"),
        ]);
        let effort = |adapter, explicit| {
            cfg.resolve_reasoning_effort(adapter, explicit)
                .expect("effort")
        };
        assert_eq!(effort(Adapter::Codex, Some("high")), Some("high".to_owned()));
        assert_eq!(effort(Adapter::Codex, None), Some("medium".to_owned()));
        assert_eq!(effort(Adapter::Kimi, None), Some("low".to_owned()));
        assert_eq!(
            BridgeConfig::default()
                .resolve_reasoning_effort(Adapter::Codex, None)
                .expect("effort"),
            Some("xhigh".to_owned())
        );
        assert!(cfg.resolve_reasoning_effort(Adapter::Codex, Some("max")).is_err());
    }

    #[test]
    fn test_status_check_timeout_capped() {
        assert_eq!(BridgeConfig::default().status_check_timeout().as_secs(), 60);
        let cfg = config(&[("OA_BRIDGE_TIMEOUT", "45")]);
        assert_eq!(cfg.status_check_timeout().as_secs(), 45);
    }
}
