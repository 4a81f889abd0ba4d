//! Copy-on-run sandbox.
//!
//! The working tree is copied into a fresh temporary directory, the agent runs
//! against the copy, and the changes come back as a unified diff. The real
//! tree is never written to.
//!
//! The sandbox directory lives in a [`SandboxDir`] guard: unless the caller
//! asked to keep it, it is removed when the guard drops, which covers normal
//! returns, early errors and panics unwinding out of the agent callback.

pub mod tree_diff;
pub mod walk;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::result::AgentResult;
pub use tree_diff::{DiffSummary, TreeDiff, diff_trees};

/// Prefix of every sandbox directory under the system temp area.
pub const SANDBOX_PREFIX: &str = "oa-agent-bridge-sandbox-";

/// Default cap on the bytes copied into a sandbox (500 MiB).
pub const DEFAULT_MAX_COPY_BYTES: u64 = 500 * 1024 * 1024;

/// Default cap on the returned diff text.
pub const DEFAULT_MAX_DIFF_BYTES: usize = 500_000;

/// Creates the temporary root a sandbox lives in.
pub trait SandboxRoot: Send + Sync {
    fn create(&self) -> std::io::Result<TempDir>;
}

/// Sandboxes under the system temporary directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTempRoot;

impl SandboxRoot for SystemTempRoot {
    fn create(&self) -> std::io::Result<TempDir> {
        tempfile::Builder::new().prefix(SANDBOX_PREFIX).tempdir()
    }
}

/// Sandbox limits and retention.
#[derive(Debug, Clone, Copy)]
pub struct SandboxOptions {
    pub max_diff_bytes: usize,
    pub max_copy_bytes: u64,
    /// Leave the sandbox on disk for inspection.
    pub keep: bool,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            max_diff_bytes: DEFAULT_MAX_DIFF_BYTES,
            max_copy_bytes: DEFAULT_MAX_COPY_BYTES,
            keep: false,
        }
    }
}

/// What the agent changed inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxResult {
    pub diff: String,
    pub summary: DiffSummary,
    pub truncated: bool,
    /// Present only when the sandbox was kept.
    pub sandbox_path: Option<PathBuf>,
}

impl SandboxResult {
    /// The `raw.sandbox` payload attached to an [`AgentResult`].
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = json!({
            "enabled": true,
            "summary": self.summary,
            "diff": self.diff,
            "truncated": self.truncated,
        });
        if let Some(path) = &self.sandbox_path {
            payload["path"] = json!(path.display().to_string());
        }
        payload
    }
}

/// Scoped owner of a sandbox directory.
struct SandboxDir {
    dir: Option<TempDir>,
    keep: bool,
}

impl SandboxDir {
    fn root(&self) -> &Path {
        self.dir.as_ref().map_or_else(|| Path::new(""), TempDir::path)
    }
}

impl Drop for SandboxDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let path = dir.keep();
            debug!(path = %path.display(), "keeping sandbox");
        } else if let Err(e) = dir.close() {
            warn!(error = %e, "failed to remove sandbox directory");
        }
    }
}

/// Runs agent callbacks against throwaway copies of a working tree.
#[derive(Debug, Clone, Default)]
pub struct SandboxManager<R = SystemTempRoot> {
    root: R,
    options: SandboxOptions,
}

impl SandboxManager<SystemTempRoot> {
    pub const fn new(options: SandboxOptions) -> Self {
        Self {
            root: SystemTempRoot,
            options,
        }
    }
}

impl<R: SandboxRoot> SandboxManager<R> {
    pub const fn with_root(root: R, options: SandboxOptions) -> Self {
        Self { root, options }
    }

    pub const fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Run `run` inside a copy of `cwd`.
    ///
    /// Returns `(error result, None)` when the sandbox could not be set up
    /// (size gate, copy failure). When the diff itself fails, the callback's
    /// result is returned with `raw.sandbox.error` set and no [`SandboxResult`].
    pub async fn run_sandboxed<F, Fut>(
        &self,
        cwd: &Path,
        agent_index: usize,
        run: F,
    ) -> (AgentResult, Option<SandboxResult>)
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = AgentResult>,
    {
        let start = Instant::now();
        let error_result = |detail: &str| {
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            AgentResult::infra_error(agent_index, format!("sandbox error: {detail}"), duration_ms)
        };

        let max_copy = self.options.max_copy_bytes;
        let source = cwd.to_path_buf();
        let total = match blocking(move || walk::estimate_copy_size(&source, max_copy)).await {
            Ok(total) => total,
            Err(e) => return (error_result(&reason(&e)), None),
        };
        if total > max_copy {
            warn!(agent_index, total, max_copy, "sandbox copy size over limit");
            return (
                error_result(&format!("copy size {total} exceeds max {max_copy}")),
                None,
            );
        }

        let guard = match self.root.create() {
            Ok(dir) => SandboxDir {
                dir: Some(dir),
                keep: self.options.keep,
            },
            Err(e) => return (error_result(&format!("failed to create sandbox: {e}")), None),
        };
        let workspace = guard.root().join("workspace");

        let (source, target) = (cwd.to_path_buf(), workspace.clone());
        if let Err(e) = blocking(move || walk::copy_tree(&source, &target)).await {
            return (error_result(&reason(&e)), None);
        }
        debug!(agent_index, sandbox = %workspace.display(), bytes = total, "sandbox ready");

        let result = run(workspace.clone()).await;

        let max_diff = self.options.max_diff_bytes;
        let original = cwd.to_path_buf();
        let sandbox_path = self.options.keep.then(|| guard.root().to_path_buf());
        match blocking(move || diff_trees(&original, &workspace, max_diff)).await {
            Ok(tree) => (
                result,
                Some(SandboxResult {
                    diff: tree.diff,
                    summary: tree.summary,
                    truncated: tree.truncated,
                    sandbox_path,
                }),
            ),
            Err(e) => {
                warn!(agent_index, error = %e, "sandbox diff failed");
                let mut payload = json!({"enabled": true, "error": reason(&e)});
                if let Some(path) = sandbox_path {
                    payload["path"] = json!(path.display().to_string());
                }
                (result.with_raw_entry("sandbox", payload), None)
            }
        }
    }
}

/// Error text without the `sandbox error:` prefix, which callers add.
fn reason(err: &BridgeError) -> String {
    match err {
        BridgeError::Sandbox(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Run filesystem work off the async dispatch thread.
async fn blocking<T, F>(f: F) -> BridgeResult<T>
where
    F: FnOnce() -> BridgeResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::Sandbox(format!("sandbox task failed: {e}")))?
}
