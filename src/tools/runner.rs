//! The seam between tool dispatch and process execution.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::Adapter;
use crate::config::BridgeConfig;
use crate::exec::{ExecutionRequest, ProcessExecutor};
use crate::result::AgentResult;
use crate::sandbox::SandboxManager;

/// Runs validated executions on behalf of the dispatcher.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Whether the adapter's CLI can be launched at all.
    fn is_installed(&self, adapter: Adapter) -> bool;

    /// Run one agent, sandboxed when the runner is configured for it.
    async fn run(
        &self,
        adapter: Adapter,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> AgentResult;

    /// A short status-check run against the real working directory.
    async fn run_status_check(
        &self,
        adapter: Adapter,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> AgentResult;
}

/// Spawns real agent CLIs on this host.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    executor: ProcessExecutor,
    sandbox: Option<SandboxManager>,
}

impl LocalRunner {
    pub const fn new(executor: ProcessExecutor, sandbox: Option<SandboxManager>) -> Self {
        Self { executor, sandbox }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let sandbox = config
            .sandbox_enabled
            .then(|| SandboxManager::new(config.sandbox));
        Self::new(ProcessExecutor::new(config.output), sandbox)
    }

    pub const fn is_sandboxed(&self) -> bool {
        self.sandbox.is_some()
    }
}

#[async_trait]
impl AgentRunner for LocalRunner {
    fn is_installed(&self, adapter: Adapter) -> bool {
        adapter.check_installed().0
    }

    async fn run(
        &self,
        adapter: Adapter,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> AgentResult {
        let Some(sandbox) = &self.sandbox else {
            return self.executor.run(adapter, &request, &cancel).await;
        };
        let cwd = request.cwd.clone();
        let (result, diff) = sandbox
            .run_sandboxed(&cwd, request.agent_index, |dir: PathBuf| {
                let request = ExecutionRequest { cwd: dir, ..request };
                let executor = &self.executor;
                let cancel = &cancel;
                async move { executor.run(adapter, &request, cancel).await }
            })
            .await;
        match diff {
            Some(diff) => result.with_raw_entry("sandbox", diff.to_payload()),
            None => result,
        }
    }

    async fn run_status_check(
        &self,
        adapter: Adapter,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> AgentResult {
        self.executor.run(adapter, &request, &cancel).await
    }
}
