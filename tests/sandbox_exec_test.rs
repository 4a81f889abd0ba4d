//! Real subprocesses running inside copy-on-run sandboxes.

#![cfg(unix)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use oa_agent_bridge::AgentStatus;
use oa_agent_bridge::exec::{CommandSpec, OutputLimits, ProcessExecutor};
use oa_agent_bridge::sandbox::{SandboxManager, SandboxOptions};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn shell(script: &str, cwd: PathBuf, timeout: Duration) -> CommandSpec {
    let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_owned());
    CommandSpec {
        argv: vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()],
        cwd,
        env: HashMap::from([("PATH".to_owned(), path)]),
        timeout,
        auth_patterns: vec!["not logged in".to_owned()],
        auth_message: "Run: agent login".to_owned(),
        label: "sh".to_owned(),
        agent_index: 0,
    }
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").expect("write");
    std::fs::write(dir.path().join("old.txt"), "remove me\n").expect("write");
    std::fs::create_dir(dir.path().join("node_modules")).expect("mkdir");
    std::fs::write(dir.path().join("node_modules/dep.js"), "x").expect("write");
    dir
}

async fn run_in_sandbox(
    manager: &SandboxManager,
    cwd: &Path,
    script: &str,
) -> (oa_agent_bridge::AgentResult, Option<oa_agent_bridge::sandbox::SandboxResult>) {
    let executor = ProcessExecutor::new(OutputLimits::default());
    let cancel = CancellationToken::new();
    manager
        .run_sandboxed(cwd, 0, |dir| {
            let spec = shell(script, dir, Duration::from_secs(30));
            let executor = &executor;
            let cancel = &cancel;
            async move { executor.run_command(spec, cancel).await }
        })
        .await
}

#[tokio::test]
async fn test_agent_edits_stay_in_sandbox() {
    let dir = project();
    let manager = SandboxManager::new(SandboxOptions::default());
    let script = "echo 'fn main() { println!(\"hi\"); }' > main.rs; rm old.txt; echo new > added.txt; \
                  test ! -d node_modules && echo copied-without-deps";

    let (result, sandbox) = run_in_sandbox(&manager, dir.path(), script).await;

    assert_eq!(result.status, AgentStatus::Success);
    assert_eq!(result.output.trim(), "copied-without-deps");
    let sandbox = sandbox.expect("sandbox result");
    assert_eq!(sandbox.summary.added, 1);
    assert_eq!(sandbox.summary.modified, 1);
    assert_eq!(sandbox.summary.deleted, 1);
    assert!(sandbox.diff.contains("+fn main() { println!(\"hi\"); }"));
    assert!(!sandbox.truncated);
    assert!(sandbox.sandbox_path.is_none());

    // The real tree is untouched.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("main.rs")).expect("read"),
        "fn main() {}\n"
    );
    assert!(dir.path().join("old.txt").exists());
    assert!(!dir.path().join("added.txt").exists());
}

#[tokio::test]
async fn test_kept_sandbox_survives() {
    let dir = project();
    let manager = SandboxManager::new(SandboxOptions {
        keep: true,
        ..SandboxOptions::default()
    });

    let (result, sandbox) = run_in_sandbox(&manager, dir.path(), "echo kept > note.txt").await;
    assert_eq!(result.status, AgentStatus::Success);
    let path = sandbox.and_then(|s| s.sandbox_path).expect("kept path");
    assert!(path.join("workspace/note.txt").exists());
    std::fs::remove_dir_all(&path).expect("cleanup");
}

#[tokio::test]
async fn test_timed_out_agent_keeps_partial_output() {
    let dir = project();
    let executor = ProcessExecutor::new(OutputLimits::default());
    let spec = shell("echo started; sleep 30", dir.path().to_path_buf(), Duration::from_millis(300));

    let result = executor.run_command(spec, &CancellationToken::new()).await;

    assert_eq!(result.status, AgentStatus::Timeout);
    assert_eq!(result.returncode, -1);
    assert!(result.output.contains("started"));
}

#[tokio::test]
async fn test_auth_failure_is_classified() {
    let dir = project();
    let executor = ProcessExecutor::new(OutputLimits::default());
    let spec = shell(
        "echo 'Error: Not logged in' >&2; exit 1",
        dir.path().to_path_buf(),
        Duration::from_secs(30),
    );

    let result = executor.run_command(spec, &CancellationToken::new()).await;

    assert_eq!(result.status, AgentStatus::AuthError);
    assert_eq!(result.message.as_deref(), Some("Run: agent login"));
}
