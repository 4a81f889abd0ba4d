//! `oa-agent-bridge`: MCP gateway that runs coding-agent CLIs as tools.
//!
//! Exposes Kimi, Codex, Gemini and OpenCode as Model Context Protocol
//! tools over stdio (JSON-RPC 2.0, newline-delimited). Each call launches
//! the adapter's CLI as a subprocess in its own process group, bounded by a
//! timeout and a cancellation token, optionally inside a throwaway copy of
//! the working tree whose changes come back as a unified diff.
//!
//! # Tools
//!
//! - `spawn_agent`: run one agent
//! - `spawn_agents_parallel`: run a batch concurrently, results in input order
//! - `list_adapters`, `list_models`, `check_status`: catalog and health
//!
//! # Architecture
//!
//! ```text
//! stdin (JSON-RPC) → server → ToolDispatcher → AgentRunner
//!                                                  ↓
//!                                   SandboxManager (optional)
//!                                                  ↓
//!                                   ProcessExecutor → agent CLI
//!                                                  ↓
//!                        signals + output governor + response breaker
//! stdout (JSON-RPC) ←──────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod exec;
pub mod limits;
pub mod result;
pub mod sandbox;
pub mod server;
pub mod signals;
pub mod tools;

pub use adapters::Adapter;
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use exec::{ExecutionRequest, ProcessExecutor};
pub use result::{AgentResult, AgentStatus};
pub use server::run_mcp_server;
pub use tools::{AgentRunner, ToolDispatcher};
