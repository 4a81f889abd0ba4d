//! oa-agent-bridge -- MCP server exposing coding-agent CLIs as tools.
//!
//! Usage: oa-agent-bridge [--workspace <path>]

use anyhow::{Context, bail};
use oa_agent_bridge::BridgeConfig;
use oa_agent_bridge::server::McpServerConfig;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing to stderr so it does not interfere with MCP stdio.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("OA_BRIDGE_LOG_LEVEL")
                .map_err(|e| e.to_string())
                .and_then(|level| EnvFilter::try_new(level.to_ascii_lowercase()).map_err(|e| e.to_string()))
        })
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let workspace = std::env::args()
        .skip_while(|a| a != "--workspace")
        .nth(1)
        .unwrap_or_else(|| ".".to_string());
    let workspace = std::path::Path::new(&workspace)
        .canonicalize()
        .with_context(|| format!("workspace is not accessible: {workspace}"))?;

    let bridge = BridgeConfig::from_env();
    if bridge.is_unrestricted() {
        if bridge.strict {
            bail!("OA_BRIDGE_STRICT is set but OA_BRIDGE_ALLOWED_DIRS is empty; refusing to start");
        }
        warn!("OA_BRIDGE_ALLOWED_DIRS is not set; agents may run in any directory");
    } else if bridge.allowed_dirs.as_ref().is_some_and(Vec::is_empty) {
        bail!("no directory in OA_BRIDGE_ALLOWED_DIRS exists; refusing to start");
    }

    let adapter = bridge.adapter(None)?;
    let descriptor = adapter.descriptor();
    match adapter.check_installed() {
        (true, path) => tracing::info!(
            adapter = descriptor.name,
            path = %path.unwrap_or_default().display(),
            "default adapter found"
        ),
        (false, _) => bail!(
            "{} CLI not found. Install: {}",
            descriptor.name,
            descriptor.install_hint
        ),
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(oa_agent_bridge::run_mcp_server(McpServerConfig { workspace, bridge }))
}
