//! Response circuit breaker.
//!
//! Measures a tool response exactly as it is serialized onto the wire and
//! swaps anything over the limit for a compact error payload.

use serde_json::json;
use tracing::warn;

use crate::server::ContentItem;

/// Longest tool name echoed back in the breaker payload.
const MAX_TOOL_NAME_CHARS: usize = 200;

/// Serialized byte length of `content`.
pub fn serialized_len(content: &[ContentItem]) -> usize {
    // Serializing a Vec of plain strings cannot fail; treat a failure as oversized.
    serde_json::to_vec(content).map_or(usize::MAX, |bytes| bytes.len())
}

/// Pass `content` through if it fits `max_bytes`, otherwise replace it.
pub fn enforce(content: Vec<ContentItem>, tool_name: &str, max_bytes: usize) -> Vec<ContentItem> {
    let total_bytes = serialized_len(&content);
    if total_bytes <= max_bytes {
        return content;
    }

    let tool: String = tool_name.chars().take(MAX_TOOL_NAME_CHARS).collect();
    warn!(
        tool = tool.as_str(),
        total_bytes, max_bytes, "response payload exceeded limit"
    );
    vec![ContentItem::json(&json!({
        "status": "error",
        "message": "Response payload too large",
        "circuit_breaker": {
            "triggered": true,
            "original_bytes": total_bytes,
            "max_bytes": max_bytes,
            "tool": tool,
        },
    }))]
}
