//! Output governor: bounds the stdout/stderr carried by an [`AgentResult`].
//!
//! Two policies:
//! - **combined**: stdout and stderr share one character budget, split in
//!   proportion to their lengths; an oversized side keeps its head and tail
//!   around an omission marker.
//! - **tail**: each stream independently keeps its most recent characters.
//!   Used for timeouts, where the last output explains what the agent was
//!   doing when it was killed.
//!
//! Truncated text (marker included) always fits its budget, so applying the
//! same limit twice is a no-op.

use serde::Serialize;
use serde_json::json;

use crate::result::AgentResult;

/// Which policy produced a truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    Combined,
    Tail,
}

/// Apply the output limit, returning `result` untouched when nothing was cut.
///
/// When a stream is shortened the returned copy records
/// `raw.output_limit = {scope, max_chars, original_stdout_chars, original_stderr_chars}`.
pub fn apply_limit(result: AgentResult, max_chars: usize, tail_only: bool) -> AgentResult {
    let stdout_chars = result.output.chars().count();
    let stderr_chars = result.stderr.as_deref().map_or(0, |s| s.chars().count());

    let (scope, new_stdout, new_stderr) = if tail_only {
        (
            LimitScope::Tail,
            keep_tail(&result.output, stdout_chars, max_chars),
            result
                .stderr
                .as_deref()
                .and_then(|s| keep_tail(s, stderr_chars, max_chars)),
        )
    } else {
        if stdout_chars + stderr_chars <= max_chars {
            return result;
        }
        let (stdout_share, stderr_share) = split_budget(stdout_chars, stderr_chars, max_chars);
        (
            LimitScope::Combined,
            keep_head_tail(&result.output, stdout_chars, stdout_share),
            result
                .stderr
                .as_deref()
                .and_then(|s| keep_head_tail(s, stderr_chars, stderr_share)),
        )
    };

    if new_stdout.is_none() && new_stderr.is_none() {
        return result;
    }

    let mut limited = result;
    if let Some(stdout) = new_stdout {
        limited.output = stdout;
    }
    if let Some(stderr) = new_stderr {
        limited.stderr = Some(stderr);
    }
    limited.with_raw_entry(
        "output_limit",
        json!({
            "scope": scope,
            "max_chars": max_chars,
            "original_stdout_chars": stdout_chars,
            "original_stderr_chars": stderr_chars,
        }),
    )
}

/// Proportional split of `max` between two streams; each non-empty side
/// gets at least one character.
fn split_budget(stdout_len: usize, stderr_len: usize, max: usize) -> (usize, usize) {
    match (stdout_len, stderr_len) {
        (_, 0) => (max, 0),
        (0, _) => (0, max),
        _ if max < 2 => (1, 1),
        _ => {
            let total = stdout_len as u128 + stderr_len as u128;
            let proportional = (max as u128 * stdout_len as u128 / total) as usize;
            let stdout_share = proportional.clamp(1, max - 1);
            (stdout_share, max - stdout_share)
        }
    }
}

fn head_tail_marker(omitted: usize) -> String {
    format!("\n... [{omitted} chars truncated] ...\n")
}

fn tail_marker(omitted: usize) -> String {
    format!("[... {omitted} chars truncated ...]\n")
}

/// Head + marker + tail, or `None` when `text` already fits.
fn keep_head_tail(text: &str, len: usize, budget: usize) -> Option<String> {
    if len <= budget {
        return None;
    }
    // Marker width is bounded by the one for omitting everything.
    let worst = head_tail_marker(len).chars().count();
    if budget <= worst {
        return Some(last_chars(text, len, budget).to_owned());
    }
    let keep = budget - worst;
    let head = keep.div_ceil(2);
    let tail = keep - head;
    let mut out = String::with_capacity(budget);
    out.push_str(first_chars(text, head));
    out.push_str(&head_tail_marker(len - keep));
    out.push_str(last_chars(text, len, tail));
    Some(out)
}

/// Marker + most recent characters, or `None` when `text` already fits.
fn keep_tail(text: &str, len: usize, budget: usize) -> Option<String> {
    if len <= budget {
        return None;
    }
    let worst = tail_marker(len).chars().count();
    if budget <= worst {
        return Some(last_chars(text, len, budget).to_owned());
    }
    let keep = budget - worst;
    let mut out = tail_marker(len - keep);
    out.push_str(last_chars(text, len, keep));
    Some(out)
}

fn first_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn last_chars(text: &str, len: usize, n: usize) -> &str {
    if n >= len {
        return text;
    }
    match text.char_indices().nth(len - n) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
