//! Heuristic quality signals extracted from agent output.
//!
//! Nothing here understands a particular agent's log format. The patterns
//! look for unified-diff markers, git-style change summaries,
//! pytest-style pass/fail counts and error tracebacks.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

#[allow(clippy::expect_used)]
fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static signal pattern is valid")
}

static DIFF_MARKER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^(?:\+\+\+ |--- |@@ )"));
static DIFF_FILE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^(?:\+\+\+ b/|--- a/)(.+)$"));
static FILES_CHANGED: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(\d+)\s+files?\s+changed\b"));
static MODIFIED_FILES: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\bModified\s+(\d+)\s+files?\b"));
// `\b` before a digit means the count is not glued to a preceding word char.
static PASSED: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)\b(\d+)\s+passed\b"));
static FAILED: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)\b(\d+)\s+failed\b"));
static ERROR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(Traceback \(most recent call last\)|\berror:)"));

/// Signals found in one agent run. Absent signals are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualitySignals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_diff: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_errors: Option<bool>,
}

impl QualitySignals {
    pub const fn is_empty(&self) -> bool {
        self.has_diff.is_none()
            && self.files_changed.is_none()
            && self.tests_passed.is_none()
            && self.tests_failed.is_none()
            && self.has_errors.is_none()
    }
}

/// Scan stdout (and optionally stderr) for quality signals.
///
/// Test counts take the *last* summary in the combined streams, since CLIs
/// often echo intermediate runs before the final one. A count of zero is
/// still reported.
pub fn extract(stdout: &str, stderr: Option<&str>) -> QualitySignals {
    let stderr = stderr.unwrap_or_default();
    let mut signals = QualitySignals::default();
    if stdout.is_empty() && stderr.is_empty() {
        return signals;
    }

    if DIFF_MARKER.is_match(stdout) {
        signals.has_diff = Some(true);
    }
    signals.files_changed = count_files_changed(stdout);

    let combined = if stderr.is_empty() {
        stdout.to_owned()
    } else {
        format!("{stdout}\n{stderr}")
    };
    signals.tests_passed = last_int(&PASSED, &combined);
    signals.tests_failed = last_int(&FAILED, &combined);

    if ERROR_MARKER.is_match(stderr) {
        signals.has_errors = Some(true);
    }
    signals
}

fn last_int(re: &Regex, text: &str) -> Option<u64> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .last()
}

fn count_files_changed(stdout: &str) -> Option<u64> {
    let paths: BTreeSet<&str> = DIFF_FILE
        .captures_iter(stdout)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('\r'))
        .filter(|path| !path.is_empty() && *path != "/dev/null")
        .collect();
    if !paths.is_empty() {
        return u64::try_from(paths.len()).ok();
    }
    last_int(&FILES_CHANGED, stdout).or_else(|| last_int(&MODIFIED_FILES, stdout))
}
