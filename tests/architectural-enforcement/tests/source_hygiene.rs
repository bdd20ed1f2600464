//! Integration Test: Source Hygiene
//!
//! Enforces the repository's production-code rules:
//!
//! - **No `std::thread::sleep`**: the whole stack is async; a thread sleep
//!   inside the runtime stalls every task on that worker.
//! - **No `reqwest::blocking`**: the blocking client spawns its own runtime
//!   and deadlocks when called from async context.
//! - **No bare `.unwrap()` in core production code**: guard failures must be
//!   answered, not panicked on. (`expect` with a message is allowed for
//!   construction-time invariants, matching the HTTP client builder.)
//!
//! Test modules (`#[cfg(test)]` and everything below it) are exempt.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, resolved from this crate's manifest dir.
fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Collect the production (non-test) portion of every Rust source file in
/// `dir`, as `(path, line_number, line)` tuples.
fn production_lines(dir: &Path) -> Vec<(PathBuf, usize, String)> {
    let mut lines = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for (number, line) in content.lines().enumerate() {
            // Everything from the test module down is exempt.
            if line.trim_start().starts_with("#[cfg(test)]") {
                break;
            }
            lines.push((entry.path().to_path_buf(), number + 1, line.to_string()));
        }
    }
    lines
}

fn violations_matching(dirs: &[&str], needle: &str) -> Vec<String> {
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in dirs {
        for (path, number, line) in production_lines(&root.join(dir)) {
            if line.contains(needle) && !line.trim_start().starts_with("//") {
                violations.push(format!("{}:{}: {}", path.display(), number, line.trim()));
            }
        }
    }
    violations
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = violations_matching(
        &["gifwright/core/src", "gifwright/daemon/src"],
        "std::thread::sleep",
    );
    assert!(
        violations.is_empty(),
        "thread sleeps found in async production code:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_no_blocking_http_client() {
    let violations = violations_matching(
        &["gifwright/core/src", "gifwright/daemon/src"],
        "reqwest::blocking",
    );
    assert!(
        violations.is_empty(),
        "blocking HTTP client usage found:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_no_bare_unwrap_in_core_production_code() {
    let violations = violations_matching(&["gifwright/core/src"], ".unwrap()");
    assert!(
        violations.is_empty(),
        "bare unwrap() found in core production code:\n{}",
        violations.join("\n")
    );
}
