//! Stamps the binary with its build time and commit for the startup log.
//!
//! CI passes `BUILD_DATETIME` and `BUILD_GIT_HASH`; local builds derive them.

use std::process::Command;

fn main() {
    let built = std::env::var("BUILD_DATETIME")
        .unwrap_or_else(|_| chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    let commit = std::env::var("BUILD_GIT_HASH")
        .ok()
        .or_else(head_commit)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BUILD_DATETIME={built}");
    println!("cargo:rustc-env=BUILD_GIT_HASH={commit}");
    println!("cargo:rerun-if-env-changed=BUILD_DATETIME");
    println!("cargo:rerun-if-env-changed=BUILD_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// Abbreviated HEAD commit, `-dirty` when the worktree has local edits
fn head_commit() -> Option<String> {
    let out = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output().ok()?;
    let commit = out
        .status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())?;
    let clean = Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .is_ok_and(|s| s.success());
    Some(if clean { commit } else { format!("{commit}-dirty") })
}
