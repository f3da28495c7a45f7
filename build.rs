//! Stamps `picsort --version` with the source revision (`GIT_HASH`).
//!
//! Order: `PICSORT_GIT_HASH` from the environment (packaged builds without a
//! `.git`), then `git describe`, then "unknown".

use std::path::Path;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8(out.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=PICSORT_GIT_HASH");

    let revision = std::env::var("PICSORT_GIT_HASH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| git(&["describe", "--always", "--dirty=-modified", "--abbrev=8"]))
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=GIT_HASH={}", revision.trim());

    let git_dir = Path::new(".git");
    if !git_dir.is_dir() {
        return;
    }
    // new commits, branch switches, and staged edits (for -modified)
    for watched in ["HEAD", "index"] {
        println!("cargo:rerun-if-changed={}", git_dir.join(watched).display());
    }
    if let Some(branch) = std::fs::read_to_string(git_dir.join("HEAD"))
        .ok()
        .and_then(|head| head.strip_prefix("ref: ").map(|r| r.trim().to_string()))
    {
        println!("cargo:rerun-if-changed={}", git_dir.join(branch).display());
    }
}
