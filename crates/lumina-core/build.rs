// Embeds LUMINA_GIT_SHA and LUMINA_BUILD_DATE for src/version.rs.
// Both can be pinned from the environment for builds outside a git checkout;
// SOURCE_DATE_EPOCH pins the date for reproducible builds.

use chrono::{DateTime, Utc};
use std::env;
use std::process::Command;

fn git_short_sha() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let sha = String::from_utf8(out.stdout).ok()?.trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

fn build_date() -> String {
    let pinned = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    pinned.unwrap_or_else(Utc::now).format("%Y-%m-%d").to_string()
}

fn main() {
    let sha = env::var("LUMINA_GIT_SHA")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(git_short_sha)
        .unwrap_or_else(|| "unknown".to_string());
    let date = env::var("LUMINA_BUILD_DATE")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(build_date);

    println!("cargo:rustc-env=LUMINA_GIT_SHA={sha}");
    println!("cargo:rustc-env=LUMINA_BUILD_DATE={date}");
    println!("cargo:rerun-if-env-changed=LUMINA_GIT_SHA");
    println!("cargo:rerun-if-env-changed=LUMINA_BUILD_DATE");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
}
