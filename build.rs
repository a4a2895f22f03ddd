use std::process::Command;

// Build timestamp comes from chrono
use chrono::Utc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_else(|| "unknown".to_string());

    let git_hash = match git_hash.trim() {
        "" => "unknown",
        hash => hash,
    };

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BUILD_TIME={}", Utc::now().to_rfc3339());

    // Re-run if the HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");

    Ok(())
}
