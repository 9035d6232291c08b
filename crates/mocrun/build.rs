// Build script: captures git commit, build timestamp, target triple and
// enabled features as compile-time environment variables for `mocrun --version`.

use std::process::Command;

fn capture(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
}

fn main() {
    let git_hash =
        capture("git", &["rev-parse", "--short=9", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=MOCRUN_GIT_HASH={git_hash}");

    let git_dirty = capture("git", &["status", "--porcelain"]).is_some_and(|out| !out.is_empty());
    println!(
        "cargo:rustc-env=MOCRUN_GIT_DIRTY={}",
        if git_dirty { "+dirty" } else { "" }
    );

    let build_ts = capture("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=MOCRUN_BUILD_TS={build_ts}");

    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_BROWSER");
    let features = if std::env::var("CARGO_FEATURE_BROWSER").is_ok() {
        "browser"
    } else {
        "none"
    };
    println!("cargo:rustc-env=MOCRUN_FEATURES={features}");

    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=MOCRUN_TARGET={target}");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs");
}
