use std::process::Command;

/// Short hash of the checked-out commit, or "unknown" outside a git tree.
fn git_short_hash() -> String {
    Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs/heads");

    // consumed by `gridcalc --version`
    println!("cargo:rustc-env=GRIDCALC_COMMIT={}", git_short_hash());
    println!(
        "cargo:rustc-env=GRIDCALC_TARGET={}",
        std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string())
    );
}
