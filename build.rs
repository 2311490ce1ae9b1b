//! Stamps git and toolchain details into the binary for `persona-relay version`.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let commit = command_stdout("git", &["rev-parse", "--short=8", "HEAD"]);
    let branch = command_stdout("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let tree = match command_stdout("git", &["status", "--porcelain"]) {
        Some(changes) if changes.is_empty() => "clean",
        Some(_) => "dirty",
        None => "unknown",
    };
    let rustc = command_stdout(&env::var("RUSTC").unwrap_or_else(|_| "rustc".into()), &["--version"]);

    stamp("GIT_HASH", commit.as_deref());
    stamp("GIT_BRANCH", branch.as_deref());
    stamp("GIT_TREE", Some(tree));
    stamp("BUILT_AT", Some(&chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()));
    stamp("RUSTC", rustc.as_deref());
    for cargo_var in ["TARGET", "HOST", "PROFILE"] {
        stamp(cargo_var, env::var(cargo_var).ok().as_deref());
    }
}

fn stamp(key: &str, value: Option<&str>) {
    println!("cargo:rustc-env=RELAY_BUILD_{}={}", key, value.unwrap_or("unknown"));
}

/// Trimmed stdout of a successful command
fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}
