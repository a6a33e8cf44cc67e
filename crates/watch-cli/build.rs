use std::process::Command;

fn main() {
    let described = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let full = if described.is_empty() {
        version
    } else {
        format!("{} ({})", version, described)
    };

    println!("cargo:rustc-env=CHANNEL_WATCH_VERSION={}", full);
    println!("cargo:rerun-if-changed=../../.git/HEAD");
}
