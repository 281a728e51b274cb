use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

fn main() {
    embuild::espidf::sysenv::output();

    // Expose full git version (e.g. "v0.1.0" or "v0.1.0-3-gabcdef")
    let git_version = Command::new("git")
        .args(["describe", "--tags", "--always"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_else(|| env::var("CARGO_PKG_VERSION").unwrap());
    println!("cargo:rustc-env=GIT_VERSION={}", git_version.trim());
    // Rebuild when HEAD moves or tags change
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs/tags");

    // Bake the firmware version into the UI page
    let out_dir = env::var("OUT_DIR").unwrap();
    let html_path = Path::new("src/index.html");

    println!("cargo:rerun-if-changed=src/index.html");

    let html = fs::read_to_string(html_path).expect("Failed to read src/index.html");
    assert!(
        html.contains("{{VERSION}}"),
        "Expected a {{{{VERSION}}}} placeholder in index.html"
    );
    let html = html.replace("{{VERSION}}", git_version.trim());

    fs::write(Path::new(&out_dir).join("index.html"), html).expect("Failed to write index.html");
}
