// Stamp the short git hash into `mlog-video --version`. Builds outside a
// checkout simply report the crate version.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok());

    if let Some(hash) = hash {
        println!("cargo:rustc-env=MLOG_VIDEO_GIT_HASH={}", hash.trim());
    }
}
