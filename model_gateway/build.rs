use std::process::Command;

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn emit(name: &str, value: &str) {
    println!("cargo:rustc-env=ASSISTANT_{name}={value}");
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");

    emit(
        "BUILD_TIME",
        &chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string(),
    );
    emit(
        "GIT_COMMIT",
        &command_output("git", &["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into()),
    );
    emit(
        "RUSTC_VERSION",
        &command_output("rustc", &["--version"]).unwrap_or_else(|| "unknown".into()),
    );
    emit(
        "TARGET_TRIPLE",
        &std::env::var("TARGET").unwrap_or_else(|_| "unknown".into()),
    );
    emit(
        "BUILD_MODE",
        &std::env::var("PROFILE").unwrap_or_else(|_| "unknown".into()),
    );
}
