//! Version information module
//!
//! Provides version information including version number, build time, and Git metadata.

macro_rules! build_env {
    ($name:ident) => {
        env!(concat!("ASSISTANT_", stringify!($name)))
    };
}

pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD_TIME: &str = build_env!(BUILD_TIME);
pub const GIT_COMMIT: &str = build_env!(GIT_COMMIT);
pub const RUSTC_VERSION: &str = build_env!(RUSTC_VERSION);
pub const TARGET_TRIPLE: &str = build_env!(TARGET_TRIPLE);
pub const BUILD_MODE: &str = build_env!(BUILD_MODE);

/// Get simple version string (default for --version)
pub fn get_version_string() -> String {
    format!("{PROJECT_NAME} {VERSION}")
}

/// Get verbose version information string with full build details (for --version-verbose)
pub fn get_verbose_version_string() -> String {
    format!(
        "{}\n\n\
Build Information:\n\
  Build Time: {}\n\
  Build Mode: {}\n\
  Platform: {}\n\n\
Version Control:\n\
  Git Commit: {}\n\n\
Compiler:\n\
  {}",
        get_version_string(),
        BUILD_TIME,
        BUILD_MODE,
        TARGET_TRIPLE,
        GIT_COMMIT,
        RUSTC_VERSION,
    )
}

/// Get version number only
pub fn get_version() -> &'static str {
    VERSION
}

/// Print the startup banner with the listening address and configured providers.
#[expect(clippy::print_stdout, reason = "startup banner goes to the terminal")]
pub fn print_banner(host: &str, port: u16, providers: &[&str]) {
    let info: [(&str, String); 4] = [
        ("", PROJECT_NAME.to_string()),
        ("version", VERSION.to_string()),
        ("listening", format!("{host}:{port}")),
        (
            "providers",
            if providers.is_empty() {
                "none configured".to_string()
            } else {
                providers.join(", ")
            },
        ),
    ];

    let label_width = info.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
    println!();
    for (label, value) in &info {
        if label.is_empty() {
            println!("  {value}");
        } else {
            println!("  {label:<label_width$}  {value}");
        }
    }
    println!();
}
