//! Build metadata.

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git branch at build time, or "unknown" outside a checkout.
pub const GIT_BRANCH: &str = match option_env!("VERGEN_GIT_BRANCH") {
    Some(branch) => branch,
    None => "unknown",
};

/// Short git SHA at build time, or "unknown" outside a checkout.
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// Version for `--version` output.
///
/// `0.1.0+main.abc1234` inside a checkout, plain `0.1.0` outside one.
pub fn version_string() -> String {
    if GIT_SHA == "unknown" {
        return PKG_VERSION.to_string();
    }
    let dirty = option_env!("VERGEN_GIT_DIRTY") == Some("true");
    format!(
        "{PKG_VERSION}+{GIT_BRANCH}.{}{}",
        &GIT_SHA[..7.min(GIT_SHA.len())],
        if dirty { ".dirty" } else { "" }
    )
}
