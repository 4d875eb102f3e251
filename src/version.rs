//! Build information.

use serde::Serialize;

/// Version, commit and build date of the running binary.
///
/// `GIT_COMMIT` and `BUILD_DATE` are read from the build environment when
/// present.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_date: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown"),
            build_date: option_env!("BUILD_DATE").unwrap_or("unknown"),
        }
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Version: {} - Commit: {} - Date: {}",
            self.version, self.git_commit, self.build_date
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version() {
        let info = VersionInfo::current();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(info.to_string().starts_with("Version: "));
    }
}
