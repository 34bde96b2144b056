//! Build and version information.

use serde::{Deserialize, Serialize};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git SHA captured by build.rs
pub const GIT_SHA: &str = env!("LUMINA_GIT_SHA");

/// UTC build date captured by build.rs
pub const BUILD_DATE: &str = env!("LUMINA_BUILD_DATE");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_sha: String,
    pub build_date: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            git_sha: GIT_SHA.to_string(),
            build_date: BUILD_DATE.to_string(),
        }
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lumina-core v{} ({}, {})", self.version, self.git_sha, self.build_date)
    }
}
