//! Build details stamped in by `build.rs`

use std::fmt;

/// State of the git tree the binary was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Clean,
    Dirty,
    Unknown,
}

impl TreeState {
    fn from_stamp(stamp: &str) -> Self {
        match stamp {
            "clean" => TreeState::Clean,
            "dirty" => TreeState::Dirty,
            _ => TreeState::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short commit hash, or "unknown" outside a checkout
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    pub tree: TreeState,
    pub built_at: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    /// `debug` or `release`
    pub profile: &'static str,
    pub rustc: &'static str,
}


impl BuildInfo {
    /// `0.1.0-abc1234`, with `-dirty` appended for uncommitted builds
    pub fn full_version(&self) -> String {
        let mut full = format!("{}-{}", self.version, self.git_hash);
        if self.tree == TreeState::Dirty {
            full.push_str("-dirty");
        }
        full
    }

    /// Discord rejects API calls without a `DiscordBot (url, version)` agent.
    pub fn user_agent(&self) -> String {
        format!("DiscordBot ({}, {})", self.name, self.version)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let commit = match self.tree {
            TreeState::Dirty => format!("{} (dirty)", self.git_hash),
            _ => self.git_hash.to_string(),
        };
        let rows = [
            ("Version", self.version.to_string()),
            ("Git Hash", commit),
            ("Git Branch", self.git_branch.to_string()),
            ("Built", self.built_at.to_string()),
            ("Profile", self.profile.to_string()),
            ("Target", self.target.to_string()),
            ("Host", self.host.to_string()),
            ("Compiler", self.rustc.to_string()),
        ];

        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        for (label, value) in rows {
            writeln!(f, "  {:<12}{}", format!("{}:", label), value)?;
        }
        Ok(())
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("RELAY_BUILD_GIT_HASH"),
        git_branch: env!("RELAY_BUILD_GIT_BRANCH"),
        tree: TreeState::from_stamp(env!("RELAY_BUILD_GIT_TREE")),
        built_at: env!("RELAY_BUILD_BUILT_AT"),
        target: env!("RELAY_BUILD_TARGET"),
        host: env!("RELAY_BUILD_HOST"),
        profile: env!("RELAY_BUILD_PROFILE"),
        rustc: env!("RELAY_BUILD_RUSTC"),
    }
}

pub fn print_version() {
    print!("{}", build_info());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_stamps_present() {
        let build = build_info();
        assert_eq!(build.name, "persona-relay");
        assert!(!build.version.is_empty());
        assert!(!build.target.is_empty());
    }

    #[test]
    fn test_tree_state_from_stamp() {
        assert_eq!(TreeState::from_stamp("clean"), TreeState::Clean);
        assert_eq!(TreeState::from_stamp("dirty"), TreeState::Dirty);
        assert_eq!(TreeState::from_stamp("unknown"), TreeState::Unknown);
    }

    #[test]
    fn test_full_version_marks_dirty_tree() {
        let dirty = BuildInfo {
            git_hash: "abc1234",
            tree: TreeState::Dirty,
            ..build_info()
        };
        assert_eq!(dirty.full_version(), format!("{}-abc1234-dirty", dirty.version));

        let clean = BuildInfo {
            tree: TreeState::Clean,
            ..dirty
        };
        assert!(!clean.full_version().ends_with("-dirty"));
    }

    #[test]
    fn test_user_agent() {
        let ua = build_info().user_agent();
        assert!(ua.starts_with("DiscordBot ("));
        assert!(ua.contains("persona-relay"));
    }

    #[test]
    fn test_display_rows() {
        let display = build_info().to_string();
        assert!(display.starts_with("persona-relay "));
        assert!(display.contains("Version:"));
        assert!(display.contains("Git Hash:"));
        assert!(display.contains("Target:"));
    }
}
