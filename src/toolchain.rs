//! Node.js toolchain checks.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

pub const MIN_NODE_MAJOR: u32 = 18;

/// Package managers in order of preference.
const PACKAGE_MANAGERS: [&str; 2] = ["pnpm", "npm"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainCheck {
    pub node_path: PathBuf,
    pub node_version: String,
    pub package_manager: String,
}

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("check node binary: node not found on PATH")]
    NodeNotFound,

    #[error("check package manager: neither pnpm nor npm found")]
    NoPackageManager,

    #[error("read node version: {0}")]
    VersionRead(String),

    #[error("invalid node version: {0}")]
    VersionParse(String),

    #[error("node version {version} is lower than required {required}")]
    VersionTooLow { version: String, required: u32 },
}

/// Seam over `PATH` lookup and short-lived command output so the checks can be faked.
pub trait Commander {
    fn look_path(&self, file: &str) -> Option<PathBuf>;
    fn output(&self, program: &str, args: &[&str]) -> Result<String, String>;
}

pub struct SystemCommander;

impl Commander for SystemCommander {
    fn look_path(&self, file: &str) -> Option<PathBuf> {
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths).find_map(|dir| executable_in(&dir, file))
    }

    fn output(&self, program: &str, args: &[&str]) -> Result<String, String> {
        let out = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| e.to_string())?;
        if !out.status.success() {
            return Err(format!("{program} exited with {}", out.status));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

fn executable_in(dir: &Path, file: &str) -> Option<PathBuf> {
    let candidate = dir.join(file);
    if candidate.is_file() {
        return Some(candidate);
    }
    if cfg!(windows) {
        for ext in ["exe", "cmd", "bat"] {
            let candidate = dir.join(format!("{file}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Locate node and a package manager, and require node `>= min_major`.
///
/// An explicit `package_manager` is taken as given and skips the pnpm/npm lookup.
pub fn check_environment(
    commander: &dyn Commander,
    min_major: u32,
    package_manager: Option<&str>,
) -> Result<ToolchainCheck, ToolchainError> {
    let node_path = commander
        .look_path("node")
        .ok_or(ToolchainError::NodeNotFound)?;

    let package_manager = match package_manager {
        Some(pm) => pm.to_string(),
        None => PACKAGE_MANAGERS
            .iter()
            .find(|pm| commander.look_path(pm).is_some())
            .ok_or(ToolchainError::NoPackageManager)?
            .to_string(),
    };

    let version_args: &[&str] = if cfg!(windows) { &["-v"] } else { &["--version"] };
    let version = commander
        .output("node", version_args)
        .map_err(ToolchainError::VersionRead)?
        .trim()
        .to_string();
    validate_node_version(&version, min_major)?;

    tracing::info!(node = %version, %package_manager, "toolchain ok");
    Ok(ToolchainCheck {
        node_path,
        node_version: version,
        package_manager,
    })
}

pub fn validate_node_version(version: &str, min_major: u32) -> Result<(), ToolchainError> {
    let trimmed = version.trim_start_matches('v');
    let major: u32 = trimmed
        .split('.')
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ToolchainError::VersionParse(version.to_string()))?;
    if major < min_major {
        return Err(ToolchainError::VersionTooLow {
            version: version.to_string(),
            required: min_major,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeCommander {
        paths: HashMap<&'static str, &'static str>,
        out: Result<String, String>,
    }

    impl Commander for FakeCommander {
        fn look_path(&self, file: &str) -> Option<PathBuf> {
            self.paths.get(file).map(PathBuf::from)
        }

        fn output(&self, _program: &str, _args: &[&str]) -> Result<String, String> {
            self.out.clone()
        }
    }

    fn fake(tools: &[(&'static str, &'static str)], version: &str) -> FakeCommander {
        FakeCommander {
            paths: tools.iter().copied().collect(),
            out: Ok(version.to_string()),
        }
    }

    #[test]
    fn finds_npm_and_node() {
        let res = check_environment(
            &fake(&[("node", "/usr/bin/node"), ("npm", "/usr/bin/npm")], "v18.16.0\n"),
            MIN_NODE_MAJOR,
            None,
        )
        .unwrap();
        assert_eq!(res.package_manager, "npm");
        assert_eq!(res.node_version, "v18.16.0");
        assert_eq!(res.node_path, PathBuf::from("/usr/bin/node"));
    }

    #[test]
    fn prefers_pnpm_over_npm() {
        let res = check_environment(
            &fake(
                &[("node", "/n"), ("npm", "/npm"), ("pnpm", "/pnpm")],
                "v20.1.0",
            ),
            MIN_NODE_MAJOR,
            None,
        )
        .unwrap();
        assert_eq!(res.package_manager, "pnpm");
    }

    #[test]
    fn version_too_low_is_rejected() {
        let err = check_environment(
            &fake(&[("node", "/n"), ("pnpm", "/p")], "v16.0.0\n"),
            MIN_NODE_MAJOR,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ToolchainError::VersionTooLow { required: 18, .. }));
    }

    #[test]
    fn missing_tools_are_reported() {
        let only_npm = fake(&[("npm", "/npm")], "v20");
        let err = check_environment(&only_npm, MIN_NODE_MAJOR, None).unwrap_err();
        assert!(matches!(err, ToolchainError::NodeNotFound));

        let only_node = fake(&[("node", "/n")], "v20");
        let err = check_environment(&only_node, MIN_NODE_MAJOR, None).unwrap_err();
        assert!(matches!(err, ToolchainError::NoPackageManager));
    }

    #[test]
    fn explicit_package_manager_skips_detection() {
        let only_node = fake(&[("node", "/n")], "v20.0.0");
        let res = check_environment(&only_node, MIN_NODE_MAJOR, Some("yarn")).unwrap();
        assert_eq!(res.package_manager, "yarn");
    }

    #[test]
    fn version_output_failure_is_reported() {
        let commander = FakeCommander {
            paths: [("node", "/n"), ("npm", "/npm")].into_iter().collect(),
            out: Err("boom".into()),
        };
        let err = check_environment(&commander, MIN_NODE_MAJOR, None).unwrap_err();
        assert!(matches!(err, ToolchainError::VersionRead(ref msg) if msg == "boom"));
    }

    #[test]
    fn validates_version_strings() {
        assert!(validate_node_version("v18.0.0", 18).is_ok());
        assert!(validate_node_version("22.3.1", 18).is_ok());
        assert!(matches!(
            validate_node_version("garbage", 18),
            Err(ToolchainError::VersionParse(_))
        ));
    }
}
