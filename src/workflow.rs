//! Workflow plans: which invocations each menu action enqueues.

use crate::env_file::{self, EnvFileError};
use crate::model::Invocation;
use std::path::Path;

pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// An ordered list of invocations plus notes about setup done while planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPlan {
    pub name: String,
    pub steps: Vec<Invocation>,
    pub notes: Vec<String>,
}

impl WorkflowPlan {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Vec::new(),
            notes: Vec::new(),
        }
    }
}

pub fn is_git_repository(project_dir: &Path) -> bool {
    project_dir.join(".git").exists()
}

pub fn git_steps() -> Vec<Invocation> {
    vec![
        Invocation::new("git", ["init"]),
        Invocation::new("git", ["add", "."]),
        Invocation::new("git", ["commit", "-m", INITIAL_COMMIT_MESSAGE]),
    ]
}

pub fn install_dependencies(package_manager: &str) -> WorkflowPlan {
    let mut plan = WorkflowPlan::new("Install dependencies");
    plan.steps.push(Invocation::new(package_manager, ["install"]));
    plan
}

/// `git init` → `git add .` → initial commit, or an empty plan when `.git` already exists.
pub fn initialize_git(project_dir: &Path) -> WorkflowPlan {
    let mut plan = WorkflowPlan::new("Initialize git");
    if is_git_repository(project_dir) {
        plan.notes.push("git already initialized".to_string());
    } else {
        plan.steps = git_steps();
    }
    plan
}

/// Full bootstrap: `.env` from defaults when missing, install, then git unless present.
///
/// Writing `.env` happens here, before anything is queued, so a bad template stops the
/// workflow before any command runs.
pub fn run_all(project_dir: &Path, package_manager: &str) -> Result<WorkflowPlan, EnvFileError> {
    let mut plan = WorkflowPlan::new("Run all");
    if !env_file::env_file_exists(project_dir) {
        env_file::create_with_defaults(project_dir)?;
        plan.notes.push(".env file created from defaults".to_string());
    }
    plan.steps.push(Invocation::new(package_manager, ["install"]));
    if is_git_repository(project_dir) {
        plan.notes.push("git already initialized".to_string());
    } else {
        plan.steps.extend(git_steps());
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn rendered(plan: &WorkflowPlan) -> Vec<String> {
        plan.steps.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn install_uses_the_detected_package_manager() {
        assert_eq!(rendered(&install_dependencies("pnpm")), vec!["pnpm install"]);
    }

    #[test]
    fn git_init_is_skipped_for_existing_repositories() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            rendered(&initialize_git(dir.path())),
            vec!["git init", "git add .", "git commit -m \"Initial commit\""]
        );

        fs::create_dir(dir.path().join(".git")).unwrap();
        let plan = initialize_git(dir.path());
        assert!(plan.steps.is_empty());
        assert_eq!(plan.notes, vec!["git already initialized"]);
    }

    #[test]
    fn run_all_creates_env_and_queues_every_step() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(env_file::EXAMPLE_FILE), "PORT=3000\n").unwrap();

        let plan = run_all(dir.path(), "npm").unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                "npm install",
                "git init",
                "git add .",
                "git commit -m \"Initial commit\""
            ]
        );
        assert_eq!(plan.notes, vec![".env file created from defaults"]);
        assert!(env_file::env_file_exists(dir.path()));
    }

    #[test]
    fn run_all_keeps_existing_env_and_repository() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(env_file::ENV_FILE), "PORT=1\n").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();

        let plan = run_all(dir.path(), "pnpm").unwrap();
        assert_eq!(rendered(&plan), vec!["pnpm install"]);
        assert_eq!(plan.notes, vec!["git already initialized"]);
        assert_eq!(
            fs::read_to_string(dir.path().join(env_file::ENV_FILE)).unwrap(),
            "PORT=1\n"
        );
    }

    #[test]
    fn run_all_fails_before_queueing_on_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_all(dir.path(), "npm").is_err());
    }
}
