// ── Version control ───────────────────────────────────────────────────────────
//
// Thin pass-through to the `git` executable, scoped to one repository root.
// Every failure comes back as `ConstructError::Vcs` carrying git's own stderr.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::error::{ConstructError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Open the repository whose working tree is `root`.
    pub(crate) fn open(root: &Path) -> Result<Self> {
        if !root.join(".git").exists() {
            return Err(ConstructError::NotARepository(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Run `git <args>` in the repository and return stdout.
    pub(crate) fn run(&self, args: &[&str]) -> Result<String> {
        let command = args.first().copied().unwrap_or_default().to_owned();
        log::debug!("git {} in {}", args.join(" "), self.root.display());
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .env_remove("GIT_DIR")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ConstructError::Vcs {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            let message = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return Err(ConstructError::Vcs { command, message });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub(crate) fn status(&self) -> Result<String> {
        self.run(&["status", "--short", "--branch"])
    }

    pub(crate) fn add_all(&self) -> Result<String> {
        self.run(&["add", "--all"])
    }

    pub(crate) fn commit(&self, message: &str) -> Result<String> {
        self.run(&["commit", "-m", message])
    }

    pub(crate) fn fetch(&self) -> Result<String> {
        self.run(&["fetch"])
    }

    pub(crate) fn pull(&self) -> Result<String> {
        self.run(&["pull"])
    }

    pub(crate) fn push(&self) -> Result<String> {
        self.run(&["push"])
    }

    pub(crate) fn checkout(&self, branch: &str) -> Result<String> {
        self.run(&["checkout", branch])
    }

    pub(crate) fn log(&self, limit: usize) -> Result<String> {
        self.run(&["log", "--oneline", &format!("-n{limit}")])
    }

    pub(crate) fn diff(&self) -> Result<String> {
        self.run(&["diff"])
    }

    /// Branch name for the status line; `None` on a detached head or error.
    pub(crate) fn current_branch(&self) -> Option<String> {
        let branch = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).ok()?;
        let branch = branch.trim();
        if branch.is_empty() || branch == "HEAD" {
            None
        } else {
            Some(branch.to_owned())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
