//! Thin client around the git command-line binary.
//!
//! Every operation spawns the configured git binary with an argv list and
//! captures its output. Exit code 0 is success; anything else surfaces as
//! [`PollerError::Git`] with the failing argv and stderr attached.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{PollerError, PollerResult};

/// Git subprocess client bound to one working repository.
#[derive(Debug, Clone)]
pub struct GitClient {
    bin: String,
    workdir: PathBuf,
}

impl GitClient {
    pub fn new(bin: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        GitClient {
            bin: bin.into(),
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn run_in(&self, cwd: Option<&Path>, args: &[&str]) -> PollerResult<String> {
        debug!(git = %self.bin, ?args, "running git");
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd.spawn()?.wait_with_output().await?;
        if !output.status.success() {
            return Err(PollerError::Git {
                args: args.iter().map(|a| a.to_string()).collect(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run git inside the working repository.
    async fn run(&self, args: &[&str]) -> PollerResult<String> {
        self.run_in(Some(&self.workdir), args).await
    }

    /// `git init [--bare] <workdir>`. The workdir's parent must exist.
    pub async fn init(&self, bare: bool) -> PollerResult<()> {
        let workdir = self.workdir.to_string_lossy().into_owned();
        let mut args = vec!["init"];
        if bare {
            args.push("--bare");
        }
        args.push(&workdir);
        self.run_in(None, &args).await?;
        Ok(())
    }

    /// Configured remote names.
    pub async fn remotes(&self) -> PollerResult<Vec<String>> {
        let out = self.run(&["remote"]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn remote_add(&self, name: &str, url: &str) -> PollerResult<()> {
        self.run(&["remote", "add", name, url]).await?;
        Ok(())
    }

    pub async fn fetch(&self, remote: &str, refspec: Option<&str>) -> PollerResult<()> {
        let mut args = vec!["fetch", remote];
        if let Some(refspec) = refspec {
            args.push(refspec);
        }
        self.run(&args).await?;
        Ok(())
    }

    /// Local branch names from `git branch --no-color`.
    pub async fn local_branches(&self) -> PollerResult<Vec<String>> {
        let out = self.run(&["branch", "--no-color"]).await?;
        Ok(out
            .lines()
            .filter(|l| l.len() > 2)
            .map(|l| l[2..].trim().to_string())
            .collect())
    }

    /// `git branch -f --no-track <local> <target>` - move a ref without a
    /// checkout, the bare-repository way.
    pub async fn branch_force(&self, local: &str, target: &str) -> PollerResult<()> {
        self.run(&["branch", "-f", "--no-track", local, target])
            .await?;
        Ok(())
    }

    pub async fn checkout_force(&self, branch: &str) -> PollerResult<()> {
        self.run(&["checkout", "-f", branch]).await?;
        Ok(())
    }

    /// Create or reset a local branch at `start` and check it out.
    pub async fn checkout_branch(&self, local: &str, start: &str) -> PollerResult<()> {
        self.run(&["checkout", "-B", local, start]).await?;
        Ok(())
    }

    pub async fn reset_hard(&self, target: &str) -> PollerResult<()> {
        self.run(&["reset", "--hard", target]).await?;
        Ok(())
    }

    pub async fn rev_parse(&self, rev: &str) -> PollerResult<String> {
        let out = self.run(&["rev-parse", rev]).await?;
        Ok(out.trim().to_string())
    }

    /// Whether `ancestor` is reachable from `descendant`.
    ///
    /// Exit code 1 from `merge-base --is-ancestor` means "no"; any other
    /// non-zero code is a real failure.
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> PollerResult<bool> {
        match self
            .run(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await
        {
            Ok(_) => Ok(true),
            Err(PollerError::Git { code: 1, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Octopus merge-base across every given tip.
    pub async fn merge_base_octopus(&self, tips: &[String]) -> PollerResult<String> {
        let mut args = vec!["merge-base", "--octopus"];
        args.extend(tips.iter().map(String::as_str));
        let out = self.run(&args).await?;
        Ok(out.trim().to_string())
    }

    /// One log query over `range` with a custom format string, first-parent
    /// only, with touched file names appended per commit.
    pub async fn log(&self, range: &str, format: &str) -> PollerResult<String> {
        let format_arg = format!("--format={format}");
        self.run(&["log", "--first-parent", "--name-only", &format_arg, range])
            .await
    }
}
