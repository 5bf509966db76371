//! Version-control backend using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for operations that need full transport support:**
//! - `clone_into` - any URL scheme or local path git itself understands
//! - `fetch` - update remote-tracking state before applying upstream changes
//! - `merge_ff_only` - fast-forward the mirror, refusing divergent histories
//! - `remote_head` - `ls-remote` resolves the origin HEAD without touching
//!   the mirror
//!
//! **libgit2 for read operations:**
//! - `open_repository` - clean API for opening existing repos
//! - `local_head` - efficient ref/commit reading
//! - `is_repository` - simple path validation

use git2::Repository;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    Parse(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    Clone(String),
    /// Fetch failed.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// Fast-forward merge failed (divergent histories).
    #[error("merge failed: {0}")]
    Merge(String),
    /// Resolving the origin HEAD failed.
    #[error("ls-remote failed: {0}")]
    LsRemote(String),
    /// The git child process ran past its deadline and was killed.
    #[error("git command timed out: {0}")]
    Timeout(String),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate that a git ref (branch name or commit SHA) does not contain
/// dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b == 0 || b < 0x20) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

/// Validate that a source locator is safe to pass to the git CLI.
///
/// Rejects:
/// - Empty strings
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
fn validate_source(value: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput("source cannot be empty".to_string()));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(
            "source cannot start with '-'".to_string(),
        ));
    }
    if value.bytes().any(|b| b == 0 || b < 0x20) {
        return Err(GitError::InvalidInput(
            "source cannot contain null or control characters".to_string(),
        ));
    }
    Ok(())
}

/// Returns true when the source looks like a remote/clonable URL rather than
/// a filesystem path: a known scheme, or an scp-like `user@host:path`.
pub fn is_remote_source(source: &str) -> bool {
    const SCHEMES: [&str; 5] = ["http://", "https://", "git://", "ssh://", "file://"];
    if SCHEMES.iter().any(|scheme| source.starts_with(scheme)) {
        return true;
    }
    source.contains('@') && source.contains(':') && !Path::new(source).exists()
}

/// Git CLI wrapper with security hardening and deadline-bounded children.
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a git command, killing the child once the deadline passes.
    ///
    /// Polls `try_wait` with exponential backoff (the same loop shape as the
    /// entry lock acquisition) so a hung transport cannot stall the caller
    /// past its deadline.
    fn run_with_deadline(&self, mut cmd: Command, deadline: Instant) -> Result<Output, GitError> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let mut sleep_duration = Duration::from_millis(10);
        let max_sleep = Duration::from_millis(200);

        loop {
            match child.try_wait()? {
                Some(_) => return Ok(child.wait_with_output()?),
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(GitError::Timeout(
                            "killed git child process past its deadline".to_string(),
                        ));
                    }
                    let remaining = deadline - now;
                    std::thread::sleep(sleep_duration.min(remaining));
                    sleep_duration = (sleep_duration * 2).min(max_sleep);
                }
            }
        }
    }

    /// Clone a repository (remote URL or local path) into `dest`.
    ///
    /// Creates `dest` as a full working-copy clone. On failure a destination
    /// that did not previously exist is removed again.
    pub fn clone_into(&self, source: &str, dest: &Path, deadline: Instant) -> Result<(), GitError> {
        validate_source(source)?;

        let dest_existed = dest.exists();

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let dest_str = dest.to_str().ok_or_else(|| {
            GitError::Parse("destination path is not valid UTF-8".to_string())
        })?;

        let mut cmd = self.command();
        cmd.arg("clone").arg(source).arg(dest_str);
        let output = self.run_with_deadline(cmd, deadline).inspect_err(|_| {
            if !dest_existed {
                let _ = std::fs::remove_dir_all(dest);
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !dest_existed {
                let _ = std::fs::remove_dir_all(dest);
            }
            return Err(GitError::Clone(stderr.into_owned()));
        }

        Ok(())
    }

    /// Resolve the origin's HEAD commit without touching any mirror.
    ///
    /// Uses `ls-remote`, so repeated calls are side-effect-free on both the
    /// source and any local state.
    pub fn remote_head(&self, source: &str, deadline: Instant) -> Result<String, GitError> {
        validate_source(source)?;

        let mut cmd = self.command();
        cmd.arg("ls-remote").arg(source).arg("HEAD");
        let output = self.run_with_deadline(cmd, deadline)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::LsRemote(stderr.into_owned()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let commit = stdout
            .split_whitespace()
            .next()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GitError::Parse(format!("ls-remote returned no HEAD for '{}'", source))
            })?;

        Ok(commit.to_string())
    }

    /// Fetch updates from origin into a mirror's remote-tracking state.
    ///
    /// The working tree is not modified; applying changes is a separate
    /// fast-forward merge.
    pub fn fetch(&self, mirror_path: &Path, deadline: Instant) -> Result<(), GitError> {
        let mirror_str = mirror_path
            .to_str()
            .ok_or_else(|| GitError::Parse("mirror path is not valid UTF-8".to_string()))?;

        let mut cmd = self.command();
        cmd.arg("-C").arg(mirror_str).args(["fetch", "origin"]);
        let output = self.run_with_deadline(cmd, deadline)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Fetch(stderr.into_owned()));
        }

        Ok(())
    }

    /// Fast-forward the mirror to a fetched commit.
    ///
    /// `--ff-only` refuses to merge divergent histories, so a mirror that
    /// gained local commits can never be silently overwritten.
    pub fn merge_ff_only(
        &self,
        mirror_path: &Path,
        commit: &str,
        deadline: Instant,
    ) -> Result<(), GitError> {
        validate_git_ref(commit, "commit")?;

        let mirror_str = mirror_path
            .to_str()
            .ok_or_else(|| GitError::Parse("mirror path is not valid UTF-8".to_string()))?;

        let mut cmd = self.command();
        cmd.arg("-C")
            .arg(mirror_str)
            .args(["merge", "--ff-only"])
            .arg(commit);
        let output = self.run_with_deadline(cmd, deadline)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Merge(stderr.into_owned()));
        }

        Ok(())
    }

    /// Read the mirror's HEAD commit and branch via libgit2.
    ///
    /// Returns `(commit_sha, branch_name)`; the branch is `None` for a
    /// detached HEAD.
    pub fn local_head(&self, path: &Path) -> Result<(String, Option<String>), GitError> {
        let repo = open_repository(path)?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?.id().to_string();
        let branch = if repo.head_detached()? {
            None
        } else {
            head.shorthand().map(String::from)
        };
        Ok((commit, branch))
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Check if a path contains a valid git repository.
pub fn is_repository(path: &Path) -> bool {
    Repository::open(path).is_ok()
}
