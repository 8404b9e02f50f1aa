use crate::config::CheckClean;
use crate::error::GitError;
use crate::log::GIT;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

///
/// Fails when the working tree containing `dir` has uncommitted changes
///
pub async fn check_clean(dir: &Path, point: CheckClean) -> Result<(), GitError> {
    let status = git(dir, &["status", "--porcelain"]).await?;

    if status.trim().is_empty() {
        debug!(target: GIT, msg = "Working tree is clean", point = %point);
        return Ok(());
    }

    Err(GitError::Dirty {
        point: point.to_string(),
        status,
    })
}

///
/// Absolute paths of files under `dir` changed since `rev`, untracked files included
///
pub async fn changed_since(dir: &Path, rev: &str) -> Result<HashSet<PathBuf>, GitError> {
    let changed = git(dir, &["diff", "--name-only", "--relative", rev]).await?;
    let untracked = git(dir, &["ls-files", "--others", "--exclude-standard"]).await?;

    let base = std::path::absolute(dir)?;

    let files: HashSet<PathBuf> = changed
        .lines()
        .chain(untracked.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| base.join(line))
        .collect();

    debug!(target: GIT, msg = "Changed files", since = rev, count = files.len());
    Ok(files)
}

async fn git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await?;

    if !output.status.success() {
        return Err(GitError::Command {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
