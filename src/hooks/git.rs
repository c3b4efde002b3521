//! Uncommitted-change probe for watched repositories

use crate::error::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Paths reported by `git status --porcelain` for `repo`
pub async fn uncommitted_changes(repo: &Path, timeout: Duration) -> Result<Vec<String>> {
    let mut command = Command::new("git");
    command
        .arg("-C")
        .arg(repo)
        .args(["status", "--porcelain"])
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| Error::ExternalUnavailable(format!("git status timed out in {}", repo.display())))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ExternalUnavailable(format!(
            "git status failed in {}: {}",
            repo.display(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| l[3..].to_string())
        .collect())
}
