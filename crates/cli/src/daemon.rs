//! Daemon lifecycle helpers: PID file and shutdown signal handling.

use std::path::{Path, PathBuf};
#[cfg(not(test))]
use tokio::signal;
use tracing::{info, warn};

/// PID file written while `wagpt start` runs.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.wagpt/wagpt.pid`
    pub fn default_path() -> PathBuf {
        crate::config::wagpt_home().join("wagpt.pid")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded by a previous run, if the file exists and parses.
    pub async fn read(&self) -> Option<u32> {
        let text = tokio::fs::read_to_string(&self.path).await.ok()?;
        text.trim().parse().ok()
    }

    /// Writes the current process ID, replacing a stale file.
    pub async fn write(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(previous) = self.read().await {
            warn!(pid = previous, "Replacing existing PID file");
        }
        let pid = std::process::id().to_string();
        tokio::fs::write(&self.path, pid).await?;
        info!("PID file written: {}", self.path.display());
        Ok(())
    }

    pub async fn remove(&self) {
        if self.path.exists() {
            let _ = tokio::fs::remove_file(&self.path).await;
            info!("PID file removed: {}", self.path.display());
        }
    }
}

/// Wait for SIGTERM or SIGINT.
#[cfg(not(test))]
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for ctrl-c");
        info!("Received Ctrl-C, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_points_to_wagpt_pid() {
        let path = PidFile::default_path();
        let text = path.to_string_lossy();
        assert!(text.contains(".wagpt"));
        assert!(text.ends_with("wagpt.pid"));
    }

    #[tokio::test]
    async fn write_read_and_remove_pid_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pid_path = tmp.path().join("nested/wagpt.pid");
        let pid_file = PidFile::new(&pid_path);

        assert_eq!(pid_file.read().await, None);
        pid_file.write().await.expect("pid write");
        assert_eq!(pid_file.read().await, Some(std::process::id()));

        pid_file.remove().await;
        assert!(!pid_file.path().exists());
    }

    #[tokio::test]
    async fn stale_pid_file_is_replaced() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pid_path = tmp.path().join("wagpt.pid");
        std::fs::write(&pid_path, "999999").expect("seed");

        let pid_file = PidFile::new(&pid_path);
        pid_file.write().await.expect("pid write");
        assert_eq!(pid_file.read().await, Some(std::process::id()));
    }
}
