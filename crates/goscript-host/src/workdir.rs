use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

/// A private directory removed when dropped.
#[derive(Debug)]
pub(crate) struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub(crate) fn new(root: Option<&Path>, prefix: &str) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let base = root.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let pid = std::process::id();

        for _ in 0..10_000 {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = base.join(format!("{prefix}_{pid}_{n}"));
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create work dir: {}", path.display()))
                }
            }
        }
        anyhow::bail!("failed to create unique work dir under {}", base.display())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory now, reporting failure.
    pub(crate) fn remove(mut self) -> Result<()> {
        let path = std::mem::take(&mut self.path);
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("remove work dir: {}", path.display()))
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
