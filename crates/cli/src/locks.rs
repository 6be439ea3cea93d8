//! Run lease
//!
//! Two concurrent runs against the same destination must never interleave;
//! the lease is an exclusive flock on a per-config lock file, held for the
//! whole run. Stale leases from dead processes are taken over.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive lease for one run against one configuration
pub struct RunLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

/// Lease file content
#[derive(Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    started_at: i64,
}

impl RunLock {
    /// Acquire the lease, taking over stale ones from dead processes
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create cache directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(lock_path)
            .with_context(|| format!("failed to open lease at {}", lock_path.display()))?;

        if !try_flock_exclusive(&file)? {
            if Self::is_stale(&mut file)? {
                tracing::warn!("removing stale run lease at {}", lock_path.display());
                drop(file);
                std::fs::remove_file(lock_path)?;
                return Self::acquire(lock_path);
            }
            anyhow::bail!(
                "another run is already in progress (lease held at {})",
                lock_path.display()
            );
        }

        Self::write_content(&mut file)?;
        Ok(Self {
            path: lock_path.to_path_buf(),
            file,
        })
    }

    fn is_stale(file: &mut File) -> Result<bool> {
        match Self::read_content(file) {
            Ok(content) => Ok(!is_process_alive(content.pid)),
            // Unreadable lease content is assumed stale
            Err(_) => Ok(true),
        }
    }

    fn write_content(file: &mut File) -> Result<()> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: chrono::Utc::now().timestamp(),
        };
        let serialized = serde_json::to_string(&content)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_content(file: &mut File) -> Result<LockContent> {
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
