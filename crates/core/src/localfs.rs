//! Local-filesystem transfer driver
//!
//! Backs both endpoints with plain directories. Used for local-disk
//! destinations and by every integration test; the interface is the same one
//! a network driver would implement.

use crate::checksum::{sha1_hex, ChecksumSet};
use crate::driver::{Remote, RemoteEntry, TransferDriver};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Driver over two local directories
pub struct LocalDriver {
    src_root: PathBuf,
    dst_root: PathBuf,
    /// Compute sha1 digests during listings and transfers
    pub with_hashes: bool,
    /// Pretend server-side copy is unsupported (forces reference moves)
    pub allow_copy_between: bool,
}

impl LocalDriver {
    pub fn new(src_root: impl Into<PathBuf>, dst_root: impl Into<PathBuf>) -> Self {
        Self {
            src_root: src_root.into(),
            dst_root: dst_root.into(),
            with_hashes: false,
            allow_copy_between: true,
        }
    }

    fn root(&self, remote: Remote) -> &Path {
        match remote {
            Remote::Src => &self.src_root,
            Remote::Dst => &self.dst_root,
        }
    }

    fn entry_for(&self, abs: &Path, rel: String) -> Result<RemoteEntry> {
        let meta = fs::metadata(abs)
            .with_context(|| format!("failed to stat {}", abs.display()))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());
        let checksum = if self.with_hashes && meta.is_file() {
            let data = fs::read(abs)?;
            let mut set = ChecksumSet::new();
            set.insert("sha1".to_string(), sha1_hex(&data));
            Some(set)
        } else {
            None
        };
        Ok(RemoteEntry {
            path: rel,
            size: if meta.is_dir() { 0 } else { meta.len() as i64 },
            mtime,
            checksum,
            is_dir: meta.is_dir(),
        })
    }
}

/// Normalize an OS path to the slash-separated remote form
fn to_remote_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl TransferDriver for LocalDriver {
    fn list(&self, remote: Remote, subdir: &str) -> Result<Vec<RemoteEntry>> {
        let root = self.root(remote);
        let base = if subdir.is_empty() {
            root.to_path_buf()
        } else {
            root.join(subdir)
        };
        if !base.exists() {
            anyhow::bail!("cannot list {}: no such directory", base.display());
        }

        let mut entries = Vec::new();
        for item in WalkDir::new(&base).min_depth(1).follow_links(false) {
            let item = item?;
            if item.file_type().is_symlink() {
                tracing::debug!("skipping symlink {}", item.path().display());
                continue;
            }
            let rel = item.path().strip_prefix(root)?;
            entries.push(self.entry_for(item.path(), to_remote_path(rel))?);
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn copy_to(&self, src_apath: &str, dst_rpath: &str) -> Result<RemoteEntry> {
        let src = self.src_root.join(src_apath);
        let dst = self.dst_root.join(dst_rpath);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dst)
            .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
        self.entry_for(&src, src_apath.to_string())
    }

    fn copy_between(&self, src_rpath: &str, dst_rpath: &str) -> Result<()> {
        let src = self.dst_root.join(src_rpath);
        let dst = self.dst_root.join(dst_rpath);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dst).with_context(|| {
            format!("server-side copy {} to {} failed", src.display(), dst.display())
        })?;
        Ok(())
    }

    fn supports_copy_between(&self) -> bool {
        self.allow_copy_between
    }

    fn put_small(&self, dst_rpath: &str, bytes: &[u8]) -> Result<()> {
        let dst = self.dst_root.join(dst_rpath);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dst, bytes)
            .with_context(|| format!("failed to write {}", dst.display()))
    }

    fn get_small(&self, rpath: &str) -> Result<Vec<u8>> {
        let path = self.dst_root.join(rpath);
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn delete(&self, rpath: &str) -> Result<()> {
        let path = self.dst_root.join(rpath);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("delete of absent object {rpath}; treating as done");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalDriver) {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        let driver = LocalDriver::new(&src, &dst);
        (tmp, driver)
    }

    #[test]
    fn test_list_files_and_dirs() -> Result<()> {
        let (tmp, driver) = setup();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub/empty"))?;
        fs::write(src.join("a.txt"), b"aaa")?;
        fs::write(src.join("sub/b.txt"), b"bb")?;

        let entries = driver.list(Remote::Src, "")?;
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub", "sub/b.txt", "sub/empty"]);

        let a = entries.iter().find(|e| e.path == "a.txt").unwrap();
        assert_eq!(a.size, 3);
        assert!(!a.is_dir);
        assert!(a.mtime.is_some());

        let sub = entries.iter().find(|e| e.path == "sub").unwrap();
        assert!(sub.is_dir);
        Ok(())
    }

    #[test]
    fn test_list_with_hashes() -> Result<()> {
        let (tmp, mut driver) = setup();
        driver.with_hashes = true;
        fs::write(tmp.path().join("src/a.txt"), b"a")?;

        let entries = driver.list(Remote::Src, "")?;
        let cs = entries[0].checksum.as_ref().unwrap();
        assert_eq!(cs["sha1"], "86f7e437faa5a7fce15d1ddcb9eaeaea377667b8");
        Ok(())
    }

    #[test]
    fn test_copy_put_get_delete() -> Result<()> {
        let (tmp, driver) = setup();
        fs::write(tmp.path().join("src/a.txt"), b"hello")?;

        let entry = driver.copy_to("a.txt", "a.19700101000001.txt")?;
        assert_eq!(entry.size, 5);
        assert_eq!(
            fs::read(tmp.path().join("dst/a.19700101000001.txt"))?,
            b"hello"
        );

        driver.put_small("a.19700101000002D.txt", b"DEL")?;
        assert_eq!(driver.get_small("a.19700101000002D.txt")?, b"DEL");

        driver.copy_between("a.19700101000001.txt", "b.19700101000003.txt")?;
        assert_eq!(driver.get_small("b.19700101000003.txt")?, b"hello");

        driver.delete("a.19700101000001.txt")?;
        assert!(!tmp.path().join("dst/a.19700101000001.txt").exists());
        // Absent deletes are fine
        driver.delete("a.19700101000001.txt")?;
        Ok(())
    }
}
