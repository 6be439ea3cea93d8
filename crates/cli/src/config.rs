//! Backup configuration
//!
//! One TOML file per backup pair. The `config_id` keys everything cached
//! locally (index database, run lease, snapshot drafts); by default it is
//! derived from the canonical config path so two configs never collide.

use anyhow::{bail, Context, Result};
use dfb_core::checksum::sha1_hex;
use dfb_core::LocalDriver;
use dfb_engine::{Attrib, RunConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Tool namespace under the user cache directory
pub const TOOL_NS: &str = "dfb";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source directory being backed up
    pub src: String,
    /// Destination directory holding the dated artifacts
    pub dst: String,

    /// Source-to-source comparison: "size", "mtime", or "hash"
    pub compare: String,
    /// Source-to-destination comparison; defaults to `compare`
    pub dst_compare: Option<String>,
    /// Rename tracking: "size", "mtime", "hash", or "false"
    pub renames: String,
    /// Rename tracking against destination-derived rows; defaults to `renames`
    pub dst_renames: Option<String>,

    /// Never rename-track files at or below this many bytes
    pub min_rename_size: i64,
    /// Moves above this size may use server-side copy
    pub min_ref_size: i64,
    pub server_side_copy_moves: bool,
    /// Preserve empty directories with marker files
    pub empty_directory_markers: bool,
    /// Allowed mtime drift in seconds
    pub mtime_tolerance: f64,

    pub upload_workers: usize,
    pub reference_workers: usize,
    pub delete_workers: usize,
    pub queue_depth: usize,

    pub disable_prune: bool,
    pub disable_refresh: bool,

    /// Stable identifier; derived from the config path when unset
    pub config_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            src: String::new(),
            dst: String::new(),
            compare: "mtime".to_string(),
            dst_compare: None,
            renames: "mtime".to_string(),
            dst_renames: None,
            min_rename_size: 0,
            min_ref_size: 0,
            server_side_copy_moves: false,
            empty_directory_markers: false,
            mtime_tolerance: 1.1,
            upload_workers: 4,
            reference_workers: 2,
            delete_workers: 2,
            queue_depth: 64,
            disable_prune: false,
            disable_refresh: false,
            config_id: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.src.is_empty() || self.dst.is_empty() {
            bail!("config must set both 'src' and 'dst'");
        }
        Ok(())
    }

    /// The stable identifier for this configuration
    pub fn config_id(&self, config_path: &Path) -> String {
        if let Some(id) = &self.config_id {
            return clean_config_id(id);
        }
        let canonical = config_path
            .canonicalize()
            .unwrap_or_else(|_| config_path.to_path_buf());
        let digest = sha1_hex(canonical.to_string_lossy().as_bytes());
        let stem = config_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        clean_config_id(&format!("{stem}-{}", &digest[..12]))
    }

    /// Resolve to the engine's run configuration
    pub fn to_run_config(&self, config_id: &str) -> Result<RunConfig> {
        let compare = Attrib::parse(&self.compare)?;
        let renames = Attrib::parse(&self.renames)?;
        let dst_compare = match &self.dst_compare {
            Some(s) => Attrib::parse(s)?,
            None => compare,
        };
        let dst_renames = match &self.dst_renames {
            Some(s) => Attrib::parse(s)?,
            None => renames,
        };
        Ok(RunConfig {
            config_id: config_id.to_string(),
            compare,
            dst_compare,
            renames,
            dst_renames,
            min_rename_size: self.min_rename_size,
            min_ref_size: self.min_ref_size,
            server_side_copy_moves: self.server_side_copy_moves,
            empty_dir_markers: self.empty_directory_markers,
            mtime_tolerance: self.mtime_tolerance,
            upload_workers: self.upload_workers,
            reference_workers: self.reference_workers,
            delete_workers: self.delete_workers,
            queue_depth: self.queue_depth,
            disable_prune: self.disable_prune,
            disable_refresh: self.disable_refresh,
        })
    }

    /// Construct the transfer driver for this pair
    pub fn driver(&self) -> Result<LocalDriver> {
        let needs_hash = self.compare.eq_ignore_ascii_case("hash")
            || self.renames.eq_ignore_ascii_case("hash")
            || matches!(&self.dst_compare, Some(s) if s.eq_ignore_ascii_case("hash"))
            || matches!(&self.dst_renames, Some(s) if s.eq_ignore_ascii_case("hash"));
        let mut driver = LocalDriver::new(&self.src, &self.dst);
        driver.with_hashes = needs_hash;
        Ok(driver)
    }

    /// Template written by `dfb init`
    pub fn template() -> String {
        let mut out = String::from(
            "# dfb configuration\n\
             #\n\
             # Every artifact at the destination carries the UTC timestamp of the\n\
             # run that produced it; nothing is ever modified or renamed after\n\
             # upload. Point 'src' at the tree to back up and 'dst' at the\n\
             # destination tree.\n\n",
        );
        out.push_str(&toml::to_string_pretty(&Config::default()).unwrap_or_default());
        out
    }
}

/// Restrict a config id to filesystem-safe characters
fn clean_config_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Root of the local cache: `<user cache>/dfb`
pub fn cache_root() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("could not determine the user cache directory")?;
    Ok(base.join(TOOL_NS))
}

/// Index database path for a config
pub fn db_path(cache_root: &Path, config_id: &str) -> PathBuf {
    cache_root.join(format!("{config_id}.db"))
}

/// Run lease path for a config
pub fn lock_path(cache_root: &Path, config_id: &str) -> PathBuf {
    cache_root.join(format!("{config_id}.lock"))
}

/// Local snapshot draft directory for a config
pub fn snap_dir(cache_root: &Path, config_id: &str) -> PathBuf {
    cache_root.join(config_id).join("snapshots")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_parses() {
        let template = Config::template();
        let parsed: Config = toml::from_str(&template).unwrap();
        assert_eq!(parsed.compare, "mtime");
        assert!(!parsed.server_side_copy_moves);
    }

    #[test]
    fn test_load_and_defaults() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("backup.toml");
        fs::write(&path, "src = \"/a\"\ndst = \"/b\"\ncompare = \"hash\"\n")?;

        let config = Config::load(&path)?;
        assert_eq!(config.src, "/a");
        assert_eq!(config.compare, "hash");
        assert_eq!(config.renames, "mtime");

        // dst_compare falls back to compare
        let rc = config.to_run_config("x")?;
        assert_eq!(rc.compare, Attrib::Hash);
        assert_eq!(rc.dst_compare, Attrib::Hash);
        Ok(())
    }

    #[test]
    fn test_load_rejects_missing_endpoints() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("bad.toml");
        fs::write(&path, "src = \"/a\"\n")?;
        assert!(Config::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_config_id_stable_and_clean() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("my backup!.toml");
        fs::write(&path, "src = \"/a\"\ndst = \"/b\"\n")?;
        let config = Config::load(&path)?;

        let a = config.config_id(&path);
        let b = config.config_id(&path);
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()
            || c == '-'
            || c == '_'
            || c == '.'));

        let mut named = config.clone();
        named.config_id = Some("work/laptop".to_string());
        assert_eq!(named.config_id(&path), "work_laptop");
        Ok(())
    }

    #[test]
    fn test_renames_disabled() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("c.toml");
        fs::write(&path, "src = \"/a\"\ndst = \"/b\"\nrenames = \"false\"\n")?;
        let rc = Config::load(&path)?.to_run_config("x")?;
        assert_eq!(rc.renames, Attrib::Disabled);
        Ok(())
    }
}
