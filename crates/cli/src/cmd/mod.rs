//! CLI subcommands

pub mod backup;
pub mod import;
pub mod init;
pub mod ls;
pub mod prune;
pub mod refresh;
pub mod restore;
pub mod snapshot;
pub mod summary;
pub mod timestamps;
pub mod tree;
pub mod versions;

use crate::config::{self, Config};
use crate::locks::RunLock;
use anyhow::{Context as _, Result};
use dfb_core::LocalDriver;
use dfb_engine::RunConfig;
use dfb_index::IndexStore;
use std::path::{Path, PathBuf};

/// Everything a command needs: config, driver, index, and (for mutating
/// commands) the exclusive run lease
pub struct Context {
    pub config: Config,
    pub run_config: RunConfig,
    pub driver: LocalDriver,
    pub store: IndexStore,
    pub snap_dir: PathBuf,
    pub now: i64,
    #[allow(dead_code)]
    lock: Option<RunLock>,
}

impl Context {
    /// Open the context for a command. Mutating commands pass
    /// `exclusive = true` to hold the run lease for their whole lifetime.
    pub fn open(config_path: &Path, exclusive: bool) -> Result<Self> {
        let config = Config::load(config_path)?;
        let config_id = config.config_id(config_path);
        let cache_root = config::cache_root()?;
        std::fs::create_dir_all(&cache_root)
            .with_context(|| format!("failed to create {}", cache_root.display()))?;

        let lock = if exclusive {
            Some(RunLock::acquire(&config::lock_path(&cache_root, &config_id))?)
        } else {
            None
        };

        let run_config = config.to_run_config(&config_id)?;
        let driver = config.driver()?;
        let store = IndexStore::open(&config::db_path(&cache_root, &config_id))?;
        let snap_dir = config::snap_dir(&cache_root, &config_id);

        Ok(Self {
            config,
            run_config,
            driver,
            store,
            snap_dir,
            now: chrono::Utc::now().timestamp(),
            lock,
        })
    }

    /// Parse a user time expression against this context's run time
    pub fn parse_time(&self, expr: &str) -> Result<i64> {
        dfb_core::parse_time_expr(expr, self.now)
    }
}

/// Write action-dump lines to a file ("-" for stdout), gzipping when the
/// name ends in .gz
pub fn write_dump(lines: &[dfb_core::ActionLine], output: &Path) -> Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut rendered = String::new();
    for line in lines {
        rendered.push_str(&line.to_json()?);
        rendered.push('\n');
    }

    if output == Path::new("-") {
        print!("{rendered}");
        return Ok(());
    }

    if output.extension().and_then(|e| e.to_str()) == Some("gz") {
        let mut encoder = GzEncoder::new(std::fs::File::create(output)?, Compression::default());
        encoder.write_all(rendered.as_bytes())?;
        encoder.finish()?;
    } else {
        std::fs::write(output, rendered)?;
    }
    tracing::info!("wrote {} action line(s) to {}", lines.len(), output.display());
    Ok(())
}
