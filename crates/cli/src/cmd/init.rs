//! Write a template configuration file

use crate::config::Config;
use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(config_path, Config::template())?;

    println!(
        "{} {}",
        "Wrote template configuration to".green(),
        config_path.display()
    );
    println!("Edit 'src' and 'dst', then run {}", "dfb backup".bold());
    Ok(0)
}
