//! Batch configuration, read from a TOML file.

use crate::ept::Timeouts;
use crate::merge::GROUND_CLASS;
use crate::spatial_extent::SpatialExtent;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// URL of the archive's `ept.json`.
    pub ept_url: String,
    /// Target point spacing in metres. Limits traversal depth when set.
    #[serde(default)]
    pub resolution: Option<f64>,
    pub tile_size: f64,
    #[serde(default)]
    pub overlap: f64,
    pub study_area: SpatialExtent,
    #[serde(default = "default_ground_class")]
    pub ground_class: u8,
    pub output_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    /// Existing outputs smaller than this are treated as unfinished and fetched again.
    #[serde(default)]
    pub min_existing_bytes: u64,
}

fn default_ground_class() -> u8 {
    GROUND_CLASS
}

fn default_file_prefix() -> String {
    "ground_tile".to_string()
}

fn default_fetch_workers() -> usize {
    4
}

fn default_metadata_timeout_secs() -> u64 {
    30
}

fn default_node_timeout_secs() -> u64 {
    300
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "Failed to parse config TOML")?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size.is_nan() || self.tile_size <= 0.0 {
            bail!("tile_size must be positive, got {}", self.tile_size);
        }

        if self.overlap.is_nan() || self.overlap < 0.0 || self.overlap >= self.tile_size {
            bail!(
                "overlap must be in [0, tile_size), got {} with tile_size {}",
                self.overlap,
                self.tile_size
            );
        }

        if self.study_area.is_empty() {
            bail!("study_area is empty: {:?}", self.study_area);
        }

        if self.fetch_workers == 0 {
            bail!("fetch_workers must be at least 1");
        }

        if self.file_prefix.is_empty() {
            bail!("file_prefix must not be empty");
        }

        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            metadata: Duration::from_secs(self.metadata_timeout_secs),
            node: Duration::from_secs(self.node_timeout_secs),
        }
    }
}
