//! JSON Persistence Module
//!
//! Reads pipeline inputs and writes pipeline artifacts as pretty JSON.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_OUTPUT_DIR: &str = "./tmp";
pub const GENERATED_MARKET_MAP: &str = "generated-market-map.json";
pub const GENERATED_EXCLUSIONS: &str = "generated-market-map-exclusions.json";
pub const OVERRIDE_MARKET_MAP: &str = "override-market-map.json";
pub const MARKET_MAP_REMOVALS: &str = "market-map-removals.json";
pub const MARKET_MAP_UPDATES: &str = "market-map-updates.json";
pub const MARKET_MAP_ADDITIONS: &str = "market-map-additions.json";

/// Serialize `value` as pretty JSON, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let raw = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), "wrote artifact");
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Output directory holding the default artifact names
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    dir: PathBuf,
}

impl Default for ArtifactDir {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl ArtifactDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Explicit path if given, else the default artifact name in this dir
    pub fn resolve(&self, explicit: Option<&Path>, name: &str) -> PathBuf {
        explicit.map(Path::to_path_buf).unwrap_or_else(|| self.path(name))
    }
}
