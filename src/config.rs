//! # Engine Configuration
//!
//! Every tunable of the engine lives in [`EngineConfig`] and is passed into
//! the cache manager and the tile builders at construction time. There is no
//! global state.
//!
//! Values are resolved in this order, later sources winning:
//!
//! 1. built-in defaults
//! 2. a JSON or YAML file (picked by extension)
//! 3. `NCTILES_*` environment variables
//! 4. command line flags (applied by the binary)
//!
//! ## Example
//!
//! ```yaml
//! cache_dir: /var/cache/nctiles/tiles
//! preview_dir: /var/cache/nctiles/previews
//! high_water_bytes: 5368709120
//! low_water_bytes: 1073741824
//! replace_value: 9.9e36
//! ```

use crate::cache::TileCacheManager;
use crate::error::{Result, TilerError};
use crate::raster::{RasterOptions, RasterTileBuilder};
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const GIB: u64 = 1024 * 1024 * 1024;

/// Tunables for extraction, rendering and caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding generated tiles, subject to eviction.
    pub cache_dir: PathBuf,
    /// Directory holding preview tiles, never evicted.
    pub preview_dir: PathBuf,
    /// Eviction starts when the cache reaches this size.
    pub high_water_bytes: u64,
    /// Eviction stops once the cache is below this size.
    pub low_water_bytes: u64,
    /// Sentinel written in place of fill values.
    pub replace_value: f64,
    /// Fill value assumed for variables without a `_FillValue` attribute.
    pub default_fill_value: f64,
    /// GeoTIFF tile edge in pixels.
    pub tile_size: u32,
    /// zlib compression level, 0 to 9.
    pub deflate_level: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_dir: PathBuf::from("cache/tiles"),
            preview_dir: PathBuf::from("cache/previews"),
            high_water_bytes: 5 * GIB,
            low_water_bytes: GIB,
            replace_value: 9.9e36,
            default_fill_value: -10000.0,
            tile_size: 256,
            deflate_level: 6,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| TilerError::Config(format!("invalid value '{}' for {}", raw, key)))
}

impl EngineConfig {
    /// Loads a configuration file; `.yaml`/`.yml` are read as YAML, anything
    /// else as JSON. Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| TilerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        debug!("Loading engine configuration from {}", path.display());
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| TilerError::Config(e.to_string()))
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        serde_yaml::from_str(yaml_str).map_err(|e| TilerError::Config(e.to_string()))
    }

    /// Applies `NCTILES_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, keyed by variable name.
    ///
    /// Recognized keys: `NCTILES_CACHE_DIR`, `NCTILES_PREVIEW_DIR`,
    /// `NCTILES_HIGH_WATER_BYTES`, `NCTILES_LOW_WATER_BYTES`,
    /// `NCTILES_REPLACE_VALUE`, `NCTILES_DEFAULT_FILL_VALUE`,
    /// `NCTILES_TILE_SIZE`, `NCTILES_DEFLATE_LEVEL`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NCTILES_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("NCTILES_PREVIEW_DIR") {
            self.preview_dir = PathBuf::from(v);
        }
        if let Some(v) = get("NCTILES_HIGH_WATER_BYTES") {
            self.high_water_bytes = parse_env("NCTILES_HIGH_WATER_BYTES", &v)?;
        }
        if let Some(v) = get("NCTILES_LOW_WATER_BYTES") {
            self.low_water_bytes = parse_env("NCTILES_LOW_WATER_BYTES", &v)?;
        }
        if let Some(v) = get("NCTILES_REPLACE_VALUE") {
            self.replace_value = parse_env("NCTILES_REPLACE_VALUE", &v)?;
        }
        if let Some(v) = get("NCTILES_DEFAULT_FILL_VALUE") {
            self.default_fill_value = parse_env("NCTILES_DEFAULT_FILL_VALUE", &v)?;
        }
        if let Some(v) = get("NCTILES_TILE_SIZE") {
            self.tile_size = parse_env("NCTILES_TILE_SIZE", &v)?;
        }
        if let Some(v) = get("NCTILES_DEFLATE_LEVEL") {
            self.deflate_level = parse_env("NCTILES_DEFLATE_LEVEL", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.low_water_bytes > self.high_water_bytes {
            return Err(TilerError::Config(format!(
                "low_water_bytes ({}) exceeds high_water_bytes ({})",
                self.low_water_bytes, self.high_water_bytes
            )));
        }
        if self.tile_size == 0 || self.tile_size % 16 != 0 {
            return Err(TilerError::Config(format!(
                "tile_size ({}) must be a positive multiple of 16",
                self.tile_size
            )));
        }
        if self.deflate_level > 9 {
            return Err(TilerError::Config(format!(
                "deflate_level ({}) must be between 0 and 9",
                self.deflate_level
            )));
        }
        if !self.replace_value.is_finite() || self.replace_value.abs() > f32::MAX as f64 {
            return Err(TilerError::Config(format!(
                "replace_value ({}) must be a finite float32",
                self.replace_value
            )));
        }
        if self.default_fill_value.is_infinite() {
            return Err(TilerError::Config("default_fill_value must not be infinite".to_string()));
        }
        if self.cache_dir == self.preview_dir {
            return Err(TilerError::Config(
                "cache_dir and preview_dir must differ, previews are never evicted".to_string(),
            ));
        }
        Ok(())
    }

    pub fn raster_options(&self) -> RasterOptions {
        RasterOptions {
            tile_size: self.tile_size,
            deflate_level: self.deflate_level,
            replace_value: self.replace_value,
        }
    }

    pub fn cache_manager(&self) -> TileCacheManager {
        TileCacheManager::new(&self.cache_dir, self.high_water_bytes, self.low_water_bytes)
    }

    pub fn tile_builder(&self) -> RasterTileBuilder {
        RasterTileBuilder::new(&self.cache_dir, self.raster_options())
    }

    pub fn preview_builder(&self) -> RasterTileBuilder {
        RasterTileBuilder::new(&self.preview_dir, self.raster_options())
    }
}
