//! # Raster Tile Builder
//!
//! Turns a [`Slice2D`] into a georeferenced, compressed GeoTIFF tile:
//!
//! 1. derive a linear [`GeoTransform`] from the coordinate vectors
//! 2. warp into EPSG:4326 (north-up) from an unset source reference
//! 3. optionally resample to a pixel budget with [`compute_grid`](crate::downsample::compute_grid)
//! 4. write a tiled, deflate-compressed float32 GeoTIFF, atomically
//!
//! Tile file names encode every parameter that determines the content, so a
//! repeated request finds its tile by name prefix and skips regeneration.

pub mod geotiff;
pub mod geotransform;
pub mod warp;

pub use geotiff::{GeoTiffOptions, write_geotiff};
pub use geotransform::{Bounds, GeoTransform};
pub use warp::{SourceCrs, resample_to_limit, warp_to_wgs84};

use crate::error::{Result, TilerError};
use crate::extract::Slice2D;
use log::{debug, info};
use ndarray::Array2;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Extension of generated tiles.
pub const TILE_EXTENSION: &str = "tiff";

/// Rendering options shared by every tile a builder writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    pub tile_size: u32,
    pub deflate_level: u32,
    /// Sentinel written for missing data and excluded from statistics.
    pub replace_value: f64,
}

/// Everything that determines one tile's content.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSpec {
    pub dataset: String,
    pub channel: String,
    pub time_index: Option<usize>,
    pub depth_index: Option<usize>,
    pub longitude: (usize, usize),
    pub latitude: (usize, usize),
    pub res_limit: Option<usize>,
    pub display_label: String,
    /// Preview tiles use a shorter name and live outside the cache.
    pub preview: bool,
}

fn or_na(value: Option<usize>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "na".to_string())
}

impl TileSpec {
    /// File name up to and including `_mn=`; identical for identical requests.
    pub fn file_prefix(&self) -> String {
        if self.preview {
            return format!("preview_{}_{}_mn=", self.dataset, self.channel);
        }
        format!(
            "{}_dt={}_dp={}_lon={}_{}_lat={}_{}_res={}_lb={}_mn=",
            self.dataset,
            or_na(self.time_index),
            or_na(self.depth_index),
            self.longitude.0,
            self.longitude.1,
            self.latitude.0,
            self.latitude.1,
            or_na(self.res_limit),
            self.channel
        )
    }

    pub fn file_name(&self, min: f64, max: f64) -> String {
        format!(
            "{}{:.6}_mx={:.6}.{}",
            self.file_prefix(),
            min,
            max,
            TILE_EXTENSION
        )
    }

    /// Recovers the statistics encoded in a file name produced by [`Self::file_name`].
    pub fn parse_min_max(&self, file_name: &str) -> Option<(f64, f64)> {
        let stats = file_name
            .strip_prefix(&self.file_prefix())?
            .strip_suffix(&format!(".{}", TILE_EXTENSION))?;
        let (min, max) = stats.split_once("_mx=")?;
        Some((min.parse().ok()?, max.parse().ok()?))
    }
}

/// A tile on disk and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub channel: String,
    pub time_index: Option<usize>,
    pub depth_index: Option<usize>,
    pub longitude_range: (usize, usize),
    pub latitude_range: (usize, usize),
    pub min_value: f64,
    pub max_value: f64,
    pub display_label: String,
    pub res_limit: Option<usize>,
    pub width: usize,
    pub height: usize,
    /// Served from an existing file.
    pub cached: bool,
}

/// Minimum and maximum over cells that are finite and differ from
/// `replace_value`; `(0.0, 0.0)` when there are none.
pub fn value_range(data: &Array2<f64>, replace_value: f64) -> (f64, f64) {
    data.iter()
        .copied()
        .filter(|v| v.is_finite() && *v != replace_value)
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((0.0, 0.0))
}

/// Writes GeoTIFF tiles into one directory.
#[derive(Debug, Clone)]
pub struct RasterTileBuilder {
    dir: PathBuf,
    options: RasterOptions,
}

impl RasterTileBuilder {
    pub fn new<P: Into<PathBuf>>(dir: P, options: RasterOptions) -> Self {
        RasterTileBuilder {
            dir: dir.into(),
            options,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &RasterOptions {
        &self.options
    }

    /// Georeferences, warps and resamples a slice without writing it.
    pub fn render(&self, slice: &Slice2D, res_limit: Option<usize>) -> Result<(Array2<f64>, GeoTransform)> {
        if slice.data.is_empty() {
            return Err(TilerError::EmptySlice(String::from("slice")));
        }
        let gt = GeoTransform::from_coordinates(&slice.longitudes, &slice.latitudes)?;
        let nodata = self.options.replace_value;
        let (warped, gt) = warp_to_wgs84(&slice.data, &gt, SourceCrs::Unset, nodata)?;
        Ok(match res_limit {
            Some(limit) => resample_to_limit(&warped, &gt, limit, nodata),
            None => (warped, gt),
        })
    }

    /// Builds and writes the tile described by `spec`.
    pub fn build(&self, slice: &Slice2D, spec: &TileSpec) -> Result<TileArtifact> {
        if slice.data.is_empty() {
            return Err(TilerError::EmptySlice(spec.channel.clone()));
        }
        // Statistics cover the full extracted slice, not the resampled pixels.
        let (min, max) = value_range(&slice.data, self.options.replace_value);
        let (data, gt) = self.render(slice, spec.res_limit)?;
        let file_name = spec.file_name(min, max);
        let path = self.dir.join(&file_name);

        let size = self.write_atomic(&path, &data, &gt)?;
        let (height, width) = data.dim();
        info!("Wrote tile {} ({}x{}, {} bytes)", file_name, width, height, size);

        Ok(TileArtifact {
            file_name,
            path,
            size,
            channel: spec.channel.clone(),
            time_index: spec.time_index,
            depth_index: spec.depth_index,
            longitude_range: spec.longitude,
            latitude_range: spec.latitude,
            min_value: min,
            max_value: max,
            display_label: spec.display_label.clone(),
            res_limit: spec.res_limit,
            width,
            height,
            cached: false,
        })
    }

    /// Describes an already written tile, reading only its header.
    pub fn load_cached(&self, spec: &TileSpec, path: &Path) -> Result<TileArtifact> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (min, max) = spec.parse_min_max(&file_name).ok_or_else(|| {
            TilerError::Source(format!("cannot parse statistics from '{}'", file_name))
        })?;
        let size = fs::metadata(path)?.len();
        let file = File::open(path)?;
        let (width, height) = tiff::decoder::Decoder::new(file)
            .and_then(|mut d| d.dimensions())
            .map_err(|e| TilerError::Source(format!("unreadable tile '{}': {}", file_name, e)))?;

        Ok(TileArtifact {
            file_name,
            path: path.to_path_buf(),
            size,
            channel: spec.channel.clone(),
            time_index: spec.time_index,
            depth_index: spec.depth_index,
            longitude_range: spec.longitude,
            latitude_range: spec.latitude,
            min_value: min,
            max_value: max,
            display_label: spec.display_label.clone(),
            res_limit: spec.res_limit,
            width: width as usize,
            height: height as usize,
            cached: true,
        })
    }

    /// Writes to a temporary file in the target directory, then renames it
    /// into place. Returns the final size in bytes.
    fn write_atomic(&self, path: &Path, data: &Array2<f64>, gt: &GeoTransform) -> Result<u64> {
        let disk_error = |message: String| TilerError::DiskWrite {
            path: path.to_path_buf(),
            message,
        };

        fs::create_dir_all(&self.dir).map_err(|e| disk_error(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| disk_error(e.to_string()))?;
        debug!("Writing {} via {}", path.display(), tmp.path().display());

        let options = GeoTiffOptions {
            tile_size: self.options.tile_size,
            deflate_level: self.options.deflate_level,
            nodata: self.options.replace_value,
        };
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            write_geotiff(&mut writer, data, gt, &options).map_err(|e| disk_error(e.to_string()))?;
            writer.flush().map_err(|e| disk_error(e.to_string()))?;
        }

        let file = tmp.persist(path).map_err(|e| disk_error(e.error.to_string()))?;
        let size = file
            .metadata()
            .map_err(|e| disk_error(e.to_string()))?
            .len();
        Ok(size)
    }
}
