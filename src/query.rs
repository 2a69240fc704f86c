//! # Query Orchestrator
//!
//! Runs a tiled-content request end to end:
//!
//! ```text
//! validate -> (time x depth) downsampling -> pre-flight eviction
//!          -> per cell: cache lookup | extract_2d -> build tile
//!          -> manifest
//! ```
//!
//! Validation problems are reported up front, for every field at once.
//! Failures while producing a single cell are recorded on that cell so the
//! rest of the batch is still useful; only a disk write failure stops the
//! batch, leaving a manifest marked incomplete.

use crate::axis::CanonicalAxis;
use crate::cache::{EvictionReport, TileCacheManager};
use crate::config::EngineConfig;
use crate::dataset::{Dataset, Variable};
use crate::downsample::{compute_grid, compute_indices};
use crate::error::{ErrorKind, Result, TilerError, ValidationError, ValidationErrors};
use crate::extract::{FillPolicy, Slice2D, SliceRequest, extract_2d};
use crate::range::{AxisRequest, RangeRequest, ResolvedRanges, validate_all};
use crate::raster::{RasterTileBuilder, TileArtifact, TileSpec, value_range};
use crate::source::DataSource;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What a content request returns per (time, depth) cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    #[default]
    Tiff,
    Array,
}

/// A tiled-content request.
///
/// Axis bounds are inclusive indices; `None` or `-1` leaves that side
/// unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentQuery {
    pub channel: String,
    pub datetime_start: Option<i64>,
    pub datetime_end: Option<i64>,
    pub depth_start: Option<i64>,
    pub depth_end: Option<i64>,
    pub longitude_start: Option<i64>,
    pub longitude_end: Option<i64>,
    pub latitude_start: Option<i64>,
    pub latitude_end: Option<i64>,
    /// Pixel budget per tile.
    pub res_limit: Option<usize>,
    /// Maximum number of (time, depth) cells.
    pub filenum_limit: Option<usize>,
    pub return_type: ReturnType,
    /// Decimal places kept in array results.
    pub scalar_format: Option<u32>,
    /// Replaces the dataset name at the start of tile file names.
    pub dataset_key: Option<String>,
}

fn unbounded_sentinel(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v != -1)
}

impl ContentQuery {
    pub fn new(channel: impl Into<String>) -> Self {
        ContentQuery {
            channel: channel.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| TilerError::Config(e.to_string()))
    }

    /// Reads a query from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| TilerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| TilerError::Config(e.to_string()))
            }
            _ => Self::from_json(&content),
        }
    }

    /// Axis bounds with the `-1` sentinel turned into "unbounded".
    pub fn range_request(&self) -> RangeRequest {
        let axis = |s: Option<i64>, e: Option<i64>| {
            AxisRequest::new(unbounded_sentinel(s), unbounded_sentinel(e))
        };
        RangeRequest {
            time: axis(self.datetime_start, self.datetime_end),
            depth: axis(self.depth_start, self.depth_end),
            longitude: axis(self.longitude_start, self.longitude_end),
            latitude: axis(self.latitude_start, self.latitude_end),
        }
    }

    fn validate_limits(&self, errors: &mut ValidationErrors) {
        for (field, value) in [("res_limit", self.res_limit), ("filenum_limit", self.filenum_limit)] {
            if value == Some(0) {
                errors.push(ValidationError::InvalidLimit {
                    field: field.to_string(),
                    value: 0,
                });
            }
        }
    }
}

/// Raw grid for one cell of an array request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayGrid {
    /// Rows from north to south; fill cells are `null`.
    pub values: Vec<Vec<Option<f64>>>,
    pub longitudes: Vec<f64>,
    /// Latitude of each row, matching `values`.
    pub latitudes: Vec<f64>,
    pub min_value: f64,
    pub max_value: f64,
    pub display_label: String,
    pub longitude_range: (usize, usize),
    pub latitude_range: (usize, usize),
}

/// Result of one (time, depth) cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryContent {
    Tile(TileArtifact),
    Array(ArrayGrid),
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub time_index: Option<usize>,
    pub depth_index: Option<usize>,
    #[serde(flatten)]
    pub content: EntryContent,
}

impl ManifestEntry {
    pub fn tile(&self) -> Option<&TileArtifact> {
        match &self.content {
            EntryContent::Tile(t) => Some(t),
            _ => None,
        }
    }

    pub fn array(&self) -> Option<&ArrayGrid> {
        match &self.content {
            EntryContent::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.content, EntryContent::Error { .. })
    }
}

/// Size of the downsampled (time, depth) grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridShape {
    pub time: usize,
    pub depth: usize,
}

/// Everything produced for one content request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub dataset: String,
    pub channel: String,
    pub return_type: ReturnType,
    pub grid: GridShape,
    pub ranges: ResolvedRanges,
    /// False when a disk write failure stopped the batch early.
    pub complete: bool,
    pub entries: Vec<ManifestEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction: Option<EvictionReport>,
}

impl Manifest {
    pub fn tiles(&self) -> impl Iterator<Item = &TileArtifact> {
        self.entries.iter().filter_map(ManifestEntry::tile)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.is_error())
    }
}

/// Validated request, ready to execute.
struct Plan {
    variable: Variable,
    ranges: ResolvedRanges,
    time_indices: Vec<Option<usize>>,
    depth_indices: Vec<Option<usize>>,
    fill: FillPolicy,
}

/// Indices to visit on a non-spatial axis; `[None]` when the variable lacks it.
fn axis_indices(range: Option<(usize, usize)>, present: bool, selected: usize) -> Vec<Option<usize>> {
    match (present, range) {
        (true, Some((start, end))) => compute_indices(end - start + 1, selected)
            .into_iter()
            .map(|i| Some(start + i))
            .collect(),
        _ => vec![None],
    }
}

/// Builds tiles and arrays for content requests.
pub struct TileEngine {
    config: EngineConfig,
    builder: RasterTileBuilder,
    cache: TileCacheManager,
}

impl TileEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(TileEngine {
            builder: config.tile_builder(),
            cache: config.cache_manager(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &TileCacheManager {
        &self.cache
    }

    pub fn generate_content<S: DataSource>(&self, dataset: &Dataset<S>, query: &ContentQuery) -> Result<Manifest> {
        self.generate_content_with_progress(dataset, query, |_, _| {})
    }

    /// Like [`Self::generate_content`], calling `on_cell(done, total)` after
    /// every cell.
    pub fn generate_content_with_progress<S, F>(
        &self,
        dataset: &Dataset<S>,
        query: &ContentQuery,
        mut on_cell: F,
    ) -> Result<Manifest>
    where
        S: DataSource,
        F: FnMut(usize, usize),
    {
        let plan = self.plan(dataset, query)?;
        let grid = GridShape {
            time: plan.time_indices.len(),
            depth: plan.depth_indices.len(),
        };
        let total = grid.time * grid.depth;
        info!(
            "Content request '{}': {} x {} cells ({:?})",
            query.channel, grid.time, grid.depth, query.return_type
        );

        let eviction = match query.return_type {
            ReturnType::Tiff => Some(self.cache.ensure_capacity()),
            ReturnType::Array => None,
        };

        let dataset_key = query.dataset_key.clone().unwrap_or_else(|| dataset.cache_key().to_string());
        let mut entries = Vec::with_capacity(total);
        let mut complete = true;

        'cells: for &time_index in &plan.time_indices {
            for &depth_index in &plan.depth_indices {
                let request = SliceRequest {
                    variable: plan.variable.name().to_string(),
                    longitude: plan.ranges.longitude.unwrap_or((0, 0)),
                    latitude: plan.ranges.latitude.unwrap_or((0, 0)),
                    time_index,
                    depth_index,
                };
                let label = dataset.time_label(time_index);

                let outcome = match query.return_type {
                    ReturnType::Tiff => self
                        .tile_cell(dataset, &request, &plan.fill, &dataset_key, query.res_limit, &label)
                        .map(EntryContent::Tile),
                    ReturnType::Array => self
                        .array_cell(dataset, &request, &plan.fill, query, &label)
                        .map(EntryContent::Array),
                };

                let content = match outcome {
                    Ok(content) => content,
                    Err(e) => {
                        let fatal = e.is_fatal_for_batch();
                        if fatal {
                            error!("Stopping batch at time={:?} depth={:?}: {}", time_index, depth_index, e);
                        } else {
                            warn!("Cell time={:?} depth={:?} failed: {}", time_index, depth_index, e);
                        }
                        entries.push(ManifestEntry {
                            time_index,
                            depth_index,
                            content: EntryContent::Error {
                                kind: e.kind(),
                                message: e.to_string(),
                            },
                        });
                        on_cell(entries.len(), total);
                        if fatal {
                            complete = false;
                            break 'cells;
                        }
                        continue;
                    }
                };
                entries.push(ManifestEntry {
                    time_index,
                    depth_index,
                    content,
                });
                on_cell(entries.len(), total);
            }
        }

        Ok(Manifest {
            dataset: dataset_key,
            channel: query.channel.clone(),
            return_type: query.return_type,
            grid,
            ranges: plan.ranges,
            complete,
            entries,
            eviction,
        })
    }

    fn plan<S: DataSource>(&self, dataset: &Dataset<S>, query: &ContentQuery) -> Result<Plan> {
        let variable = dataset.variable(&query.channel)?;
        let request = query.range_request();

        let mut errors = ValidationErrors::new();
        query.validate_limits(&mut errors);
        if let Err(e) = variable.check_lat_lng() {
            errors.push(e);
        }
        let ranges = validate_all(&dataset.axes, &request)
            .map_err(|range_errors| errors.0.extend(range_errors.0))
            .unwrap_or_default();
        errors.into_result()?;

        for axis in [CanonicalAxis::Time, CanonicalAxis::Depth] {
            if request.get(axis).is_set() && !variable.references(axis) {
                return Err(TilerError::AxisMissingForSelector {
                    variable: variable.name().to_string(),
                    axis: axis.name().to_string(),
                });
            }
        }

        let has_time = variable.references(CanonicalAxis::Time);
        let has_depth = variable.references(CanonicalAxis::Depth);
        let n_time = if has_time { ranges.len(CanonicalAxis::Time) } else { 1 };
        let n_depth = if has_depth { ranges.len(CanonicalAxis::Depth) } else { 1 };
        let (sel_time, sel_depth) = match query.filenum_limit {
            Some(limit) => compute_grid(n_time, n_depth, limit),
            None => (n_time, n_depth),
        };
        debug!(
            "(time x depth) {} x {} reduced to {} x {}",
            n_time, n_depth, sel_time, sel_depth
        );

        let fill_value = variable
            .info
            .attributes
            .fill_value
            .unwrap_or(self.config.default_fill_value);

        Ok(Plan {
            time_indices: axis_indices(ranges.time, has_time, sel_time),
            depth_indices: axis_indices(ranges.depth, has_depth, sel_depth),
            ranges,
            variable,
            fill: FillPolicy::new(fill_value, self.config.replace_value),
        })
    }

    fn tile_cell<S: DataSource>(
        &self,
        dataset: &Dataset<S>,
        request: &SliceRequest,
        fill: &FillPolicy,
        dataset_key: &str,
        res_limit: Option<usize>,
        label: &str,
    ) -> Result<TileArtifact> {
        let spec = TileSpec {
            dataset: dataset_key.to_string(),
            channel: request.variable.clone(),
            time_index: request.time_index,
            depth_index: request.depth_index,
            longitude: request.longitude,
            latitude: request.latitude,
            res_limit,
            display_label: label.to_string(),
            preview: false,
        };

        if let Some(path) = self.cache.find_by_prefix(&spec.file_prefix()) {
            match self.builder.load_cached(&spec, &path) {
                Ok(artifact) => {
                    if let Err(e) = self.cache.touch(&path) {
                        warn!("Could not refresh access time of {}: {}", path.display(), e);
                    }
                    debug!("Cache hit {}", artifact.file_name);
                    return Ok(artifact);
                }
                Err(e) => warn!("Ignoring unreadable cached tile {}: {}", path.display(), e),
            }
        }

        let slice = extract_2d(dataset, request, fill)?;
        self.builder.build(&slice, &spec)
    }

    fn array_cell<S: DataSource>(
        &self,
        dataset: &Dataset<S>,
        request: &SliceRequest,
        fill: &FillPolicy,
        query: &ContentQuery,
        label: &str,
    ) -> Result<ArrayGrid> {
        let slice = extract_2d(dataset, request, fill)?;
        let replace = self.config.replace_value;
        let (min_value, max_value) = value_range(&slice.data, replace);
        let (values, longitudes, latitudes) =
            sample_grid(&slice, query.res_limit, replace, query.scalar_format);
        Ok(ArrayGrid {
            values,
            longitudes,
            latitudes,
            min_value,
            max_value,
            display_label: label.to_string(),
            longitude_range: request.longitude,
            latitude_range: request.latitude,
        })
    }
}

fn round_to(value: f64, digits: Option<u32>) -> f64 {
    match digits {
        Some(d) => {
            let scale = 10f64.powi(d as i32);
            (value * scale).round() / scale
        }
        None => value,
    }
}

/// Subsamples a slice to the pixel budget and lays it out north-up, with
/// sentinel and non-finite cells as `None`.
fn sample_grid(
    slice: &Slice2D,
    res_limit: Option<usize>,
    replace: f64,
    digits: Option<u32>,
) -> (Vec<Vec<Option<f64>>>, Vec<f64>, Vec<f64>) {
    let (height, width) = slice.data.dim();
    let (n_cols, n_rows) = match res_limit {
        Some(limit) => compute_grid(width, height, limit),
        None => (width, height),
    };
    let cols = compute_indices(width, n_cols);
    let mut rows = compute_indices(height, n_rows);

    let ascending = matches!(slice.latitudes.as_slice(), [first, .., last] if last > first);
    if ascending {
        rows.reverse();
    }

    let values = rows
        .iter()
        .map(|&r| {
            cols.iter()
                .map(|&c| {
                    let v = slice.data[[r, c]];
                    (v.is_finite() && v != replace).then(|| round_to(v, digits))
                })
                .collect()
        })
        .collect();
    let longitudes = cols.iter().filter_map(|&c| slice.longitudes.get(c).copied()).collect();
    let latitudes = rows.iter().filter_map(|&r| slice.latitudes.get(r).copied()).collect();
    (values, longitudes, latitudes)
}
