//! # CLI Module
//!
//! This module provides the command-line interface for nctiles, including:
//! - Argument parsing with clap
//! - Engine configuration files (JSON/YAML) and query files
//! - Environment variable support with the NCTILES_ prefix
//! - Configuration merging with priority CLI > environment > file > defaults
//! - Subcommands for tiling, point series, inspection, previews and eviction

use crate::config::EngineConfig;
use crate::query::{ContentQuery, ReturnType};
use crate::series::QueryPoint;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raster tiling engine for NetCDF ocean datasets
#[derive(Parser, Debug)]
#[command(name = "nctiles")]
#[command(about = "Extract slices from NetCDF ocean datasets and render georeferenced GeoTIFF tiles")]
#[command(version)]
#[command(author = "Rogerio Alves <rjmalves@users.noreply.github.com>")]
#[command(long_about = "
nctiles extracts two dimensional slices from time/depth/latitude/longitude
NetCDF grids and renders them as compressed, georeferenced GeoTIFF tiles.

FEATURES:
  • Dimension normalization: lon/longitude, lat/latitude, depth/level, time/datetime
  • Bounded output: --filenum-limit caps tiles, --res-limit caps pixels per tile
  • Tile cache: deterministic names, cache hits, LRU eviction by access time
  • Point series: values over time at the nearest grid point
  • Configuration files: JSON and YAML, with NCTILES_ environment overrides
  • Shell completions: Auto-completion for bash, zsh, fish, and PowerShell

EXAMPLES:
  # Four tiles over the whole grid
  nctiles tiles ocean.nc -n temperature --filenum-limit 4

  # Raw arrays for a sub-region, 2 decimals
  nctiles tiles ocean.nc -n salinity --longitude-start 10 --longitude-end 40 \\
    --return-type array --scalar-format 2 --output-format json

  # Time series at two points
  nctiles point ocean.nc -n temperature -p 30.5,122.1 -p 31.0,122.4,5

  # Dataset inspection
  nctiles info ocean.nc --format yaml

  # Generate completions
  nctiles completions bash > ~/.bash_completion.d/nctiles
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Engine configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "NCTILES_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Engine settings that can be overridden per invocation.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct EngineArgs {
    /// Tile cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Preview tile directory
    #[arg(long, global = true)]
    pub preview_dir: Option<PathBuf>,

    /// Cache size that triggers eviction, e.g. 5G or 500M
    #[arg(long, global = true, value_parser = parse_byte_size)]
    pub high_water: Option<u64>,

    /// Cache size eviction brings usage under, e.g. 1G
    #[arg(long, global = true, value_parser = parse_byte_size)]
    pub low_water: Option<u64>,
}

impl EngineArgs {
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.preview_dir {
            config.preview_dir = dir.clone();
        }
        if let Some(bytes) = self.high_water {
            config.high_water_bytes = bytes;
        }
        if let Some(bytes) = self.low_water {
            config.low_water_bytes = bytes;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate tiles (or raw arrays) for a content request
    #[command(long_about = "
Run a tiled-content request against a dataset.

Axis bounds are inclusive grid indices. Omitted bounds, or -1, leave that
side open. The (time x depth) combinations are reduced to at most
--filenum-limit cells, spread evenly over the requested ranges.

EXAMPLES:
  # Whole grid, at most 4 tiles
  nctiles tiles ocean.nc -n temperature --filenum-limit 4

  # Sub-region with a pixel budget
  nctiles tiles ocean.nc -n temperature \\
    --longitude-start 0 --longitude-end 59 --latitude-start 0 --latitude-end 49 \\
    --res-limit 1000

  # Request stored in a file, overridden on the command line
  nctiles tiles ocean.nc --query request.yaml --datetime-start 3
")]
    Tiles {
        /// NetCDF dataset path
        #[arg(value_name = "DATASET", env = "NCTILES_DATASET")]
        dataset: PathBuf,

        /// Query file (JSON or YAML) providing defaults for the request
        #[arg(long)]
        query: Option<PathBuf>,

        #[command(flatten)]
        args: QueryArgs,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Extract time series at point locations
    #[command(long_about = "
Extract the value of a variable at every time step for one or more points.

Each point snaps to the nearest grid index on every axis (ties go to the
lower coordinate). Fill values are returned as 0.

EXAMPLES:
  # One surface point
  nctiles point ocean.nc -n temperature -p 30.5,122.1

  # Several points, the second at 5 m depth, as JSON
  nctiles point ocean.nc -n temperature -p 30.5,122.1 -p 31.0,122.4,5 \\
    --output-format json
")]
    Point {
        /// NetCDF dataset path
        #[arg(value_name = "DATASET", env = "NCTILES_DATASET")]
        dataset: PathBuf,

        /// Variable to sample
        #[arg(short = 'n', long)]
        channel: String,

        /// Point as lat,lon or lat,lon,depth (repeatable)
        #[arg(short, long = "point", value_parser = parse_point, required = true, allow_hyphen_values = true)]
        points: Vec<QueryPoint>,
    },

    /// Show information about a dataset
    #[command(long_about = "
Inspect a NetCDF dataset and display:
• Dimensions, their sizes and canonical axis
• Coordinate ranges and time span
• Variables, units, and whether they can be rendered

EXAMPLES:
  nctiles info ocean.nc
  nctiles info ocean.nc --format json
")]
    Info {
        /// NetCDF dataset path
        #[arg(value_name = "DATASET", env = "NCTILES_DATASET")]
        dataset: PathBuf,

        /// Output format for dataset information
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Generate preview tiles
    #[command(long_about = "
Render the first time/depth slice of a variable over its full extent into the
preview directory. Without -n every renderable variable gets a preview.
Preview tiles are never evicted.

EXAMPLES:
  nctiles preview ocean.nc
  nctiles preview ocean.nc -n temperature --preview-dir /srv/previews
")]
    Preview {
        /// NetCDF dataset path
        #[arg(value_name = "DATASET", env = "NCTILES_DATASET")]
        dataset: PathBuf,

        /// Only this variable
        #[arg(short = 'n', long)]
        channel: Option<String>,
    },

    /// Run cache eviction now
    #[command(long_about = "
Scan the tile cache and, if it has reached the high-water mark, delete the
least recently accessed tiles until usage is below the low-water mark.

EXAMPLES:
  nctiles evict
  nctiles evict --status
  nctiles evict --high-water 2G --low-water 500M
")]
    Evict {
        /// Only report current usage
        #[arg(long)]
        status: bool,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for various shells.

INSTALLATION:
  # Bash
  nctiles completions bash > ~/.bash_completion.d/nctiles

  # Zsh
  nctiles completions zsh > ~/.zsh/completions/_nctiles

  # Fish
  nctiles completions fish > ~/.config/fish/completions/nctiles.fish

  # PowerShell
  nctiles completions powershell > nctiles.ps1
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Request parameters of the `tiles` command.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct QueryArgs {
    /// Variable to render
    #[arg(short = 'n', long)]
    pub channel: Option<String>,

    #[arg(long, allow_negative_numbers = true)]
    pub datetime_start: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub datetime_end: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub depth_start: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub depth_end: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub longitude_start: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub longitude_end: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub latitude_start: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub latitude_end: Option<i64>,

    /// Maximum pixels per tile
    #[arg(long)]
    pub res_limit: Option<usize>,

    /// Maximum number of (time, depth) tiles
    #[arg(long)]
    pub filenum_limit: Option<usize>,

    /// Return GeoTIFF tiles or raw arrays
    #[arg(long, value_enum)]
    pub return_type: Option<ReturnTypeArg>,

    /// Decimal places kept in array results
    #[arg(long)]
    pub scalar_format: Option<u32>,

    /// Name used at the start of tile file names instead of the dataset name
    #[arg(long)]
    pub dataset_key: Option<String>,
}

impl QueryArgs {
    /// Overrides every field of `query` that was given on the command line.
    pub fn apply_to(&self, query: &mut ContentQuery) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                target.clone_from(value);
            }
        }
        if let Some(channel) = &self.channel {
            query.channel = channel.clone();
        }
        set(&mut query.datetime_start, &self.datetime_start);
        set(&mut query.datetime_end, &self.datetime_end);
        set(&mut query.depth_start, &self.depth_start);
        set(&mut query.depth_end, &self.depth_end);
        set(&mut query.longitude_start, &self.longitude_start);
        set(&mut query.longitude_end, &self.longitude_end);
        set(&mut query.latitude_start, &self.latitude_start);
        set(&mut query.latitude_end, &self.latitude_end);
        set(&mut query.res_limit, &self.res_limit);
        set(&mut query.filenum_limit, &self.filenum_limit);
        set(&mut query.scalar_format, &self.scalar_format);
        set(&mut query.dataset_key, &self.dataset_key);
        if let Some(return_type) = self.return_type {
            query.return_type = return_type.into();
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnTypeArg {
    /// GeoTIFF tiles written to the cache
    Tiff,
    /// Raw numeric grids in the output
    Array,
}

impl From<ReturnTypeArg> for ReturnType {
    fn from(arg: ReturnTypeArg) -> Self {
        match arg {
            ReturnTypeArg::Tiff => ReturnType::Tiff,
            ReturnTypeArg::Array => ReturnType::Array,
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

/// Parse a point from command line argument
/// Format: lat,lon or lat,lon,depth
pub fn parse_point(s: &str) -> Result<QueryPoint, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err("Point must be in format 'lat,lon' or 'lat,lon,depth'".to_string());
    }

    let latitude = parts[0]
        .parse::<f64>()
        .map_err(|_| "Invalid latitude in point")?;
    let longitude = parts[1]
        .parse::<f64>()
        .map_err(|_| "Invalid longitude in point")?;
    let depth = match parts.get(2) {
        Some(d) => Some(d.parse::<f64>().map_err(|_| "Invalid depth in point")?),
        None => None,
    };

    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("Latitude {} outside [-90, 90]", latitude));
    }

    Ok(QueryPoint::new(latitude, longitude, depth))
}

/// Parse a byte size such as `1073741824`, `512M`, `5G` or `1.5GiB`
pub fn parse_byte_size(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value = number
        .parse::<f64>()
        .map_err(|_| format!("Invalid size '{}'", s))?;
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => return Err(format!("Unknown size unit '{}'", other)),
    };
    if value < 0.0 || !value.is_finite() {
        return Err(format!("Invalid size '{}'", s));
    }
    Ok((value * multiplier as f64).round() as u64)
}
