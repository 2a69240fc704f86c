//! # nctiles
//!
//! A Rust library for extracting two dimensional slices from NetCDF ocean
//! datasets and rendering them as georeferenced GeoTIFF tiles.
//!
//! ## Features
//!
//! - **Dimension normalization**: free-form dimension names mapped onto time, depth, longitude and latitude
//! - **Up-front validation**: every axis bound and limit checked before any data is read
//! - **Bounded output**: aspect-preserving downsampling of the (time x depth) grid and of tile pixels
//! - **Tile cache**: deterministic file names, cache hits, LRU eviction with high/low water marks
//! - **Point series**: values over time at the grid point nearest to a location
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nctiles::{ContentQuery, Dataset, EngineConfig, NetCdfSource, TileEngine};
//!
//! let dataset = Dataset::new(NetCdfSource::open("ocean.nc")?)?;
//! let engine = TileEngine::new(EngineConfig::default())?;
//!
//! let mut query = ContentQuery::new("temperature");
//! query.filenum_limit = Some(4);
//! query.res_limit = Some(250_000);
//!
//! let manifest = engine.generate_content(&dataset, &query)?;
//! for tile in manifest.tiles() {
//!     println!("{} [{}, {}]", tile.file_name, tile.min_value, tile.max_value);
//! }
//! # Ok::<(), nctiles::TilerError>(())
//! ```
//!
//! ## Query Example
//!
//! ```json
//! {
//!   "channel": "temperature",
//!   "datetime_start": 0,
//!   "datetime_end": 23,
//!   "longitude_start": -1,
//!   "longitude_end": -1,
//!   "res_limit": 250000,
//!   "filenum_limit": 4,
//!   "return_type": "tiff"
//! }
//! ```

pub mod axis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod downsample;
pub mod error;
pub mod extract;
pub mod info;
pub mod log;
pub mod query;
pub mod range;
pub mod raster;
pub mod series;
pub mod source;

#[cfg(test)]
mod tests;

pub use crate::axis::{AxisTable, CanonicalAxis};
pub use crate::cache::{EvictionReport, TileCacheManager};
pub use crate::config::EngineConfig;
pub use crate::dataset::Dataset;
pub use crate::error::{ErrorKind, Result, TilerError, ValidationError, ValidationErrors};
pub use crate::query::{ContentQuery, Manifest, ReturnType, TileEngine};
pub use crate::raster::{RasterTileBuilder, TileArtifact};
pub use crate::series::{PointQuery, PointSeries, QueryPoint, query_points};
pub use crate::source::{DataSource, MemorySource, NetCdfSource};
