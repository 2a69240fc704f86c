//! # Dataset Information Module
//!
//! Builds the ingest-time description of a dataset (dimensions with their
//! canonical axis, variables with units and renderability), renders preview
//! tiles, and prints descriptions in human, JSON, YAML or CSV form.

use crate::axis::CanonicalAxis;
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{Result as TilerResult, TilerError};
use crate::extract::{FillPolicy, SliceRequest, extract_2d};
use crate::raster::{RasterTileBuilder, TileArtifact, TileSpec};
use crate::source::DataSource;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Information about a dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionMeta {
    pub name: String,
    pub length: usize,
    /// Canonical axis, `None` for index-only or unrecognized dimensions.
    pub axis: Option<CanonicalAxis>,
    pub values: Option<Vec<f64>>,
    pub units: Option<String>,
}

/// Information about a variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableMeta {
    pub name: String,
    pub long_name: Option<String>,
    pub units: Option<String>,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    pub fill_value: Option<f64>,
    /// References both longitude and latitude.
    pub raster: bool,
}

/// Complete description of a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub name: String,
    pub dimensions: Vec<DimensionMeta>,
    pub variables: Vec<VariableMeta>,
    /// First and last time step as calendar strings.
    pub time_span: Option<(String, String)>,
    pub total_dimensions: usize,
    pub total_variables: usize,
}

/// Describes every dimension and data variable of a dataset.
pub fn describe_dataset<S: DataSource>(dataset: &Dataset<S>) -> TilerResult<DatasetMeta> {
    let mut dimensions = Vec::new();
    for dim in dataset.source().dimensions()? {
        let axis = dataset.axes.kind_of(&dim.name);
        let canonical = axis.and_then(|a| dataset.axes.get(a));
        dimensions.push(DimensionMeta {
            name: dim.name.clone(),
            length: dim.len,
            axis,
            values: canonical.map(|a| a.values.clone()),
            units: canonical.and_then(|a| a.units.clone()),
        });
    }

    let variables: Vec<VariableMeta> = dataset
        .data_variables()?
        .into_iter()
        .map(|v| VariableMeta {
            name: v.name().to_string(),
            long_name: v.info.attributes.long_name.clone(),
            units: v.info.attributes.units.clone(),
            dimensions: v.canonical_dimensions(),
            shape: v.info.shape(),
            fill_value: v.info.attributes.fill_value,
            raster: v.is_raster_capable(),
        })
        .collect();

    let n_time = dataset.axes.size(CanonicalAxis::Time);
    let time_span = match n_time {
        0 => None,
        n => dataset.time_at(0).zip(dataset.time_at(n - 1)),
    };

    Ok(DatasetMeta {
        name: dataset.name(),
        total_dimensions: dimensions.len(),
        total_variables: variables.len(),
        dimensions,
        variables,
        time_span,
    })
}

/// Renders the first time/depth slice of `channel` over its full extent into
/// the builder's directory.
pub fn generate_preview<S: DataSource>(
    dataset: &Dataset<S>,
    channel: &str,
    builder: &RasterTileBuilder,
    config: &EngineConfig,
) -> TilerResult<TileArtifact> {
    let variable = dataset.variable(channel)?;
    variable.check_lat_lng()?;

    let full = |axis: CanonicalAxis| (0, dataset.axes.size(axis).saturating_sub(1));
    let time_index = variable.references(CanonicalAxis::Time).then_some(0);
    let request = SliceRequest {
        variable: channel.to_string(),
        longitude: full(CanonicalAxis::Longitude),
        latitude: full(CanonicalAxis::Latitude),
        time_index,
        depth_index: variable.references(CanonicalAxis::Depth).then_some(0),
    };
    let fill = FillPolicy::new(
        variable
            .info
            .attributes
            .fill_value
            .unwrap_or(config.default_fill_value),
        config.replace_value,
    );

    let slice = extract_2d(dataset, &request, &fill)?;
    let spec = TileSpec {
        dataset: dataset.cache_key().to_string(),
        channel: channel.to_string(),
        time_index: request.time_index,
        depth_index: request.depth_index,
        longitude: request.longitude,
        latitude: request.latitude,
        res_limit: None,
        display_label: dataset.time_label(time_index),
        preview: true,
    };
    debug!("Generating preview for '{}'", channel);
    builder.build(&slice, &spec)
}

/// Previews for every raster-capable variable; failures are logged and skipped.
pub fn generate_previews<S: DataSource>(
    dataset: &Dataset<S>,
    builder: &RasterTileBuilder,
    config: &EngineConfig,
) -> TilerResult<Vec<TileArtifact>> {
    let mut previews = Vec::new();
    for variable in dataset.raster_variables()? {
        match generate_preview(dataset, variable.name(), builder, config) {
            Ok(artifact) => previews.push(artifact),
            Err(e @ TilerError::DiskWrite { .. }) => return Err(e),
            Err(e) => warn!("No preview for '{}': {}", variable.name(), e),
        }
    }
    Ok(previews)
}

fn format_values(values: &[f64]) -> String {
    match values {
        [] => String::from("[]"),
        [only] => format!("[{}]", only),
        [first, .., last] => format!("[{} .. {}]", first, last),
    }
}

/// Print dataset info in human-readable format
pub fn print_dataset_info_human(info: &DatasetMeta) {
    println!("Dataset Information:");
    println!("  Name: {}", info.name);
    if let Some((first, last)) = &info.time_span {
        println!("  Time Span: {} -> {}", first, last);
    }
    println!("  Dimensions: {} total", info.total_dimensions);
    for dim in &info.dimensions {
        let axis = dim
            .axis
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    {} ({}) axis={} {}",
            dim.name,
            dim.length,
            axis,
            dim.values.as_deref().map(format_values).unwrap_or_default()
        );
    }
    println!("  Variables: {} total", info.total_variables);
    for var in &info.variables {
        println!(
            "    {}{} - dimensions: [{}]",
            var.name,
            if var.raster { " [raster]" } else { "" },
            var.dimensions.join(", ")
        );
        if let Some(long_name) = &var.long_name {
            println!("      @long_name: {}", long_name);
        }
        if let Some(units) = &var.units {
            println!("      @units: {}", units);
        }
        if let Some(fill) = var.fill_value {
            println!("      @_FillValue: {}", fill);
        }
    }
}

/// Print dataset info in JSON format
pub fn print_dataset_info_json(info: &DatasetMeta) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(info).context("Failed to serialize dataset info to JSON")?
    );
    Ok(())
}

/// Print dataset info in YAML format
pub fn print_dataset_info_yaml(info: &DatasetMeta) -> Result<()> {
    let yaml = serde_yaml::to_string(info).context("Failed to serialize dataset info to YAML")?;
    println!("{}", yaml);
    Ok(())
}

/// Print dataset info in CSV format (variables only)
pub fn print_dataset_info_csv(info: &DatasetMeta) -> Result<()> {
    println!("variable_name,units,dimensions,shape,raster");
    for var in &info.variables {
        println!(
            "{},{},\"{}\",\"{}\",{}",
            var.name,
            var.units.as_deref().unwrap_or(""),
            var.dimensions.join(";"),
            var.shape
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(";"),
            var.raster
        );
    }
    Ok(())
}
