//! # Point Time Series
//!
//! For each requested `(latitude, longitude, depth)` point, snaps to the
//! nearest grid indices and returns the variable's value at every time step.
//! Fill values come back as `0.0`.

use crate::axis::CanonicalAxis;
use crate::dataset::Dataset;
use crate::error::{Result, TilerError, ValidationError, ValidationErrors};
use crate::extract::{FillPolicy, Selector, SelectorMap, apply_fill_substitution, read_selection};
use crate::source::DataSource;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// A location to sample. `depth` is ignored for variables without depth and
/// defaults to the first level otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub depth: Option<f64>,
}

impl QueryPoint {
    pub fn new(latitude: f64, longitude: f64, depth: Option<f64>) -> Self {
        QueryPoint {
            latitude,
            longitude,
            depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointQuery {
    pub channel: String,
    pub points: Vec<QueryPoint>,
}

/// Values of one point over all time steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSeries {
    pub point: QueryPoint,
    pub latitude_index: usize,
    pub longitude_index: usize,
    pub depth_index: Option<usize>,
    /// Grid coordinates the point snapped to.
    pub grid_latitude: f64,
    pub grid_longitude: f64,
    pub values: Vec<f64>,
    /// Calendar time per step, when the time units are understood.
    pub times: Option<Vec<String>>,
}

struct Snapped {
    latitude: usize,
    longitude: usize,
    depth: Option<usize>,
}

fn snap<S: DataSource>(
    dataset: &Dataset<S>,
    axis: CanonicalAxis,
    value: f64,
    errors: &mut ValidationErrors,
) -> Option<usize> {
    let Some((grid, (min, max))) = dataset.axes.get(axis).and_then(|g| Some((g, g.bounds()?))) else {
        errors.push(ValidationError::InvalidParameter {
            field: axis.name().to_string(),
            message: "axis has no finite coordinates".to_string(),
        });
        return None;
    };
    if !(value >= min && value <= max) {
        errors.push(ValidationError::PointOutOfRange {
            axis: axis.name().to_string(),
            value,
            min,
            max,
        });
        return None;
    }
    grid.nearest_index(value)
}

/// Runs a point query.
pub fn query_points<S: DataSource>(
    dataset: &Dataset<S>,
    query: &PointQuery,
    default_fill_value: f64,
) -> Result<Vec<PointSeries>> {
    let variable = dataset.variable(&query.channel)?;

    let mut errors = ValidationErrors::new();
    for axis in [CanonicalAxis::Time, CanonicalAxis::Latitude, CanonicalAxis::Longitude] {
        if !variable.references(axis) {
            errors.push(ValidationError::MissingAxis {
                variable: variable.name().to_string(),
                axis: axis.name().to_string(),
            });
        }
    }
    errors.into_result()?;

    let has_depth = variable.references(CanonicalAxis::Depth);
    let mut errors = ValidationErrors::new();
    let mut snapped = Vec::with_capacity(query.points.len());
    for point in &query.points {
        let latitude = snap(dataset, CanonicalAxis::Latitude, point.latitude, &mut errors);
        let longitude = snap(dataset, CanonicalAxis::Longitude, point.longitude, &mut errors);
        let depth = match (has_depth, point.depth) {
            (true, Some(d)) => snap(dataset, CanonicalAxis::Depth, d, &mut errors),
            (true, None) => Some(0),
            (false, _) => None,
        };
        if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
            snapped.push(Snapped {
                latitude,
                longitude,
                depth,
            });
        }
    }
    errors.into_result()?;

    let fill = FillPolicy::new(
        variable
            .info
            .attributes
            .fill_value
            .unwrap_or(default_fill_value),
        0.0,
    );
    let times = dataset.time_reference.as_ref().and_then(|_| {
        let n = dataset.axes.size(CanonicalAxis::Time);
        (0..n).map(|i| dataset.time_at(i)).collect::<Option<Vec<_>>>()
    });

    info!("Point query '{}' for {} points", query.channel, query.points.len());
    let mut out = Vec::with_capacity(snapped.len());
    for (point, idx) in query.points.iter().zip(snapped) {
        let mut selectors = SelectorMap::new();
        selectors.insert(CanonicalAxis::Time, Selector::All);
        selectors.insert(CanonicalAxis::Latitude, Selector::Index(idx.latitude));
        selectors.insert(CanonicalAxis::Longitude, Selector::Index(idx.longitude));
        if let Some(d) = idx.depth {
            selectors.insert(CanonicalAxis::Depth, Selector::Index(d));
        }

        let mut region = read_selection(dataset, &variable, &selectors)?;
        apply_fill_substitution(&mut region, &fill);
        let values: Vec<f64> = region.iter().copied().collect();
        debug!(
            "Point ({}, {}) -> lat[{}] lon[{}], {} steps",
            point.latitude,
            point.longitude,
            idx.latitude,
            idx.longitude,
            values.len()
        );

        let coordinate = |axis: CanonicalAxis, i: usize| {
            dataset
                .axes
                .get(axis)
                .and_then(|a| a.values.get(i).copied())
                .ok_or_else(|| TilerError::Source(format!("{} index {} has no coordinate", axis, i)))
        };

        out.push(PointSeries {
            point: *point,
            latitude_index: idx.latitude,
            longitude_index: idx.longitude,
            depth_index: idx.depth,
            grid_latitude: coordinate(CanonicalAxis::Latitude, idx.latitude)?,
            grid_longitude: coordinate(CanonicalAxis::Longitude, idx.longitude)?,
            values,
            times: times.clone(),
        });
    }
    Ok(out)
}
