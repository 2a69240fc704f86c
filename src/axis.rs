//! # Dimension Normalizer
//!
//! NetCDF files name their dimensions freely (`lon`, `Latitude`, `level`, ...).
//! This module maps those names onto the four canonical axes the engine works
//! with and builds the per-dataset [`AxisTable`].
//!
//! ## Key Components
//!
//! - [`CanonicalAxis`]: closed set of axes (time, depth, longitude, latitude)
//! - [`normalize`]: synonym-table lookup used by every other module
//! - [`AxisTable`]: size, native index, coordinates and units per axis
//! - [`TimeReference`]: `<unit> since <epoch>` parsing for calendar labels

use crate::error::{Result, TilerError};
use crate::source::DataSource;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four semantic dimensions of an ocean grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalAxis {
    Time,
    Depth,
    Longitude,
    Latitude,
}

/// Synonyms per axis, compared case-insensitively.
const SYNONYMS: [(CanonicalAxis, &[&str]); 4] = [
    (CanonicalAxis::Time, &["datetime", "time"]),
    (CanonicalAxis::Depth, &["depth", "level"]),
    (CanonicalAxis::Longitude, &["lon", "longitude"]),
    (CanonicalAxis::Latitude, &["lat", "latitude"]),
];

impl CanonicalAxis {
    pub const ALL: [CanonicalAxis; 4] = [
        CanonicalAxis::Time,
        CanonicalAxis::Depth,
        CanonicalAxis::Longitude,
        CanonicalAxis::Latitude,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalAxis::Time => "time",
            CanonicalAxis::Depth => "depth",
            CanonicalAxis::Longitude => "longitude",
            CanonicalAxis::Latitude => "latitude",
        }
    }

    /// Prefix used by query parameters (`datetime_start`, `depth_end`, ...).
    pub fn query_name(&self) -> &'static str {
        match self {
            CanonicalAxis::Time => "datetime",
            other => other.name(),
        }
    }

    pub fn synonyms(&self) -> &'static [&'static str] {
        SYNONYMS
            .iter()
            .find(|(axis, _)| axis == self)
            .map(|(_, names)| *names)
            .unwrap_or(&[])
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, CanonicalAxis::Longitude | CanonicalAxis::Latitude)
    }
}

impl fmt::Display for CanonicalAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Maps a native dimension name onto its canonical axis.
///
/// `None` stands for an absent dimension and maps to `Ok(None)`. Any other
/// name that matches no synonym fails with
/// [`TilerError::UnrecognizedDimension`].
///
/// # Examples
///
/// ```rust
/// use nctiles::axis::{normalize, CanonicalAxis};
///
/// assert_eq!(normalize(Some("Latitude")).unwrap(), Some(CanonicalAxis::Latitude));
/// assert_eq!(normalize(Some("level")).unwrap(), Some(CanonicalAxis::Depth));
/// assert_eq!(normalize(None).unwrap(), None);
/// assert!(normalize(Some("station")).is_err());
/// ```
pub fn normalize(raw: Option<&str>) -> Result<Option<CanonicalAxis>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let lowered = raw.trim().to_ascii_lowercase();
    SYNONYMS
        .iter()
        .find(|(_, names)| names.contains(&lowered.as_str()))
        .map(|(axis, _)| Some(*axis))
        .ok_or_else(|| TilerError::UnrecognizedDimension(raw.to_string()))
}

/// A canonical axis as found in one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub kind: CanonicalAxis,
    /// Dimension name as stored in the file.
    pub source_name: String,
    /// Position in the file's dimension list.
    pub index: usize,
    pub size: usize,
    pub values: Vec<f64>,
    pub units: Option<String>,
}

impl Axis {
    /// Smallest and largest coordinate, ignoring ordering.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let finite = self.values.iter().copied().filter(|v| v.is_finite());
        finite.fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Index of the coordinate closest to `target`; ties go to the lower coordinate.
    pub fn nearest_index(&self, target: f64) -> Option<usize> {
        let mut best: Option<(usize, f64, f64)> = None;
        for (i, &v) in self.values.iter().enumerate() {
            if !v.is_finite() {
                continue;
            }
            let dist = (v - target).abs();
            best = match best {
                None => Some((i, dist, v)),
                Some((_, bd, bv)) if dist < bd || (dist == bd && v < bv) => Some((i, dist, v)),
                keep => keep,
            };
        }
        best.map(|(i, _, _)| i)
    }
}

/// The canonical axes of one dataset, each either present or absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AxisTable {
    pub time: Option<Axis>,
    pub depth: Option<Axis>,
    pub longitude: Option<Axis>,
    pub latitude: Option<Axis>,
}

impl AxisTable {
    /// Builds the table from a source's dimension list.
    ///
    /// Index-only dimensions (no coordinate variable of the same name) are
    /// skipped. Coordinate dimensions with an unknown name are skipped with a
    /// warning; variables that depend on them fail at extraction time unless
    /// the dimension has length 1.
    pub fn from_source<S: DataSource + ?Sized>(source: &S) -> Result<Self> {
        let mut table = AxisTable::default();
        let variable_names = source.variable_names();

        for (index, dim) in source.dimensions()?.into_iter().enumerate() {
            if !variable_names.iter().any(|v| v == &dim.name) {
                debug!("Skipping index-only dimension '{}'", dim.name);
                continue;
            }
            let kind = match normalize(Some(&dim.name)) {
                Ok(Some(kind)) => kind,
                Ok(None) => continue,
                Err(_) => {
                    warn!("Dimension '{}' maps to no canonical axis, skipping", dim.name);
                    continue;
                }
            };
            if table.get(kind).is_some() {
                warn!(
                    "Dimension '{}' duplicates the {} axis, keeping the first one",
                    dim.name, kind
                );
                continue;
            }

            let info = source.variable(&dim.name)?;
            let values = source.read_all(&dim.name)?.iter().copied().collect();
            debug!("Axis {} <- '{}' ({} values)", kind, dim.name, dim.len);
            *table.slot_mut(kind) = Some(Axis {
                kind,
                source_name: dim.name.clone(),
                index,
                size: dim.len,
                values,
                units: info.attributes.units,
            });
        }

        Ok(table)
    }

    pub fn get(&self, kind: CanonicalAxis) -> Option<&Axis> {
        match kind {
            CanonicalAxis::Time => self.time.as_ref(),
            CanonicalAxis::Depth => self.depth.as_ref(),
            CanonicalAxis::Longitude => self.longitude.as_ref(),
            CanonicalAxis::Latitude => self.latitude.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: CanonicalAxis) -> &mut Option<Axis> {
        match kind {
            CanonicalAxis::Time => &mut self.time,
            CanonicalAxis::Depth => &mut self.depth,
            CanonicalAxis::Longitude => &mut self.longitude,
            CanonicalAxis::Latitude => &mut self.latitude,
        }
    }

    pub fn exists(&self, kind: CanonicalAxis) -> bool {
        self.get(kind).is_some()
    }

    pub fn size(&self, kind: CanonicalAxis) -> usize {
        self.get(kind).map(|a| a.size).unwrap_or(0)
    }

    /// Canonical axis for a native dimension name of this dataset.
    pub fn kind_of(&self, source_name: &str) -> Option<CanonicalAxis> {
        CanonicalAxis::ALL
            .into_iter()
            .find(|k| self.get(*k).is_some_and(|a| a.source_name == source_name))
    }
}

/// Unit of a CF-style time coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "milliseconds" | "millisecond" | "ms" => Some(TimeUnit::Milliseconds),
            "seconds" | "second" | "secs" | "sec" | "s" => Some(TimeUnit::Seconds),
            "minutes" | "minute" | "mins" | "min" => Some(TimeUnit::Minutes),
            "hours" | "hour" | "hrs" | "hr" | "h" => Some(TimeUnit::Hours),
            "days" | "day" | "d" => Some(TimeUnit::Days),
            "weeks" | "week" => Some(TimeUnit::Weeks),
            _ => None,
        }
    }

    fn millis(&self) -> f64 {
        match self {
            TimeUnit::Milliseconds => 1.0,
            TimeUnit::Seconds => 1_000.0,
            TimeUnit::Minutes => 60_000.0,
            TimeUnit::Hours => 3_600_000.0,
            TimeUnit::Days => 86_400_000.0,
            TimeUnit::Weeks => 604_800_000.0,
        }
    }
}

const EPOCH_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S"];

/// Epoch plus unit multiplier, as in `days since 1990-01-01`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeReference {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
}

impl TimeReference {
    pub const LABEL_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

    /// Parses a `<unit> since <epoch>` units attribute.
    pub fn parse(units: &str) -> Option<Self> {
        let (unit, epoch) = units.trim().split_once(" since ")?;
        let unit = TimeUnit::parse(unit.trim())?;
        let epoch = parse_epoch(epoch.trim())?;
        Some(TimeReference { unit, epoch })
    }

    pub fn to_datetime(&self, value: f64) -> Option<NaiveDateTime> {
        if !value.is_finite() {
            return None;
        }
        let millis = value * self.unit.millis();
        if millis.abs() > i64::MAX as f64 {
            return None;
        }
        let offset = Duration::try_milliseconds(millis.round() as i64)?;
        self.epoch.checked_add_signed(offset)
    }

    pub fn label(&self, value: f64) -> Option<String> {
        self.to_datetime(value)
            .map(|dt| dt.format(Self::LABEL_FORMAT).to_string())
    }
}

fn parse_epoch(raw: &str) -> Option<NaiveDateTime> {
    // Trailing timezone markers such as " UTC" or "+00:00" are ignored.
    let trimmed = raw
        .trim_end_matches(" UTC")
        .trim_end_matches("+00:00")
        .trim_end_matches(" 00:00")
        .trim();
    for format in EPOCH_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
