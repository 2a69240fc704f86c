//! # Normalized Dataset View
//!
//! [`Dataset`] wraps a [`DataSource`] together with its canonical
//! [`AxisTable`], so that every later stage talks about time, depth, longitude
//! and latitude instead of the file's own dimension names.

use crate::axis::{AxisTable, CanonicalAxis, TimeReference};
use crate::error::{Result, TilerError, ValidationError};
use crate::source::{DataSource, VariableInfo};
use log::{debug, warn};

/// Label used when no calendar time is available for a tile.
pub const GENERIC_DISPLAY_LABEL: &str = "GenericDisplayName";

/// A variable with each of its dimensions resolved to a canonical axis.
#[derive(Debug, Clone)]
pub struct Variable {
    pub info: VariableInfo,
    /// Canonical axis per storage dimension; `None` for dimensions that map
    /// to no axis of the dataset.
    pub axes: Vec<Option<CanonicalAxis>>,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn references(&self, axis: CanonicalAxis) -> bool {
        self.position(axis).is_some()
    }

    /// Storage position of a canonical axis within this variable.
    pub fn position(&self, axis: CanonicalAxis) -> Option<usize> {
        self.axes.iter().position(|a| *a == Some(axis))
    }

    /// A variable can be rendered only if it spans both spatial axes.
    pub fn check_lat_lng(&self) -> std::result::Result<(), ValidationError> {
        if self.references(CanonicalAxis::Longitude) && self.references(CanonicalAxis::Latitude) {
            Ok(())
        } else {
            Err(ValidationError::MissingSpatialAxes {
                variable: self.info.name.clone(),
            })
        }
    }

    pub fn is_raster_capable(&self) -> bool {
        self.check_lat_lng().is_ok()
    }

    /// Canonical dimension names, with the native name for unmapped ones.
    pub fn canonical_dimensions(&self) -> Vec<String> {
        self.axes
            .iter()
            .zip(&self.info.dimensions)
            .map(|(axis, dim)| match axis {
                Some(a) => a.name().to_string(),
                None => dim.name.clone(),
            })
            .collect()
    }
}

/// Hex characters of the source fingerprint kept in [`Dataset::cache_key`].
const KEY_DIGEST_CHARS: usize = 12;

/// A data source plus its normalized axes.
pub struct Dataset<S: DataSource> {
    source: S,
    key: String,
    pub axes: AxisTable,
    pub time_reference: Option<TimeReference>,
}

impl<S: DataSource> Dataset<S> {
    pub fn new(source: S) -> Result<Self> {
        let axes = AxisTable::from_source(&source)?;
        let time_reference = match axes.time.as_ref() {
            Some(time) => match time.units.as_deref() {
                Some(units) => {
                    let parsed = TimeReference::parse(units);
                    if parsed.is_none() {
                        warn!("Time units '{}' not understood, tiles get generic labels", units);
                    }
                    parsed
                }
                None => None,
            },
            None => None,
        };
        debug!(
            "Dataset '{}': time={} depth={} lon={} lat={}",
            source.name(),
            axes.size(CanonicalAxis::Time),
            axes.size(CanonicalAxis::Depth),
            axes.size(CanonicalAxis::Longitude),
            axes.size(CanonicalAxis::Latitude)
        );
        let fingerprint = source.fingerprint()?;
        let key = format!(
            "{}-{}",
            source.name(),
            &fingerprint[..fingerprint.len().min(KEY_DIGEST_CHARS)]
        );
        Ok(Dataset {
            source,
            key,
            axes,
            time_reference,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn name(&self) -> String {
        self.source.name()
    }

    /// Name plus a short content digest, used to key tile file names.
    pub fn cache_key(&self) -> &str {
        &self.key
    }

    pub fn variable(&self, name: &str) -> Result<Variable> {
        if !self.source.variable_names().iter().any(|v| v == name) {
            return Err(TilerError::VariableNotFound(name.to_string()));
        }
        let info = self.source.variable(name)?;
        let axes = info
            .dimensions
            .iter()
            .map(|d| self.axes.kind_of(&d.name))
            .collect();
        Ok(Variable { info, axes })
    }

    /// Non-coordinate variables, in file order.
    pub fn data_variables(&self) -> Result<Vec<Variable>> {
        let mut out = Vec::new();
        for name in self.source.variable_names() {
            if self.axes.kind_of(&name).is_some() {
                continue;
            }
            out.push(self.variable(&name)?);
        }
        Ok(out)
    }

    pub fn raster_variables(&self) -> Result<Vec<Variable>> {
        Ok(self
            .data_variables()?
            .into_iter()
            .filter(Variable::is_raster_capable)
            .collect())
    }

    /// Calendar label for a time index, if the time axis can be converted.
    pub fn time_at(&self, index: usize) -> Option<String> {
        let reference = self.time_reference.as_ref()?;
        let value = *self.axes.time.as_ref()?.values.get(index)?;
        reference.label(value)
    }

    /// Display label for a tile at the given time index.
    pub fn time_label(&self, index: Option<usize>) -> String {
        index
            .and_then(|i| self.time_at(i))
            .map(|t| format!("TIME: {}", t))
            .unwrap_or_else(|| GENERIC_DISPLAY_LABEL.to_string())
    }
}
