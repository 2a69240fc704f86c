//! # Range Validator
//!
//! Turns user supplied, possibly open-ended start/end indices into closed,
//! bounds-checked ranges. All four axes are checked before any data is read,
//! and every failing axis is reported, not just the first.

use crate::axis::{AxisTable, CanonicalAxis};
use crate::error::{ValidationError, ValidationErrors};
use serde::{Deserialize, Serialize};

/// Resolves one axis request into an inclusive `(start, end)` pair.
///
/// For an axis that does not exist both bounds must be unset and `(0, 0)` is
/// returned as a placeholder. For an existing axis an unset start means 0 and
/// an unset end means `size - 1`.
///
/// # Examples
///
/// ```rust
/// use nctiles::range::validate;
///
/// assert_eq!(validate(None, None, true, 100, "x").unwrap(), (0, 99));
/// assert_eq!(validate(Some(5), Some(10), true, 100, "x").unwrap(), (5, 10));
/// assert!(validate(Some(5), Some(3), true, 100, "x").is_err());
/// assert!(validate(Some(0), Some(0), false, 100, "x").is_err());
/// ```
pub fn validate(
    start: Option<i64>,
    end: Option<i64>,
    exists: bool,
    size: usize,
    name: &str,
) -> Result<(usize, usize), ValidationError> {
    if !exists {
        if start.is_some() || end.is_some() {
            return Err(ValidationError::InvalidAxisUsage {
                axis: name.to_string(),
            });
        }
        return Ok((0, 0));
    }

    let start = check_bound(start.unwrap_or(0), size, &format!("{}_start", name))?;
    let end = check_bound(
        end.unwrap_or(size as i64 - 1),
        size,
        &format!("{}_end", name),
    )?;
    if start > end {
        return Err(ValidationError::InvalidRange {
            axis: name.to_string(),
            start,
            end,
        });
    }
    Ok((start, end))
}

fn check_bound(value: i64, size: usize, field: &str) -> Result<usize, ValidationError> {
    if value < 0 || value as u64 >= size as u64 {
        return Err(ValidationError::IndexOutOfRange {
            field: field.to_string(),
            value,
            size,
        });
    }
    Ok(value as usize)
}

/// Requested bounds for one axis. `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRequest {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl AxisRequest {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        AxisRequest { start, end }
    }

    pub fn is_set(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

/// Bounds for all four axes of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    pub time: AxisRequest,
    pub depth: AxisRequest,
    pub longitude: AxisRequest,
    pub latitude: AxisRequest,
}

impl RangeRequest {
    pub fn get(&self, axis: CanonicalAxis) -> AxisRequest {
        match axis {
            CanonicalAxis::Time => self.time,
            CanonicalAxis::Depth => self.depth,
            CanonicalAxis::Longitude => self.longitude,
            CanonicalAxis::Latitude => self.latitude,
        }
    }
}

/// Inclusive index ranges after validation; `None` for axes the dataset lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedRanges {
    pub time: Option<(usize, usize)>,
    pub depth: Option<(usize, usize)>,
    pub longitude: Option<(usize, usize)>,
    pub latitude: Option<(usize, usize)>,
}

impl ResolvedRanges {
    pub fn get(&self, axis: CanonicalAxis) -> Option<(usize, usize)> {
        match axis {
            CanonicalAxis::Time => self.time,
            CanonicalAxis::Depth => self.depth,
            CanonicalAxis::Longitude => self.longitude,
            CanonicalAxis::Latitude => self.latitude,
        }
    }

    fn set(&mut self, axis: CanonicalAxis, range: Option<(usize, usize)>) {
        match axis {
            CanonicalAxis::Time => self.time = range,
            CanonicalAxis::Depth => self.depth = range,
            CanonicalAxis::Longitude => self.longitude = range,
            CanonicalAxis::Latitude => self.latitude = range,
        }
    }

    /// Number of indices covered on an axis; 1 for absent axes.
    pub fn len(&self, axis: CanonicalAxis) -> usize {
        self.get(axis).map(|(s, e)| e - s + 1).unwrap_or(1)
    }
}

/// Validates every axis of `request` against the dataset's axis table.
pub fn validate_all(axes: &AxisTable, request: &RangeRequest) -> Result<ResolvedRanges, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut resolved = ResolvedRanges::default();

    for axis in CanonicalAxis::ALL {
        let req = request.get(axis);
        let exists = axes.exists(axis);
        match validate(req.start, req.end, exists, axes.size(axis), axis.query_name()) {
            Ok(range) => resolved.set(axis, exists.then_some(range)),
            Err(e) => errors.push(e),
        }
    }

    errors.into_result().map(|_| resolved)
}
