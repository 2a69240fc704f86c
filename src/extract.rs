//! # Slice Extraction
//!
//! Reads hyper-rectangles of a variable through the canonical axis model and
//! reduces them to dense `(latitude, longitude)` grids.
//!
//! ## Key Components
//!
//! - [`SelectorMap`]: one [`Selector`] per canonical axis, built uniformly for
//!   2D, 3D and 4D variables
//! - [`read_selection`]: reads exactly the selected region, in storage order
//! - [`extract_2d`]: the raster path, returning a [`Slice2D`]
//! - [`apply_fill_substitution`]: fill value to sentinel rewrite

use crate::axis::CanonicalAxis;
use crate::dataset::{Dataset, Variable};
use crate::error::{Result, TilerError};
use crate::source::DataSource;
use log::debug;
use ndarray::{Array2, ArrayBase, ArrayD, DataMut, Dimension};
use std::collections::BTreeMap;

/// How one canonical axis is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The whole axis.
    All,
    /// A single position; the axis keeps length 1.
    Index(usize),
    /// Inclusive range.
    Range(usize, usize),
}

impl Selector {
    fn start_count(&self, len: usize) -> (usize, usize) {
        match *self {
            Selector::All => (0, len),
            Selector::Index(i) => (i, 1),
            Selector::Range(s, e) => (s, e.saturating_sub(s) + 1),
        }
    }
}

/// Selectors keyed by canonical axis.
pub type SelectorMap = BTreeMap<CanonicalAxis, Selector>;

/// Fill value handling for one extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FillPolicy {
    pub fill_value: Option<f64>,
    pub replace_value: Option<f64>,
}

impl FillPolicy {
    pub fn new(fill_value: f64, replace_value: f64) -> Self {
        FillPolicy {
            fill_value: Some(fill_value),
            replace_value: Some(replace_value),
        }
    }
}

/// Input to [`extract_2d`].
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRequest {
    pub variable: String,
    /// Inclusive longitude index range.
    pub longitude: (usize, usize),
    /// Inclusive latitude index range.
    pub latitude: (usize, usize),
    pub time_index: Option<usize>,
    pub depth_index: Option<usize>,
}

/// A dense 2D slice, rows are latitudes and columns longitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice2D {
    pub data: Array2<f64>,
    pub longitudes: Vec<f64>,
    pub latitudes: Vec<f64>,
}

impl Slice2D {
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Rewrites every cell equal to the fill value (NaN matches NaN) to the
/// replace value. A no-op unless both values are set.
pub fn apply_fill_substitution<S, D>(data: &mut ArrayBase<S, D>, policy: &FillPolicy)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    let (Some(fill), Some(replace)) = (policy.fill_value, policy.replace_value) else {
        return;
    };
    if fill.is_nan() {
        data.mapv_inplace(|v| if v.is_nan() { replace } else { v });
    } else {
        data.mapv_inplace(|v| if v == fill { replace } else { v });
    }
}

/// Builds the selector map for `variable`.
///
/// Time and depth take `Index(i)` when the variable has the axis, defaulting
/// to index 0. An index supplied for an axis the variable lacks fails with
/// [`TilerError::AxisMissingForSelector`]; an axis that is absent and not
/// requested is a virtual singleton and gets no selector.
pub fn build_selectors(variable: &Variable, request: &SliceRequest) -> Result<SelectorMap> {
    let mut selectors = SelectorMap::new();
    selectors.insert(
        CanonicalAxis::Longitude,
        Selector::Range(request.longitude.0, request.longitude.1),
    );
    selectors.insert(
        CanonicalAxis::Latitude,
        Selector::Range(request.latitude.0, request.latitude.1),
    );

    for (axis, index) in [
        (CanonicalAxis::Time, request.time_index),
        (CanonicalAxis::Depth, request.depth_index),
    ] {
        match (variable.references(axis), index) {
            (true, i) => {
                selectors.insert(axis, Selector::Index(i.unwrap_or(0)));
            }
            (false, Some(_)) => {
                return Err(TilerError::AxisMissingForSelector {
                    variable: variable.name().to_string(),
                    axis: axis.name().to_string(),
                });
            }
            (false, None) => {}
        }
    }
    Ok(selectors)
}

/// Reads the region described by `selectors` in the variable's storage order.
///
/// Every selector must name an axis the variable has. Variable dimensions
/// without a selector read as `All` when mapped to a canonical axis; unmapped
/// dimensions must have length 1.
pub fn read_selection<S: DataSource>(
    dataset: &Dataset<S>,
    variable: &Variable,
    selectors: &SelectorMap,
) -> Result<ArrayD<f64>> {
    for axis in selectors.keys() {
        if !variable.references(*axis) {
            return Err(TilerError::AxisMissingForSelector {
                variable: variable.name().to_string(),
                axis: axis.name().to_string(),
            });
        }
    }

    let mut start = Vec::with_capacity(variable.axes.len());
    let mut count = Vec::with_capacity(variable.axes.len());
    for (axis, dim) in variable.axes.iter().zip(&variable.info.dimensions) {
        let (s, c) = match axis {
            Some(a) => selectors
                .get(a)
                .copied()
                .unwrap_or(Selector::All)
                .start_count(dim.len),
            None if dim.len == 1 => (0, 1),
            None => {
                return Err(TilerError::UnsupportedDimension {
                    variable: variable.name().to_string(),
                    dimension: dim.name.clone(),
                    len: dim.len,
                });
            }
        };
        if c == 0 || s + c > dim.len {
            return Err(TilerError::SelectorOutOfBounds {
                dimension: dim.name.clone(),
                start: s,
                end: (s + c).saturating_sub(1),
                len: dim.len,
            });
        }
        start.push(s);
        count.push(c);
    }

    dataset.source().read_region(variable.name(), &start, &count)
}

/// Extracts a `(latitude, longitude)` slice with fill substitution applied.
pub fn extract_2d<S: DataSource>(
    dataset: &Dataset<S>,
    request: &SliceRequest,
    fill: &FillPolicy,
) -> Result<Slice2D> {
    let variable = dataset.variable(&request.variable)?;
    variable.check_lat_lng()?;

    let selectors = build_selectors(&variable, request)?;
    let region = read_selection(dataset, &variable, &selectors)?;
    if region.is_empty() {
        return Err(TilerError::EmptySlice(request.variable.clone()));
    }

    let (lon_s, lon_e) = request.longitude;
    let (lat_s, lat_e) = request.latitude;
    let n_lon = lon_e - lon_s + 1;
    let n_lat = lat_e - lat_s + 1;
    let lon_pos = variable.position(CanonicalAxis::Longitude);
    let lat_pos = variable.position(CanonicalAxis::Latitude);
    let lon_first = lon_pos < lat_pos;

    // All other axes have length 1 here, so logical order is row-major over the two spatial axes.
    let values: Vec<f64> = region.iter().copied().collect();
    let shape = if lon_first { (n_lon, n_lat) } else { (n_lat, n_lon) };
    let grid = Array2::from_shape_vec(shape, values)
        .map_err(|e| TilerError::Source(format!("unexpected region shape: {}", e)))?;
    let mut data = if lon_first {
        debug!("Transposing '{}' to (latitude, longitude)", request.variable);
        grid.reversed_axes().as_standard_layout().into_owned()
    } else {
        grid
    };
    apply_fill_substitution(&mut data, fill);

    let longitudes = coordinate_slice(dataset, CanonicalAxis::Longitude, lon_s, lon_e);
    let latitudes = coordinate_slice(dataset, CanonicalAxis::Latitude, lat_s, lat_e);

    Ok(Slice2D {
        data,
        longitudes,
        latitudes,
    })
}

fn coordinate_slice<S: DataSource>(
    dataset: &Dataset<S>,
    axis: CanonicalAxis,
    start: usize,
    end: usize,
) -> Vec<f64> {
    dataset
        .axes
        .get(axis)
        .and_then(|a| a.values.get(start..=end))
        .map(|v| v.to_vec())
        .unwrap_or_default()
}
