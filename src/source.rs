//! # Data Sources
//!
//! The engine reads arrays through the [`DataSource`] trait: an ordered list of
//! native dimensions, per-variable metadata, and random access to any
//! hyper-rectangular region of a variable.
//!
//! Two implementations ship with the crate:
//!
//! - [`NetCdfSource`]: a NetCDF file opened with the `netcdf` crate; reads are
//!   hyperslabs, never the full variable
//! - [`MemorySource`]: dense in-memory arrays, handy for tests and for callers
//!   that already hold the data

use crate::error::{Result, TilerError};
use log::debug;
use ndarray::{ArrayD, IxDyn, Slice};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A native dimension: name and length, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionInfo {
    pub name: String,
    pub len: usize,
}

impl DimensionInfo {
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        DimensionInfo {
            name: name.into(),
            len,
        }
    }
}

/// Attributes the engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VariableAttributes {
    pub fill_value: Option<f64>,
    pub long_name: Option<String>,
    pub units: Option<String>,
    pub valid_min: Option<f64>,
    pub valid_max: Option<f64>,
}

/// Metadata for a single variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableInfo {
    pub name: String,
    /// Dimensions in storage order.
    pub dimensions: Vec<DimensionInfo>,
    pub attributes: VariableAttributes,
}

impl VariableInfo {
    pub fn shape(&self) -> Vec<usize> {
        self.dimensions.iter().map(|d| d.len).collect()
    }
}

/// Read access to a self-describing array dataset.
pub trait DataSource {
    /// Short human-readable name.
    fn name(&self) -> String;

    /// Hex digest identifying this source's content. Two sources with the same
    /// name but different data must differ here.
    fn fingerprint(&self) -> Result<String>;

    /// Native dimensions in file order.
    fn dimensions(&self) -> Result<Vec<DimensionInfo>>;

    fn variable_names(&self) -> Vec<String>;

    fn variable(&self, name: &str) -> Result<VariableInfo>;

    /// Reads a whole variable. Only used for coordinate vectors.
    fn read_all(&self, name: &str) -> Result<ArrayD<f64>>;

    /// Reads the region `start[i]..start[i] + count[i]` along every dimension.
    ///
    /// The returned array has shape `count`, in storage order.
    fn read_region(&self, name: &str, start: &[usize], count: &[usize]) -> Result<ArrayD<f64>>;
}

fn check_region(info: &VariableInfo, start: &[usize], count: &[usize]) -> Result<()> {
    if start.len() != info.dimensions.len() || count.len() != info.dimensions.len() {
        return Err(TilerError::Source(format!(
            "region rank {} does not match variable '{}' of rank {}",
            start.len(),
            info.name,
            info.dimensions.len()
        )));
    }
    for ((dim, &s), &c) in info.dimensions.iter().zip(start).zip(count) {
        if c == 0 || s + c > dim.len {
            return Err(TilerError::SelectorOutOfBounds {
                dimension: dim.name.clone(),
                start: s,
                end: (s + c).saturating_sub(1),
                len: dim.len,
            });
        }
    }
    Ok(())
}

/// A NetCDF file on local disk.
pub struct NetCdfSource {
    path: PathBuf,
    file: netcdf::File,
}

impl NetCdfSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(TilerError::FileNotFound(path));
        }
        debug!("Opening NetCDF file: {}", path.display());
        let file = netcdf::open(&path)?;
        Ok(NetCdfSource { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn var(&self, name: &str) -> Result<netcdf::Variable<'_>> {
        self.file
            .variable(name)
            .ok_or_else(|| TilerError::VariableNotFound(name.to_string()))
    }
}

fn attribute_f64(var: &netcdf::Variable<'_>, name: &str) -> Option<f64> {
    use netcdf::AttributeValue as V;
    let value = var.attribute(name)?.value().ok()?;
    match value {
        V::Double(v) => Some(v),
        V::Float(v) => Some(v as f64),
        V::Longlong(v) => Some(v as f64),
        V::Ulonglong(v) => Some(v as f64),
        V::Int(v) => Some(v as f64),
        V::Uint(v) => Some(v as f64),
        V::Short(v) => Some(v as f64),
        V::Ushort(v) => Some(v as f64),
        V::Schar(v) => Some(v as f64),
        V::Uchar(v) => Some(v as f64),
        V::Doubles(v) => v.first().copied(),
        V::Floats(v) => v.first().map(|x| *x as f64),
        _ => None,
    }
}

fn attribute_str(var: &netcdf::Variable<'_>, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

impl DataSource for NetCdfSource {
    fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string())
    }

    /// Canonical path, size and modification time of the file.
    fn fingerprint(&self) -> Result<String> {
        let canonical = self.path.canonicalize()?;
        let metadata = std::fs::metadata(&canonical)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        hasher.update(metadata.len().to_le_bytes());
        hasher.update(modified.to_le_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn dimensions(&self) -> Result<Vec<DimensionInfo>> {
        Ok(self
            .file
            .dimensions()
            .map(|d| DimensionInfo::new(d.name(), d.len()))
            .collect())
    }

    fn variable_names(&self) -> Vec<String> {
        self.file.variables().map(|v| v.name()).collect()
    }

    fn variable(&self, name: &str) -> Result<VariableInfo> {
        let var = self.var(name)?;
        let dimensions = var
            .dimensions()
            .iter()
            .map(|d| DimensionInfo::new(d.name(), d.len()))
            .collect();
        let attributes = VariableAttributes {
            fill_value: attribute_f64(&var, "_FillValue")
                .or_else(|| attribute_f64(&var, "missing_value")),
            long_name: attribute_str(&var, "long_name"),
            units: attribute_str(&var, "units"),
            valid_min: attribute_f64(&var, "valid_min"),
            valid_max: attribute_f64(&var, "valid_max"),
        };
        Ok(VariableInfo {
            name: name.to_string(),
            dimensions,
            attributes,
        })
    }

    fn read_all(&self, name: &str) -> Result<ArrayD<f64>> {
        let var = self.var(name)?;
        Ok(var.get::<f64, _>(..)?)
    }

    fn read_region(&self, name: &str, start: &[usize], count: &[usize]) -> Result<ArrayD<f64>> {
        let info = self.variable(name)?;
        check_region(&info, start, count)?;
        let var = self.var(name)?;
        let extents: Vec<netcdf::Extent> = start
            .iter()
            .zip(count)
            .map(|(&s, &c)| (s..s + c).into())
            .collect();
        debug!("Reading '{}' region start={:?} count={:?}", name, start, count);
        Ok(var.get::<f64, _>(extents)?)
    }
}

struct MemoryVariable {
    dimensions: Vec<String>,
    data: ArrayD<f64>,
    attributes: VariableAttributes,
}

/// Dense in-memory dataset.
///
/// ```rust
/// use ndarray::{ArrayD, IxDyn};
/// use nctiles::source::{DataSource, MemorySource};
///
/// let mut source = MemorySource::new("demo");
/// source.add_coordinate("lat", vec![10.0, 20.0], None);
/// source.add_coordinate("lon", vec![1.0, 2.0, 3.0], None);
/// source
///     .add_variable("sst", &["lat", "lon"], ArrayD::zeros(IxDyn(&[2, 3])))
///     .unwrap();
/// assert_eq!(source.variable("sst").unwrap().shape(), vec![2, 3]);
/// ```
#[derive(Default)]
pub struct MemorySource {
    name: String,
    dimensions: Vec<DimensionInfo>,
    variables: Vec<String>,
    data: HashMap<String, MemoryVariable>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        MemorySource {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Declares a dimension without a coordinate variable.
    pub fn add_dimension(&mut self, name: &str, len: usize) {
        if let Some(dim) = self.dimensions.iter_mut().find(|d| d.name == name) {
            dim.len = len;
        } else {
            self.dimensions.push(DimensionInfo::new(name, len));
        }
    }

    /// Declares a dimension together with its coordinate variable.
    pub fn add_coordinate(&mut self, name: &str, values: Vec<f64>, units: Option<&str>) {
        self.add_dimension(name, values.len());
        let len = values.len();
        let data = ArrayD::from_shape_vec(IxDyn(&[len]), values)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[len])));
        self.insert(
            name,
            MemoryVariable {
                dimensions: vec![name.to_string()],
                data,
                attributes: VariableAttributes {
                    units: units.map(str::to_string),
                    ..Default::default()
                },
            },
        );
    }

    /// Adds a data variable over previously declared dimensions.
    pub fn add_variable(&mut self, name: &str, dimensions: &[&str], data: ArrayD<f64>) -> Result<()> {
        let mut expected = Vec::with_capacity(dimensions.len());
        for dim in dimensions {
            let info = self
                .dimensions
                .iter()
                .find(|d| d.name == *dim)
                .ok_or_else(|| TilerError::Source(format!("unknown dimension '{}'", dim)))?;
            expected.push(info.len);
        }
        if data.shape() != expected.as_slice() {
            return Err(TilerError::Source(format!(
                "variable '{}' has shape {:?}, dimensions require {:?}",
                name,
                data.shape(),
                expected
            )));
        }
        self.insert(
            name,
            MemoryVariable {
                dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
                data,
                attributes: VariableAttributes::default(),
            },
        );
        Ok(())
    }

    pub fn set_attributes(&mut self, name: &str, attributes: VariableAttributes) -> Result<()> {
        let var = self
            .data
            .get_mut(name)
            .ok_or_else(|| TilerError::VariableNotFound(name.to_string()))?;
        var.attributes = attributes;
        Ok(())
    }

    fn insert(&mut self, name: &str, var: MemoryVariable) {
        if !self.variables.iter().any(|v| v == name) {
            self.variables.push(name.to_string());
        }
        self.data.insert(name.to_string(), var);
    }

    fn get(&self, name: &str) -> Result<&MemoryVariable> {
        self.data
            .get(name)
            .ok_or_else(|| TilerError::VariableNotFound(name.to_string()))
    }
}

impl DataSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    /// Digest of every dimension, variable and value.
    fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        for dim in &self.dimensions {
            hasher.update(dim.name.as_bytes());
            hasher.update((dim.len as u64).to_le_bytes());
        }
        for name in &self.variables {
            let var = self.get(name)?;
            hasher.update(name.as_bytes());
            for dim in &var.dimensions {
                hasher.update(dim.as_bytes());
            }
            if let Some(fill) = var.attributes.fill_value {
                hasher.update(fill.to_le_bytes());
            }
            for value in var.data.iter() {
                hasher.update(value.to_le_bytes());
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn dimensions(&self) -> Result<Vec<DimensionInfo>> {
        Ok(self.dimensions.clone())
    }

    fn variable_names(&self) -> Vec<String> {
        self.variables.clone()
    }

    fn variable(&self, name: &str) -> Result<VariableInfo> {
        let var = self.get(name)?;
        let dimensions = var
            .dimensions
            .iter()
            .zip(var.data.shape())
            .map(|(n, &len)| DimensionInfo::new(n.clone(), len))
            .collect();
        Ok(VariableInfo {
            name: name.to_string(),
            dimensions,
            attributes: var.attributes.clone(),
        })
    }

    fn read_all(&self, name: &str) -> Result<ArrayD<f64>> {
        Ok(self.get(name)?.data.clone())
    }

    fn read_region(&self, name: &str, start: &[usize], count: &[usize]) -> Result<ArrayD<f64>> {
        let info = self.variable(name)?;
        check_region(&info, start, count)?;
        let var = self.get(name)?;
        let view = var
            .data
            .slice_each_axis(|ax| {
                let i = ax.axis.index();
                Slice::from(start[i]..start[i] + count[i])
            });
        Ok(view.to_owned())
    }
}
