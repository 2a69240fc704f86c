//! Affine pixel-to-coordinate transforms.

use crate::error::{Result, TilerError};
use serde::Serialize;

/// GDAL-style affine transform without rotation terms.
///
/// Pixel corner `(col, row)` maps to
/// `(origin_x + col * pixel_width, origin_y + row * pixel_height)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub origin_y: f64,
    pub pixel_height: f64,
}

/// Geographic extent of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

fn axis_step(coords: &[f64]) -> Option<f64> {
    match coords {
        [] | [_] => None,
        [first, .., last] => Some((last - first) / (coords.len() - 1) as f64),
    }
}

impl GeoTransform {
    /// Linear transform for a `(latitude, longitude)` grid, assuming uniform
    /// spacing between the first and last coordinate of each axis.
    ///
    /// Row 0 holds `latitudes[0]`, so a descending latitude vector gives a
    /// north-up transform and an ascending one a south-up transform. An axis
    /// with a single sample borrows the other axis's spacing, or 1.0.
    pub fn from_coordinates(longitudes: &[f64], latitudes: &[f64]) -> Result<Self> {
        let (Some(&lon0), Some(&lat0)) = (longitudes.first(), latitudes.first()) else {
            return Err(TilerError::Projection(
                "cannot derive a geotransform from empty coordinates".to_string(),
            ));
        };

        let (dx, dy) = match (axis_step(longitudes), axis_step(latitudes)) {
            (Some(dx), Some(dy)) => (dx, dy),
            (Some(dx), None) => (dx, -dx.abs()),
            (None, Some(dy)) => (dy.abs(), dy),
            (None, None) => (1.0, -1.0),
        };

        Ok(GeoTransform {
            origin_x: lon0,
            pixel_width: dx,
            origin_y: lat0,
            pixel_height: dy,
        })
    }

    pub fn is_valid(&self) -> bool {
        [self.origin_x, self.pixel_width, self.origin_y, self.pixel_height]
            .iter()
            .all(|v| v.is_finite())
            && self.pixel_width != 0.0
            && self.pixel_height != 0.0
    }

    pub fn is_north_up(&self) -> bool {
        self.pixel_width > 0.0 && self.pixel_height < 0.0
    }

    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a coordinate.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let (x0, y0) = self.pixel_to_geo(0.0, 0.0);
        let (x1, y1) = self.pixel_to_geo(width as f64, height as f64);
        Bounds {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    /// The six coefficients in GDAL order.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            self.pixel_height,
        ]
    }
}
