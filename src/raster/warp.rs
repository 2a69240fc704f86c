//! Reprojection to geographic WGS84 and pixel-budget resampling.
//!
//! Both operations share one nearest-neighbour sampler: every target pixel
//! centre is mapped back through the source transform and takes the value of
//! the source pixel it falls in, or the nodata value outside the source.

use super::geotransform::GeoTransform;
use crate::downsample::compute_grid;
use crate::error::{Result, TilerError};
use log::debug;
use ndarray::Array2;

/// EPSG code of geographic WGS84.
pub const EPSG_WGS84: u32 = 4326;

/// Coordinate reference system attached to a source raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceCrs {
    /// No reference recorded; coordinates are taken as longitude/latitude.
    #[default]
    Unset,
    Epsg(u32),
}

/// Nearest-neighbour sampling of `src` onto a `width x height` target grid.
pub fn sample_nearest(
    src: &Array2<f64>,
    src_gt: &GeoTransform,
    dst_gt: &GeoTransform,
    width: usize,
    height: usize,
    nodata: f64,
) -> Array2<f64> {
    let (src_h, src_w) = src.dim();
    Array2::from_shape_fn((height, width), |(row, col)| {
        let (x, y) = dst_gt.pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5);
        let (sc, sr) = src_gt.geo_to_pixel(x, y);
        if !(sc.is_finite() && sr.is_finite()) {
            return nodata;
        }
        let (sc, sr) = (sc.floor(), sr.floor());
        if sc < 0.0 || sr < 0.0 || sc >= src_w as f64 || sr >= src_h as f64 {
            return nodata;
        }
        src[[sr as usize, sc as usize]]
    })
}

/// Warps a raster into EPSG:4326 with a north-up transform over the same
/// bounds and the same pixel count.
pub fn warp_to_wgs84(
    data: &Array2<f64>,
    gt: &GeoTransform,
    crs: SourceCrs,
    nodata: f64,
) -> Result<(Array2<f64>, GeoTransform)> {
    match crs {
        SourceCrs::Unset | SourceCrs::Epsg(EPSG_WGS84) => {}
        SourceCrs::Epsg(code) => {
            return Err(TilerError::Projection(format!(
                "no transformation available from EPSG:{} to EPSG:{}",
                code, EPSG_WGS84
            )));
        }
    }
    if !gt.is_valid() {
        return Err(TilerError::Projection(format!(
            "degenerate geotransform {:?}",
            gt.to_gdal()
        )));
    }
    if gt.is_north_up() {
        return Ok((data.clone(), *gt));
    }

    let (height, width) = data.dim();
    let bounds = gt.bounds(width, height);
    let target = GeoTransform {
        origin_x: bounds.min_x,
        pixel_width: gt.pixel_width.abs(),
        origin_y: bounds.max_y,
        pixel_height: -gt.pixel_height.abs(),
    };
    debug!("Warping {}x{} raster to north-up EPSG:{}", width, height, EPSG_WGS84);
    Ok((
        sample_nearest(data, gt, &target, width, height, nodata),
        target,
    ))
}

/// Resamples so that `width * height <= limit`, keeping the bounds.
pub fn resample_to_limit(
    data: &Array2<f64>,
    gt: &GeoTransform,
    limit: usize,
    nodata: f64,
) -> (Array2<f64>, GeoTransform) {
    let (height, width) = data.dim();
    let (new_w, new_h) = compute_grid(width, height, limit);
    if (new_w, new_h) == (width, height) {
        return (data.clone(), *gt);
    }
    let target = GeoTransform {
        origin_x: gt.origin_x,
        pixel_width: gt.pixel_width * width as f64 / new_w as f64,
        origin_y: gt.origin_y,
        pixel_height: gt.pixel_height * height as f64 / new_h as f64,
    };
    debug!(
        "Resampling {}x{} -> {}x{} (limit {})",
        width, height, new_w, new_h, limit
    );
    (
        sample_nearest(data, gt, &target, new_w, new_h, nodata),
        target,
    )
}
