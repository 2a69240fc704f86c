//! Tiled, deflate-compressed single band GeoTIFF writer.
//!
//! The file is assembled with the `tiff` crate's directory encoder: tiles are
//! zlib-compressed with `flate2` and written as raw data blocks, then the IFD
//! carries the tile layout, the sample format and the GeoTIFF georeferencing
//! tags (pixel scale, tie point, EPSG:4326 key directory, GDAL nodata).

use super::geotransform::GeoTransform;
use super::warp::EPSG_WGS84;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use ndarray::Array2;
use std::io::{Seek, Write};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Write parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTiffOptions {
    /// Tile edge in pixels, a multiple of 16.
    pub tile_size: u32,
    pub deflate_level: u32,
    pub nodata: f64,
}

const COMPRESSION_DEFLATE: u16 = 8;
const SAMPLE_FORMAT_IEEEFP: u16 = 3;
const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;
const PLANAR_CHUNKY: u16 = 1;

/// GeoKeyDirectory: model type geographic, raster pixel-is-area,
/// geographic CRS EPSG:4326.
fn geo_key_directory() -> [u16; 16] {
    [
        1, 1, 0, 3, //
        1024, 0, 1, 2, //
        1025, 0, 1, 1, //
        2048, 0, 1, EPSG_WGS84 as u16,
    ]
}

fn compress(raw: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::new(level));
    encoder.write_all(raw)?;
    encoder.finish()
}

/// Encodes one tile, padding cells outside the raster with `nodata`.
fn tile_bytes(data: &Array2<f32>, tile_row: usize, tile_col: usize, edge: usize, nodata: f32) -> Vec<u8> {
    let (height, width) = data.dim();
    let mut raw = Vec::with_capacity(edge * edge * 4);
    for r in 0..edge {
        let row = tile_row * edge + r;
        for c in 0..edge {
            let col = tile_col * edge + c;
            let value = if row < height && col < width {
                data[[row, col]]
            } else {
                nodata
            };
            raw.extend_from_slice(&value.to_ne_bytes());
        }
    }
    raw
}

fn to_tiff_error(e: std::io::Error) -> tiff::TiffError {
    tiff::TiffError::IoError(e)
}

/// Writes `data` (rows north to south) with the north-up transform `gt`.
pub fn write_geotiff<W: Write + Seek>(
    writer: W,
    data: &Array2<f64>,
    gt: &GeoTransform,
    options: &GeoTiffOptions,
) -> tiff::TiffResult<()> {
    let (height, width) = data.dim();
    let edge = options.tile_size.max(16) as usize;
    let nodata = options.nodata as f32;
    let samples = data.mapv(|v| v as f32);

    let tiles_across = width.div_ceil(edge);
    let tiles_down = height.div_ceil(edge);

    let mut encoder = TiffEncoder::new(writer)?;
    let mut dir = encoder.new_directory()?;

    let mut offsets = Vec::with_capacity(tiles_across * tiles_down);
    let mut byte_counts = Vec::with_capacity(tiles_across * tiles_down);
    for tile_row in 0..tiles_down {
        for tile_col in 0..tiles_across {
            let raw = tile_bytes(&samples, tile_row, tile_col, edge, nodata);
            let packed = compress(&raw, options.deflate_level).map_err(to_tiff_error)?;
            let offset = dir.write_data(&packed[..])?;
            offsets.push(offset as u32);
            byte_counts.push(packed.len() as u32);
        }
    }

    dir.write_tag(Tag::ImageWidth, width as u32)?;
    dir.write_tag(Tag::ImageLength, height as u32)?;
    dir.write_tag(Tag::BitsPerSample, 32u16)?;
    dir.write_tag(Tag::Compression, COMPRESSION_DEFLATE)?;
    dir.write_tag(Tag::PhotometricInterpretation, PHOTOMETRIC_BLACK_IS_ZERO)?;
    dir.write_tag(Tag::SamplesPerPixel, 1u16)?;
    dir.write_tag(Tag::PlanarConfiguration, PLANAR_CHUNKY)?;
    dir.write_tag(Tag::SampleFormat, SAMPLE_FORMAT_IEEEFP)?;
    dir.write_tag(Tag::TileWidth, edge as u32)?;
    dir.write_tag(Tag::TileLength, edge as u32)?;
    dir.write_tag(Tag::TileOffsets, &offsets[..])?;
    dir.write_tag(Tag::TileByteCounts, &byte_counts[..])?;

    let scale = [gt.pixel_width.abs(), gt.pixel_height.abs(), 0.0];
    let tie_point = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    dir.write_tag(Tag::ModelTiepointTag, &tie_point[..])?;
    dir.write_tag(Tag::GeoKeyDirectoryTag, &geo_key_directory()[..])?;
    let nodata_text = format!("{:e}", options.nodata);
    dir.write_tag(Tag::GdalNodata, nodata_text.as_str())?;

    dir.finish()
}
