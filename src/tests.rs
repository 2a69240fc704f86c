use crate::axis::*;
use crate::cache::*;
use crate::config::*;
use crate::dataset::*;
use crate::downsample::*;
use crate::error::*;
use crate::extract::*;
use crate::query::*;
use crate::range::*;
use crate::raster::*;
use crate::series::*;
use crate::source::*;
use ndarray::{Array2, ArrayD, IxDyn};
use std::path::Path;
use tempfile::tempdir;

const N_TIME: usize = 5;
const N_DEPTH: usize = 3;
const N_LAT: usize = 50;
const N_LON: usize = 60;
const FILL: f64 = -999.0;
const REPLACE: f64 = 9.9e36;

/// Value stored in the synthetic temperature field.
fn temperature_at(t: usize, d: usize, la: usize, lo: usize) -> f64 {
    if la == 0 && lo == 0 {
        return FILL;
    }
    10.0 + t as f64 + d as f64 * 0.1 + la as f64 * 0.01 + lo as f64 * 0.0001
}

/// A 5 x 3 x 50 x 60 ocean grid with ascending latitudes.
///
/// - `temperature(time, depth, lat, lon)` with `_FillValue = -999` at the south-west corner
/// - `bathymetry(lon, lat)`, stored longitude first
/// - `mask(nv, lat, lon)`, where `nv` is an index-only dimension of length 1
fn ocean_source() -> MemorySource {
    let mut source = MemorySource::new("ocean");
    source.add_coordinate(
        "time",
        (0..N_TIME).map(|i| i as f64 * 24.0).collect(),
        Some("hours since 2020-01-01 00:00:00"),
    );
    source.add_coordinate("depth", vec![0.0, 5.0, 10.0], Some("m"));
    source.add_coordinate(
        "lat",
        (0..N_LAT).map(|i| -24.5 + i as f64).collect(),
        Some("degrees_north"),
    );
    source.add_coordinate(
        "lon",
        (0..N_LON).map(|i| 100.0 + i as f64 * 0.5).collect(),
        Some("degrees_east"),
    );
    source.add_dimension("nv", 1);

    let temperature = ArrayD::from_shape_fn(IxDyn(&[N_TIME, N_DEPTH, N_LAT, N_LON]), |ix| {
        temperature_at(ix[0], ix[1], ix[2], ix[3])
    });
    source
        .add_variable("temperature", &["time", "depth", "lat", "lon"], temperature)
        .unwrap();
    source
        .set_attributes(
            "temperature",
            VariableAttributes {
                fill_value: Some(FILL),
                units: Some("degC".to_string()),
                long_name: Some("sea water temperature".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let bathymetry = ArrayD::from_shape_fn(IxDyn(&[N_LON, N_LAT]), |ix| {
        ix[0] as f64 * 100.0 + ix[1] as f64
    });
    source
        .add_variable("bathymetry", &["lon", "lat"], bathymetry)
        .unwrap();

    let mask = ArrayD::from_shape_fn(IxDyn(&[1, N_LAT, N_LON]), |ix| ((ix[1] + ix[2]) % 2) as f64);
    source.add_variable("mask", &["nv", "lat", "lon"], mask).unwrap();
    source
}

fn ocean_dataset() -> Dataset<MemorySource> {
    Dataset::new(ocean_source()).unwrap()
}

fn test_config(root: &Path) -> EngineConfig {
    EngineConfig {
        cache_dir: root.join("tiles"),
        preview_dir: root.join("previews"),
        tile_size: 16,
        ..Default::default()
    }
}

fn full_request(variable: &str) -> SliceRequest {
    SliceRequest {
        variable: variable.to_string(),
        longitude: (0, N_LON - 1),
        latitude: (0, N_LAT - 1),
        time_index: None,
        depth_index: None,
    }
}

#[cfg(test)]
mod axis_tests {
    use super::*;

    #[test]
    fn test_normalize_synonyms() {
        assert_eq!(normalize(Some("lon")).unwrap(), Some(CanonicalAxis::Longitude));
        assert_eq!(normalize(Some("LONGITUDE")).unwrap(), Some(CanonicalAxis::Longitude));
        assert_eq!(normalize(Some("Lat")).unwrap(), Some(CanonicalAxis::Latitude));
        assert_eq!(normalize(Some("level")).unwrap(), Some(CanonicalAxis::Depth));
        assert_eq!(normalize(Some("datetime")).unwrap(), Some(CanonicalAxis::Time));
        assert_eq!(normalize(None).unwrap(), None);

        match normalize(Some("station")) {
            Err(TilerError::UnrecognizedDimension(name)) => assert_eq!(name, "station"),
            other => panic!("Expected UnrecognizedDimension, got {:?}", other),
        }
    }

    #[test]
    fn test_axis_table_from_source() {
        let dataset = ocean_dataset();
        let axes = &dataset.axes;

        assert_eq!(axes.size(CanonicalAxis::Time), N_TIME);
        assert_eq!(axes.size(CanonicalAxis::Depth), N_DEPTH);
        assert_eq!(axes.size(CanonicalAxis::Latitude), N_LAT);
        assert_eq!(axes.size(CanonicalAxis::Longitude), N_LON);
        assert_eq!(axes.kind_of("lat"), Some(CanonicalAxis::Latitude));
        // Index-only dimensions have no axis
        assert_eq!(axes.kind_of("nv"), None);

        let lon = axes.get(CanonicalAxis::Longitude).unwrap();
        assert_eq!(lon.source_name, "lon");
        assert_eq!(lon.units.as_deref(), Some("degrees_east"));
        assert_eq!(lon.bounds(), Some((100.0, 129.5)));
    }

    #[test]
    fn test_unknown_coordinate_dimension_is_skipped() {
        let mut source = MemorySource::new("stations");
        source.add_coordinate("station", vec![1.0, 2.0], None);
        source.add_coordinate("lat", vec![0.0, 1.0], None);
        source.add_coordinate("lon", vec![0.0, 1.0, 2.0], None);

        let axes = AxisTable::from_source(&source).unwrap();
        assert!(axes.exists(CanonicalAxis::Latitude));
        assert!(axes.exists(CanonicalAxis::Longitude));
        assert!(!axes.exists(CanonicalAxis::Time));
        assert!(!axes.exists(CanonicalAxis::Depth));
        assert_eq!(axes.size(CanonicalAxis::Time), 0);
        assert_eq!(axes.kind_of("station"), None);
    }

    #[test]
    fn test_nearest_index_ties_go_to_lower_coordinate() {
        let ascending = Axis {
            kind: CanonicalAxis::Latitude,
            source_name: "lat".to_string(),
            index: 0,
            size: 3,
            values: vec![0.0, 1.0, 2.0],
            units: None,
        };
        assert_eq!(ascending.nearest_index(0.5), Some(0));
        assert_eq!(ascending.nearest_index(1.9), Some(2));

        let descending = Axis {
            values: vec![2.0, 1.0, 0.0],
            ..ascending
        };
        assert_eq!(descending.nearest_index(0.5), Some(2));
        assert_eq!(descending.nearest_index(1.5), Some(1));
    }

    #[test]
    fn test_time_reference_labels() {
        let reference = TimeReference::parse("days since 1990-01-01").unwrap();
        assert_eq!(reference.unit, TimeUnit::Days);
        assert_eq!(reference.label(1.5).as_deref(), Some("1990-01-02 12:00:00"));
        assert!(TimeReference::parse("fortnights since 1990-01-01").is_none());
        assert!(TimeReference::parse("hours").is_none());

        let dataset = ocean_dataset();
        assert_eq!(dataset.time_label(Some(1)), "TIME: 2020-01-02 00:00:00");
        assert_eq!(dataset.time_label(None), GENERIC_DISPLAY_LABEL);
        assert_eq!(dataset.time_label(Some(99)), GENERIC_DISPLAY_LABEL);
    }

    #[test]
    fn test_variable_lookup() {
        let dataset = ocean_dataset();

        let temperature = dataset.variable("temperature").unwrap();
        assert_eq!(temperature.position(CanonicalAxis::Depth), Some(1));
        assert!(temperature.is_raster_capable());
        assert_eq!(
            temperature.canonical_dimensions(),
            vec!["time", "depth", "latitude", "longitude"]
        );

        let names: Vec<String> = dataset
            .data_variables()
            .unwrap()
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(names, vec!["temperature", "bathymetry", "mask"]);

        assert!(matches!(
            dataset.variable("salinity"),
            Err(TilerError::VariableNotFound(_))
        ));
    }
}

#[cfg(test)]
mod range_tests {
    use super::*;

    #[test]
    fn test_validate_defaults_and_bounds() {
        assert_eq!(validate(None, None, true, 60, "longitude").unwrap(), (0, 59));
        assert_eq!(validate(Some(3), None, true, 60, "longitude").unwrap(), (3, 59));
        assert_eq!(validate(None, Some(7), true, 60, "longitude").unwrap(), (0, 7));
        assert_eq!(validate(None, None, false, 0, "depth").unwrap(), (0, 0));

        assert_eq!(
            validate(Some(-2), None, true, 60, "longitude"),
            Err(ValidationError::IndexOutOfRange {
                field: "longitude_start".to_string(),
                value: -2,
                size: 60
            })
        );
        assert!(matches!(
            validate(None, Some(60), true, 60, "longitude"),
            Err(ValidationError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            validate(Some(10), Some(9), true, 60, "longitude"),
            Err(ValidationError::InvalidRange { start: 10, end: 9, .. })
        ));
        assert!(matches!(
            validate(None, Some(0), false, 0, "depth"),
            Err(ValidationError::InvalidAxisUsage { .. })
        ));
    }

    #[test]
    fn test_every_valid_range_is_returned_unchanged() {
        let size = 12;
        for start in 0..size {
            for end in start..size {
                let got = validate(Some(start as i64), Some(end as i64), true, size, "x").unwrap();
                assert_eq!(got, (start, end));
            }
        }
    }

    #[test]
    fn test_validate_all_collects_every_error() {
        let dataset = ocean_dataset();
        let request = RangeRequest {
            longitude: AxisRequest::new(Some(100), None),
            latitude: AxisRequest::new(Some(20), Some(10)),
            time: AxisRequest::new(None, Some(2)),
            ..Default::default()
        };

        let errors = validate_all(&dataset.axes, &request).unwrap_err();
        assert_eq!(errors.len(), 2);
        let fields: Vec<String> = errors.iter().map(|e| e.field()).collect();
        assert!(fields.contains(&"longitude_start".to_string()));
        assert!(fields.contains(&"latitude_start".to_string()));
    }

    #[test]
    fn test_validate_all_resolves_absent_axes_to_none() {
        let mut source = MemorySource::new("surface");
        source.add_coordinate("lat", vec![0.0, 1.0], None);
        source.add_coordinate("lon", vec![0.0, 1.0, 2.0], None);
        let axes = AxisTable::from_source(&source).unwrap();

        let ranges = validate_all(&axes, &RangeRequest::default()).unwrap();
        assert_eq!(ranges.time, None);
        assert_eq!(ranges.depth, None);
        assert_eq!(ranges.longitude, Some((0, 2)));
        assert_eq!(ranges.len(CanonicalAxis::Time), 1);
        assert_eq!(ranges.len(CanonicalAxis::Longitude), 3);

        let request = RangeRequest {
            depth: AxisRequest::new(Some(0), None),
            ..Default::default()
        };
        let errors = validate_all(&axes, &request).unwrap_err();
        assert!(matches!(errors.0[0], ValidationError::InvalidAxisUsage { .. }));
    }
}

#[cfg(test)]
mod downsample_tests {
    use super::*;

    #[test]
    fn test_compute_grid_keeps_small_grids() {
        assert_eq!(compute_grid(5, 3, 15), (5, 3));
        assert_eq!(compute_grid(1, 1, 1), (1, 1));
        assert_eq!(compute_grid(60, 50, 100), (10, 10));
        assert_eq!(compute_grid(5, 3, 4), (2, 2));
    }

    #[test]
    fn test_compute_grid_truncates_first_axis() {
        assert_eq!(compute_grid(5, 3, 4), (2, 2));
        assert_eq!(compute_grid(60, 50, 100), (10, 10));
    }

    #[test]
    fn test_compute_grid_respects_limit() {
        for total1 in [1usize, 2, 3, 7, 50, 360, 1440] {
            for total2 in [1usize, 2, 5, 33, 720] {
                for limit in [1usize, 2, 4, 10, 100, 10_000] {
                    let (n1, n2) = compute_grid(total1, total2, limit);
                    assert!(n1 >= 1 && n2 >= 1);
                    assert!(n1 <= total1 && n2 <= total2);
                    if total1 * total2 <= limit {
                        assert_eq!((n1, n2), (total1, total2));
                    } else {
                        assert!(n1 * n2 <= limit, "{}x{} limit {} gave {}x{}", total1, total2, limit, n1, n2);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compute_indices_examples() {
        assert_eq!(compute_indices(5, 1), vec![2]);
        assert_eq!(compute_indices(5, 2), vec![0, 4]);
        assert_eq!(compute_indices(3, 2), vec![0, 2]);
        assert_eq!(compute_indices(60, 4), vec![1, 20, 39, 58]);
        assert_eq!(compute_indices(4, 10), vec![0, 1, 2, 3]);
        assert!(compute_indices(0, 3).is_empty());
    }

    #[test]
    fn test_compute_indices_are_increasing_and_in_range() {
        for total in 1..80 {
            for count in 1..20 {
                let indices = compute_indices(total, count);
                assert_eq!(indices.len(), count.min(total));
                assert!(indices.iter().all(|&i| i < total));
                assert!(indices.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}

#[cfg(test)]
mod extract_tests {
    use super::*;

    #[test]
    fn test_extract_2d_subset() -> Result<()> {
        let dataset = ocean_dataset();
        let request = SliceRequest {
            variable: "temperature".to_string(),
            longitude: (10, 19),
            latitude: (5, 9),
            time_index: Some(2),
            depth_index: Some(1),
        };

        let slice = extract_2d(&dataset, &request, &FillPolicy::new(FILL, REPLACE))?;
        assert_eq!(slice.data.dim(), (5, 10));
        assert_eq!(slice.width(), 10);
        assert_eq!(slice.height(), 5);
        assert_eq!(slice.longitudes.len(), 10);
        assert_eq!(slice.latitudes, vec![-19.5, -18.5, -17.5, -16.5, -15.5]);
        assert_eq!(slice.data[[0, 0]], temperature_at(2, 1, 5, 10));
        assert_eq!(slice.data[[4, 9]], temperature_at(2, 1, 9, 19));
        Ok(())
    }

    #[test]
    fn test_fill_values_become_replace_value() -> Result<()> {
        let dataset = ocean_dataset();
        let slice = extract_2d(
            &dataset,
            &full_request("temperature"),
            &FillPolicy::new(FILL, REPLACE),
        )?;
        assert_eq!(slice.data[[0, 0]], REPLACE);
        assert!(slice.data.iter().all(|v| *v != FILL));
        Ok(())
    }

    #[test]
    fn test_longitude_first_storage_is_transposed() -> Result<()> {
        let dataset = ocean_dataset();
        let slice = extract_2d(&dataset, &full_request("bathymetry"), &FillPolicy::default())?;

        assert_eq!(slice.data.dim(), (N_LAT, N_LON));
        assert_eq!(slice.data[[3, 7]], 7.0 * 100.0 + 3.0);
        assert_eq!(slice.data[[N_LAT - 1, 0]], (N_LAT - 1) as f64);
        Ok(())
    }

    #[test]
    fn test_unmapped_singleton_dimension_is_read() -> Result<()> {
        let dataset = ocean_dataset();
        let slice = extract_2d(&dataset, &full_request("mask"), &FillPolicy::default())?;
        assert_eq!(slice.data.dim(), (N_LAT, N_LON));
        assert_eq!(slice.data[[1, 2]], 1.0);
        Ok(())
    }

    #[test]
    fn test_index_on_missing_axis_is_rejected() {
        let dataset = ocean_dataset();
        let request = SliceRequest {
            time_index: Some(0),
            ..full_request("bathymetry")
        };
        match extract_2d(&dataset, &request, &FillPolicy::default()) {
            Err(TilerError::AxisMissingForSelector { variable, axis }) => {
                assert_eq!(variable, "bathymetry");
                assert_eq!(axis, "time");
            }
            other => panic!("Expected AxisMissingForSelector, got {:?}", other),
        }
    }

    #[test]
    fn test_unmapped_dimension_longer_than_one_is_rejected() {
        let mut source = MemorySource::new("ensemble");
        source.add_coordinate("lat", vec![0.0, 1.0], None);
        source.add_coordinate("lon", vec![0.0, 1.0], None);
        source.add_dimension("member", 3);
        source
            .add_variable("sst", &["member", "lat", "lon"], ArrayD::zeros(IxDyn(&[3, 2, 2])))
            .unwrap();
        let dataset = Dataset::new(source).unwrap();

        let request = SliceRequest {
            variable: "sst".to_string(),
            longitude: (0, 1),
            latitude: (0, 1),
            time_index: None,
            depth_index: None,
        };
        assert!(matches!(
            extract_2d(&dataset, &request, &FillPolicy::default()),
            Err(TilerError::UnsupportedDimension { len: 3, .. })
        ));
    }

    #[test]
    fn test_default_selectors() {
        let dataset = ocean_dataset();
        let variable = dataset.variable("temperature").unwrap();
        let selectors = build_selectors(&variable, &full_request("temperature")).unwrap();

        assert_eq!(selectors[&CanonicalAxis::Time], Selector::Index(0));
        assert_eq!(selectors[&CanonicalAxis::Depth], Selector::Index(0));
        assert_eq!(selectors[&CanonicalAxis::Longitude], Selector::Range(0, N_LON - 1));

        let surface = dataset.variable("bathymetry").unwrap();
        let selectors = build_selectors(&surface, &full_request("bathymetry")).unwrap();
        assert!(!selectors.contains_key(&CanonicalAxis::Time));
    }

    #[test]
    fn test_read_selection_time_series() -> Result<()> {
        let dataset = ocean_dataset();
        let variable = dataset.variable("temperature")?;
        let mut selectors = SelectorMap::new();
        selectors.insert(CanonicalAxis::Time, Selector::All);
        selectors.insert(CanonicalAxis::Depth, Selector::Index(2));
        selectors.insert(CanonicalAxis::Latitude, Selector::Index(4));
        selectors.insert(CanonicalAxis::Longitude, Selector::Index(6));

        let region = read_selection(&dataset, &variable, &selectors)?;
        assert_eq!(region.shape(), &[N_TIME, 1, 1, 1]);
        let values: Vec<f64> = region.iter().copied().collect();
        assert_eq!(values[3], temperature_at(3, 2, 4, 6));
        Ok(())
    }

    #[test]
    fn test_fill_substitution_is_idempotent() {
        let policy = FillPolicy::new(FILL, REPLACE);
        let mut data = Array2::from_shape_vec((2, 2), vec![1.0, FILL, 3.0, FILL]).unwrap();
        apply_fill_substitution(&mut data, &policy);
        let once = data.clone();
        apply_fill_substitution(&mut data, &policy);
        assert_eq!(data, once);
        assert_eq!(data[[0, 1]], REPLACE);
        assert_eq!(data[[1, 0]], 3.0);

        let mut nan = Array2::from_shape_vec((1, 2), vec![f64::NAN, 2.0]).unwrap();
        apply_fill_substitution(&mut nan, &FillPolicy::new(f64::NAN, REPLACE));
        assert_eq!(nan[[0, 0]], REPLACE);
        assert_eq!(nan[[0, 1]], 2.0);
    }
}

#[cfg(test)]
mod raster_tests {
    use super::*;
    use std::fs::File;
    use tiff::decoder::{Decoder, DecodingResult};
    use tiff::tags::Tag;

    fn options() -> RasterOptions {
        RasterOptions {
            tile_size: 16,
            deflate_level: 6,
            replace_value: REPLACE,
        }
    }

    /// 4 rows x 6 columns, latitudes ascending (south-up storage).
    fn south_up_slice() -> Slice2D {
        Slice2D {
            data: Array2::from_shape_fn((4, 6), |(r, c)| (r * 10 + c) as f64),
            longitudes: (10..16).map(|v| v as f64).collect(),
            latitudes: vec![-2.0, -1.0, 0.0, 1.0],
        }
    }

    fn spec() -> TileSpec {
        TileSpec {
            dataset: "ocean".to_string(),
            channel: "temperature".to_string(),
            time_index: Some(3),
            depth_index: None,
            longitude: (0, 5),
            latitude: (0, 3),
            res_limit: None,
            display_label: GENERIC_DISPLAY_LABEL.to_string(),
            preview: false,
        }
    }

    #[test]
    fn test_file_names() {
        let spec = spec();
        assert_eq!(
            spec.file_prefix(),
            "ocean_dt=3_dp=na_lon=0_5_lat=0_3_res=na_lb=temperature_mn="
        );
        let name = spec.file_name(1.5, 22.25);
        assert!(name.ends_with(".tiff"));
        assert_eq!(spec.parse_min_max(&name), Some((1.5, 22.25)));
        assert_eq!(spec.parse_min_max("other.tiff"), None);

        let preview = TileSpec { preview: true, ..spec };
        assert_eq!(preview.file_prefix(), "preview_ocean_temperature_mn=");
    }

    #[test]
    fn test_value_range_ignores_sentinels() {
        let data = Array2::from_shape_vec((1, 4), vec![REPLACE, 2.0, f64::NAN, -1.0]).unwrap();
        assert_eq!(value_range(&data, REPLACE), (-1.0, 2.0));

        let empty = Array2::from_elem((2, 2), REPLACE);
        assert_eq!(value_range(&empty, REPLACE), (0.0, 0.0));
    }

    #[test]
    fn test_build_writes_north_up_geotiff() -> Result<()> {
        let dir = tempdir()?;
        let builder = RasterTileBuilder::new(dir.path(), options());
        let artifact = builder.build(&south_up_slice(), &spec())?;

        assert_eq!((artifact.width, artifact.height), (6, 4));
        assert_eq!((artifact.min_value, artifact.max_value), (0.0, 35.0));
        assert!(!artifact.cached);
        assert!(artifact.path.exists());
        assert_eq!(artifact.size, std::fs::metadata(&artifact.path)?.len());

        let mut decoder = Decoder::new(File::open(&artifact.path)?).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (6, 4));

        let tie_point = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).unwrap();
        assert_eq!(tie_point, vec![0.0, 0.0, 0.0, 10.0, 2.0, 0.0]);
        let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).unwrap();
        assert_eq!(scale, vec![1.0, 1.0, 0.0]);
        let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).unwrap();
        assert_eq!(&keys[12..], &[2048, 0, 1, 4326]);

        match decoder.read_image().unwrap() {
            DecodingResult::F32(values) => {
                assert_eq!(values.len(), 24);
                // First row is the northernmost latitude
                assert_eq!(values[0], 30.0);
                assert_eq!(values[5], 35.0);
                assert_eq!(values[23], 5.0);
            }
            _ => panic!("Expected float32 samples"),
        }
        Ok(())
    }

    #[test]
    fn test_load_cached_reads_header_only() -> Result<()> {
        let dir = tempdir()?;
        let builder = RasterTileBuilder::new(dir.path(), options());
        let built = builder.build(&south_up_slice(), &spec())?;

        let cached = builder.load_cached(&spec(), &built.path)?;
        assert!(cached.cached);
        assert_eq!(cached.file_name, built.file_name);
        assert_eq!((cached.width, cached.height), (6, 4));
        assert_eq!((cached.min_value, cached.max_value), (built.min_value, built.max_value));
        Ok(())
    }

    #[test]
    fn test_render_respects_pixel_budget() -> Result<()> {
        let dataset = ocean_dataset();
        let slice = extract_2d(&dataset, &full_request("mask"), &FillPolicy::default())?;
        let builder = RasterTileBuilder::new("unused", options());

        let (data, gt) = builder.render(&slice, Some(100))?;
        let (h, w) = data.dim();
        assert!(w * h <= 100);
        assert!(gt.is_north_up());
        Ok(())
    }

    #[test]
    fn test_statistics_cover_full_slice_when_resampled() -> Result<()> {
        let dir = tempdir()?;
        let dataset = ocean_dataset();
        let request = SliceRequest {
            time_index: Some(0),
            depth_index: Some(0),
            ..full_request("temperature")
        };
        let slice = extract_2d(&dataset, &request, &FillPolicy::new(FILL, REPLACE))?;

        let builder = RasterTileBuilder::new(dir.path(), options());
        let spec = TileSpec {
            time_index: Some(0),
            depth_index: Some(0),
            longitude: (0, N_LON - 1),
            latitude: (0, N_LAT - 1),
            res_limit: Some(100),
            ..spec()
        };
        let tile = builder.build(&slice, &spec)?;

        assert!(tile.width * tile.height <= 100);
        assert_eq!((tile.min_value, tile.max_value), value_range(&slice.data, REPLACE));
        assert_eq!(tile.min_value, temperature_at(0, 0, 0, 1));
        assert_eq!(tile.max_value, temperature_at(0, 0, N_LAT - 1, N_LON - 1));
        Ok(())
    }

    #[test]
    fn test_geotransform_from_coordinates() -> Result<()> {
        let gt = GeoTransform::from_coordinates(&[0.0, 0.5, 1.0], &[10.0, 9.0, 8.0])?;
        assert!(gt.is_north_up());
        assert_eq!(gt.to_gdal(), [0.0, 0.5, 0.0, 10.0, 0.0, -1.0]);
        assert_eq!(gt.pixel_to_geo(2.0, 1.0), (1.0, 9.0));

        let bounds = gt.bounds(3, 3);
        assert_eq!((bounds.min_y, bounds.max_y), (7.0, 10.0));
        assert!(GeoTransform::from_coordinates(&[], &[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_warp_rejects_projected_sources() {
        let gt = GeoTransform {
            origin_x: 0.0,
            pixel_width: 1.0,
            origin_y: 0.0,
            pixel_height: -1.0,
        };
        let data = Array2::zeros((2, 2));
        assert!(matches!(
            warp_to_wgs84(&data, &gt, SourceCrs::Epsg(3857), REPLACE),
            Err(TilerError::Projection(_))
        ));
        assert!(warp_to_wgs84(&data, &gt, SourceCrs::Epsg(4326), REPLACE).is_ok());
    }

    #[test]
    fn test_empty_slice_is_rejected() {
        let builder = RasterTileBuilder::new("unused", options());
        let slice = Slice2D {
            data: Array2::zeros((0, 0)),
            longitudes: Vec::new(),
            latitudes: Vec::new(),
        };
        assert!(matches!(builder.build(&slice, &spec()), Err(TilerError::EmptySlice(_))));
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;
    use std::fs::{self, FileTimes, OpenOptions};
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    /// Writes a 100 byte file whose access time is `age_rank` seconds after a fixed past instant.
    fn cached_file(dir: &Path, name: &str, age_rank: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, [0u8; 100]).unwrap();
        let accessed = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000 + age_rank);
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_times(FileTimes::new().set_accessed(accessed))
            .unwrap();
        path
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let cache = TileCacheManager::new(dir.path().join("absent"), 10, 5);
        assert_eq!(cache.usage().unwrap(), 0);
        assert!(!cache.ensure_capacity().triggered);
    }

    #[test]
    fn test_eviction_removes_oldest_first() {
        let dir = tempdir().unwrap();
        let a = cached_file(dir.path(), "a.tiff", 1);
        let b = cached_file(dir.path(), "b.tiff", 2);
        let c = cached_file(dir.path(), "c.tiff", 3);
        let d = cached_file(dir.path(), "d.tiff", 4);

        let cache = TileCacheManager::new(dir.path(), 300, 150);
        let report = cache.ensure_capacity();

        assert!(report.triggered);
        assert_eq!(report.scanned_files, 4);
        assert_eq!(report.bytes_before, 400);
        assert_eq!(report.bytes_after, 100);
        assert_eq!(report.freed_bytes(), 300);
        assert_eq!(report.evicted, vec![a.clone(), b.clone(), c.clone()]);
        assert!(report.failed.is_empty());
        assert!(!a.exists() && !b.exists() && !c.exists());
        assert!(d.exists());
    }

    #[test]
    fn test_no_eviction_below_high_water() {
        let dir = tempdir().unwrap();
        cached_file(dir.path(), "a.tiff", 1);
        cached_file(dir.path(), "b.tiff", 2);

        let cache = TileCacheManager::new(dir.path(), 201, 100);
        let report = cache.ensure_capacity();
        assert!(!report.triggered);
        assert!(report.evicted.is_empty());
        assert_eq!(cache.usage().unwrap(), 200);
    }

    #[test]
    fn test_touch_protects_recently_served_tiles() {
        let dir = tempdir().unwrap();
        let a = cached_file(dir.path(), "a.tiff", 1);
        let b = cached_file(dir.path(), "b.tiff", 2);
        let c = cached_file(dir.path(), "c.tiff", 3);
        let d = cached_file(dir.path(), "d.tiff", 4);

        let cache = TileCacheManager::new(dir.path(), 300, 250);
        cache.touch(&a).unwrap();
        let report = cache.ensure_capacity();

        assert_eq!(report.evicted, vec![b, c]);
        assert!(a.exists());
        assert!(d.exists());
    }

    #[test]
    fn test_scan_skips_in_flight_temporary_files() {
        let dir = tempdir().unwrap();
        cached_file(dir.path(), "a.tiff", 1);
        fs::write(dir.path().join(".tmpXYZ"), [0u8; 500]).unwrap();

        let cache = TileCacheManager::new(dir.path(), 1000, 500);
        let scan = cache.scan().unwrap();
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.total_bytes, 100);
    }

    #[test]
    fn test_stale_temporary_files_are_counted_and_evicted_first() {
        let dir = tempdir().unwrap();
        let a = cached_file(dir.path(), "a.tiff", 1);
        let b = cached_file(dir.path(), "b.tiff", 2);
        let stale = dir.path().join(".tmpOLD");
        fs::write(&stale, [0u8; 500]).unwrap();
        OpenOptions::new()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_times(FileTimes::new().set_modified(SystemTime::now() - Duration::from_secs(3600)))
            .unwrap();
        let fresh = dir.path().join(".tmpNEW");
        fs::write(&fresh, [0u8; 50]).unwrap();

        let cache = TileCacheManager::new(dir.path(), 600, 250);
        let scan = cache.scan().unwrap();
        assert_eq!(scan.total_bytes, 700);
        assert_eq!(scan.entries[0].path, stale);

        let report = cache.ensure_capacity();
        assert!(report.triggered);
        assert_eq!(report.evicted, vec![stale.clone()]);
        assert_eq!(report.bytes_after, 200);
        assert!(!stale.exists());
        assert!(fresh.exists() && a.exists() && b.exists());
    }

    #[test]
    fn test_temp_grace_is_configurable() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".tmpXYZ"), [0u8; 500]).unwrap();

        let cache = TileCacheManager::new(dir.path(), 1000, 500).with_temp_grace(Duration::ZERO);
        assert_eq!(cache.usage().unwrap(), 500);
    }

    #[test]
    fn test_find_by_prefix() {
        let dir = tempdir().unwrap();
        cached_file(dir.path(), "ocean_dt=1_mn=0.5_mx=2.tiff", 1);
        cached_file(dir.path(), "ocean_dt=10_mn=0.1_mx=9.tiff", 2);

        let cache = TileCacheManager::new(dir.path(), 1000, 500);
        let found = cache.find_by_prefix("ocean_dt=1_mn=").unwrap();
        assert_eq!(found.file_name().unwrap(), "ocean_dt=1_mn=0.5_mx=2.tiff");
        assert!(cache.find_by_prefix("ocean_dt=2_").is_none());
    }
}

#[cfg(test)]
mod query_tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_tiff_request_end_to_end() -> Result<()> {
        let dir = tempdir()?;
        let engine = TileEngine::new(test_config(dir.path()))?;
        let dataset = ocean_dataset();

        let query = ContentQuery {
            longitude_start: Some(0),
            longitude_end: Some(59),
            latitude_start: Some(0),
            latitude_end: Some(49),
            depth_start: Some(0),
            depth_end: Some(2),
            datetime_start: Some(0),
            datetime_end: Some(4),
            filenum_limit: Some(4),
            ..ContentQuery::new("temperature")
        };

        let mut progress = Vec::new();
        let manifest =
            engine.generate_content_with_progress(&dataset, &query, |done, total| progress.push((done, total)))?;

        assert!(manifest.complete);
        assert_eq!(manifest.grid, GridShape { time: 2, depth: 2 });
        assert_eq!(progress.last(), Some(&(4, 4)));
        assert_eq!(manifest.ranges.longitude, Some((0, N_LON - 1)));
        assert!(!manifest.eviction.as_ref().unwrap().triggered);

        let cells: Vec<(Option<usize>, Option<usize>)> = manifest
            .entries
            .iter()
            .map(|e| (e.time_index, e.depth_index))
            .collect();
        assert_eq!(
            cells,
            vec![(Some(0), Some(0)), (Some(0), Some(2)), (Some(4), Some(0)), (Some(4), Some(2))]
        );

        let tiles: Vec<&TileArtifact> = manifest.tiles().collect();
        assert_eq!(tiles.len(), 4);
        for tile in &tiles {
            assert!(tile.path.exists());
            assert!(tile.min_value <= tile.max_value);
            assert!(tile.max_value < REPLACE);
            assert!(!tile.cached);
            assert_eq!((tile.width, tile.height), (N_LON, N_LAT));
        }
        assert_eq!(tiles[2].display_label, "TIME: 2020-01-05 00:00:00");
        assert_eq!(fs::read_dir(dir.path().join("tiles"))?.count(), 4);
        Ok(())
    }

    #[test]
    fn test_repeated_request_hits_cache() -> Result<()> {
        let dir = tempdir()?;
        let engine = TileEngine::new(test_config(dir.path()))?;
        let dataset = ocean_dataset();

        let mut query = ContentQuery::new("temperature");
        query.datetime_start = Some(1);
        query.datetime_end = Some(1);
        query.depth_end = Some(0);
        query.res_limit = Some(300);

        let first = engine.generate_content(&dataset, &query)?;
        let second = engine.generate_content(&dataset, &query)?;

        let a = first.tiles().next().unwrap();
        let b = second.tiles().next().unwrap();
        assert!(!a.cached);
        assert!(b.cached);
        assert_eq!(a.file_name, b.file_name);
        assert_eq!(a.path, b.path);
        assert!(b.width * b.height <= 300);
        Ok(())
    }

    #[test]
    fn test_all_validation_errors_are_reported() {
        let dir = tempdir().unwrap();
        let engine = TileEngine::new(test_config(dir.path())).unwrap();
        let dataset = ocean_dataset();

        let mut query = ContentQuery::new("temperature");
        query.longitude_start = Some(100);
        query.latitude_end = Some(-5);
        query.res_limit = Some(0);

        match engine.generate_content(&dataset, &query) {
            Err(TilerError::Validation(errors)) => {
                assert_eq!(errors.len(), 3);
                let fields: Vec<String> = errors.iter().map(|e| e.field()).collect();
                assert!(fields.contains(&"longitude_start".to_string()));
                assert!(fields.contains(&"latitude_end".to_string()));
                assert!(fields.contains(&"res_limit".to_string()));
            }
            other => panic!("Expected validation errors, got {:?}", other),
        }
        // Nothing was written
        assert!(!dir.path().join("tiles").exists());
    }

    #[test]
    fn test_minus_one_means_unbounded() -> Result<()> {
        let query = ContentQuery::from_json(
            r#"{"channel": "temperature", "longitude_start": -1, "longitude_end": -1, "return_type": "array"}"#,
        )?;
        let request = query.range_request();
        assert!(!request.longitude.is_set());
        assert_eq!(query.return_type, ReturnType::Array);

        let dir = tempdir()?;
        let engine = TileEngine::new(test_config(dir.path()))?;
        let mut query = query;
        query.filenum_limit = Some(1);
        let manifest = engine.generate_content(&ocean_dataset(), &query)?;
        assert_eq!(manifest.ranges.longitude, Some((0, N_LON - 1)));
        assert_eq!(manifest.entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_time_bound_on_variable_without_time() {
        let dir = tempdir().unwrap();
        let engine = TileEngine::new(test_config(dir.path())).unwrap();

        let mut query = ContentQuery::new("bathymetry");
        query.datetime_start = Some(0);
        assert!(matches!(
            engine.generate_content(&ocean_dataset(), &query),
            Err(TilerError::AxisMissingForSelector { .. })
        ));

        // Without time bounds the variable renders as a single cell
        let query = ContentQuery::new("bathymetry");
        let manifest = engine.generate_content(&ocean_dataset(), &query).unwrap();
        assert_eq!(manifest.grid, GridShape { time: 1, depth: 1 });
        assert_eq!(manifest.entries[0].time_index, None);
        assert_eq!(manifest.tiles().next().unwrap().display_label, GENERIC_DISPLAY_LABEL);
    }

    #[test]
    fn test_array_request() -> Result<()> {
        let dir = tempdir()?;
        let engine = TileEngine::new(test_config(dir.path()))?;
        let dataset = ocean_dataset();

        let mut query = ContentQuery::new("temperature");
        query.return_type = ReturnType::Array;
        query.datetime_start = Some(1);
        query.datetime_end = Some(1);
        query.depth_start = Some(0);
        query.depth_end = Some(0);
        query.longitude_end = Some(9);
        query.latitude_end = Some(4);
        query.scalar_format = Some(2);

        let manifest = engine.generate_content(&dataset, &query)?;
        assert!(manifest.eviction.is_none());
        assert_eq!(manifest.entries.len(), 1);

        let grid = manifest.entries[0].array().unwrap();
        assert_eq!(grid.values.len(), 5);
        assert_eq!(grid.values[0].len(), 10);
        // North-up: first row is the northernmost latitude
        assert_eq!(grid.latitudes, vec![-20.5, -21.5, -22.5, -23.5, -24.5]);
        assert_eq!(grid.values[0][0], Some(11.04));
        assert_eq!(grid.values[4][0], None);
        assert_eq!(grid.min_value, temperature_at(1, 0, 0, 1));
        assert_eq!(grid.max_value, temperature_at(1, 0, 4, 9));
        assert!(!dir.path().join("tiles").exists());

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["entries"][0]["status"], "array");
        assert!(json["entries"][0]["values"][4][0].is_null());
        Ok(())
    }

    #[test]
    fn test_dataset_key_names_tiles() -> Result<()> {
        let dir = tempdir()?;
        let engine = TileEngine::new(test_config(dir.path()))?;

        let mut query = ContentQuery::new("mask");
        query.dataset_key = Some("gulf".to_string());
        let manifest = engine.generate_content(&ocean_dataset(), &query)?;

        assert_eq!(manifest.dataset, "gulf");
        assert!(manifest.tiles().all(|t| t.file_name.starts_with("gulf_dt=na_dp=na_")));
        Ok(())
    }

    #[test]
    fn test_tile_and_array_statistics_agree_under_res_limit() -> Result<()> {
        let dir = tempdir()?;
        let engine = TileEngine::new(test_config(dir.path()))?;
        let dataset = ocean_dataset();

        let mut query = ContentQuery::new("temperature");
        query.datetime_end = Some(0);
        query.depth_end = Some(0);
        query.res_limit = Some(100);
        let tiles = engine.generate_content(&dataset, &query)?;
        query.return_type = ReturnType::Array;
        let arrays = engine.generate_content(&dataset, &query)?;

        let tile = tiles.tiles().next().unwrap();
        let grid = arrays.entries[0].array().unwrap();
        assert_eq!((tile.min_value, tile.max_value), (grid.min_value, grid.max_value));
        assert_eq!(tile.min_value, temperature_at(0, 0, 0, 1));
        Ok(())
    }

    #[test]
    fn test_same_name_different_data_gets_distinct_tiles() -> Result<()> {
        let dir = tempdir()?;
        let engine = TileEngine::new(test_config(dir.path()))?;

        let mut shifted = ocean_source();
        let temperature = shifted
            .read_all("temperature")?
            .mapv(|v| if v == FILL { v } else { v + 500.0 });
        shifted.add_variable("temperature", &["time", "depth", "lat", "lon"], temperature)?;
        shifted.set_attributes(
            "temperature",
            VariableAttributes {
                fill_value: Some(FILL),
                ..Default::default()
            },
        )?;
        let shifted = Dataset::new(shifted)?;
        let original = ocean_dataset();
        assert_eq!(original.name(), shifted.name());
        assert_ne!(original.cache_key(), shifted.cache_key());
        assert_eq!(original.cache_key(), ocean_dataset().cache_key());
        assert!(original.cache_key().starts_with("ocean-"));

        let mut query = ContentQuery::new("temperature");
        query.datetime_end = Some(0);
        query.depth_end = Some(0);
        let first = engine.generate_content(&original, &query)?;
        let second = engine.generate_content(&shifted, &query)?;

        let a = first.tiles().next().unwrap();
        let b = second.tiles().next().unwrap();
        assert!(!b.cached);
        assert_ne!(a.path, b.path);
        assert_eq!(b.max_value, a.max_value + 500.0);
        Ok(())
    }

    #[test]
    fn test_disk_write_failure_stops_batch() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory")?;

        let config = EngineConfig {
            cache_dir: blocker,
            ..test_config(dir.path())
        };
        let engine = TileEngine::new(config)?;
        let mut query = ContentQuery::new("temperature");
        query.filenum_limit = Some(4);

        let manifest = engine.generate_content(&ocean_dataset(), &query)?;
        assert!(!manifest.complete);
        assert_eq!(manifest.entries.len(), 1);
        match &manifest.entries[0].content {
            EntryContent::Error { kind, .. } => assert_eq!(*kind, ErrorKind::DiskWrite),
            other => panic!("Expected a disk write error, got {:?}", other),
        }
        assert_eq!(manifest.errors().count(), 1);
        Ok(())
    }

    #[test]
    fn test_unknown_channel() {
        let dir = tempdir().unwrap();
        let engine = TileEngine::new(test_config(dir.path())).unwrap();
        assert!(matches!(
            engine.generate_content(&ocean_dataset(), &ContentQuery::new("salinity")),
            Err(TilerError::VariableNotFound(_))
        ));
    }

    #[test]
    fn test_query_from_yaml_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("request.yaml");
        fs::write(
            &path,
            "channel: temperature\ndatetime_start: 2\nfilenum_limit: 3\nreturn_type: array\n",
        )?;
        let query = ContentQuery::from_file(&path)?;
        assert_eq!(query.channel, "temperature");
        assert_eq!(query.datetime_start, Some(2));
        assert_eq!(query.datetime_end, None);
        assert_eq!(query.filenum_limit, Some(3));
        assert_eq!(query.return_type, ReturnType::Array);
        Ok(())
    }
}

#[cfg(test)]
mod series_tests {
    use super::*;

    #[test]
    fn test_point_snaps_to_nearest_grid_cell() -> Result<()> {
        let dataset = ocean_dataset();
        let query = PointQuery {
            channel: "temperature".to_string(),
            points: vec![QueryPoint::new(0.3, 105.2, None)],
        };

        let series = query_points(&dataset, &query, -10000.0)?;
        assert_eq!(series.len(), 1);
        let s = &series[0];
        assert_eq!((s.latitude_index, s.longitude_index, s.depth_index), (25, 10, Some(0)));
        assert_eq!((s.grid_latitude, s.grid_longitude), (0.5, 105.0));
        assert_eq!(s.values.len(), N_TIME);
        for (t, value) in s.values.iter().enumerate() {
            assert_eq!(*value, temperature_at(t, 0, 25, 10));
        }
        let times = s.times.as_ref().unwrap();
        assert_eq!(times[0], "2020-01-01 00:00:00");
        Ok(())
    }

    #[test]
    fn test_depth_and_fill_handling() -> Result<()> {
        let dataset = ocean_dataset();
        let query = PointQuery {
            channel: "temperature".to_string(),
            points: vec![QueryPoint::new(-24.5, 100.0, Some(9.0))],
        };

        let series = query_points(&dataset, &query, -10000.0)?;
        assert_eq!(series[0].depth_index, Some(2));
        assert!(series[0].values.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn test_out_of_span_points_are_collected() {
        let dataset = ocean_dataset();
        let query = PointQuery {
            channel: "temperature".to_string(),
            points: vec![QueryPoint::new(80.0, 105.0, None), QueryPoint::new(0.0, 50.0, None)],
        };

        match query_points(&dataset, &query, -10000.0) {
            Err(TilerError::Validation(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().all(|e| matches!(e, ValidationError::PointOutOfRange { .. })));
            }
            other => panic!("Expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_variable_without_time_is_rejected() {
        let dataset = ocean_dataset();
        let query = PointQuery {
            channel: "bathymetry".to_string(),
            points: vec![QueryPoint::new(0.0, 105.0, None)],
        };
        match query_points(&dataset, &query, -10000.0) {
            Err(TilerError::Validation(errors)) => {
                assert!(matches!(errors.0[0], ValidationError::MissingAxis { .. }));
            }
            other => panic!("Expected MissingAxis, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod info_tests {
    use super::*;
    use crate::info::*;

    #[test]
    fn test_describe_dataset() -> Result<()> {
        let meta = describe_dataset(&ocean_dataset())?;
        assert_eq!(meta.name, "ocean");
        assert_eq!(meta.total_dimensions, 5);
        assert_eq!(meta.total_variables, 3);
        assert_eq!(
            meta.time_span,
            Some(("2020-01-01 00:00:00".to_string(), "2020-01-05 00:00:00".to_string()))
        );

        let nv = meta.dimensions.iter().find(|d| d.name == "nv").unwrap();
        assert_eq!(nv.axis, None);
        let temperature = meta.variables.iter().find(|v| v.name == "temperature").unwrap();
        assert!(temperature.raster);
        assert_eq!(temperature.units.as_deref(), Some("degC"));
        assert_eq!(temperature.fill_value, Some(FILL));
        Ok(())
    }

    #[test]
    fn test_previews() -> Result<()> {
        let dir = tempdir()?;
        let config = test_config(dir.path());
        let builder = config.preview_builder();
        let dataset = ocean_dataset();

        let preview = generate_preview(&dataset, "temperature", &builder, &config)?;
        let prefix = format!("preview_{}_temperature_mn=", dataset.cache_key());
        assert!(preview.file_name.starts_with(&prefix));
        assert!(preview.path.starts_with(dir.path().join("previews")));
        assert_eq!(preview.display_label, "TIME: 2020-01-01 00:00:00");

        let previews = generate_previews(&dataset, &builder, &config)?;
        assert_eq!(previews.len(), 3);
        Ok(())
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.replace_value, 9.9e36);
        assert_eq!(config.high_water_bytes, 5 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_apply_env_with() {
        let vars: HashMap<&str, &str> = [
            ("NCTILES_CACHE_DIR", "/data/tiles"),
            ("NCTILES_LOW_WATER_BYTES", "1000"),
            ("NCTILES_DEFLATE_LEVEL", "9"),
            ("NCTILES_TILE_SIZE", ""),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_env_with(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/data/tiles"));
        assert_eq!(config.low_water_bytes, 1000);
        assert_eq!(config.deflate_level, 9);
        // Empty values are ignored
        assert_eq!(config.tile_size, 256);

        let mut config = EngineConfig::default();
        let result = config.apply_env_with(|key| {
            (key == "NCTILES_REPLACE_VALUE").then(|| "huge".to_string())
        });
        assert!(matches!(result, Err(TilerError::Config(_))));
    }

    #[test]
    fn test_validation_failures() {
        let bad = [
            EngineConfig {
                low_water_bytes: 10,
                high_water_bytes: 5,
                ..Default::default()
            },
            EngineConfig {
                tile_size: 100,
                ..Default::default()
            },
            EngineConfig {
                deflate_level: 10,
                ..Default::default()
            },
            EngineConfig {
                replace_value: f64::MAX,
                ..Default::default()
            },
            EngineConfig {
                preview_dir: PathBuf::from("cache/tiles"),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
            assert!(TileEngine::new(config).is_err());
        }
    }

    #[test]
    fn test_config_files() -> Result<()> {
        let dir = tempdir()?;
        let yaml = dir.path().join("engine.yaml");
        std::fs::write(&yaml, "cache_dir: /srv/tiles\ntile_size: 512\n")?;
        let config = EngineConfig::from_file(&yaml)?;
        assert_eq!(config.cache_dir, PathBuf::from("/srv/tiles"));
        assert_eq!(config.tile_size, 512);
        assert_eq!(config.deflate_level, 6);

        let json = dir.path().join("engine.json");
        std::fs::write(&json, r#"{"high_water_bytes": 2048, "low_water_bytes": 1024}"#)?;
        let config = EngineConfig::from_file(&json)?;
        assert_eq!(config.high_water_bytes, 2048);
        assert_eq!(config.low_water_bytes, 1024);

        assert!(EngineConfig::from_json("{not json").is_err());
        assert!(EngineConfig::from_file(dir.path().join("missing.json")).is_err());
        Ok(())
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let errors: ValidationErrors = ValidationError::InvalidLimit {
            field: "res_limit".to_string(),
            value: 0,
        }
        .into();
        let error = TilerError::from(errors);
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(!error.is_fatal_for_batch());

        let disk = TilerError::DiskWrite {
            path: "tiles/x.tiff".into(),
            message: "no space left".to_string(),
        };
        assert_eq!(disk.kind(), ErrorKind::DiskWrite);
        assert!(disk.is_fatal_for_batch());
        assert_eq!(TilerError::VariableNotFound("x".into()).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_validation_errors_display_joins_messages() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::InvalidAxisUsage {
            axis: "depth".to_string(),
        });
        errors.push(ValidationError::InvalidLimit {
            field: "filenum_limit".to_string(),
            value: 0,
        });
        let text = errors.to_string();
        assert!(text.contains("depth_start/depth_end"));
        assert!(text.contains("; filenum_limit (0)"));
    }
}

#[cfg(test)]
mod netcdf_tests {
    use super::*;
    use ndarray::{Array1, Array3};

    fn create_ocean_file(path: &Path) -> std::result::Result<(), netcdf::Error> {
        let mut file = netcdf::create(path)?;
        file.add_dimension("time", 2)?;
        file.add_dimension("latitude", 3)?;
        file.add_dimension("longitude", 4)?;

        {
            let mut var = file.add_variable::<f64>("time", &["time"])?;
            var.put_attribute("units", "days since 2020-01-01")?;
            var.put(Array1::from(vec![0.0, 1.0]).view(), ..)?;
        }
        {
            let mut var = file.add_variable::<f64>("latitude", &["latitude"])?;
            var.put_attribute("units", "degrees_north")?;
            var.put(Array1::from(vec![10.0, 0.0, -10.0]).view(), ..)?;
        }
        {
            let mut var = file.add_variable::<f64>("longitude", &["longitude"])?;
            var.put_attribute("units", "degrees_east")?;
            var.put(Array1::from(vec![0.0, 10.0, 20.0, 30.0]).view(), ..)?;
        }
        {
            let mut var = file.add_variable::<f64>("sst", &["time", "latitude", "longitude"])?;
            var.put_attribute("_FillValue", -999.0f64)?;
            var.put_attribute("long_name", "sea surface temperature")?;
            let data = Array3::from_shape_fn((2, 3, 4), |(t, la, lo)| {
                if t == 0 && la == 0 && lo == 0 {
                    -999.0
                } else {
                    (t * 100 + la * 10 + lo) as f64
                }
            });
            var.put(data.view(), ..)?;
        }
        Ok(())
    }

    #[test]
    fn test_netcdf_source_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ocean.nc");
        create_ocean_file(&path)?;

        let source = NetCdfSource::open(&path)?;
        assert_eq!(source.name(), "ocean");
        let info = source.variable("sst")?;
        assert_eq!(info.shape(), vec![2, 3, 4]);
        assert_eq!(info.attributes.fill_value, Some(-999.0));
        assert_eq!(info.attributes.long_name.as_deref(), Some("sea surface temperature"));

        let region = source.read_region("sst", &[1, 1, 2], &[1, 2, 2])?;
        assert_eq!(region.shape(), &[1, 2, 2]);
        assert_eq!(region[[0, 1, 1]], 123.0);

        let dataset = Dataset::new(source)?;
        assert_eq!(dataset.axes.size(CanonicalAxis::Latitude), 3);
        assert!(!dataset.axes.exists(CanonicalAxis::Depth));
        assert_eq!(dataset.time_label(Some(1)), "TIME: 2020-01-02 00:00:00");

        let request = SliceRequest {
            variable: "sst".to_string(),
            longitude: (0, 3),
            latitude: (0, 2),
            time_index: Some(1),
            depth_index: None,
        };
        let slice = extract_2d(&dataset, &request, &FillPolicy::new(-999.0, REPLACE))?;
        assert_eq!(slice.data[[2, 3]], 123.0);
        assert_eq!(slice.latitudes, vec![10.0, 0.0, -10.0]);
        Ok(())
    }

    #[test]
    fn test_netcdf_tiles() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ocean.nc");
        create_ocean_file(&path)?;

        let dataset = Dataset::new(NetCdfSource::open(&path)?)?;
        let engine = TileEngine::new(test_config(dir.path()))?;
        let manifest = engine.generate_content(&dataset, &ContentQuery::new("sst"))?;

        assert!(manifest.complete);
        let tiles: Vec<&TileArtifact> = manifest.tiles().collect();
        assert_eq!(tiles.len(), 2);
        assert_eq!((tiles[0].min_value, tiles[0].max_value), (1.0, 23.0));
        assert_eq!((tiles[1].min_value, tiles[1].max_value), (100.0, 123.0));
        Ok(())
    }

    #[test]
    fn test_same_file_name_in_different_directories() -> Result<()> {
        let dir = tempdir()?;
        let first = dir.path().join("2020").join("ocean.nc");
        let second = dir.path().join("2021").join("ocean.nc");
        for path in [&first, &second] {
            std::fs::create_dir_all(path.parent().unwrap())?;
            create_ocean_file(path)?;
        }

        let a = Dataset::new(NetCdfSource::open(&first)?)?;
        let b = Dataset::new(NetCdfSource::open(&second)?)?;
        assert_eq!(a.name(), b.name());
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), Dataset::new(NetCdfSource::open(&first)?)?.cache_key());
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            NetCdfSource::open("does/not/exist.nc"),
            Err(TilerError::FileNotFound(_))
        ));
    }
}
