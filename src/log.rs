use crate::axis::CanonicalAxis;
use crate::cache::EvictionReport;
use crate::dataset::Dataset;
use crate::query::{ContentQuery, EntryContent, Manifest};
use crate::series::PointQuery;
use crate::source::DataSource;
use std::time::Duration;

/// Initializes `env_logger`. `RUST_LOG` wins when set; otherwise `--verbose`
/// selects debug, `--quiet` selects error and the default is info.
pub fn init_logging(verbose: bool, quiet: bool) {
    let mut builder = if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env()
    } else {
        let level = if verbose {
            log::LevelFilter::Debug
        } else if quiet {
            log::LevelFilter::Error
        } else {
            log::LevelFilter::Info
        };
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level);
        builder
    };
    builder.format_timestamp_millis();
    // A second initialization (tests, embedding) is not an error.
    let _ = builder.try_init();
}

pub fn show_greeting(dataset_path: &str) {
    println!("=== NetCDF Raster Tiler ===");
    println!("Dataset: {}", dataset_path);
}

fn bound(start: Option<i64>, end: Option<i64>) -> String {
    let side = |v: Option<i64>| v.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string());
    format!("[{}, {}]", side(start), side(end))
}

pub fn query_echo(query: &ContentQuery) {
    println!("\nContent request:");
    println!("  Channel: {}", query.channel);
    println!("  Datetime: {}", bound(query.datetime_start, query.datetime_end));
    println!("  Depth: {}", bound(query.depth_start, query.depth_end));
    println!("  Longitude: {}", bound(query.longitude_start, query.longitude_end));
    println!("  Latitude: {}", bound(query.latitude_start, query.latitude_end));
    if let Some(limit) = query.res_limit {
        println!("  Pixel limit: {}", limit);
    }
    if let Some(limit) = query.filenum_limit {
        println!("  File limit: {}", limit);
    }
    println!("  Return type: {:?}", query.return_type);
}

pub fn point_query_echo(query: &PointQuery) {
    println!("\nPoint request:");
    println!("  Channel: {}", query.channel);
    for (i, p) in query.points.iter().enumerate() {
        match p.depth {
            Some(d) => println!("    Point {}: lat={} lon={} depth={}", i + 1, p.latitude, p.longitude, d),
            None => println!("    Point {}: lat={} lon={}", i + 1, p.latitude, p.longitude),
        }
    }
}

pub fn show_dataset_info<S: DataSource>(dataset: &Dataset<S>) {
    println!("\nAxes:");
    for axis in CanonicalAxis::ALL {
        match dataset.axes.get(axis) {
            Some(a) => println!("  {}: '{}' ({})", axis, a.source_name, a.size),
            None => println!("  {}: -", axis),
        }
    }
}

pub fn show_eviction(report: &EvictionReport) {
    if report.triggered {
        println!(
            "Cache eviction: {} files removed, {} bytes freed",
            report.evicted.len(),
            report.freed_bytes()
        );
    }
}

pub fn show_manifest_summary(manifest: &Manifest) {
    println!("\nResults ({} x {} grid):", manifest.grid.time, manifest.grid.depth);
    for entry in &manifest.entries {
        let cell = format!("dt={:?} dp={:?}", entry.time_index, entry.depth_index);
        match &entry.content {
            EntryContent::Tile(t) => println!(
                "  {} -> {} ({} bytes, min={:.4}, max={:.4}{})",
                cell,
                t.file_name,
                t.size,
                t.min_value,
                t.max_value,
                if t.cached { ", cached" } else { "" }
            ),
            EntryContent::Array(a) => println!(
                "  {} -> {}x{} grid (min={:.4}, max={:.4})",
                cell,
                a.longitudes.len(),
                a.latitudes.len(),
                a.min_value,
                a.max_value
            ),
            EntryContent::Error { kind, message } => {
                println!("  {} -> error [{:?}]: {}", cell, kind, message)
            }
        }
    }
    if let Some(report) = &manifest.eviction {
        show_eviction(report);
    }
    if !manifest.complete {
        println!("  Batch stopped early, results are partial");
    }
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!("\n=== Completed in {:.2}s ===", elapsed.as_secs_f64());
}
