use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error};
use nctiles::cli::{Cli, Commands, OutputFormat, QueryArgs};
use nctiles::info::{
    describe_dataset, generate_preview, generate_previews, print_dataset_info_csv,
    print_dataset_info_human, print_dataset_info_json, print_dataset_info_yaml,
};
use nctiles::log::{
    init_logging, point_query_echo, query_echo, show_dataset_info, show_eviction,
    show_farewell_with_timing, show_greeting, show_manifest_summary,
};
use nctiles::query::EntryContent;
use nctiles::series::{PointQuery, PointSeries, query_points};
use nctiles::{ContentQuery, Dataset, EngineConfig, Manifest, NetCdfSource, TileEngine};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Instant;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let start_time = Instant::now();
    let human = cli.output_format == OutputFormat::Human && !cli.quiet;

    match &cli.command {
        Commands::Completions { shell, output } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            match output {
                Some(path) => {
                    let mut file = File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    generate(*shell, &mut cmd, name, &mut file);
                }
                None => generate(*shell, &mut cmd, name, &mut io::stdout()),
            }
            return Ok(());
        }
        Commands::Info { dataset, format } => {
            let dataset = open_dataset(dataset)?;
            let meta = describe_dataset(&dataset)?;
            match format.clone().unwrap_or_else(|| cli.output_format.clone()) {
                OutputFormat::Human => print_dataset_info_human(&meta),
                OutputFormat::Json => print_dataset_info_json(&meta)?,
                OutputFormat::Yaml => print_dataset_info_yaml(&meta)?,
                OutputFormat::Csv => print_dataset_info_csv(&meta)?,
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_engine_config(&cli)?;
    debug!("Engine configuration: {:?}", config);

    match cli.command {
        Commands::Tiles {
            ref dataset,
            ref query,
            ref args,
            no_progress,
        } => {
            let query = load_query(query.as_deref(), args)?;
            if human {
                show_greeting(&dataset.display().to_string());
                query_echo(&query);
            }
            let dataset = open_dataset(dataset)?;
            if human {
                show_dataset_info(&dataset);
            }
            let engine = TileEngine::new(config)?;

            let progress = (human && !no_progress).then(|| {
                let bar = ProgressBar::new(0);
                bar.set_style(
                    ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} cells")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            });
            let manifest = engine.generate_content_with_progress(&dataset, &query, |done, total| {
                if let Some(bar) = &progress {
                    bar.set_length(total as u64);
                    bar.set_position(done as u64);
                }
            })?;
            if let Some(bar) = progress {
                bar.finish_and_clear();
            }

            print_manifest(&manifest, &cli.output_format)?;
            if !manifest.complete {
                anyhow::bail!("Batch stopped early, {} cells produced", manifest.entries.len());
            }
        }
        Commands::Point {
            ref dataset,
            ref channel,
            ref points,
        } => {
            let query = PointQuery {
                channel: channel.clone(),
                points: points.clone(),
            };
            if human {
                show_greeting(&dataset.display().to_string());
                point_query_echo(&query);
            }
            let dataset = open_dataset(dataset)?;
            let series = query_points(&dataset, &query, config.default_fill_value)?;
            print_series(&series, &cli.output_format)?;
        }
        Commands::Preview {
            ref dataset,
            ref channel,
        } => {
            config.validate()?;
            let dataset = open_dataset(dataset)?;
            let builder = config.preview_builder();
            let previews = match channel {
                Some(channel) => vec![generate_preview(&dataset, channel, &builder, &config)?],
                None => generate_previews(&dataset, &builder, &config)?,
            };
            print_structured(&previews, &cli.output_format, || {
                for p in &previews {
                    println!("{} ({}x{}, {} bytes)", p.path.display(), p.width, p.height, p.size);
                }
            })?;
        }
        Commands::Evict { status } => {
            config.validate()?;
            let cache = config.cache_manager();
            if status {
                let usage = cache.usage()?;
                println!(
                    "{}: {} bytes (high-water {}, low-water {})",
                    cache.dir().display(),
                    usage,
                    cache.high_water_bytes(),
                    cache.low_water_bytes()
                );
            } else {
                let report = cache.ensure_capacity();
                print_structured(&report, &cli.output_format, || {
                    if report.triggered {
                        show_eviction(&report);
                    } else {
                        println!("Cache at {} bytes, nothing to evict", report.bytes_before);
                    }
                })?;
            }
        }
        Commands::Completions { .. } | Commands::Info { .. } => {}
    }

    if human {
        show_farewell_with_timing(start_time.elapsed());
    }
    Ok(())
}

/// Defaults, then the config file, then environment, then command line flags.
fn load_engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid NCTILES_ environment variable")?;
    cli.engine.apply_to(&mut config);
    Ok(config)
}

fn load_query(path: Option<&Path>, args: &QueryArgs) -> Result<ContentQuery> {
    let mut query = match path {
        Some(path) => ContentQuery::from_file(path)
            .with_context(|| format!("Failed to load query from {}", path.display()))?,
        None => ContentQuery::default(),
    };
    args.apply_to(&mut query);
    if query.channel.is_empty() {
        anyhow::bail!("No channel given, use -n/--channel or a query file");
    }
    Ok(query)
}

fn open_dataset(path: &Path) -> Result<Dataset<NetCdfSource>> {
    let source = NetCdfSource::open(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))?;
    Ok(Dataset::new(source)?)
}

fn print_structured<T: Serialize>(
    value: &T,
    format: &OutputFormat,
    human: impl FnOnce(),
) -> Result<()> {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?
        ),
        OutputFormat::Yaml => println!(
            "{}",
            serde_yaml::to_string(value).context("Failed to serialize to YAML")?
        ),
        OutputFormat::Human | OutputFormat::Csv => human(),
    }
    Ok(())
}

fn print_manifest(manifest: &Manifest, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => {
            println!("time_index,depth_index,status,file,min,max");
            for entry in &manifest.entries {
                let cell = |v: Option<usize>| v.map(|v| v.to_string()).unwrap_or_default();
                let (status, file, min, max) = match &entry.content {
                    EntryContent::Tile(t) => (
                        "tile",
                        t.path.display().to_string(),
                        t.min_value.to_string(),
                        t.max_value.to_string(),
                    ),
                    EntryContent::Array(a) => (
                        "array",
                        String::new(),
                        a.min_value.to_string(),
                        a.max_value.to_string(),
                    ),
                    EntryContent::Error { message, .. } => {
                        ("error", message.replace(',', ";"), String::new(), String::new())
                    }
                };
                println!(
                    "{},{},{},{},{},{}",
                    cell(entry.time_index),
                    cell(entry.depth_index),
                    status,
                    file,
                    min,
                    max
                );
            }
            Ok(())
        }
        other => print_structured(manifest, other, || show_manifest_summary(manifest)),
    }
}

fn print_series(series: &[PointSeries], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => {
            println!("point,latitude,longitude,step,time,value");
            for (i, s) in series.iter().enumerate() {
                for (step, value) in s.values.iter().enumerate() {
                    let time = s
                        .times
                        .as_ref()
                        .and_then(|t| t.get(step).cloned())
                        .unwrap_or_default();
                    println!(
                        "{},{},{},{},{},{}",
                        i, s.grid_latitude, s.grid_longitude, step, time, value
                    );
                }
            }
            Ok(())
        }
        other => print_structured(&series, other, || {
            for s in series {
                println!(
                    "\n({}, {}) -> grid ({}, {}), {} steps",
                    s.point.latitude,
                    s.point.longitude,
                    s.grid_latitude,
                    s.grid_longitude,
                    s.values.len()
                );
                for (step, value) in s.values.iter().enumerate() {
                    match s.times.as_ref().and_then(|t| t.get(step)) {
                        Some(time) => println!("  {}  {}", time, value),
                        None => println!("  [{}]  {}", step, value),
                    }
                }
            }
        }),
    }
}
