//! Command-line interface for the traffic pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::ClusteringConfig;
use crate::core::feeds::feed_from_config;
use crate::core::writers::{write_labels_csv, write_summary_csv};
use crate::processors::report::ReportAggregator;
use crate::views::{self, FeedStatus, HeatRequest};
use crate::visualization::{self, GeoJsonRenderer, PngMapRenderer};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "traffic-heat")]
#[command(about = "Traffic reports, incident maps and incident heat analysis", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MapFormat {
    Png,
    Geojson,
}

#[derive(Subcommand)]
enum Commands {
    /// Show intersection and congestion speed reports
    Report {
        /// Sources to load (defaults to all configured sources)
        #[arg(short, long)]
        source: Vec<String>,
        /// Write a bar chart PNG per present source into this directory
        #[arg(long)]
        plot_dir: Option<PathBuf>,
    },

    /// Render the latest incidents as map markers
    Map {
        /// Incident feed file
        #[arg(short, long)]
        feed: PathBuf,
        /// Output file (GeoJSON goes to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = MapFormat::Png)]
        format: MapFormat,
    },

    /// Cluster incidents with DBSCAN and render a heat map
    Heat {
        /// Incident feed file
        #[arg(short, long)]
        feed: PathBuf,
        /// Neighborhood radius
        #[arg(long)]
        eps: Option<f64>,
        /// Minimum neighborhood size for a core point
        #[arg(long)]
        min_samples: Option<usize>,
        /// Heat point radius in pixels
        #[arg(long)]
        radius: Option<u32>,
        /// Output file (GeoJSON goes to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = MapFormat::Png)]
        format: MapFormat,
        /// Also write per-incident cluster labels to this CSV
        #[arg(long)]
        labels_csv: Option<PathBuf>,
        /// Also write per-cluster summaries to this CSV
        #[arg(long)]
        summary_csv: Option<PathBuf>,
    },

    /// Write the effective configuration as YAML
    InitConfig {
        /// Destination file
        path: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Where a command's summary box is printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SummaryStream {
    Stdout,
    Stderr,
}

/// Write a summary box
fn write_summary<W: Write>(out: &mut W, title: &str, items: &[(&str, String)]) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "╔══════════════════════════════════════════════════════════════╗")?;
    writeln!(out, "║ {:<60} ║", title)?;
    writeln!(out, "╠══════════════════════════════════════════════════════════════╣")?;
    for (key, value) in items {
        let display_value = if value.chars().count() > 37 {
            format!("{}...", value.chars().take(34).collect::<String>())
        } else {
            value.clone()
        };
        writeln!(out, "║ {:<20}: {:<37} ║", key, display_value)?;
    }
    writeln!(out, "╚══════════════════════════════════════════════════════════════╝")?;
    writeln!(out)
}

/// Print a summary box
fn print_summary(stream: SummaryStream, title: &str, items: &[(&str, String)]) {
    let result = match stream {
        SummaryStream::Stdout => write_summary(&mut io::stdout().lock(), title, items),
        SummaryStream::Stderr => write_summary(&mut io::stderr().lock(), title, items),
    };
    if let Err(e) = result {
        warn!("Failed to print summary: {}", e);
    }
}

fn feed_status_line(status: &FeedStatus) -> String {
    match status {
        FeedStatus::Fetched => "ok".to_string(),
        FeedStatus::Unavailable(reason) => format!("unavailable ({})", reason),
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Logging must be up before the config is read
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    let result = match cli.command {
        Commands::Report { source, plot_dir } => cmd_report(&source, plot_dir.as_deref(), &config),
        Commands::Map { feed, output, format } => cmd_map(&feed, output, format, &config),
        Commands::Heat {
            feed,
            eps,
            min_samples,
            radius,
            output,
            format,
            labels_csv,
            summary_csv,
        } => {
            let clustering = ClusteringConfig {
                eps: eps.unwrap_or(config.clustering.eps),
                min_samples: min_samples.unwrap_or(config.clustering.min_samples),
            };
            let mut request = HeatRequest::new(&clustering, &config.map);
            if let Some(radius) = radius {
                request.radius = radius;
            }
            cmd_heat(
                &feed,
                &request,
                output,
                format,
                labels_csv.as_deref(),
                summary_csv.as_deref(),
                &config,
            )
        }
        Commands::InitConfig { path } => cmd_init_config(&path, &config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn cmd_report(sources: &[String], plot_dir: Option<&Path>, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let aggregator = ReportAggregator::new(&config.report);

    let ids: Vec<String> = if sources.is_empty() {
        aggregator.source_ids().map(str::to_string).collect()
    } else {
        sources.to_vec()
    };

    let mut items: Vec<(&str, String)> = Vec::new();

    for id in &ids {
        let snapshot = aggregator
            .load_snapshot(id)
            .with_context(|| format!("Failed to load report source '{}'", id))?;

        if !snapshot.present {
            println!("{}: no data", snapshot.title);
            items.push(("Absent", id.clone()));
            continue;
        }

        println!("{}", snapshot.title);
        println!("{}", snapshot.sample_headers.join(","));
        for row in &snapshot.sample_rows {
            println!("{}", row.join(","));
        }

        if let Some(dir) = plot_dir.filter(|_| !snapshot.series.is_empty()) {
            let png = dir.join(format!("{}.png", snapshot.source_id));
            visualization::plot_time_series(
                &png,
                &snapshot,
                config.map.image_width,
                config.map.image_height,
            )
            .with_context(|| format!("Failed to plot {}", png.display()))?;
            info!("chart -> {}", png.display());
        } else if plot_dir.is_some() {
            warn!("{}: no numeric rows to plot", id);
        }

        items.push(("Present", format!("{} ({} points)", id, snapshot.series.len())));
    }

    items.push(("Duration", format!("{:.2?}", start.elapsed())));
    print_summary(SummaryStream::Stdout, "Traffic Report", &items);

    Ok(())
}

/// Write a GeoJSON artifact to `output`, or stdout when there is none.
fn emit_geojson(geojson: Option<String>, output: Option<&Path>) -> Result<String> {
    match (geojson, output) {
        (Some(text), Some(path)) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(path.display().to_string())
        }
        (Some(text), None) => {
            println!("{}", text);
            Ok("stdout".to_string())
        }
        (None, _) => Ok("none (no incidents)".to_string()),
    }
}

/// What a renderer produced, before it is reported.
enum MapArtifact {
    Png(Option<PathBuf>),
    GeoJson(Option<String>),
}

impl MapArtifact {
    /// Stdout belongs to the GeoJSON document when one is printed there.
    fn summary_stream(&self, output: Option<&Path>) -> SummaryStream {
        match (self, output) {
            (MapArtifact::GeoJson(Some(_)), None) => SummaryStream::Stderr,
            _ => SummaryStream::Stdout,
        }
    }

    /// Emit the artifact and describe where it went.
    fn deliver(self, output: Option<&Path>) -> Result<String> {
        match self {
            MapArtifact::Png(Some(path)) => Ok(path.display().to_string()),
            MapArtifact::Png(None) => Ok("none (no incidents)".to_string()),
            MapArtifact::GeoJson(text) => emit_geojson(text, output),
        }
    }
}

fn png_renderer(output: Option<PathBuf>, default_name: &str, config: &PipelineConfig) -> PngMapRenderer {
    let path = output.unwrap_or_else(|| PathBuf::from(default_name));
    PngMapRenderer::new(path, config.map.image_width, config.map.image_height)
}

fn cmd_map(
    feed_path: &Path,
    output: Option<PathBuf>,
    format: MapFormat,
    config: &PipelineConfig,
) -> Result<()> {
    let start = Instant::now();
    let feed = feed_from_config(feed_path, &config.feed);
    info!("Fetching incidents from {}", feed.describe());

    let spinner = create_spinner("Building incident map...");
    let rendered = match format {
        MapFormat::Png => {
            let renderer = png_renderer(output.clone(), "incident_map.png", config);
            views::incident_map(feed.as_ref(), &renderer, &config.map).map(|v| {
                (v.feed_status, v.incidents.len(), v.markers.len(), MapArtifact::Png(v.map))
            })
        }
        MapFormat::Geojson => views::incident_map(feed.as_ref(), &GeoJsonRenderer, &config.map)
            .map(|v| {
                (v.feed_status, v.incidents.len(), v.markers.len(), MapArtifact::GeoJson(v.map))
            }),
    };
    spinner.finish_and_clear();

    let (status, incidents, markers, artifact) =
        rendered.context("Failed to build incident map")?;
    let stream = artifact.summary_stream(output.as_deref());
    let target = artifact.deliver(output.as_deref())?;

    print_summary(
        stream,
        "Incident Map",
        &[
            ("Feed", feed_status_line(&status)),
            ("Incidents", incidents.to_string()),
            ("Markers", markers.to_string()),
            ("Output", target),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    Ok(())
}

fn cmd_heat(
    feed_path: &Path,
    request: &HeatRequest,
    output: Option<PathBuf>,
    format: MapFormat,
    labels_csv: Option<&Path>,
    summary_csv: Option<&Path>,
    config: &PipelineConfig,
) -> Result<()> {
    let start = Instant::now();
    let feed = feed_from_config(feed_path, &config.feed);
    info!(
        "Heat analysis of {} (eps={}, min_samples={}, radius={})",
        feed.describe(),
        request.eps,
        request.min_samples,
        request.radius
    );

    let spinner = create_spinner("Clustering incidents...");
    let analysed = match format {
        MapFormat::Png => {
            let renderer = png_renderer(output.clone(), "incident_heat.png", config);
            views::heat_analysis(feed.as_ref(), &renderer, request, &config.map)
                .map(|v| split_heat_view(v, MapArtifact::Png))
        }
        MapFormat::Geojson => {
            views::heat_analysis(feed.as_ref(), &GeoJsonRenderer, request, &config.map)
                .map(|v| split_heat_view(v, MapArtifact::GeoJson))
        }
    };
    spinner.finish_and_clear();

    let (view, artifact) = analysed.context("Heat analysis failed")?;
    let stream = artifact.summary_stream(output.as_deref());
    let target = artifact.deliver(output.as_deref())?;

    if let Some(path) = labels_csv {
        write_labels_csv(path, &view.incidents, &view.assignment)
            .with_context(|| format!("Failed to write labels to {}", path.display()))?;
        info!("labels -> {}", path.display());
    }
    if let Some(path) = summary_csv {
        write_summary_csv(path, &view.summaries)
            .with_context(|| format!("Failed to write summaries to {}", path.display()))?;
        info!("summaries -> {}", path.display());
    }

    print_summary(
        stream,
        "Incident Heat Map",
        &[
            ("Feed", feed_status_line(&view.feed_status)),
            ("Incidents", view.incidents.len().to_string()),
            ("Clusters", view.assignment.cluster_count().to_string()),
            ("Noise", view.assignment.noise_count().to_string()),
            ("Heat points", view.heat_points.len().to_string()),
            ("Output", target),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    Ok(())
}

/// Detach the rendered artifact so both output formats share one reporting path.
fn split_heat_view<A>(
    view: views::HeatView<A>,
    wrap: impl FnOnce(Option<A>) -> MapArtifact,
) -> (views::HeatView<()>, MapArtifact) {
    let views::HeatView {
        feed_status,
        request,
        incidents,
        assignment,
        summaries,
        center,
        heat_points,
        map,
    } = view;
    let detached = views::HeatView {
        feed_status,
        request,
        incidents,
        assignment,
        summaries,
        center,
        heat_points,
        map: None,
    };
    (detached, wrap(map))
}

fn cmd_init_config(path: &Path, config: &PipelineConfig) -> Result<()> {
    config
        .to_yaml(path)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    println!("Config written to {}", path.display());
    Ok(())
}
