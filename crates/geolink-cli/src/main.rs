//! Command-line interface for `GeoLink`, a place-name geocoder and spatial join tool.
//!
//! This binary provides a user-friendly CLI to interact with the [`geolink_core`] library:
//! geocode a list or table of place names, join the resulting points against polygon
//! boundaries, and render any of these datasets on an interactive Leaflet map.
//!
//! # Architecture
//!
//! The CLI is built using [`clap`] for argument parsing and [`tracing`] for structured logging.
//! It acts as a thin façade that parses arguments, configures logging, and delegates
//! to command handlers.
//!
//! # Available Commands
//!
//! - `geocode` - Geocode place names from a text or CSV file into a point `GeoJSON`
//! - `join` - Spatially join a point `GeoJSON` against a polygon `GeoJSON`
//! - `render` - Render a `GeoJSON` dataset as a standalone HTML map
//! - `info` - Display dataset information and metadata

mod display;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use geolink_core::io::{self, csv as csv_io, geojson as geojson_io};
use geolink_core::join::spatial_join;
use geolink_core::nominatim::DEFAULT_BASE_URL;
use geolink_core::provider::{JoinPredicate, MapRenderer};
use geolink_core::render::{DEFAULT_ZOOM, LeafletRenderer, MapOptions, ToMapFeatures};
use geolink_core::resolver::{DEFAULT_USER_AGENT, LocationResolver, ResolverConfig};
use geolink_core::types::LocationInput;

#[derive(Parser)]
#[command(
    name = "geolink",
    version,
    about = "Geocode place names, join them to polygons, and map the result",
    long_about = "GeoLink geocodes free-text place names through Nominatim, relates the points\n\
                  to polygon boundaries with a spatial join, and renders interactive Leaflet maps."
)]
/// Command-line arguments and options for the `GeoLink` CLI.
///
/// This struct defines the top-level CLI interface, including global flags for
/// logging verbosity and the subcommand to execute.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `GeoLink` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Geocodes place names into a point `GeoJSON` dataset.
    ///
    /// A `.txt` input holds one place name per line. A `.csv` input is a table and
    /// needs `--column` to name the location field.
    Geocode {
        /// Path to the input `.txt` or `.csv` file.
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Column holding the place names (CSV input only).
        #[arg(short, long, value_name = "NAME")]
        column: Option<String>,

        /// ISO 3166-1 alpha-2 country code(s) restricting the search, comma separated.
        #[arg(long, value_name = "CC")]
        country: String,

        /// Client identifier sent to the geocoding service.
        #[arg(long, default_value = DEFAULT_USER_AGENT)]
        user_agent: String,

        /// Per-request timeout in seconds.
        #[arg(long, default_value_t = 10, value_name = "SECONDS")]
        timeout: u64,

        /// Base URL of the Nominatim service.
        #[arg(long, default_value = DEFAULT_BASE_URL, value_name = "URL")]
        base_url: String,

        /// Keep only the best candidate for each place name.
        #[arg(long)]
        exactly_one: bool,

        /// Path for the output `GeoJSON` dataset.
        #[arg(short, long, value_name = "DATASET")]
        output: PathBuf,
    },

    /// Joins points to the polygons that contain them.
    ///
    /// Every point keeps at least one row; points inside several polygons get one row
    /// per polygon. Points without coordinates are dropped.
    Join {
        /// Path to the point `GeoJSON` dataset (as written by `geocode`).
        #[arg(long, value_name = "DATASET")]
        points: PathBuf,

        /// Path to the polygon dataset (`GeoJSON`, or a `.shp` shapefile).
        #[arg(long, value_name = "DATASET")]
        polygons: PathBuf,

        /// Path for the output `GeoJSON` dataset.
        #[arg(short, long, value_name = "DATASET")]
        output: PathBuf,
    },

    /// Renders a `GeoJSON` dataset as a standalone HTML map.
    Render {
        /// Path to the input `GeoJSON` dataset.
        #[arg(short, long, value_name = "DATASET")]
        input: PathBuf,

        /// Show only this property in popups.
        #[arg(long, value_name = "FIELD")]
        popup: Option<String>,

        /// Map center as `lat,lon`; defaults to the mean of the points.
        #[arg(long, value_name = "LAT,LON", value_parser = parse_center, allow_hyphen_values = true)]
        center: Option<(f64, f64)>,

        /// Initial zoom level.
        #[arg(long, default_value_t = DEFAULT_ZOOM)]
        zoom: u8,

        /// Page title.
        #[arg(long)]
        title: Option<String>,

        /// Path for the output HTML file.
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Displays information about a `GeoJSON` dataset.
    ///
    /// Shows the feature count, CRS, geometry kinds and the property fields.
    Info {
        /// Path to the input `GeoJSON` dataset.
        #[arg(value_name = "DATASET")]
        input: PathBuf,
    },
}

/// Entry point for the `GeoLink` command-line interface.
///
/// This function parses command-line arguments, configures the logging system based on
/// verbosity flags, and dispatches to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if command execution fails or if the logging system cannot be initialized.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity flags
    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true) // Show module paths for better context
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Geocode {
            input,
            column,
            country,
            user_agent,
            timeout,
            base_url,
            exactly_one,
            output,
        } => {
            info!("Geocoding {} to {}", input.display(), output.display());
            let config = ResolverConfig::new(&country)
                .with_user_agent(user_agent)
                .with_timeout(Duration::from_secs(timeout))
                .with_base_url(base_url);
            handle_geocode(&input, column.as_deref(), config, exactly_one, &output).await?;
        },
        Commands::Join {
            points,
            polygons,
            output,
        } => {
            info!(
                "Joining {} with {} to {}",
                points.display(),
                polygons.display(),
                output.display()
            );
            handle_join(&points, &polygons, &output)?;
        },
        Commands::Render {
            input,
            popup,
            center,
            zoom,
            title,
            output,
        } => {
            info!("Rendering {} to {}", input.display(), output.display());
            let mut options = MapOptions {
                popup_field: popup,
                center,
                zoom,
                ..MapOptions::default()
            };
            if let Some(title) = title {
                options.title = title;
            }
            handle_render(&input, &options, &output)?;
        },
        Commands::Info { input } => {
            info!("Displaying info for {}", input.display());
            handle_info(&input)?;
        },
    }

    Ok(())
}

/// Read the place names to geocode: one per line for text files, a table for CSV.
fn read_locations(input: &Path, column: Option<&str>) -> Result<LocationInput> {
    let is_csv = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        let column =
            column.ok_or_else(|| anyhow!("CSV input needs --column to name the location field"))?;
        let records = csv_io::read_csv_records(input, Some(column))?;
        debug!("Read {} record(s) from {}", records.len(), input.display());
        Ok(LocationInput::Table(records))
    } else {
        if column.is_some() {
            bail!("--column only applies to CSV input");
        }
        Ok(LocationInput::List(csv_io::read_location_lines(input)?))
    }
}

async fn handle_geocode(
    input: &Path,
    column: Option<&str>,
    config: ResolverConfig,
    exactly_one: bool,
    output: &Path,
) -> Result<()> {
    let locations = read_locations(input, column)?;
    let resolver = LocationResolver::new(config)?;

    let points = resolver
        .geocode_locations(locations, column, exactly_one)
        .await?;
    geojson_io::write_point_dataset(output, &points)?;

    display::display_geocode_summary(&points);
    info!("Geocoding complete.");
    Ok(())
}

fn handle_join(points: &Path, polygons: &Path, output: &Path) -> Result<()> {
    let points = geojson_io::read_geojson(points)?.into_point_dataset();
    let polygons = io::load_polygon_dataset(polygons)?;

    let joined = spatial_join(&points, &polygons, JoinPredicate::Within)?;
    geojson_io::write_joined_dataset(output, &joined)?;

    display::display_join_summary(&joined);
    info!("Join complete.");
    Ok(())
}

fn handle_render(input: &Path, options: &MapOptions, output: &Path) -> Result<()> {
    let table = geojson_io::read_geojson(input)?;
    let features = table.to_map_features()?;
    debug!("Drawing {} map feature(s)", features.len());

    let map = LeafletRenderer.render(&features, options)?;
    map.save(output)
        .with_context(|| format!("Failed to write map to {}", output.display()))?;

    println!(
        "Map written to {} ({} marker(s), {} shape(s))",
        output.display(),
        map.markers.len(),
        map.shapes.len()
    );
    Ok(())
}

fn handle_info(input: &Path) -> Result<()> {
    let table = geojson_io::read_geojson(input)?;
    let info = display::summarize(&input.display().to_string(), &table);
    display::display_dataset_info(&info);
    Ok(())
}

/// Parse a `lat,lon` pair.
fn parse_center(value: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got '{value}'"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("invalid latitude '{lat}': {e}"))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|e| format!("invalid longitude '{lon}': {e}"))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("center '{value}' is out of range"));
    }
    Ok((lat, lon))
}
