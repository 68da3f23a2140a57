//! MU Density Replay CLI
//!
//! Replay a captured host timeline and print the resolved field table.

use std::path::PathBuf;

use clap::Parser;
use mudensity_core::{ReconcileConfig, UnitQuantity};
use mudensity_replay::{
    render_table, rows_json, sort_fields, Capture, Column, Replay, ReplayError, SortOrder, View,
};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// MU Density replay harness
#[derive(Parser, Debug)]
#[command(name = "mudensity-replay")]
#[command(about = "Replay captured comm logs and map geometry through the MU density engine", long_about = None)]
struct Args {
    /// Capture file (JSON) to replay
    capture: PathBuf,

    /// Column to sort by (lat, lng, portals, area, quantity, density)
    #[arg(short, long, default_value = "density")]
    sort: String,

    /// Sort ascending instead of the column's default order
    #[arg(long)]
    ascending: bool,

    /// Sort descending instead of the column's default order
    #[arg(long, conflicts_with = "ascending")]
    descending: bool,

    /// Only show fields around LAT,LNG
    #[arg(long, value_name = "LAT,LNG")]
    near: Option<String>,

    /// H3 rings around --near to include
    #[arg(long, default_value = "1")]
    ring: u32,

    /// Only show fields inside SOUTH,WEST,NORTH,EAST
    #[arg(long, value_name = "S,W,N,E", conflicts_with = "near")]
    bounds: Option<String>,

    /// Window (ms) a field may render before its link
    #[arg(long, default_value = "3000")]
    skew_window_ms: i64,

    /// Refresh passes a link with nothing to wait for survives
    #[arg(long, default_value = "2")]
    stale_after: u32,

    /// Discard quantities of 1 in the parser instead of the engine
    #[arg(long)]
    reject_unit: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output
    #[arg(long)]
    json: bool,
}

fn run(args: &Args) -> Result<(), ReplayError> {
    let column: Column = args.sort.parse()?;
    let order = if args.ascending {
        SortOrder::Ascending
    } else if args.descending {
        SortOrder::Descending
    } else {
        column.default_order()
    };
    let view = match (&args.near, &args.bounds) {
        (Some(center), _) => View::near(center, args.ring)?,
        (None, Some(bounds)) => View::bounds(bounds)?,
        (None, None) => View::All,
    };

    let config = ReconcileConfig {
        skew_window_ms: args.skew_window_ms,
        stale_after_passes: args.stale_after,
        unit_quantity: if args.reject_unit {
            UnitQuantity::RejectAtParse
        } else {
            UnitQuantity::DeferToEngine
        },
        ..Default::default()
    };

    let capture = Capture::load(&args.capture)?;
    let mut replay = Replay::new(config);
    let totals = replay.run(&capture).clone();

    let engine = replay.engine();
    let rows = sort_fields(view.select(engine.registry()), column, order);

    if args.json {
        let summary = serde_json::json!({
            "capture": args.capture.display().to_string(),
            "records": {
                "links": totals.batches.links,
                "fields": totals.batches.fields,
                "noise": totals.batches.noise,
                "malformed": totals.batches.malformed,
                "duplicates": totals.batches.duplicates,
            },
            "passes": totals.passes,
            "stale_dropped": totals.stale_dropped,
            "pending": engine.pending().len(),
            "fields": rows_json(&rows),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            "Replayed {} events: {} link lines, {} field lines, {} passes, {} still pending",
            capture.events.len(),
            totals.batches.links,
            totals.batches.fields,
            totals.passes,
            engine.pending().len()
        );
        print!("{}", render_table(&rows, column));
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
