use anyhow::{Context, Result};
use clap::Parser;
use mapred::RuntimePipeline;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use trip_congestion::context::{ContextPaths, RoutingContext};
use trip_congestion::counters::MapCounters;
use trip_congestion::key::DaypartPolicy;
use trip_congestion::pipeline::{RatioCombiner, RatioReducer, TripRatioMapper};
use trip_congestion::resolve::ContextResolver;

/// Aggregates raw trip records into per-street congestion indices.
#[derive(Parser, Debug)]
struct Args {
    /// Input directory of trip CSV files
    #[arg(long)]
    input: String,
    /// Output directory
    #[arg(long)]
    output: String,
    /// Road graph edge list (CSV: from,to,minutes)
    #[arg(long)]
    edges: PathBuf,
    /// Node coordinates (CSV: id,lat,lon)
    #[arg(long)]
    nodes: PathBuf,
    /// Date window bounds (headerless CSV row: start,end)
    #[arg(long)]
    date_filter: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let paths = ContextPaths {
        edges: args.edges,
        nodes: args.nodes,
        date_filter: args.date_filter,
    };
    let ctx = Arc::new(RoutingContext::load(&paths).context("routing context unavailable")?);
    let counters = Arc::new(MapCounters::default());
    let mapper = TripRatioMapper::new(
        ContextResolver::new(Arc::clone(&ctx)),
        DaypartPolicy,
        ctx.window.clone(),
        Arc::clone(&counters),
    );

    let mut pipeline = RuntimePipeline::new();
    pipeline.add_input(&args.input);
    pipeline.add_output(&args.output);
    pipeline.map_combine_reduce(mapper, RatioCombiner, RatioReducer)?;

    let snap = counters.snapshot();
    info!(
        records_seen = snap.records_seen,
        header_rows = snap.header_rows,
        trips_emitted = snap.trips_emitted,
        pairs_emitted = snap.pairs_emitted,
        dropped_malformed = snap.dropped_malformed,
        dropped_out_of_window = snap.dropped_out_of_window,
        dropped_no_route = snap.dropped_no_route,
        dropped_degenerate_route = snap.dropped_degenerate_route,
        "map stage record outcomes"
    );
    Ok(())
}
