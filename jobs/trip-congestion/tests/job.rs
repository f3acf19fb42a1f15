use anyhow::Result;
use mapred::RuntimePipeline;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trip_congestion::context::{ContextPaths, RoutingContext};
use trip_congestion::counters::MapCounters;
use trip_congestion::key::DaypartPolicy;
use trip_congestion::pipeline::{RatioCombiner, RatioReducer, TripRatioMapper};
use trip_congestion::resolve::ContextResolver;

fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("trip-congestion-{}-{}", tag, std::process::id()))
}

fn write_context_files(dir: &Path) -> ContextPaths {
    let edges = dir.join("edges.csv");
    let nodes = dir.join("nodes.csv");
    let dates = dir.join("dates.csv");
    fs::write(&edges, "from,to,minutes\n100,200,5.0\n200,100,5.0\n").unwrap();
    fs::write(
        &nodes,
        "id,lat,lon\n100,40.700,-74.000\n200,40.710,-74.010\n",
    )
    .unwrap();
    fs::write(&dates, "2020-01-01 00:00:00,2020-06-30 23:59:59\n").unwrap();
    ContextPaths {
        edges,
        nodes,
        date_filter: dates,
    }
}

fn trip_line(pickup_at: &str, dropoff_at: &str, pickup: (f64, f64), dropoff: (f64, f64)) -> String {
    let mut cols = vec!["0".to_string(); 15];
    cols[1] = dropoff_at.to_string();
    cols[2] = dropoff.0.to_string();
    cols[3] = dropoff.1.to_string();
    cols[12] = pickup_at.to_string();
    cols[13] = pickup.0.to_string();
    cols[14] = pickup.1.to_string();
    cols.join(",")
}

fn read_output_lines(output_dir: &Path) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        for line in fs::read_to_string(&path)?.lines() {
            lines.push(line.to_string());
        }
    }
    lines.sort();
    Ok(lines)
}

#[test]
fn test_job_end_to_end() -> Result<()> {
    let root = scratch_dir("e2e");
    let _ = fs::remove_dir_all(&root);
    let input_dir = root.join("input");
    let output_dir = root.join("output");
    fs::create_dir_all(&input_dir)?;
    let paths = write_context_files(&root);

    let near_100 = (40.7001, -74.0001);
    let near_200 = (40.7099, -74.0099);
    let mut header = vec!["0"; 15];
    header[2] = "dropoff_latitude";
    let lines = [
        header.join(","),
        // 10 actual minutes over 5 ideal: ratio 2.0, morning.
        trip_line(
            "2020-01-05 08:00:00",
            "2020-01-05 08:10:00",
            near_100,
            near_200,
        ),
        // Opposite direction, 15 actual over 5 ideal: ratio 3.0, same key.
        trip_line(
            "2020-01-05 08:05:00",
            "2020-01-05 08:20:00",
            near_200,
            near_100,
        ),
        // Afternoon bucket, ratio 2.0.
        trip_line(
            "2020-01-05 13:00:00",
            "2020-01-05 13:10:00",
            near_100,
            near_200,
        ),
        // July pickup falls outside the configured window.
        trip_line(
            "2020-07-04 08:00:00",
            "2020-07-04 08:10:00",
            near_100,
            near_200,
        ),
        "garbage,row".to_string(),
    ];
    fs::write(input_dir.join("trips.csv"), lines.join("\n"))?;

    let ctx = Arc::new(RoutingContext::load(&paths)?);
    let counters = Arc::new(MapCounters::default());
    let mapper = TripRatioMapper::new(
        ContextResolver::new(Arc::clone(&ctx)),
        DaypartPolicy,
        ctx.window.clone(),
        Arc::clone(&counters),
    );

    let mut pipeline = RuntimePipeline::new();
    pipeline.add_input(input_dir.to_string_lossy());
    pipeline.add_output(output_dir.to_string_lossy());
    pipeline.map_combine_reduce(mapper, RatioCombiner, RatioReducer)?;

    let output = read_output_lines(&output_dir)?;
    assert_eq!(
        output,
        vec![
            "\"y2020, 100, 200, afternoon\"\t2.000".to_string(),
            "\"y2020, 100, 200, morning\"\t2.500".to_string(),
        ]
    );

    let snap = counters.snapshot();
    assert_eq!(snap.records_seen, 6);
    assert_eq!(snap.header_rows, 1);
    assert_eq!(snap.trips_emitted, 3);
    assert_eq!(snap.pairs_emitted, 3);
    assert_eq!(snap.dropped_malformed, 1);
    assert_eq!(snap.dropped_out_of_window, 1);

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn test_job_output_is_identical_without_combiner() -> Result<()> {
    let root = scratch_dir("no-combine");
    let _ = fs::remove_dir_all(&root);
    let input_dir = root.join("input");
    fs::create_dir_all(&input_dir)?;
    let paths = write_context_files(&root);

    let near_100 = (40.7001, -74.0001);
    let near_200 = (40.7099, -74.0099);
    let lines = [
        trip_line(
            "2020-01-05 08:00:00",
            "2020-01-05 08:10:00",
            near_100,
            near_200,
        ),
        trip_line(
            "2020-01-05 08:30:00",
            "2020-01-05 08:50:00",
            near_100,
            near_200,
        ),
        trip_line(
            "2020-01-06 09:00:00",
            "2020-01-06 09:15:00",
            near_200,
            near_100,
        ),
    ];
    fs::write(input_dir.join("trips.csv"), lines.join("\n"))?;

    let ctx = Arc::new(RoutingContext::load(&paths)?);
    let run = |output_dir: &Path, combine: bool| -> Result<Vec<String>> {
        let mapper = TripRatioMapper::new(
            ContextResolver::new(Arc::clone(&ctx)),
            DaypartPolicy,
            ctx.window.clone(),
            Arc::new(MapCounters::default()),
        );
        let mut pipeline = RuntimePipeline::new();
        pipeline.add_input(input_dir.to_string_lossy());
        pipeline.add_output(output_dir.to_string_lossy());
        if combine {
            pipeline.map_combine_reduce(mapper, RatioCombiner, RatioReducer)?;
        } else {
            pipeline.map_reduce(mapper, RatioReducer)?;
        }
        read_output_lines(output_dir)
    };

    let combined = run(&root.join("output-combined"), true)?;
    let plain = run(&root.join("output-plain"), false)?;
    assert_eq!(combined, plain);
    assert!(!combined.is_empty());

    fs::remove_dir_all(&root)?;
    Ok(())
}
