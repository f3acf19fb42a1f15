use crate::accumulate::RatioSum;
use crate::context::DateWindow;
use crate::counters::{DropReason, MapCounters};
use crate::key::{BucketPolicy, Segment, SegmentKey};
use crate::record::{parse_line, ParsedLine};
use crate::resolve::PathResolver;
use chrono::Duration;
use mapred::{Combiner, Mapper, Reducer};
use std::sync::Arc;

/// Map stage: one trip in, one congestion ratio out, attributed to every
/// street segment on the trip's resolved route. The ratio is a trip-level
/// statistic — every segment of the trip receives the same value.
pub struct TripRatioMapper<R, P> {
    resolver: R,
    policy: P,
    window: DateWindow,
    counters: Arc<MapCounters>,
}

impl<R: PathResolver, P: BucketPolicy> TripRatioMapper<R, P> {
    pub fn new(resolver: R, policy: P, window: DateWindow, counters: Arc<MapCounters>) -> Self {
        Self {
            resolver,
            policy,
            window,
            counters,
        }
    }

    fn map_line<F>(&self, line: &str, emit: &mut F)
    where
        F: FnMut(SegmentKey, RatioSum),
    {
        self.counters.record_seen();
        let trip = match parse_line(line) {
            Ok(ParsedLine::Header) => {
                self.counters.record_header();
                return;
            }
            Ok(ParsedLine::Trip(trip)) => trip,
            Err(reason) => {
                self.counters.record_drop(reason);
                return;
            }
        };

        if !self.window.contains(trip.pickup_at) {
            self.counters.record_drop(DropReason::OutOfWindow);
            return;
        }

        let routes = self.resolver.resolve(trip.pickup, trip.dropoff);
        if routes.is_empty() {
            self.counters.record_drop(DropReason::NoRoute);
            return;
        }

        let ideal_minutes: f64 = routes.iter().map(|r| r.ideal_minutes).sum();
        if ideal_minutes <= 0.0 {
            self.counters.record_drop(DropReason::DegenerateRoute);
            return;
        }

        let span = trip.dropoff_at - trip.pickup_at;
        if span <= Duration::zero() {
            self.counters.record_drop(DropReason::Malformed);
            return;
        }
        let actual_minutes = span.num_seconds() as f64 / 60.0;
        let ratio = actual_minutes / ideal_minutes;

        let mut pairs: u64 = 0;
        for route in &routes {
            for pair in route.nodes.windows(2) {
                let segment = Segment::new(pair[0], pair[1]);
                let key = SegmentKey::new(trip.pickup_at, segment, &self.policy);
                emit(key, RatioSum::unit(ratio));
                pairs += 1;
            }
        }
        if pairs > 0 {
            self.counters.record_trip(pairs);
        } else {
            // Routes with no traversable node pair attribute nothing.
            self.counters.record_drop(DropReason::NoRoute);
        }
    }
}

impl<R, P> Mapper for TripRatioMapper<R, P>
where
    R: PathResolver + 'static,
    P: BucketPolicy + 'static,
{
    type Input = String;
    type Key = SegmentKey;
    type Value = RatioSum;

    fn do_map<I, F>(&self, input: I, emit: &mut F)
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for line in input {
            self.map_line(&line, emit);
        }
    }
}

/// Partition-local fold of `(sum, count)` partials. Pure and commutative, so
/// the runtime may apply it to any subset of a key's values, any number of
/// times, without changing the reduced average.
pub struct RatioCombiner;

impl Combiner for RatioCombiner {
    type Key = SegmentKey;
    type Value = RatioSum;

    fn do_combine<I>(&self, _key: &Self::Key, values: I) -> Self::Value
    where
        I: IntoIterator<Item = Self::Value>,
    {
        values.into_iter().fold(RatioSum::IDENTITY, RatioSum::merge)
    }
}

/// Final aggregation: average of all ratios attributed to the key, rounded
/// to three decimals. Every key that reaches this point carries at least one
/// ratio, so the mean is always defined.
pub struct RatioReducer;

impl Reducer for RatioReducer {
    type Key = SegmentKey;
    type ValueIn = RatioSum;
    type Out = String;

    fn do_reduce<I, F>(&self, key: &Self::Key, values: I, emit: &mut F)
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let total = values.into_iter().fold(RatioSum::IDENTITY, RatioSum::merge);
        let average = round3(total.mean());
        emit(format!("\"{}\"\t{:.3}", key, average));
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ResolvedRoute;
    use chrono::NaiveDateTime;
    use std::collections::HashMap;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn full_year_window() -> DateWindow {
        DateWindow::new(ts("2020-01-01 00:00:00"), ts("2020-12-31 23:59:59"))
    }

    /// Resolver that hands every trip the same fixed set of legs.
    struct StaticResolver(Vec<ResolvedRoute>);

    impl PathResolver for StaticResolver {
        fn resolve(
            &self,
            _pickup: crate::record::Point,
            _dropoff: crate::record::Point,
        ) -> Vec<ResolvedRoute> {
            self.0.clone()
        }
    }

    fn leg(nodes: Vec<u64>, ideal_minutes: f64) -> ResolvedRoute {
        ResolvedRoute {
            nodes,
            ideal_minutes,
        }
    }

    fn trip_line(pickup: &str, dropoff: &str) -> String {
        let mut cols = vec!["0"; 15];
        cols[1] = dropoff;
        cols[2] = "40.71";
        cols[3] = "-74.01";
        cols[12] = pickup;
        cols[13] = "40.70";
        cols[14] = "-74.00";
        cols.join(",")
    }

    fn run_mapper(
        resolver: StaticResolver,
        lines: Vec<String>,
    ) -> (Vec<(SegmentKey, RatioSum)>, Arc<MapCounters>) {
        let counters = Arc::new(MapCounters::default());
        let mapper = TripRatioMapper::new(
            resolver,
            crate::key::DaypartPolicy,
            full_year_window(),
            Arc::clone(&counters),
        );
        let mut emitted = Vec::new();
        let mut emit = |k: SegmentKey, v: RatioSum| emitted.push((k, v));
        mapper.do_map(lines, &mut emit);
        (emitted, counters)
    }

    #[test]
    fn test_single_trip_worked_example() {
        // 10 actual minutes over 5 ideal minutes on segment (100, 200).
        let resolver = StaticResolver(vec![leg(vec![100, 200], 5.0)]);
        let (emitted, counters) = run_mapper(
            resolver,
            vec![trip_line("2020-01-01 08:00:00", "2020-01-01 08:10:00")],
        );

        assert_eq!(emitted.len(), 1);
        let (key, value) = &emitted[0];
        assert_eq!(key.to_string(), "y2020, 100, 200, morning");
        assert_eq!(*value, RatioSum::unit(2.0));
        assert_eq!(counters.snapshot().trips_emitted, 1);
        assert_eq!(counters.snapshot().pairs_emitted, 1);
    }

    #[test]
    fn test_every_segment_gets_the_same_ratio() {
        // Two legs, three node-pair segments in total, 20 actual / 10 ideal.
        let resolver = StaticResolver(vec![
            leg(vec![1, 2, 3], 6.0),
            leg(vec![3, 4], 4.0),
        ]);
        let (emitted, counters) = run_mapper(
            resolver,
            vec![trip_line("2020-01-01 09:00:00", "2020-01-01 09:20:00")],
        );

        assert_eq!(emitted.len(), 3);
        for (_, value) in &emitted {
            assert_eq!(*value, RatioSum::unit(2.0));
        }
        assert_eq!(counters.snapshot().pairs_emitted, 3);
    }

    #[test]
    fn test_opposite_directions_share_a_key() {
        let forward = StaticResolver(vec![leg(vec![100, 200], 5.0)]);
        let backward = StaticResolver(vec![leg(vec![200, 100], 5.0)]);
        let line = trip_line("2020-01-01 08:00:00", "2020-01-01 08:10:00");
        let (a, _) = run_mapper(forward, vec![line.clone()]);
        let (b, _) = run_mapper(backward, vec![line]);
        assert_eq!(a[0].0, b[0].0);
    }

    #[test]
    fn test_header_and_malformed_rows_emit_nothing() {
        let resolver = StaticResolver(vec![leg(vec![100, 200], 5.0)]);
        let mut header = vec!["0"; 15];
        header[2] = "dropoff_latitude";
        let (emitted, counters) = run_mapper(
            resolver,
            vec![
                header.join(","),
                "not,even,close".to_string(),
                trip_line("2020-13-01 08:00:00", "2020-01-01 08:10:00"),
            ],
        );

        assert!(emitted.is_empty());
        let snap = counters.snapshot();
        assert_eq!(snap.records_seen, 3);
        assert_eq!(snap.header_rows, 1);
        assert_eq!(snap.dropped_malformed, 2);
    }

    #[test]
    fn test_no_route_is_dropped_and_counted() {
        let resolver = StaticResolver(vec![]);
        let (emitted, counters) = run_mapper(
            resolver,
            vec![trip_line("2020-01-01 08:00:00", "2020-01-01 08:10:00")],
        );
        assert!(emitted.is_empty());
        assert_eq!(counters.snapshot().dropped_no_route, 1);
    }

    #[test]
    fn test_zero_ideal_time_is_dropped_not_divided() {
        let resolver = StaticResolver(vec![leg(vec![100, 200], 0.0)]);
        let (emitted, counters) = run_mapper(
            resolver,
            vec![trip_line("2020-01-01 08:00:00", "2020-01-01 08:10:00")],
        );
        assert!(emitted.is_empty());
        assert_eq!(counters.snapshot().dropped_degenerate_route, 1);
    }

    #[test]
    fn test_non_positive_trip_span_is_dropped() {
        let resolver = StaticResolver(vec![leg(vec![100, 200], 5.0)]);
        let (emitted, counters) = run_mapper(
            resolver,
            vec![trip_line("2020-01-01 08:10:00", "2020-01-01 08:00:00")],
        );
        assert!(emitted.is_empty());
        assert_eq!(counters.snapshot().dropped_malformed, 1);
    }

    #[test]
    fn test_out_of_window_pickup_is_dropped() {
        let counters = Arc::new(MapCounters::default());
        let mapper = TripRatioMapper::new(
            StaticResolver(vec![leg(vec![100, 200], 5.0)]),
            crate::key::DaypartPolicy,
            DateWindow::new(ts("2020-01-01 00:00:00"), ts("2020-03-31 23:59:59")),
            Arc::clone(&counters),
        );
        let mut emitted = Vec::new();
        let mut emit = |k: SegmentKey, v: RatioSum| emitted.push((k, v));
        mapper.do_map(
            vec![trip_line("2020-07-04 08:00:00", "2020-07-04 08:10:00")],
            &mut emit,
        );
        assert!(emitted.is_empty());
        assert_eq!(counters.snapshot().dropped_out_of_window, 1);
    }

    #[test]
    fn test_reducer_averages_and_rounds() {
        let key = SegmentKey {
            year: 2020,
            min: 100,
            max: 200,
            bucket: "morning".to_string(),
        };
        let mut lines = Vec::new();
        let mut emit = |line: String| lines.push(line);
        RatioReducer.do_reduce(
            &key,
            vec![RatioSum::unit(2.0), RatioSum::unit(2.0)],
            &mut emit,
        );
        assert_eq!(lines, vec!["\"y2020, 100, 200, morning\"\t2.000"]);

        lines.clear();
        let mut emit = |line: String| lines.push(line);
        RatioReducer.do_reduce(
            &key,
            vec![RatioSum::unit(1.0), RatioSum::unit(2.0), RatioSum::unit(2.5)],
            &mut emit,
        );
        assert_eq!(lines, vec!["\"y2020, 100, 200, morning\"\t1.833"]);
    }

    #[test]
    fn test_combiner_is_transparent_to_the_reducer() {
        let key = SegmentKey {
            year: 2020,
            min: 100,
            max: 200,
            bucket: "morning".to_string(),
        };
        let ratios = [2.0, 3.0, 4.0, 7.0, 9.0];
        let units: Vec<RatioSum> = ratios.iter().copied().map(RatioSum::unit).collect();

        let reduce_to_line = |values: Vec<RatioSum>| {
            let mut lines = Vec::new();
            let mut emit = |line: String| lines.push(line);
            RatioReducer.do_reduce(&key, values, &mut emit);
            lines
        };

        // No combining: raw (ratio, 1) pairs straight to the reducer.
        let raw = reduce_to_line(units.clone());

        // One combine pass over arbitrary partition groupings.
        let groupings: Vec<Vec<Vec<RatioSum>>> = vec![
            vec![units.clone()],
            vec![units[..2].to_vec(), units[2..].to_vec()],
            vec![
                units[..1].to_vec(),
                units[1..4].to_vec(),
                units[4..].to_vec(),
            ],
        ];
        for grouping in groupings {
            let partials: Vec<RatioSum> = grouping
                .into_iter()
                .map(|part| RatioCombiner.do_combine(&key, part))
                .collect();
            assert_eq!(reduce_to_line(partials), raw);
        }

        // Combining the combiner's own outputs again changes nothing either.
        let once = RatioCombiner.do_combine(&key, units.clone());
        let twice = RatioCombiner.do_combine(&key, vec![once]);
        assert_eq!(reduce_to_line(vec![twice]), raw);
    }

    #[test]
    fn test_two_trips_average_to_two() {
        // Worked example: ratios 10/5 and 8/4 both equal 2.0, average 2.0.
        let mut by_key: HashMap<SegmentKey, Vec<RatioSum>> = HashMap::new();

        let (emitted, _) = run_mapper(
            StaticResolver(vec![leg(vec![100, 200], 5.0)]),
            vec![trip_line("2020-01-01 08:00:00", "2020-01-01 08:10:00")],
        );
        for (k, v) in emitted {
            by_key.entry(k).or_default().push(v);
        }
        let (emitted, _) = run_mapper(
            StaticResolver(vec![leg(vec![100, 200], 4.0)]),
            vec![trip_line("2020-01-01 08:30:00", "2020-01-01 08:38:00")],
        );
        for (k, v) in emitted {
            by_key.entry(k).or_default().push(v);
        }

        assert_eq!(by_key.len(), 1);
        let (key, values) = by_key.into_iter().next().unwrap();
        assert_eq!(key.to_string(), "y2020, 100, 200, morning");
        let mut lines = Vec::new();
        let mut emit = |line: String| lines.push(line);
        RatioReducer.do_reduce(&key, values, &mut emit);
        assert_eq!(lines, vec!["\"y2020, 100, 200, morning\"\t2.000"]);
    }
}
