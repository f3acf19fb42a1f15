use crate::graph::NodeId;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One street: an unordered node pair stored canonically as (min, max), so a
/// traversal of (a, b) and one of (b, a) aggregate together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    pub min: NodeId,
    pub max: NodeId,
}

impl Segment {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }
}

/// Maps a clock time to a named period of the day. Implementations must be
/// total and deterministic; the boundaries themselves are policy, not
/// contract, and are swappable without touching the pipeline.
pub trait BucketPolicy: Send + Sync {
    fn bucket_name(&self, time: NaiveTime) -> &'static str;
}

/// Default six-hour dayparts.
#[derive(Clone, Copy, Debug, Default)]
pub struct DaypartPolicy;

impl BucketPolicy for DaypartPolicy {
    fn bucket_name(&self, time: NaiveTime) -> &'static str {
        match time.hour() {
            0..=5 => "overnight",
            6..=11 => "morning",
            12..=17 => "afternoon",
            _ => "evening",
        }
    }
}

/// Grouping key for one street in one year and one time-of-day bucket.
/// A total, deterministic function of (pickup time, segment, policy).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub year: i32,
    pub min: NodeId,
    pub max: NodeId,
    pub bucket: String,
}

impl SegmentKey {
    pub fn new(pickup_at: NaiveDateTime, segment: Segment, policy: &impl BucketPolicy) -> Self {
        use chrono::Datelike;
        Self {
            year: pickup_at.year(),
            min: segment.min,
            max: segment.max,
            bucket: policy.bucket_name(pickup_at.time()).to_string(),
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "y{}, {}, {}, {}", self.year, self.min, self.max, self.bucket)
    }
}
