pub mod accumulate;
pub mod context;
pub mod counters;
pub mod graph;
pub mod key;
pub mod pipeline;
pub mod record;
pub mod resolve;

pub use accumulate::RatioSum;
pub use context::{ContextPaths, DateWindow, RoutingContext};
pub use counters::{DropReason, MapCounters};
pub use key::{BucketPolicy, DaypartPolicy, Segment, SegmentKey};
pub use pipeline::{RatioCombiner, RatioReducer, TripRatioMapper};
pub use record::{ParsedLine, Point, TripRecord};
pub use resolve::{ContextResolver, PathResolver, ResolvedRoute};
