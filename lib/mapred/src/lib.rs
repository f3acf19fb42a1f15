pub mod api;
pub mod constants;
pub mod io;
pub mod runtime;
pub mod sort;
pub mod utils;
pub mod writer;

pub use api::{Combiner, Mapper, NoCombine, Reducer};
pub use runtime::{default_pipeline, RuntimePipeline};
