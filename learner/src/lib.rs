//! Streaming online learning: a hashed linear model trained by gradient
//! descent, with cost-sensitive reductions stacked on top of it.

pub mod buffer;
pub mod error;
pub mod example;
pub mod loss;
pub mod optimization;
pub mod output;
pub mod reductions;
pub mod session;
pub mod weights;

pub use buffer::{BufferErr, GrowableBuffer};
pub use error::{HookErr, LearnErr, Result};
pub use example::{Cost, CostLabel, Example, Feature, Label, SimpleLabel};
pub use optimization::{AverageMode, Checkpoint, Gd, GdConfig, ModelState, WeightAverager};
pub use output::{Output, Stats};
pub use reductions::{BaseLearner, Reduction, ReductionConfig, ReductionKind};
pub use session::{ExampleSource, Fetch, Session};
pub use weights::{WeightInit, WeightStore};
