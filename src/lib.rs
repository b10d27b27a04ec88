//! A streaming online learner driven from JSON lines, optionally averaged
//! across a group of nodes.

pub mod app;
pub mod config;
pub mod source;

pub use app::{coordinate, source_config, train};
pub use config::{ClusterConfig, RunConfig};
pub use learner::Stats;
pub use source::{JsonLinesSource, SourceConfig};
