//! The gradient descent optimizer and its external collaborator seams.

mod config;
mod gd;
mod hooks;
pub mod kernels;

pub use config::{DEFAULT_NUM_BITS, GdConfig};
pub use gd::Gd;
pub use hooks::{AverageMode, Checkpoint, ModelState, WeightAverager};
pub use kernels::inv_sqrt;
