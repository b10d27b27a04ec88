//! Model persistence: the binary regressor file, its readable dump and the
//! checkpoint that writes them during training.

mod error;
mod header;
mod model;
mod version;
mod writer;

pub use error::{RegressorErr, Result};
pub use header::Header;
pub use model::{Model, read_model, save, save_text};
pub use version::{CURRENT_VERSION, LAST_COMPATIBLE_VERSION, Version};
pub use writer::ModelWriter;
