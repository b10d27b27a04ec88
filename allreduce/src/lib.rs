//! Distributed weight averaging over a star topology: a coordinator summing
//! the vectors of a fixed group of nodes, and the blocking node-side client.

mod client;
mod coordinator;
mod error;

pub use client::AllReduceClient;
pub use coordinator::Coordinator;
pub use error::{AllReduceErr, Result};
