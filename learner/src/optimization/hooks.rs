use std::fmt;

use crate::{error::HookErr, weights::WeightStore};

/// How the weights of several nodes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageMode {
    /// Every slot becomes the mean across nodes.
    Plain,
    /// Primary weights are averaged weighted by each node's squared gradient mass.
    Adaptive,
}

/// A blocking rendezvous that averages the weight array across every node.
///
/// The call returns only once every participating node contributed, it's a
/// barrier across a fixed set of nodes.
pub trait WeightAverager: Send {
    /// Should replace `weights` with the average across nodes.
    ///
    /// # Arguments
    /// * `weights` - The whole strided weight array of this node.
    /// * `stride` - The amount of slots per logical weight.
    /// * `mode` - How the weights are combined.
    fn average(
        &mut self,
        weights: &mut [f32],
        stride: usize,
        mode: AverageMode,
    ) -> Result<(), HookErr>;
}

/// The weights and metadata a checkpoint needs to persist a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelState<'a> {
    pub weights: &'a WeightStore,
    pub min_label: f32,
    pub max_label: f32,
    pub pairs: &'a [(u8, u8)],
}

/// Persists the model at pass boundaries and at the end of the run.
pub trait Checkpoint: Send {
    /// Called on every pass boundary with the index of the pass that just ended.
    fn save(&mut self, model: &ModelState<'_>, pass: usize) -> Result<(), HookErr>;

    /// Called once when the run finishes.
    fn finalize(&mut self, model: &ModelState<'_>) -> Result<(), HookErr>;
}

impl fmt::Debug for dyn WeightAverager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeightAverager")
    }
}

impl fmt::Debug for dyn Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Checkpoint")
    }
}
