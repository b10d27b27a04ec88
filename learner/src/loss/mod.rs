//! Pluggable scalar loss functions with known derivatives.

mod hinge;
mod logistic;
mod quantile;
mod squared;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

pub use hinge::HingeLoss;
pub use logistic::LogisticLoss;
pub use quantile::QuantileLoss;
pub use squared::{ClassicSquaredLoss, SquaredLoss};

/// A loss function as seen by the optimizer.
pub trait LossFn: Debug + Send + Sync {
    /// Should return the loss of predicting `prediction` for `label`.
    fn loss(&self, prediction: f32, label: f32) -> f32;

    /// Should return the step to apply along the features for one example.
    ///
    /// # Arguments
    /// * `prediction` - The current clamped prediction.
    /// * `label` - The target.
    /// * `eta_t` - The learning rate for this example.
    /// * `norm` - The normalizer of the step, usually the squared norm of the example.
    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32;

    fn first_derivative(&self, prediction: f32, label: f32) -> f32;

    fn second_derivative(&self, prediction: f32, label: f32) -> f32;

    /// Returns the squared gradient fed to the adaptive accumulators.
    fn square_grad(&self, prediction: f32, label: f32) -> f32 {
        let d = self.first_derivative(prediction, label);
        d * d
    }
}

/// The serializable selection of a loss function.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LossSpec {
    #[default]
    Squared,
    Classic,
    Logistic,
    Hinge,
    Quantile {
        tau: f32,
    },
}

impl LossSpec {
    /// Builds the loss function described by this spec.
    pub fn build(self) -> Box<dyn LossFn> {
        match self {
            LossSpec::Squared => Box::new(SquaredLoss),
            LossSpec::Classic => Box::new(ClassicSquaredLoss),
            LossSpec::Logistic => Box::new(LogisticLoss),
            LossSpec::Hinge => Box::new(HingeLoss),
            LossSpec::Quantile { tau } => Box::new(QuantileLoss::new(tau)),
        }
    }
}
