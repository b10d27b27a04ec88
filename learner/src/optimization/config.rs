use serde::{Deserialize, Serialize};

use crate::{
    error::{LearnErr, Result},
    loss::LossSpec,
    weights::WeightInit,
};

/// The optimizer configuration, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GdConfig {
    /// Log2 of the amount of logical weights, `None` defers to a loaded model.
    pub num_bits: Option<u32>,
    pub eta: f32,
    /// Factor applied to `eta` on every pass boundary.
    pub eta_decay_rate: f32,
    pub power_t: f32,
    pub initial_t: f32,
    pub adaptive: bool,
    pub exact_adaptive_norm: bool,
    pub normalize: bool,
    pub fast_inv_sqrt: bool,
    pub l1_lambda: f32,
    pub l2_lambda: f32,
    pub training: bool,
    pub save_per_pass: bool,
    /// Namespace crosses, each given as two namespace characters.
    pub pairs: Vec<String>,
    pub min_label: f32,
    pub max_label: f32,
    pub initial_weight: f32,
    pub random_weights: bool,
    pub seed: Option<u64>,
    pub loss: LossSpec,
}

impl Default for GdConfig {
    fn default() -> Self {
        Self {
            num_bits: None,
            eta: 0.5,
            eta_decay_rate: 1.,
            power_t: 0.5,
            initial_t: 0.,
            adaptive: false,
            exact_adaptive_norm: false,
            normalize: true,
            fast_inv_sqrt: true,
            l1_lambda: 0.,
            l2_lambda: 0.,
            training: true,
            save_per_pass: false,
            pairs: Vec::new(),
            min_label: 0.,
            max_label: 1.,
            initial_weight: 0.,
            random_weights: false,
            seed: None,
            loss: LossSpec::default(),
        }
    }
}

/// Bit width used when neither the configuration nor a loaded model sets one.
pub const DEFAULT_NUM_BITS: u32 = 18;

impl GdConfig {
    pub fn num_bits(&self) -> u32 {
        self.num_bits.unwrap_or(DEFAULT_NUM_BITS)
    }

    /// Returns the amount of weight slots per logical weight.
    pub fn stride(&self) -> usize {
        if self.adaptive { 2 } else { 1 }
    }

    /// Whether lazy regularization is active.
    pub fn regularizes(&self) -> bool {
        self.l1_lambda > 0. || self.l2_lambda > 0.
    }

    /// Parses the declared namespace crosses.
    ///
    /// # Errors
    /// `InvalidConfig` if a pair isn't exactly two single byte namespaces.
    pub fn namespace_pairs(&self) -> Result<Vec<(u8, u8)>> {
        self.pairs
            .iter()
            .map(|pair| match pair.as_bytes() {
                &[a, b] => Ok((a, b)),
                _ => Err(LearnErr::InvalidConfig(format!(
                    "namespace pair {pair:?} must be exactly two namespace characters"
                ))),
            })
            .collect()
    }

    pub fn weight_init(&self) -> WeightInit {
        WeightInit {
            initial_weight: self.initial_weight,
            random_weights: self.random_weights,
            seed: self.seed,
            initial_t: self.initial_t,
            adaptive: self.adaptive,
        }
    }

    /// Checks the configuration before any weight is allocated.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(LearnErr::InvalidConfig(reason));

        if !(1..=32).contains(&self.num_bits()) {
            return invalid(format!("num_bits must be in 1..=32, got {}", self.num_bits()));
        }

        for (name, value) in [
            ("eta", self.eta),
            ("eta_decay_rate", self.eta_decay_rate),
            ("power_t", self.power_t),
            ("initial_t", self.initial_t),
        ] {
            if !value.is_finite() {
                return invalid(format!("{name} must be finite, got {value}"));
            }
        }

        if self.l1_lambda < 0. || self.l2_lambda < 0. {
            return invalid("regularization coefficients can't be negative".into());
        }

        if self.min_label > self.max_label {
            return invalid(format!(
                "min_label {} is greater than max_label {}",
                self.min_label, self.max_label
            ));
        }

        if let LossSpec::Quantile { tau } = self.loss
            && !(0. ..=1.).contains(&tau)
        {
            return invalid(format!("quantile tau must be in [0, 1], got {tau}"));
        }

        self.namespace_pairs().map(|_| ())
    }
}
