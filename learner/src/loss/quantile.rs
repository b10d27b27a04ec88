use super::LossFn;

/// Pinball loss estimating the `tau` quantile.
#[derive(Debug, Clone, Copy)]
pub struct QuantileLoss {
    tau: f32,
}

impl QuantileLoss {
    pub fn new(tau: f32) -> Self {
        Self { tau }
    }
}

impl LossFn for QuantileLoss {
    fn loss(&self, prediction: f32, label: f32) -> f32 {
        let e = label - prediction;
        if e > 0. {
            self.tau * e
        } else {
            -(1. - self.tau) * e
        }
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        let err = label - prediction;
        if err == 0. {
            return 0.;
        }

        if err > 0. {
            (self.tau * eta_t).min(err) / norm
        } else {
            (-(1. - self.tau) * eta_t).max(err) / norm
        }
    }

    fn first_derivative(&self, prediction: f32, label: f32) -> f32 {
        let e = label - prediction;
        if e == 0. {
            0.
        } else if e > 0. {
            -self.tau
        } else {
            1. - self.tau
        }
    }

    fn second_derivative(&self, _prediction: f32, _label: f32) -> f32 {
        0.
    }
}
