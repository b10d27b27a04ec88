use super::LossFn;

/// Squared loss with the implicit (importance-invariant) update.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredLoss;

impl LossFn for SquaredLoss {
    fn loss(&self, prediction: f32, label: f32) -> f32 {
        (prediction - label) * (prediction - label)
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        if eta_t < 1e-6 {
            // linearized around zero to keep precision
            return 2. * (label - prediction) * eta_t / norm;
        }
        (label - prediction) * (1. - (-2. * eta_t).exp()) / norm
    }

    fn first_derivative(&self, prediction: f32, label: f32) -> f32 {
        2. * (prediction - label)
    }

    fn second_derivative(&self, _prediction: f32, _label: f32) -> f32 {
        2.
    }
}

/// Squared loss with the plain gradient step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicSquaredLoss;

impl LossFn for ClassicSquaredLoss {
    fn loss(&self, prediction: f32, label: f32) -> f32 {
        SquaredLoss.loss(prediction, label)
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        2. * eta_t * (label - prediction) / norm
    }

    fn first_derivative(&self, prediction: f32, label: f32) -> f32 {
        SquaredLoss.first_derivative(prediction, label)
    }

    fn second_derivative(&self, _prediction: f32, _label: f32) -> f32 {
        2.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_update_never_overshoots() {
        let update = SquaredLoss.update(0., 1., 100., 1.);
        assert!(update <= 1.);
        assert!(update > 0.99);
    }

    #[test]
    fn test_small_rate_matches_classic() {
        let implicit = SquaredLoss.update(0.5, 1., 1e-7, 2.);
        let classic = ClassicSquaredLoss.update(0.5, 1., 1e-7, 2.);
        assert_eq!(implicit, classic);
    }
}
