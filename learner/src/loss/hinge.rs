use super::LossFn;

/// Hinge loss for labels in `{-1, 1}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HingeLoss;

impl LossFn for HingeLoss {
    fn loss(&self, prediction: f32, label: f32) -> f32 {
        (1. - label * prediction).max(0.)
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        if label * prediction >= 1. {
            return 0.;
        }
        let err = 1. - label * prediction;
        label * eta_t.min(err) / norm
    }

    fn first_derivative(&self, prediction: f32, label: f32) -> f32 {
        if label * prediction >= 1. { 0. } else { -label }
    }

    fn second_derivative(&self, _prediction: f32, _label: f32) -> f32 {
        0.
    }
}
