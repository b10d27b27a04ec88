use super::LossFn;

/// Logistic loss for labels in `{-1, 1}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticLoss;

/// Approximates `W(exp(x)) - x` where `W` is the Lambert W function.
fn wexpmx(x: f64) -> f64 {
    let w = if x >= 1. {
        0.86 * x + 0.01
    } else {
        (0.8 * x - 0.65).exp()
    };
    let r = if x >= 1. {
        x - w.ln() - w
    } else {
        0.2 * x + 0.65 - w
    };
    let t = 1. + w;
    let u = 2. * t * (t + 2. * r / 3.);
    w * (1. + r / t * (u - r) / (u - 2. * r)) - x
}

impl LossFn for LogisticLoss {
    fn loss(&self, prediction: f32, label: f32) -> f32 {
        (1. + (-label * prediction).exp()).ln()
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        let d = (label * prediction).exp();
        if eta_t < 1e-6 {
            return label * eta_t / ((1. + d) * norm);
        }

        let x = f64::from(eta_t) + f64::from(label * prediction) + f64::from(d);
        let w = wexpmx(x) as f32;
        -(label * w + prediction) / norm
    }

    fn first_derivative(&self, prediction: f32, label: f32) -> f32 {
        -label / (1. + (label * prediction).exp())
    }

    fn second_derivative(&self, prediction: f32, label: f32) -> f32 {
        let p = 1. / (1. + (label * prediction).exp());
        p * (1. - p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wexpmx_solves_fixed_point() {
        for x in [-2.0, 0.0, 0.5, 3.0, 10.0] {
            let w = wexpmx(x) + x;
            assert!((w + w.ln() - x).abs() < 1e-4, "x = {x}");
        }
    }

    #[test]
    fn test_update_moves_towards_label() {
        assert!(LogisticLoss.update(0., 1., 0.5, 1.) > 0.);
        assert!(LogisticLoss.update(0., -1., 0.5, 1.) < 0.);
    }

    #[test]
    fn test_implicit_step_reduces_loss() {
        let step = LogisticLoss.update(0., 1., 0.5, 1.);
        assert!(step > 0. && step < 1.);
        assert!(LogisticLoss.loss(step, 1.) < LogisticLoss.loss(0., 1.));
    }

    #[test]
    fn test_loss_at_zero() {
        let loss = LogisticLoss.loss(0., 1.);
        assert!((loss - 2f32.ln()).abs() < 1e-6);
    }
}
