use log::{debug, info, warn};

use super::{
    config::GdConfig,
    hooks::{AverageMode, Checkpoint, ModelState, WeightAverager},
    kernels::{self, Rate},
};
use crate::{
    error::{LearnErr, Result},
    example::{Example, SimpleLabel},
    loss::LossFn,
    reductions::BaseLearner,
    weights::WeightStore,
};

/// Updates smaller than this don't move the regularization state.
const NEGLIGIBLE_UPDATE: f32 = 1e-8;

/// Online gradient descent over hashed sparse features.
///
/// Supports a global decaying rate, per-feature adaptive rates and lazy L1/L2
/// regularization kept as a global gravity and contraction.
#[derive(Debug)]
pub struct Gd {
    config: GdConfig,
    weights: WeightStore,
    loss: Box<dyn LossFn>,
    pairs: Vec<(u8, u8)>,
    eta: f32,
    current_pass: usize,
    min_label: f32,
    max_label: f32,
    averager: Option<Box<dyn WeightAverager>>,
    checkpoint: Option<Box<dyn Checkpoint>>,
}

impl Gd {
    /// Creates a new `Gd` optimizer with freshly initialized weights.
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration doesn't validate.
    pub fn new(config: GdConfig) -> Result<Self> {
        config.validate()?;

        let mut weights = WeightStore::new(config.num_bits(), config.stride());
        config.weight_init().apply(&mut weights)?;

        Ok(Self {
            loss: config.loss.build(),
            pairs: config.namespace_pairs()?,
            eta: config.eta,
            current_pass: 0,
            min_label: config.min_label,
            max_label: config.max_label,
            averager: None,
            checkpoint: None,
            weights,
            config,
        })
    }

    /// Adds the cross-node averaging hook run on pass boundaries and on finish.
    pub fn with_averager(mut self, averager: Box<dyn WeightAverager>) -> Self {
        self.averager = Some(averager);
        self
    }

    /// Adds the hook persisting the model on pass boundaries and on finish.
    pub fn with_checkpoint(mut self, checkpoint: Box<dyn Checkpoint>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn config(&self) -> &GdConfig {
        &self.config
    }

    /// The current base learning rate, decayed once per pass.
    pub fn eta(&self) -> f32 {
        self.eta
    }

    pub fn current_pass(&self) -> usize {
        self.current_pass
    }

    pub fn weights(&self) -> &WeightStore {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut WeightStore {
        &mut self.weights
    }

    pub fn label_range(&self) -> (f32, f32) {
        (self.min_label, self.max_label)
    }

    /// Widens the prediction range, used when resuming from a saved model.
    pub fn extend_label_range(&mut self, min: f32, max: f32) {
        self.min_label = self.min_label.min(min);
        self.max_label = self.max_label.max(max);
    }

    pub fn model_state(&self) -> ModelState<'_> {
        ModelState {
            weights: &self.weights,
            min_label: self.min_label,
            max_label: self.max_label,
            pairs: &self.pairs,
        }
    }

    /// Materializes the lazy regularization into the weight array.
    pub fn sync_weights(&mut self) {
        self.weights.sync();
    }

    fn average_weights(&mut self) -> Result<()> {
        let Some(averager) = self.averager.as_mut() else {
            return Ok(());
        };

        // the peers exchange true weights, not lazily scaled ones
        self.weights.sync();

        let mode = if self.config.adaptive {
            AverageMode::Adaptive
        } else {
            AverageMode::Plain
        };
        let stride = self.weights.stride();

        debug!(mode:? = mode; "averaging weights across nodes");
        averager
            .average(self.weights.as_mut_slice(), stride, mode)
            .map_err(LearnErr::Averaging)
    }

    /// Runs the pass boundary sequence when `pass` differs from the current one.
    fn check_pass(&mut self, pass: usize) -> Result<()> {
        if pass == self.current_pass {
            return Ok(());
        }

        info!(pass = self.current_pass, eta = self.eta; "finished pass");

        self.average_weights()?;
        if self.config.save_per_pass {
            self.weights.sync();
        }
        self.eta *= self.config.eta_decay_rate;

        if let Some(checkpoint) = self.checkpoint.as_mut() {
            let state = ModelState {
                weights: &self.weights,
                min_label: self.min_label,
                max_label: self.max_label,
                pairs: &self.pairs,
            };
            checkpoint
                .save(&state, self.current_pass)
                .map_err(LearnErr::Checkpoint)?;
        }

        self.current_pass = pass;
        Ok(())
    }

    /// Clamps a prediction into the label range, reporting NaN as 0.
    fn finalize_prediction(&self, prediction: f32) -> f32 {
        if prediction.is_nan() {
            warn!("NaN prediction in example, forcing it to 0");
            return 0.;
        }
        prediction.clamp(self.min_label, self.max_label)
    }

    fn predict_inner(&mut self, ec: &mut Example, label: &SimpleLabel) {
        let addressing = self.weights.addressing();
        let raw = if self.config.l1_lambda > 0. {
            kernels::dot_trunc(
                self.weights.as_slice(),
                self.weights.gravity() as f32,
                ec,
                &self.pairs,
                addressing,
            )
        } else {
            kernels::dot(self.weights.as_slice(), ec, &self.pairs, addressing)
        };

        ec.partial_prediction += label.initial + raw * self.weights.contraction() as f32;

        if let Some(y) = label.label {
            self.min_label = self.min_label.min(y);
            self.max_label = self.max_label.max(y);
        }

        ec.final_prediction = self.finalize_prediction(ec.partial_prediction);
    }

    fn rate(&self) -> Rate {
        if self.config.power_t == 0.5 || !self.config.exact_adaptive_norm {
            Rate::InvSqrt {
                fast: self.config.fast_inv_sqrt,
            }
        } else {
            Rate::Power(self.config.power_t)
        }
    }

    /// Computes `ec.loss` and `ec.eta_round`, updating the lazy regularization.
    fn compute_update(&mut self, ec: &mut Example, label: &SimpleLabel) {
        ec.eta_round = 0.;
        ec.loss = 0.;

        let Some(y) = label.label else {
            return;
        };

        let prediction = ec.final_prediction;
        ec.loss = self.loss.loss(prediction, y) * label.weight;
        if !self.config.training || ec.loss <= 0. {
            return;
        }

        let (_, sum_sq) = kernels::example_norm(ec, &self.pairs);
        if sum_sq <= 0. {
            return;
        }

        let power_t = self.config.power_t;
        let (eta_t, norm) = if self.config.adaptive && self.config.exact_adaptive_norm {
            let g = self.loss.square_grad(prediction, y) * label.weight;
            let xgx = if g == 0. {
                1.
            } else {
                kernels::compute_xgx(
                    self.weights.as_slice(),
                    ec,
                    &self.pairs,
                    self.weights.addressing(),
                    g,
                    self.rate(),
                )
            };
            let norm = if xgx > 0. { xgx } else { 1. };
            let eta_t = self.eta * norm / sum_sq.powf(1. - power_t) * label.weight;
            (eta_t, norm)
        } else {
            let t = ec.example_t;
            let decay = if t > 0. { t.powf(power_t) } else { 1. };
            let eta_t = self.eta / decay * label.weight;
            if self.config.normalize {
                (eta_t, sum_sq)
            } else {
                (eta_t * sum_sq, 1.)
            }
        };

        let update = self.loss.update(prediction, y, eta_t, norm);
        ec.eta_round = update / self.weights.contraction() as f32;

        if self.config.regularizes() && ec.eta_round.abs() > NEGLIGIBLE_UPDATE {
            let d1 = self.loss.first_derivative(prediction, y);
            let mut eta_bar = 0.;
            if d1.abs() > NEGLIGIBLE_UPDATE {
                eta_bar = -update / d1;
                self.weights
                    .contract(1. + f64::from(self.config.l2_lambda * eta_bar * norm));
            }
            self.weights
                .add_gravity(f64::from(eta_bar * norm.sqrt() * self.config.l1_lambda));
        }
    }

    fn apply_update(&mut self, ec: &Example, label: &SimpleLabel, y: f32) {
        let addressing = self.weights.addressing();

        if self.config.adaptive {
            let g = self.loss.square_grad(ec.final_prediction, y) * label.weight;
            let rate = self.rate();
            kernels::train_adaptive(
                self.weights.as_mut_slice(),
                ec,
                &self.pairs,
                addressing,
                ec.eta_round,
                g,
                rate,
            );
        } else {
            kernels::train(
                self.weights.as_mut_slice(),
                ec,
                &self.pairs,
                addressing,
                ec.eta_round,
            );
        }
    }
}

impl BaseLearner for Gd {
    fn learn(&mut self, ec: &mut Example) -> Result<()> {
        self.check_pass(ec.pass)?;

        let label = *ec.label.simple()?;
        self.predict_inner(ec, &label);
        self.compute_update(ec, &label);

        if let (true, Some(y)) = (ec.eta_round != 0., label.label) {
            self.apply_update(ec, &label, y);
        }

        if self.weights.needs_sync() {
            debug!(contraction = self.weights.contraction(); "contraction underflow, syncing");
            self.weights.sync();
        }
        Ok(())
    }

    fn predict(&mut self, ec: &mut Example) -> Result<()> {
        self.check_pass(ec.pass)?;

        let label = *ec.label.simple()?;
        self.predict_inner(ec, &label);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.weights.sync();
        self.average_weights()?;

        if let Some(checkpoint) = self.checkpoint.as_mut() {
            let state = ModelState {
                weights: &self.weights,
                min_label: self.min_label,
                max_label: self.max_label,
                pairs: &self.pairs,
            };
            checkpoint.finalize(&state).map_err(LearnErr::Checkpoint)?;
        }

        info!(passes = self.current_pass + 1; "optimizer finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        error::HookErr,
        example::{Feature, Label},
        loss::LossSpec,
    };

    fn example(label: f32, features: &[(u64, f32)]) -> Example {
        let mut ec = Example::new();
        let features: Vec<_> = features.iter().map(|&(i, v)| Feature::new(i, v)).collect();
        ec.add_namespace(b'a', &features);
        ec.label = Label::Simple(SimpleLabel::new(label, 1.));
        ec
    }

    fn config() -> GdConfig {
        GdConfig {
            num_bits: Some(8),
            min_label: -10.,
            max_label: 10.,
            ..Default::default()
        }
    }

    #[test]
    fn test_learns_towards_label() {
        let mut gd = Gd::new(config()).unwrap();

        let mut before = example(1., &[(3, 1.)]);
        gd.predict(&mut before).unwrap();
        assert_eq!(before.final_prediction, 0.);

        for t in 1..=20 {
            let mut ec = example(1., &[(3, 1.)]);
            ec.example_t = t as f32;
            gd.learn(&mut ec).unwrap();
        }

        let mut after = example(1., &[(3, 1.)]);
        gd.predict(&mut after).unwrap();
        assert!(after.final_prediction > 0.9);
    }

    #[test]
    fn test_unknown_label_is_not_trained() {
        let mut gd = Gd::new(config()).unwrap();
        let mut ec = example(1., &[(3, 1.)]);
        ec.label = Label::Simple(SimpleLabel::unknown());
        ec.example_t = 1.;

        gd.learn(&mut ec).unwrap();

        assert_eq!(ec.eta_round, 0.);
        assert!(gd.weights().as_slice().iter().all(|&w| w == 0.));
    }

    #[test]
    fn test_prediction_is_clamped() {
        let mut gd = Gd::new(GdConfig {
            num_bits: Some(8),
            ..Default::default()
        })
        .unwrap();
        gd.weights_mut().set_primary(3, 5.);

        let mut ec = example(1., &[(3, 1.)]);
        gd.predict(&mut ec).unwrap();

        assert_eq!(ec.partial_prediction, 5.);
        assert_eq!(ec.final_prediction, 1.);
    }

    #[test]
    fn test_nan_prediction_is_zeroed() {
        let mut gd = Gd::new(config()).unwrap();
        gd.weights_mut().set_primary(3, f32::NAN);

        let mut ec = example(1., &[(3, 1.)]);
        gd.predict(&mut ec).unwrap();

        assert_eq!(ec.final_prediction, 0.);
    }

    #[test]
    fn test_cost_label_is_rejected() {
        let mut gd = Gd::new(config()).unwrap();
        let mut ec = example(1., &[(3, 1.)]);
        ec.label = Label::Costs(Default::default());

        assert!(matches!(
            gd.learn(&mut ec),
            Err(LearnErr::LabelKind { .. })
        ));
    }

    #[test]
    fn test_adaptive_runs_are_bit_identical() {
        let config = GdConfig {
            adaptive: true,
            exact_adaptive_norm: true,
            ..config()
        };

        let run = || {
            let mut gd = Gd::new(config.clone()).unwrap();
            for t in 0..50u64 {
                let mut ec = example(
                    (t % 3) as f32 - 1.,
                    &[(t % 7, 1.), (t % 5 + 7, 0.5), (t % 7, -0.25)],
                );
                ec.example_t = (t + 1) as f32;
                gd.learn(&mut ec).unwrap();
            }
            gd.weights()
                .as_slice()
                .iter()
                .map(|w| w.to_bits())
                .collect::<Vec<_>>()
        };

        let first = run();
        assert!(first.iter().any(|&w| w != 0));
        assert_eq!(first, run());
    }

    #[test]
    fn test_general_power_adaptive_step() {
        let mut gd = Gd::new(GdConfig {
            adaptive: true,
            exact_adaptive_norm: true,
            power_t: 0.25,
            ..config()
        })
        .unwrap();

        let mut ec = example(1., &[(3, 2.)]);
        ec.example_t = 1.;
        gd.learn(&mut ec).unwrap();

        // g = (2 (p - y))^2 = 4, the accumulator ends at g x^2 = 16
        let acc = 16f32;
        let xgx = 4. * acc.powf(-0.25);
        let eta_t = 0.5 * xgx / 4f32.powf(0.75);
        let update = (1. - (-2. * eta_t).exp()) / xgx;
        assert!((ec.eta_round - update).abs() < 1e-6);

        let slot = gd.weights().index(3);
        let expected = update * 2. * acc.powf(-0.25);
        assert_eq!(gd.weights().as_slice()[slot + 1], acc);
        assert!(
            (gd.weights().as_slice()[slot] - expected).abs() < 1e-6,
            "{} != {expected}",
            gd.weights().as_slice()[slot]
        );
    }

    #[test]
    fn test_lazy_l2_matches_eager() {
        let l2 = 0.01;
        let eta = 0.1;
        let mut gd = Gd::new(GdConfig {
            l2_lambda: l2,
            eta,
            power_t: 0.,
            loss: LossSpec::Classic,
            ..config()
        })
        .unwrap();

        let stream: Vec<(f32, Vec<(u64, f32)>)> = (0..30u64)
            .map(|t| {
                let label = if t % 2 == 0 { 1. } else { -0.5 };
                (label, vec![(t % 4, 1.), (4 + t % 3, 0.5)])
            })
            .collect();

        let mut eager = vec![0f32; 256];
        for (label, features) in &stream {
            let mut ec = example(*label, features);
            ec.example_t = 1.;
            gd.learn(&mut ec).unwrap();

            let p: f32 = features.iter().map(|&(i, x)| eager[i as usize] * x).sum();
            let norm: f32 = features.iter().map(|&(_, x)| x * x).sum();
            let update = 2. * eta * (label - p) / norm;
            let shrink = 1. + l2 * eta;
            for &(i, x) in features {
                eager[i as usize] += update * x;
            }
            for w in eager.iter_mut() {
                *w /= shrink;
            }
        }

        gd.sync_weights();
        assert_eq!(gd.weights().contraction(), 1.);
        for (lazy, eager) in gd.weights().as_slice().iter().zip(&eager) {
            assert!((lazy - eager).abs() < 1e-4, "{lazy} != {eager}");
        }
    }

    #[test]
    fn test_l1_shrinks_to_zero() {
        let mut gd = Gd::new(GdConfig {
            l1_lambda: 10.,
            ..config()
        })
        .unwrap();

        let mut ec = example(1., &[(3, 1.)]);
        ec.example_t = 1.;
        gd.learn(&mut ec).unwrap();
        gd.sync_weights();

        assert_eq!(gd.weights().as_slice()[3], 0.);
    }

    #[test]
    fn test_eta_decays_per_pass() {
        let mut gd = Gd::new(GdConfig {
            eta: 0.8,
            eta_decay_rate: 0.5,
            ..config()
        })
        .unwrap();

        for pass in 0..4 {
            let mut ec = example(1., &[(3, 1.)]);
            ec.pass = pass;
            ec.example_t = 1.;
            gd.learn(&mut ec).unwrap();
        }

        assert_eq!(gd.current_pass(), 3);
        assert_eq!(gd.eta(), 0.8 * 0.5f32.powi(3));
    }

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl WeightAverager for Recorder {
        fn average(
            &mut self,
            weights: &mut [f32],
            _stride: usize,
            mode: AverageMode,
        ) -> std::result::Result<(), HookErr> {
            self.events.lock().unwrap().push(format!("average {mode:?}"));
            weights.iter_mut().for_each(|w| *w /= 2.);
            Ok(())
        }
    }

    impl Checkpoint for Recorder {
        fn save(
            &mut self,
            _model: &ModelState<'_>,
            pass: usize,
        ) -> std::result::Result<(), HookErr> {
            self.events.lock().unwrap().push(format!("save {pass}"));
            Ok(())
        }

        fn finalize(&mut self, _model: &ModelState<'_>) -> std::result::Result<(), HookErr> {
            self.events.lock().unwrap().push("finalize".into());
            Ok(())
        }
    }

    #[test]
    fn test_pass_boundary_hooks_run_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut gd = Gd::new(config())
            .unwrap()
            .with_averager(Box::new(Recorder {
                events: events.clone(),
            }))
            .with_checkpoint(Box::new(Recorder {
                events: events.clone(),
            }));

        for pass in [0, 0, 1] {
            let mut ec = example(1., &[(3, 1.)]);
            ec.pass = pass;
            ec.example_t = 1.;
            gd.learn(&mut ec).unwrap();
        }
        gd.finish().unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["average Plain", "save 0", "average Plain", "finalize"]
        );
    }

    #[test]
    fn test_per_pass_checkpoint_sees_synced_weights() {
        struct Snapshot {
            saved: Arc<Mutex<Vec<(f64, f32)>>>,
        }

        impl Checkpoint for Snapshot {
            fn save(
                &mut self,
                model: &ModelState<'_>,
                _pass: usize,
            ) -> std::result::Result<(), HookErr> {
                let slot = model.weights.index(3);
                self.saved
                    .lock()
                    .unwrap()
                    .push((model.weights.contraction(), model.weights.as_slice()[slot]));
                Ok(())
            }

            fn finalize(&mut self, _model: &ModelState<'_>) -> std::result::Result<(), HookErr> {
                Ok(())
            }
        }

        let saved = Arc::new(Mutex::new(Vec::new()));
        let mut gd = Gd::new(GdConfig {
            l2_lambda: 0.1,
            save_per_pass: true,
            ..config()
        })
        .unwrap()
        .with_checkpoint(Box::new(Snapshot {
            saved: saved.clone(),
        }));

        for t in 1..=3 {
            let mut ec = example(1., &[(3, 1.)]);
            ec.example_t = t as f32;
            gd.learn(&mut ec).unwrap();
        }
        assert!(gd.weights().contraction() < 1.);
        let slot = gd.weights().index(3);
        let true_weight = gd.weights().weight(slot);

        let mut ec = example(1., &[(3, 1.)]);
        ec.pass = 1;
        gd.predict(&mut ec).unwrap();

        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        let (contraction, stored) = saved[0];
        assert_eq!(contraction, 1.);
        assert!((stored - true_weight).abs() < 1e-6, "{stored} != {true_weight}");
    }

    #[test]
    fn test_averaging_failure_is_fatal() {
        struct Broken;

        impl WeightAverager for Broken {
            fn average(
                &mut self,
                _weights: &mut [f32],
                _stride: usize,
                _mode: AverageMode,
            ) -> std::result::Result<(), HookErr> {
                Err("connection reset".into())
            }
        }

        let mut gd = Gd::new(config()).unwrap().with_averager(Box::new(Broken));
        assert!(matches!(gd.finish(), Err(LearnErr::Averaging(_))));
    }
}
