use log::warn;

use super::{BaseLearner, Reduction, class_increment, class_offset};
use crate::{
    error::Result,
    example::{Example, Label, SimpleLabel},
    output::Output,
};

/// Cost-sensitive one-against-all.
///
/// Every class regresses its own cost on a disjoint slice of the weight
/// array, the prediction is the class with the smallest regressed cost.
#[derive(Debug)]
pub struct Csoaa<B> {
    base: B,
    num_classes: u32,
    increment: u64,
    training: bool,
}

impl<B: BaseLearner> Csoaa<B> {
    /// Creates a new `Csoaa` reduction.
    ///
    /// # Arguments
    /// * `base` - The regressor every class is learned with.
    /// * `num_classes` - The amount of classes `K`.
    /// * `num_bits` - The bit width of the weight array split between classes.
    /// * `training` - Whether known costs are trained on.
    pub fn new(base: B, num_classes: u32, num_bits: u32, training: bool) -> Self {
        Self {
            base,
            num_classes,
            increment: class_increment(num_classes, num_bits),
            training,
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    fn predict_or_learn(&mut self, ec: &mut Example, learn: bool) -> Result<()> {
        let Self {
            base,
            increment,
            training,
            ..
        } = self;
        let train = learn && *training;

        let prediction = ec.swap_label(|ec, label| {
            let mut prediction = 1;
            let mut score = f32::MAX;

            for cost in label.costs_mut()?.costs.iter_mut() {
                ec.label = Label::Simple(if train && cost.is_known() {
                    SimpleLabel::new(cost.cost, 1.)
                } else {
                    SimpleLabel::unknown()
                });
                ec.partial_prediction = 0.;

                ec.with_offset(class_offset(*increment, cost.class), |ec| {
                    if learn { base.learn(ec) } else { base.predict(ec) }
                })?;

                let pp = ec.partial_prediction;
                cost.partial_prediction = pp;
                if pp < score || (pp == score && cost.class < prediction) {
                    score = pp;
                    prediction = cost.class;
                }
                ec.partial_prediction = 0.;
            }
            Ok(prediction)
        })?;

        ec.predicted_class = prediction;
        Ok(())
    }
}

impl<B: BaseLearner> BaseLearner for Csoaa<B> {
    fn learn(&mut self, ec: &mut Example) -> Result<()> {
        self.predict_or_learn(ec, true)
    }

    fn predict(&mut self, ec: &mut Example) -> Result<()> {
        self.predict_or_learn(ec, false)
    }

    fn finish(&mut self) -> Result<()> {
        self.base.finish()
    }
}

impl<B: BaseLearner> Reduction for Csoaa<B> {
    fn process(&mut self, mut ec: Example, out: &mut Output) -> Result<()> {
        ec.label.costs_mut()?.sanitize(Some(self.num_classes));

        if ec.is_label_definition() || ec.is_example_header() {
            warn!("label definitions and example headers need label-dependent features, skipping");
            out.retire(ec);
            return Ok(());
        }

        self.learn(&mut ec)?;
        out.cost_sensitive(&ec)?;
        out.retire(ec);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        BaseLearner::finish(self)
    }
}
