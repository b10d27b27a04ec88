use log::warn;

use super::{BaseLearner, Reduction, class_increment, class_offset};
use crate::{
    buffer::GrowableBuffer,
    error::Result,
    example::{Cost, Example, Label, SimpleLabel},
    output::Output,
};

/// Pairs whose wap values differ by less than this aren't trained on.
const MIN_PAIR_WEIGHT: f32 = 1e-5;

/// Reusable buffers for computing wap values.
#[derive(Debug, Default)]
pub struct WapScratch {
    ranked: GrowableBuffer<(usize, f32)>,
    values: GrowableBuffer<f32>,
}

impl WapScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the wap value of every cost.
    ///
    /// With the costs sorted ascending, `v[0] = 0` and
    /// `v[i] = v[i - 1] + (c[i] - c[i - 1]) / i`. The returned values are
    /// indexed like the given costs.
    pub fn compute(&mut self, costs: impl IntoIterator<Item = f32>) -> &[f32] {
        self.ranked.erase();
        for (position, cost) in costs.into_iter().enumerate() {
            self.ranked.push((position, cost));
        }
        self.ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        self.values.erase();
        self.values.resize_default(self.ranked.len());

        let mut previous: Option<(f32, f32)> = None;
        for (rank, &(position, cost)) in self.ranked.iter().enumerate() {
            let value = match previous {
                None => 0.,
                Some((last_cost, last_value)) => last_value + (cost - last_cost) / rank as f32,
            };
            self.values[position] = value;
            previous = Some((cost, value));
        }

        &self.values
    }
}

/// Weighted all pairs.
///
/// Every pair of classes with distinct wap values becomes one binary problem
/// over the difference of the two class slices, the prediction is the class
/// scoring highest on its own slice.
#[derive(Debug)]
pub struct Wap<B> {
    base: B,
    num_classes: u32,
    increment: u64,
    known: GrowableBuffer<Cost>,
    scratch: WapScratch,
}

impl<B: BaseLearner> Wap<B> {
    /// Creates a new `Wap` reduction.
    ///
    /// # Arguments
    /// * `base` - The binary classifier pairs are learned with.
    /// * `num_classes` - The amount of classes `K`.
    /// * `num_bits` - The bit width of the weight array split between classes.
    pub fn new(base: B, num_classes: u32, num_bits: u32) -> Self {
        Self {
            base,
            num_classes,
            increment: class_increment(num_classes, num_bits),
            known: GrowableBuffer::new(),
            scratch: WapScratch::new(),
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    /// Scores every class on its own slice, storing the negated score in the label.
    fn test(&mut self, ec: &mut Example) -> Result<u32> {
        let Self {
            base, increment, ..
        } = self;

        ec.swap_label(|ec, label| {
            let mut prediction = 1;
            let mut score = -f32::MAX;

            for cost in label.costs_mut()?.costs.iter_mut() {
                ec.label = Label::Simple(SimpleLabel::unknown());
                ec.partial_prediction = 0.;
                ec.with_offset(class_offset(*increment, cost.class), |ec| base.predict(ec))?;

                if ec.partial_prediction > score {
                    score = ec.partial_prediction;
                    prediction = cost.class;
                }
                cost.partial_prediction = -ec.partial_prediction;
            }
            Ok(prediction)
        })
    }

    fn train(&mut self, ec: &mut Example) -> Result<()> {
        let Self {
            base,
            increment,
            known,
            scratch,
            ..
        } = self;

        ec.swap_label(|ec, label| {
            known.erase();
            for cost in label.costs()?.costs.iter().filter(|c| c.is_known()) {
                known.push(*cost);
            }
            known.sort_by_key(|c| c.class);

            let values = scratch.compute(known.iter().map(|c| c.cost));
            for i in 0..known.len() {
                for j in i + 1..known.len() {
                    let weight = (values[i] - values[j]).abs();
                    if weight <= MIN_PAIR_WEIGHT {
                        continue;
                    }

                    let y = if values[i] < values[j] { 1. } else { -1. };
                    ec.label = Label::Simple(SimpleLabel::new(y, weight));
                    ec.partial_prediction = 0.;

                    let offset_i = class_offset(*increment, known[i].class);
                    let offset_j = class_offset(*increment, known[j].class);
                    ec.with_mirrored(offset_i, offset_j, |ec| base.learn(ec))?;
                }
            }
            Ok(())
        })
    }
}

impl<B: BaseLearner> BaseLearner for Wap<B> {
    fn learn(&mut self, ec: &mut Example) -> Result<()> {
        let prediction = self.test(ec)?;
        if !ec.label.costs()?.costs.is_empty() {
            self.train(ec)?;
        }
        ec.predicted_class = prediction;
        Ok(())
    }

    fn predict(&mut self, ec: &mut Example) -> Result<()> {
        ec.predicted_class = self.test(ec)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.base.finish()
    }
}

impl<B: BaseLearner> Reduction for Wap<B> {
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
