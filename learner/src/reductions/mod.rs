//! Learning reductions: complex problems solved through repeated calls to a
//! simpler base learner on examples rewritten in place.

mod csoaa;
mod label_dict;
mod ldf;
mod simple;
mod wap;

use serde::{Deserialize, Serialize};

pub use csoaa::Csoaa;
pub use label_dict::LabelFeatureCache;
pub use ldf::{Ldf, LdfAlgorithm, LdfLayout};
pub use simple::Simple;
pub use wap::{Wap, WapScratch};

use crate::{
    error::{LearnErr, Result},
    example::Example,
    output::Output,
};

/// A learner that can be stacked beneath a reduction.
///
/// Implementations read a label of the kind they expect from the example and
/// leave their score in `partial_prediction` and `final_prediction`.
pub trait BaseLearner {
    /// Predicts and, when the label allows it, updates on `ec`.
    fn learn(&mut self, ec: &mut Example) -> Result<()>;

    /// Predicts on `ec` without updating.
    fn predict(&mut self, ec: &mut Example) -> Result<()>;

    /// Flushes any pending state at the end of the run.
    fn finish(&mut self) -> Result<()>;
}

impl<B: BaseLearner + ?Sized> BaseLearner for Box<B> {
    fn learn(&mut self, ec: &mut Example) -> Result<()> {
        (**self).learn(ec)
    }

    fn predict(&mut self, ec: &mut Example) -> Result<()> {
        (**self).predict(ec)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// The top of a learner stack as seen by the session driver.
///
/// A reduction takes ownership of every pulled example and hands it back
/// through `Output::retire` once it's done with it, possibly later when the
/// example belongs to a group still being read.
pub trait Reduction {
    fn process(&mut self, ec: Example, out: &mut Output) -> Result<()>;

    /// Called once the source is exhausted to flush any buffered examples.
    fn end_of_stream(&mut self, _out: &mut Output) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()>;
}

/// Which reduction sits on top of the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReductionKind {
    /// Regression or binary classification straight on the optimizer.
    #[default]
    Simple,
    Csoaa {
        classes: u32,
    },
    Wap {
        classes: u32,
    },
    Ldf {
        layout: LdfLayout,
        algorithm: LdfAlgorithm,
    },
}

/// The reduction configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub strategy: ReductionKind,
    /// Bound on the amount of examples buffered by a label-dependent group.
    pub ring_size: usize,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            strategy: ReductionKind::default(),
            ring_size: 256,
        }
    }
}

impl ReductionConfig {
    /// Amount of classes used to sanitize cost labels, `None` when unbounded.
    pub fn num_classes(&self) -> Option<u32> {
        match self.strategy {
            ReductionKind::Csoaa { classes } | ReductionKind::Wap { classes } => Some(classes),
            ReductionKind::Simple | ReductionKind::Ldf { .. } => None,
        }
    }

    /// Whether examples carry cost-sensitive labels.
    pub fn is_cost_sensitive(&self) -> bool {
        !matches!(self.strategy, ReductionKind::Simple)
    }

    pub fn is_ldf(&self) -> bool {
        matches!(self.strategy, ReductionKind::Ldf { .. })
    }

    /// Checks the configuration against the weight array size.
    pub fn validate(&self, num_bits: u32) -> Result<()> {
        if let Some(classes) = self.num_classes()
            && (classes == 0 || u64::from(classes) > 1u64 << num_bits)
        {
            return Err(LearnErr::InvalidConfig(format!(
                "{classes} classes don't fit in {num_bits} bits of weights"
            )));
        }

        if self.ring_size < 3 {
            return Err(LearnErr::InvalidConfig(format!(
                "ring_size must be at least 3, got {}",
                self.ring_size
            )));
        }
        Ok(())
    }

    /// Stacks the configured reduction on top of `base`.
    ///
    /// # Arguments
    /// * `base` - The learner every reduced call goes to.
    /// * `num_bits` - The bit width of the weight array, used to split it per class.
    /// * `training` - Whether labels are trained on or only predicted.
    pub fn build<B>(&self, base: B, num_bits: u32, training: bool) -> Result<Box<dyn Reduction>>
    where
        B: BaseLearner + 'static,
    {
        self.validate(num_bits)?;

        let reduction: Box<dyn Reduction> = match self.strategy {
            ReductionKind::Simple => Box::new(Simple::new(base)),
            ReductionKind::Csoaa { classes } => {
                Box::new(Csoaa::new(base, classes, num_bits, training))
            }
            ReductionKind::Wap { classes } => Box::new(Wap::new(base, classes, num_bits)),
            ReductionKind::Ldf { layout, algorithm } => Box::new(Ldf::new(
                base,
                layout,
                algorithm,
                self.ring_size,
                training,
            )),
        };
        Ok(reduction)
    }
}

/// Returns the weight offset separating the `classes` slices of a `num_bits` array.
pub(crate) fn class_increment(classes: u32, num_bits: u32) -> u64 {
    (1u64 << num_bits) / u64::from(classes.max(1))
}

/// Returns the offset of the slice belonging to `class`, classes start at 1.
pub(crate) fn class_offset(increment: u64, class: u32) -> u64 {
    increment.wrapping_mul(u64::from(class.saturating_sub(1)))
}
