use super::{BaseLearner, Reduction};
use crate::{error::Result, example::Example, output::Output};

/// Hands scalar examples straight to the base learner.
#[derive(Debug)]
pub struct Simple<B> {
    base: B,
}

impl<B: BaseLearner> Simple<B> {
    pub fn new(base: B) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &B {
        &self.base
    }
}

impl<B: BaseLearner> Reduction for Simple<B> {
    fn process(&mut self, mut ec: Example, out: &mut Output) -> Result<()> {
        self.base.learn(&mut ec)?;
        out.simple(&ec)?;
        out.retire(ec);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.base.finish()
    }
}
