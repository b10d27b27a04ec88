use std::{hint, thread};

use log::{debug, info};

use crate::{
    error::Result,
    example::Example,
    output::{Output, Stats},
    reductions::Reduction,
};

/// Amount of busy polls on a pending source before yielding the thread.
const SPINS_BEFORE_YIELD: u32 = 64;

/// The outcome of asking a source for its next example.
#[derive(Debug)]
pub enum Fetch {
    Ready(Example),
    /// Nothing is available yet but more examples will follow.
    Pending,
    /// The stream is exhausted.
    Done,
}

/// A producer of examples, possibly running on another thread.
pub trait ExampleSource {
    /// Returns the next example without blocking for long.
    fn next_example(&mut self) -> Fetch;

    /// Takes back an example the learner is done with so its buffers can be reused.
    fn recycle(&mut self, _ec: Example) {}
}

/// Drives a reduction stack over a stream of examples.
///
/// Examples are processed strictly in arrival order by the calling thread.
pub struct Session {
    reduction: Box<dyn Reduction>,
    output: Output,
    /// Running sum of label weights, the clock stamped on every example.
    example_t: f64,
}

impl Session {
    /// Creates a new `Session`.
    ///
    /// # Arguments
    /// * `reduction` - The top of the learner stack.
    /// * `output` - Where predictions and statistics are reported.
    /// * `initial_t` - The starting value of the example clock.
    pub fn new(reduction: Box<dyn Reduction>, output: Output, initial_t: f32) -> Self {
        Self {
            reduction,
            output,
            example_t: f64::from(initial_t),
        }
    }

    pub fn stats(&self) -> &Stats {
        self.output.stats()
    }

    /// Pulls every example out of `source` and hands it to the reduction stack.
    ///
    /// The prediction writers are flushed even when the run fails, so
    /// everything produced up to the failure is kept.
    ///
    /// # Returns
    /// The final run statistics.
    pub fn run<S: ExampleSource + ?Sized>(&mut self, source: &mut S) -> Result<Stats> {
        let outcome = self.drive(source);
        let flushed = self.output.flush();
        outcome.and(flushed)?;

        let stats = self.output.stats();
        info!(
            "finished run: {} examples, weighted {:.1}, average loss {:.6}, {} features",
            stats.example_number,
            stats.weighted_examples,
            stats.average_loss(),
            stats.total_features,
        );
        Ok(stats.clone())
    }

    fn drive<S: ExampleSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        let mut spins = 0;

        loop {
            let mut ec = match source.next_example() {
                Fetch::Ready(ec) => ec,
                Fetch::Pending => {
                    spins += 1;
                    if spins < SPINS_BEFORE_YIELD {
                        hint::spin_loop();
                    } else {
                        thread::yield_now();
                    }
                    continue;
                }
                Fetch::Done => break,
            };
            spins = 0;

            self.example_t += f64::from(ec.label.weight());
            ec.example_t = self.example_t as f32;

            self.reduction.process(ec, &mut self.output)?;
            self.recycle(source);
        }

        debug!(example_t = self.example_t; "example stream exhausted");
        self.reduction.end_of_stream(&mut self.output)?;
        self.recycle(source);
        self.reduction.finish()
    }

    fn recycle<S: ExampleSource + ?Sized>(&mut self, source: &mut S) {
        for ec in self.output.drain_retired() {
            source.recycle(ec);
        }
    }
}
