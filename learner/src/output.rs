//! Run statistics, prediction writers and the hand-off of consumed examples.

use std::io::Write;

use log::{info, warn};

use crate::{
    error::Result,
    example::{CostLabel, Example, Label},
};

/// Running totals over every accounted example.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub weighted_examples: f64,
    pub example_number: u64,
    pub total_features: u64,
    pub sum_loss: f64,
    sum_loss_since_dump: f64,
    old_weighted_examples: f64,
    dump_interval: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            weighted_examples: 0.,
            example_number: 0,
            total_features: 0,
            sum_loss: 0.,
            sum_loss_since_dump: 0.,
            old_weighted_examples: 0.,
            dump_interval: std::f64::consts::E,
        }
    }
}

impl Stats {
    /// Returns the loss averaged over the weighted example count.
    pub fn average_loss(&self) -> f64 {
        if self.weighted_examples > 0. {
            self.sum_loss / self.weighted_examples
        } else {
            0.
        }
    }

    fn add_loss(&mut self, loss: f32) {
        self.sum_loss += f64::from(loss);
        self.sum_loss_since_dump += f64::from(loss);
    }

    /// Logs a progress line each time the weighted count doubles.
    fn report(&mut self, known: bool, prediction: f32, features: usize) {
        if self.weighted_examples <= self.dump_interval {
            return;
        }

        let since_last =
            self.sum_loss_since_dump / (self.weighted_examples - self.old_weighted_examples);
        info!(
            "{:<10.6} {:<10.6} {:>8} {:>8.1} {:>8} {:>8.4} {:>8}",
            self.average_loss(),
            since_last,
            self.example_number,
            self.weighted_examples,
            if known { "known" } else { "unknown" },
            prediction,
            features,
        );

        self.sum_loss_since_dump = 0.;
        self.old_weighted_examples = self.weighted_examples;
        self.dump_interval *= 2.;
    }
}

/// Where the reductions report the outcome of every example.
///
/// Examples a reduction is done with are handed back through `retire` so the
/// driver can return them to their source for reuse.
#[derive(Default)]
pub struct Output {
    stats: Stats,
    predictions: Option<Box<dyn Write + Send>>,
    raw_predictions: Option<Box<dyn Write + Send>>,
    retired: Vec<Example>,
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("stats", &self.stats)
            .field("predictions", &self.predictions.is_some())
            .field("raw_predictions", &self.raw_predictions.is_some())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one prediction per line to `writer`.
    pub fn with_predictions(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.predictions = Some(writer);
        self
    }

    /// Writes the per-class scores of cost-sensitive examples to `writer`.
    pub fn with_raw_predictions(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.raw_predictions = Some(writer);
        self
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Hands back an example the reduction no longer needs.
    pub fn retire(&mut self, ec: Example) {
        self.retired.push(ec);
    }

    /// Takes every retired example since the last call.
    pub fn drain_retired(&mut self) -> std::vec::Drain<'_, Example> {
        self.retired.drain(..)
    }

    fn write_prediction(&mut self, line: std::fmt::Arguments<'_>) -> Result<()> {
        if let Some(writer) = self.predictions.as_mut() {
            writer.write_fmt(line)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn write_raw(&mut self, costs: &CostLabel) -> Result<()> {
        let Some(writer) = self.raw_predictions.as_mut() else {
            return Ok(());
        };

        for (i, cost) in costs.costs.iter().enumerate() {
            if i > 0 {
                writer.write_all(b" ")?;
            }
            write!(writer, "{}:{}", cost.class, cost.partial_prediction)?;
        }
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Accounts a scalar example and writes its final prediction.
    pub fn simple(&mut self, ec: &Example) -> Result<()> {
        let label = ec.label.simple()?;

        self.stats.weighted_examples += f64::from(label.weight);
        self.stats.total_features += ec.num_features() as u64;
        self.stats.add_loss(ec.loss);
        self.stats.example_number += 1;

        self.write_prediction(format_args!("{}", ec.final_prediction))?;
        self.stats
            .report(label.label.is_some(), ec.final_prediction, ec.num_features());
        Ok(())
    }

    /// Accounts a cost-sensitive example, its loss being the regret of the
    /// predicted class against the cheapest one.
    pub fn cost_sensitive(&mut self, ec: &Example) -> Result<()> {
        let costs = ec.label.costs()?;
        let predicted = ec.predicted_class;

        let mut loss = 0.;
        if !costs.is_test() {
            let min = costs.costs.iter().map(|c| c.cost).fold(f32::MAX, f32::min);
            match costs.costs.iter().find(|c| c.class == predicted) {
                Some(chosen) => loss = chosen.cost - min,
                None => warn!(class = predicted; "predicted a class absent from the cost vector"),
            }
        }

        self.stats.weighted_examples += 1.;
        self.stats.total_features += ec.num_features() as u64;
        self.stats.add_loss(loss);
        self.stats.example_number += 1;

        self.write_prediction(format_args!("{predicted}"))?;
        self.write_raw(costs)?;
        self.stats
            .report(!costs.is_test(), predicted as f32, ec.num_features());
        Ok(())
    }

    /// Accounts one member of a label-dependent group.
    ///
    /// Only the first member whose cost list holds the predicted class
    /// contributes loss, `hit_loss` carries that across the group.
    fn ldf_member(&mut self, ec: &Example, hit_loss: &mut bool) -> Result<()> {
        if ec.is_newline() || ec.is_example_header() || ec.is_label_definition() {
            return Ok(());
        }
        let Label::Costs(costs) = &ec.label else {
            return Ok(());
        };

        self.stats.total_features += ec.num_features() as u64;

        if !costs.is_test() {
            let mut loss = 0.;
            if !*hit_loss
                && let Some(hit) = costs.costs.iter().find(|c| c.class == ec.predicted_class)
            {
                loss = hit.cost;
                *hit_loss = true;
            }
            self.stats.add_loss(loss);
        }

        self.write_prediction(format_args!("{}", ec.predicted_class))?;
        self.write_raw(costs)?;
        self.stats
            .report(!costs.is_test(), ec.predicted_class as f32, ec.num_features());
        Ok(())
    }

    /// Accounts a whole label-dependent group as a single example.
    pub fn ldf_sequence(&mut self, seq: &[Example]) -> Result<()> {
        if seq.is_empty() {
            return Ok(());
        }

        self.stats.weighted_examples += 1.;
        self.stats.example_number += 1;

        let mut hit_loss = false;
        for ec in seq {
            self.ldf_member(ec, &mut hit_loss)?;
        }

        if let Some(writer) = self.raw_predictions.as_mut() {
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Accounts a single line label-dependent example.
    pub fn ldf_single(&mut self, ec: &Example) -> Result<()> {
        if !ec.is_label_definition() {
            self.stats.weighted_examples += 1.;
            self.stats.example_number += 1;
        }
        self.ldf_member(ec, &mut false)
    }

    /// Separates two groups in the prediction output.
    pub fn newline(&mut self) -> Result<()> {
        if let Some(writer) = self.predictions.as_mut() {
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for writer in [self.predictions.as_mut(), self.raw_predictions.as_mut()]
            .into_iter()
            .flatten()
        {
            writer.flush()?;
        }
        Ok(())
    }
}
