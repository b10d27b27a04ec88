use log::warn;
use serde::{Deserialize, Serialize};

use super::{BaseLearner, LabelFeatureCache, Reduction, WapScratch};
use crate::{
    buffer::GrowableBuffer,
    error::{LearnErr, Result},
    example::{Cost, Example, Label, SimpleLabel},
    output::Output,
};

/// Pairs whose wap values differ by less than this aren't trained on.
const MIN_PAIR_WEIGHT: f32 = 1e-6;

/// How the per-class feature vectors reach the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LdfLayout {
    /// One example per line, class features come from label definitions.
    Singleline,
    /// One example per class, groups end with an empty example.
    Multiline,
}

/// Which reduction is applied over the class examples of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LdfAlgorithm {
    /// Every class regresses its cost.
    Oaa,
    /// Every pair of classes learns the sign of their cost difference.
    Wap,
}

/// Cost-sensitive learning with label-dependent features.
#[derive(Debug)]
pub struct Ldf<B> {
    base: B,
    layout: LdfLayout,
    algorithm: LdfAlgorithm,
    ring_size: usize,
    training: bool,
    seq: GrowableBuffer<Example>,
    need_to_clear: bool,
    label_cache: LabelFeatureCache,
    scratch: WapScratch,
    /// Amount of trained groups, used as the clock of every reduced call.
    example_t: f32,
}

/// Whether a group holds label definitions rather than class examples.
///
/// # Errors
/// `MixedLabelDefinitions` if both kinds appear, a trailing newline excepted.
fn is_label_definition_seq(seq: &[Example]) -> Result<bool> {
    let Some(first) = seq.first() else {
        return Ok(false);
    };

    let is_definition = first.is_label_definition();
    for (i, ec) in seq.iter().enumerate().skip(1) {
        if ec.is_label_definition() != is_definition && !(i == seq.len() - 1 && ec.is_newline()) {
            return Err(LearnErr::MixedLabelDefinitions);
        }
    }
    Ok(is_definition)
}

/// Validates the class examples of a group and tells whether it's a test group.
///
/// # Arguments
/// * `seq` - The class examples, the header already split off.
/// * `start` - The position of `seq[0]` within the whole group.
fn check_group(seq: &[Example], start: usize) -> Result<bool> {
    let mut is_test = seq.first().is_none_or(Example::is_test);
    let mut warned = false;

    for (k, ec) in seq.iter().enumerate() {
        ec.label.costs()?;

        if ec.is_test() != is_test && !warned {
            warn!("label-dependent group mixes train and test examples, treating it as test");
            is_test = true;
            warned = true;
        }

        if ec.is_example_header() {
            return Err(LearnErr::HeaderNotFirst {
                position: start + k,
            });
        }
    }
    Ok(is_test)
}

fn costs_of(ec: &Example) -> &[Cost] {
    match &ec.label {
        Label::Costs(label) => label.costs.as_slice(),
        Label::Simple(_) => &[],
    }
}

/// Scores every class of `ec` with its cached label features, tracking the
/// cheapest class across the group.
fn make_single_prediction<B: BaseLearner>(
    base: &mut B,
    cache: &LabelFeatureCache,
    ec: &mut Example,
    prediction: &mut u32,
    min_score: &mut f32,
) -> Result<()> {
    ec.swap_label(|ec, label| {
        for cost in label.costs_mut()?.costs.iter_mut() {
            ec.label = Label::Simple(SimpleLabel::unknown());
            ec.partial_prediction = 0.;
            cache.with_label_features(ec, cost.class, |ec| base.predict(ec))?;

            cost.partial_prediction = ec.partial_prediction;
            if ec.partial_prediction < *min_score {
                *min_score = ec.partial_prediction;
                *prediction = cost.class;
            }
        }
        Ok(())
    })
}

impl<B: BaseLearner> Ldf<B> {
    /// Creates a new `Ldf` reduction.
    ///
    /// # Arguments
    /// * `base` - The learner every class or pair is reduced to.
    /// * `layout` - Whether classes come as lines of a group or from label definitions.
    /// * `algorithm` - The reduction applied over the classes.
    /// * `ring_size` - The bound on buffered examples, longer groups are split.
    /// * `training` - Whether known costs are trained on.
    pub fn new(
        base: B,
        layout: LdfLayout,
        algorithm: LdfAlgorithm,
        ring_size: usize,
        training: bool,
    ) -> Self {
        Self {
            base,
            layout,
            algorithm,
            ring_size,
            training,
            seq: GrowableBuffer::new(),
            need_to_clear: false,
            label_cache: LabelFeatureCache::new(),
            scratch: WapScratch::new(),
            example_t: 0.,
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn label_cache(&self) -> &LabelFeatureCache {
        &self.label_cache
    }

    /// Learns from a whole group: label definitions, an optional shared header
    /// and the class examples.
    fn learn_sequence(&mut self, seq: &mut [Example]) -> Result<()> {
        if seq.is_empty() {
            return Ok(());
        }

        if is_label_definition_seq(seq)? {
            for ec in seq.iter() {
                self.label_cache.define_from(ec)?;
            }
            return Ok(());
        }

        let start = usize::from(seq[0].is_example_header());
        let (head, rest) = seq.split_at_mut(start);
        if rest.is_empty() {
            return Ok(());
        }

        let header = head.first();
        if let Some(header) = header {
            for ec in rest.iter_mut() {
                ec.add_namespaces_from(header);
            }
        }

        let learned = match self.algorithm {
            LdfAlgorithm::Oaa => self.learn_oaa(rest, start),
            LdfAlgorithm::Wap => self.learn_wap(rest, start),
        };

        let restored = header.map_or(Ok(()), |header| {
            rest.iter_mut()
                .try_for_each(|ec| ec.remove_namespaces_from(header))
        });
        learned.and(restored)
    }

    /// Predicts every class of the group, returning the cheapest one.
    fn predict_group(&mut self, seq: &mut [Example]) -> Result<u32> {
        let (mut prediction, mut min_score) = (0, f32::MAX);
        for ec in seq.iter_mut() {
            make_single_prediction(
                &mut self.base,
                &self.label_cache,
                ec,
                &mut prediction,
                &mut min_score,
            )?;
        }
        Ok(prediction)
    }

    fn learn_oaa(&mut self, seq: &mut [Example], start: usize) -> Result<()> {
        let is_test = check_group(seq, start)?;
        let prediction = self.predict_group(seq)?;

        let train = self.training && !is_test;
        if train {
            self.example_t += 1.;
        }

        let Self {
            base,
            label_cache,
            example_t,
            ..
        } = self;

        for ec in seq.iter_mut() {
            ec.swap_label(|ec, label| {
                let costs = &label.costs()?.costs;
                let mut is_me = false;

                for cost in costs.iter() {
                    if train {
                        ec.label = Label::Simple(if cost.is_known() {
                            SimpleLabel::new(cost.cost, 1.)
                        } else {
                            SimpleLabel::unknown()
                        });
                        ec.partial_prediction = 0.;
                        ec.with_example_t(*example_t, |ec| {
                            label_cache.with_label_features(ec, cost.class, |ec| base.learn(ec))
                        })?;
                    }

                    ec.partial_prediction = cost.partial_prediction;
                    is_me |= cost.class == prediction;
                }

                ec.predicted_class = if is_me { prediction } else { 0 };
                if let (true, [only]) = (is_test, costs.as_slice()) {
                    ec.final_prediction = only.partial_prediction;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn assign_wap_values(&mut self, seq: &mut [Example]) {
        let values = self
            .scratch
            .compute(seq.iter().flat_map(|ec| costs_of(ec).iter().map(|c| c.cost)));

        let mut values = values.iter();
        for ec in seq.iter_mut() {
            if let Label::Costs(label) = &mut ec.label {
                for (cost, &value) in label.costs.iter_mut().zip(values.by_ref()) {
                    cost.wap_value = value;
                }
            }
        }
    }

    fn learn_wap(&mut self, seq: &mut [Example], start: usize) -> Result<()> {
        let is_test = check_group(seq, start)?;
        let prediction = self.predict_group(seq)?;

        let train = self.training && !is_test;
        if train {
            self.assign_wap_values(seq);
            self.example_t += 1.;
        }

        let Self {
            base,
            label_cache,
            example_t,
            ..
        } = self;

        for k1 in 0..seq.len() {
            let (left, right) = seq.split_at_mut(k1 + 1);
            let ec1 = &mut left[k1];

            ec1.swap_label(|ec1, label1| {
                let mut is_me = false;

                for c1 in label1.costs()?.costs.iter() {
                    if train {
                        label_cache.with_label_features(ec1, c1.class, |ec1| {
                            for ec2 in right.iter_mut() {
                                for j2 in 0..costs_of(ec2).len() {
                                    let c2 = costs_of(ec2)[j2];
                                    let diff = (c2.wap_value - c1.wap_value).abs();
                                    if diff < MIN_PAIR_WEIGHT {
                                        continue;
                                    }

                                    let y = if c1.cost < c2.cost { -1. } else { 1. };
                                    label_cache.with_label_features(ec2, c2.class, |ec2| {
                                        ec1.label = Label::Simple(SimpleLabel::new(y, diff));
                                        ec1.partial_prediction = 0.;
                                        ec1.with_example_t(*example_t, |ec1| {
                                            ec1.with_subtracted(ec2, |ec1| base.learn(ec1))
                                        })
                                    })?;
                                }
                            }
                            Ok(())
                        })?;
                    }

                    is_me |= c1.class == prediction;
                }

                ec1.predicted_class = if is_me { prediction } else { 0 };
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Learns the buffered group in place.
    fn learn_buffered(&mut self) -> Result<()> {
        let mut seq = std::mem::take(&mut self.seq);
        let learned = self.learn_sequence(&mut seq);
        self.seq = seq;
        learned
    }

    /// Reports the buffered group and hands its examples back.
    fn flush_sequence(&mut self, out: &mut Output) -> Result<()> {
        if self.seq.first().is_some_and(|ec| !ec.is_label_definition()) {
            out.ldf_sequence(&self.seq)?;
        }

        for ec in self.seq.drain() {
            out.retire(ec);
        }
        self.need_to_clear = false;
        Ok(())
    }

    fn learn_single(&mut self, ec: &mut Example) -> Result<()> {
        if !self.training || ec.is_test() {
            ec.predicted_class = self.predict_group(std::slice::from_mut(ec))?;
            return Ok(());
        }
        self.learn_sequence(std::slice::from_mut(ec))
    }

    fn process_singleline(&mut self, mut ec: Example, out: &mut Output) -> Result<()> {
        if ec.is_example_header() {
            return Err(LearnErr::HeaderInSingleLine);
        }

        self.learn_single(&mut ec)?;
        out.ldf_single(&ec)?;
        out.retire(ec);
        Ok(())
    }

    fn process_multiline(&mut self, mut ec: Example, out: &mut Output) -> Result<()> {
        if self.seq.len() >= self.ring_size.saturating_sub(2) {
            if self.seq.first().is_some_and(|first| first.pass == 0) {
                warn!(
                    length = self.seq.len();
                    "label-dependent group exceeds the ring size, breaking it apart"
                );
            }
            self.learn_buffered()?;
            self.need_to_clear = true;
        }

        if self.need_to_clear {
            self.flush_sequence(out)?;
        }

        if ec.is_newline() {
            self.learn_buffered()?;
            let is_definition = self.seq.first().is_some_and(Example::is_label_definition);
            self.flush_sequence(out)?;
            if !is_definition {
                out.newline()?;
            }
            out.retire(ec);
        } else if ec.is_label_definition() {
            if !self.seq.is_empty() {
                warn!("label definition encountered in a data group, learning it on its own");
            }
            self.learn_single(&mut ec)?;
            out.retire(ec);
        } else {
            self.seq.push(ec);
        }
        Ok(())
    }
}

impl<B: BaseLearner> Reduction for Ldf<B> {
    fn process(&mut self, mut ec: Example, out: &mut Output) -> Result<()> {
        ec.label.costs_mut()?.sanitize(None);

        match self.layout {
            LdfLayout::Singleline => self.process_singleline(ec, out),
            LdfLayout::Multiline => self.process_multiline(ec, out),
        }
    }

    fn end_of_stream(&mut self, out: &mut Output) -> Result<()> {
        if self.layout == LdfLayout::Multiline {
            self.learn_buffered()?;
            self.flush_sequence(out)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.label_cache.clear();
        self.base.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        example::{CostLabel, Feature, LABEL_NAMESPACE, WAP_LDF_NAMESPACE},
        reductions::testing::Recorder,
    };

    fn class_example(ns: u8, index: u64, costs: &[(u32, f32)]) -> Example {
        let mut ec = Example::new();
        ec.add_namespace(ns, &[Feature::new(index, 1.)]);
        ec.label = Label::Costs(CostLabel::new(
            costs.iter().map(|&(class, cost)| Cost::new(class, cost)),
        ));
        ec
    }

    fn newline() -> Example {
        let mut ec = Example::new();
        ec.label = Label::Costs(CostLabel::default());
        ec
    }

    fn ldf(layout: LdfLayout, algorithm: LdfAlgorithm) -> Ldf<Recorder> {
        // the score of a feature is its index
        Ldf::new(Recorder::new(|i| i as f32), layout, algorithm, 256, true)
    }

    fn group() -> Vec<Example> {
        vec![
            class_example(b'a', 3, &[(1, 0.)]),
            class_example(b'a', 1, &[(2, 1.)]),
            class_example(b'a', 2, &[(3, 2.)]),
        ]
    }

    #[test]
    fn test_multiline_oaa_learns_each_class() {
        let mut ldf = ldf(LdfLayout::Multiline, LdfAlgorithm::Oaa);
        let mut out = Output::new();

        for ec in group() {
            ldf.process(ec, &mut out).unwrap();
        }
        assert!(ldf.base().calls.is_empty());

        ldf.process(newline(), &mut out).unwrap();

        let learned: Vec<_> = ldf.base().learned().collect();
        assert_eq!(learned.len(), 3);
        assert_eq!(
            learned.iter().map(|c| c.label).collect::<Vec<_>>(),
            vec![Some(0.), Some(1.), Some(2.)]
        );
        assert!(learned.iter().all(|c| c.example_t == 1.));

        let retired: Vec<_> = out.drain_retired().collect();
        assert_eq!(retired.len(), 4);
        // class 2 has the smallest score
        assert_eq!(
            retired.iter().map(|ec| ec.predicted_class).collect::<Vec<_>>(),
            vec![0, 2, 0, 0]
        );
        assert_eq!(out.stats().example_number, 1);
        assert_eq!(out.stats().sum_loss, 1.);
    }

    #[test]
    fn test_header_features_are_shared_then_removed() {
        let mut ldf = ldf(LdfLayout::Multiline, LdfAlgorithm::Oaa);
        let mut out = Output::new();

        ldf.process(class_example(b'h', 100, &[(0, -1.)]), &mut out)
            .unwrap();
        for ec in group() {
            ldf.process(ec, &mut out).unwrap();
        }
        ldf.process(newline(), &mut out).unwrap();

        let learned: Vec<_> = ldf.base().learned().collect();
        assert_eq!(learned.len(), 3);
        assert_eq!(learned[0].features, vec![(3, 1.), (100, 1.)]);

        for ec in out.drain_retired().skip(1).take(3) {
            assert!(!ec.is_active(b'h'));
            assert_eq!(ec.num_features(), 1);
        }
    }

    #[test]
    fn test_header_after_first_position_is_fatal() {
        let mut ldf = ldf(LdfLayout::Multiline, LdfAlgorithm::Oaa);
        let mut out = Output::new();

        ldf.process(class_example(b'a', 1, &[(1, 0.)]), &mut out)
            .unwrap();
        ldf.process(class_example(b'h', 100, &[(0, -1.)]), &mut out)
            .unwrap();

        assert!(matches!(
            ldf.process(newline(), &mut out),
            Err(LearnErr::HeaderNotFirst { position: 1 })
        ));
    }

    #[test]
    fn test_mixed_label_definitions_are_fatal() {
        let mut ldf = ldf(LdfLayout::Multiline, LdfAlgorithm::Oaa);
        let mut seq = vec![
            class_example(LABEL_NAMESPACE, 7, &[(1, -1.)]),
            class_example(b'a', 1, &[(1, 0.)]),
        ];

        assert!(matches!(
            ldf.learn_sequence(&mut seq),
            Err(LearnErr::MixedLabelDefinitions)
        ));
    }

    #[test]
    fn test_label_definitions_feed_singleline_examples() {
        let mut ldf = ldf(LdfLayout::Singleline, LdfAlgorithm::Oaa);
        let mut out = Output::new();

        ldf.process(class_example(LABEL_NAMESPACE, 7, &[(1, -1.)]), &mut out)
            .unwrap();
        ldf.process(class_example(LABEL_NAMESPACE, 9, &[(1, -1.), (2, -1.)]), &mut out)
            .unwrap();
        assert_eq!(ldf.label_cache().len(), 2);
        assert_eq!(ldf.label_cache().get(1), Some(&[Feature::new(7, 1.)][..]));

        ldf.process(class_example(b'a', 1, &[(1, 1.), (2, 0.)]), &mut out)
            .unwrap();

        let learned: Vec<_> = ldf.base().learned().collect();
        assert_eq!(learned.len(), 2);
        assert_eq!(learned[0].features, vec![(1, 1.), (7, 1.)]);
        assert_eq!(learned[1].features, vec![(1, 1.), (9, 1.)]);

        let retired: Vec<_> = out.drain_retired().collect();
        assert_eq!(retired[2].predicted_class, 1);
        assert!(!retired[2].is_active(LABEL_NAMESPACE));
        // the two label definitions aren't counted
        assert_eq!(out.stats().example_number, 1);
    }

    #[test]
    fn test_singleline_header_is_fatal() {
        let mut ldf = ldf(LdfLayout::Singleline, LdfAlgorithm::Oaa);
        assert!(matches!(
            ldf.process(class_example(b'h', 1, &[(0, -1.)]), &mut Output::new()),
            Err(LearnErr::HeaderInSingleLine)
        ));
    }

    #[test]
    fn test_train_test_mix_is_treated_as_test() {
        let mut ldf = ldf(LdfLayout::Multiline, LdfAlgorithm::Oaa);
        let mut out = Output::new();

        ldf.process(class_example(b'a', 1, &[(1, 0.)]), &mut out)
            .unwrap();
        ldf.process(class_example(b'a', 2, &[(2, f32::MAX)]), &mut out)
            .unwrap();
        ldf.process(newline(), &mut out).unwrap();

        assert_eq!(ldf.base().learned().count(), 0);
        assert_eq!(ldf.base().calls.len(), 2);
    }

    #[test]
    fn test_long_group_is_split_at_ring_size() {
        let mut ldf = Ldf::new(
            Recorder::new(|_| 0.),
            LdfLayout::Multiline,
            LdfAlgorithm::Oaa,
            4,
            true,
        );
        let mut out = Output::new();

        for ec in group() {
            ldf.process(ec, &mut out).unwrap();
        }

        assert_eq!(out.stats().example_number, 1);
        assert_eq!(out.drain_retired().count(), 2);

        ldf.end_of_stream(&mut out).unwrap();
        assert_eq!(out.stats().example_number, 2);
        assert_eq!(out.drain_retired().count(), 1);
    }

    #[test]
    fn test_wap_trains_on_example_differences() {
        let mut ldf = ldf(LdfLayout::Multiline, LdfAlgorithm::Wap);
        let mut out = Output::new();

        for ec in [
            class_example(b'a', 1, &[(1, 0.)]),
            class_example(b'a', 2, &[(2, 1.)]),
            class_example(b'a', 3, &[(3, 1.)]),
        ] {
            ldf.process(ec, &mut out).unwrap();
        }
        ldf.process(newline(), &mut out).unwrap();

        let learned: Vec<_> = ldf.base().learned().collect();
        assert_eq!(learned.len(), 2);
        assert!(learned.iter().all(|c| c.label == Some(-1.) && c.weight == 1.));
        assert!(learned.iter().all(|c| c.example_t == 1.));
        assert_eq!(learned[0].features, vec![(1, 1.), (2, -1.)]);
        assert_eq!(learned[1].features, vec![(1, 1.), (3, -1.)]);

        let retired: Vec<_> = out.drain_retired().collect();
        assert!(retired.iter().all(|ec| !ec.is_active(WAP_LDF_NAMESPACE)));
        assert_eq!(retired[0].predicted_class, 1);
    }
}
