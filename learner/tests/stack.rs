use std::collections::VecDeque;

use learner::{
    Cost, CostLabel, Example, ExampleSource, Feature, Fetch, Gd, GdConfig, Label, Output,
    ReductionConfig, ReductionKind, Session, SimpleLabel,
    reductions::{LdfAlgorithm, LdfLayout},
};

/// Serves a fixed list of examples and keeps what comes back.
struct Replay {
    pending: VecDeque<Example>,
    recycled: Vec<Example>,
}

impl Replay {
    fn new(examples: Vec<Example>) -> Self {
        Self {
            pending: examples.into(),
            recycled: Vec::new(),
        }
    }
}

impl ExampleSource for Replay {
    fn next_example(&mut self) -> Fetch {
        match self.pending.pop_front() {
            Some(ec) => Fetch::Ready(ec),
            None => Fetch::Done,
        }
    }

    fn recycle(&mut self, ec: Example) {
        self.recycled.push(ec);
    }
}

fn costs(costs: &[(u32, f32)]) -> Label {
    Label::Costs(CostLabel::new(
        costs.iter().map(|&(class, cost)| Cost::new(class, cost)),
    ))
}

fn with_features(ns: u8, index: u64, label: Label) -> Example {
    let mut ec = Example::new();
    ec.add_namespace(ns, &[Feature::new(index, 1.)]);
    ec.label = label;
    ec
}

fn newline() -> Example {
    let mut ec = Example::new();
    ec.label = costs(&[]);
    ec
}

fn gd() -> Gd {
    Gd::new(GdConfig {
        num_bits: Some(12),
        ..Default::default()
    })
    .unwrap()
}

fn run(strategy: ReductionKind, examples: Vec<Example>) -> (learner::Stats, Vec<Example>) {
    let reduction = ReductionConfig {
        strategy,
        ..Default::default()
    }
    .build(gd(), 12, true)
    .unwrap();

    let mut source = Replay::new(examples);
    let stats = Session::new(reduction, Output::new(), 0.)
        .run(&mut source)
        .unwrap();
    (stats, source.recycled)
}

#[test]
fn simple_regression_converges() {
    let examples = (0..100)
        .map(|_| with_features(b'a', 3, Label::Simple(SimpleLabel::new(0.75, 1.))))
        .collect();

    let (stats, recycled) = run(ReductionKind::Simple, examples);

    assert_eq!(stats.example_number, 100);
    assert_eq!(recycled.len(), 100);
    let last = recycled.last().unwrap();
    assert!((last.final_prediction - 0.75).abs() < 0.05);
}

#[test]
fn csoaa_separates_two_classes() {
    let examples = (0..200)
        .map(|i| {
            if i % 2 == 0 {
                with_features(b'a', 1, costs(&[(1, 0.), (2, 1.)]))
            } else {
                with_features(b'a', 2, costs(&[(1, 1.), (2, 0.)]))
            }
        })
        .collect();

    let (stats, recycled) = run(ReductionKind::Csoaa { classes: 2 }, examples);

    for (i, ec) in recycled.iter().enumerate().skip(180) {
        let expected = if i % 2 == 0 { 1 } else { 2 };
        assert_eq!(ec.predicted_class, expected);
    }
    assert!(stats.average_loss() < 0.5);
}

#[test]
fn wap_separates_three_classes() {
    let examples = (0..300)
        .map(|i| {
            let best = i % 3 + 1;
            let label = costs(
                &(1..=3)
                    .map(|class| (class, if class == best { 0. } else { 1. }))
                    .collect::<Vec<_>>(),
            );
            with_features(b'a', u64::from(best) * 7, label)
        })
        .collect();

    let (_, recycled) = run(ReductionKind::Wap { classes: 3 }, examples);

    for (i, ec) in recycled.iter().enumerate().skip(270) {
        assert_eq!(ec.predicted_class, (i % 3 + 1) as u32);
    }
}

#[test]
fn ldf_multiline_picks_the_cheap_action() {
    let mut examples = Vec::new();
    for i in 0..100 {
        let good_first = i % 2 == 0;
        let (first, second) = if good_first { (10, 20) } else { (20, 10) };
        let cost = |index| if index == 10 { 0. } else { 1. };

        examples.push(with_features(b's', 5, costs(&[(0, -1.)])));
        examples.push(with_features(b'a', first, costs(&[(1, cost(first))])));
        examples.push(with_features(b'a', second, costs(&[(2, cost(second))])));
        examples.push(newline());
    }

    let strategy = ReductionKind::Ldf {
        layout: LdfLayout::Multiline,
        algorithm: LdfAlgorithm::Oaa,
    };
    let (stats, recycled) = run(strategy, examples);

    assert_eq!(stats.example_number, 100);
    assert_eq!(recycled.len(), 400);

    let last_groups: Vec<_> = recycled.chunks(4).skip(90).collect();
    for group in last_groups {
        let chosen: Vec<_> = group.iter().map(|ec| ec.predicted_class).collect();
        let good = group
            .iter()
            .position(|ec| ec.features(b'a').first().is_some_and(|f| f.index == 10))
            .unwrap();
        assert_eq!(chosen[good], good as u32);
        // shared header features are removed again
        assert_eq!(group[1].indices(), [b'a']);
    }
}
