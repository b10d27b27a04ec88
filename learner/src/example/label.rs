use log::warn;

use crate::{
    buffer::GrowableBuffer,
    error::{LearnErr, Result},
};

/// Cost marking a class whose cost is unknown (test example).
pub const COST_UNKNOWN: f32 = f32::MAX;

/// A scalar regression/classification target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleLabel {
    /// `None` marks an unlabeled example, it is predicted but never trained on.
    pub label: Option<f32>,
    /// Importance weight of the example.
    pub weight: f32,
    /// Offset added to the prediction before the dot product.
    pub initial: f32,
}

impl SimpleLabel {
    pub fn new(label: f32, weight: f32) -> Self {
        Self {
            label: Some(label),
            weight,
            initial: 0.,
        }
    }

    pub fn unknown() -> Self {
        Self {
            label: None,
            weight: 0.,
            initial: 0.,
        }
    }
}

impl Default for SimpleLabel {
    fn default() -> Self {
        Self::unknown()
    }
}

/// One entry of a cost vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub class: u32,
    pub cost: f32,
    /// Score the base learner gave this class on the last prediction.
    pub partial_prediction: f32,
    /// Pairwise training value derived from the sorted costs.
    pub wap_value: f32,
}

impl Cost {
    pub fn new(class: u32, cost: f32) -> Self {
        Self {
            class,
            cost,
            partial_prediction: 0.,
            wap_value: 0.,
        }
    }

    pub fn unknown(class: u32) -> Self {
        Self::new(class, COST_UNKNOWN)
    }

    pub fn is_known(&self) -> bool {
        self.cost != COST_UNKNOWN
    }
}

/// How a cost entry was classified during sanitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CostKind {
    Instance,
    LabelDefinition,
    SharedHeader,
    Malformed,
}

fn classify(cost: &Cost, num_classes: Option<u32>) -> CostKind {
    let in_range = cost.class >= 1 && num_classes.is_none_or(|k| cost.class <= k);

    if in_range && cost.cost >= 0. {
        CostKind::Instance
    } else if in_range && cost.cost <= -1. {
        CostKind::LabelDefinition
    } else if cost.class == 0 && cost.cost <= -1. {
        CostKind::SharedHeader
    } else {
        CostKind::Malformed
    }
}

/// A cost-sensitive label: an ordered list of per-class costs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostLabel {
    pub costs: GrowableBuffer<Cost>,
}

impl CostLabel {
    pub fn new(costs: impl IntoIterator<Item = Cost>) -> Self {
        Self {
            costs: costs.into_iter().collect(),
        }
    }

    /// Whether no class carries a known cost.
    pub fn is_test(&self) -> bool {
        self.costs.iter().all(|c| !c.is_known())
    }

    /// Drops malformed entries and repeated classes, then enumerates every
    /// class when no cost was given.
    ///
    /// The first entry of a repeated class wins.
    ///
    /// # Arguments
    /// * `num_classes` - The amount of classes, `None` when unbounded.
    pub fn sanitize(&mut self, num_classes: Option<u32>) {
        let mut seen: Vec<u32> = Vec::with_capacity(self.costs.len());

        self.costs.retain(|cost| {
            if classify(cost, num_classes) == CostKind::Malformed {
                warn!(
                    "invalid cost specification: class {} with cost {}, dropping it",
                    cost.class, cost.cost
                );
                return false;
            }

            if seen.contains(&cost.class) {
                warn!(class = cost.class; "class repeated in a cost vector, dropping the cost {}", cost.cost);
                return false;
            }
            seen.push(cost.class);
            true
        });

        if let (true, Some(k)) = (self.costs.is_empty(), num_classes) {
            for class in 1..=k {
                self.costs.push(Cost::unknown(class));
            }
        }
    }

    /// Clears the label, keeping the storage of its cost list.
    pub fn clear(&mut self) {
        self.costs.erase();
    }
}

/// The label attached to an example.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Simple(SimpleLabel),
    Costs(CostLabel),
}

impl Default for Label {
    fn default() -> Self {
        Self::Simple(SimpleLabel::default())
    }
}

impl Label {
    /// Importance weight contributed by this label to the example clock.
    pub fn weight(&self) -> f32 {
        match self {
            Label::Simple(simple) => simple.weight,
            Label::Costs(_) => 1.,
        }
    }

    /// Whether the example carries no trainable target.
    pub fn is_test(&self) -> bool {
        match self {
            Label::Simple(simple) => simple.label.is_none(),
            Label::Costs(costs) => costs.is_test(),
        }
    }

    pub fn simple(&self) -> Result<&SimpleLabel> {
        match self {
            Label::Simple(simple) => Ok(simple),
            Label::Costs(_) => Err(LearnErr::LabelKind { expected: "simple" }),
        }
    }

    pub fn costs(&self) -> Result<&CostLabel> {
        match self {
            Label::Costs(costs) => Ok(costs),
            Label::Simple(_) => Err(LearnErr::LabelKind {
                expected: "cost-sensitive",
            }),
        }
    }

    pub fn costs_mut(&mut self) -> Result<&mut CostLabel> {
        match self {
            Label::Costs(costs) => Ok(costs),
            Label::Simple(_) => Err(LearnErr::LabelKind {
                expected: "cost-sensitive",
            }),
        }
    }
}
