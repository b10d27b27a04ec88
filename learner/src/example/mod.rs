//! The multi-namespace sparse example and its in-place rewrites.

mod guard;
mod label;

use crate::{
    buffer::GrowableBuffer,
    error::{LearnErr, Result},
};

pub use guard::NamespaceGuard;
pub use label::{COST_UNKNOWN, Cost, CostLabel, Label, SimpleLabel};

/// Amount of addressable namespace ids.
pub const NAMESPACES: usize = 256;

/// Namespace holding the constant (bias) feature.
pub const CONSTANT_NAMESPACE: u8 = 128;

/// Scratch namespace used for pairwise differences between examples.
pub const WAP_LDF_NAMESPACE: u8 = 126;

/// Namespace where per-class features from the label cache are injected.
pub const LABEL_NAMESPACE: u8 = b'l';

/// Hashed index of the constant feature.
pub const CONSTANT_HASH: u64 = 11_650_396;

/// A hashed feature.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Feature {
    pub index: u64,
    pub value: f32,
}

impl Feature {
    pub fn new(index: u64, value: f32) -> Self {
        Self { index, value }
    }
}

/// A group of features sharing one namespace id.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    features: GrowableBuffer<Feature>,
    sum_sq: f32,
}

impl Namespace {
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn sum_sq(&self) -> f32 {
        self.sum_sq
    }

    fn extend(&mut self, features: &[Feature]) {
        for f in features {
            self.sum_sq += f.value * f.value;
        }
        self.features.push_many(features);
    }

    fn truncate(&mut self, len: usize) {
        self.features.truncate(len);
        self.sum_sq = self
            .features
            .iter()
            .fold(0., |acc, f| acc + f.value * f.value);
    }

    fn erase(&mut self) {
        self.features.erase();
        self.sum_sq = 0.;
    }
}

/// A sparse example made of ordered namespaces plus its label and scratch predictions.
#[derive(Debug, Clone)]
pub struct Example {
    indices: GrowableBuffer<u8>,
    namespaces: Box<[Namespace]>,
    num_features: usize,
    total_sum_sq: f32,
    pub label: Label,
    /// Raw score accumulated by the base learner.
    pub partial_prediction: f32,
    /// Clamped prediction written by the base learner.
    pub final_prediction: f32,
    /// Class chosen by a cost-sensitive reduction.
    pub predicted_class: u32,
    /// Loss of the last base learner call.
    pub loss: f32,
    /// Update applied by the last base learner call.
    pub eta_round: f32,
    /// Position of the example on the learning-rate clock.
    pub example_t: f32,
    pub pass: usize,
}

impl Default for Example {
    fn default() -> Self {
        Self::new()
    }
}

impl Example {
    pub fn new() -> Self {
        Self {
            indices: GrowableBuffer::new(),
            namespaces: (0..NAMESPACES).map(|_| Namespace::default()).collect(),
            num_features: 0,
            total_sum_sq: 0.,
            label: Label::default(),
            partial_prediction: 0.,
            final_prediction: 0.,
            predicted_class: 0,
            loss: 0.,
            eta_round: 0.,
            example_t: 0.,
            pass: 0,
        }
    }

    /// Returns the active namespace ids in insertion order.
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    pub fn namespace(&self, id: u8) -> &Namespace {
        &self.namespaces[id as usize]
    }

    /// Returns the features of namespace `id`, empty if it isn't active.
    pub fn features(&self, id: u8) -> &[Feature] {
        self.namespaces[id as usize].features()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn total_sum_sq(&self) -> f32 {
        self.total_sum_sq
    }

    pub fn is_active(&self, id: u8) -> bool {
        self.indices.contains(&id)
    }

    fn recompute_totals(&mut self) {
        let namespaces = &self.namespaces;
        let (num_features, total_sum_sq) =
            self.indices.iter().fold((0, 0.), |(count, sum), &id| {
                let ns = &namespaces[id as usize];
                (count + ns.features.len(), sum + ns.sum_sq)
            });

        self.num_features = num_features;
        self.total_sum_sq = total_sum_sq;
    }

    /// Appends `features` to namespace `id`, activating it if needed.
    ///
    /// # Arguments
    /// * `id` - The namespace to augment.
    /// * `features` - The features to append.
    pub fn add_namespace(&mut self, id: u8, features: &[Feature]) {
        if !self.is_active(id) {
            self.indices.push(id);
            self.namespaces[id as usize].erase();
        }

        self.namespaces[id as usize].extend(features);
        self.recompute_totals();
    }

    /// Removes the last `features.len()` features of namespace `id`.
    ///
    /// If the namespace consisted solely of those features it is deactivated,
    /// which requires it to be the most recently activated namespace.
    ///
    /// # Arguments
    /// * `id` - The namespace to shrink.
    /// * `features` - The features previously added with `add_namespace`.
    ///
    /// # Errors
    /// `LearnErr::NamespaceOrder` if the namespace tail doesn't match `features`
    /// or if deactivating it would break the stack order.
    pub fn remove_namespace(&mut self, id: u8, features: &[Feature]) -> Result<()> {
        let order_err = |reason| LearnErr::NamespaceOrder {
            namespace: id,
            reason,
        };

        if !self.is_active(id) {
            return Err(order_err("the namespace is not active"));
        }

        let ns = &self.namespaces[id as usize];
        let len = ns.features.len();
        if len < features.len() || ns.features[len - features.len()..] != *features {
            return Err(order_err("the namespace doesn't end with the given features"));
        }

        if len == features.len() {
            if *self.indices.last()? != id {
                return Err(order_err("the namespace is not the most recently added one"));
            }
            self.indices.pop()?;
            self.namespaces[id as usize].erase();
        } else {
            self.namespaces[id as usize].truncate(len - features.len());
        }

        self.recompute_totals();
        Ok(())
    }

    /// Adds `features` to namespace `id` and returns a guard that removes them on release.
    pub fn push_namespace<'f>(
        &mut self,
        id: u8,
        features: &'f [Feature],
    ) -> NamespaceGuard<'_, 'f> {
        NamespaceGuard::new(self, id, features)
    }

    /// Runs `f` while `features` are injected into namespace `id`.
    ///
    /// The features are removed again on every exit path of `f`.
    pub fn with_namespace<R>(
        &mut self,
        id: u8,
        features: &[Feature],
        f: impl FnOnce(&mut Example) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.push_namespace(id, features);
        let out = f(&mut guard);
        guard.release()?;
        out
    }

    /// Adds every namespace of `source` except the constant one.
    pub fn add_namespaces_from(&mut self, source: &Example) {
        for &id in source.indices() {
            if id != CONSTANT_NAMESPACE {
                self.add_namespace(id, source.features(id));
            }
        }
    }

    /// Reverts `add_namespaces_from`, removing in reverse order.
    pub fn remove_namespaces_from(&mut self, source: &Example) -> Result<()> {
        for &id in source.indices().iter().rev() {
            if id != CONSTANT_NAMESPACE {
                self.remove_namespace(id, source.features(id))?;
            }
        }
        Ok(())
    }

    /// Moves every feature to `index + offset`.
    pub fn shift_indices(&mut self, offset: u64) {
        let Self {
            indices,
            namespaces,
            ..
        } = self;

        for &id in indices.iter() {
            for f in namespaces[id as usize].features.iter_mut() {
                f.index = f.index.wrapping_add(offset);
            }
        }
    }

    /// Runs `f` with every feature moved to `index + offset`.
    pub fn with_offset<R>(
        &mut self,
        offset: u64,
        f: impl FnOnce(&mut Example) -> Result<R>,
    ) -> Result<R> {
        if offset == 0 {
            return f(self);
        }

        self.shift_indices(offset);
        let out = f(self);
        self.shift_indices(offset.wrapping_neg());
        out
    }

    /// Duplicates every feature with a negated value at `index + offset_b`
    /// while moving the original to `index + offset_a`.
    pub fn mirror_features(&mut self, offset_a: u64, offset_b: u64) {
        let Self {
            indices,
            namespaces,
            ..
        } = self;

        for &id in indices.iter() {
            let ns = &mut namespaces[id as usize];
            let original = ns.features.len();
            for j in 0..original {
                let f = ns.features[j];
                ns.features[j].index = f.index.wrapping_add(offset_a);
                ns.features
                    .push(Feature::new(f.index.wrapping_add(offset_b), -f.value));
            }
            ns.sum_sq *= 2.;
        }

        self.num_features *= 2;
        self.total_sum_sq *= 2.;
    }

    /// Reverts `mirror_features` called with the same offsets.
    pub fn unmirror_features(&mut self, offset_a: u64, offset_b: u64) {
        let Self {
            indices,
            namespaces,
            ..
        } = self;

        for &id in indices.iter() {
            let ns = &mut namespaces[id as usize];
            let original = ns.features.len() / 2;
            debug_assert!(
                ns.features[..original]
                    .iter()
                    .zip(&ns.features[original..])
                    .all(|(a, b)| a.index.wrapping_sub(offset_a)
                        == b.index.wrapping_sub(offset_b))
            );

            ns.features.truncate(original);
            for f in ns.features.iter_mut() {
                f.index = f.index.wrapping_sub(offset_a);
            }
            ns.sum_sq /= 2.;
        }

        self.num_features /= 2;
        self.total_sum_sq /= 2.;
    }

    /// Runs `f` on the mirrored example, unmirroring it on every exit path.
    pub fn with_mirrored<R>(
        &mut self,
        offset_a: u64,
        offset_b: u64,
        f: impl FnOnce(&mut Example) -> Result<R>,
    ) -> Result<R> {
        self.mirror_features(offset_a, offset_b);
        let out = f(self);
        self.unmirror_features(offset_a, offset_b);
        out
    }

    /// Appends the negated features of `source` into the scratch difference namespace.
    ///
    /// # Errors
    /// `LearnErr::NamespaceOrder` if a difference is already in place.
    pub fn subtract_example(&mut self, source: &Example) -> Result<()> {
        if self.is_active(WAP_LDF_NAMESPACE) {
            return Err(LearnErr::NamespaceOrder {
                namespace: WAP_LDF_NAMESPACE,
                reason: "a difference is already in place",
            });
        }

        let scratch = &mut self.namespaces[WAP_LDF_NAMESPACE as usize];
        scratch.erase();
        for &id in source.indices() {
            for f in source.features(id) {
                scratch.features.push(Feature::new(f.index, -f.value));
                scratch.sum_sq += f.value * f.value;
            }
        }

        self.indices.push(WAP_LDF_NAMESPACE);
        self.recompute_totals();
        Ok(())
    }

    /// Removes the difference added by `subtract_example`.
    ///
    /// # Errors
    /// `LearnErr::NamespaceOrder` if the difference isn't the most recent namespace.
    pub fn unsubtract_example(&mut self) -> Result<()> {
        if *self.indices.last()? != WAP_LDF_NAMESPACE {
            return Err(LearnErr::NamespaceOrder {
                namespace: WAP_LDF_NAMESPACE,
                reason: "the difference was not added or something was added after it",
            });
        }

        self.indices.pop()?;
        self.namespaces[WAP_LDF_NAMESPACE as usize].erase();
        self.recompute_totals();
        Ok(())
    }

    /// Runs `f` on `self - source`, removing the difference on every exit path.
    pub fn with_subtracted<R>(
        &mut self,
        source: &Example,
        f: impl FnOnce(&mut Example) -> Result<R>,
    ) -> Result<R> {
        self.subtract_example(source)?;
        let out = f(self);
        self.unsubtract_example()?;
        out
    }

    /// Takes the label out for the duration of `f` and restores it afterwards.
    ///
    /// `f` receives the example (whose label it may freely overwrite) and the
    /// original label.
    pub fn swap_label<R>(
        &mut self,
        f: impl FnOnce(&mut Example, &mut Label) -> Result<R>,
    ) -> Result<R> {
        let mut original = std::mem::take(&mut self.label);
        let out = f(self, &mut original);
        self.label = original;
        out
    }

    /// Runs `f` with the example clock set to `t`.
    pub fn with_example_t<R>(
        &mut self,
        t: f32,
        f: impl FnOnce(&mut Example) -> Result<R>,
    ) -> Result<R> {
        let saved = std::mem::replace(&mut self.example_t, t);
        let out = f(self);
        self.example_t = saved;
        out
    }

    /// Whether the example is a sequence terminator (no costs, no features).
    pub fn is_newline(&self) -> bool {
        let no_features = match self.indices() {
            [] => true,
            [id] => *id == CONSTANT_NAMESPACE,
            _ => false,
        };

        no_features && matches!(&self.label, Label::Costs(c) if c.costs.is_empty())
    }

    /// Whether the example defines the features of one or more classes.
    pub fn is_label_definition(&self) -> bool {
        let Label::Costs(label) = &self.label else {
            return false;
        };

        !label.costs.is_empty()
            && label.costs.iter().all(|c| c.cost < 0.)
            && matches!(self.indices.len(), 1 | 2)
            && self.indices[0] == LABEL_NAMESPACE
    }

    /// Whether the example carries features shared by the rest of its group.
    pub fn is_example_header(&self) -> bool {
        match &self.label {
            Label::Costs(label) => {
                matches!(label.costs.as_slice(), [c] if c.class == 0 && c.cost < 0.)
            }
            Label::Simple(_) => false,
        }
    }

    pub fn is_test(&self) -> bool {
        self.label.is_test()
    }

    /// Resets the example for reuse, keeping every allocated buffer.
    pub fn clear(&mut self) {
        let Self {
            indices,
            namespaces,
            ..
        } = self;

        for &id in indices.iter() {
            namespaces[id as usize].erase();
        }
        indices.erase();

        self.num_features = 0;
        self.total_sum_sq = 0.;
        match &mut self.label {
            Label::Costs(costs) => costs.clear(),
            Label::Simple(simple) => *simple = SimpleLabel::default(),
        }
        self.partial_prediction = 0.;
        self.final_prediction = 0.;
        self.predicted_class = 0;
        self.loss = 0.;
        self.eta_round = 0.;
        self.example_t = 0.;
        self.pass = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feats(raw: &[(u64, f32)]) -> Vec<Feature> {
        raw.iter().map(|&(i, v)| Feature::new(i, v)).collect()
    }

    fn sample() -> Example {
        let mut ec = Example::new();
        ec.add_namespace(b'a', &feats(&[(1, 0.5), (2, 1.5), (3, -0.1)]));
        ec.add_namespace(b'b', &feats(&[(10, 0.3)]));
        ec.add_namespace(CONSTANT_NAMESPACE, &feats(&[(CONSTANT_HASH, 1.)]));
        ec
    }

    fn snapshot(ec: &Example) -> (Vec<u8>, Vec<(Vec<Feature>, u32)>, usize, u32) {
        let namespaces = ec
            .indices()
            .iter()
            .map(|&id| (ec.features(id).to_vec(), ec.namespace(id).sum_sq().to_bits()))
            .collect();
        (
            ec.indices().to_vec(),
            namespaces,
            ec.num_features(),
            ec.total_sum_sq().to_bits(),
        )
    }

    #[test]
    fn test_add_namespace_tracks_totals() {
        let ec = sample();

        assert_eq!(ec.indices(), [b'a', b'b', CONSTANT_NAMESPACE]);
        assert_eq!(ec.num_features(), 5);
        let expected = 0.25 + 2.25 + 0.01 + 0.09 + 1.;
        assert!((ec.total_sum_sq() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_namespace_round_trip_on_new_namespace() {
        let mut ec = sample();
        let before = snapshot(&ec);
        let injected = feats(&[(7, 2.), (8, -3.)]);

        ec.add_namespace(LABEL_NAMESPACE, &injected);
        assert_eq!(ec.num_features(), 7);
        ec.remove_namespace(LABEL_NAMESPACE, &injected).unwrap();

        assert_eq!(snapshot(&ec), before);
    }

    #[test]
    fn test_namespace_round_trip_on_active_namespace() {
        let mut ec = sample();
        let before = snapshot(&ec);
        let injected = feats(&[(4, 0.7)]);

        ec.add_namespace(b'a', &injected);
        assert_eq!(ec.features(b'a').len(), 4);
        ec.remove_namespace(b'a', &injected).unwrap();

        assert_eq!(snapshot(&ec), before);
    }

    #[test]
    fn test_remove_out_of_order_is_reported() {
        let mut ec = sample();
        let first = feats(&[(7, 1.)]);
        let second = feats(&[(9, 1.)]);

        ec.add_namespace(b'x', &first);
        ec.add_namespace(b'y', &second);

        let err = ec.remove_namespace(b'x', &first).unwrap_err();
        assert!(matches!(err, LearnErr::NamespaceOrder { namespace: b'x', .. }));

        ec.remove_namespace(b'y', &second).unwrap();
        ec.remove_namespace(b'x', &first).unwrap();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mut ec = sample();
        let before = snapshot(&ec);

        let injected = feats(&[(3, 1.)]);
        {
            let guard = ec.push_namespace(LABEL_NAMESPACE, &injected);
            assert!(guard.is_active(LABEL_NAMESPACE));
        }

        assert_eq!(snapshot(&ec), before);
    }

    #[test]
    fn test_with_namespace_restores_on_error() {
        let mut ec = sample();
        let before = snapshot(&ec);

        let out: Result<()> = ec.with_namespace(LABEL_NAMESPACE, &feats(&[(3, 1.)]), |_| {
            Err(LearnErr::MixedLabelDefinitions)
        });

        assert!(out.is_err());
        assert_eq!(snapshot(&ec), before);
    }

    #[test]
    fn test_mirror_round_trip() {
        let mut ec = sample();
        let before = snapshot(&ec);

        ec.mirror_features(100, 200);
        assert_eq!(ec.num_features(), 10);
        assert_eq!(ec.features(b'b'), feats(&[(110, 0.3), (210, -0.3)]));

        ec.unmirror_features(100, 200);
        assert_eq!(snapshot(&ec), before);
    }

    #[test]
    fn test_subtract_round_trip() {
        let mut ec = sample();
        let mut other = Example::new();
        other.add_namespace(b'c', &feats(&[(5, 2.)]));
        let before = snapshot(&ec);

        ec.subtract_example(&other).unwrap();
        assert_eq!(ec.indices().last(), Some(&WAP_LDF_NAMESPACE));
        assert_eq!(ec.features(WAP_LDF_NAMESPACE), feats(&[(5, -2.)]));
        assert!(ec.subtract_example(&other).is_err());

        ec.unsubtract_example().unwrap();
        assert_eq!(snapshot(&ec), before);
        assert!(ec.unsubtract_example().is_err());
    }

    #[test]
    fn test_offset_round_trip() {
        let mut ec = sample();
        let before = snapshot(&ec);

        let shifted = ec
            .with_offset(1 << 20, |ec| Ok(ec.features(b'a')[0].index))
            .unwrap();

        assert_eq!(shifted, 1 + (1 << 20));
        assert_eq!(snapshot(&ec), before);
    }

    #[test]
    fn test_swap_label_restores() {
        let mut ec = sample();
        ec.label = Label::Costs(CostLabel::new([Cost::new(1, 0.)]));

        let out: Result<()> = ec.swap_label(|ec, original| {
            assert!(original.costs().is_ok());
            ec.label = Label::Simple(SimpleLabel::new(1., 1.));
            Err(LearnErr::MixedLabelDefinitions)
        });

        assert!(out.is_err());
        assert!(ec.label.costs().is_ok());
    }

    #[test]
    fn test_group_predicates() {
        let mut ec = Example::new();
        ec.label = Label::Costs(CostLabel::default());
        assert!(ec.is_newline());

        ec.label = Label::Costs(CostLabel::new([Cost::new(0, -1.)]));
        assert!(ec.is_example_header());

        ec.add_namespace(LABEL_NAMESPACE, &feats(&[(1, 1.)]));
        ec.label = Label::Costs(CostLabel::new([Cost::new(3, -1.)]));
        assert!(ec.is_label_definition());
        assert!(!ec.is_newline());

        ec.label = Label::Costs(CostLabel::new([Cost::new(3, 0.5)]));
        assert!(!ec.is_label_definition());
    }

    #[test]
    fn test_clear_keeps_storage() {
        let mut ec = sample();
        ec.clear();

        assert!(ec.indices().is_empty());
        assert_eq!(ec.num_features(), 0);
        assert!(ec.features(b'a').is_empty());
        assert_eq!(ec.total_sum_sq(), 0.);
    }
}
