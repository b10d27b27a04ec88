use std::collections::HashMap;

use log::debug;

use crate::{
    error::Result,
    example::{Example, Feature, LABEL_NAMESPACE},
};

/// Per-class features declared by label definition examples.
///
/// Lives for the duration of a run, the first definition of a class wins.
#[derive(Debug, Default)]
pub struct LabelFeatureCache {
    features: HashMap<u32, Vec<Feature>>,
}

impl LabelFeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `features` for `class` unless it was already defined.
    ///
    /// # Returns
    /// Whether the definition was stored.
    pub fn define(&mut self, class: u32, features: &[Feature]) -> bool {
        if self.features.contains_key(&class) {
            debug!(class = class; "label already defined, keeping the first definition");
            return false;
        }

        self.features.insert(class, features.to_vec());
        true
    }

    /// Caches the features of a label definition example for every class it names.
    pub fn define_from(&mut self, ec: &Example) -> Result<()> {
        let Some(&id) = ec.indices().first() else {
            return Ok(());
        };

        let features = ec.features(id);
        for cost in ec.label.costs()?.costs.iter() {
            self.define(cost.class, features);
        }
        Ok(())
    }

    pub fn get(&self, class: u32) -> Option<&[Feature]> {
        self.features.get(&class).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn clear(&mut self) {
        self.features.clear();
    }

    /// Runs `f` with the cached features of `class` injected into the label namespace.
    ///
    /// Runs `f` on the untouched example when `class` has no cached features.
    pub fn with_label_features<R>(
        &self,
        ec: &mut Example,
        class: u32,
        f: impl FnOnce(&mut Example) -> Result<R>,
    ) -> Result<R> {
        match self.get(class) {
            Some(features) if !features.is_empty() => {
                ec.with_namespace(LABEL_NAMESPACE, features, f)
            }
            _ => f(ec),
        }
    }
}
