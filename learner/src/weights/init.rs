use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Uniform};

use super::WeightStore;
use crate::error::{LearnErr, Result};

/// How a fresh `WeightStore` is filled before training.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightInit {
    /// Value written into every primary slot, applied after random draws.
    pub initial_weight: f32,
    /// Draw primary slots uniformly from `[-0.5, 0.5)`.
    pub random_weights: bool,
    pub seed: Option<u64>,
    /// Prior squared-gradient mass written into every adaptive accumulator.
    pub initial_t: f32,
    pub adaptive: bool,
}

impl WeightInit {
    /// Fills `store` according to this initialization.
    ///
    /// # Errors
    /// `LearnErr::InvalidConfig` if the uniform range can't be built.
    pub fn apply(&self, store: &mut WeightStore) -> Result<()> {
        let stride = store.stride();
        let weights = store.as_mut_slice();

        if self.random_weights {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let distribution =
                Uniform::new(-0.5f32, 0.5).map_err(|e| LearnErr::InvalidConfig(e.to_string()))?;

            for slot in weights.chunks_mut(stride) {
                slot[0] = distribution.sample(&mut rng);
            }
        }

        if self.initial_weight != 0. {
            for slot in weights.chunks_mut(stride) {
                slot[0] = self.initial_weight;
            }
        }

        if self.adaptive && self.initial_t > 0. && stride > 1 {
            for slot in weights.chunks_mut(stride) {
                slot[1] = self.initial_t;
            }
        }

        Ok(())
    }
}
