//! The flat hashed weight array and its lazy regularization state.

mod init;

use rayon::prelude::*;

pub use init::WeightInit;

/// Multiplier separating the quadratic feature space from the linear one.
pub const QUADRATIC_CONSTANT: u64 = 27_942_141;

/// Below this contraction the pending transform is materialized to avoid underflow.
pub const CONTRACTION_SYNC_THRESHOLD: f64 = 1e-10;

/// Applies a pending L1 shrinkage of `gravity` to `w`.
pub fn trunc_weight(w: f32, gravity: f32) -> f32 {
    if gravity < w.abs() {
        w - gravity.copysign(w)
    } else {
        0.
    }
}

/// Maps hashes to weight slots, copyable so kernels can address while writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    mask: u64,
    stride: usize,
}

impl Addressing {
    /// Returns the first slot of the logical weight addressed by `hash`.
    pub fn index(&self, hash: u64) -> usize {
        (hash & self.mask) as usize * self.stride
    }

    /// Returns the first slot of the pairwise cross of `a` and `b`.
    pub fn quad_index(&self, a: u64, b: u64) -> usize {
        self.index(QUADRATIC_CONSTANT.wrapping_mul(a).wrapping_add(b))
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// A power-of-two sized array of weight slots.
///
/// Each logical weight spans `stride` slots, slot 0 is the weight itself and
/// slot 1 (adaptive mode) holds the running sum of squared gradients. The true
/// value of a weight is `trunc_weight(stored, gravity) * contraction`.
#[derive(Debug, Clone)]
pub struct WeightStore {
    weights: Box<[f32]>,
    num_bits: u32,
    addressing: Addressing,
    gravity: f64,
    contraction: f64,
}

impl WeightStore {
    /// Creates a new zeroed `WeightStore`.
    ///
    /// # Arguments
    /// * `num_bits` - The log2 of the amount of logical weights.
    /// * `stride` - The amount of slots per logical weight.
    pub fn new(num_bits: u32, stride: usize) -> Self {
        let length = 1usize << num_bits;

        Self {
            weights: vec![0.; length * stride].into_boxed_slice(),
            num_bits,
            addressing: Addressing {
                mask: length as u64 - 1,
                stride,
            },
            gravity: 0.,
            contraction: 1.,
        }
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn stride(&self) -> usize {
        self.addressing.stride
    }

    /// Returns the amount of logical weights.
    pub fn len(&self) -> usize {
        1 << self.num_bits
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub fn index(&self, hash: u64) -> usize {
        self.addressing.index(hash)
    }

    pub fn quad_index(&self, a: u64, b: u64) -> usize {
        self.addressing.quad_index(a, b)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    pub fn gravity(&self) -> f64 {
        self.gravity
    }

    pub fn contraction(&self) -> f64 {
        self.contraction
    }

    /// Accumulates L1 shrinkage to be applied lazily.
    pub fn add_gravity(&mut self, amount: f64) {
        self.gravity += amount;
    }

    /// Divides the lazy L2 scale by `factor`.
    pub fn contract(&mut self, factor: f64) {
        self.contraction /= factor;
    }

    /// Whether the lazy scale became small enough to require a sync.
    pub fn needs_sync(&self) -> bool {
        self.contraction < CONTRACTION_SYNC_THRESHOLD
    }

    /// Returns the true value of the logical weight starting at `slot`.
    pub fn weight(&self, slot: usize) -> f32 {
        trunc_weight(self.weights[slot], self.gravity as f32) * self.contraction as f32
    }

    /// Materializes the pending gravity and contraction into every weight.
    ///
    /// A no-op when both are already the identity.
    pub fn sync(&mut self) {
        if self.gravity == 0. && self.contraction == 1. {
            return;
        }

        let gravity = self.gravity as f32;
        let contraction = self.contraction as f32;
        self.weights
            .par_chunks_mut(self.addressing.stride)
            .for_each(|slot| slot[0] = trunc_weight(slot[0], gravity) * contraction);

        self.gravity = 0.;
        self.contraction = 1.;
    }

    /// Writes the primary slot of the logical weight `index`.
    pub fn set_primary(&mut self, index: usize, value: f32) {
        self.weights[index * self.addressing.stride] = value;
    }

    /// Iterates over `(logical index, value)` for every non-zero primary slot.
    pub fn primary_weights(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.weights
            .chunks(self.addressing.stride)
            .enumerate()
            .filter(|(_, slot)| slot[0] != 0.)
            .map(|(i, slot)| (i as u32, slot[0]))
    }
}
