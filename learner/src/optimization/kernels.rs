//! Per-feature traversals over the weight array.
//!
//! Every kernel visits features in the same order: the linear features of each
//! active namespace in activation order, then every declared namespace cross.
//! The adaptive kernels depend on it, an accumulator written by one feature is
//! read back by the features that follow it within the same example.

use crate::{
    example::Example,
    weights::{Addressing, trunc_weight},
};

/// Approximates `1 / sqrt(x)` with the bit trick and two Newton rounds.
pub fn inv_sqrt(x: f32) -> f32 {
    let half = 0.5 * x;
    let mut y = f32::from_bits(0x5f3759d5u32.wrapping_sub(x.to_bits() >> 1));
    y *= 1.5 - half * y * y;
    y *= 1.5 - half * y * y;
    y
}

/// The per-feature rate derived from an adaptive accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    /// `acc^-0.5`, optionally with the approximate reciprocal square root.
    InvSqrt { fast: bool },
    /// `acc^-power_t`.
    Power(f32),
}

impl Rate {
    /// Returns the rate for the accumulated squared gradient `acc`.
    ///
    /// An empty accumulator yields a zero rate.
    pub fn apply(self, acc: f32) -> f32 {
        if acc <= 0. {
            return 0.;
        }

        match self {
            Rate::InvSqrt { fast: true } => inv_sqrt(acc),
            Rate::InvSqrt { fast: false } => acc.sqrt().recip(),
            Rate::Power(power_t) => acc.powf(-power_t),
        }
    }
}

/// Calls `f(slot, value)` for every feature of `ec`, crosses included.
pub fn for_each_feature(
    ec: &Example,
    pairs: &[(u8, u8)],
    addressing: Addressing,
    mut f: impl FnMut(usize, f32),
) {
    for &id in ec.indices() {
        for feature in ec.features(id) {
            f(addressing.index(feature.index), feature.value);
        }
    }

    for &(a, b) in pairs {
        let right = ec.features(b);
        if right.is_empty() {
            continue;
        }

        for x in ec.features(a) {
            for y in right {
                f(addressing.quad_index(x.index, y.index), x.value * y.value);
            }
        }
    }
}

/// Returns `(feature count, squared norm)` of `ec` with crosses included.
pub fn example_norm(ec: &Example, pairs: &[(u8, u8)]) -> (usize, f32) {
    pairs.iter().fold(
        (ec.num_features(), ec.total_sum_sq()),
        |(count, sum), &(a, b)| {
            let (left, right) = (ec.namespace(a), ec.namespace(b));
            (
                count + left.features().len() * right.features().len(),
                sum + left.sum_sq() * right.sum_sq(),
            )
        },
    )
}

/// Dot product of the stored weights with the features of `ec`.
pub fn dot(weights: &[f32], ec: &Example, pairs: &[(u8, u8)], addressing: Addressing) -> f32 {
    let mut sum = 0.;
    for_each_feature(ec, pairs, addressing, |slot, x| sum += weights[slot] * x);
    sum
}

/// Dot product applying the pending L1 shrinkage to every weight read.
pub fn dot_trunc(
    weights: &[f32],
    gravity: f32,
    ec: &Example,
    pairs: &[(u8, u8)],
    addressing: Addressing,
) -> f32 {
    let mut sum = 0.;
    for_each_feature(ec, pairs, addressing, |slot, x| {
        sum += trunc_weight(weights[slot], gravity) * x
    });
    sum
}

/// Moves every touched weight by `update * value`.
pub fn train(
    weights: &mut [f32],
    ec: &Example,
    pairs: &[(u8, u8)],
    addressing: Addressing,
    update: f32,
) {
    for_each_feature(ec, pairs, addressing, |slot, x| weights[slot] += update * x);
}

/// Accumulates `g * value^2` into each feature's second slot and moves its
/// weight by `update * value * rate(accumulator)`.
pub fn train_adaptive(
    weights: &mut [f32],
    ec: &Example,
    pairs: &[(u8, u8)],
    addressing: Addressing,
    update: f32,
    g: f32,
    rate: Rate,
) {
    for_each_feature(ec, pairs, addressing, |slot, x| {
        weights[slot + 1] += g * x * x;
        let t = x * rate.apply(weights[slot + 1]);
        weights[slot] += update * t;
    });
}

/// Computes `x' G x` over the accumulators as they would be after adding `g * x^2`.
///
/// The weights are left untouched.
pub fn compute_xgx(
    weights: &[f32],
    ec: &Example,
    pairs: &[(u8, u8)],
    addressing: Addressing,
    g: f32,
    rate: Rate,
) -> f32 {
    let mut xgx = 0.;
    for_each_feature(ec, pairs, addressing, |slot, x| {
        xgx += x * x * rate.apply(weights[slot + 1] + g * x * x);
    });
    xgx
}
