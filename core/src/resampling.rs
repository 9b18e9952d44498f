//! Resampling strategies for the particle filter.
//!
//! Every strategy maps a slice of unnormalized importance weights to `N` particle indices drawn with
//! replacement, where `N` is the number of weights. Weights are validated first: negative or non-finite
//! weights are rejected and an all-zero weight vector is reported as degenerate instead of silently falling
//! back to uniform sampling. A particle with zero weight is never selected by any strategy.

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// Independent categorical draws proportional to weight
    #[default]
    Multinomial,
    /// A single uniform offset with `N` evenly spaced pointers
    Systematic,
    /// One uniform draw inside each of `N` equal strata
    Stratified,
    /// Deterministic integer copies followed by systematic sampling of the remainders
    Residual,
}

impl ResamplingStrategy {
    /// Draw `weights.len()` indices according to this strategy.
    pub fn resample<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
        let normalized = normalize(weights)?;
        let indices = match self {
            ResamplingStrategy::Multinomial => multinomial_resample(&normalized, rng)?,
            ResamplingStrategy::Systematic => systematic_resample(&normalized, rng),
            ResamplingStrategy::Stratified => stratified_resample(&normalized, rng),
            ResamplingStrategy::Residual => residual_resample(&normalized, rng),
        };
        Ok(indices)
    }
}

/// Validate weights and scale them to sum to one.
///
/// Scaling goes through the maximum weight first so that very large weights cannot overflow the sum.
pub fn normalize(weights: &[f64]) -> Result<Vec<f64>> {
    let mut max_weight: f64 = 0.0;
    for (index, &weight) in weights.iter().enumerate() {
        if !weight.is_finite() || weight < 0.0 {
            return Err(FilterError::InvalidWeight { index, weight });
        }
        max_weight = max_weight.max(weight);
    }
    if max_weight == 0.0 {
        return Err(FilterError::DegenerateWeights);
    }
    let scaled: Vec<f64> = weights.iter().map(|w| w / max_weight).collect();
    let total: f64 = scaled.iter().sum();
    Ok(scaled.into_iter().map(|w| w / total).collect())
}

/// Categorical draws with `WeightedIndex`.
pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    let distribution = WeightedIndex::new(weights.iter().copied())
        .map_err(|e| FilterError::Configuration(format!("weighted sampling failed: {e}")))?;
    Ok((0..weights.len())
        .map(|_| distribution.sample(rng))
        .collect())
}

pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let step = 1.0 / n as f64;
    let offset = rng.random::<f64>() * step;
    let positions: Vec<f64> = (0..n).map(|j| offset + j as f64 * step).collect();
    select_sorted(&cumulative(weights), &positions)
}

pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let step = 1.0 / n as f64;
    let positions: Vec<f64> = (0..n)
        .map(|j| (j as f64 + rng.random::<f64>()) * step)
        .collect();
    select_sorted(&cumulative(weights), &positions)
}

pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in weights.iter().enumerate() {
        let expected = w * n as f64;
        let copies = expected.floor() as usize;
        indices.extend(std::iter::repeat_n(i, copies));
        residual[i] = expected - copies as f64;
    }
    // rounding can push the integer part one past n
    indices.truncate(n);
    let remaining = n - indices.len();
    if remaining > 0 {
        let total: f64 = residual.iter().sum();
        if total > 0.0 {
            let step = total / remaining as f64;
            let offset = rng.random::<f64>() * step;
            let positions: Vec<f64> = (0..remaining).map(|j| offset + j as f64 * step).collect();
            let cumsum = cumulative(&residual);
            indices.extend(select_sorted(&cumsum, &positions));
        } else {
            // every expected count was integral up to rounding; top up from the heaviest particle
            let heaviest = argmax(weights);
            indices.extend(std::iter::repeat_n(heaviest, remaining));
        }
    }
    indices
}

/// Running sum of `weights`, with the entry of the last positive weight pinned to infinity so that
/// floating point shortfall in the total can never select a trailing zero-weight particle.
fn cumulative(weights: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    let mut cumsum: Vec<f64> = weights
        .iter()
        .map(|w| {
            total += w;
            total
        })
        .collect();
    if let Some(last) = weights.iter().rposition(|&w| w > 0.0) {
        cumsum[last] = f64::INFINITY;
    }
    cumsum
}

/// Map each position of a non-decreasing sequence to the first index whose cumulative weight exceeds it.
fn select_sorted(cumsum: &[f64], positions: &[f64]) -> Vec<usize> {
    let mut selected = Vec::with_capacity(positions.len());
    let mut i = 0;
    for &position in positions {
        while i + 1 < cumsum.len() && cumsum[i] <= position {
            i += 1;
        }
        selected.push(i);
    }
    selected
}

fn argmax(weights: &[f64]) -> usize {
    weights
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &w)| if w > best.1 { (i, w) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const ALL: [ResamplingStrategy; 4] = [
        ResamplingStrategy::Multinomial,
        ResamplingStrategy::Systematic,
        ResamplingStrategy::Stratified,
        ResamplingStrategy::Residual,
    ];

    #[test]
    fn test_single_positive_weight_concentrates() {
        let mut weights = vec![0.0; 20];
        weights[7] = 1.0;
        let mut rng = StdRng::seed_from_u64(3);
        for strategy in ALL {
            let indices = strategy.resample(&weights, &mut rng).unwrap();
            assert_eq!(indices.len(), 20, "{strategy:?}");
            assert!(indices.iter().all(|&i| i == 7), "{strategy:?}");
        }
    }
    #[test]
    fn test_zero_weight_never_selected() {
        let weights = vec![0.0, 2.0, 0.0, 1.0, 0.0];
        let mut rng = StdRng::seed_from_u64(11);
        for strategy in ALL {
            for _ in 0..50 {
                let indices = strategy.resample(&weights, &mut rng).unwrap();
                assert!(indices.iter().all(|&i| i == 1 || i == 3), "{strategy:?}");
            }
        }
    }
    #[test]
    fn test_low_variance_strategies_respect_proportions() {
        // expected counts are exactly 6, 3 and 1 for N = 10
        let weights = vec![0.6, 0.3, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(5);
        for strategy in [
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Residual,
        ] {
            let indices = strategy.resample(&weights, &mut rng).unwrap();
            let count = |k: usize| indices.iter().filter(|&&i| i == k).count();
            let (c0, c1, c2) = (count(0), count(1), count(2));
            assert!((5..=7).contains(&c0), "{strategy:?}: {c0}");
            assert!((2..=4).contains(&c1), "{strategy:?}: {c1}");
            assert!(c2 <= 2, "{strategy:?}: {c2}");
            assert_eq!(c0 + c1 + c2, 10);
        }
    }
    #[test]
    fn test_multinomial_frequencies() {
        let weights = vec![3.0, 1.0];
        let mut rng = StdRng::seed_from_u64(99);
        let mut first = 0usize;
        for _ in 0..2500 {
            let indices = ResamplingStrategy::Multinomial
                .resample(&weights, &mut rng)
                .unwrap();
            first += indices.iter().filter(|&&i| i == 0).count();
        }
        let fraction = first as f64 / 5000.0;
        assert!((fraction - 0.75).abs() < 0.03, "fraction = {fraction}");
    }
    #[test]
    fn test_all_zero_weights_are_degenerate() {
        let mut rng = StdRng::seed_from_u64(0);
        for strategy in ALL {
            let result = strategy.resample(&[0.0, 0.0, 0.0], &mut rng);
            assert!(matches!(result, Err(FilterError::DegenerateWeights)));
        }
    }
    #[test]
    fn test_invalid_weights_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = ResamplingStrategy::Systematic.resample(&[1.0, -0.5], &mut rng);
        assert!(matches!(result, Err(FilterError::InvalidWeight { index: 1, .. })));
        let result = ResamplingStrategy::Multinomial.resample(&[f64::NAN, 1.0], &mut rng);
        assert!(matches!(result, Err(FilterError::InvalidWeight { index: 0, .. })));
    }
    #[test]
    fn test_normalize_handles_huge_weights() {
        let normalized = normalize(&[f64::MAX, f64::MAX]).unwrap();
        assert_eq!(normalized, vec![0.5, 0.5]);
    }
}
