//! Monte-Carlo estimates of whether variant B beats variant A.
//!
//! Two entry points exist on purpose. [`prob_b_greater`] works from summary
//! `(rate, count)` pairs, rebuilding uniform-prior posteriors from
//! `round(rate * count)` conversions, which lets callers score historical rows
//! that never had a [`Posterior`] attached. [`prob_b_at_least_batch`] consumes
//! posteriors that were already computed, one pair per step.

use crate::error::{Error, Result};
use crate::posterior::{Posterior, Prior};
use crate::variant::Variant;
use rand::Rng;
use rand_distr::{Beta, Distribution};

/// Draws per call in scalar mode.
pub const DEFAULT_N_SAMPLE: usize = 30_000;
/// Draws per step in batched mode.
pub const DEFAULT_N_CMP: usize = 10_000;

/// Uniform-prior posterior for a rate observed over `n` trials.
fn summary_posterior(name: &str, rate: f64, n: u64) -> Result<Posterior> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        return Err(Error::observation(format!(
            "{} must be a rate in [0, 1], got {}",
            name, rate
        )));
    }
    let conversions = (rate * n as f64).round() as u64;
    Posterior::update(Prior::uniform(), conversions.min(n), n)
}

fn check_samples(name: &str, n: usize) -> Result<()> {
    if n == 0 {
        return Err(Error::configuration(format!("{} must be positive", name)));
    }
    Ok(())
}

/// Fraction of paired posterior draws in which B strictly exceeds A.
pub fn prob_b_greater<R: Rng + ?Sized>(
    rng: &mut R,
    p_a: f64,
    n_a: u64,
    p_b: f64,
    n_b: u64,
    n_sample: usize,
) -> Result<f64> {
    check_samples("n_sample", n_sample)?;
    let dist_a = summary_posterior("p_a", p_a, n_a)?.distribution()?;
    let dist_b = summary_posterior("p_b", p_b, n_b)?.distribution()?;
    let wins = (0..n_sample)
        .filter(|_| {
            let a = dist_a.sample(rng);
            let b = dist_b.sample(rng);
            b > a
        })
        .count();
    Ok(wins as f64 / n_sample as f64)
}

/// Per-step `P(p_B >= p_A)` for two aligned posterior sequences.
///
/// `posteriors_a[i]` and `posteriors_b[i]` describe the same step, so both
/// slices must have equal length. Every one of the `n_cmp` rounds draws one
/// sample per step and variant; counts are reduced over the rounds, and the
/// output has one entry per step.
pub fn prob_b_at_least_batch<R: Rng + ?Sized>(
    rng: &mut R,
    posteriors_a: &[Posterior],
    posteriors_b: &[Posterior],
    n_cmp: usize,
) -> Result<Vec<f64>> {
    check_samples("n_cmp", n_cmp)?;
    if posteriors_a.len() != posteriors_b.len() {
        return Err(Error::configuration(format!(
            "posterior sequences must align, got {} steps for A and {} for B",
            posteriors_a.len(),
            posteriors_b.len()
        )));
    }
    let dists_a = distributions(posteriors_a)?;
    let dists_b = distributions(posteriors_b)?;

    let mut counts = vec![0usize; dists_a.len()];
    for _ in 0..n_cmp {
        for (count, (dist_a, dist_b)) in counts.iter_mut().zip(dists_a.iter().zip(&dists_b)) {
            let a = dist_a.sample(rng);
            let b = dist_b.sample(rng);
            if b >= a {
                *count += 1;
            }
        }
    }
    Ok(counts.into_iter().map(|c| c as f64 / n_cmp as f64).collect())
}

/// Same as [`prob_b_at_least_batch`] but from raw parameter arrays.
pub fn prob_b_at_least_batch_params<R: Rng + ?Sized>(
    rng: &mut R,
    alpha_a: &[f64],
    beta_a: &[f64],
    alpha_b: &[f64],
    beta_b: &[f64],
    n_cmp: usize,
) -> Result<Vec<f64>> {
    let a = params_to_posteriors("A", alpha_a, beta_a)?;
    let b = params_to_posteriors("B", alpha_b, beta_b)?;
    prob_b_at_least_batch(rng, &a, &b, n_cmp)
}

fn params_to_posteriors(variant: &str, alpha: &[f64], beta: &[f64]) -> Result<Vec<Posterior>> {
    if alpha.len() != beta.len() {
        return Err(Error::configuration(format!(
            "variant {}: {} alpha values but {} beta values",
            variant,
            alpha.len(),
            beta.len()
        )));
    }
    alpha
        .iter()
        .zip(beta)
        .map(|(&a, &b)| Posterior::update(Prior::new(a, b)?, 0, 0))
        .collect()
}

fn distributions(posteriors: &[Posterior]) -> Result<Vec<Beta<f64>>> {
    posteriors.iter().map(|p| p.distribution()).collect()
}

/// Monte-Carlo summary of the comparison of two final posteriors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    /// `P(p_B > p_A)`.
    pub prob_b_greater: f64,
    /// Mean of `p_B / p_A` over the draws.
    pub relative_lift: f64,
}

impl Comparison {
    /// Probability that `variant` has the highest rate.
    pub fn prob_best(&self, variant: Variant) -> f64 {
        match variant {
            Variant::A => 1.0 - self.prob_b_greater,
            Variant::B => self.prob_b_greater,
        }
    }
}

pub fn compare<R: Rng + ?Sized>(
    rng: &mut R,
    posterior_a: &Posterior,
    posterior_b: &Posterior,
    n_sample: usize,
) -> Result<Comparison> {
    check_samples("n_sample", n_sample)?;
    let dist_a = posterior_a.distribution()?;
    let dist_b = posterior_b.distribution()?;
    let mut wins = 0usize;
    let mut ratio_sum = 0.0;
    for _ in 0..n_sample {
        let a = dist_a.sample(rng);
        let b = dist_b.sample(rng);
        if b > a {
            wins += 1;
        }
        ratio_sum += b / a;
    }
    let relative_lift = ratio_sum / n_sample as f64;
    if !relative_lift.is_finite() {
        return Err(Error::degeneracy(format!(
            "relative lift of Beta({}, {}) over Beta({}, {}) is not finite",
            posterior_b.alpha(),
            posterior_b.beta(),
            posterior_a.alpha(),
            posterior_a.beta()
        )));
    }
    Ok(Comparison {
        prob_b_greater: wins as f64 / n_sample as f64,
        relative_lift,
    })
}
