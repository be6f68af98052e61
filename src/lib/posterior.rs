use crate::error::{Error, Result};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

/// Beta prior over a conversion rate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub alpha: f64,
    pub beta: f64,
}

impl Prior {
    /// Uniform prior over [0,1].
    pub fn uniform() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    pub fn new(alpha: f64, beta: f64) -> Result<Self> {
        let prior = Self { alpha, beta };
        prior.validate()?;
        Ok(prior)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.alpha) || !positive(self.beta) {
            return Err(Error::observation(format!(
                "prior parameters must be positive, got alpha={} beta={}",
                self.alpha, self.beta
            )));
        }
        Ok(())
    }
}

impl Default for Prior {
    fn default() -> Self {
        Self::uniform()
    }
}

/// Beta posterior of a single variant's conversion rate.
///
/// Only [`Posterior::update`] builds one, so `alpha >= prior.alpha` and
/// `beta >= prior.beta` always hold. A new posterior is derived from updated
/// accumulators instead of mutating an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Posterior {
    alpha: f64,
    beta: f64,
}

impl Posterior {
    /// Conjugate update of `prior` with cumulative counts.
    pub fn update(prior: Prior, conversions_accum: u64, trials_accum: u64) -> Result<Self> {
        prior.validate()?;
        if conversions_accum > trials_accum {
            return Err(Error::observation(format!(
                "conversions {} exceed trials {}",
                conversions_accum, trials_accum
            )));
        }
        Ok(Self {
            alpha: prior.alpha + conversions_accum as f64,
            beta: prior.beta + (trials_accum - conversions_accum) as f64,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Uses this posterior as the prior of a later update.
    pub fn as_prior(&self) -> Prior {
        Prior {
            alpha: self.alpha,
            beta: self.beta,
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn variance(&self) -> f64 {
        let numerator = self.alpha * self.beta;
        let denominator = (self.alpha + self.beta).powi(2) * (self.alpha + self.beta + 1.0);
        numerator / denominator
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn log_beta(&self) -> f64 {
        ln_gamma(self.alpha) + ln_gamma(self.beta) - ln_gamma(self.alpha + self.beta)
    }

    /// Log density; `-inf` outside [0,1].
    ///
    /// A zero exponent contributes nothing, so `Beta(1, b)` at 0 and
    /// `Beta(a, 1)` at 1 stay finite instead of evaluating `0 * ln(0)`.
    pub fn log_pdf(&self, x: f64) -> f64 {
        if !(0.0..=1.0).contains(&x) {
            return f64::NEG_INFINITY;
        }
        log_kernel(self.alpha - 1.0, x) + log_kernel(self.beta - 1.0, 1.0 - x) - self.log_beta()
    }

    /// Density; 0 outside [0,1].
    pub fn pdf(&self, x: f64) -> f64 {
        if !(0.0..=1.0).contains(&x) {
            return 0.0;
        }
        self.log_pdf(x).exp()
    }

    pub fn distribution(&self) -> Result<Beta<f64>> {
        Beta::new(self.alpha, self.beta).map_err(|e| {
            Error::degeneracy(format!(
                "cannot sample Beta({}, {}): {}",
                self.alpha, self.beta, e
            ))
        })
    }

    /// Draws a single plausible conversion rate.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        Ok(self.distribution()?.sample(rng))
    }
}

fn log_kernel(exponent: f64, v: f64) -> f64 {
    if exponent == 0.0 { 0.0 } else { exponent * v.ln() }
}

/// `(alpha_post, beta_post)` for a prior and cumulative counts.
pub fn posterior(prior: Prior, conversions_accum: u64, trials_accum: u64) -> Result<(f64, f64)> {
    let post = Posterior::update(prior, conversions_accum, trials_accum)?;
    Ok((post.alpha(), post.beta()))
}
