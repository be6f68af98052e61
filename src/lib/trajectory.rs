//! Forward simulation of experiment trajectories.
//!
//! A trajectory fixes a plausible true rate for one variant, then draws the
//! binomial outcome of every future step of a [`TrialSchedule`] and tracks the
//! running posterior. A [`Scenario`] pairs an A trajectory with a B trajectory
//! over the same steps and attaches the running `P(p_B >= p_A)` curve.

use crate::error::{Error, Result};
use crate::posterior::{Posterior, Prior};
use crate::superiority::prob_b_at_least_batch;
use crate::variant::Variant;
use clap::ValueEnum;
use log::debug;
use rand::Rng;
use rand_distr::{Binomial, Distribution};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What one step of the forecast horizon stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum HorizonUnit {
    /// Step values are day indices, `0..=max_days`.
    #[value(alias = "day")]
    Days,
    /// Step values are the combined cumulative trials of both variants.
    #[value(alias = "n")]
    Population,
}

impl fmt::Display for HorizonUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HorizonUnit::Days => write!(f, "days"),
            HorizonUnit::Population => write!(f, "population"),
        }
    }
}

/// Per-step trial counts for both variants.
///
/// The first step carries zero trials and stands for "now".
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSchedule {
    trials_a: Vec<u64>,
    trials_b: Vec<u64>,
    unit: HorizonUnit,
}

impl TrialSchedule {
    /// Schedule from explicit per-variant trial counts.
    pub fn new(trials_a: Vec<u64>, trials_b: Vec<u64>, unit: HorizonUnit) -> Result<Self> {
        if trials_a.is_empty() {
            return Err(Error::configuration("trial schedule is empty"));
        }
        if trials_a.len() != trials_b.len() {
            return Err(Error::configuration(format!(
                "trial schedules must align, got {} steps for A and {} for B",
                trials_a.len(),
                trials_b.len()
            )));
        }
        Ok(Self {
            trials_a,
            trials_b,
            unit,
        })
    }

    /// `max_days` days of `daily_trials` each, split between the variants.
    pub fn by_days(daily_trials: u64, max_days: usize, b_split: f64) -> Result<Self> {
        if max_days == 0 {
            return Err(Error::configuration("days horizon must cover at least one day"));
        }
        Self::split(daily_trials, max_days, b_split, HorizonUnit::Days)
    }

    /// Steps of `sim_step` trials up to `sim_max`, split between the variants.
    pub fn by_population(sim_max: u64, sim_step: u64, b_split: f64) -> Result<Self> {
        if sim_step == 0 {
            return Err(Error::configuration("population step must be positive"));
        }
        let n_steps = (sim_max / sim_step) as usize;
        if n_steps == 0 {
            return Err(Error::configuration(format!(
                "population horizon {} is shorter than one step of {}",
                sim_max, sim_step
            )));
        }
        Self::split(sim_step, n_steps, b_split, HorizonUnit::Population)
    }

    fn split(step_trials: u64, n_steps: usize, b_split: f64, unit: HorizonUnit) -> Result<Self> {
        if !b_split.is_finite() || !(0.0..=1.0).contains(&b_split) {
            return Err(Error::configuration(format!(
                "traffic split must be in [0, 1], got {}",
                b_split
            )));
        }
        let trials = std::iter::once(0u64).chain(std::iter::repeat_n(step_trials, n_steps));
        let (trials_a, trials_b) = trials
            .map(|t| {
                let t = t as f64;
                (
                    (t * (1.0 - b_split)).round_ties_even() as u64,
                    (t * b_split).round_ties_even() as u64,
                )
            })
            .unzip();
        Self::new(trials_a, trials_b, unit)
    }

    pub fn unit(&self) -> HorizonUnit {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.trials_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials_a.is_empty()
    }

    pub fn trials(&self, variant: Variant) -> &[u64] {
        match variant {
            Variant::A => &self.trials_a,
            Variant::B => &self.trials_b,
        }
    }

    /// Combined cumulative trials of both variants at every step.
    pub fn combined_accum(&self) -> Vec<u64> {
        self.trials_a
            .iter()
            .zip(&self.trials_b)
            .scan(0u64, |acc, (a, b)| {
                *acc += a + b;
                Some(*acc)
            })
            .collect()
    }

    /// The value reported for each step: its day index or its population size.
    pub fn step_values(&self) -> Vec<u64> {
        match self.unit {
            HorizonUnit::Days => (0..self.len() as u64).collect(),
            HorizonUnit::Population => self.combined_accum(),
        }
    }
}

/// One simulated future of a single variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedTrajectory {
    pub true_rate: f64,
    pub trials_accum: Vec<u64>,
    pub conversions_accum: Vec<u64>,
    pub posteriors: Vec<Posterior>,
}

impl SimulatedTrajectory {
    pub fn alpha_post(&self) -> Vec<f64> {
        self.posteriors.iter().map(|p| p.alpha()).collect()
    }

    pub fn beta_post(&self) -> Vec<f64> {
        self.posteriors.iter().map(|p| p.beta()).collect()
    }

    pub fn posterior_means(&self) -> Vec<f64> {
        self.posteriors.iter().map(|p| p.mean()).collect()
    }
}

/// Draws binomial outcomes for every step and derives the running posterior.
///
/// `prior` is normally the current posterior of the variant, so the running
/// posterior continues from what has been observed so far.
pub fn simulate<R: Rng + ?Sized>(
    rng: &mut R,
    true_rate: f64,
    trial_schedule: &[u64],
    prior: Prior,
) -> Result<SimulatedTrajectory> {
    if trial_schedule.is_empty() {
        return Err(Error::configuration("trial schedule is empty"));
    }
    if !true_rate.is_finite() || !(0.0..=1.0).contains(&true_rate) {
        return Err(Error::configuration(format!(
            "true rate must be in [0, 1], got {}",
            true_rate
        )));
    }
    prior.validate()?;

    let mut trials_accum = Vec::with_capacity(trial_schedule.len());
    let mut conversions_accum = Vec::with_capacity(trial_schedule.len());
    let mut posteriors = Vec::with_capacity(trial_schedule.len());
    let (mut trials_total, mut conversions_total) = (0u64, 0u64);
    for &trials in trial_schedule {
        let conversions = Binomial::new(trials, true_rate)
            .map_err(|e| {
                Error::degeneracy(format!(
                    "cannot sample Binomial({}, {}): {}",
                    trials, true_rate, e
                ))
            })?
            .sample(rng);
        trials_total += trials;
        conversions_total += conversions;
        trials_accum.push(trials_total);
        conversions_accum.push(conversions_total);
        posteriors.push(Posterior::update(prior, conversions_total, trials_total)?);
    }

    Ok(SimulatedTrajectory {
        true_rate,
        trials_accum,
        conversions_accum,
        posteriors,
    })
}

/// Draws a true rate from `current`, then simulates forward from it.
pub fn simulate_from_posterior<R: Rng + ?Sized>(
    rng: &mut R,
    current: &Posterior,
    trial_schedule: &[u64],
) -> Result<SimulatedTrajectory> {
    let true_rate = current.sample(rng)?;
    simulate(rng, true_rate, trial_schedule, current.as_prior())
}

/// A paired A/B future with its running superiority curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    pub a: SimulatedTrajectory,
    pub b: SimulatedTrajectory,
    /// `P(p_B >= p_A)` at every step.
    pub prob_b_ge_a: Vec<f64>,
}

impl Scenario {
    /// Conversions of both variants accumulated up to every step.
    pub fn conversions_accum(&self) -> Vec<u64> {
        self.a
            .conversions_accum
            .iter()
            .zip(&self.b.conversions_accum)
            .map(|(a, b)| a + b)
            .collect()
    }
}

pub fn simulate_scenario<R: Rng + ?Sized>(
    rng: &mut R,
    current_a: &Posterior,
    current_b: &Posterior,
    schedule: &TrialSchedule,
    n_cmp: usize,
) -> Result<Scenario> {
    let a = simulate_from_posterior(rng, current_a, schedule.trials(Variant::A))?;
    let b = simulate_from_posterior(rng, current_b, schedule.trials(Variant::B))?;
    let prob_b_ge_a = prob_b_at_least_batch(rng, &a.posteriors, &b.posteriors, n_cmp)?;
    debug!(
        "Simulated scenario with p_a={:.4} p_b={:.4}, final P(p_B >= p_A)={:.3}",
        a.true_rate,
        b.true_rate,
        prob_b_ge_a.last().copied().unwrap_or(f64::NAN)
    );
    Ok(Scenario { a, b, prob_b_ge_a })
}
