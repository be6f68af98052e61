//! Duration forecasting from simulated scenarios.
//!
//! Each scenario is reduced to two numbers: the first step at which the running
//! superiority probability is confident in either direction, and the step that
//! maximises expected conversions when the experiment stops there and the rest
//! of the population is routed by the current belief. These answer different
//! questions and are reported separately.

use crate::error::{check_open_unit, Error, Result};
use crate::posterior::Posterior;
use crate::superiority::DEFAULT_N_CMP;
use crate::trajectory::{simulate_scenario, Scenario, TrialSchedule};
use itertools::izip;
use log::{debug, info};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::Serialize;
use statrs::statistics::{Data, Median, Statistics};
use std::collections::BTreeMap;
use std::time::Instant;

/// Where a running probability curve first became confident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Crossing {
    pub step: u64,
    /// `false` means the horizon ended unresolved and `step` is only a lower
    /// bound (the largest step value of the schedule).
    pub reached: bool,
}

/// First step at which `running_prob` is above `threshold` or below
/// `1 - threshold`.
///
/// A curve counts as resolved only if its last element satisfies the
/// condition; the smallest satisfying step is then returned. Otherwise the
/// result is censored at the largest step value.
pub fn first_crossing(
    running_prob: &[f64],
    step_values: &[u64],
    threshold: f64,
) -> Result<Crossing> {
    check_open_unit("certainty threshold", threshold)?;
    if running_prob.is_empty() {
        return Err(Error::configuration("running probability curve is empty"));
    }
    if running_prob.len() != step_values.len() {
        return Err(Error::configuration(format!(
            "curve has {} points but {} step values",
            running_prob.len(),
            step_values.len()
        )));
    }

    let confident = |p: f64| p > threshold || p < 1.0 - threshold;
    let resolved = running_prob.last().is_some_and(|&p| confident(p));
    let crossing = if resolved {
        let step = running_prob
            .iter()
            .zip(step_values)
            .filter(|&(&p, _)| confident(p))
            .map(|(_, &s)| s)
            .min();
        step.map(|step| Crossing { step, reached: true })
    } else {
        None
    };
    match crossing {
        Some(c) => Ok(c),
        None => {
            let max_step = step_values.iter().copied().max().unwrap_or(0);
            Ok(Crossing {
                step: max_step,
                reached: false,
            })
        }
    }
}

/// Expected conversions if the experiment stopped now and the `remaining`
/// population were routed to B with probability `p_b_ge_a`.
pub fn expected_conversions_at_step(
    conversions_so_far: u64,
    mean_a: f64,
    mean_b: f64,
    p_b_ge_a: f64,
    remaining: u64,
) -> u64 {
    let remaining = remaining as f64;
    let after_choice = mean_a * (1.0 - p_b_ge_a) * remaining + mean_b * p_b_ge_a * remaining;
    conversions_so_far + after_choice.round() as u64
}

/// Expected total conversions at every step of a scenario.
///
/// The remaining population saturates at zero once the experiment has used up
/// `total_population`.
pub fn conversions_on_choice(
    scenario: &Scenario,
    trials_accum: &[u64],
    total_population: u64,
) -> Result<Vec<u64>> {
    let n = scenario.prob_b_ge_a.len();
    if trials_accum.len() != n
        || scenario.a.posteriors.len() != n
        || scenario.b.posteriors.len() != n
    {
        return Err(Error::configuration(format!(
            "scenario curves and trial counts must align, got {} probabilities and {} trial counts",
            n,
            trials_accum.len()
        )));
    }
    let conversions = scenario.conversions_accum();
    Ok(izip!(
        &scenario.a.posteriors,
        &scenario.b.posteriors,
        &scenario.prob_b_ge_a,
        trials_accum,
        &conversions
    )
    .map(|(post_a, post_b, &p, &n_exp, &conv)| {
        let remaining = total_population.saturating_sub(n_exp);
        expected_conversions_at_step(conv, post_a.mean(), post_b.mean(), p, remaining)
    })
    .collect())
}

/// Index of the first maximum.
fn argmax(values: &[u64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, u64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    /// Required certainty in either direction.
    pub threshold: f64,
    pub n_simulations: usize,
    /// Draws per step for the running superiority curve.
    pub n_cmp: usize,
    /// Population for the expected-conversions policy; `None` skips it.
    pub total_population: Option<u64>,
    pub seed: u64,
    /// Dedicated worker count; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            n_simulations: 100,
            n_cmp: DEFAULT_N_CMP,
            total_population: Some(1_000_000),
            seed: 7,
            threads: None,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<()> {
        check_open_unit("certainty threshold", self.threshold)?;
        if self.n_simulations == 0 {
            return Err(Error::configuration("number of simulations must be positive"));
        }
        if self.n_cmp == 0 {
            return Err(Error::configuration("n_cmp must be positive"));
        }
        if self.threads == Some(0) {
            return Err(Error::configuration("thread count must be positive"));
        }
        Ok(())
    }
}

/// Reduction of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioOutcome {
    pub true_rate_a: f64,
    pub true_rate_b: f64,
    pub prob_b_ge_a: Vec<f64>,
    pub crossing: Crossing,
    pub expected_conversions: Option<Vec<u64>>,
    /// Step value with the highest expected conversions.
    pub optimal_step: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub step: u64,
    pub count: usize,
    pub fraction: f64,
}

/// Counts per distinct step value, normalised by the number of scenarios.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepHistogram {
    pub bins: Vec<HistogramBin>,
}

impl StepHistogram {
    pub fn from_steps(steps: &[u64]) -> Self {
        let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
        for &s in steps {
            *counts.entry(s).or_default() += 1;
        }
        let total = steps.len().max(1) as f64;
        let bins = counts
            .into_iter()
            .map(|(step, count)| HistogramBin {
                step,
                count,
                fraction: count as f64 / total,
            })
            .collect();
        Self { bins }
    }
}

/// Mean, median and histogram over one statistic of all scenarios.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub mean: f64,
    pub median: f64,
    pub histogram: StepHistogram,
}

impl StepSummary {
    pub fn from_steps(steps: &[u64]) -> Option<Self> {
        if steps.is_empty() {
            return None;
        }
        let values: Vec<f64> = steps.iter().map(|&s| s as f64).collect();
        let mean = values.iter().mean();
        let median = Data::new(values).median();
        Some(Self {
            mean,
            median,
            histogram: StepHistogram::from_steps(steps),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub step_values: Vec<u64>,
    pub outcomes: Vec<ScenarioOutcome>,
    /// Steps to certainty; censored scenarios contribute their lower bound.
    pub crossing: StepSummary,
    /// Share of scenarios that ended confident within the horizon.
    pub reached_fraction: f64,
    /// Steps maximising expected conversions, when a population was given.
    pub optimal: Option<StepSummary>,
}

/// Reduces one scenario to its crossing and expected-conversions optimum.
pub fn reduce_scenario(
    scenario: &Scenario,
    schedule: &TrialSchedule,
    threshold: f64,
    total_population: Option<u64>,
) -> Result<ScenarioOutcome> {
    let step_values = schedule.step_values();
    let crossing = first_crossing(&scenario.prob_b_ge_a, &step_values, threshold)?;
    let expected_conversions = match total_population {
        Some(total) => Some(conversions_on_choice(scenario, &schedule.combined_accum(), total)?),
        None => None,
    };
    let optimal_step = expected_conversions
        .as_deref()
        .and_then(argmax)
        .map(|i| step_values[i]);
    Ok(ScenarioOutcome {
        true_rate_a: scenario.a.true_rate,
        true_rate_b: scenario.b.true_rate,
        prob_b_ge_a: scenario.prob_b_ge_a.clone(),
        crossing,
        expected_conversions,
        optimal_step,
    })
}

/// Seed of scenario `counter`'s stream, derived with SplitMix64.
fn scenario_seed(base_seed: u64, counter: u64) -> u64 {
    let mut z = base_seed.wrapping_add(counter.wrapping_mul(0x9e3779b97f4a7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Simulates `n_simulations` futures from the current posteriors and
/// aggregates how long each needs to reach the certainty threshold.
///
/// Scenarios run in parallel, each on its own seeded stream, so the result
/// depends on `seed` only and not on the number of workers.
pub fn forecast_duration(
    current_a: &Posterior,
    current_b: &Posterior,
    schedule: &TrialSchedule,
    config: &ForecastConfig,
) -> Result<ForecastResult> {
    config.validate()?;
    let timer = Instant::now();
    info!(
        "Running {} simulations over {} steps ({} horizon), threshold {}",
        config.n_simulations,
        schedule.len(),
        schedule.unit(),
        config.threshold
    );

    let run = || -> Result<Vec<ScenarioOutcome>> {
        (0..config.n_simulations)
            .into_par_iter()
            .map(|i| {
                let seed = scenario_seed(config.seed, i as u64);
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                let scenario =
                    simulate_scenario(&mut rng, current_a, current_b, schedule, config.n_cmp)?;
                let outcome = reduce_scenario(
                    &scenario,
                    schedule,
                    config.threshold,
                    config.total_population,
                )?;
                debug!(
                    "Scenario {}: step {} (reached: {}), optimal step {:?}",
                    i, outcome.crossing.step, outcome.crossing.reached, outcome.optimal_step
                );
                Ok(outcome)
            })
            .collect()
    };
    let outcomes = match config.threads {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| {
                Error::configuration(format!("could not build a pool of {} workers: {}", n, e))
            })?
            .install(run)?,
        None => run()?,
    };

    let result = aggregate(schedule.step_values(), outcomes)?;
    info!(
        "Finished {} simulations in {:?}: mean step {:.1}, reached {:.0}%",
        config.n_simulations,
        timer.elapsed(),
        result.crossing.mean,
        100.0 * result.reached_fraction
    );
    Ok(result)
}

fn aggregate(step_values: Vec<u64>, outcomes: Vec<ScenarioOutcome>) -> Result<ForecastResult> {
    let crossing_steps: Vec<u64> = outcomes.iter().map(|o| o.crossing.step).collect();
    let crossing = StepSummary::from_steps(&crossing_steps)
        .ok_or_else(|| Error::configuration("no scenarios were simulated"))?;
    let reached = outcomes.iter().filter(|o| o.crossing.reached).count();
    let optimal_steps: Vec<u64> = outcomes.iter().filter_map(|o| o.optimal_step).collect();
    Ok(ForecastResult {
        step_values,
        reached_fraction: reached as f64 / outcomes.len() as f64,
        optimal: StepSummary::from_steps(&optimal_steps),
        crossing,
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::Prior;
    use crate::trajectory::{simulate, SimulatedTrajectory};
    use rand::SeedableRng;

    #[test]
    fn test_first_crossing_exact_index() {
        let probs = [0.5, 0.7, 0.9, 0.96, 0.97, 0.99];
        let steps = [0, 10, 20, 30, 40, 50];
        let c = first_crossing(&probs, &steps, 0.95).unwrap();
        assert_eq!(c, Crossing { step: 30, reached: true });
    }

    #[test]
    fn test_first_crossing_low_side() {
        let probs = [0.5, 0.3, 0.04, 0.01];
        let c = first_crossing(&probs, &[0, 1, 2, 3], 0.95).unwrap();
        assert_eq!(c, Crossing { step: 2, reached: true });
    }

    #[test]
    fn test_first_crossing_censored() {
        let probs = [0.5, 0.6, 0.7, 0.8];
        let steps = [0, 5000, 10_000, 15_000];
        let c = first_crossing(&probs, &steps, 0.95).unwrap();
        assert_eq!(c, Crossing { step: 15_000, reached: false });
    }

    #[test]
    fn test_crossing_at_final_step_is_distinct_from_censoring() {
        let steps = [0, 1, 2, 3];
        let reached = first_crossing(&[0.5, 0.6, 0.7, 0.96], &steps, 0.95).unwrap();
        let censored = first_crossing(&[0.5, 0.6, 0.7, 0.9], &steps, 0.95).unwrap();
        assert_eq!(reached.step, censored.step);
        assert!(reached.reached);
        assert!(!censored.reached);
    }

    #[test]
    fn test_first_crossing_requires_confident_end() {
        // Crosses early but falls back before the horizon ends.
        let c = first_crossing(&[0.5, 0.97, 0.8, 0.9], &[0, 1, 2, 3], 0.95).unwrap();
        assert_eq!(c, Crossing { step: 3, reached: false });
        // Crosses early, wavers, and ends confident: the earliest step counts.
        let c = first_crossing(&[0.5, 0.97, 0.8, 0.99], &[0, 1, 2, 3], 0.95).unwrap();
        assert_eq!(c, Crossing { step: 1, reached: true });
    }

    #[test]
    fn test_first_crossing_rejects_bad_input() {
        assert!(matches!(first_crossing(&[], &[], 0.95), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(
            first_crossing(&[0.5], &[0, 1], 0.95),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(first_crossing(&[0.5], &[0], 1.0), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_expected_conversions_at_step() {
        // 100 + round(0.1 * 0.25 * 1000 + 0.2 * 0.75 * 1000) = 100 + 175
        assert_eq!(expected_conversions_at_step(100, 0.1, 0.2, 0.75, 1000), 275);
        assert_eq!(expected_conversions_at_step(42, 0.1, 0.2, 0.5, 0), 42);
    }

    #[test]
    fn test_argmax_takes_first_maximum() {
        assert_eq!(argmax(&[1, 5, 3, 5]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    fn fixed_scenario() -> Scenario {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let schedule = [0, 100, 100];
        let a: SimulatedTrajectory = simulate(&mut rng, 0.1, &schedule, Prior::uniform()).unwrap();
        let b: SimulatedTrajectory = simulate(&mut rng, 0.2, &schedule, Prior::uniform()).unwrap();
        Scenario {
            a,
            b,
            prob_b_ge_a: vec![0.5, 0.9, 0.99],
        }
    }

    #[test]
    fn test_conversions_on_choice_saturates_remaining() {
        let scenario = fixed_scenario();
        let trials_accum = [0, 200, 400];
        let curve = conversions_on_choice(&scenario, &trials_accum, 300).unwrap();
        let conversions = scenario.conversions_accum();
        // Population exhausted at the last step, only observed conversions remain.
        assert_eq!(curve[2], conversions[2]);
        // Nothing observed yet at the first step.
        assert_eq!(curve[0], expected_conversions_at_step(0, 0.5, 0.5, 0.5, 300));
        assert!(matches!(
            conversions_on_choice(&scenario, &[0, 1], 300),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_step_summary() {
        let summary = StepSummary::from_steps(&[10, 20, 20, 30]).unwrap();
        assert!((summary.mean - 20.0).abs() < 1e-12);
        assert!((summary.median - 20.0).abs() < 1e-12);
        assert_eq!(summary.histogram.bins.len(), 3);
        assert_eq!(summary.histogram.bins[1], HistogramBin { step: 20, count: 2, fraction: 0.5 });
        assert!(StepSummary::from_steps(&[]).is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(ForecastConfig::default().validate().is_ok());
        let bad = [
            ForecastConfig { threshold: 1.0, ..Default::default() },
            ForecastConfig { n_simulations: 0, ..Default::default() },
            ForecastConfig { n_cmp: 0, ..Default::default() },
            ForecastConfig { threads: Some(0), ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));
        }
    }

    fn small_config(seed: u64, threads: Option<usize>) -> ForecastConfig {
        ForecastConfig {
            threshold: 0.95,
            n_simulations: 12,
            n_cmp: 500,
            total_population: Some(200_000),
            seed,
            threads,
        }
    }

    #[test]
    fn test_forecast_is_reproducible_across_thread_counts() {
        let a = Posterior::update(Prior::uniform(), 150, 1000).unwrap();
        let b = Posterior::update(Prior::uniform(), 170, 1000).unwrap();
        let schedule = TrialSchedule::by_population(20_000, 2000, 0.5).unwrap();
        let single = forecast_duration(&a, &b, &schedule, &small_config(11, Some(1))).unwrap();
        let many = forecast_duration(&a, &b, &schedule, &small_config(11, Some(4))).unwrap();
        assert_eq!(single, many);
        let other = forecast_duration(&a, &b, &schedule, &small_config(12, Some(2))).unwrap();
        assert_ne!(single.outcomes, other.outcomes);
    }

    #[test]
    fn test_forecast_result_shapes() {
        let a = Posterior::update(Prior::uniform(), 150, 1000).unwrap();
        let b = Posterior::update(Prior::uniform(), 170, 1000).unwrap();
        let schedule = TrialSchedule::by_days(1000, 8, 0.5).unwrap();
        let result = forecast_duration(&a, &b, &schedule, &small_config(5, None)).unwrap();
        assert_eq!(result.outcomes.len(), 12);
        assert_eq!(result.step_values, (0..=8).collect::<Vec<u64>>());
        for outcome in &result.outcomes {
            assert_eq!(outcome.prob_b_ge_a.len(), 9);
            assert!(outcome.crossing.step <= 8);
            if !outcome.crossing.reached {
                assert_eq!(outcome.crossing.step, 8);
            }
            assert!(outcome.optimal_step.is_some());
        }
        let total: usize = result.crossing.histogram.bins.iter().map(|b| b.count).sum();
        assert_eq!(total, 12);
        assert!((0.0..=1.0).contains(&result.reached_fraction));
        assert!(result.optimal.is_some());
    }

    #[test]
    fn test_decisive_difference_resolves_immediately() {
        let a = Posterior::update(Prior::uniform(), 1000, 10_000).unwrap();
        let b = Posterior::update(Prior::uniform(), 3000, 10_000).unwrap();
        let schedule = TrialSchedule::by_days(1000, 3, 0.5).unwrap();
        let config = ForecastConfig {
            total_population: None,
            ..small_config(1, None)
        };
        let result = forecast_duration(&a, &b, &schedule, &config).unwrap();
        assert_eq!(result.reached_fraction, 1.0);
        assert_eq!(result.crossing.mean, 0.0);
        assert!(result.optimal.is_none());
        assert!(result.outcomes.iter().all(|o| o.expected_conversions.is_none()));
    }
}
