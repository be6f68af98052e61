use crate::error::{check_open_unit, Error, Result};
use crate::hpdi::{HpdiEstimator, Interval, DEFAULT_GRID_SIZE};
use crate::observation::{accumulate_by_variant, Accumulated, Observation};
use crate::posterior::{Posterior, Prior};
use crate::superiority::{compare, prob_b_greater, DEFAULT_N_SAMPLE};
use crate::variant::Variant;
use log::{debug, info};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub prior: Prior,
    /// HPDI mass.
    pub mass: f64,
    pub grid_size: usize,
    pub n_sample: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            prior: Prior::uniform(),
            mass: 0.95,
            grid_size: DEFAULT_GRID_SIZE,
            n_sample: DEFAULT_N_SAMPLE,
        }
    }
}

/// State of one variant after one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodEstimate {
    pub variant: Variant,
    pub period: u32,
    pub trials_accum: u64,
    pub conversions_accum: u64,
    pub rate_accum: f64,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantSummary {
    pub variant: Variant,
    pub trials: u64,
    pub conversions: u64,
    pub rate: f64,
    pub posterior: Posterior,
    pub interval: Interval,
    pub prob_best: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub periods: Vec<PeriodEstimate>,
    /// `(period, P(p_B > p_A))` from the accumulated rates of each period.
    pub running_prob_b_greater: Vec<(u32, f64)>,
    pub a: VariantSummary,
    pub b: VariantSummary,
    /// Mean of `p_B / p_A` under the final posteriors.
    pub relative_lift: f64,
}

impl ExperimentSummary {
    pub fn variant(&self, variant: Variant) -> &VariantSummary {
        match variant {
            Variant::A => &self.a,
            Variant::B => &self.b,
        }
    }

    /// Share of all observed trials that went to B.
    pub fn b_split(&self) -> f64 {
        let total = self.a.trials + self.b.trials;
        if total == 0 { 0.5 } else { self.b.trials as f64 / total as f64 }
    }
}

/// Running intervals and superiority over the observed periods, plus the
/// final per-variant summary.
///
/// Both variants must report the same periods.
pub fn analyze<R: Rng + ?Sized>(
    rng: &mut R,
    observations: &[Observation],
    config: &AnalysisConfig,
) -> Result<ExperimentSummary> {
    check_open_unit("HPDI mass", config.mass)?;
    config.prior.validate()?;
    let estimator = HpdiEstimator::new(config.grid_size)?;

    let mut by_variant = accumulate_by_variant(observations)?;
    let series_a = by_variant
        .remove(&Variant::A)
        .ok_or_else(|| Error::observation("no observations for variant A"))?;
    let series_b = by_variant
        .remove(&Variant::B)
        .ok_or_else(|| Error::observation("no observations for variant B"))?;
    let periods_a: Vec<u32> = series_a.iter().map(|a| a.period).collect();
    let periods_b: Vec<u32> = series_b.iter().map(|b| b.period).collect();
    if periods_a != periods_b {
        return Err(Error::observation(format!(
            "variants report different periods: A {:?}, B {:?}",
            periods_a, periods_b
        )));
    }
    info!(
        "Analyzing {} periods per variant, HPDI grid of {} points",
        series_a.len(),
        estimator.grid_size()
    );

    let mut periods = Vec::with_capacity(series_a.len() * 2);
    for (variant, series) in [(Variant::A, &series_a), (Variant::B, &series_b)] {
        for acc in series.iter() {
            periods.push(period_estimate(variant, acc, config, &estimator)?);
        }
    }

    let mut running_prob_b_greater = Vec::with_capacity(series_a.len());
    for (acc_a, acc_b) in series_a.iter().zip(&series_b) {
        let p = prob_b_greater(
            rng,
            acc_a.rate_accum(),
            acc_a.trials_accum,
            acc_b.rate_accum(),
            acc_b.trials_accum,
            config.n_sample,
        )?;
        debug!("Period {}: P(p_B > p_A) = {:.3}", acc_a.period, p);
        running_prob_b_greater.push((acc_a.period, p));
    }

    let last_a = final_state(&series_a)?;
    let last_b = final_state(&series_b)?;
    let posterior_a =
        Posterior::update(config.prior, last_a.conversions_accum, last_a.trials_accum)?;
    let posterior_b =
        Posterior::update(config.prior, last_b.conversions_accum, last_b.trials_accum)?;
    let comparison = compare(rng, &posterior_a, &posterior_b, config.n_sample)?;

    let a = VariantSummary {
        variant: Variant::A,
        trials: last_a.trials_accum,
        conversions: last_a.conversions_accum,
        rate: last_a.rate_accum(),
        posterior: posterior_a,
        interval: estimator.hpdi(&posterior_a, config.mass)?,
        prob_best: comparison.prob_best(Variant::A),
    };
    let b = VariantSummary {
        variant: Variant::B,
        trials: last_b.trials_accum,
        conversions: last_b.conversions_accum,
        rate: last_b.rate_accum(),
        posterior: posterior_b,
        interval: estimator.hpdi(&posterior_b, config.mass)?,
        prob_best: comparison.prob_best(Variant::B),
    };
    info!(
        "A: {}/{} ({:.2}%), B: {}/{} ({:.2}%), P(B best) = {:.3}",
        a.conversions,
        a.trials,
        100.0 * a.rate,
        b.conversions,
        b.trials,
        100.0 * b.rate,
        b.prob_best
    );

    Ok(ExperimentSummary {
        periods,
        running_prob_b_greater,
        a,
        b,
        relative_lift: comparison.relative_lift,
    })
}

fn final_state(series: &[Accumulated]) -> Result<Accumulated> {
    series
        .last()
        .copied()
        .ok_or_else(|| Error::observation("variant has no periods"))
}

fn period_estimate(
    variant: Variant,
    acc: &Accumulated,
    config: &AnalysisConfig,
    estimator: &HpdiEstimator,
) -> Result<PeriodEstimate> {
    let posterior = Posterior::update(config.prior, acc.conversions_accum, acc.trials_accum)?;
    Ok(PeriodEstimate {
        variant,
        period: acc.period,
        trials_accum: acc.trials_accum,
        conversions_accum: acc.conversions_accum,
        rate_accum: acc.rate_accum(),
        interval: estimator.hpdi(&posterior, config.mass)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn obs(variant: Variant, period: u32, trials: u64, conversions: u64) -> Observation {
        Observation::new(variant, period, trials, conversions).unwrap()
    }

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            grid_size: 1001,
            n_sample: 5000,
            ..Default::default()
        }
    }

    fn experiment() -> Vec<Observation> {
        let mut records = Vec::new();
        for day in 0..5 {
            records.push(obs(Variant::A, day, 1500, 150));
            records.push(obs(Variant::B, day, 1500, 240));
        }
        records
    }

    #[test]
    fn test_analyze_totals_and_intervals() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let summary = analyze(&mut rng, &experiment(), &fast_config()).unwrap();
        assert_eq!(summary.periods.len(), 10);
        assert_eq!(summary.a.trials, 7500);
        assert_eq!(summary.b.conversions, 1200);
        assert!((summary.a.rate - 0.1).abs() < 1e-12);
        assert!(summary.a.interval.lower < 0.1 && 0.1 < summary.a.interval.upper);
        assert!(summary.b.interval.lower < 0.16 && 0.16 < summary.b.interval.upper);
        assert!(summary.b.prob_best > 0.99);
        assert!((summary.a.prob_best + summary.b.prob_best - 1.0).abs() < 1e-12);
        assert!((summary.relative_lift - 1.6).abs() < 0.05);
        assert!((summary.b_split() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_intervals_narrow_as_data_accumulates() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(8);
        let summary = analyze(&mut rng, &experiment(), &fast_config()).unwrap();
        let widths: Vec<f64> = summary
            .periods
            .iter()
            .filter(|p| p.variant == Variant::A)
            .map(|p| p.interval.upper - p.interval.lower)
            .collect();
        for w in widths.windows(2) {
            assert!(w[1] <= w[0]);
        }
    }

    #[test]
    fn test_running_probability_per_period() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let summary = analyze(&mut rng, &experiment(), &fast_config()).unwrap();
        let periods: Vec<u32> = summary.running_prob_b_greater.iter().map(|(p, _)| *p).collect();
        assert_eq!(periods, vec![0, 1, 2, 3, 4]);
        assert!(summary.running_prob_b_greater.iter().all(|(_, p)| *p > 0.99));
    }

    #[test]
    fn test_zero_conversion_period_with_sharp_prior() {
        let records = vec![
            obs(Variant::A, 0, 10, 0),
            obs(Variant::B, 0, 10, 0),
            obs(Variant::A, 1, 200, 12),
            obs(Variant::B, 1, 200, 15),
        ];
        let config = AnalysisConfig {
            prior: Prior::new(0.9, 1.0).unwrap(),
            ..fast_config()
        };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(10);
        let summary = analyze(&mut rng, &records, &config).unwrap();
        let first = summary
            .periods
            .iter()
            .find(|p| p.variant == Variant::A && p.period == 0)
            .unwrap();
        assert_eq!(first.interval.lower, 0.0);
        assert!(first.interval.upper < 0.5);
        assert_eq!(summary.a.conversions, 12);
    }

    #[test]
    fn test_analyze_rejects_misaligned_or_missing_variants() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let only_a = vec![obs(Variant::A, 0, 10, 1)];
        assert!(matches!(
            analyze(&mut rng, &only_a, &fast_config()),
            Err(Error::InvalidObservation(_))
        ));
        let misaligned = vec![obs(Variant::A, 0, 10, 1), obs(Variant::B, 1, 10, 1)];
        assert!(matches!(
            analyze(&mut rng, &misaligned, &fast_config()),
            Err(Error::InvalidObservation(_))
        ));
        let bad_mass = AnalysisConfig { mass: 1.0, ..fast_config() };
        assert!(matches!(
            analyze(&mut rng, &experiment(), &bad_mass),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
