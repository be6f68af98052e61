use crate::error::{Error, Result};
use crate::variant::Variant;
use ahash::{HashMap, HashMapExt};
use log::debug;
use serde::Serialize;

/// Counts observed for one variant during one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub variant: Variant,
    pub period: u32,
    pub trials: u64,
    pub conversions: u64,
}

impl Observation {
    pub fn new(variant: Variant, period: u32, trials: u64, conversions: u64) -> Result<Self> {
        if conversions > trials {
            return Err(Error::observation(format!(
                "variant {} period {}: conversions {} exceed trials {}",
                variant, period, conversions, trials
            )));
        }
        Ok(Self {
            variant,
            period,
            trials,
            conversions,
        })
    }

    /// Builds an observation from signed counts, as handed over by foreign callers.
    pub fn from_signed(
        variant: Variant,
        period: u32,
        trials: i64,
        conversions: i64,
    ) -> Result<Self> {
        let trials = non_negative("trials", trials)?;
        let conversions = non_negative("conversions", conversions)?;
        Self::new(variant, period, trials, conversions)
    }
}

pub(crate) fn non_negative(name: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::observation(format!("{} must be non-negative, got {}", name, value)))
}

/// Running totals of one variant after a period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Accumulated {
    pub period: u32,
    pub trials: u64,
    pub conversions: u64,
    pub trials_accum: u64,
    pub conversions_accum: u64,
}

impl Accumulated {
    /// Observed conversion rate so far; a variant without trials reports 0.
    pub fn rate_accum(&self) -> f64 {
        if self.trials_accum == 0 {
            0.0
        } else {
            self.conversions_accum as f64 / self.trials_accum as f64
        }
    }
}

/// Prefix sums over the observations of a single variant, ordered by period.
///
/// The input may arrive in any order, but each period must appear once.
pub fn accumulate(observations: &[Observation]) -> Result<Vec<Accumulated>> {
    let mut sorted = observations.to_vec();
    sorted.sort_by_key(|o| o.period);
    if let Some(first) = sorted.first() {
        if let Some(other) = sorted.iter().find(|o| o.variant != first.variant) {
            return Err(Error::observation(format!(
                "cannot accumulate variants {} and {} together",
                first.variant, other.variant
            )));
        }
    }
    for pair in sorted.windows(2) {
        if pair[0].period == pair[1].period {
            return Err(Error::observation(format!(
                "variant {} has duplicate period {}",
                pair[0].variant, pair[0].period
            )));
        }
    }

    let mut trials_accum = 0u64;
    let mut conversions_accum = 0u64;
    let mut out = Vec::with_capacity(sorted.len());
    for obs in sorted {
        trials_accum += obs.trials;
        conversions_accum += obs.conversions;
        out.push(Accumulated {
            period: obs.period,
            trials: obs.trials,
            conversions: obs.conversions,
            trials_accum,
            conversions_accum,
        });
    }
    Ok(out)
}

/// Splits a mixed record into the per-variant series and accumulates each of them.
pub fn accumulate_by_variant(
    observations: &[Observation],
) -> Result<HashMap<Variant, Vec<Accumulated>>> {
    let mut grouped: HashMap<Variant, Vec<Observation>> = HashMap::new();
    for obs in observations {
        grouped.entry(obs.variant).or_default().push(*obs);
    }
    let mut out = HashMap::new();
    for (variant, records) in grouped {
        debug!("Accumulating {} periods for variant {}", records.len(), variant);
        out.insert(variant, accumulate(&records)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(variant: Variant, period: u32, trials: u64, conversions: u64) -> Observation {
        Observation::new(variant, period, trials, conversions).unwrap()
    }

    #[test]
    fn test_new_rejects_conversions_above_trials() {
        let result = Observation::new(Variant::A, 0, 3, 5);
        assert!(matches!(result, Err(Error::InvalidObservation(_))));
    }

    #[test]
    fn test_from_signed_rejects_negative_counts() {
        assert!(matches!(
            Observation::from_signed(Variant::B, 0, -1, 0),
            Err(Error::InvalidObservation(_))
        ));
        assert!(matches!(
            Observation::from_signed(Variant::B, 0, 10, -2),
            Err(Error::InvalidObservation(_))
        ));
        assert_eq!(
            Observation::from_signed(Variant::B, 4, 10, 2).unwrap(),
            obs(Variant::B, 4, 10, 2)
        );
    }

    #[test]
    fn test_accumulate_orders_by_period() {
        let records = vec![
            obs(Variant::A, 2, 100, 20),
            obs(Variant::A, 0, 100, 10),
            obs(Variant::A, 1, 50, 5),
        ];
        let acc = accumulate(&records).unwrap();
        assert_eq!(acc.iter().map(|a| a.period).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(acc.iter().map(|a| a.trials_accum).collect::<Vec<_>>(), vec![100, 150, 250]);
        assert_eq!(acc.iter().map(|a| a.conversions_accum).collect::<Vec<_>>(), vec![10, 15, 35]);
        assert!((acc[2].rate_accum() - 0.14).abs() < 1e-12);
    }

    #[test]
    fn test_accumulate_rejects_duplicates_and_mixed_variants() {
        let dup = vec![obs(Variant::A, 0, 10, 1), obs(Variant::A, 0, 10, 2)];
        assert!(matches!(accumulate(&dup), Err(Error::InvalidObservation(_))));
        let mixed = vec![obs(Variant::A, 0, 10, 1), obs(Variant::B, 1, 10, 2)];
        assert!(matches!(accumulate(&mixed), Err(Error::InvalidObservation(_))));
    }

    #[test]
    fn test_rate_accum_without_trials_is_zero() {
        let acc = accumulate(&[obs(Variant::B, 0, 0, 0)]).unwrap();
        assert_eq!(acc[0].rate_accum(), 0.0);
    }

    #[test]
    fn test_accumulate_by_variant() {
        let records = vec![
            obs(Variant::A, 0, 10, 1),
            obs(Variant::B, 0, 12, 3),
            obs(Variant::A, 1, 10, 2),
            obs(Variant::B, 1, 8, 1),
        ];
        let by_variant = accumulate_by_variant(&records).unwrap();
        assert_eq!(by_variant[&Variant::A].last().unwrap().trials_accum, 20);
        assert_eq!(by_variant[&Variant::B].last().unwrap().conversions_accum, 4);
    }
}
