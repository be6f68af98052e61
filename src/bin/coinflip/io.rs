use anyhow::{Context, Result};
use coinflip_utils::forecast::{ForecastResult, StepSummary};
use coinflip_utils::observation::Observation;
use coinflip_utils::summary::ExperimentSummary;
use coinflip_utils::trajectory::HorizonUnit;
use coinflip_utils::variant::Variant;
use csv::{ReaderBuilder, WriterBuilder};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use strum::IntoEnumIterator;

#[derive(Debug, Deserialize)]
struct ObservationRow {
    variant: String,
    period: u32,
    trials: i64,
    conversions: i64,
}

pub fn load_observations(path: &Path) -> Result<Vec<Observation>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Could not open observations file: {}", path.display()))?;

    let mut observations = Vec::new();
    for (line, row) in reader.deserialize::<ObservationRow>().enumerate() {
        let row = row.with_context(|| format!("Malformed row {} in {}", line + 2, path.display()))?;
        let variant: Variant = row.variant.parse()?;
        let observation = Observation::from_signed(variant, row.period, row.trials, row.conversions)
            .with_context(|| format!("Invalid row {} in {}", line + 2, path.display()))?;
        observations.push(observation);
    }
    info!("Loaded {} observations from {}", observations.len(), path.display());
    Ok(observations)
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    let writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Could not create {}", path.display()))?;
    Ok(writer)
}

/// Running totals, intervals and `P(B > A)` per observed period.
pub fn write_periods(path: &Path, summary: &ExperimentSummary) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "variant",
        "period",
        "trials_accum",
        "conversions_accum",
        "rate_accum",
        "hpdi_lower",
        "hpdi_upper",
        "prob_b_greater",
    ])?;
    for estimate in &summary.periods {
        let prob = summary
            .running_prob_b_greater
            .iter()
            .find(|(period, _)| *period == estimate.period)
            .map(|(_, p)| p.to_string())
            .unwrap_or_default();
        writer.write_record([
            estimate.variant.to_string(),
            estimate.period.to_string(),
            estimate.trials_accum.to_string(),
            estimate.conversions_accum.to_string(),
            estimate.rate_accum.to_string(),
            estimate.interval.lower.to_string(),
            estimate.interval.upper.to_string(),
            prob,
        ])?;
    }
    writer.flush()?;
    debug!("Wrote {} period rows to {}", summary.periods.len(), path.display());
    Ok(())
}

pub fn write_variants(path: &Path, summary: &ExperimentSummary) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "variant",
        "trials",
        "conversions",
        "rate",
        "alpha_post",
        "beta_post",
        "posterior_mean",
        "hpdi_lower",
        "hpdi_upper",
        "prob_best",
    ])?;
    for variant in Variant::iter() {
        let v = summary.variant(variant);
        writer.write_record([
            v.variant.to_string(),
            v.trials.to_string(),
            v.conversions.to_string(),
            v.rate.to_string(),
            v.posterior.alpha().to_string(),
            v.posterior.beta().to_string(),
            v.posterior.mean().to_string(),
            v.interval.lower.to_string(),
            v.interval.upper.to_string(),
            v.prob_best.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_scenarios(path: &Path, result: &ForecastResult) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "scenario",
        "true_rate_a",
        "true_rate_b",
        "crossing_step",
        "reached",
        "final_prob_b_ge_a",
        "optimal_step",
    ])?;
    for (i, outcome) in result.outcomes.iter().enumerate() {
        writer.write_record([
            i.to_string(),
            outcome.true_rate_a.to_string(),
            outcome.true_rate_b.to_string(),
            outcome.crossing.step.to_string(),
            outcome.crossing.reached.to_string(),
            outcome
                .prob_b_ge_a
                .last()
                .map(|p| p.to_string())
                .unwrap_or_default(),
            outcome.optimal_step.map(|s| s.to_string()).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    debug!("Wrote {} scenarios to {}", result.outcomes.len(), path.display());
    Ok(())
}

pub fn write_histogram(path: &Path, result: &ForecastResult) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["statistic", "step", "count", "fraction"])?;
    let mut statistics = vec![("crossing", &result.crossing)];
    if let Some(optimal) = &result.optimal {
        statistics.push(("optimal", optimal));
    }
    for (name, summary) in statistics {
        for bin in &summary.histogram.bins {
            writer.write_record([
                name.to_string(),
                bin.step.to_string(),
                bin.count.to_string(),
                bin.fraction.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct StepStatistic {
    mean: f64,
    median: f64,
}

impl From<&StepSummary> for StepStatistic {
    fn from(summary: &StepSummary) -> Self {
        Self {
            mean: summary.mean,
            median: summary.median,
        }
    }
}

#[derive(Debug, Serialize)]
struct ForecastSummary {
    horizon: HorizonUnit,
    threshold: f64,
    n_simulations: usize,
    prob_best_a: f64,
    prob_best_b: f64,
    relative_lift: f64,
    steps_to_certainty: StepStatistic,
    reached_fraction: f64,
    steps_for_max_conversions: Option<StepStatistic>,
}

pub fn write_forecast_summary(
    path: &Path,
    summary: &ExperimentSummary,
    result: &ForecastResult,
    horizon: HorizonUnit,
    threshold: f64,
) -> Result<()> {
    let report = ForecastSummary {
        horizon,
        threshold,
        n_simulations: result.outcomes.len(),
        prob_best_a: summary.a.prob_best,
        prob_best_b: summary.b.prob_best,
        relative_lift: summary.relative_lift,
        steps_to_certainty: StepStatistic::from(&result.crossing),
        reached_fraction: result.reached_fraction,
        steps_for_max_conversions: result.optimal.as_ref().map(StepStatistic::from),
    };
    let file = File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &report)?;
    Ok(())
}
