use anyhow::{bail, Result};
use clap::Parser;
use coinflip_utils::forecast::{forecast_duration, ForecastConfig};
use coinflip_utils::observation::Observation;
use coinflip_utils::posterior::Prior;
use coinflip_utils::summary::{analyze, AnalysisConfig};
use coinflip_utils::trajectory::{HorizonUnit, TrialSchedule};
use env_logger::Env;
use log::info;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::Path;
use std::time::Instant;

mod cli;
mod io;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    // Set up logging level
    match args.verbosity {
        cli::LogLevel::silent => {
            env_logger::Builder::from_env(Env::default().default_filter_or("off")).init();
        }
        cli::LogLevel::normal => {
            env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
        }
        cli::LogLevel::verbose => {
            env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();
        }
    }

    let out_path = Path::new(&args.out);
    if out_path.exists() {
        bail!("Output directory already exists: {}", args.out);
    }
    std::fs::create_dir(out_path)?;
    info!("Created output directory");

    coinflip(&args)?;
    info!("Finished");
    Ok(())
}

/// Mean combined trials of both variants per observed period.
fn mean_trials_per_period(observations: &[Observation]) -> u64 {
    let mut periods: Vec<u32> = observations.iter().map(|o| o.period).collect();
    periods.sort_unstable();
    periods.dedup();
    let total: u64 = observations.iter().map(|o| o.trials).sum();
    match periods.len() {
        0 => 0,
        n => (total as f64 / n as f64).round() as u64,
    }
}

fn coinflip(args: &cli::Cli) -> Result<()> {
    let global_timer = Instant::now();
    let observations = io::load_observations(Path::new(&args.observations))?;

    let analysis_config = AnalysisConfig {
        prior: Prior::new(args.prior_alpha, args.prior_beta)?,
        mass: args.hpdi_mass,
        grid_size: args.grid_size,
        n_sample: args.n_sample,
    };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(args.seed);
    let summary = analyze(&mut rng, &observations, &analysis_config)?;

    let outdir = Path::new(&args.out);
    io::write_periods(&outdir.join("periods.tsv"), &summary)?;
    io::write_variants(&outdir.join("variants.tsv"), &summary)?;

    let horizon = args.horizon;
    let b_split = args.b_split.unwrap_or_else(|| summary.b_split());
    let schedule = match horizon {
        HorizonUnit::Days => {
            let step_trials = args
                .step_trials
                .unwrap_or_else(|| mean_trials_per_period(&observations));
            info!(
                "Days horizon: {} days of {} trials, {:.3} to B",
                args.max_days, step_trials, b_split
            );
            TrialSchedule::by_days(step_trials, args.max_days, b_split)?
        }
        HorizonUnit::Population => {
            info!(
                "Population horizon: up to {} in steps of {}, {:.3} to B",
                args.sim_max, args.sim_step, b_split
            );
            TrialSchedule::by_population(args.sim_max, args.sim_step, b_split)?
        }
    };

    let forecast_config = ForecastConfig {
        threshold: args.threshold,
        n_simulations: args.simulations,
        n_cmp: args.n_cmp,
        total_population: Some(args.total_population),
        seed: args.seed,
        threads: args.threads,
    };
    let result = forecast_duration(
        &summary.a.posterior,
        &summary.b.posterior,
        &schedule,
        &forecast_config,
    )?;

    io::write_scenarios(&outdir.join("forecast_scenarios.tsv"), &result)?;
    io::write_histogram(&outdir.join("forecast_histogram.tsv"), &result)?;
    io::write_forecast_summary(
        &outdir.join("forecast_summary.json"),
        &summary,
        &result,
        horizon,
        args.threshold,
    )?;
    info!("Finished processing in {:?}", global_timer.elapsed());
    Ok(())
}
