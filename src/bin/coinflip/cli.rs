use clap::{Parser, ValueEnum};
use coinflip_utils::trajectory::HorizonUnit;

#[derive(Parser, Debug)]
#[command(
    name = "coinflip",
    version,
    about = "Bayesian A/B test summary and duration forecast for conversion data"
)]
pub struct Cli {
    #[arg(
        value_name = "OBSERVATIONS",
        help = "TSV with columns variant, period, trials, conversions"
    )]
    pub observations: String,

    #[arg(
        long,
        short = 'o',
        default_value = "coinflip",
        value_name = "OUT",
        help = "Output directory, must not exist"
    )]
    pub out: String,

    #[arg(long, default_value = "1.0", help = "Alpha of the Beta prior")]
    pub prior_alpha: f64,

    #[arg(long, default_value = "1.0", help = "Beta of the Beta prior")]
    pub prior_beta: f64,

    #[arg(long, default_value = "0.95", help = "Mass of the highest posterior density interval")]
    pub hpdi_mass: f64,

    #[arg(long, default_value = "3001", help = "Number of grid points for the HPDI search")]
    pub grid_size: usize,

    #[arg(
        long,
        default_value = "30000",
        help = "Posterior draws when comparing observed rates"
    )]
    pub n_sample: usize,

    #[arg(
        long,
        default_value = "0.95",
        help = "Required certainty that one variant is better"
    )]
    pub threshold: f64,

    #[arg(long, default_value = "100", help = "Number of simulated futures")]
    pub simulations: usize,

    #[arg(
        long,
        default_value = "10000",
        help = "Posterior draws per step in the simulated futures"
    )]
    pub n_cmp: usize,

    #[arg(
        value_enum,
        long,
        default_value = "days",
        value_name = "UNIT",
        help = "Forecast horizon unit"
    )]
    pub horizon: HorizonUnit,

    #[arg(
        long,
        help = "Trials per day in the days horizon [default: mean observed trials per period]"
    )]
    pub step_trials: Option<u64>,

    #[arg(long, default_value = "30", help = "Length of the days horizon")]
    pub max_days: usize,

    #[arg(long, default_value = "100000", help = "Largest population of the population horizon")]
    pub sim_max: u64,

    #[arg(
        long,
        default_value = "5000",
        help = "Population added per step of the population horizon"
    )]
    pub sim_step: u64,

    #[arg(
        long,
        help = "Fraction of future traffic routed to B [default: observed share of B]"
    )]
    pub b_split: Option<f64>,

    #[arg(
        long,
        default_value = "1000000",
        help = "Total population for the expected conversions estimate"
    )]
    pub total_population: u64,

    #[arg(long, default_value = "7", help = "Seed of the random streams")]
    pub seed: u64,

    #[arg(long, short, help = "Number of threads to use [default: all cores]")]
    pub threads: Option<usize>,

    #[arg(
        value_enum,
        long,
        default_value = "normal",
        value_name = "VERBOSITY",
        help = "Verbosity level"
    )]
    pub verbosity: LogLevel,
}

#[allow(non_camel_case_types)]
#[derive(ValueEnum, Clone, Debug)]
pub enum LogLevel {
    verbose,
    normal,
    silent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizon_argument() {
        let args = Cli::try_parse_from(["coinflip", "obs.tsv"]).unwrap();
        assert_eq!(args.horizon, HorizonUnit::Days);
        let args = Cli::try_parse_from(["coinflip", "obs.tsv", "--horizon", "population"]).unwrap();
        assert_eq!(args.horizon, HorizonUnit::Population);
        assert!(Cli::try_parse_from(["coinflip", "obs.tsv", "--horizon", "weeks"]).is_err());
    }
}
