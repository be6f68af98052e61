use crate::error::Error;
use crate::forecast;
use crate::hpdi::HpdiEstimator;
use crate::observation::non_negative;
use crate::posterior::{Posterior, Prior};
use crate::superiority::{self, DEFAULT_N_CMP, DEFAULT_N_SAMPLE};
use crate::trajectory;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn seeded(seed: Option<u64>) -> Xoshiro256PlusPlus {
    match seed {
        Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
        None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
    }
}

fn unsigned(name: &str, values: &[i64]) -> Result<Vec<u64>, Error> {
    values.iter().map(|&v| non_negative(name, v)).collect()
}

#[pymodule]
fn coinflip_utils(_py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(posterior, m)?)?;
    m.add_function(wrap_pyfunction!(hpdi, m)?)?;
    m.add_function(wrap_pyfunction!(prob_b_greater, m)?)?;
    m.add_function(wrap_pyfunction!(prob_b_at_least_batch, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_trajectory, m)?)?;
    m.add_function(wrap_pyfunction!(first_crossing, m)?)?;
    Ok(())
}

#[pyfunction]
#[pyo3(signature = (conversions_accum, trials_accum, prior_alpha=1.0, prior_beta=1.0))]
pub fn posterior(
    conversions_accum: i64,
    trials_accum: i64,
    prior_alpha: f64,
    prior_beta: f64,
) -> PyResult<(f64, f64)> {
    let prior = Prior::new(prior_alpha, prior_beta)?;
    let conversions = non_negative("conversions_accum", conversions_accum)?;
    let trials = non_negative("trials_accum", trials_accum)?;
    Ok(crate::posterior::posterior(prior, conversions, trials)?)
}

#[pyfunction]
#[pyo3(signature = (alpha_post, beta_post, mass=0.95, grid_size=3001))]
pub fn hpdi(alpha_post: f64, beta_post: f64, mass: f64, grid_size: usize) -> PyResult<(f64, f64)> {
    let posterior = Posterior::update(Prior::new(alpha_post, beta_post)?, 0, 0)?;
    let interval = HpdiEstimator::new(grid_size)?.hpdi(&posterior, mass)?;
    Ok((interval.lower, interval.upper))
}

#[pyfunction]
#[pyo3(signature = (p_a, n_a, p_b, n_b, n_sample=DEFAULT_N_SAMPLE, seed=None))]
pub fn prob_b_greater(
    p_a: f64,
    n_a: i64,
    p_b: f64,
    n_b: i64,
    n_sample: usize,
    seed: Option<u64>,
) -> PyResult<f64> {
    let n_a = non_negative("n_a", n_a)?;
    let n_b = non_negative("n_b", n_b)?;
    let mut rng = seeded(seed);
    Ok(superiority::prob_b_greater(&mut rng, p_a, n_a, p_b, n_b, n_sample)?)
}

#[pyfunction]
#[pyo3(signature = (alpha_a, beta_a, alpha_b, beta_b, n_cmp=DEFAULT_N_CMP, seed=None))]
pub fn prob_b_at_least_batch(
    alpha_a: Vec<f64>,
    beta_a: Vec<f64>,
    alpha_b: Vec<f64>,
    beta_b: Vec<f64>,
    n_cmp: usize,
    seed: Option<u64>,
) -> PyResult<Vec<f64>> {
    let mut rng = seeded(seed);
    Ok(superiority::prob_b_at_least_batch_params(
        &mut rng, &alpha_a, &beta_a, &alpha_b, &beta_b, n_cmp,
    )?)
}

/// Column-wise trajectory, ready for a dataframe.
#[pyfunction]
#[pyo3(signature = (true_rate, trial_schedule, prior_alpha=1.0, prior_beta=1.0, seed=None))]
pub fn simulate_trajectory(
    py: Python<'_>,
    true_rate: f64,
    trial_schedule: Vec<i64>,
    prior_alpha: f64,
    prior_beta: f64,
    seed: Option<u64>,
) -> PyResult<Py<PyDict>> {
    let schedule = unsigned("trial_schedule", &trial_schedule)?;
    let prior = Prior::new(prior_alpha, prior_beta)?;
    let mut rng = seeded(seed);
    let trajectory = trajectory::simulate(&mut rng, true_rate, &schedule, prior)?;

    let dict = PyDict::new(py);
    dict.set_item("trials_accum", trajectory.trials_accum.clone())?;
    dict.set_item("conversions_accum", trajectory.conversions_accum.clone())?;
    dict.set_item("alpha_post", trajectory.alpha_post())?;
    dict.set_item("beta_post", trajectory.beta_post())?;
    Ok(dict.into())
}

/// Returns `(step, reached)`; `reached == False` marks a censored estimate.
#[pyfunction]
#[pyo3(signature = (running_prob, step_values, threshold=0.95))]
pub fn first_crossing(
    running_prob: Vec<f64>,
    step_values: Vec<i64>,
    threshold: f64,
) -> PyResult<(u64, bool)> {
    let steps = unsigned("step_values", &step_values)?;
    let crossing = forecast::first_crossing(&running_prob, &steps, threshold)?;
    Ok((crossing.step, crossing.reached))
}
