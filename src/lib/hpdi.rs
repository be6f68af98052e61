//! Highest posterior density intervals on a discretised grid.
//!
//! The search starts at the densest grid point and grows a window one neighbour
//! at a time, always taking the denser side, until the window holds `mass` of
//! the summed grid density. The sum over the grid stands in for the normalising
//! constant, so precision is bounded by the grid spacing.
//!
//! A prior with `alpha < 1` (or `beta < 1`) and no data on that side has an
//! unbounded density at 0 (or 1). The endpoint cell is then evaluated half a
//! grid step inwards, which keeps the sum finite and lets the window start at
//! the boundary.

use crate::error::{check_open_unit, Error, Result};
use crate::posterior::Posterior;
use serde::Serialize;

/// Grid resolution used when none is configured.
pub const DEFAULT_GRID_SIZE: usize = 3001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub struct HpdiEstimator {
    grid: Vec<f64>,
}

impl HpdiEstimator {
    pub fn new(grid_size: usize) -> Result<Self> {
        if grid_size < 2 {
            return Err(Error::configuration(format!(
                "HPDI grid needs at least 2 points, got {}",
                grid_size
            )));
        }
        Ok(Self {
            grid: grid(grid_size),
        })
    }

    pub fn grid_size(&self) -> usize {
        self.grid.len()
    }

    /// Shortest interval holding `mass` of the posterior, up to grid resolution.
    pub fn hpdi(&self, posterior: &Posterior, mass: f64) -> Result<Interval> {
        check_open_unit("HPDI mass", mass)?;

        let density = self.density(posterior);
        let norm: f64 = density.iter().sum();
        if !norm.is_finite() || norm <= 0.0 {
            return Err(Error::degeneracy(format!(
                "density of Beta({}, {}) sums to {} over the grid",
                posterior.alpha(),
                posterior.beta(),
                norm
            )));
        }

        let start = densest_index(&density);
        let last = density.len() - 1;
        let target = mass * norm;
        let (mut left, mut right) = (start, start);
        let mut sum = density[start];

        while sum < target {
            // Out-of-range neighbours never win.
            let next_left = if left > 0 { Some(density[left - 1]) } else { None };
            let next_right = if right < last { Some(density[right + 1]) } else { None };
            match (next_left, next_right) {
                (None, None) => break,
                (Some(l), None) => {
                    left -= 1;
                    sum += l;
                }
                (None, Some(r)) => {
                    right += 1;
                    sum += r;
                }
                (Some(l), Some(r)) => {
                    if l > r {
                        left -= 1;
                        sum += l;
                    } else if l < r {
                        right += 1;
                        sum += r;
                    } else {
                        left -= 1;
                        right += 1;
                        sum += l + r;
                    }
                }
            }
        }

        Ok(Interval {
            lower: self.grid[left],
            upper: self.grid[right],
        })
    }

    /// Grid densities with infinite endpoints moved half a step inwards.
    fn density(&self, posterior: &Posterior) -> Vec<f64> {
        let half_step = 0.5 * self.grid[1];
        let last = self.grid.len() - 1;
        self.grid
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let d = posterior.pdf(p);
                match (d.is_infinite(), i) {
                    (true, 0) => posterior.pdf(half_step),
                    (true, i) if i == last => posterior.pdf(1.0 - half_step),
                    _ => d,
                }
            })
            .collect()
    }
}

impl Default for HpdiEstimator {
    fn default() -> Self {
        Self {
            grid: grid(DEFAULT_GRID_SIZE),
        }
    }
}

/// `n` equally spaced points from 0 to 1 inclusive.
fn grid(n: usize) -> Vec<f64> {
    let last = (n - 1) as f64;
    (0..n).map(|i| i as f64 / last).collect()
}

/// Index of the maximum density. A flat top starts from the middle of its
/// first plateau so that uniform stretches grow symmetrically.
fn densest_index(density: &[f64]) -> usize {
    let max = density.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let first = density.iter().position(|&d| d == max).unwrap_or(0);
    let width = density[first..].iter().take_while(|&&d| d == max).count();
    first + width.saturating_sub(1) / 2
}

/// HPDI on the default grid.
pub fn hpdi(posterior: &Posterior, mass: f64) -> Result<Interval> {
    HpdiEstimator::default().hpdi(posterior, mass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::Prior;

    fn post(conversions: u64, trials: u64) -> Posterior {
        Posterior::update(Prior::uniform(), conversions, trials).unwrap()
    }

    #[test]
    fn test_uniform_prior_interval() {
        let interval = hpdi(&post(0, 0), 0.95).unwrap();
        assert!((interval.lower - 0.025).abs() < 1e-3, "{:?}", interval);
        assert!((interval.upper - 0.975).abs() < 1e-3, "{:?}", interval);
    }

    #[test]
    fn test_interval_contains_mean_and_is_ordered() {
        let p = post(150, 1000);
        let interval = hpdi(&p, 0.9).unwrap();
        assert!(interval.lower <= interval.upper);
        assert!(interval.lower <= p.mean() && p.mean() <= interval.upper);
        assert!(interval.lower >= 0.0 && interval.upper <= 1.0);
    }

    #[test]
    fn test_matches_normal_approximation_for_large_counts() {
        let p = post(3000, 20000);
        let interval = hpdi(&p, 0.95).unwrap();
        let half_width = 1.96 * p.stddev();
        assert!((interval.lower - (p.mean() - half_width)).abs() < 1.5e-3);
        assert!((interval.upper - (p.mean() + half_width)).abs() < 1.5e-3);
    }

    #[test]
    fn test_monotone_in_mass() {
        for (conversions, trials) in [(0, 0), (3, 40), (50, 60), (400, 5000)] {
            let p = post(conversions, trials);
            let mut previous: Option<Interval> = None;
            for mass in [0.5, 0.8, 0.9, 0.95, 0.99] {
                let interval = hpdi(&p, mass).unwrap();
                if let Some(prev) = previous {
                    assert!(interval.lower <= prev.lower, "mass {} {:?}", mass, interval);
                    assert!(interval.upper >= prev.upper, "mass {} {:?}", mass, interval);
                }
                previous = Some(interval);
            }
        }
    }

    #[test]
    fn test_mode_at_zero_clamps_left_boundary() {
        // Beta(1, 6): density is maximal at p = 0.
        let interval = hpdi(&post(0, 5), 0.95).unwrap();
        assert_eq!(interval.lower, 0.0);
        assert!(interval.upper > 0.2 && interval.upper < 0.6, "{:?}", interval);
    }

    #[test]
    fn test_mode_at_one_clamps_right_boundary() {
        // Beta(4, 1): density is maximal at p = 1.
        let interval = hpdi(&post(3, 3), 0.95).unwrap();
        assert_eq!(interval.upper, 1.0);
        assert!(interval.lower > 0.3 && interval.lower < 0.7, "{:?}", interval);
    }

    #[test]
    fn test_single_trial_edges() {
        let zero = hpdi(&post(0, 1), 0.9).unwrap();
        assert_eq!(zero.lower, 0.0);
        let one = hpdi(&post(1, 1), 0.9).unwrap();
        assert_eq!(one.upper, 1.0);
    }

    #[test]
    fn test_rejects_bad_mass_and_grid() {
        for mass in [0.0, 1.0, -0.5, 2.0] {
            assert!(matches!(hpdi(&post(1, 2), mass), Err(Error::InvalidConfiguration(_))));
        }
        assert!(matches!(HpdiEstimator::new(1), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_unbounded_density_at_zero_starts_at_boundary() {
        let jeffreys = Prior::new(0.5, 0.5).unwrap();
        let p = Posterior::update(jeffreys, 0, 200).unwrap();
        let interval = hpdi(&p, 0.95).unwrap();
        assert_eq!(interval.lower, 0.0);
        assert!(interval.upper > 0.0 && interval.upper < 0.05, "{:?}", interval);

        let p = Posterior::update(Prior::new(0.9, 1.0).unwrap(), 0, 10).unwrap();
        let interval = hpdi(&p, 0.95).unwrap();
        assert_eq!(interval.lower, 0.0);
        assert!(interval.upper > 0.1 && interval.upper < 0.4, "{:?}", interval);
    }

    #[test]
    fn test_unbounded_density_at_one_starts_at_boundary() {
        let p = Posterior::update(Prior::new(1.0, 0.5).unwrap(), 50, 50).unwrap();
        let interval = hpdi(&p, 0.9).unwrap();
        assert_eq!(interval.upper, 1.0);
        assert!(interval.lower > 0.9, "{:?}", interval);
    }

    #[test]
    fn test_prior_without_data_has_finite_interval() {
        let jeffreys = Prior::new(0.5, 0.5).unwrap();
        let p = Posterior::update(jeffreys, 0, 0).unwrap();
        let interval = hpdi(&p, 0.9).unwrap();
        // U-shaped: the window grows from whichever endpoint is densest.
        assert!(interval.lower == 0.0 || interval.upper == 1.0, "{:?}", interval);
        assert!(interval.upper - interval.lower < 1.0);
    }

    #[test]
    fn test_zero_density_grid_is_degenerate() {
        // Beta(2, 2) vanishes at both points of a two-point grid.
        let estimator = HpdiEstimator::new(2).unwrap();
        let p = post(1, 2);
        assert!(matches!(estimator.hpdi(&p, 0.9), Err(Error::NumericDegeneracy(_))));
    }

    #[test]
    fn test_coarse_grid_still_brackets_the_mode() {
        let estimator = HpdiEstimator::new(11).unwrap();
        let p = post(5, 10);
        let interval = estimator.hpdi(&p, 0.6).unwrap();
        assert!(interval.lower <= 0.5 && 0.5 <= interval.upper);
        assert_eq!(estimator.grid_size(), 11);
    }
}
