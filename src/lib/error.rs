use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the statistical engine.
///
/// All of them are deterministic validation failures detected at the entry of a
/// function; nothing in the crate retries or substitutes a default value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Negative counts, conversions exceeding trials, or a non-positive prior.
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// Mass outside (0,1), empty schedules, zero sample counts and similar.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A density or sampling step that cannot produce a finite answer.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),
}

impl Error {
    pub fn observation(msg: impl Into<String>) -> Self {
        Error::InvalidObservation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }

    pub fn degeneracy(msg: impl Into<String>) -> Self {
        Error::NumericDegeneracy(msg.into())
    }
}

/// Checks that `value` lies in the open unit interval.
pub(crate) fn check_open_unit(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "{} must be in (0, 1), got {}",
            name, value
        )))
    }
}
