pub mod error;
pub mod forecast;
pub mod hpdi;
pub mod observation;
pub mod posterior;
pub mod summary;
pub mod superiority;
pub mod trajectory;
pub mod variant;

#[cfg(feature = "python")]
mod python;

pub use error::{Error, Result};
pub use posterior::{Posterior, Prior};
pub use variant::Variant;
