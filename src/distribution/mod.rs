//! Statistical distributions used to pace traffic.

use thiserror::Error;

pub mod poisson;

pub use poisson::PoissonDistribution;

/// Invalid distribution parameters. These are rejected at construction time
/// and never clamped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistributionError {
    #[error("Poisson rate must be a finite value >= 0, got {0}")]
    InvalidLambda(f64),
}
