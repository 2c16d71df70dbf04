//! SLURM integration.

mod adapter;
pub mod parser;
pub mod templates;

pub use adapter::{SlurmAdapter, SlurmConfig, SlurmState};
