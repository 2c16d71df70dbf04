//! PBS (Portable Batch System) integration.
//!
//! Supports PBS Pro and Torque. It mirrors the SLURM adapter so that jobs
//! are submitted the same way to either scheduler.

mod adapter;
pub mod parser;
pub mod templates;

pub use adapter::{PbsAdapter, PbsConfig, PbsJobInfo, PbsState};
