//! Direct execution on the local host, without a resource manager.

mod adapter;
pub mod parser;

pub use adapter::{DirectAdapter, DirectConfig};
