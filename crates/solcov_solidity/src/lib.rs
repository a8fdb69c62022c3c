//! Model of compiled Solidity contracts as the coverage proxy sees them:
//! artifact files, decoded source maps and deployed-bytecode matching.

pub mod artifacts;
pub mod build_model;
mod log_once;
pub mod registry;
pub mod source_map;

pub use log_once::DedupLog;
pub use registry::{LoadError, Registry};
