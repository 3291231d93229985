// Workgate Infrastructure - Compute Kernels
// Implements: WorkEngine

pub mod kernels;
pub mod synthetic_engine;

pub use synthetic_engine::SyntheticWorkEngine;
