//! Reference samplers.

mod anneal;

pub use anneal::AnnealingSampler;
