//! nf-sim: network assembly, orchestration and composition.
//!
//! A `Network` owns its nodes, links and spotters and drives the solver
//! each major step. Multiple networks can be merged into a
//! `SuperNetwork` sharing one index space and one solver.

pub mod analyzer;
pub mod error;
pub mod network;
pub mod supernet;

pub use analyzer::{IslandAnalyzer, VolumeMonitor};
pub use error::{SimError, SimResult};
pub use network::Network;
pub use supernet::SuperNetwork;
