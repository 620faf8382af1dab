//! nf-graph: node model and island decomposition for nodeflow networks.
//!
//! A network is a contiguous array of nodes indexed 0..num_nodes, with the
//! Ground node always last. Links reference nodes by index only; this crate
//! knows nothing about links beyond the admittance adjacency the solver
//! feeds into the island decomposer.

pub mod island;
pub mod node;

pub use island::{decompose, Island};
pub use node::{pair_mut, BasicNode, NetworkNode};
