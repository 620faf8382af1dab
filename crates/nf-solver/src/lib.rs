//! nf-solver: system assembly, per-island factorization and the
//! major/minor step loop.
//!
//! Each major step the solver gathers every link's admittance and source
//! contributions into `A·p = w`, partitions the nodes into islands,
//! factors and solves each island independently, and then iterates minor
//! steps until every non-linear link confirms the solution (or the
//! iteration budget runs out). Accepted solutions are handed to the flow
//! orchestrator for transport and integration.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod solver;
pub mod spotter;

pub use config::SolverConfig;
pub use error::{SolverError, SolverResult};
pub use orchestrator::FlowOrchestrator;
pub use solver::Solver;
pub use spotter::Spotter;
