//! Network spotter contract.

use nf_core::Real;
use nf_graph::NetworkNode;
use nf_links::AsAny;

/// A pre/post-solver callback attached to a network: sensors, monitors,
/// telemetry taps. Spotters observe nodes but never contribute to the
/// system of equations.
pub trait Spotter<N: NetworkNode>: Send + AsAny {
    fn name(&self) -> &str;

    /// Called before the solver runs each major step.
    fn pre_solver(&mut self, _dt: Real, _nodes: &[N]) {}

    /// Called after flows have been transported and integrated.
    fn post_solver(&mut self, _dt: Real, _nodes: &[N]) {}
}
