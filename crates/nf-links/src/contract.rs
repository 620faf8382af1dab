//! The link contract the solver drives.

use std::any::Any;

use nf_core::Real;
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::core::LinkCore;

/// Upcast support so hosts can reach a concrete link behind the trait
/// object (networks register links by contract, but commanding a
/// particular breaker or converter needs its real type back).
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A link's verdict on the network solution just computed.
///
/// `Reject` discards the potentials and re-iterates; it must be
/// accompanied by a state change that alters the admittance matrix or
/// source vector on the next minor step, to guarantee progress. `Delay`
/// prevents acceptance without rolling back. The variants are ordered so
/// the worst verdict is the maximum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SolutionResult {
    #[default]
    Confirm,
    Delay,
    Reject,
}

impl SolutionResult {
    /// Worst-of aggregation: Reject dominates Delay dominates Confirm.
    pub fn worst(self, other: SolutionResult) -> SolutionResult {
        self.max(other)
    }
}

/// Direction of flow a port presented to its node during the last
/// `compute_flows`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    #[default]
    None,
    /// The link pushes flow into the attached node.
    Source,
    /// The link draws flow out of the attached node.
    Sink,
    Both,
}

/// Contract every network link implements.
///
/// The solver calls `step` once per major step in registration order,
/// `minor_step` on every subsequent minor-step iteration, polls
/// `confirm_solution_acceptable` after each solution, and finally calls
/// `compute_flows` in reverse registration order once a solution stands.
pub trait Link<N: NetworkNode>: Send + AsAny {
    fn core(&self) -> &LinkCore;

    fn core_mut(&mut self) -> &mut LinkCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Non-linear links are re-driven each minor step and get a vote on
    /// the solution.
    fn is_non_linear(&self) -> bool {
        false
    }

    /// Compute this link's admittance and source contributions for a new
    /// major step.
    fn step(&mut self, dt: Real, nodes: &mut [N]);

    /// Recompute contributions for a minor-step iteration. `minor_step`
    /// counts from 1 at the initial solution of the major step.
    fn minor_step(&mut self, _dt: Real, _minor_step: usize, _nodes: &mut [N]) {}

    /// The link's verdict on the freshly solved potentials.
    ///
    /// `converged_step` counts successive minor steps whose potentials
    /// changed by less than the solver tolerance, restarting at zero on
    /// every rejection; `absolute_step` counts all minor steps this major
    /// step.
    fn confirm_solution_acceptable(
        &mut self,
        _converged_step: usize,
        _absolute_step: usize,
    ) -> SolutionResult {
        SolutionResult::Confirm
    }

    /// Compute and transport flows for the accepted solution, reporting
    /// them into the endpoint nodes.
    fn compute_flows(&mut self, dt: Real, nodes: &mut [N]);

    /// Reset non-checkpointed, non-config state.
    fn restart(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_ordering() {
        use SolutionResult::*;
        assert_eq!(Confirm.worst(Delay), Delay);
        assert_eq!(Delay.worst(Reject), Reject);
        assert_eq!(Reject.worst(Confirm), Reject);
        assert_eq!(Confirm.worst(Confirm), Confirm);
    }
}
