//! Network node state and the node-kind abstraction.

use std::sync::Arc;

use nf_core::{CoreError, CoreResult, Real};
use serde::{Deserialize, Serialize};

use crate::island::Island;

/// A junction in the network with a scalar potential.
///
/// The potential's unit depends on the network aspect: volts for
/// electrical, kPa for fluid, K for thermal. Flux accumulators are
/// whatever the conjugate flow quantity is (amps, kg/s, W).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicNode {
    name: String,
    potential: Real,
    influx_rate: Real,
    outflux_rate: Real,
    net_flux: Real,
    flux_through: Real,
    /// Effective dA/dp seen by this node, produced by the solver on request.
    network_capacitance: Real,
    /// Non-zero value asks the solver to compute this node's column of the
    /// inverse admittance matrix on the next factorization.
    network_capacitance_request: Real,
    /// Potential change at every node per unit flux added at this node,
    /// refreshed with the network capacitance.
    #[serde(skip)]
    net_cap_delta_potential: Vec<Real>,
    /// Outflux the links have told the solver to plan for this step, used
    /// for overflow detection by capacitive node kinds.
    scheduled_outflux: Real,
    /// Island this node currently belongs to, shared with all members.
    #[serde(skip)]
    island: Option<Arc<Island>>,
}

impl BasicNode {
    /// Create a node with a name and initial potential.
    pub fn new(name: impl Into<String>, potential: Real) -> Self {
        Self {
            name: name.into(),
            potential,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn potential(&self) -> Real {
        self.potential
    }

    /// Write a solved potential directly. The solver and richer node kinds
    /// use this; everything else reads through `potential()`.
    pub fn write_potential(&mut self, potential: Real) {
        self.potential = potential;
    }

    pub fn influx_rate(&self) -> Real {
        self.influx_rate
    }

    pub fn outflux_rate(&self) -> Real {
        self.outflux_rate
    }

    pub fn net_flux(&self) -> Real {
        self.net_flux
    }

    pub fn flux_through(&self) -> Real {
        self.flux_through
    }

    /// Clear the flow accumulators for a new major step.
    pub fn reset_flows(&mut self) {
        self.influx_rate = 0.0;
        self.outflux_rate = 0.0;
        self.scheduled_outflux = 0.0;
    }

    /// Accumulate flow into the node. Negative rates are rejected.
    pub fn collect_influx(&mut self, rate: Real) -> CoreResult<()> {
        if rate < 0.0 {
            return Err(CoreError::InvalidArg {
                what: "influx rate < 0",
            });
        }
        self.influx_rate += rate;
        Ok(())
    }

    /// Accumulate flow out of the node. Negative rates are rejected.
    pub fn collect_outflux(&mut self, rate: Real) -> CoreResult<()> {
        if rate < 0.0 {
            return Err(CoreError::InvalidArg {
                what: "outflux rate < 0",
            });
        }
        self.outflux_rate += rate;
        Ok(())
    }

    /// Accumulate a signed influx rate without the non-negativity check.
    /// Richer node kinds use this where a link may retract previously
    /// collected flow (e.g. an adsorber pulling mass out of its thru-flow).
    pub fn collect_influx_signed(&mut self, rate: Real) {
        self.influx_rate += rate;
    }

    /// Overwrite the integrated flux report. Node kinds that compute their
    /// own outflow accounting (fluid) publish their numbers through this.
    pub fn set_flux_report(&mut self, net_flux: Real, flux_through: Real) {
        self.net_flux = net_flux;
        self.flux_through = flux_through;
    }

    /// Links call this during their step to tell the node how much outflow
    /// the solver has been asked to produce, ahead of transport.
    pub fn schedule_outflux(&mut self, rate: Real) {
        self.scheduled_outflux += rate;
    }

    pub fn scheduled_outflux(&self) -> Real {
        self.scheduled_outflux
    }

    /// Net and through flux from the accumulators, for model insight.
    pub fn integrate_flows(&mut self) {
        self.net_flux = self.influx_rate - self.outflux_rate;
        self.flux_through = self.influx_rate.min(self.outflux_rate);
    }

    pub fn network_capacitance(&self) -> Real {
        self.network_capacitance
    }

    /// Request a network capacitance computation on the next factorization.
    pub fn request_network_capacitance(&mut self, flux: Real) {
        self.network_capacitance_request = flux;
    }

    pub fn network_capacitance_request(&self) -> Real {
        self.network_capacitance_request
    }

    pub fn set_network_capacitance(&mut self, capacitance: Real, delta_potential: Vec<Real>) {
        self.network_capacitance = capacitance;
        self.net_cap_delta_potential = delta_potential;
        self.network_capacitance_request = 0.0;
    }

    pub fn net_cap_delta_potential(&self) -> &[Real] {
        &self.net_cap_delta_potential
    }

    pub fn set_island(&mut self, island: Option<Arc<Island>>) {
        self.island = island;
    }

    pub fn island(&self) -> Option<&Arc<Island>> {
        self.island.as_ref()
    }

    /// Reset non-config, non-checkpointed state after a checkpoint load.
    pub fn restart(&mut self) {
        self.influx_rate = 0.0;
        self.outflux_rate = 0.0;
        self.net_flux = 0.0;
        self.flux_through = 0.0;
        self.network_capacitance_request = 0.0;
        self.scheduled_outflux = 0.0;
        self.island = None;
        self.net_cap_delta_potential.clear();
    }
}

/// Node-kind abstraction the solver and link library are generic over.
///
/// `BasicNode` implements it directly; richer node kinds (fluid) wrap a
/// `BasicNode` and override the potential write and flow integration.
pub trait NetworkNode: Send {
    fn base(&self) -> &BasicNode;
    fn base_mut(&mut self) -> &mut BasicNode;

    /// Write the solved potential into the node.
    fn set_potential(&mut self, potential: Real) {
        self.base_mut().write_potential(potential);
    }

    /// Clear per-step flow accumulators.
    fn reset_flows(&mut self) {
        self.base_mut().reset_flows();
    }

    /// Integrate collected flows into internal state.
    fn integrate_flows(&mut self, dt: Real);

    /// Signed potential adjustment the solver should apply after the step
    /// is accepted. Zero for node kinds without an equation of state.
    fn compute_pressure_correction(&mut self) -> Real {
        0.0
    }

    /// True when more outflow is scheduled this step than the node holds.
    fn is_overflowing(&self, _dt: Real) -> bool {
        false
    }

    /// Reset non-config, non-checkpointed state.
    fn restart(&mut self);
}

impl NetworkNode for BasicNode {
    fn base(&self) -> &BasicNode {
        self
    }

    fn base_mut(&mut self) -> &mut BasicNode {
        self
    }

    fn integrate_flows(&mut self, _dt: Real) {
        BasicNode::integrate_flows(self);
    }

    fn restart(&mut self) {
        BasicNode::restart(self);
    }
}

/// Borrow two distinct elements of a slice mutably.
///
/// Panics if `a == b` or either index is out of range; links guarantee
/// distinct port nodes by construction.
pub fn pair_mut<T>(slice: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert!(a != b, "pair_mut requires distinct indices");
    if a < b {
        let (lo, hi) = slice.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = slice.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flux_accumulation_and_integration() {
        let mut node = BasicNode::new("n0", 1.0);
        node.collect_influx(3.0).unwrap();
        node.collect_outflux(1.0).unwrap();
        node.integrate_flows();
        assert_eq!(node.net_flux(), 2.0);
        assert_eq!(node.flux_through(), 1.0);

        node.reset_flows();
        assert_eq!(node.influx_rate(), 0.0);
        assert_eq!(node.outflux_rate(), 0.0);
    }

    #[test]
    fn negative_rates_rejected() {
        let mut node = BasicNode::new("n0", 0.0);
        assert!(node.collect_influx(-1.0).is_err());
        assert!(node.collect_outflux(-1.0).is_err());
    }

    #[test]
    fn restart_clears_transients_keeps_potential() {
        let mut node = BasicNode::new("n0", 5.0);
        node.collect_influx(1.0).unwrap();
        node.schedule_outflux(0.5);
        node.restart();
        assert_eq!(node.potential(), 5.0);
        assert_eq!(node.influx_rate(), 0.0);
        assert_eq!(node.scheduled_outflux(), 0.0);
    }

    #[test]
    fn pair_mut_both_orders() {
        let mut v = vec![1, 2, 3, 4];
        {
            let (a, b) = pair_mut(&mut v, 0, 3);
            *a = 10;
            *b = 40;
        }
        {
            let (a, b) = pair_mut(&mut v, 2, 1);
            *a = 30;
            *b = 20;
        }
        assert_eq!(v, vec![10, 20, 30, 40]);
    }
}
