//! Ideal flow source.

use nf_core::Real;
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::Link;
use crate::core::LinkCore;
use crate::error::LinkResult;

/// Pushes a demanded flux into port 0, drawing it through port 1. Pure
/// source-vector contribution with no admittance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSource {
    core: LinkCore,
    flux_demand: Real,
    effective_flux: Real,
}

impl CurrentSource {
    pub fn new(
        name: impl Into<String>,
        flux_demand: Real,
        ports: [usize; 2],
        num_nodes: usize,
    ) -> LinkResult<Self> {
        let core = LinkCore::new(name, ports.to_vec(), num_nodes)?;
        Ok(Self {
            core,
            flux_demand,
            effective_flux: 0.0,
        })
    }

    pub fn flux_demand(&self) -> Real {
        self.flux_demand
    }

    pub fn set_flux_demand(&mut self, demand: Real) {
        self.flux_demand = demand;
    }
}

impl<N: NetworkNode> Link<N> for CurrentSource {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn step(&mut self, _dt: Real, _nodes: &mut [N]) {
        self.effective_flux = self.core.apply_blockage(self.flux_demand);
        self.core.set_source(0, self.effective_flux);
        self.core.set_source(1, -self.effective_flux);
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        self.core.set_potential_drop(self.core.delta_potential());
        let flux = self.effective_flux;
        self.core.set_flux(flux);
        self.core.compute_power();
        let (n0, n1) = (self.core.port_node(0), self.core.port_node(1));
        if flux > 0.0 {
            let _ = nodes[n0].base_mut().collect_influx(flux);
            let _ = nodes[n1].base_mut().collect_outflux(flux);
        } else if flux < 0.0 {
            let _ = nodes[n0].base_mut().collect_outflux(-flux);
            let _ = nodes[n1].base_mut().collect_influx(-flux);
        }
    }

    fn restart(&mut self) {
        self.core.restart();
        self.effective_flux = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_graph::BasicNode;

    #[test]
    fn source_pair_and_transport() {
        let mut nodes = vec![
            BasicNode::new("a", 0.0),
            BasicNode::new("b", 0.0),
            BasicNode::new("ground", 0.0),
        ];
        let mut src = CurrentSource::new("i1", 2.5, [0, 2], 3).unwrap();
        Link::<BasicNode>::step(&mut src, 0.1, &mut nodes);
        assert_eq!(src.core.source()[0], 2.5);
        assert_eq!(src.core.source()[1], -2.5);

        Link::<BasicNode>::compute_flows(&mut src, 0.1, &mut nodes);
        assert_eq!(nodes[0].influx_rate(), 2.5);
    }
}
