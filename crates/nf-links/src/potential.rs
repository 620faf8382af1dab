//! Ideal potential source behind a conductance.

use nf_core::{limit_range, Real, CONDUCTANCE_LIMIT};
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::Link;
use crate::core::LinkCore;
use crate::error::{LinkError, LinkResult};

/// Drives port 0 above port 1 by the source potential, through the
/// configured conductance. A large conductance approximates an ideal
/// source; the conductance is also the source's output impedance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotentialSource {
    core: LinkCore,
    default_conductance: Real,
    system_conductance: Real,
    source_potential: Real,
}

impl PotentialSource {
    pub fn new(
        name: impl Into<String>,
        conductance: Real,
        source_potential: Real,
        ports: [usize; 2],
        num_nodes: usize,
    ) -> LinkResult<Self> {
        let name = name.into();
        if conductance < 0.0 {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "conductance < 0",
            });
        }
        let core = LinkCore::new(name, ports.to_vec(), num_nodes)?;
        Ok(Self {
            core,
            default_conductance: conductance,
            system_conductance: 0.0,
            source_potential,
        })
    }

    pub fn source_potential(&self) -> Real {
        self.source_potential
    }

    pub fn set_source_potential(&mut self, potential: Real) {
        self.source_potential = potential;
    }

    fn build_stamps(&mut self) {
        let effective = self.core.apply_blockage(self.default_conductance);
        self.system_conductance = limit_range(0.0, effective, CONDUCTANCE_LIMIT);
        self.core.stamp_conductance(self.system_conductance);

        let source = self.source_potential * self.system_conductance;
        self.core.set_source(0, source);
        self.core.set_source(1, -source);
    }
}

impl<N: NetworkNode> Link<N> for PotentialSource {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn step(&mut self, _dt: Real, _nodes: &mut [N]) {
        self.build_stamps();
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        let drop = self.core.delta_potential();
        self.core.set_potential_drop(drop);
        // Current delivered into port 0, counting the internal impedance.
        let flux = (self.source_potential - drop) * self.system_conductance;
        self.core.set_flux(flux);
        self.core.compute_power();
        // Positive flux enters port 0's node and returns through port 1.
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
        self.system_conductance = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_graph::BasicNode;

    fn nodes() -> Vec<BasicNode> {
        vec![
            BasicNode::new("a", 0.0),
            BasicNode::new("ground", 0.0),
            BasicNode::new("g", 0.0),
        ]
    }

    #[test]
    fn source_vector_pair_is_antisymmetric() {
        let mut n = nodes();
        let mut src = PotentialSource::new("v1", 1000.0, 5.0, [0, 1], 3).unwrap();
        Link::<BasicNode>::step(&mut src, 0.1, &mut n);
        assert_eq!(src.core.source()[0], 5000.0);
        assert_eq!(src.core.source()[1], -5000.0);
        assert_eq!(src.core.admittance_at(0, 0), 1000.0);
    }

    #[test]
    fn delivers_current_against_sag() {
        let mut n = nodes();
        let mut src = PotentialSource::new("v1", 10.0, 1.0, [0, 1], 3).unwrap();
        Link::<BasicNode>::step(&mut src, 0.1, &mut n);
        src.core.set_port_potential(0, 0.8);
        Link::<BasicNode>::compute_flows(&mut src, 0.1, &mut n);
        // (1.0 - 0.8) * 10 = 2 units into the driven node.
        assert!((src.core.flux() - 2.0).abs() < 1e-12);
        assert_eq!(n[0].influx_rate(), 2.0);
        assert_eq!(n[1].outflux_rate(), 2.0);
    }
}
