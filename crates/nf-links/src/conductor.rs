//! Two-port conductor (resistor).

use nf_core::{limit_range, Real, CONDUCTANCE_LIMIT, EPS};
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::Link;
use crate::core::LinkCore;
use crate::error::{LinkError, LinkResult};

/// Configuration for a conductor link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    pub name: String,
    /// Default conductance, 1/ohm (or the aspect's equivalent).
    pub conductance: Real,
}

/// A passive conductance between two nodes, the simplest link: a
/// symmetric 2×2 stamp and zero source vector. The blockage malfunction
/// scales the effective conductance down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conductor {
    core: LinkCore,
    default_conductance: Real,
    effective_conductance: Real,
    system_conductance: Real,
}

impl Conductor {
    pub fn new(config: ConductorConfig, ports: [usize; 2], num_nodes: usize) -> LinkResult<Self> {
        if config.conductance < 0.0 {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "conductance < 0",
            });
        }
        let core = LinkCore::new(config.name, ports.to_vec(), num_nodes)?;
        Ok(Self {
            core,
            default_conductance: config.conductance,
            effective_conductance: config.conductance,
            system_conductance: 0.0,
        })
    }

    /// Change the conductance in run-time (valve position, degradation).
    pub fn set_conductance(&mut self, conductance: Real) {
        self.default_conductance = conductance.max(0.0);
    }

    pub fn conductance(&self) -> Real {
        self.default_conductance
    }

    fn build_conductance(&mut self) {
        self.effective_conductance = self.core.apply_blockage(self.default_conductance);
        let system = limit_range(0.0, self.effective_conductance, CONDUCTANCE_LIMIT);
        self.system_conductance = if system < EPS { 0.0 } else { system };
        self.core.stamp_conductance(self.system_conductance);
    }
}

impl<N: NetworkNode> Link<N> for Conductor {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn step(&mut self, _dt: Real, _nodes: &mut [N]) {
        self.build_conductance();
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        let drop = self.core.delta_potential();
        self.core.set_potential_drop(drop);
        self.core.set_flux(drop * self.system_conductance);
        self.core.compute_power();
        self.core.transport_flux(nodes);
    }

    fn restart(&mut self) {
        self.core.restart();
        self.effective_conductance = self.default_conductance;
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
            BasicNode::new("b", 0.0),
            BasicNode::new("ground", 0.0),
        ]
    }

    fn conductor(g: Real) -> Conductor {
        Conductor::new(
            ConductorConfig {
                name: "r1".into(),
                conductance: g,
            },
            [0, 1],
            3,
        )
        .unwrap()
    }

    #[test]
    fn stamp_is_symmetric() {
        let mut link = conductor(0.5);
        let mut n = nodes();
        Link::<BasicNode>::step(&mut link, 0.1, &mut n);
        assert_eq!(link.core.admittance_at(0, 1), link.core.admittance_at(1, 0));
        assert_eq!(link.core.admittance_at(0, 0), 0.5);
        assert_eq!(link.core.admittance_at(0, 1), -0.5);
    }

    #[test]
    fn flux_follows_potential_drop() {
        let mut link = conductor(2.0);
        let mut n = nodes();
        Link::<BasicNode>::step(&mut link, 0.1, &mut n);
        link.core.set_port_potential(0, 3.0);
        link.core.set_port_potential(1, 1.0);
        Link::<BasicNode>::compute_flows(&mut link, 0.1, &mut n);
        assert_eq!(link.core.flux(), 4.0);
        assert_eq!(n[0].outflux_rate(), 4.0);
        assert_eq!(n[1].influx_rate(), 4.0);
    }

    #[test]
    fn blockage_reduces_conductance() {
        let mut link = conductor(2.0);
        link.core.set_blockage(true, 0.5).unwrap();
        let mut n = nodes();
        Link::<BasicNode>::step(&mut link, 0.1, &mut n);
        assert_eq!(link.core.admittance_at(0, 0), 1.0);
    }

    #[test]
    fn negative_conductance_rejected() {
        assert!(Conductor::new(
            ConductorConfig {
                name: "bad".into(),
                conductance: -1.0,
            },
            [0, 1],
            3,
        )
        .is_err());
    }
}
