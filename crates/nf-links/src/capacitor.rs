//! Two-port capacitor.

use nf_core::Real;
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::Link;
use crate::core::{capacitance_admittance, LinkCore};
use crate::error::{LinkError, LinkResult};

/// A capacitance between two nodes. The stamp is `C/dt` and the source
/// term re-injects the previous potential, so the solved potential
/// integrates the node's stored quantity across steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capacitor {
    core: LinkCore,
    capacitance: Real,
    edit_capacitance_flag: bool,
    edit_capacitance: Real,
}

impl Capacitor {
    /// Create a capacitor and initialize the potential of the capacitive
    /// node (port 0).
    pub fn new<N: NetworkNode>(
        name: impl Into<String>,
        capacitance: Real,
        potential: Real,
        ports: [usize; 2],
        nodes: &mut [N],
    ) -> LinkResult<Self> {
        let name = name.into();
        if capacitance < 0.0 {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "capacitance < 0",
            });
        }
        let mut core = LinkCore::new(name, ports.to_vec(), nodes.len())?;
        core.set_port_potential(0, potential);
        nodes[ports[0]].set_potential(potential);
        Ok(Self {
            core,
            capacitance,
            edit_capacitance_flag: false,
            edit_capacitance: 0.0,
        })
    }

    pub fn capacitance(&self) -> Real {
        self.capacitance
    }

    pub fn set_capacitance(&mut self, capacitance: Real) {
        self.capacitance = capacitance.max(0.0);
    }

    /// Queue a capacitance edit to be consumed at the next step.
    pub fn edit_capacitance(&mut self, capacitance: Real) {
        self.edit_capacitance = capacitance;
        self.edit_capacitance_flag = true;
    }

    fn build_capacitance(&mut self, dt: Real) {
        let admittance = capacitance_admittance(self.capacitance, dt);
        self.core.set_admittance(0, 0, admittance);
        self.core.set_admittance(0, 1, -admittance);
        self.core.set_admittance(1, 0, -admittance);
        self.core.set_admittance(1, 1, admittance);

        let source = self.core.delta_potential() * admittance;
        self.core.set_source(0, source);
        self.core.set_source(1, -source);
    }
}

impl<N: NetworkNode> Link<N> for Capacitor {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn step(&mut self, dt: Real, _nodes: &mut [N]) {
        if self.edit_capacitance_flag {
            self.edit_capacitance_flag = false;
            self.set_capacitance(self.edit_capacitance);
        }
        self.build_capacitance(dt);
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        let drop = self.core.delta_potential();
        self.core.set_potential_drop(drop);
        // Charging flux: the source term minus the admittance row product.
        let a = self.core.admittance_at(0, 0);
        let flux = self.core.source()[0] - a * drop;
        self.core.set_flux(flux);
        self.core.compute_power();
        self.core.transport_flux(nodes);
    }

    fn restart(&mut self) {
        // Capacitance is treated as config data; clear only the edit.
        self.edit_capacitance_flag = false;
        self.edit_capacitance = 0.0;
    }
}
