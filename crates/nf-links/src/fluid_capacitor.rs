//! Fluid capacitor: gives a fluid node its volume.

use nf_core::{Real, EPS, EPS_F32};
use nf_fluids::FluidNode;
use serde::{Deserialize, Serialize};

use crate::contract::Link;
use crate::core::{capacitance_admittance, LinkCore};
use crate::error::{LinkError, LinkResult};

/// Owns the volume of its port-0 node, stamping the node's molar
/// capacitance `dn/dP` each step along with the node's thermal
/// capacitance and compression source terms. Port 1 is conventionally
/// the Ground (vacuum) node.
///
/// The capacitor does not transport mass; the node itself holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidCapacitor {
    core: LinkCore,
    capacitance: Real,
}

impl FluidCapacitor {
    /// Create the capacitor and initialize the node's volume and
    /// expansion scale factor.
    pub fn new(
        name: impl Into<String>,
        volume: Real,
        expansion_scale_factor: Real,
        ports: [usize; 2],
        nodes: &mut [FluidNode],
    ) -> LinkResult<Self> {
        let name = name.into();
        if volume < 0.0 {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "volume < 0",
            });
        }
        let mut core = LinkCore::new(name.clone(), ports.to_vec(), nodes.len())?;

        let node = &mut nodes[ports[0]];
        node.init_volume(volume)
            .map_err(|_| LinkError::InitFailure {
                link: name.clone(),
                cause: "node rejected volume",
            })?;
        node.set_expansion_scale_factor(expansion_scale_factor)
            .map_err(|_| LinkError::InitFailure {
                link: name,
                cause: "expansion scale factor outside [0, 1]",
            })?;
        node.prepare_for_start();
        core.set_port_potential(0, node.content().pressure());

        Ok(Self {
            core,
            capacitance: 0.0,
        })
    }

    pub fn capacitance(&self) -> Real {
        self.capacitance
    }

    /// Molar capacitance dn/dP at constant temperature, from a ±0.1%
    /// pressure perturbation of the content density.
    fn compute_capacitance(node: &FluidNode) -> Real {
        let content = node.content();
        let p = content.pressure().max(EPS_F32);
        let p1 = p * 0.999;
        let p2 = p * 1.001;
        let mw = content.mweight();
        if mw <= EPS {
            return 0.0;
        }
        let t = content.temperature();
        (content.compute_density(t, p2) - content.compute_density(t, p1)) * node.volume()
            / (mw * (p2 - p1))
    }

    fn build_stamps(&mut self, dt: Real, nodes: &mut [FluidNode]) {
        let n0 = self.core.port_node(0);
        self.capacitance = Self::compute_capacitance(&nodes[n0]);
        let admittance = capacitance_admittance(self.capacitance, dt);

        self.core.set_admittance(0, 0, admittance);
        self.core.set_admittance(0, 1, -admittance);
        self.core.set_admittance(1, 0, -admittance);
        self.core.set_admittance(1, 1, admittance);

        let node = &mut nodes[n0];
        let thermal_source = node.compute_thermal_capacitance();
        let compression = node.compute_compression();
        let dt_safe = dt.max(EPS);

        let source =
            self.core.delta_potential() * admittance + (thermal_source + compression) / dt_safe;
        self.core.set_source(0, source);
        self.core.set_source(1, -source);
    }
}

impl Link<FluidNode> for FluidCapacitor {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn step(&mut self, dt: Real, nodes: &mut [FluidNode]) {
        self.build_stamps(dt, nodes);
    }

    fn compute_flows(&mut self, _dt: Real, _nodes: &mut [FluidNode]) {
        // Storage flux for display only; the node's contents already
        // account for the mass.
        let drop = self.core.delta_potential();
        self.core.set_potential_drop(drop);
        let flux = self.core.source()[0] - self.core.admittance_at(0, 0) * drop;
        self.core.set_flux(flux);
    }

    fn restart(&mut self) {
        self.capacitance = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_fluids::{FluidConfig, FluidInput, Species, GAS_CONSTANT};
    use nf_graph::NetworkNode;
    use std::sync::Arc;

    fn nodes() -> Vec<FluidNode> {
        let config = Arc::new(FluidConfig::new(vec![Species::Air]).unwrap());
        let tank = FluidNode::new("tank", config.clone(), &FluidInput::pure(270.0, 80.0)).unwrap();
        let mut vacuum = FluidNode::new("ground", config, &FluidInput::pure(270.0, 80.0)).unwrap();
        vacuum.prepare_for_start();
        vacuum.set_potential(0.0);
        vec![tank, vacuum]
    }

    #[test]
    fn capacitance_matches_ideal_gas() {
        let mut n = nodes();
        let mut cap = FluidCapacitor::new("tank_vol", 1.0, 0.0, [0, 1], &mut n).unwrap();
        cap.step(1.0, &mut n);

        // Ideal gas: dn/dP = V/(R*T)
        let expected = 1.0 / (GAS_CONSTANT * 270.0);
        assert!(
            (cap.capacitance() - expected).abs() < expected * 1e-6,
            "capacitance {} vs {}",
            cap.capacitance(),
            expected
        );
    }

    #[test]
    fn steady_state_source_balances_admittance() {
        let mut n = nodes();
        let mut cap = FluidCapacitor::new("tank_vol", 1.0, 0.0, [0, 1], &mut n).unwrap();
        cap.step(1.0, &mut n);

        // Held pressure, constant temperature and volume: the source is
        // exactly A*p_prev, so the solved pressure would stay put.
        let a = cap.core.admittance_at(0, 0);
        let p_prev = cap.core.potential(0);
        assert!((cap.core.source()[0] - a * p_prev).abs() < 1e-12);
    }

    #[test]
    fn negative_volume_rejected() {
        let mut n = nodes();
        assert!(FluidCapacitor::new("bad", -1.0, 0.0, [0, 1], &mut n).is_err());
    }
}
