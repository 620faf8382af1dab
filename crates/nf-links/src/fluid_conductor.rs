//! Fluid conductor: molar flow between two fluid nodes.

use nf_core::{limit_range, Real, CONDUCTANCE_LIMIT, EPS};
use nf_fluids::FluidNode;
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::{Link, PortDirection};
use crate::core::LinkCore;
use crate::error::{LinkError, LinkResult};

/// A restriction passing molar flow proportional to the pressure drop,
/// with conductance in kgmol/s/kPa. Transports bulk fluid (and trace
/// compounds) from the upstream node's outflow state to the downstream
/// node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidConductor {
    core: LinkCore,
    default_conductance: Real,
    system_conductance: Real,
}

impl FluidConductor {
    pub fn new(
        name: impl Into<String>,
        conductance: Real,
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
        })
    }

    pub fn set_conductance(&mut self, conductance: Real) {
        self.default_conductance = conductance.max(0.0);
    }
}

impl Link<FluidNode> for FluidConductor {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn step(&mut self, _dt: Real, _nodes: &mut [FluidNode]) {
        let effective = self.core.apply_blockage(self.default_conductance);
        self.system_conductance = limit_range(0.0, effective, CONDUCTANCE_LIMIT);
        self.core.stamp_conductance(self.system_conductance);
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [FluidNode]) {
        let drop = self.core.delta_potential();
        self.core.set_potential_drop(drop);
        // Solver-space flux is molar (kgmol/s).
        let molar_flux = drop * self.system_conductance;

        if molar_flux.abs() <= EPS {
            self.core.set_flux(0.0);
            self.core.set_port_direction(0, PortDirection::None);
            self.core.set_port_direction(1, PortDirection::None);
            return;
        }

        let (up_port, down_port) = if molar_flux > 0.0 { (0, 1) } else { (1, 0) };
        self.core.set_port_direction(up_port, PortDirection::Sink);
        self.core.set_port_direction(down_port, PortDirection::Source);

        let up = self.core.port_node(up_port);
        let down = self.core.port_node(down_port);

        // Tell the upstream node what the solver scheduled, for overflow
        // accounting, then transport its outflow state downstream.
        nodes[up].base_mut().schedule_outflux(molar_flux.abs());

        let mdot = molar_flux.abs() * nodes[up].content().mweight();
        self.core
            .set_flux(if molar_flux > 0.0 { mdot } else { -mdot });

        if mdot > 0.0 {
            let _ = nodes[up].base_mut().collect_outflux(mdot);

            // Trace compounds ride along in proportion to the bulk mass.
            let tc_rates: Vec<(usize, Real)> = match (nodes[up].trace(), nodes[up].mass()) {
                (Some(tc), mass) if mass > EPS => tc
                    .masses()
                    .iter()
                    .enumerate()
                    .map(|(i, &m)| (i, m / mass * mdot))
                    .collect(),
                _ => Vec::new(),
            };

            let outflow = nodes[up].outflow().clone();
            nodes[down].collect_influx(mdot, &outflow);
            for (index, rate) in tc_rates {
                let _ = nodes[down].collect_tc(index, rate);
            }
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
    use nf_fluids::{FluidConfig, FluidInput, Species};
    use std::sync::Arc;

    fn fluid_nodes() -> Vec<FluidNode> {
        let config = Arc::new(FluidConfig::new(vec![Species::Air]).unwrap());
        let mut tank =
            FluidNode::new("tank", config.clone(), &FluidInput::pure(270.0, 100.0)).unwrap();
        tank.init_volume(1.0).unwrap();
        tank.prepare_for_start();

        let mut vacuum = FluidNode::new("ground", config, &FluidInput::pure(270.0, 100.0)).unwrap();
        vacuum.prepare_for_start();
        vacuum.set_potential(0.0);
        vec![tank, vacuum]
    }

    #[test]
    fn molar_flow_transports_mass_downstream() {
        let mut nodes = fluid_nodes();
        let mut link = FluidConductor::new("drain", 1e-6, [0, 1], 2).unwrap();
        link.step(1.0, &mut nodes);
        link.core.set_port_potential(0, 100.0);
        link.core.set_port_potential(1, 0.0);
        link.compute_flows(1.0, &mut nodes);

        let molar = 1e-6 * 100.0;
        let mdot = molar * nodes[0].content().mweight();
        assert!((nodes[0].base().scheduled_outflux() - molar).abs() < 1e-15);
        assert!((nodes[0].base().outflux_rate() - mdot).abs() < 1e-12);
        assert!((nodes[1].base().influx_rate() - mdot).abs() < 1e-12);
        assert!((link.core.flux() - mdot).abs() < 1e-12);
    }

    #[test]
    fn no_pressure_drop_means_no_flow() {
        let mut nodes = fluid_nodes();
        let mut link = FluidConductor::new("pipe", 1e-6, [0, 1], 2).unwrap();
        link.step(1.0, &mut nodes);
        link.core.set_port_potential(0, 50.0);
        link.core.set_port_potential(1, 50.0);
        link.compute_flows(1.0, &mut nodes);
        assert_eq!(link.core.flux(), 0.0);
        assert_eq!(nodes[0].base().outflux_rate(), 0.0);
    }
}
