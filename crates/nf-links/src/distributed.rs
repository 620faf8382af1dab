//! Distributed bi-directional boundary interface.
//!
//! Joins this network to a mirror link in another network instance,
//! possibly stepping on another thread. One side plays Supply (it sinks
//! the remote side's demanded power) while the other plays Demand (it
//! sources the remote side's supply voltage). Roles renegotiate as the
//! relative strength of the two sides changes.

use std::sync::{Arc, Mutex};

use nf_core::{limit_range, Real, CONDUCTANCE_LIMIT, EPS_F32};
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::{Link, PortDirection, SolutionResult};
use crate::core::LinkCore;
use crate::error::{LinkError, LinkResult};

/// Which half of the interface protocol this link currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceRole {
    Supply,
    Demand,
}

#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    supply_voltage: Real,
    demand_power: Real,
    demand_mode: bool,
}

/// Shared frame exchange between the two mirror links.
#[derive(Debug, Clone, Default)]
pub struct InterfacePair {
    frames: Arc<Mutex<[Frame; 2]>>,
}

impl InterfacePair {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, side: usize, frame: Frame) {
        self.frames.lock().unwrap()[side] = frame;
    }

    fn remote(&self, side: usize) -> Frame {
        self.frames.lock().unwrap()[1 - side]
    }
}

/// Configuration for one side of a distributed interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedInterfaceConfig {
    pub name: String,
    /// The primary side defaults to the Supply role.
    pub is_pair_primary: bool,
    /// Conductance of the internal voltage source used in Demand mode.
    pub conductance: Real,
    /// Network-capacitance delta-potential above which the local side is
    /// considered too weak to supply.
    pub net_cap_dv_threshold: Real,
}

/// One side of a distributed interface pair.
#[derive(Debug)]
pub struct DistributedInterface {
    core: LinkCore,
    side: usize,
    conductance: Real,
    net_cap_dv_threshold: Real,
    pub force_demand_mode: bool,
    pub force_supply_mode: bool,
    role: InterfaceRole,
    role_switched: bool,
    /// Last observed network-capacitance delta-potential at our node.
    local_dv: Real,
    pair: InterfacePair,
}

impl DistributedInterface {
    pub fn new(
        config: DistributedInterfaceConfig,
        pair: InterfacePair,
        port0: usize,
        num_nodes: usize,
    ) -> LinkResult<Self> {
        if config.conductance < 0.0 {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "conductance < 0",
            });
        }
        if config.net_cap_dv_threshold <= 0.0 {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "network capacitance delta-potential threshold <= 0",
            });
        }
        let core = LinkCore::new(config.name, vec![port0], num_nodes)?;
        let role = if config.is_pair_primary {
            InterfaceRole::Supply
        } else {
            InterfaceRole::Demand
        };
        Ok(Self {
            core,
            side: if config.is_pair_primary { 0 } else { 1 },
            conductance: config.conductance,
            net_cap_dv_threshold: config.net_cap_dv_threshold,
            force_demand_mode: false,
            force_supply_mode: false,
            role,
            role_switched: false,
            local_dv: 0.0,
            pair,
        })
    }

    pub fn role(&self) -> InterfaceRole {
        self.role
    }

    /// Whether the last confirm poll switched this side into Demand.
    pub fn role_switched(&self) -> bool {
        self.role_switched
    }

    /// Local supply strength test: a stiff local network shows a small
    /// potential change per unit flux at the boundary node.
    fn local_supply_available(&self) -> bool {
        self.local_dv > 0.0 && self.local_dv < self.net_cap_dv_threshold
    }

    fn desired_role(&self) -> InterfaceRole {
        if self.force_supply_mode {
            return InterfaceRole::Supply;
        }
        if self.force_demand_mode {
            return InterfaceRole::Demand;
        }
        let remote = self.pair.remote(self.side);
        // Take the Demand role when the remote side has a live supply and
        // is not itself demanding, and our own side is weak.
        if remote.supply_voltage > EPS_F32
            && !remote.demand_mode
            && !self.local_supply_available()
        {
            InterfaceRole::Demand
        } else {
            InterfaceRole::Supply
        }
    }

    fn update_contributions<N: NetworkNode>(&mut self, nodes: &mut [N]) {
        let node_index = self.core.port_node(0);
        self.local_dv = nodes[node_index].base().network_capacitance();
        nodes[node_index].base_mut().request_network_capacitance(1.0);

        let remote = self.pair.remote(self.side);
        let local_voltage = self.core.potential(0);

        match self.role {
            InterfaceRole::Demand => {
                // Source the remote supply voltage through our internal
                // conductance.
                let conductance = limit_range(0.0, self.conductance, CONDUCTANCE_LIMIT);
                self.core.set_admittance(0, 0, conductance);
                self.core
                    .set_source(0, remote.supply_voltage * conductance);
            }
            InterfaceRole::Supply => {
                // Sink the remote side's demanded power at our voltage.
                self.core.set_admittance(0, 0, 0.0);
                let draw = if remote.demand_mode && local_voltage > EPS_F32 {
                    remote.demand_power / local_voltage
                } else {
                    0.0
                };
                self.core.set_source(0, -draw);
            }
        }

        // Publish our frame for the mirror link.
        let demand_mode = self.role == InterfaceRole::Demand;
        let demand_power = if demand_mode {
            (self.core.flux() * local_voltage).max(0.0)
        } else {
            0.0
        };
        self.pair.publish(
            self.side,
            Frame {
                supply_voltage: local_voltage,
                demand_power,
                demand_mode,
            },
        );
    }

    fn compute_flux(&mut self) {
        let flux = self.core.source()[0] - self.core.admittance_at(0, 0) * self.core.potential(0);
        self.core.set_flux(flux);
    }
}

impl<N: NetworkNode> Link<N> for DistributedInterface {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn is_non_linear(&self) -> bool {
        true
    }

    fn step(&mut self, _dt: Real, nodes: &mut [N]) {
        self.role_switched = false;
        let desired = self.desired_role();
        if desired != self.role {
            debug!(
                link = self.core.name(),
                ?desired,
                "distributed interface role change"
            );
            self.role = desired;
        }
        self.update_contributions(nodes);
    }

    fn minor_step(&mut self, _dt: Real, _minor_step: usize, nodes: &mut [N]) {
        self.update_contributions(nodes);
    }

    fn confirm_solution_acceptable(
        &mut self,
        converged_step: usize,
        _absolute_step: usize,
    ) -> SolutionResult {
        if converged_step == 0 {
            return SolutionResult::Delay;
        }
        // Switching from Supply to Demand invalidates this solution: the
        // network must re-solve with our internal voltage source active.
        if self.role == InterfaceRole::Supply && self.desired_role() == InterfaceRole::Demand {
            self.role = InterfaceRole::Demand;
            self.role_switched = true;
            return SolutionResult::Reject;
        }
        SolutionResult::Confirm
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        self.compute_flux();
        self.core.set_potential_drop(-self.core.potential(0));
        let flux = self.core.flux();
        let n0 = self.core.port_node(0);
        if flux > 0.0 {
            let _ = nodes[n0].base_mut().collect_influx(flux);
            self.core.set_port_direction(0, PortDirection::Source);
        } else if flux < 0.0 {
            let _ = nodes[n0].base_mut().collect_outflux(-flux);
            self.core.set_port_direction(0, PortDirection::Sink);
        } else {
            self.core.set_port_direction(0, PortDirection::None);
        }
    }

    fn restart(&mut self) {
        self.role_switched = false;
    }
}
