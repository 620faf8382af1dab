//! Shared per-link state: stamps, potential views, blockage.

use nf_core::{Real, EPS};
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::{PortDirection, SolutionResult};
use crate::error::{LinkError, LinkResult};

/// Blockage malfunction: a fraction in [0, 1] of the link's effect that is
/// blocked while active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Blockage {
    pub active: bool,
    pub fraction: Real,
}

impl Blockage {
    /// Apply the blockage to a value, scaling it by (1 - fraction) when
    /// active.
    pub fn apply(&self, value: Real) -> Real {
        if self.active {
            value * (1.0 - self.fraction)
        } else {
            value
        }
    }
}

/// State shared by every link variant.
///
/// Holds the P×P admittance contribution (dense, row-major), the length-P
/// source vector, the solver-written potential view, and the port→node
/// map. Links mutate their stamps only through the setters here so the
/// `admittance_update` dirty flag stays truthful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCore {
    name: String,
    node_map: Vec<usize>,
    num_nodes: usize,
    admittance: Vec<Real>,
    source: Vec<Real>,
    potentials: Vec<Real>,
    port_directions: Vec<PortDirection>,
    admittance_update: bool,
    solution_result: SolutionResult,
    blockage: Blockage,
    flux: Real,
    potential_drop: Real,
    power: Real,
}

impl LinkCore {
    /// Create the core for a link with the given port→node map.
    /// `num_nodes` includes the Ground node (always the last index).
    pub fn new(
        name: impl Into<String>,
        node_map: Vec<usize>,
        num_nodes: usize,
    ) -> LinkResult<Self> {
        let name = name.into();
        if node_map.is_empty() {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "link has no ports",
            });
        }
        if node_map.iter().any(|&n| n >= num_nodes) {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "port node index out of range",
            });
        }
        let ports = node_map.len();
        Ok(Self {
            name,
            node_map,
            num_nodes,
            admittance: vec![0.0; ports * ports],
            source: vec![0.0; ports],
            potentials: vec![0.0; ports],
            port_directions: vec![PortDirection::None; ports],
            admittance_update: false,
            solution_result: SolutionResult::Confirm,
            blockage: Blockage::default(),
            flux: 0.0,
            potential_drop: 0.0,
            power: 0.0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_ports(&self) -> usize {
        self.node_map.len()
    }

    pub fn node_map(&self) -> &[usize] {
        &self.node_map
    }

    /// Remap this link's ports into a super-network index space: non-Ground
    /// indices shift by `offset`, the old Ground index maps to `new_ground`.
    pub fn renumber(&mut self, offset: usize, new_num_nodes: usize) {
        let old_ground = self.num_nodes - 1;
        for n in &mut self.node_map {
            if *n == old_ground {
                *n = new_num_nodes - 1;
            } else {
                *n += offset;
            }
        }
        self.num_nodes = new_num_nodes;
    }

    pub fn ground_index(&self) -> usize {
        self.num_nodes - 1
    }

    pub fn port_node(&self, port: usize) -> usize {
        self.node_map[port]
    }

    pub fn is_port_on_ground(&self, port: usize) -> bool {
        self.node_map[port] == self.ground_index()
    }

    pub fn admittance(&self) -> &[Real] {
        &self.admittance
    }

    pub fn admittance_at(&self, row: usize, col: usize) -> Real {
        self.admittance[row * self.num_ports() + col]
    }

    /// Write one admittance entry, raising the dirty flag on any change.
    pub fn set_admittance(&mut self, row: usize, col: usize, value: Real) {
        let ports = self.num_ports();
        let slot = &mut self.admittance[row * ports + col];
        if (*slot - value).abs() > 0.0 {
            *slot = value;
            self.admittance_update = true;
        }
    }

    /// Stamp a symmetric two-port conductance into ports 0 and 1.
    pub fn stamp_conductance(&mut self, conductance: Real) {
        self.set_admittance(0, 0, conductance);
        self.set_admittance(0, 1, -conductance);
        self.set_admittance(1, 0, -conductance);
        self.set_admittance(1, 1, conductance);
    }

    pub fn source(&self) -> &[Real] {
        &self.source
    }

    pub fn set_source(&mut self, port: usize, value: Real) {
        self.source[port] = value;
    }

    pub fn potentials(&self) -> &[Real] {
        &self.potentials
    }

    pub fn potential(&self, port: usize) -> Real {
        self.potentials[port]
    }

    /// Solver-side write of the freshly solved potential at a port.
    pub fn set_port_potential(&mut self, port: usize, potential: Real) {
        self.potentials[port] = potential;
    }

    /// Potential drop from port 0 to port 1.
    pub fn delta_potential(&self) -> Real {
        self.potentials[0] - self.potentials[1]
    }

    pub fn port_directions(&self) -> &[PortDirection] {
        &self.port_directions
    }

    pub fn set_port_direction(&mut self, port: usize, direction: PortDirection) {
        self.port_directions[port] = direction;
    }

    pub fn admittance_update(&self) -> bool {
        self.admittance_update
    }

    pub fn clear_admittance_update(&mut self) {
        self.admittance_update = false;
    }

    pub fn solution_result(&self) -> SolutionResult {
        self.solution_result
    }

    pub fn set_solution_result(&mut self, result: SolutionResult) {
        self.solution_result = result;
    }

    pub fn blockage(&self) -> &Blockage {
        &self.blockage
    }

    /// Activate or update the blockage malfunction.
    pub fn set_blockage(&mut self, active: bool, fraction: Real) -> LinkResult<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(LinkError::OutOfBounds {
                link: self.name.clone(),
                what: "blockage fraction outside [0, 1]",
            });
        }
        self.blockage = Blockage { active, fraction };
        Ok(())
    }

    pub fn apply_blockage(&self, value: Real) -> Real {
        self.blockage.apply(value)
    }

    pub fn flux(&self) -> Real {
        self.flux
    }

    pub fn set_flux(&mut self, flux: Real) {
        self.flux = flux;
    }

    pub fn potential_drop(&self) -> Real {
        self.potential_drop
    }

    pub fn set_potential_drop(&mut self, drop: Real) {
        self.potential_drop = drop;
    }

    pub fn power(&self) -> Real {
        self.power
    }

    /// Power convention: positive power is delivered through the link.
    pub fn compute_power(&mut self) {
        self.power = -self.flux * self.potential_drop;
    }

    /// Transport the stored two-port flux between the endpoint nodes.
    /// Positive flux flows out of port 0's node into port 1's node.
    pub fn transport_flux<N: NetworkNode>(&mut self, nodes: &mut [N]) {
        let (n0, n1) = (self.node_map[0], self.node_map[1]);
        if self.flux > 0.0 {
            let _ = nodes[n0].base_mut().collect_outflux(self.flux);
            let _ = nodes[n1].base_mut().collect_influx(self.flux);
            self.port_directions[0] = PortDirection::Sink;
            self.port_directions[1] = PortDirection::Source;
        } else if self.flux < 0.0 {
            let _ = nodes[n1].base_mut().collect_outflux(-self.flux);
            let _ = nodes[n0].base_mut().collect_influx(-self.flux);
            self.port_directions[0] = PortDirection::Source;
            self.port_directions[1] = PortDirection::Sink;
        } else {
            self.port_directions[0] = PortDirection::None;
            self.port_directions[1] = PortDirection::None;
        }
    }

    /// Zero the stamps and per-step products.
    pub fn restart(&mut self) {
        for a in &mut self.admittance {
            *a = 0.0;
        }
        for s in &mut self.source {
            *s = 0.0;
        }
        self.admittance_update = false;
        self.solution_result = SolutionResult::Confirm;
        self.flux = 0.0;
        self.potential_drop = 0.0;
        self.power = 0.0;
    }
}

/// Guard against a vanishing timestep: freeze-mode stamping divides by
/// machine epsilon instead, making the node capacitance effectively
/// infinite so potentials hold in place.
pub fn capacitance_admittance(capacitance: Real, dt: Real) -> Real {
    if dt < EPS {
        capacitance / EPS
    } else {
        capacitance / dt
    }
}
