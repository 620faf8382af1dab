//! N-to-one selector (mux).

use nf_core::{limit_range, Real, CONDUCTANCE_LIMIT};
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::Link;
use crate::core::LinkCore;
use crate::error::{LinkError, LinkResult};

/// Connects the common port 0 to exactly one of its position ports
/// through the configured conductance. Position 0 disconnects everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    core: LinkCore,
    conductance: Real,
    position: usize,
}

impl Selector {
    /// `ports[0]` is the common node; `ports[1..]` are the selectable
    /// positions.
    pub fn new(
        name: impl Into<String>,
        conductance: Real,
        ports: Vec<usize>,
        num_nodes: usize,
        position: usize,
    ) -> LinkResult<Self> {
        let name = name.into();
        if conductance < 0.0 {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "conductance < 0",
            });
        }
        if ports.len() < 2 {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "selector needs a common port and at least one position",
            });
        }
        if position >= ports.len() {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "initial position out of range",
            });
        }
        let core = LinkCore::new(name, ports, num_nodes)?;
        Ok(Self {
            core,
            conductance,
            position,
        })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Select a position port (1-based; 0 disconnects). Out-of-range
    /// selections are rejected and the position is unchanged.
    pub fn set_position(&mut self, position: usize) -> LinkResult<()> {
        if position >= self.core.num_ports() {
            return Err(LinkError::OutOfBounds {
                link: self.core.name().to_string(),
                what: "selector position out of range",
            });
        }
        self.position = position;
        Ok(())
    }

    fn build_stamps(&mut self) {
        let ports = self.core.num_ports();
        let conductance = limit_range(
            0.0,
            self.core.apply_blockage(self.conductance),
            CONDUCTANCE_LIMIT,
        );
        for row in 0..ports {
            for col in 0..ports {
                let value = if self.position == 0 {
                    0.0
                } else if row == col && (row == 0 || row == self.position) {
                    conductance
                } else if (row == 0 && col == self.position) || (row == self.position && col == 0) {
                    -conductance
                } else {
                    0.0
                };
                self.core.set_admittance(row, col, value);
            }
        }
    }
}

impl<N: NetworkNode> Link<N> for Selector {
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
        if self.position == 0 {
            self.core.set_flux(0.0);
            self.core.set_potential_drop(0.0);
            return;
        }
        let drop = self.core.potential(0) - self.core.potential(self.position);
        self.core.set_potential_drop(drop);
        let flux = drop * self.core.admittance_at(0, 0);
        self.core.set_flux(flux);
        self.core.compute_power();

        let (common, selected) = (self.core.port_node(0), self.core.port_node(self.position));
        if flux > 0.0 {
            let _ = nodes[common].base_mut().collect_outflux(flux);
            let _ = nodes[selected].base_mut().collect_influx(flux);
        } else if flux < 0.0 {
            let _ = nodes[selected].base_mut().collect_outflux(-flux);
            let _ = nodes[common].base_mut().collect_influx(-flux);
        }
    }

    fn restart(&mut self) {
        self.core.restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_graph::BasicNode;

    fn nodes() -> Vec<BasicNode> {
        (0..5)
            .map(|i| BasicNode::new(format!("n{i}"), 0.0))
            .collect()
    }

    #[test]
    fn selected_position_conducts() {
        let mut n = nodes();
        let mut sel = Selector::new("sel", 2.0, vec![0, 1, 2, 3], 5, 2).unwrap();
        Link::<BasicNode>::step(&mut sel, 0.1, &mut n);

        assert_eq!(sel.core.admittance_at(0, 0), 2.0);
        assert_eq!(sel.core.admittance_at(0, 2), -2.0);
        assert_eq!(sel.core.admittance_at(2, 2), 2.0);
        // Unselected position stays disconnected.
        assert_eq!(sel.core.admittance_at(0, 1), 0.0);
        assert_eq!(sel.core.admittance_at(1, 1), 0.0);
    }

    #[test]
    fn reselect_moves_the_stamp() {
        let mut n = nodes();
        let mut sel = Selector::new("sel", 2.0, vec![0, 1, 2], 5, 1).unwrap();
        Link::<BasicNode>::step(&mut sel, 0.1, &mut n);
        sel.core.clear_admittance_update();

        sel.set_position(2).unwrap();
        Link::<BasicNode>::step(&mut sel, 0.1, &mut n);
        assert!(sel.core.admittance_update());
        assert_eq!(sel.core.admittance_at(0, 1), 0.0);
        assert_eq!(sel.core.admittance_at(0, 2), -2.0);
    }

    #[test]
    fn position_zero_disconnects() {
        let mut n = nodes();
        let mut sel = Selector::new("sel", 2.0, vec![0, 1, 2], 5, 0).unwrap();
        Link::<BasicNode>::step(&mut sel, 0.1, &mut n);
        assert!(sel.core.admittance().iter().all(|&a| a == 0.0));
    }

    #[test]
    fn out_of_range_position_rejected() {
        let mut sel = Selector::new("sel", 2.0, vec![0, 1, 2], 5, 0).unwrap();
        assert!(sel.set_position(3).is_err());
        assert_eq!(sel.position(), 0);
    }
}
