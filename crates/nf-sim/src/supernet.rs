//! Super-network composition.
//!
//! Merges member networks into one shared node index space: each member's
//! solvable nodes shift by a per-member offset, the members' Grounds
//! collapse onto a single shared Ground (kept last), and one solver runs
//! over the merged system. Member spotters run in registration order.

use nf_core::Real;
use nf_graph::NetworkNode;
use nf_links::Link;
use nf_solver::{Solver, SolverConfig, Spotter};

use crate::error::{SimError, SimResult};
use crate::network::Network;

struct Member {
    name: String,
    offset: usize,
    num_solvable: usize,
    num_links: usize,
}

/// A composition of sub-networks solved as one system.
pub struct SuperNetwork<N: NetworkNode> {
    name: String,
    config: SolverConfig,
    nodes: Vec<N>,
    links: Vec<Box<dyn Link<N>>>,
    spotters: Vec<Box<dyn Spotter<N>>>,
    members: Vec<Member>,
    ground: Option<N>,
    solver: Option<Solver>,
}

impl<N: NetworkNode> SuperNetwork<N> {
    pub fn new(name: impl Into<String>, config: SolverConfig) -> Self {
        Self {
            name: name.into(),
            config,
            nodes: Vec::new(),
            links: Vec::new(),
            spotters: Vec::new(),
            members: Vec::new(),
            ground: None,
            solver: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absorb a member network, renumbering its nodes into the shared
    /// index space. Returns the member's node offset.
    pub fn add_member(&mut self, network: Network<N>) -> SimResult<usize> {
        if self.solver.is_some() {
            return Err(SimError::InvalidArg {
                what: "cannot add members after initialization",
            });
        }
        let offset = self.nodes.len();
        let (name, mut nodes, links, spotters) = network.into_parts();
        let ground = nodes.pop().ok_or(SimError::InvalidArg {
            what: "member network has no nodes",
        })?;
        // The first member donates the shared Ground node.
        if self.ground.is_none() {
            self.ground = Some(ground);
        }

        let num_solvable = nodes.len();
        let num_links = links.len();
        self.nodes.append(&mut nodes);
        self.links.extend(links);
        self.spotters.extend(spotters);
        self.members.push(Member {
            name,
            offset,
            num_solvable,
            num_links,
        });
        Ok(offset)
    }

    pub fn member_offset(&self, index: usize) -> Option<usize> {
        self.members.get(index).map(|m| m.offset)
    }

    /// Range of merged node indices owned by a member (Ground excluded).
    pub fn member_node_range(&self, index: usize) -> Option<std::ops::Range<usize>> {
        self.members
            .get(index)
            .map(|m| m.offset..m.offset + m.num_solvable)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn potential(&self, index: usize) -> Real {
        self.nodes[index].base().potential()
    }

    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    pub fn solver(&self) -> Option<&Solver> {
        self.solver.as_ref()
    }

    /// Finish composition: append the shared Ground, renumber every
    /// member link into the merged index space and prepare the solver.
    pub fn initialize(&mut self) -> SimResult<()> {
        let ground = self.ground.take().ok_or(SimError::InvalidArg {
            what: "super-network has no members",
        })?;
        self.nodes.push(ground);
        let total = self.nodes.len();

        // Each member's links were registered contiguously; shift their
        // node maps by the member's offset.
        let mut link_cursor = 0;
        for member in &self.members {
            for link in &mut self.links[link_cursor..link_cursor + member.num_links] {
                link.core_mut().renumber(member.offset, total);
            }
            link_cursor += member.num_links;
        }

        let mut solver = Solver::new(self.config.clone(), total)?;
        solver.prepare(&self.nodes, &self.links)?;
        self.solver = Some(solver);
        Ok(())
    }

    /// Advance the merged system one major step.
    pub fn step(&mut self, dt: Real) -> SimResult<()> {
        let Some(solver) = self.solver.as_mut() else {
            return Err(SimError::NotInitialized {
                name: self.name.clone(),
            });
        };
        for spotter in &mut self.spotters {
            spotter.pre_solver(dt, &self.nodes);
        }
        solver.step(dt, &mut self.nodes, &mut self.links)?;
        for spotter in &mut self.spotters {
            spotter.post_solver(dt, &self.nodes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_graph::BasicNode;
    use nf_links::conductor::{Conductor, ConductorConfig};
    use nf_links::PotentialSource;

    fn member(name: &str, volts: Real) -> Network<BasicNode> {
        let nodes = vec![
            BasicNode::new(format!("{name}_bus"), 0.0),
            BasicNode::new("ground", 0.0),
        ];
        let mut net = Network::new(name, SolverConfig::default(), nodes).unwrap();
        net.add_link(Box::new(
            PotentialSource::new(format!("{name}_src"), 1000.0, volts, [0, 1], 2).unwrap(),
        ));
        net.add_link(Box::new(
            Conductor::new(
                ConductorConfig {
                    name: format!("{name}_load"),
                    conductance: 1.0,
                },
                [0, 1],
                2,
            )
            .unwrap(),
        ));
        net
    }

    #[test]
    fn members_solve_in_shared_space() {
        let mut sup = SuperNetwork::new("super", SolverConfig::default());
        let off_a = sup.add_member(member("a", 10.0)).unwrap();
        let off_b = sup.add_member(member("b", 20.0)).unwrap();
        sup.initialize().unwrap();
        sup.step(0.1).unwrap();

        assert_eq!(off_a, 0);
        assert_eq!(off_b, 1);
        assert_eq!(sup.num_nodes(), 3);
        assert_eq!(sup.member_node_range(1), Some(1..2));

        // Each member's divider solves independently in the merged system.
        assert!((sup.potential(0) - 10.0 * 1000.0 / 1001.0).abs() < 1e-6);
        assert!((sup.potential(1) - 20.0 * 1000.0 / 1001.0).abs() < 1e-6);

        // Two independent islands, one per member.
        assert_eq!(sup.solver().unwrap().islands().len(), 2);
    }

    #[test]
    fn step_before_initialize_fails() {
        let mut sup: SuperNetwork<BasicNode> = SuperNetwork::new("super", SolverConfig::default());
        assert!(sup.step(0.1).is_err());
    }
}
