//! A self-contained network: nodes, links, spotters and a solver.

use nf_core::Real;
use nf_graph::NetworkNode;
use nf_links::Link;
use nf_solver::{Solver, SolverConfig, Spotter};

use crate::error::{SimError, SimResult};

/// Owns the pieces of one simulated network and drives them each major
/// step: spotters pre-solver, then the solver (assembly, minor-step loop,
/// flow transport), then spotters post-solver.
///
/// The Ground node must be the last entry of `nodes`.
pub struct Network<N: NetworkNode> {
    name: String,
    nodes: Vec<N>,
    links: Vec<Box<dyn Link<N>>>,
    spotters: Vec<Box<dyn Spotter<N>>>,
    solver: Solver,
    is_sub_network: bool,
    initialized: bool,
}

impl<N: NetworkNode> Network<N> {
    /// Create a network over the given nodes (Ground last).
    pub fn new(
        name: impl Into<String>,
        config: SolverConfig,
        nodes: Vec<N>,
    ) -> SimResult<Self> {
        let solver = Solver::new(config, nodes.len())?;
        Ok(Self {
            name: name.into(),
            nodes,
            links: Vec::new(),
            spotters: Vec::new(),
            solver,
            is_sub_network: false,
            initialized: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn ground_index(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [N] {
        &mut self.nodes
    }

    pub fn node(&self, index: usize) -> &N {
        &self.nodes[index]
    }

    pub fn potential(&self, index: usize) -> Real {
        self.nodes[index].base().potential()
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    /// Register a link. Links step in registration order and compute
    /// flows in reverse registration order.
    pub fn add_link(&mut self, link: Box<dyn Link<N>>) -> usize {
        self.links.push(link);
        self.links.len() - 1
    }

    pub fn add_spotter(&mut self, spotter: Box<dyn Spotter<N>>) -> usize {
        self.spotters.push(spotter);
        self.spotters.len() - 1
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn links(&self) -> &[Box<dyn Link<N>>] {
        &self.links
    }

    /// Borrow a registered link back as its concrete type.
    pub fn link_as<L: 'static>(&self, index: usize) -> Option<&L> {
        self.links.get(index)?.as_any().downcast_ref::<L>()
    }

    /// Mutably borrow a registered link back as its concrete type, e.g.
    /// to command a breaker or change a conductance.
    pub fn link_as_mut<L: 'static>(&mut self, index: usize) -> Option<&mut L> {
        self.links.get_mut(index)?.as_any_mut().downcast_mut::<L>()
    }

    /// Borrow a registered spotter back as its concrete type.
    pub fn spotter_as<S: 'static>(&self, index: usize) -> Option<&S> {
        self.spotters.get(index)?.as_any().downcast_ref::<S>()
    }

    pub fn spotter_as_mut<S: 'static>(&mut self, index: usize) -> Option<&mut S> {
        self.spotters.get_mut(index)?.as_any_mut().downcast_mut::<S>()
    }

    /// Mark this network as embedded in a super-network; its own solver
    /// invocation is skipped when stepping.
    pub fn set_sub_network(&mut self, is_sub_network: bool) {
        self.is_sub_network = is_sub_network;
    }

    pub fn is_sub_network(&self) -> bool {
        self.is_sub_network
    }

    /// Finish construction: wire the solver to the registered links.
    pub fn initialize(&mut self) -> SimResult<()> {
        self.solver.prepare(&self.nodes, &self.links)?;
        self.initialized = true;
        Ok(())
    }

    /// Advance one major step of duration `dt`.
    pub fn step(&mut self, dt: Real) -> SimResult<()> {
        if !self.initialized {
            return Err(SimError::NotInitialized {
                name: self.name.clone(),
            });
        }
        for spotter in &mut self.spotters {
            spotter.pre_solver(dt, &self.nodes);
        }
        if !self.is_sub_network {
            self.solver.step(dt, &mut self.nodes, &mut self.links)?;
        }
        for spotter in &mut self.spotters {
            spotter.post_solver(dt, &self.nodes);
        }
        Ok(())
    }

    /// Reset non-checkpointed state on every node, link and the solver,
    /// as after a checkpoint load.
    pub fn restart(&mut self) {
        for node in &mut self.nodes {
            node.restart();
        }
        for link in &mut self.links {
            link.restart();
        }
        self.solver.restart();
    }

    /// Break the network into its parts for super-network composition.
    pub fn into_parts(self) -> (String, Vec<N>, Vec<Box<dyn Link<N>>>, Vec<Box<dyn Spotter<N>>>) {
        (self.name, self.nodes, self.links, self.spotters)
    }
}
