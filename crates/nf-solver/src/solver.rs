//! The network solver: assembly, island factorization and the minor-step
//! iteration loop.

use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Dyn};
use nf_core::Real;
use nf_graph::{decompose, Island, NetworkNode};
use nf_links::{Link, SolutionResult};
use tracing::{debug, error, warn};

use crate::config::SolverConfig;
use crate::error::{SolverError, SolverResult};
use crate::orchestrator::FlowOrchestrator;

type Factorization = nalgebra::linalg::LU<Real, Dyn, Dyn>;

/// Assembles and solves `A·p = w` over the non-Ground nodes, iterating
/// minor steps until the non-linear links accept the solution.
#[derive(Debug)]
pub struct Solver {
    config: SolverConfig,
    /// Total node count including Ground.
    num_nodes: usize,
    /// Solvable node count (Ground excluded).
    n: usize,
    a: DMatrix<Real>,
    w: DVector<Real>,
    p: DVector<Real>,
    p_prev_minor: DVector<Real>,
    p_step_start: DVector<Real>,
    islands: Vec<Arc<Island>>,
    island_dirty: Vec<bool>,
    island_lu: Vec<Option<Factorization>>,
    node_island: Vec<usize>,
    non_linear: bool,
    initialized: bool,
    decomposed_once: bool,
    major_step_count: u64,
    decomposition_count: u64,
    last_minor_step: usize,
    converged_step: usize,
    last_step_accepted: bool,
    islands_factorized_last_step: usize,
}

impl Solver {
    pub fn new(config: SolverConfig, num_nodes: usize) -> SolverResult<Self> {
        config.validate()?;
        if num_nodes < 2 {
            return Err(SolverError::InvalidConfig {
                name: config.name.clone(),
                what: "network needs at least one solvable node plus Ground",
            });
        }
        let n = num_nodes - 1;
        Ok(Self {
            config,
            num_nodes,
            n,
            a: DMatrix::zeros(n, n),
            w: DVector::zeros(n),
            p: DVector::zeros(n),
            p_prev_minor: DVector::zeros(n),
            p_step_start: DVector::zeros(n),
            islands: Vec::new(),
            island_dirty: Vec::new(),
            island_lu: Vec::new(),
            node_island: vec![0; n],
            non_linear: false,
            initialized: false,
            decomposed_once: false,
            major_step_count: 0,
            decomposition_count: 0,
            last_minor_step: 0,
            converged_step: 0,
            last_step_accepted: true,
            islands_factorized_last_step: 0,
        })
    }

    /// Capture initial node potentials and the network's linearity from
    /// the registered links. Must run once before stepping.
    pub fn prepare<N: NetworkNode>(
        &mut self,
        nodes: &[N],
        links: &[Box<dyn Link<N>>],
    ) -> SolverResult<()> {
        if nodes.len() != self.num_nodes {
            return Err(SolverError::InvalidConfig {
                name: self.config.name.clone(),
                what: "node count does not match solver allocation",
            });
        }
        for i in 0..self.n {
            self.p[i] = nodes[i].base().potential();
        }
        self.non_linear = links.iter().any(|l| l.is_non_linear());
        self.initialized = true;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn is_non_linear(&self) -> bool {
        self.non_linear
    }

    pub fn islands(&self) -> &[Arc<Island>] {
        &self.islands
    }

    pub fn major_step_count(&self) -> u64 {
        self.major_step_count
    }

    pub fn decomposition_count(&self) -> u64 {
        self.decomposition_count
    }

    /// Minor steps consumed by the last major step.
    pub fn last_minor_step(&self) -> usize {
        self.last_minor_step
    }

    pub fn converged_step(&self) -> usize {
        self.converged_step
    }

    /// Whether the last step ended with every link confirming.
    pub fn last_step_accepted(&self) -> bool {
        self.last_step_accepted
    }

    /// Islands factored during the last major step.
    pub fn islands_factorized_last_step(&self) -> usize {
        self.islands_factorized_last_step
    }

    pub fn potential(&self, node: usize) -> Real {
        self.p[node]
    }

    /// Residual `A·p − w` of the last solution, for verification.
    pub fn residual(&self) -> DVector<Real> {
        &self.a * &self.p - &self.w
    }

    /// Reset non-checkpointed solve state after a checkpoint load.
    pub fn restart(&mut self) {
        self.islands.clear();
        self.island_dirty.clear();
        self.island_lu.clear();
        self.decomposed_once = false;
        self.last_minor_step = 0;
        self.converged_step = 0;
        self.last_step_accepted = true;
    }

    /// Advance the network one major step of duration `dt`.
    pub fn step<N: NetworkNode>(
        &mut self,
        dt: Real,
        nodes: &mut [N],
        links: &mut [Box<dyn Link<N>>],
    ) -> SolverResult<()> {
        if !self.initialized {
            return Err(SolverError::NotInitialized {
                name: self.config.name.clone(),
            });
        }
        self.major_step_count += 1;
        self.islands_factorized_last_step = 0;
        self.p_step_start.copy_from(&self.p);

        // Reset per-step state on nodes and links.
        for node in nodes.iter_mut() {
            node.reset_flows();
        }
        for link in links.iter_mut() {
            link.core_mut().set_solution_result(SolutionResult::Confirm);
        }

        // Every link contributes once in registration order.
        for link in links.iter_mut() {
            link.step(dt, nodes);
        }

        let max_minor = if self.non_linear {
            self.config.max_minor_steps
        } else {
            1
        };
        self.converged_step = 0;
        let mut accepted = false;
        let mut held = false;

        for minor in 1..=max_minor {
            self.last_minor_step = minor;

            // Re-assemble; re-decompose islands when any admittance
            // contribution changed.
            let ground_potential = nodes[self.n].base().potential();
            let any_update =
                !self.decomposed_once || links.iter().any(|l| l.core().admittance_update());
            if any_update {
                self.assemble(links, ground_potential, true);
                self.redecompose(nodes, links);
                for link in links.iter_mut() {
                    link.core_mut().clear_admittance_update();
                }
            } else {
                self.assemble(links, ground_potential, false);
            }

            if !self.factor() {
                held = true;
                break;
            }
            self.serve_network_capacitance(nodes);

            self.p_prev_minor.copy_from(&self.p);
            if !self.solve_islands() {
                held = true;
                break;
            }
            self.distribute_potentials(nodes, links);

            // Convergence counter for priority-gated trip logic.
            let converged = (0..self.n)
                .all(|i| (self.p[i] - self.p_prev_minor[i]).abs() < self.config.convergence_tolerance);
            if converged {
                self.converged_step += 1;
            } else {
                self.converged_step = 0;
            }

            if !self.non_linear {
                accepted = true;
                break;
            }

            // Poll every link's verdict in registration order.
            let mut worst = SolutionResult::Confirm;
            for link in links.iter_mut() {
                let result = link.confirm_solution_acceptable(self.converged_step, minor);
                link.core_mut().set_solution_result(result);
                worst = worst.worst(result);
            }

            match worst {
                SolutionResult::Reject => {
                    // Roll back to the previous minor step and restart the
                    // converged-step counter.
                    self.p.copy_from(&self.p_prev_minor);
                    self.distribute_potentials(nodes, links);
                    self.converged_step = 0;
                    debug!(
                        network = %self.config.name,
                        minor, "solution rejected, re-solving"
                    );
                }
                SolutionResult::Delay => {}
                SolutionResult::Confirm => {
                    if self.converged_step >= 1 {
                        accepted = true;
                        break;
                    }
                }
            }

            if minor < max_minor {
                for link in links.iter_mut() {
                    link.minor_step(dt, minor + 1, nodes);
                }
            }
        }

        if held {
            // Hold potentials at their start-of-step values and continue.
            self.p.copy_from(&self.p_step_start);
            self.distribute_potentials(nodes, links);
        } else if self.non_linear && !accepted {
            warn!(
                network = %self.config.name,
                minor_steps = self.last_minor_step,
                "minor step limit exceeded without convergence, using last solution"
            );
        }
        self.last_step_accepted = accepted;

        FlowOrchestrator::update(dt, links, nodes);

        // Apply pressure corrections from capacitive nodes, washing the
        // mass error found during flow integration back toward the
        // equation of state. The corrected potentials take effect on the
        // next step's source terms.
        if !held {
            let mut corrected = false;
            for i in 0..self.n {
                let correction = nodes[i].compute_pressure_correction();
                if correction != 0.0 {
                    self.p[i] += correction;
                    corrected = true;
                }
            }
            if corrected {
                self.distribute_potentials(nodes, links);
            }
        }
        Ok(())
    }

    /// Gather link contributions into the global system. Ground has no
    /// row of its own; its fixed potential folds into the source vector.
    fn assemble<N: NetworkNode>(
        &mut self,
        links: &[Box<dyn Link<N>>],
        ground_potential: Real,
        rebuild_a: bool,
    ) {
        if rebuild_a {
            self.a.fill(0.0);
        }
        self.w.fill(0.0);

        for link in links {
            let core = link.core();
            let map = core.node_map();
            let ports = map.len();
            for (i, &ni) in map.iter().enumerate() {
                if ni >= self.n {
                    continue;
                }
                self.w[ni] += core.source()[i];
                for (j, &nj) in map.iter().enumerate() {
                    if nj >= self.n {
                        self.w[ni] -= core.admittance()[i * ports + j] * ground_potential;
                    } else if rebuild_a {
                        self.a[(ni, nj)] += core.admittance()[i * ports + j];
                    }
                }
            }
        }
    }

    /// Re-partition the islands, keeping factorizations for islands whose
    /// node set is unchanged and untouched by the admittance updates.
    fn redecompose<N: NetworkNode>(&mut self, nodes: &mut [N], links: &[Box<dyn Link<N>>]) {
        let mut edges = Vec::new();
        for link in links {
            let core = link.core();
            let map = core.node_map();
            let ports = map.len();
            for i in 0..ports {
                for j in (i + 1)..ports {
                    if core.admittance()[i * ports + j].abs() > 0.0
                        || core.admittance()[j * ports + i].abs() > 0.0
                    {
                        edges.push((map[i], map[j]));
                    }
                }
            }
        }

        let mut new_islands = decompose(self.num_nodes, edges);
        if new_islands
            .iter()
            .any(|island| island.len() > self.config.decomposition_limit)
        {
            // Per-island decomposition is off for this step; solve the
            // whole system as one block.
            new_islands = vec![Arc::new(Island {
                id: 0,
                nodes: (0..self.n).collect(),
            })];
        }
        self.decomposition_count += 1;
        self.decomposed_once = true;

        // Nodes touched by an admittance update invalidate their island's
        // cached factorization.
        let updated_nodes: HashSet<usize> = links
            .iter()
            .filter(|l| l.core().admittance_update())
            .flat_map(|l| l.core().node_map().iter().copied())
            .collect();

        let old_islands = std::mem::take(&mut self.islands);
        let old_lu: Vec<Option<Factorization>> = std::mem::take(&mut self.island_lu);

        let mut new_lu: Vec<Option<Factorization>> = Vec::with_capacity(new_islands.len());
        let mut new_dirty = Vec::with_capacity(new_islands.len());
        for island in &new_islands {
            let touched = island.nodes.iter().any(|n| updated_nodes.contains(n));
            let carried = if touched {
                None
            } else {
                old_islands
                    .iter()
                    .position(|old| old.nodes == island.nodes)
                    .and_then(|idx| old_lu.get(idx).and_then(|lu| lu.as_ref().cloned()))
            };
            new_dirty.push(carried.is_none());
            new_lu.push(carried);
        }

        for (id, island) in new_islands.iter().enumerate() {
            for &node in &island.nodes {
                self.node_island[node] = id;
                nodes[node].base_mut().set_island(Some(island.clone()));
            }
        }

        self.islands = new_islands;
        self.island_lu = new_lu;
        self.island_dirty = new_dirty;
    }

    /// Factor every dirty island. Returns false when a diagonal underflows
    /// and the step must hold its potentials.
    fn factor(&mut self) -> bool {
        for (idx, island) in self.islands.iter().enumerate() {
            if !self.island_dirty[idx] && self.island_lu[idx].is_some() {
                continue;
            }
            let k = island.len();
            let mut sub = DMatrix::zeros(k, k);
            for (r, &nr) in island.nodes.iter().enumerate() {
                for (c, &nc) in island.nodes.iter().enumerate() {
                    sub[(r, c)] = self.a[(nr, nc)];
                }
            }
            let lu = sub.lu();
            let u = lu.u();
            let singular = (0..k).any(|d| u[(d, d)].abs() < self.config.min_linear_diagonal);
            if singular {
                error!(
                    network = %self.config.name,
                    island = island.id,
                    "admittance matrix is singular, holding potentials for this step"
                );
                self.island_lu[idx] = None;
                return false;
            }
            self.island_lu[idx] = Some(lu);
            self.island_dirty[idx] = false;
            self.islands_factorized_last_step += 1;
        }
        true
    }

    /// Solve each island block for its potentials.
    fn solve_islands(&mut self) -> bool {
        for (idx, island) in self.islands.iter().enumerate() {
            let Some(lu) = self.island_lu[idx].as_ref() else {
                return false;
            };
            let k = island.len();
            let mut b = DVector::zeros(k);
            for (r, &nr) in island.nodes.iter().enumerate() {
                b[r] = self.w[nr];
            }
            match lu.solve(&b) {
                Some(x) => {
                    for (r, &nr) in island.nodes.iter().enumerate() {
                        self.p[nr] = x[r];
                    }
                }
                None => {
                    error!(
                        network = %self.config.name,
                        island = island.id,
                        "island solve failed, holding potentials for this step"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Compute a column of the inverse admittance matrix for every node
    /// that requested its network capacitance.
    fn serve_network_capacitance<N: NetworkNode>(&mut self, nodes: &mut [N]) {
        for i in 0..self.n {
            if nodes[i].base().network_capacitance_request() <= 0.0 {
                continue;
            }
            let island_id = self.node_island[i];
            let Some(lu) = self.island_lu[island_id].as_ref() else {
                continue;
            };
            let island = &self.islands[island_id];
            let Ok(pos) = island.nodes.binary_search(&i) else {
                continue;
            };
            let k = island.len();
            let mut e = DVector::zeros(k);
            e[pos] = 1.0;
            if let Some(x) = lu.solve(&e) {
                let mut delta = vec![0.0; self.n];
                for (r, &nr) in island.nodes.iter().enumerate() {
                    delta[nr] = x[r];
                }
                let capacitance = x[pos];
                nodes[i]
                    .base_mut()
                    .set_network_capacitance(capacitance, delta);
            }
        }
    }

    /// Write solved potentials back to the nodes and link potential views.
    fn distribute_potentials<N: NetworkNode>(
        &mut self,
        nodes: &mut [N],
        links: &mut [Box<dyn Link<N>>],
    ) {
        for i in 0..self.n {
            nodes[i].set_potential(self.p[i]);
        }
        let ground_potential = nodes[self.n].base().potential();
        for link in links.iter_mut() {
            let core = link.core_mut();
            for port in 0..core.num_ports() {
                let node = core.port_node(port);
                let value = if node >= self.n {
                    ground_potential
                } else {
                    self.p[node]
                };
                core.set_port_potential(port, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_graph::BasicNode;
    use nf_links::conductor::{Conductor, ConductorConfig};
    use nf_links::PotentialSource;

    fn conductor(name: &str, g: Real, ports: [usize; 2], num_nodes: usize) -> Box<dyn Link<BasicNode>> {
        Box::new(
            Conductor::new(
                ConductorConfig {
                    name: name.into(),
                    conductance: g,
                },
                ports,
                num_nodes,
            )
            .unwrap(),
        )
    }

    fn source(name: &str, g: Real, v: Real, ports: [usize; 2], num_nodes: usize) -> Box<dyn Link<BasicNode>> {
        Box::new(PotentialSource::new(name, g, v, ports, num_nodes).unwrap())
    }

    #[test]
    fn voltage_divider_solves() {
        // src(10V) -> n0 -R(1S)-> n1 -R(1S)-> ground
        let mut nodes = vec![
            BasicNode::new("n0", 0.0),
            BasicNode::new("n1", 0.0),
            BasicNode::new("ground", 0.0),
        ];
        let mut links = vec![
            source("v", 1000.0, 10.0, [0, 2], 3),
            conductor("r1", 1.0, [0, 1], 3),
            conductor("r2", 1.0, [1, 2], 3),
        ];
        let mut solver = Solver::new(SolverConfig::default(), 3).unwrap();
        solver.prepare(&nodes, &links).unwrap();
        solver.step(0.1, &mut nodes, &mut links).unwrap();

        // Thevenin: n0 ~ 10V (stiff source), n1 ~ 5V.
        assert!((nodes[0].potential() - 10.0).abs() < 0.05);
        assert!((nodes[1].potential() - 5.0).abs() < 0.05);

        // Linear solve satisfies A·p = w.
        let residual = solver.residual();
        assert!(residual.amax() < 10.0 * solver.config().min_linear_diagonal);
    }

    #[test]
    fn ground_potential_never_moves() {
        let mut nodes = vec![BasicNode::new("n0", 0.0), BasicNode::new("ground", 7.5)];
        let mut links = vec![source("v", 100.0, 3.0, [0, 1], 2)];
        let mut solver = Solver::new(SolverConfig::default(), 2).unwrap();
        solver.prepare(&nodes, &links).unwrap();
        for _ in 0..5 {
            solver.step(0.1, &mut nodes, &mut links).unwrap();
        }
        assert_eq!(nodes[1].potential(), 7.5);
        // Driven node settles at source + ground reference offset.
        assert!((nodes[0].potential() - 10.5).abs() < 1e-9);
    }

    #[test]
    fn singular_matrix_holds_potentials() {
        // A node with no admittance at all.
        let mut nodes = vec![
            BasicNode::new("n0", 2.5),
            BasicNode::new("n1", 1.0),
            BasicNode::new("ground", 0.0),
        ];
        let mut links = vec![
            source("v", 100.0, 5.0, [0, 2], 3),
            conductor("dangling", 0.0, [1, 2], 3),
        ];
        let mut solver = Solver::new(SolverConfig::default(), 3).unwrap();
        solver.prepare(&nodes, &links).unwrap();
        solver.step(0.1, &mut nodes, &mut links).unwrap();

        // Both nodes held at their initial potentials.
        assert_eq!(nodes[0].potential(), 2.5);
        assert_eq!(nodes[1].potential(), 1.0);
    }

    #[test]
    fn unchanged_admittance_skips_refactorization() {
        let mut nodes = vec![
            BasicNode::new("n0", 0.0),
            BasicNode::new("ground", 0.0),
        ];
        let mut links = vec![source("v", 100.0, 5.0, [0, 1], 2)];
        let mut solver = Solver::new(SolverConfig::default(), 2).unwrap();
        solver.prepare(&nodes, &links).unwrap();

        solver.step(0.1, &mut nodes, &mut links).unwrap();
        assert_eq!(solver.islands_factorized_last_step(), 1);

        solver.step(0.1, &mut nodes, &mut links).unwrap();
        assert_eq!(solver.islands_factorized_last_step(), 0);
    }
}
