//! Analysis spotters.

use nf_core::Real;
use nf_fluids::FluidNode;
use nf_graph::NetworkNode;
use nf_solver::Spotter;

/// Island analyzer spotter: reports details about the island containing
/// its attached node after every solution.
#[derive(Debug)]
pub struct IslandAnalyzer {
    name: String,
    attached_node: Option<usize>,
    island_size: usize,
    island_nodes: Vec<bool>,
    island_net_flux: Real,
    hi_potential: Real,
    hi_potential_node: Option<usize>,
    lo_potential: Real,
    lo_potential_node: Option<usize>,
}

impl IslandAnalyzer {
    pub fn new(name: impl Into<String>, num_nodes: usize) -> Self {
        Self {
            name: name.into(),
            attached_node: None,
            island_size: 0,
            island_nodes: vec![false; num_nodes],
            island_net_flux: 0.0,
            hi_potential: 0.0,
            hi_potential_node: None,
            lo_potential: 0.0,
            lo_potential_node: None,
        }
    }

    /// Choose which node's island to analyze.
    pub fn attach(&mut self, node: usize) {
        self.attached_node = Some(node);
    }

    pub fn island_size(&self) -> usize {
        self.island_size
    }

    pub fn island_nodes(&self) -> &[bool] {
        &self.island_nodes
    }

    pub fn island_net_flux(&self) -> Real {
        self.island_net_flux
    }

    pub fn hi_potential(&self) -> (Real, Option<usize>) {
        (self.hi_potential, self.hi_potential_node)
    }

    pub fn lo_potential(&self) -> (Real, Option<usize>) {
        (self.lo_potential, self.lo_potential_node)
    }

    fn reset_state(&mut self) {
        self.island_size = 0;
        self.island_net_flux = 0.0;
        self.hi_potential = 0.0;
        self.hi_potential_node = None;
        self.lo_potential = 0.0;
        self.lo_potential_node = None;
        for flag in &mut self.island_nodes {
            *flag = false;
        }
    }

    fn analyze<N: NetworkNode>(&mut self, attached: usize, nodes: &[N]) {
        let Some(island) = nodes[attached].base().island().cloned() else {
            return;
        };
        self.island_size = island.len();
        self.hi_potential = -1.0e15;
        self.lo_potential = 1.0e15;

        for &node in &island.nodes {
            self.island_nodes[node] = true;
            self.island_net_flux += nodes[node].base().net_flux();

            let potential = nodes[node].base().potential();
            if potential >= self.hi_potential {
                self.hi_potential = potential;
                self.hi_potential_node = Some(node);
            }
            if potential <= self.lo_potential {
                self.lo_potential = potential;
                self.lo_potential_node = Some(node);
            }
        }
    }
}

impl<N: NetworkNode> Spotter<N> for IslandAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_solver(&mut self, _dt: Real, nodes: &[N]) {
        self.reset_state();
        if let Some(attached) = self.attached_node {
            if attached < nodes.len() - 1 {
                self.analyze(attached, nodes);
            }
        }
    }
}

/// Fluid volume monitor spotter: samples the fluid state of its attached
/// node after every step.
#[derive(Debug, Default)]
pub struct VolumeMonitor {
    name: String,
    attached_node: usize,
    mass: Real,
    volume: Real,
    pressure: Real,
    temperature: Real,
    mass_fractions: Vec<Real>,
}

impl VolumeMonitor {
    pub fn new(name: impl Into<String>, attached_node: usize) -> Self {
        Self {
            name: name.into(),
            attached_node,
            ..Default::default()
        }
    }

    pub fn mass(&self) -> Real {
        self.mass
    }

    pub fn volume(&self) -> Real {
        self.volume
    }

    pub fn pressure(&self) -> Real {
        self.pressure
    }

    pub fn temperature(&self) -> Real {
        self.temperature
    }

    pub fn mass_fractions(&self) -> &[Real] {
        &self.mass_fractions
    }
}

impl Spotter<FluidNode> for VolumeMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_solver(&mut self, _dt: Real, nodes: &[FluidNode]) {
        let Some(node) = nodes.get(self.attached_node) else {
            return;
        };
        self.mass = node.mass();
        self.volume = node.volume();
        self.pressure = node.content().pressure();
        self.temperature = node.content().temperature();
        self.mass_fractions.clear();
        self.mass_fractions
            .extend_from_slice(node.content().mass_fractions());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_graph::BasicNode;
    use nf_graph::Island;
    use std::sync::Arc;

    #[test]
    fn analyzer_reports_island_extremes() {
        let island = Arc::new(Island {
            id: 0,
            nodes: vec![0, 1],
        });
        let mut nodes = vec![
            BasicNode::new("a", 3.0),
            BasicNode::new("b", 7.0),
            BasicNode::new("ground", 0.0),
        ];
        nodes[0].set_island(Some(island.clone()));
        nodes[1].set_island(Some(island));
        nodes[0].collect_influx(1.0).unwrap();
        nodes[0].integrate_flows();
        nodes[1].integrate_flows();

        let mut analyzer = IslandAnalyzer::new("isl", 3);
        analyzer.attach(0);
        Spotter::<BasicNode>::post_solver(&mut analyzer, 0.1, &nodes);

        assert_eq!(analyzer.island_size(), 2);
        assert_eq!(analyzer.island_nodes(), &[true, true, false]);
        assert_eq!(analyzer.hi_potential(), (7.0, Some(1)));
        assert_eq!(analyzer.lo_potential(), (3.0, Some(0)));
        assert_eq!(analyzer.island_net_flux(), 1.0);
    }

    #[test]
    fn analyzer_ignores_ground_attachment() {
        let nodes = vec![BasicNode::new("a", 1.0), BasicNode::new("ground", 0.0)];
        let mut analyzer = IslandAnalyzer::new("isl", 2);
        analyzer.attach(1);
        Spotter::<BasicNode>::post_solver(&mut analyzer, 0.1, &nodes);
        assert_eq!(analyzer.island_size(), 0);
    }
}
