//! Post-solve flow transport and integration.

use nf_core::Real;
use nf_graph::NetworkNode;
use nf_links::Link;

/// Drives post-solve flow computation on links and flow integration on
/// nodes.
#[derive(Debug, Default)]
pub struct FlowOrchestrator;

impl FlowOrchestrator {
    /// Links run in reverse registration order so composite links see
    /// their child links' flows already processed; then every node except
    /// Ground integrates its collected flows.
    pub fn update<N: NetworkNode>(dt: Real, links: &mut [Box<dyn Link<N>>], nodes: &mut [N]) {
        for link in links.iter_mut().rev() {
            link.compute_flows(dt, nodes);
        }

        let ground = nodes.len() - 1;
        for node in nodes[..ground].iter_mut() {
            node.integrate_flows(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_core::Real;
    use nf_graph::BasicNode;
    use nf_links::LinkCore;
    use std::sync::{Arc, Mutex};

    /// Records the order compute_flows is called in.
    struct Recorder {
        core: LinkCore,
        tag: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    impl Link<BasicNode> for Recorder {
        fn core(&self) -> &LinkCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut LinkCore {
            &mut self.core
        }
        fn step(&mut self, _dt: Real, _nodes: &mut [BasicNode]) {}
        fn compute_flows(&mut self, _dt: Real, _nodes: &mut [BasicNode]) {
            self.log.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn links_run_in_reverse_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut nodes = vec![BasicNode::new("a", 0.0), BasicNode::new("ground", 0.0)];
        let mut links: Vec<Box<dyn Link<BasicNode>>> = (0..3)
            .map(|tag| {
                Box::new(Recorder {
                    core: LinkCore::new(format!("l{tag}"), vec![0], 2).unwrap(),
                    tag,
                    log: log.clone(),
                }) as Box<dyn Link<BasicNode>>
            })
            .collect();

        FlowOrchestrator::update(0.1, &mut links, &mut nodes);
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn ground_is_not_integrated() {
        let mut nodes = vec![BasicNode::new("a", 0.0), BasicNode::new("ground", 0.0)];
        nodes[0].collect_influx(2.0).unwrap();
        nodes[1].collect_influx(5.0).unwrap();
        let mut links: Vec<Box<dyn Link<BasicNode>>> = Vec::new();

        FlowOrchestrator::update(0.1, &mut links, &mut nodes);
        assert_eq!(nodes[0].net_flux(), 2.0);
        // Ground keeps its reset state report.
        assert_eq!(nodes[1].net_flux(), 0.0);
    }
}
