use std::sync::Arc;

use catalog::ImageRecord;
use core_types::Fingerprint;

use crate::graph::CoreGraph;

/// Endless walk over a [`CoreGraph`] that always steps to the least visited
/// successor, so over time every image is shown about equally often.
///
/// The first image yielded is the first core node and is not counted as a
/// visit. Each later step counts one visit for the node it lands on.
#[derive(Debug, Clone)]
pub struct SequencePlanner {
    core: CoreGraph,
    visits: Vec<u64>,
    current: usize,
    started: bool,
}

impl SequencePlanner {
    pub fn new(core: CoreGraph) -> Self {
        let visits = vec![0; core.node_count()];
        Self {
            core,
            visits,
            current: 0,
            started: false,
        }
    }

    pub fn core(&self) -> &CoreGraph {
        &self.core
    }

    /// The image most recently yielded, or the start node before the first.
    pub fn current(&self) -> &Arc<ImageRecord> {
        &self.core.graph().nodes()[self.current]
    }

    pub fn visits(&self, fingerprint: &Fingerprint) -> Option<u64> {
        self.core
            .graph()
            .position(fingerprint)
            .map(|p| self.visits[p])
    }

    /// Visit counters in core node order.
    pub fn visit_counts(&self) -> &[u64] {
        &self.visits
    }

    /// Returns to the start node with all counters cleared.
    pub fn reset(&mut self) {
        self.visits.iter_mut().for_each(|v| *v = 0);
        self.current = 0;
        self.started = false;
    }

    pub fn next_image(&mut self) -> Arc<ImageRecord> {
        if !self.started {
            self.started = true;
        } else {
            self.advance();
        }
        self.current().clone()
    }

    fn advance(&mut self) {
        let mut best: Option<usize> = None;
        for &candidate in self.core.graph().neighbors(self.current) {
            if best.map_or(true, |b| self.visits[candidate] < self.visits[b]) {
                best = Some(candidate);
            }
        }
        // Core nodes always have a successor.
        if let Some(next) = best {
            self.visits[next] += 1;
            self.current = next;
        }
    }
}

impl Iterator for SequencePlanner {
    type Item = Arc<ImageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TransitionGraph;
    use core_types::{Orientation, Rgb};

    fn nodes(n: usize) -> Vec<Arc<ImageRecord>> {
        (0..n)
            .map(|i| {
                Arc::new(
                    ImageRecord::new(
                        Fingerprint::new(format!("n{i}")),
                        format!("/virtual/n{i}.png"),
                        4,
                        4,
                        Rgb::BLACK,
                        Orientation::Deg0,
                    )
                    .unwrap(),
                )
            })
            .collect()
    }

    fn planner(n: usize, edges: impl IntoIterator<Item = (usize, usize)>) -> SequencePlanner {
        let records = nodes(n);
        let mut graph = TransitionGraph::new(records.iter().cloned());
        for (from, to) in edges {
            graph
                .add_edge(records[from].fingerprint(), records[to].fingerprint())
                .unwrap();
        }
        SequencePlanner::new(graph.reduce_to_core().unwrap())
    }

    fn spread(counts: &[u64]) -> u64 {
        counts.iter().max().unwrap() - counts.iter().min().unwrap()
    }

    #[test]
    fn first_image_is_the_start_node_and_uncounted() {
        let mut p = planner(2, [(0, 1), (1, 0)]);
        assert_eq!(p.next_image().fingerprint().as_str(), "n0");
        assert_eq!(p.visit_counts(), [0, 0]);
        assert_eq!(p.next_image().fingerprint().as_str(), "n1");
        assert_eq!(p.visit_counts(), [0, 1]);
        assert_eq!(p.next_image().fingerprint().as_str(), "n0");
        assert_eq!(p.visits(&Fingerprint::from("n0")), Some(1));
    }

    #[test]
    fn ties_follow_edge_order() {
        let mut p = planner(3, [(0, 2), (0, 1), (1, 0), (2, 0)]);
        let names: Vec<_> = p
            .by_ref()
            .take(5)
            .map(|r| r.fingerprint().as_str().to_string())
            .collect();
        assert_eq!(names, ["n0", "n2", "n0", "n1", "n0"]);
    }

    #[test]
    fn complete_graph_visits_stay_balanced() {
        let n = 5;
        let edges = (0..n).flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)));
        let mut p = planner(n, edges);
        for step in 1..=200 {
            p.next_image();
            if step > 2 * n {
                assert!(spread(p.visit_counts()) <= 1, "step {step}: {:?}", p.visit_counts());
            }
        }
    }

    #[test]
    fn ring_with_chords_stays_balanced() {
        let n = 6;
        let edges = (0..n).flat_map(|i| [(i, (i + 1) % n), (i, (i + 2) % n)]);
        let mut p = planner(n, edges);
        for step in 1..=300 {
            p.next_image();
            if step > 2 * n {
                assert!(spread(p.visit_counts()) <= 1, "step {step}: {:?}", p.visit_counts());
            }
        }
    }

    #[test]
    fn walk_never_leaves_the_core() {
        // n3 is reachable but cannot get back.
        let mut p = planner(4, [(0, 1), (1, 2), (2, 0), (2, 3)]);
        for image in p.by_ref().take(50) {
            assert_ne!(image.fingerprint().as_str(), "n3");
        }
        assert_eq!(p.core().node_count(), 3);
    }

    #[test]
    fn reset_restarts_the_walk() {
        let mut p = planner(2, [(0, 1), (1, 0)]);
        p.by_ref().take(4).for_each(drop);
        p.reset();
        assert_eq!(p.visit_counts(), [0, 0]);
        assert_eq!(p.next_image().fingerprint().as_str(), "n0");
    }
}
