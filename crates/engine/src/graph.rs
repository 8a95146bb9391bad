use std::collections::HashMap;
use std::sync::Arc;

use catalog::db::GraphRow;
use catalog::{CacheDb, ImageCatalog, ImageRecord};
use chrono::Utc;
use core_types::Fingerprint;
use tracing::{debug, info, warn};

use crate::compose::MosaicComposer;
use crate::{EngineError, Result};

const UNVISITED: usize = usize::MAX;

/// Directed graph over catalog images with an edge `tile -> target` whenever
/// `tile` appears in the mosaic of `target`.
///
/// Nodes keep catalog order and each adjacency list keeps edge insertion
/// order, which fixes tie-breaks during traversal.
#[derive(Debug, Clone)]
pub struct TransitionGraph {
    nodes: Vec<Arc<ImageRecord>>,
    index: HashMap<Fingerprint, usize>,
    adjacency: Vec<Vec<usize>>,
    edge_count: usize,
}

impl TransitionGraph {
    /// Graph over `nodes` with no edges. Repeated fingerprints are ignored.
    pub fn new(nodes: impl IntoIterator<Item = Arc<ImageRecord>>) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            adjacency: Vec::new(),
            edge_count: 0,
        };
        for node in nodes {
            if graph.index.contains_key(node.fingerprint()) {
                continue;
            }
            graph
                .index
                .insert(node.fingerprint().clone(), graph.nodes.len());
            graph.nodes.push(node);
            graph.adjacency.push(Vec::new());
        }
        graph
    }

    /// Builds the graph from one mosaic per catalog image, composed with
    /// the given settings. A stored edge list for the same catalog and
    /// settings is reused when it still matches the catalog; otherwise it is
    /// rebuilt and overwritten.
    pub fn build(
        composer: &mut MosaicComposer,
        db: &CacheDb,
        segments: u32,
        reuse: bool,
    ) -> Result<Self> {
        let catalog = composer.catalog().clone();
        match GraphRow::find(db, catalog.identity(), segments, reuse) {
            Ok(Some(row)) => {
                if let Some(graph) = Self::from_row(&catalog, &row) {
                    debug!(
                        "Restored transition graph: {} nodes, {} edges",
                        graph.node_count(),
                        graph.edge_count()
                    );
                    return Ok(graph);
                }
            }
            Ok(None) => {}
            Err(err) => warn!("Discarding unreadable transition graph: {err:#}"),
        }

        let mut graph = Self::new(catalog.records().iter().cloned());
        for target in catalog.records() {
            let mosaic = composer.compose(db, target, segments, reuse)?;
            for tile in mosaic.tiles() {
                graph.add_edge(tile.fingerprint(), target.fingerprint())?;
            }
        }

        GraphRow {
            catalog_hash: catalog.identity().to_string(),
            segments,
            reuse,
            edges: graph.edges(),
            cached_at: Utc::now(),
        }
        .upsert(db)?;
        info!(
            "Built transition graph at {segments} segments (reuse={reuse}): {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Rebuilds a stored edge list, or `None` when it names images outside
    /// the catalog or leaves some image without an incoming edge. Every
    /// mosaic has at least one tile, so a complete graph never does.
    fn from_row(catalog: &ImageCatalog, row: &GraphRow) -> Option<Self> {
        let mut graph = Self::new(catalog.records().iter().cloned());
        for (from, to) in &row.edges {
            if graph.add_edge(from, to).is_err() {
                warn!(
                    "Discarding stored transition graph naming unknown image {from} or {to}"
                );
                return None;
            }
        }

        let mut has_incoming = vec![false; graph.node_count()];
        for targets in &graph.adjacency {
            for &to in targets {
                has_incoming[to] = true;
            }
        }
        if let Some(missing) = has_incoming.iter().position(|&seen| !seen) {
            warn!(
                "Discarding incomplete transition graph: {} has no incoming edge",
                graph.nodes[missing].fingerprint()
            );
            return None;
        }
        Some(graph)
    }

    /// Adds `from -> to`. Returns `false` when the edge already exists.
    pub fn add_edge(&mut self, from: &Fingerprint, to: &Fingerprint) -> Result<bool> {
        let from = self.require(from)?;
        let to = self.require(to)?;
        Ok(self.link(from, to))
    }

    fn require(&self, fingerprint: &Fingerprint) -> Result<usize> {
        self.index
            .get(fingerprint)
            .copied()
            .ok_or_else(|| EngineError::UnknownImage(fingerprint.clone()))
    }

    fn link(&mut self, from: usize, to: usize) -> bool {
        let targets = &mut self.adjacency[from];
        if targets.contains(&to) {
            return false;
        }
        targets.push(to);
        self.edge_count += 1;
        true
    }

    pub fn nodes(&self) -> &[Arc<ImageRecord>] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn position(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.index.get(fingerprint).copied()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }

    pub fn has_edge(&self, from: &Fingerprint, to: &Fingerprint) -> bool {
        match (self.position(from), self.position(to)) {
            (Some(from), Some(to)) => self.adjacency[from].contains(&to),
            _ => false,
        }
    }

    /// Successor positions of the node at `position`, in insertion order.
    pub fn neighbors(&self, position: usize) -> &[usize] {
        self.adjacency
            .get(position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn successors(&self, fingerprint: &Fingerprint) -> Vec<&Arc<ImageRecord>> {
        self.position(fingerprint)
            .map(|p| self.neighbors(p).iter().map(|&n| &self.nodes[n]).collect())
            .unwrap_or_default()
    }

    /// All edges, grouped by source in node order. Feeding them back through
    /// [`add_edge`](Self::add_edge) reproduces the same adjacency lists.
    pub fn edges(&self) -> Vec<(Fingerprint, Fingerprint)> {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(from, targets)| {
                targets.iter().map(move |&to| {
                    (
                        self.nodes[from].fingerprint().clone(),
                        self.nodes[to].fingerprint().clone(),
                    )
                })
            })
            .collect()
    }

    /// Strongly connected components (Tarjan, iterative). Members of each
    /// component are sorted by node position.
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        let n = self.nodes.len();
        let mut order = vec![UNVISITED; n];
        let mut lowlink = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut components = Vec::new();
        let mut next_order = 0;

        for root in 0..n {
            if order[root] != UNVISITED {
                continue;
            }
            order[root] = next_order;
            lowlink[root] = next_order;
            next_order += 1;
            stack.push(root);
            on_stack[root] = true;

            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            while let Some(frame) = frames.last_mut() {
                let v = frame.0;
                if let Some(&w) = self.adjacency[v].get(frame.1) {
                    frame.1 += 1;
                    if order[w] == UNVISITED {
                        order[w] = next_order;
                        lowlink[w] = next_order;
                        next_order += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        frames.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(order[w]);
                    }
                    continue;
                }

                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == order[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
        components
    }

    /// Restricts the graph to its largest strongly connected component.
    ///
    /// Only components containing a cycle qualify, so a lone node needs a
    /// self-loop. Among equally large components the one holding the
    /// earliest node wins. Fails with [`EngineError::EmptyGraph`] when no
    /// cycle exists.
    pub fn reduce_to_core(&self) -> Result<CoreGraph> {
        let mut best: Option<Vec<usize>> = None;
        for component in self.strongly_connected_components() {
            let first = component[0];
            let cyclic = component.len() > 1 || self.adjacency[first].contains(&first);
            if !cyclic {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    component.len() > current.len()
                        || (component.len() == current.len() && component[0] < current[0])
                }
            };
            if better {
                best = Some(component);
            }
        }
        let members = best.ok_or(EngineError::EmptyGraph)?;

        let mut core = Self::new(members.iter().map(|&i| self.nodes[i].clone()));
        for &from in &members {
            for &to in &self.adjacency[from] {
                if let (Some(a), Some(b)) = (
                    core.position(self.nodes[from].fingerprint()),
                    core.position(self.nodes[to].fingerprint()),
                ) {
                    core.link(a, b);
                }
            }
        }
        debug!(
            "Reduced transition graph to its core: kept {}, dropped {}",
            core.node_count(),
            self.node_count() - core.node_count()
        );
        Ok(CoreGraph(core))
    }
}

/// A non-empty, strongly connected [`TransitionGraph`]: every node can reach
/// every other and has at least one successor.
#[derive(Debug, Clone)]
pub struct CoreGraph(TransitionGraph);

impl CoreGraph {
    pub fn graph(&self) -> &TransitionGraph {
        &self.0
    }

    pub fn node_count(&self) -> usize {
        self.0.node_count()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.0.contains(fingerprint)
    }
}
