//! Weighted directed acyclic graph with labeled in-edges.
//!
//! Nodes live in an arena and are addressed by insertion index, which is
//! also the topological order: every edge points from a smaller index to a
//! larger one. On top of this the module implements the two solvers the
//! training algorithms need: a max-plus best-path sweep with back-pointers
//! and a forward/backward log-sum sweep.

use crate::error::HmmError;
use crate::utils::{lnsum, LOG_ZERO};

/// What a trellis edge stands for. Re-estimation dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeLabel {
    /// Initial-state assignment to the given state.
    Start(usize),
    /// State transition between consecutive timepoints.
    Trans { from: usize, to: usize },
    /// Emission by `state`; `symbol` is `None` for continuous models.
    Emit { state: usize, symbol: Option<usize> },
    /// Zero-weight edge into the required end node.
    Finish,
}

/// An in-edge: the parent it comes from, its label, and its log-weight.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub parent: usize,
    pub label: EdgeLabel,
    pub weight: f64,
}

#[derive(Debug, Clone)]
struct Node {
    in_edges: Vec<Edge>,
    /// Forward log-mass: total weight of all start-to-here paths.
    fw: f64,
    /// Backward log-mass: total weight of all here-to-end paths.
    bw: f64,
    /// Best-path log-weight from the start node.
    best: f64,
    /// Index into `in_edges` of the edge the best path arrives through.
    best_edge: Option<usize>,
}

impl Node {
    fn new() -> Self {
        Node {
            in_edges: Vec::new(),
            fw: LOG_ZERO,
            bw: LOG_ZERO,
            best: LOG_ZERO,
            best_edge: None,
        }
    }
}

/// The labeled best path through a solved [`Wdag`].
#[derive(Debug, Clone)]
pub struct BestPath {
    /// Edge labels from the start node to the end node, in path order.
    pub labels: Vec<EdgeLabel>,
    /// Total log-weight of the path.
    pub weight: f64,
}

/// Arena-based WDAG. See the module docs for the ordering invariant.
#[derive(Debug, Clone, Default)]
pub struct Wdag {
    nodes: Vec<Node>,
    start: Option<usize>,
    end: Option<usize>,
    alpha: Option<f64>,
}

impl Wdag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n_nodes: usize) -> Self {
        Wdag {
            nodes: Vec::with_capacity(n_nodes),
            start: None,
            end: None,
            alpha: None,
        }
    }

    /// Append a node and return its id. Ids are monotonically increasing.
    pub fn add_node(&mut self) -> usize {
        self.nodes.push(Node::new());
        self.nodes.len() - 1
    }

    /// Add an edge from `parent` into `child`.
    ///
    /// # Panics
    ///
    /// Panics if `parent >= child`: insertion order is the topological
    /// order and edges may only point forward.
    pub fn add_edge(&mut self, child: usize, parent: usize, label: EdgeLabel, weight: f64) {
        assert!(
            parent < child,
            "edge must point forward in topological order ({parent} -> {child})"
        );
        self.nodes[child].in_edges.push(Edge {
            parent,
            label,
            weight,
        });
    }

    pub fn set_required_start(&mut self, id: usize) {
        assert!(id < self.nodes.len());
        self.start = Some(id);
    }

    pub fn set_required_end(&mut self, id: usize) {
        assert!(id < self.nodes.len());
        self.end = Some(id);
    }

    pub fn required_start(&self) -> Option<usize> {
        self.start
    }

    pub fn required_end(&self) -> Option<usize> {
        self.end
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The in-edges of a node, in insertion order.
    pub fn edges_into(&self, id: usize) -> &[Edge] {
        &self.nodes[id].in_edges
    }

    /// Forward log-mass of a node, valid after [`find_posterior_probs`](Self::find_posterior_probs).
    pub fn fw(&self, id: usize) -> f64 {
        self.nodes[id].fw
    }

    /// Backward log-mass of a node, valid after [`find_posterior_probs`](Self::find_posterior_probs).
    pub fn bw(&self, id: usize) -> f64 {
        self.nodes[id].bw
    }

    /// Total log-likelihood of the graph in nats, once solved.
    pub fn alpha(&self) -> Option<f64> {
        self.alpha
    }

    fn endpoints(&self) -> Result<(usize, usize), HmmError> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Ok((s, e)),
            _ => Err(HmmError::MissingData("required start and end nodes")),
        }
    }

    /// Max-plus sweep: compute the best-path weight to every node and
    /// reconstruct the labeled path into the required end node.
    ///
    /// Edges of zero mass (weight at or below [`LOG_ZERO`]) never win, so a
    /// result of `NoPath` means the graph admits no non-zero trajectory.
    pub fn find_best_path(&mut self) -> Result<BestPath, HmmError> {
        let (start, end) = self.endpoints()?;

        for node in &mut self.nodes {
            node.best = LOG_ZERO;
            node.best_edge = None;
        }
        self.nodes[start].best = 0.0;

        for v in 0..self.nodes.len() {
            for e_idx in 0..self.nodes[v].in_edges.len() {
                let edge = self.nodes[v].in_edges[e_idx];
                if edge.weight <= LOG_ZERO {
                    continue;
                }
                let upstream = self.nodes[edge.parent].best;
                if upstream <= LOG_ZERO {
                    continue;
                }
                let candidate = upstream + edge.weight;
                if candidate > self.nodes[v].best {
                    self.nodes[v].best = candidate;
                    self.nodes[v].best_edge = Some(e_idx);
                }
            }
        }

        if self.nodes[end].best <= LOG_ZERO {
            return Err(HmmError::NoPath);
        }

        // Walk the back-pointers from the end to the start.
        let mut labels = Vec::new();
        let mut v = end;
        while v != start {
            let e_idx = self.nodes[v].best_edge.ok_or(HmmError::NoPath)?;
            let edge = self.nodes[v].in_edges[e_idx];
            labels.push(edge.label);
            v = edge.parent;
        }
        labels.reverse();

        Ok(BestPath {
            labels,
            weight: self.nodes[end].best,
        })
    }

    /// Forward/backward log-sum sweeps.
    ///
    /// Computes `fw` for every node in topological order and `bw` in
    /// reverse, then returns `alpha = fw[end]` (equal to `bw[start]` up to
    /// rounding): the total log-likelihood of the graph in nats.
    pub fn find_posterior_probs(&mut self) -> Result<f64, HmmError> {
        let (start, end) = self.endpoints()?;

        for node in &mut self.nodes {
            node.fw = LOG_ZERO;
            node.bw = LOG_ZERO;
        }

        self.nodes[start].fw = 0.0;
        for v in 0..self.nodes.len() {
            for e_idx in 0..self.nodes[v].in_edges.len() {
                let edge = self.nodes[v].in_edges[e_idx];
                if edge.weight <= LOG_ZERO {
                    continue;
                }
                let upstream = self.nodes[edge.parent].fw;
                if upstream <= LOG_ZERO {
                    continue;
                }
                self.nodes[v].fw = lnsum(self.nodes[v].fw, upstream + edge.weight);
            }
            if self.nodes[v].fw.is_nan() {
                return Err(HmmError::NumericError);
            }
        }

        self.nodes[end].bw = 0.0;
        for v in (0..self.nodes.len()).rev() {
            let downstream = self.nodes[v].bw;
            if downstream <= LOG_ZERO {
                continue;
            }
            for e_idx in 0..self.nodes[v].in_edges.len() {
                let edge = self.nodes[v].in_edges[e_idx];
                if edge.weight <= LOG_ZERO {
                    continue;
                }
                let parent = edge.parent;
                self.nodes[parent].bw = lnsum(self.nodes[parent].bw, edge.weight + downstream);
                if self.nodes[parent].bw.is_nan() {
                    return Err(HmmError::NumericError);
                }
            }
        }

        let alpha = self.nodes[end].fw;
        if alpha <= LOG_ZERO {
            return Err(HmmError::NoPath);
        }
        self.alpha = Some(alpha);
        Ok(alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A diamond: start -> {a, b} -> end, with start edges of weight
    /// ln(0.6) and ln(0.4) and zero-weight finish edges.
    fn diamond() -> Wdag {
        let mut wdag = Wdag::new();
        let start = wdag.add_node();
        let a = wdag.add_node();
        let b = wdag.add_node();
        let end = wdag.add_node();
        wdag.add_edge(a, start, EdgeLabel::Start(0), 0.6_f64.ln());
        wdag.add_edge(b, start, EdgeLabel::Start(1), 0.4_f64.ln());
        wdag.add_edge(end, a, EdgeLabel::Finish, 0.0);
        wdag.add_edge(end, b, EdgeLabel::Finish, 0.0);
        wdag.set_required_start(start);
        wdag.set_required_end(end);
        wdag
    }

    #[test]
    #[should_panic(expected = "topological order")]
    fn add_edge_rejects_backward_edges() {
        let mut wdag = Wdag::new();
        let a = wdag.add_node();
        let b = wdag.add_node();
        wdag.add_edge(a, b, EdgeLabel::Finish, 0.0);
    }

    #[test]
    fn best_path_picks_heavier_branch() {
        let mut wdag = diamond();
        let path = wdag.find_best_path().unwrap();
        assert_eq!(path.labels, vec![EdgeLabel::Start(0), EdgeLabel::Finish]);
        assert!((path.weight - 0.6_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn best_path_ignores_zero_mass_edges() {
        let mut wdag = Wdag::new();
        let start = wdag.add_node();
        let a = wdag.add_node();
        let b = wdag.add_node();
        let end = wdag.add_node();
        // The heavier-looking branch has zero mass and must never win.
        wdag.add_edge(a, start, EdgeLabel::Start(0), LOG_ZERO);
        wdag.add_edge(b, start, EdgeLabel::Start(1), 0.4_f64.ln());
        wdag.add_edge(end, a, EdgeLabel::Finish, 0.0);
        wdag.add_edge(end, b, EdgeLabel::Finish, 0.0);
        wdag.set_required_start(start);
        wdag.set_required_end(end);

        let path = wdag.find_best_path().unwrap();
        assert_eq!(path.labels[0], EdgeLabel::Start(1));
    }

    #[test]
    fn best_path_errors_when_every_trajectory_is_forbidden() {
        let mut wdag = Wdag::new();
        let start = wdag.add_node();
        let a = wdag.add_node();
        let end = wdag.add_node();
        wdag.add_edge(a, start, EdgeLabel::Start(0), LOG_ZERO);
        wdag.add_edge(end, a, EdgeLabel::Finish, 0.0);
        wdag.set_required_start(start);
        wdag.set_required_end(end);

        assert!(matches!(wdag.find_best_path(), Err(HmmError::NoPath)));
    }

    #[test]
    fn posterior_masses_are_consistent() {
        let mut wdag = diamond();
        let alpha = wdag.find_posterior_probs().unwrap();

        // The branch probabilities sum to one, so alpha = ln(1) = 0.
        assert!(alpha.abs() < 1e-12);
        assert_eq!(wdag.alpha(), Some(alpha));

        // fw[end] and bw[start] measure the same total mass.
        let start = wdag.required_start().unwrap();
        let end = wdag.required_end().unwrap();
        assert!((wdag.fw(end) - wdag.bw(start)).abs() < 1e-12);

        // The middle layer {a, b} is a cut: its node posteriors sum to alpha.
        let through_cut = lnsum(wdag.fw(1) + wdag.bw(1), wdag.fw(2) + wdag.bw(2));
        assert!((through_cut - alpha).abs() < 1e-12);

        // Each node's posterior equals the lnsum of its in-edge posteriors.
        for v in [1usize, 2, 3] {
            let mut from_edges = LOG_ZERO;
            for edge in wdag.edges_into(v) {
                from_edges = lnsum(from_edges, wdag.fw(edge.parent) + edge.weight + wdag.bw(v));
            }
            assert!((from_edges - (wdag.fw(v) + wdag.bw(v))).abs() < 1e-12);
        }
    }

    #[test]
    fn posterior_errors_when_no_mass_reaches_the_end() {
        let mut wdag = Wdag::new();
        let start = wdag.add_node();
        let a = wdag.add_node();
        let end = wdag.add_node();
        wdag.add_edge(a, start, EdgeLabel::Start(0), LOG_ZERO);
        wdag.add_edge(end, a, EdgeLabel::Finish, 0.0);
        wdag.set_required_start(start);
        wdag.set_required_end(end);

        assert!(matches!(wdag.find_posterior_probs(), Err(HmmError::NoPath)));
    }

    #[test]
    fn solvers_require_endpoints() {
        let mut wdag = Wdag::new();
        wdag.add_node();
        assert!(matches!(
            wdag.find_best_path(),
            Err(HmmError::MissingData(_))
        ));
        assert!(matches!(
            wdag.find_posterior_probs(),
            Err(HmmError::MissingData(_))
        ));
    }
}
