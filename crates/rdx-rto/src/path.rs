//! Join paths.
//!
//! A [`Path`] is an ordered sequence of vertices standing for a concrete join
//! order prefix, together with the edge sample of its most recent extension
//! and the cumulative statistics accumulated along it. Paths are immutable:
//! extension and re-sampling build new paths, so the engine's frontier can
//! share common prefixes freely.
//!
//! The cumulative statistics have a deliberate asymmetry at the seed. A
//! one-vertex path has read everything its access path would read
//! (`sum_est_read` starts at the vertex's cardinality) but has produced no
//! intermediate solutions yet (`sum_est_card` starts at zero); each extension
//! then adds the cutoff join's contribution to both. Costs derive from the
//! pair through the configured [`PathCostModel`] and are therefore
//! non-decreasing along any extension chain.

use std::fmt;
use std::sync::Arc;

use crate::analysis::join_graph_constraints;
use crate::cost::PathCostModel;
use crate::error::{Error, Result};
use crate::graph::{JoinGraph, Predicate, Variable, Vertex};
use crate::sample::{EdgeSample, EstimateKind, SampleRef, SamplingExecutor};

/// An ordered join prefix with its sample and cumulative statistics.
#[derive(Clone)]
pub struct Path {
    vertices: Vec<Arc<Vertex>>,
    /// The vertices' predicates in path order, cached because every
    /// admissibility check and cutoff join consumes them.
    preds: Vec<Arc<dyn Predicate>>,
    sample: EdgeSample,
    /// Cumulative estimated intermediate solutions.
    pub sum_est_card: u64,
    /// Cumulative estimated tuples read.
    pub sum_est_read: u64,
    /// Cost under the engine's cost model; derived from the two sums.
    pub sum_est_cost: u64,
}

impl Path {
    /// A one-vertex path carrying the vertex's own sample.
    pub fn seed(vertex: &Arc<Vertex>, cost_model: &dyn PathCostModel) -> Path {
        let s = vertex.sample;
        let sample = EdgeSample {
            limit: s.limit,
            est_card: s.est_card,
            est_read: s.est_read,
            estimate: if s.exact {
                EstimateKind::Exact
            } else {
                EstimateKind::Normal
            },
        };
        let sum_est_card = 0;
        let sum_est_read = s.est_card;
        Path {
            vertices: vec![Arc::clone(vertex)],
            preds: vec![Arc::clone(&vertex.pred)],
            sample,
            sum_est_card,
            sum_est_read,
            sum_est_cost: cost_model.cost(sum_est_read, sum_est_card),
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn vertices(&self) -> &[Arc<Vertex>] {
        &self.vertices
    }

    pub fn predicates(&self) -> &[Arc<dyn Predicate>] {
        &self.preds
    }

    /// The sample of the path's latest extension (or of its only vertex).
    pub fn sample(&self) -> &EdgeSample {
        &self.sample
    }

    pub fn contains(&self, vertex: &Vertex) -> bool {
        self.vertices.iter().any(|v| v.id() == vertex.id())
    }

    /// Predicate identifiers in path order.
    pub fn vertex_ids(&self) -> Vec<u32> {
        self.vertices.iter().map(|v| v.id()).collect()
    }

    /// Whether `other` visits the same vertices in any order. Such paths
    /// compete against each other during exploration.
    pub fn is_unordered_variant(&self, other: &Path) -> bool {
        self.vertices.len() == other.vertices.len()
            && other
                .vertices
                .iter()
                .all(|v| self.contains(v))
    }

    /// Whether this path starts with the given path.
    pub fn begins_with(&self, prefix: &Path) -> bool {
        prefix.vertices.len() <= self.vertices.len()
            && prefix
                .vertices
                .iter()
                .zip(&self.vertices)
                .all(|(a, b)| a.id() == b.id())
    }

    /// The first `len` predicates of the path.
    pub fn path_segment(&self, len: usize) -> Result<&[Arc<dyn Predicate>]> {
        if len > self.preds.len() {
            return Err(Error::InvalidArgument("segment longer than path"));
        }
        Ok(&self.preds[..len])
    }

    /// The limit to use when re-sampling this path: double on underflow,
    /// otherwise grow by the default increment.
    pub fn new_limit(&self, default_increment: u64) -> u64 {
        if self.sample.is_underflow() {
            self.sample.limit.saturating_mul(2)
        } else {
            self.sample.limit.saturating_add(default_increment)
        }
    }

    /// Extend this path by one vertex, running the cutoff join of the new edge
    /// against this path's sample.
    ///
    /// The constraints eligible at the new step are the filters that first
    /// become fully bound with the new vertex's variables. `path_is_complete`
    /// must be true iff the extended path spans the whole join graph.
    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &self,
        executor: &dyn SamplingExecutor,
        graph: &JoinGraph,
        limit: u64,
        vertex: &Arc<Vertex>,
        path_is_complete: bool,
        known_bound: &[Variable],
        cost_model: &dyn PathCostModel,
    ) -> Result<Path> {
        if self.contains(vertex) {
            return Err(Error::InvalidArgument("vertex already present in path"));
        }

        let mut vertices = Vec::with_capacity(self.vertices.len() + 1);
        vertices.extend(self.vertices.iter().cloned());
        vertices.push(Arc::clone(vertex));
        let mut preds = Vec::with_capacity(self.preds.len() + 1);
        preds.extend(self.preds.iter().cloned());
        preds.push(Arc::clone(&vertex.pred));

        let attached =
            join_graph_constraints(&preds, graph.constraints(), known_bound, path_is_complete);
        let step = attached.last().cloned().unwrap_or_default();

        let edge = executor.cutoff_join(
            SampleRef::Edge(&self.sample),
            &preds,
            &step,
            path_is_complete,
            limit,
        )?;

        let sum_est_card = self.sum_est_card.saturating_add(edge.est_card);
        let sum_est_read = self.sum_est_read.saturating_add(edge.est_read);
        Ok(Path {
            vertices,
            preds,
            sample: edge,
            sum_est_card,
            sum_est_read,
            sum_est_cost: cost_model.cost(sum_est_read, sum_est_card),
        })
    }

    /// Re-run the cutoff-join chain of this exact vertex order at a new limit,
    /// rebuilding the edge sample and cumulative statistics. Used when the
    /// current sample underflowed and a larger limit may recover a usable
    /// estimate.
    pub fn resample(
        &self,
        executor: &dyn SamplingExecutor,
        graph: &JoinGraph,
        limit: u64,
        path_is_complete: bool,
        known_bound: &[Variable],
        cost_model: &dyn PathCostModel,
    ) -> Result<Path> {
        let first = &self.vertices[0];
        if self.vertices.len() == 1 {
            return Ok(Path::seed(first, cost_model));
        }

        let mut sum_est_card = 0u64;
        let mut sum_est_read = first.sample.est_card;
        let mut current: Option<EdgeSample> = None;
        for i in 1..self.preds.len() {
            // Reproduce the step exactly as incremental growth would have run
            // it: the completeness flag only holds on the final edge.
            let complete = path_is_complete && i + 1 == self.preds.len();
            let attached = join_graph_constraints(
                &self.preds[..=i],
                graph.constraints(),
                known_bound,
                complete,
            );
            let step = attached.last().cloned().unwrap_or_default();
            let source = match &current {
                None => SampleRef::Vertex(&first.sample),
                Some(edge) => SampleRef::Edge(edge),
            };
            let edge = executor.cutoff_join(source, &self.preds[..=i], &step, complete, limit)?;
            sum_est_card = sum_est_card.saturating_add(edge.est_card);
            sum_est_read = sum_est_read.saturating_add(edge.est_read);
            current = Some(edge);
        }
        let sample = current.expect("multi-vertex path has at least one edge");
        Ok(Path {
            vertices: self.vertices.clone(),
            preds: self.preds.clone(),
            sample,
            sum_est_card,
            sum_est_read,
            sum_est_cost: cost_model.cost(sum_est_read, sum_est_card),
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path{{[")?;
        for (i, v) in self.vertices.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v.id())?;
        }
        write!(
            f,
            "],sumEstRead={},sumEstCard={},sumEstCost={},sample={}}}",
            self.sum_est_read, self.sum_est_card, self.sum_est_cost, self.sample
        )
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::DefaultCostModel;
    use crate::graph::StatementPattern;
    use crate::sample::VertexSample;

    /// Executor that halves the source cardinality at every step.
    struct HalvingExecutor;

    impl SamplingExecutor for HalvingExecutor {
        fn cutoff_join(
            &self,
            source: SampleRef<'_>,
            _preds: &[Arc<dyn Predicate>],
            _constraints: &[Arc<dyn crate::graph::Constraint>],
            _path_is_complete: bool,
            limit: u64,
        ) -> Result<EdgeSample> {
            let rows = (source.est_card() / 2).min(limit);
            Ok(EdgeSample {
                limit,
                est_card: rows,
                est_read: source.est_card(),
                estimate: EstimateKind::classify(source.is_exact(), rows, limit),
            })
        }
    }

    fn vertex(id: u32, vars: &[&str], card: u64) -> Arc<Vertex> {
        Arc::new(Vertex::new(
            Arc::new(StatementPattern::new(id, vars.iter().copied())),
            VertexSample::new(card, card, 100, false),
        ))
    }

    fn graph(vertices: &[&Arc<Vertex>]) -> JoinGraph {
        JoinGraph::new(vertices.iter().map(|v| Arc::clone(v)).collect(), Vec::new()).unwrap()
    }

    #[test]
    fn seed_statistics() {
        let v = vertex(0, &["x"], 40);
        let p = Path::seed(&v, &DefaultCostModel);
        assert_eq!(p.len(), 1);
        assert_eq!(p.sum_est_card, 0);
        assert_eq!(p.sum_est_read, 40);
        assert_eq!(p.sample().est_card, 40);
    }

    #[test]
    fn add_edge_grows_length_and_sums_monotonically() {
        let a = vertex(0, &["x"], 64);
        let b = vertex(1, &["x"], 32);
        let c = vertex(2, &["x"], 16);
        let g = graph(&[&a, &b, &c]);
        let exec = HalvingExecutor;
        let p1 = Path::seed(&a, &DefaultCostModel);
        let p2 = p1
            .add_edge(&exec, &g, 100, &b, false, &[], &DefaultCostModel)
            .unwrap();
        let p3 = p2
            .add_edge(&exec, &g, 100, &c, true, &[], &DefaultCostModel)
            .unwrap();
        assert_eq!(p2.len(), 2);
        assert_eq!(p3.len(), 3);
        assert!(p2.sum_est_card >= p1.sum_est_card);
        assert!(p3.sum_est_card >= p2.sum_est_card);
        assert!(p3.sum_est_read >= p2.sum_est_read);
        assert!(p3.sum_est_cost >= p2.sum_est_cost);
        assert_eq!(p3.vertex_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn rejects_duplicate_extension() {
        let a = vertex(0, &["x"], 10);
        let b = vertex(1, &["x"], 10);
        let g = graph(&[&a, &b]);
        let p = Path::seed(&a, &DefaultCostModel);
        assert!(matches!(
            p.add_edge(&HalvingExecutor, &g, 100, &a, false, &[], &DefaultCostModel),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn new_limit_doubles_on_underflow() {
        let a = vertex(0, &["x"], 1);
        let b = vertex(1, &["x"], 1);
        let g = graph(&[&a, &b]);
        let p = Path::seed(&a, &DefaultCostModel)
            .add_edge(&HalvingExecutor, &g, 100, &b, true, &[], &DefaultCostModel)
            .unwrap();
        // 1 / 2 == 0 rows from an inexact source: underflow.
        assert!(p.sample().is_underflow());
        assert_eq!(p.new_limit(50), 200);
        let seeded = Path::seed(&a, &DefaultCostModel);
        assert_eq!(seeded.new_limit(50), 150);
    }

    #[test]
    fn unordered_variants_and_prefixes() {
        let a = vertex(0, &["x"], 8);
        let b = vertex(1, &["x"], 8);
        let g = graph(&[&a, &b]);
        let exec = HalvingExecutor;
        let ab = Path::seed(&a, &DefaultCostModel)
            .add_edge(&exec, &g, 100, &b, true, &[], &DefaultCostModel)
            .unwrap();
        let ba = Path::seed(&b, &DefaultCostModel)
            .add_edge(&exec, &g, 100, &a, true, &[], &DefaultCostModel)
            .unwrap();
        assert!(ab.is_unordered_variant(&ba));
        assert!(!ab.begins_with(&ba));
        assert!(ab.begins_with(&Path::seed(&a, &DefaultCostModel)));
        assert_eq!(ab.path_segment(1).unwrap().len(), 1);
        assert!(ab.path_segment(3).is_err());
    }
}
