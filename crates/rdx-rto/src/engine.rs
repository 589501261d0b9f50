//! The round-based exploration engine.
//!
//! Exploration maintains a frontier of candidate paths, all of the same
//! length. Every round does three things:
//!
//! 1. **Recover**: paths whose latest edge sample underflowed are re-sampled
//!    at a boosted limit (doubled on underflow), so a spuriously empty sample
//!    gets a chance to turn into a usable estimate before it poisons pruning.
//! 2. **Expand**: each path is extended by every admissible vertex not yet on
//!    it. Constrained extensions (shared variable, directly or through a now
//!    fully bound filter) are always preferred; cross products are generated
//!    only for paths with no constrained extension at all.
//! 3. **Prune**: extensions covering the same unordered vertex set compete.
//!    A constrained extension beats an unconstrained one, a path with a
//!    trustworthy sample beats one that underflowed, and cost decides among
//!    equals. One survivor per vertex set keeps the frontier polynomial.
//!
//! When the frontier spans the whole graph, complete paths that still
//! underflow get a bounded number of escalation re-samples; if none of them
//! ever produces a reliable nonzero estimate, the graph is reported as having
//! no solutions.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::analysis::can_join_using_constraints;
use crate::cost::{DefaultCostModel, PathCostModel};
use crate::error::{Error, Result};
use crate::graph::{JoinGraph, Variable, Vertex};
use crate::path::Path;
use crate::sample::SamplingExecutor;

/// Escalation re-samples granted to complete paths that still underflow.
const FINAL_RESAMPLE_ATTEMPTS: usize = 2;

/// Configuration for [`RuntimeOptimizer`].
pub struct OptimizerConfig {
    /// Cutoff-join row limit for initial samples. Must be positive.
    pub limit: u64,
    /// Default limit increment when re-sampling a path that did not underflow.
    pub sample_increment: u64,
    /// Variables already bound by the surrounding plan before the join graph
    /// runs; they count toward filter eligibility from position zero.
    pub known_bound: Vec<Variable>,
    /// How cumulative statistics collapse into a comparable cost.
    pub cost_model: Arc<dyn PathCostModel>,
}

impl Default for OptimizerConfig {
    fn default() -> OptimizerConfig {
        OptimizerConfig {
            limit: 100,
            sample_increment: 100,
            known_bound: Vec::new(),
            cost_model: Arc::new(DefaultCostModel),
        }
    }
}

/// Cost-based join-order search by cutoff-join sampling.
pub struct RuntimeOptimizer {
    config: OptimizerConfig,
}

impl RuntimeOptimizer {
    pub fn new(config: OptimizerConfig) -> Result<RuntimeOptimizer> {
        if config.limit == 0 {
            return Err(Error::InvalidArgument("cutoff limit must be positive"));
        }
        Ok(RuntimeOptimizer { config })
    }

    /// Find the cheapest complete join path spanning `graph`.
    ///
    /// # Errors
    ///
    /// [`Error::NoSolutions`] when every complete path underflowed to zero
    /// cardinality without an exact sample confirming emptiness; sampler
    /// failures propagate verbatim.
    pub fn optimize(
        &self,
        graph: &JoinGraph,
        executor: &dyn SamplingExecutor,
    ) -> Result<Path> {
        let n = graph.vertex_count();
        let cost_model = &*self.config.cost_model;
        let known = &self.config.known_bound;

        let mut paths: Vec<Path> = graph
            .vertices()
            .iter()
            .map(|v| Path::seed(v, cost_model))
            .collect();
        if n == 1 {
            return Ok(paths.swap_remove(0));
        }

        let mut round = 0usize;
        while paths[0].len() < n {
            round += 1;

            // Recover underflowed survivors before they are extended again.
            for path in paths.iter_mut() {
                if path.len() > 1 && path.sample().is_underflow() {
                    let new_limit = path.new_limit(self.config.sample_increment);
                    *path = path.resample(executor, graph, new_limit, false, known, cost_model)?;
                }
            }

            let target_len = paths[0].len() + 1;
            let complete = target_len == n;
            let frontier = paths.len();

            // Best extension per unordered vertex set, with whether it came
            // from a constrained join.
            let mut best: HashMap<BTreeSet<u32>, (Path, bool)> = HashMap::new();
            let mut considered = 0usize;
            for path in &paths {
                let mut constrained: Vec<&Arc<Vertex>> = Vec::new();
                let mut unconstrained: Vec<&Arc<Vertex>> = Vec::new();
                for v in graph.vertices() {
                    if path.contains(v) {
                        continue;
                    }
                    if can_join_using_constraints(path.vertices(), v, graph.constraints())? {
                        constrained.push(v);
                    } else {
                        unconstrained.push(v);
                    }
                }
                // Cross products only when nothing constrained remains.
                let candidates: Vec<(&Arc<Vertex>, bool)> = if constrained.is_empty() {
                    unconstrained.into_iter().map(|v| (v, false)).collect()
                } else {
                    constrained.into_iter().map(|v| (v, true)).collect()
                };

                let limit = path.sample().limit.max(self.config.limit);
                for (vertex, is_constrained) in candidates {
                    considered += 1;
                    let ext =
                        path.add_edge(executor, graph, limit, vertex, complete, known, cost_model)?;
                    let key: BTreeSet<u32> = ext.vertex_ids().into_iter().collect();
                    let displaces = match best.get(&key) {
                        Some(current) => prefer(&ext, is_constrained, current),
                        None => true,
                    };
                    if displaces {
                        best.insert(key, (ext, is_constrained));
                    }
                }
            }

            paths = best.into_values().map(|(p, _)| p).collect();
            debug!(
                "round={round}: paths{{in={frontier}, considered={considered}, out={}}}",
                paths.len()
            );
        }

        // Complete paths that still underflow get a bounded escalation before
        // the graph is declared unsolvable.
        for _ in 0..FINAL_RESAMPLE_ATTEMPTS {
            if !paths.iter().any(|p| p.sample().is_underflow()) {
                break;
            }
            for path in paths.iter_mut() {
                if path.sample().is_underflow() {
                    let new_limit = path.new_limit(self.config.sample_increment);
                    *path = path.resample(executor, graph, new_limit, true, known, cost_model)?;
                }
            }
        }

        let winner = paths
            .iter()
            .filter(|p| !p.sample().is_underflow())
            .min_by_key(|p| p.sum_est_cost)
            .cloned();
        match winner {
            Some(path) => {
                debug!("selected {path}");
                Ok(path)
            }
            None => Err(Error::NoSolutions),
        }
    }
}

/// Whether `candidate` displaces `current` as the survivor of an unordered
/// vertex set: constrained beats unconstrained, reliable beats underflowed,
/// then lower cost wins.
fn prefer(candidate: &Path, candidate_constrained: bool, current: &(Path, bool)) -> bool {
    let (current_path, current_constrained) = current;
    if candidate_constrained != *current_constrained {
        return candidate_constrained;
    }
    let candidate_dead = candidate.sample().is_underflow();
    let current_dead = current_path.sample().is_underflow();
    if candidate_dead != current_dead {
        return !candidate_dead;
    }
    candidate.sum_est_cost < current_path.sum_est_cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Constraint, Predicate, StatementPattern};
    use crate::sample::{EdgeSample, EstimateKind, SampleRef, VertexSample};

    fn vertex(id: u32, vars: &[&str], card: u64) -> Arc<Vertex> {
        Arc::new(Vertex::new(
            Arc::new(StatementPattern::new(id, vars.iter().copied())),
            VertexSample::new(card, card, 100, false),
        ))
    }

    /// Shrinks constrained joins, explodes cross products.
    struct SelectiveExecutor;

    impl SamplingExecutor for SelectiveExecutor {
        fn cutoff_join(
            &self,
            source: SampleRef<'_>,
            preds: &[Arc<dyn Predicate>],
            _constraints: &[Arc<dyn Constraint>],
            _path_is_complete: bool,
            limit: u64,
        ) -> Result<EdgeSample> {
            let last = preds.last().unwrap();
            let shared = preds[..preds.len() - 1]
                .iter()
                .any(|p| !p.variables().is_disjoint(last.variables()));
            let rows = if shared {
                (source.est_card() / 2).max(1).min(limit)
            } else {
                source.est_card().saturating_mul(10).min(limit)
            };
            Ok(EdgeSample {
                limit,
                est_card: rows,
                est_read: source.est_card(),
                estimate: EstimateKind::classify(source.is_exact(), rows, limit),
            })
        }
    }

    #[test]
    fn rejects_zero_limit() {
        let config = OptimizerConfig {
            limit: 0,
            ..OptimizerConfig::default()
        };
        assert!(matches!(
            RuntimeOptimizer::new(config),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn single_vertex_graph_returns_its_seed() {
        let v = vertex(0, &["x"], 7);
        let graph = JoinGraph::new(vec![v], Vec::new()).unwrap();
        let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
        let path = opt.optimize(&graph, &SelectiveExecutor).unwrap();
        assert_eq!(path.vertex_ids(), vec![0]);
    }

    #[test]
    fn spans_all_vertices_exactly_once() {
        let a = vertex(0, &["x"], 100);
        let b = vertex(1, &["x", "y"], 50);
        let c = vertex(2, &["y"], 10);
        let graph = JoinGraph::new(vec![a, b, c], Vec::new()).unwrap();
        let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
        let path = opt.optimize(&graph, &SelectiveExecutor).unwrap();
        let ids: BTreeSet<u32> = path.vertex_ids().into_iter().collect();
        assert_eq!(path.len(), 3);
        assert_eq!(ids, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn prefers_constrained_chains_over_cross_products() {
        // a-b share x, b-c share y; a-c share nothing. The winning order must
        // never place a and c adjacent at the start (a cross product).
        let a = vertex(0, &["x"], 100);
        let b = vertex(1, &["x", "y"], 80);
        let c = vertex(2, &["y"], 60);
        let graph = JoinGraph::new(vec![a, b, c], Vec::new()).unwrap();
        let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
        let path = opt.optimize(&graph, &SelectiveExecutor).unwrap();
        let ids = path.vertex_ids();
        assert_eq!(ids[1], 1, "the shared-variable hub must come second: {ids:?}");
    }
}
