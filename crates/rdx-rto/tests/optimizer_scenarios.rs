//! End-to-end optimizer scenarios on a seven-vertex join graph.
//!
//! The graph reuses the 3-shape similar-products layout: a hub of patterns
//! sharing `?product`, two property comparisons joinable only through filters,
//! and a scripted sampling executor standing in for the query engine.
//!
//! ## What These Tests Verify
//! - The optimizer returns one complete path covering every vertex
//! - Orders whose samples underflow lose to orders with reliable estimates
//! - Forcing every order to underflow yields `NoSolutions`
//! - An underflow that resolves at a higher limit is recovered by re-sampling
//! - Sampler failures propagate verbatim

use std::collections::BTreeSet;
use std::sync::Arc;

use rdx_rto::{
    Constraint, EdgeSample, Error, EstimateKind, FilterConstraint, JoinGraph, OptimizerConfig,
    Predicate, Result, RuntimeOptimizer, SampleRef, SamplingExecutor, StatementPattern,
    VertexSample, Vertex,
};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

fn build_graph() -> JoinGraph {
    let vars: [&[&str]; 7] = [
        &["product", "productLabel"],
        &["prodFeature"],
        &["product", "prodFeature"],
        &["origProperty1"],
        &["product", "simProperty1"],
        &["origProperty2"],
        &["product", "simProperty2"],
    ];
    let cards = [2000u64, 40, 800, 1, 1500, 1, 1500];
    let vertices: Vec<Arc<Vertex>> = vars
        .iter()
        .enumerate()
        .map(|(id, vs)| {
            Arc::new(Vertex::new(
                Arc::new(StatementPattern::new(id as u32, vs.iter().copied())),
                VertexSample::new(cards[id], cards[id], 100, false),
            ))
        })
        .collect();
    let constraints: Vec<Arc<dyn Constraint>> = vec![
        Arc::new(FilterConstraint::new("c0", ["product"])),
        Arc::new(FilterConstraint::new("c1", ["simProperty1", "origProperty1"])),
        Arc::new(FilterConstraint::new("c2", ["simProperty2", "origProperty2"])),
    ];
    JoinGraph::new(vertices, constraints).unwrap()
}

/// Scripted sampler. Joins sharing a variable shrink the sample; cross
/// products inflate it. Orders whose first vertex is `poison_seed` produce
/// nothing, and below `min_limit` every join underflows.
struct ScriptedExecutor {
    poison_seed: Option<u32>,
    min_limit: u64,
    always_empty: bool,
}

impl ScriptedExecutor {
    fn normal() -> ScriptedExecutor {
        ScriptedExecutor {
            poison_seed: None,
            min_limit: 0,
            always_empty: false,
        }
    }
}

impl SamplingExecutor for ScriptedExecutor {
    fn cutoff_join(
        &self,
        source: SampleRef<'_>,
        preds: &[Arc<dyn Predicate>],
        constraints: &[Arc<dyn Constraint>],
        _path_is_complete: bool,
        limit: u64,
    ) -> Result<EdgeSample> {
        let est_read = source.est_card().max(1);
        let empty = self.always_empty
            || limit < self.min_limit
            || self
                .poison_seed
                .is_some_and(|id| preds[0].id() == id);
        let rows = if empty {
            0
        } else {
            let last = preds.last().unwrap();
            let shared = preds[..preds.len() - 1]
                .iter()
                .any(|p| !p.variables().is_disjoint(last.variables()));
            let filtered = !constraints.is_empty();
            if shared || filtered {
                (source.est_card() / 4).max(1).min(limit)
            } else {
                source.est_card().saturating_mul(8).min(limit)
            }
        };
        Ok(EdgeSample {
            limit,
            est_card: rows,
            est_read,
            estimate: EstimateKind::classify(source.is_exact(), rows, limit),
        })
    }
}

/// Sampler that fails outright.
struct FailingExecutor;

impl SamplingExecutor for FailingExecutor {
    fn cutoff_join(
        &self,
        _source: SampleRef<'_>,
        _preds: &[Arc<dyn Predicate>],
        _constraints: &[Arc<dyn Constraint>],
        _path_is_complete: bool,
        _limit: u64,
    ) -> Result<EdgeSample> {
        Err(Error::sampler(std::io::Error::other("index scan aborted")))
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn returns_one_complete_path() {
    let graph = build_graph();
    let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
    let path = opt.optimize(&graph, &ScriptedExecutor::normal()).unwrap();
    assert_eq!(path.len(), 7);
    let ids: BTreeSet<u32> = path.vertex_ids().into_iter().collect();
    assert_eq!(ids, (0..7u32).collect::<BTreeSet<u32>>());
    assert!(!path.sample().is_underflow());
    assert!(path.sum_est_cost > 0);
}

#[test]
fn positive_order_beats_zero_cardinality_order() {
    let graph = build_graph();
    let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
    // Every order seeded at vertex 5 samples to zero; all others are fine.
    let executor = ScriptedExecutor {
        poison_seed: Some(5),
        min_limit: 0,
        always_empty: false,
    };
    let path = opt.optimize(&graph, &executor).unwrap();
    assert_eq!(path.len(), 7);
    assert_ne!(path.vertex_ids()[0], 5, "the zero-cardinality order must lose");
    assert!(!path.sample().is_underflow());
}

#[test]
fn all_orders_underflowing_is_no_solutions() {
    let graph = build_graph();
    let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
    let executor = ScriptedExecutor {
        poison_seed: None,
        min_limit: 0,
        always_empty: true,
    };
    assert!(matches!(
        opt.optimize(&graph, &executor),
        Err(Error::NoSolutions)
    ));
}

#[test]
fn underflow_recovers_at_doubled_limit() {
    let graph = build_graph();
    let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
    // Initial limit 100 underflows everywhere; doubling to 400 resolves it.
    let executor = ScriptedExecutor {
        poison_seed: None,
        min_limit: 400,
        always_empty: false,
    };
    let path = opt.optimize(&graph, &executor).unwrap();
    assert_eq!(path.len(), 7);
    assert!(!path.sample().is_underflow());
    assert!(path.sample().limit >= 400);
}

#[test]
fn sampler_errors_propagate() {
    let graph = build_graph();
    let opt = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
    assert!(matches!(
        opt.optimize(&graph, &FailingExecutor),
        Err(Error::Sampler(_))
    ));
}

#[test]
fn cost_model_choice_changes_the_winner_metric() {
    let graph = build_graph();
    let by_card = RuntimeOptimizer::new(OptimizerConfig::default()).unwrap();
    let by_read = RuntimeOptimizer::new(OptimizerConfig {
        cost_model: Arc::new(rdx_rto::ReadCostModel),
        ..OptimizerConfig::default()
    })
    .unwrap();
    let card_path = by_card.optimize(&graph, &ScriptedExecutor::normal()).unwrap();
    let read_path = by_read.optimize(&graph, &ScriptedExecutor::normal()).unwrap();
    assert_eq!(card_path.sum_est_cost, card_path.sum_est_card);
    assert_eq!(read_path.sum_est_cost, read_path.sum_est_read);
}
