//! # rdx-rto: Runtime Join-Path Exploration
//!
//! This crate implements the runtime half of join-order optimization: instead
//! of trusting static cardinality estimates, it *samples* its way through the
//! join graph. Candidate join orders are grown one vertex at a time, each
//! extension is costed by a bounded *cutoff join* against the sample produced
//! so far, and orders covering the same set of vertices compete on accumulated
//! cost. The surviving complete order is handed back to the query engine for
//! full execution.
//!
//! ## Module Overview
//!
//! - **`graph`**: Join graph building blocks: the [`Predicate`] and
//!   [`Constraint`] seams to the surrounding engine, sampled [`Vertex`] values,
//!   and the immutable [`JoinGraph`].
//! - **`sample`**: Sample statistics ([`VertexSample`], [`EdgeSample`], the
//!   [`EstimateKind`] classifier) and the [`SamplingExecutor`] seam that runs
//!   cutoff joins.
//! - **`analysis`**: Static admissibility analysis: which vertices may join
//!   directly through shared variables or indirectly through filter
//!   constraints, and where along a concrete path each filter attaches.
//! - **`path`**: The [`Path`] type: an ordered join prefix, its current edge
//!   sample, and the cumulative cardinality/read/cost statistics.
//! - **`cost`**: The pluggable [`PathCostModel`] that collapses the cumulative
//!   statistics into a single comparable cost.
//! - **`engine`**: The round-based exploration loop ([`RuntimeOptimizer`]).
//!
//! ## Exploration in One Paragraph
//!
//! Every vertex seeds a one-vertex path carrying that vertex's sample. Each
//! round extends every surviving path by one admissible vertex, preferring
//! constrained extensions (shared variable, directly or through a filter) over
//! cross products, and re-samples paths whose estimates underflowed at a
//! doubled limit. Extensions covering the same unordered vertex set compete
//! and only the best survives, which keeps the frontier polynomial. When paths
//! span the whole graph the cheapest survivor wins; if every complete path
//! underflowed to zero cardinality the graph has no solutions worth executing
//! and [`Error::NoSolutions`] is returned.

pub mod analysis;
pub mod cost;
pub mod engine;
pub mod error;
pub mod graph;
pub mod path;
pub mod sample;

pub use analysis::{can_join, can_join_using_constraints, join_graph_constraints};
pub use cost::{CombinedCostModel, DefaultCostModel, PathCostModel, ReadCostModel};
pub use engine::{OptimizerConfig, RuntimeOptimizer};
pub use error::{Error, Result};
pub use graph::{Constraint, FilterConstraint, JoinGraph, Predicate, StatementPattern, Variable, Vertex};
pub use path::Path;
pub use sample::{EdgeSample, EstimateKind, SampleRef, SamplingExecutor, VertexSample};
