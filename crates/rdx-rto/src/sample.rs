//! Sample statistics and the sampling-executor seam.
//!
//! The engine never scans tuples itself. It hands the executor a source sample
//! (a vertex's base sample or the previous edge sample of a path), the ordered
//! predicate prefix to join, the filters eligible at the new step, and a row
//! limit; the executor returns the bounded [`EdgeSample`] of that cutoff join.
//! Everything the engine decides, it decides from these statistics.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::graph::{Constraint, Predicate};

/// How an edge sample's cardinality estimate should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimateKind {
    /// The source was exact and the join completed under the limit: the
    /// estimate is the true cardinality.
    Exact,
    /// The join was cut off at the limit; the true cardinality is at least
    /// the estimate.
    LowerBound,
    /// An ordinary sampled estimate.
    Normal,
    /// The join produced nothing from an inexact source. The estimate is
    /// unreliable and the path should be re-sampled at a higher limit.
    Underflow,
}

impl EstimateKind {
    /// Classify a cutoff-join outcome.
    pub fn classify(source_exact: bool, rows_out: u64, limit: u64) -> EstimateKind {
        if source_exact && rows_out < limit {
            EstimateKind::Exact
        } else if rows_out >= limit {
            EstimateKind::LowerBound
        } else if rows_out == 0 {
            EstimateKind::Underflow
        } else {
            EstimateKind::Normal
        }
    }
}

/// Sample statistics of a bare vertex (one access path, no join history).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexSample {
    /// Estimated cardinality of the access path.
    pub est_card: u64,
    /// Tuples read while sampling.
    pub est_read: u64,
    /// Sample limit in effect when the sample was taken.
    pub limit: u64,
    /// Whether the sample is known to cover the whole access path.
    pub exact: bool,
}

impl VertexSample {
    pub fn new(est_card: u64, est_read: u64, limit: u64, exact: bool) -> VertexSample {
        VertexSample {
            est_card,
            est_read,
            limit,
            exact,
        }
    }
}

/// Sample statistics of one cutoff join (one path extension).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSample {
    /// Row limit the cutoff join ran under.
    pub limit: u64,
    /// Estimated output cardinality of the join step.
    pub est_card: u64,
    /// Estimated tuples read to execute the join step in full.
    pub est_read: u64,
    /// Classifier for how to trust `est_card`.
    pub estimate: EstimateKind,
}

impl EdgeSample {
    pub fn is_exact(&self) -> bool {
        self.estimate == EstimateKind::Exact
    }

    pub fn is_underflow(&self) -> bool {
        self.estimate == EstimateKind::Underflow
    }
}

impl std::fmt::Display for EdgeSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EdgeSample{{limit={}, estCard={}, estRead={}, {:?}}}",
            self.limit, self.est_card, self.est_read, self.estimate
        )
    }
}

/// The input sample of a cutoff join: either a vertex's base sample or the
/// edge sample carried by the path being extended.
#[derive(Debug, Clone, Copy)]
pub enum SampleRef<'a> {
    Vertex(&'a VertexSample),
    Edge(&'a EdgeSample),
}

impl SampleRef<'_> {
    pub fn est_card(&self) -> u64 {
        match self {
            SampleRef::Vertex(s) => s.est_card,
            SampleRef::Edge(s) => s.est_card,
        }
    }

    pub fn limit(&self) -> u64 {
        match self {
            SampleRef::Vertex(s) => s.limit,
            SampleRef::Edge(s) => s.limit,
        }
    }

    pub fn is_exact(&self) -> bool {
        match self {
            SampleRef::Vertex(s) => s.exact,
            SampleRef::Edge(s) => s.is_exact(),
        }
    }
}

/// Runs cutoff joins on behalf of the engine.
///
/// The engine treats this as a pure function of its arguments. Internal
/// parallelism is the executor's business; the `limit` parameter bounds the
/// work it may perform for one call. Errors propagate out of the optimizer
/// verbatim as [`crate::Error::Sampler`].
pub trait SamplingExecutor {
    /// Join `source` with the last predicate of `preds` (the earlier entries
    /// are the path history that produced `source`), applying `constraints`,
    /// and return a sample of at most `limit` rows.
    fn cutoff_join(
        &self,
        source: SampleRef<'_>,
        preds: &[Arc<dyn Predicate>],
        constraints: &[Arc<dyn Constraint>],
        path_is_complete: bool,
        limit: u64,
    ) -> Result<EdgeSample>;
}
