//! Join graph building blocks.
//!
//! The engine sees the surrounding query engine through two narrow seams:
//! [`Predicate`] (an access path with an identifier and the variables it
//! binds) and [`Constraint`] (a filter expression exposing the variables it
//! references). [`StatementPattern`] and [`FilterConstraint`] are the concrete
//! implementations used by embedders that do not need to wrap their own AST
//! nodes, and by the test suites.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::sample::VertexSample;

/// A query variable name.
pub type Variable = String;

/// An access-path predicate: the unit a join path is built from.
pub trait Predicate: fmt::Debug + Send + Sync {
    /// Stable identifier within one join graph.
    fn id(&self) -> u32;

    /// The variables bound once this predicate has been evaluated.
    fn variables(&self) -> &BTreeSet<Variable>;
}

/// A filter expression over a set of variables. A filter becomes evaluable,
/// and therefore contributes to join admissibility, once all its variables
/// are bound.
pub trait Constraint: fmt::Debug + Send + Sync {
    fn variables(&self) -> &BTreeSet<Variable>;
}

/// Concrete [`Predicate`]: a triple/statement pattern reduced to its variable
/// positions.
#[derive(Debug, Clone)]
pub struct StatementPattern {
    id: u32,
    vars: BTreeSet<Variable>,
}

impl StatementPattern {
    pub fn new<I, T>(id: u32, vars: I) -> StatementPattern
    where
        I: IntoIterator<Item = T>,
        T: Into<Variable>,
    {
        StatementPattern {
            id,
            vars: vars.into_iter().map(Into::into).collect(),
        }
    }
}

impl Predicate for StatementPattern {
    fn id(&self) -> u32 {
        self.id
    }

    fn variables(&self) -> &BTreeSet<Variable> {
        &self.vars
    }
}

/// Concrete [`Constraint`]: a named filter with its referenced variables.
#[derive(Debug, Clone)]
pub struct FilterConstraint {
    label: String,
    vars: BTreeSet<Variable>,
}

impl FilterConstraint {
    pub fn new<I, T>(label: impl Into<String>, vars: I) -> FilterConstraint
    where
        I: IntoIterator<Item = T>,
        T: Into<Variable>,
    {
        FilterConstraint {
            label: label.into(),
            vars: vars.into_iter().map(Into::into).collect(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Constraint for FilterConstraint {
    fn variables(&self) -> &BTreeSet<Variable> {
        &self.vars
    }
}

/// A predicate plus the sample statistics of its access path.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub pred: Arc<dyn Predicate>,
    pub sample: VertexSample,
}

impl Vertex {
    pub fn new(pred: Arc<dyn Predicate>, sample: VertexSample) -> Vertex {
        Vertex { pred, sample }
    }

    /// Vertex identity is predicate identity.
    pub fn id(&self) -> u32 {
        self.pred.id()
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vertex({})", self.id())
    }
}

/// The immutable set of vertices and filter constraints being optimized.
#[derive(Debug, Clone)]
pub struct JoinGraph {
    vertices: Vec<Arc<Vertex>>,
    constraints: Vec<Arc<dyn Constraint>>,
}

impl JoinGraph {
    /// Build a join graph. Vertex identifiers must be unique.
    pub fn new(
        vertices: Vec<Arc<Vertex>>,
        constraints: Vec<Arc<dyn Constraint>>,
    ) -> Result<JoinGraph> {
        if vertices.is_empty() {
            return Err(Error::InvalidArgument("join graph requires at least one vertex"));
        }
        let mut ids = BTreeSet::new();
        for v in &vertices {
            if !ids.insert(v.id()) {
                return Err(Error::InvalidArgument("duplicate vertex in join graph"));
            }
        }
        Ok(JoinGraph {
            vertices,
            constraints,
        })
    }

    pub fn vertices(&self) -> &[Arc<Vertex>] {
        &self.vertices
    }

    pub fn constraints(&self) -> &[Arc<dyn Constraint>] {
        &self.constraints
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(id: u32) -> Arc<Vertex> {
        Arc::new(Vertex::new(
            Arc::new(StatementPattern::new(id, ["x"])),
            VertexSample::new(10, 10, 100, false),
        ))
    }

    #[test]
    fn rejects_empty_graph() {
        assert!(matches!(
            JoinGraph::new(Vec::new(), Vec::new()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_duplicate_vertices() {
        assert!(matches!(
            JoinGraph::new(vec![vertex(1), vertex(1)], Vec::new()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
