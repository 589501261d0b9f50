//! Static admissibility analysis.
//!
//! Whether a vertex may extend a join path is decided without touching any
//! data. Two predicates join *directly* when they share at least one variable.
//! A join that shares no variable directly can still be *constrained* if some
//! filter becomes fully evaluable once both sides' variables are bound; such a
//! join is not a blind cross product because the filter prunes its output.
//! Everything else is an unconstrained cross product, chosen only as a last
//! resort by the engine.
//!
//! The same variable bookkeeping drives constraint attachment along a concrete
//! path: each filter runs at the earliest position where all its variables are
//! bound, and at most once.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::{Constraint, Predicate, Variable, Vertex};

/// Two vertices can join directly iff their predicates share a variable.
/// Symmetric by construction.
pub fn can_join(a: &Vertex, b: &Vertex) -> bool {
    !a.pred
        .variables()
        .is_disjoint(b.pred.variables())
}

/// Whether `vertex` may extend `path` given the available filter constraints.
///
/// The join is admissible when `vertex` shares a variable with some vertex on
/// the path, or when some filter in `constraints` has all of its variables in
/// the union of the path's and the vertex's variables (the filter then gives
/// the join its selectivity).
///
/// # Errors
///
/// `InvalidArgument` when the path is empty or already contains `vertex`.
pub fn can_join_using_constraints(
    path: &[Arc<Vertex>],
    vertex: &Vertex,
    constraints: &[Arc<dyn Constraint>],
) -> Result<bool> {
    if path.is_empty() {
        return Err(Error::InvalidArgument("path may not be empty"));
    }
    if path.iter().any(|v| v.id() == vertex.id()) {
        return Err(Error::InvalidArgument("vertex already present in path"));
    }

    // Direct sharing with any vertex already on the path.
    for v in path {
        if can_join(v, vertex) {
            return Ok(true);
        }
    }

    // Indirect sharing: a filter fully bound by path plus candidate.
    let mut bound: BTreeSet<&Variable> = BTreeSet::new();
    for v in path {
        bound.extend(v.pred.variables());
    }
    bound.extend(vertex.pred.variables());
    for c in constraints {
        if c.variables().iter().all(|v| bound.contains(v)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Attach each filter constraint to the position in `preds` at which it first
/// becomes fully bound.
///
/// `known_bound` holds variables already bound by the surrounding plan before
/// the path runs. Each constraint is attached at most once, at the earliest
/// eligible position; constraints attached at the same position keep their
/// input order. When `path_is_complete`, constraints whose variables never
/// fully bind are attached at the last position so they still run somewhere;
/// on a partial path they are left off, since a vertex outside the path may
/// yet bind them.
pub fn join_graph_constraints(
    preds: &[Arc<dyn Predicate>],
    constraints: &[Arc<dyn Constraint>],
    known_bound: &[Variable],
    path_is_complete: bool,
) -> Vec<Vec<Arc<dyn Constraint>>> {
    let mut attached: Vec<Vec<Arc<dyn Constraint>>> = Vec::with_capacity(preds.len());
    let mut bound: BTreeSet<&Variable> = known_bound.iter().collect();
    let mut used = vec![false; constraints.len()];

    for (i, pred) in preds.iter().enumerate() {
        let last = i + 1 == preds.len();
        bound.extend(pred.variables());
        let mut here = Vec::new();
        for (ci, c) in constraints.iter().enumerate() {
            if used[ci] {
                continue;
            }
            let fully_bound = c.variables().iter().all(|v| bound.contains(v));
            if fully_bound || (last && path_is_complete) {
                used[ci] = true;
                here.push(Arc::clone(c));
            }
        }
        attached.push(here);
    }
    attached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FilterConstraint, StatementPattern};
    use crate::sample::VertexSample;

    fn vertex(id: u32, vars: &[&str]) -> Arc<Vertex> {
        Arc::new(Vertex::new(
            Arc::new(StatementPattern::new(id, vars.iter().copied())),
            VertexSample::new(100, 100, 100, false),
        ))
    }

    fn filter(label: &str, vars: &[&str]) -> Arc<dyn Constraint> {
        Arc::new(FilterConstraint::new(label, vars.iter().copied()))
    }

    #[test]
    fn can_join_is_symmetric() {
        let a = vertex(0, &["x", "y"]);
        let b = vertex(1, &["y", "z"]);
        let c = vertex(2, &["w"]);
        assert!(can_join(&a, &b));
        assert!(can_join(&b, &a));
        assert!(!can_join(&a, &c));
        assert!(!can_join(&c, &a));
    }

    #[test]
    fn single_vertex_path_reduces_to_can_join() {
        let a = vertex(0, &["x"]);
        let b = vertex(1, &["x"]);
        let c = vertex(2, &["y"]);
        assert!(can_join_using_constraints(&[Arc::clone(&a)], &b, &[]).unwrap());
        assert_eq!(
            can_join_using_constraints(&[Arc::clone(&a)], &c, &[]).unwrap(),
            can_join(&a, &c)
        );
    }

    #[test]
    fn adding_constraints_is_monotone() {
        let a = vertex(0, &["x"]);
        let b = vertex(1, &["y"]);
        let f = filter("f", &["x", "y"]);
        let g = filter("g", &["z"]);
        let path = [Arc::clone(&a)];
        assert!(!can_join_using_constraints(&path, &b, &[]).unwrap());
        assert!(can_join_using_constraints(&path, &b, &[Arc::clone(&f)]).unwrap());
        // A superset of an admitting filter set still admits.
        assert!(can_join_using_constraints(&path, &b, &[f, g]).unwrap());
    }

    #[test]
    fn validates_path_arguments() {
        let a = vertex(0, &["x"]);
        let b = vertex(1, &["x"]);
        assert!(matches!(
            can_join_using_constraints(&[], &a, &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            can_join_using_constraints(&[Arc::clone(&a), Arc::clone(&b)], &b, &[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn attaches_each_filter_at_earliest_eligible_position() {
        let p0 = vertex(0, &["x"]);
        let p1 = vertex(1, &["x", "y"]);
        let p2 = vertex(2, &["z"]);
        let preds: Vec<Arc<dyn Predicate>> = [&p0, &p1, &p2]
            .iter()
            .map(|v| Arc::clone(&v.pred))
            .collect();
        let fx = filter("fx", &["x"]);
        let fxy = filter("fxy", &["x", "y"]);
        let fw = filter("fw", &["w"]);
        let attached = join_graph_constraints(
            &preds,
            &[Arc::clone(&fx), Arc::clone(&fxy), Arc::clone(&fw)],
            &[],
            false,
        );
        assert_eq!(attached[0].len(), 1); // fx at p0
        assert_eq!(attached[1].len(), 1); // fxy at p1
        assert_eq!(attached[2].len(), 0); // fw never binds, path incomplete
        let attached = join_graph_constraints(&preds, &[fx, fxy, fw], &[], true);
        assert_eq!(attached[2].len(), 1); // fw forced onto the last position
    }

    #[test]
    fn known_bound_variables_accelerate_attachment() {
        let p0 = vertex(0, &["y"]);
        let preds: Vec<Arc<dyn Predicate>> = vec![Arc::clone(&p0.pred)];
        let fxy = filter("fxy", &["x", "y"]);
        let attached = join_graph_constraints(&preds, &[fxy], &["x".to_string()], false);
        assert_eq!(attached[0].len(), 1);
    }
}
