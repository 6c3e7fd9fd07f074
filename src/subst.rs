//! Immutable substitutions
//!
//! A substitution maps variable ids to terms and additionally carries the
//! engine metadata that must travel by value with every branch of the search:
//! suspended constraints, the goal-group tags used for sibling discovery, and
//! the per-lineage row cache. Derivation is always copy-then-insert; the
//! parent value is never touched, so `or` branches share structure freely and
//! no locking is needed anywhere in the evaluator.
//!
//! Variable bindings live in a persistent association chain (newest binding
//! at the head). Lookups walk the chain; extension is O(1) and shares the
//! tail with every ancestor.

use crate::cache::CacheEntry;
use crate::registry::GoalId;
use crate::suspend::SuspendedConstraint;
use crate::term::{Term, VarId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct BindNode {
    var: VarId,
    term: Term,
    next: Option<Arc<BindNode>>,
}

/// An immutable variable→term mapping plus sentinel metadata.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    bindings: Option<Arc<BindNode>>,
    len: usize,
    suspended: Arc<Vec<SuspendedConstraint>>,
    group_all: Arc<Vec<GoalId>>,
    group_conj: Arc<Vec<GoalId>>,
    row_cache: Arc<HashMap<GoalId, CacheEntry>>,
}

impl Substitution {
    /// The empty root substitution a query starts from.
    pub fn root() -> Self {
        Substitution::default()
    }

    /// Number of variable bindings in this lineage.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Most recent binding for `var`, if any.
    pub fn lookup(&self, var: &str) -> Option<&Term> {
        let mut node = self.bindings.as_deref();
        while let Some(n) = node {
            if n.var == var {
                return Some(&n.term);
            }
            node = n.next.as_deref();
        }
        None
    }

    /// Derive a substitution with `var` bound to `term`.
    ///
    /// Callers go through `unify`; binding directly skips the wakeup pass.
    pub(crate) fn bind(&self, var: &str, term: Term) -> Substitution {
        let mut out = self.clone();
        out.bindings = Some(Arc::new(BindNode {
            var: var.to_string(),
            term,
            next: self.bindings.clone(),
        }));
        out.len = self.len + 1;
        out
    }

    /// Transitive resolution: follow variable bindings until a ground term or
    /// an unbound variable is reached. Shallow: composites are returned as
    /// stored; use [`walk_deep`](Self::walk_deep) for element-wise resolution.
    pub fn walk(&self, term: &Term) -> Term {
        let mut cur = term.clone();
        loop {
            let next = match &cur {
                Term::Var(v) => self.lookup(v).cloned(),
                _ => None,
            };
            match next {
                Some(t) => cur = t,
                None => return cur,
            }
        }
    }

    /// Element-wise resolution of lists and sequences, on request only.
    pub fn walk_deep(&self, term: &Term) -> Term {
        match self.walk(term) {
            Term::Cons(head, tail) => Term::Cons(
                Arc::new(self.walk_deep(&head)),
                Arc::new(self.walk_deep(&tail)),
            ),
            Term::Seq(items) => {
                Term::Seq(Arc::new(items.iter().map(|t| self.walk_deep(t)).collect()))
            }
            other => other,
        }
    }

    // --- suspended constraints -------------------------------------------

    pub fn constraints(&self) -> &[SuspendedConstraint] {
        &self.suspended
    }

    pub fn with_constraint(&self, constraint: SuspendedConstraint) -> Substitution {
        let mut out = self.clone();
        let mut list = (*self.suspended).clone();
        list.push(constraint);
        out.suspended = Arc::new(list);
        out
    }

    pub(crate) fn remove_constraint(&self, id: u64) -> Substitution {
        let mut out = self.clone();
        let list: Vec<SuspendedConstraint> = self
            .suspended
            .iter()
            .filter(|c| c.id != id)
            .cloned()
            .collect();
        out.suspended = Arc::new(list);
        out
    }

    /// Whether this substitution still carries unresolved constraints.
    pub fn has_pending_constraints(&self) -> bool {
        !self.suspended.is_empty()
    }

    // --- goal groups ------------------------------------------------------

    /// All goal ids reachable from the plan that produced this substitution.
    pub fn group_all(&self) -> &[GoalId] {
        &self.group_all
    }

    /// The sibling set of the innermost conjunction.
    pub fn group_conj(&self) -> &[GoalId] {
        &self.group_conj
    }

    /// Replace the conjunction group and union the ids into the overall
    /// group. Applied by `and` to every inbound substitution.
    pub(crate) fn with_conj_group(&self, ids: &[GoalId]) -> Substitution {
        let mut out = self.extend_group_all(ids);
        out.group_conj = Arc::new(ids.to_vec());
        out
    }

    /// Union ids into the overall goal group. Applied by `or` branches.
    pub(crate) fn extend_group_all(&self, ids: &[GoalId]) -> Substitution {
        let mut out = self.clone();
        let mut all = (*self.group_all).clone();
        for id in ids {
            if !all.contains(id) {
                all.push(*id);
            }
        }
        out.group_all = Arc::new(all);
        out
    }

    // --- row cache --------------------------------------------------------

    pub fn cache_entry(&self, goal: GoalId) -> Option<&CacheEntry> {
        self.row_cache.get(&goal)
    }

    pub fn with_cache_entry(&self, goal: GoalId, entry: CacheEntry) -> Substitution {
        let mut out = self.clone();
        let mut map = (*self.row_cache).clone();
        map.insert(goal, entry);
        out.row_cache = Arc::new(map);
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::term::Term;

    #[test]
    fn bind_is_copy_then_insert() {
        let root = Substitution::root();
        let s1 = root.bind("x", Term::int(1));
        assert!(root.lookup("x").is_none());
        assert_eq!(s1.lookup("x"), Some(&Term::int(1)));
        assert_eq!(root.len(), 0);
        assert_eq!(s1.len(), 1);
    }

    #[test]
    fn branches_share_structure() {
        let base = Substitution::root().bind("x", Term::int(1));
        let left = base.bind("y", Term::int(2));
        let right = base.bind("y", Term::int(3));
        assert_eq!(left.lookup("y"), Some(&Term::int(2)));
        assert_eq!(right.lookup("y"), Some(&Term::int(3)));
        assert_eq!(left.lookup("x"), Some(&Term::int(1)));
        assert_eq!(right.lookup("x"), Some(&Term::int(1)));
    }

    #[test]
    fn walk_resolves_transitively() {
        let s = Substitution::root()
            .bind("x", Term::var("y"))
            .bind("y", Term::int(42));
        assert_eq!(s.walk(&Term::var("x")), Term::int(42));
        // fixpoint
        let w = s.walk(&Term::var("x"));
        assert_eq!(s.walk(&w), w);
    }

    #[test]
    fn walk_leaves_unbound_and_ground_untouched() {
        let s = Substitution::root();
        assert_eq!(s.walk(&Term::var("free")), Term::var("free"));
        assert_eq!(s.walk(&Term::int(7)), Term::int(7));
    }

    #[test]
    fn walk_is_shallow_walk_deep_is_not() {
        let s = Substitution::root().bind("x", Term::int(5));
        let l = Term::list(vec![Term::var("x")]);
        match s.walk(&l) {
            Term::Cons(head, _) => assert_eq!(*head, Term::var("x")),
            other => panic!("expected cons, got {}", other),
        }
        assert_eq!(s.walk_deep(&l), Term::list(vec![Term::int(5)]));
    }

    #[test]
    fn conj_group_replaces_all_group_unions() {
        let s = Substitution::root().with_conj_group(&[GoalId(1), GoalId(2)]);
        let s = s.with_conj_group(&[GoalId(3)]);
        assert_eq!(s.group_conj(), &[GoalId(3)]);
        assert_eq!(s.group_all(), &[GoalId(1), GoalId(2), GoalId(3)]);
    }
}
