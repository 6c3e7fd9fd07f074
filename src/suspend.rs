//! Constraint suspension
//!
//! A constraint watches a set of unbound variables and is resumed by
//! unification when any of them becomes ground (see `unify::wake`). The
//! suspension list lives inside the substitution, so backtracking restores
//! prior constraint sets for free, and resume functions must be pure and
//! safe to invoke multiple times.

use crate::engine::Engine;
use crate::goal::Goal;
use crate::stream::LStream;
use crate::subst::Substitution;
use crate::term::{Scalar, Term, VarId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of resuming a constraint.
pub enum ConstraintOutcome {
    /// Progress was made; continue with this substitution
    Ok(Substitution),
    /// The constraint is unsatisfiable; the triggering unification fails
    Fail,
    /// Not enough is ground yet; keep the constraint suspended
    CheckLater,
}

pub type ResumeFn = Arc<dyn Fn(&Substitution) -> ConstraintOutcome + Send + Sync>;

/// A suspended constraint riding inside a substitution.
#[derive(Clone)]
pub struct SuspendedConstraint {
    pub id: u64,
    pub watched: BTreeSet<VarId>,
    pub resume: ResumeFn,
}

impl std::fmt::Debug for SuspendedConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendedConstraint")
            .field("id", &self.id)
            .field("watched", &self.watched)
            .finish()
    }
}

// Wraps modulo a large bound; uniqueness within a single substitution
// lineage is what matters, not global uniqueness forever.
const CONSTRAINT_ID_BOUND: u64 = 1 << 53;

static CONSTRAINT_IDS: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_constraint_id() -> u64 {
    CONSTRAINT_IDS.fetch_add(1, Ordering::Relaxed) % CONSTRAINT_ID_BOUND
}

impl Engine {
    /// Build a goal that runs `evaluator` once at least `min_grounded` of
    /// `vars` are ground, and suspends on the still-free variables
    /// otherwise. The evaluator doubles as the constraint's resume function.
    ///
    /// A constraint that would watch nothing and still answers `CheckLater`
    /// can never make progress; its substitution is dropped silently.
    pub fn suspendable(
        &self,
        name: &str,
        vars: Vec<Term>,
        min_grounded: usize,
        evaluator: ResumeFn,
    ) -> Goal {
        let id = self.registry().register(format!("suspend({})", name), None);
        Goal::new(
            id,
            name,
            Arc::new(move |input| {
                let vars = vars.clone();
                let evaluator = evaluator.clone();
                input.flat_map(move |s: Substitution| {
                    let walked: Vec<Term> = vars.iter().map(|v| s.walk(v)).collect();
                    let grounded = walked.iter().filter(|t| !t.is_var()).count();

                    let outcome = if grounded >= min_grounded {
                        evaluator(&s)
                    } else {
                        ConstraintOutcome::CheckLater
                    };

                    match outcome {
                        ConstraintOutcome::Ok(next) => LStream::one(next),
                        ConstraintOutcome::Fail => LStream::empty(),
                        ConstraintOutcome::CheckLater => {
                            let watched: BTreeSet<VarId> = walked
                                .iter()
                                .filter_map(|t| match t {
                                    Term::Var(v) => Some(v.clone()),
                                    _ => None,
                                })
                                .collect();
                            if watched.is_empty() {
                                // nothing left to wake on: no progress possible
                                return LStream::empty();
                            }
                            LStream::one(s.with_constraint(SuspendedConstraint {
                                id: next_constraint_id(),
                                watched,
                                resume: evaluator.clone(),
                            }))
                        }
                    }
                })
            }),
        )
    }

    /// Arithmetic constraint `x + y = z`: solves for the missing operand
    /// once any two are ground, checks once all three are.
    pub fn plus(&self, x: Term, y: Term, z: Term) -> Goal {
        self.arith("plus", x, y, z, |a, b| a + b, |c, a| c - a)
    }

    /// Arithmetic constraint `x * y = z`.
    pub fn times(&self, x: Term, y: Term, z: Term) -> Goal {
        self.arith("times", x, y, z, |a, b| a * b, |c, a| c / a)
    }

    fn arith(
        &self,
        name: &str,
        x: Term,
        y: Term,
        z: Term,
        forward: fn(f64, f64) -> f64,
        inverse: fn(f64, f64) -> f64,
    ) -> Goal {
        let vars = vec![x.clone(), y.clone(), z.clone()];
        let (ex, ey, ez) = (x.clone(), y.clone(), z.clone());
        let all_ints = move |s: &Substitution| {
            [&x, &y, &z]
                .iter()
                .map(|t| s.walk(t))
                .all(|t| !matches!(t, Term::Scalar(Scalar::Float(_))))
        };
        let evaluator: ResumeFn = Arc::new(move |s: &Substitution| {
            let num = |t: &Term| s.walk(t).as_scalar().and_then(Scalar::as_f64);
            let solve = |target: &Term, value: f64| {
                let result = if all_ints(s) && value.fract() == 0.0 {
                    Term::int(value as i64)
                } else {
                    Term::float(value)
                };
                match crate::unify::unify(target, &result, s) {
                    Some(next) => ConstraintOutcome::Ok(next),
                    None => ConstraintOutcome::Fail,
                }
            };
            match (num(&ex), num(&ey), num(&ez)) {
                (Some(a), Some(b), _) => solve(&ez, forward(a, b)),
                (Some(a), _, Some(c)) => solve(&ey, inverse(c, a)),
                (_, Some(b), Some(c)) => solve(&ex, inverse(c, b)),
                _ => ConstraintOutcome::CheckLater,
            }
        });
        self.suspendable(name, vars, 2, evaluator)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plus_solves_forward() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::int(3)),
            engine.eq(Term::var("y"), Term::int(4)),
            engine.plus(Term::var("x"), Term::var("y"), Term::var("z")),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].walk(&Term::var("z")), Term::int(7));
    }

    #[tokio::test]
    async fn plus_solves_backward() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::int(3)),
            engine.eq(Term::var("z"), Term::int(10)),
            engine.plus(Term::var("x"), Term::var("y"), Term::var("z")),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].walk(&Term::var("y")), Term::int(7));
    }

    #[tokio::test]
    async fn plus_wakes_on_later_binding() {
        let engine = Engine::new();
        // the constraint sees only x at first; eq(y, 4) downstream wakes it
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::int(3)),
            engine.plus(Term::var("x"), Term::var("y"), Term::var("z")),
            engine.eq(Term::var("y"), Term::int(4)),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].walk(&Term::var("z")), Term::int(7));
        assert!(!out[0].has_pending_constraints());
    }

    #[tokio::test]
    async fn under_grounded_constraint_stays_suspended() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::int(3)),
            engine.plus(Term::var("x"), Term::var("y"), Term::var("z")),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].has_pending_constraints());
        assert_eq!(out[0].walk(&Term::var("z")), Term::var("z"));
    }

    #[tokio::test]
    async fn contradictory_sum_fails_the_waking_unification() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::int(3)),
            engine.eq(Term::var("y"), Term::int(4)),
            engine.plus(Term::var("x"), Term::var("y"), Term::int(99)),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn times_mixes_floats() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::float(2.5)),
            engine.eq(Term::var("y"), Term::int(4)),
            engine.times(Term::var("x"), Term::var("y"), Term::var("z")),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].walk(&Term::var("z")), Term::float(10.0));
    }

    #[test]
    fn constraint_ids_stay_under_the_bound() {
        for _ in 0..100 {
            assert!(next_constraint_id() < CONSTRAINT_ID_BOUND);
        }
    }
}
