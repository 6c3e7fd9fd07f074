//! Structural unification with constraint wakeup
//!
//! Unification failure is represented by `None`: it is a normal outcome of
//! evaluation, not an error. A successful binding resumes every suspended
//! constraint watching the newly-ground variable; a constraint answering
//! `Fail` fails the whole unification.

use crate::subst::Substitution;
use crate::suspend::ConstraintOutcome;
use crate::term::{Term, VarId};

/// Unify two terms under `s`, producing the extended substitution.
pub fn unify(a: &Term, b: &Term, s: &Substitution) -> Option<Substitution> {
    let a = s.walk(a);
    let b = s.walk(b);
    match (&a, &b) {
        (Term::Var(x), Term::Var(y)) if x == y => Some(s.clone()),
        (Term::Var(x), _) => bind_and_wake(x, &b, s),
        (_, Term::Var(y)) => bind_and_wake(y, &a, s),
        (Term::Scalar(x), Term::Scalar(y)) => (x == y).then(|| s.clone()),
        (Term::Nil, Term::Nil) => Some(s.clone()),
        (Term::Cons(h1, t1), Term::Cons(h2, t2)) => {
            let s = unify(h1, h2, s)?;
            unify(t1, t2, &s)
        }
        (Term::Seq(xs), Term::Seq(ys)) => {
            if xs.len() != ys.len() {
                return None;
            }
            let mut s = s.clone();
            for (x, y) in xs.iter().zip(ys.iter()) {
                s = unify(x, y, &s)?;
            }
            Some(s)
        }
        _ => None,
    }
}

fn bind_and_wake(var: &VarId, term: &Term, s: &Substitution) -> Option<Substitution> {
    // Binding a variable into a composite containing itself would make walk
    // diverge on deep resolution; reject the cycle up front.
    if matches!(term, Term::Cons(_, _) | Term::Seq(_)) && term.occurs(var) {
        return None;
    }
    let bound = s.bind(var, term.clone());
    wake(bound, std::slice::from_ref(var))
}

/// Resume suspended constraints whose watched set intersects the
/// newly-ground variables. `Ok` substitutes the constraint's result, `Fail`
/// fails the unification that triggered the wakeup, `CheckLater` re-installs
/// the constraint untouched. A resume that binds further variables recurses
/// through `unify`, so cascades resolve depth-first.
pub(crate) fn wake(s: Substitution, newly_ground: &[VarId]) -> Option<Substitution> {
    let triggered: Vec<u64> = s
        .constraints()
        .iter()
        .filter(|c| c.watched.iter().any(|w| newly_ground.contains(w)))
        .map(|c| c.id)
        .collect();

    let mut s = s;
    for id in triggered {
        let Some(constraint) = s.constraints().iter().find(|c| c.id == id).cloned() else {
            // already resolved by an earlier cascade
            continue;
        };
        let without = s.remove_constraint(id);
        match (constraint.resume)(&without) {
            ConstraintOutcome::Ok(next) => s = next,
            ConstraintOutcome::Fail => return None,
            ConstraintOutcome::CheckLater => s = without.with_constraint(constraint),
        }
    }
    Some(s)
}
