//! Aggregate goals
//!
//! Aggregates are synchronous barriers: the sub-goal's stream is buffered to
//! completion for each input substitution before anything is emitted.

use crate::engine::Engine;
use crate::goal::Goal;
use crate::stream::LStream;
use crate::subst::Substitution;
use crate::term::{Scalar, Term};
use crate::unify::unify;
use std::sync::Arc;

/// Group fold: receives the walked values of the group and the buffered
/// substitutions belonging to it.
pub type Fold = Arc<dyn Fn(&[Term], &[Substitution]) -> Term + Send + Sync>;

/// Stock folds.
pub mod folds {
    use super::*;

    /// The group's values as a logic list, in emission order.
    pub fn collect() -> Fold {
        Arc::new(|values: &[Term], _substs: &[Substitution]| Term::list(values.to_vec()))
    }

    pub fn count() -> Fold {
        Arc::new(|values: &[Term], _substs: &[Substitution]| Term::int(values.len() as i64))
    }

    /// Numeric sum; non-numeric values are skipped. Integer when every
    /// contributing value is an integer.
    pub fn sum() -> Fold {
        Arc::new(|values: &[Term], _substs: &[Substitution]| {
            let mut total = 0.0;
            let mut all_ints = true;
            for value in values {
                if let Some(n) = value.as_scalar().and_then(Scalar::as_f64) {
                    total += n;
                    all_ints &= matches!(value, Term::Scalar(Scalar::Int(_)));
                }
            }
            if all_ints {
                Term::int(total as i64)
            } else {
                Term::float(total)
            }
        })
    }
}

impl Engine {
    /// Collect `walk(var)` over the complete output of `subgoal` for each
    /// input substitution, then emit the input with `var` unified to the
    /// list of values (emission order preserved).
    pub fn aggregate(&self, var: Term, subgoal: Goal) -> Goal {
        let id = self
            .registry()
            .register(format!("aggregate({})", var), None);
        Goal::new(
            id,
            "aggregate",
            Arc::new(move |input| {
                let var = var.clone();
                let subgoal = subgoal.clone();
                input.flat_map(move |s: Substitution| {
                    let var = var.clone();
                    let subgoal = subgoal.clone();
                    LStream::new(move |out| async move {
                        let results = subgoal.apply(LStream::one(s.clone())).to_vec().await;
                        match results {
                            Ok(emitted) => {
                                let values: Vec<Term> =
                                    emitted.iter().map(|e| e.walk_deep(&var)).collect();
                                if let Some(next) = unify(&var, &Term::list(values), &s) {
                                    let _ = out.emit(next).await;
                                }
                            }
                            Err(e) => {
                                let _ = out.error(e).await;
                            }
                        }
                    })
                })
            }),
        )
    }

    /// Group the sub-goal's output by the walked `key`, fold the walked
    /// `value`s per group, and bind the result to `out_var`.
    ///
    /// With `drop_others`, one substitution per group is emitted, derived
    /// from the input with only key and out newly bound; otherwise every
    /// buffered substitution is re-emitted with its group's fold attached.
    pub fn group_by(
        &self,
        key: Term,
        value: Term,
        out_var: Term,
        drop_others: bool,
        fold: Fold,
        subgoal: Goal,
    ) -> Goal {
        let id = self
            .registry()
            .register(format!("group_by({})", key), None);
        Goal::new(
            id,
            "group_by",
            Arc::new(move |input| {
                let key = key.clone();
                let value = value.clone();
                let out_var = out_var.clone();
                let fold = fold.clone();
                let subgoal = subgoal.clone();
                input.flat_map(move |s: Substitution| {
                    let key = key.clone();
                    let value = value.clone();
                    let out_var = out_var.clone();
                    let fold = fold.clone();
                    let subgoal = subgoal.clone();
                    LStream::new(move |out| async move {
                        let emitted =
                            match subgoal.apply(LStream::one(s.clone())).to_vec().await {
                                Ok(emitted) => emitted,
                                Err(e) => {
                                    let _ = out.error(e).await;
                                    return;
                                }
                            };

                        // insertion-ordered grouping by the walked key
                        let mut groups: Vec<(Term, Vec<Term>, Vec<Substitution>)> = Vec::new();
                        for emitted_subst in &emitted {
                            let k = emitted_subst.walk_deep(&key);
                            let v = emitted_subst.walk_deep(&value);
                            match groups.iter_mut().find(|(gk, _, _)| *gk == k) {
                                Some((_, values, substs)) => {
                                    values.push(v);
                                    substs.push(emitted_subst.clone());
                                }
                                None => groups.push((k, vec![v], vec![emitted_subst.clone()])),
                            }
                        }

                        if drop_others {
                            for (k, values, substs) in &groups {
                                let folded = fold(values, substs);
                                let Some(with_key) = unify(&key, k, &s) else {
                                    continue;
                                };
                                let Some(next) = unify(&out_var, &folded, &with_key) else {
                                    continue;
                                };
                                if !out.emit(next).await {
                                    return;
                                }
                            }
                        } else {
                            for emitted_subst in &emitted {
                                let k = emitted_subst.walk_deep(&key);
                                let Some((_, values, substs)) =
                                    groups.iter().find(|(gk, _, _)| *gk == k)
                                else {
                                    continue;
                                };
                                let folded = fold(values, substs);
                                let Some(next) = unify(&out_var, &folded, emitted_subst)
                                else {
                                    continue;
                                };
                                if !out.emit(next).await {
                                    return;
                                }
                            }
                        }
                    })
                })
            }),
        )
    }
}
