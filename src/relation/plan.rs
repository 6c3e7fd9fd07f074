//! Query-shape planner
//!
//! Turns one batch of substitutions into a single backend query: grounded
//! WHERE values are collected per column, sibling goals discovered through
//! the substitution's goal group are partitioned into merge- and
//! cache-compatible sets, and the select list is widened to cover every
//! partner so one round trip can serve them all.

use crate::registry::GoalId;
use crate::store::{QueryParams, QueryShape, WhereCondition, WhereValue};
use crate::subst::Substitution;
use crate::term::{Scalar, Term};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::RelationGoalCtx;

/// Why a sibling could not participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incompatibility {
    DifferentRelation,
    ValueNotMatch,
    TermToVar,
    VarToTerm,
    ColumnMismatch,
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Incompatibility::DifferentRelation => "different_relation",
            Incompatibility::ValueNotMatch => "value_not_match",
            Incompatibility::TermToVar => "term_to_var",
            Incompatibility::VarToTerm => "var_to_term",
            Incompatibility::ColumnMismatch => "column_mismatch",
        };
        write!(f, "{}", tag)
    }
}

/// The outcome of planning one batch.
pub(crate) struct Planned {
    pub params: QueryParams,
    /// Cache-compatible sibling ids (ours excluded): rows are cached for
    /// these under every emitted substitution.
    pub cache_share: Vec<GoalId>,
}

/// Column-for-column check: can the sibling's WHERE clauses be fused into
/// ours? Requires the same column set and, per column, the same variable or
/// the same ground value.
pub(crate) fn merge_compatible(
    ours: &QueryShape,
    theirs: &QueryShape,
    rep: &Substitution,
) -> Result<(), Incompatibility> {
    let our_columns: BTreeSet<&String> = ours.keys().collect();
    let their_columns: BTreeSet<&String> = theirs.keys().collect();
    if our_columns != their_columns {
        return Err(Incompatibility::ColumnMismatch);
    }
    for (column, our_term) in ours {
        let our_walked = rep.walk(our_term);
        let their_walked = rep.walk(&theirs[column]);
        match (&our_walked, &their_walked) {
            (Term::Var(a), Term::Var(b)) if a == b => {}
            (Term::Var(_), Term::Var(_)) => return Err(Incompatibility::ValueNotMatch),
            (Term::Var(_), _) => return Err(Incompatibility::VarToTerm),
            (_, Term::Var(_)) => return Err(Incompatibility::TermToVar),
            (a, b) if a == b => {}
            _ => return Err(Incompatibility::ValueNotMatch),
        }
    }
    Ok(())
}

/// Can rows fetched for us serve the sibling from cache? Looser than merge:
/// only columns present in both shapes are compared, variable names need not
/// match, and our ground value against their variable is fine: the row
/// binds their variable at probe time. The reverse direction is not: our
/// variable may range wider than their ground value.
pub(crate) fn cache_compatible(
    ours: &QueryShape,
    theirs: &QueryShape,
    rep: &Substitution,
) -> Result<(), Incompatibility> {
    for (column, our_term) in ours {
        let Some(their_term) = theirs.get(column) else {
            continue;
        };
        let our_walked = rep.walk(our_term);
        let their_walked = rep.walk(their_term);
        match (&our_walked, &their_walked) {
            (Term::Var(_), Term::Var(_)) => {}
            (_, Term::Var(_)) => {}
            (Term::Var(_), _) => return Err(Incompatibility::VarToTerm),
            (a, b) if a == b => {}
            _ => return Err(Incompatibility::ValueNotMatch),
        }
    }
    Ok(())
}

/// Grounded WHERE values per column, across the whole batch. A column is
/// constrained only when *every* substitution grounds it to a scalar;
/// otherwise the free case needs unconstrained rows and the condition is
/// dropped. `full_scan_keys` never constrain.
fn collect_where(
    shape: &QueryShape,
    batch: &[Substitution],
    full_scan_keys: &[String],
    into: &mut BTreeMap<String, Vec<Scalar>>,
) {
    'columns: for (column, term) in shape {
        if full_scan_keys.contains(column) {
            continue;
        }
        let mut values: Vec<Scalar> = Vec::new();
        for subst in batch {
            match subst.walk(term) {
                Term::Scalar(value) => {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                _ => {
                    into.remove(column);
                    continue 'columns;
                }
            }
        }
        let entry = into.entry(column.clone()).or_default();
        for value in values {
            if !entry.contains(&value) {
                entry.push(value);
            }
        }
    }
}

/// Plan one backend query for a flushed batch.
pub(crate) fn plan_batch(ctx: &RelationGoalCtx, batch: &[Substitution]) -> Planned {
    let mut where_values: BTreeMap<String, Vec<Scalar>> = BTreeMap::new();
    collect_where(
        &ctx.shape,
        batch,
        &ctx.options.full_scan_keys,
        &mut where_values,
    );

    let mut select: BTreeSet<String> = ctx.shape.keys().cloned().collect();
    let mut cache_share = Vec::new();

    // sibling discovery through the representative substitution
    let representative = &batch[0];
    for sibling in representative.group_all() {
        if *sibling == ctx.goal_id {
            continue;
        }
        let Some(record) = ctx.engine.registry().by_id(*sibling) else {
            continue;
        };
        let Some(relation) = record.relation else {
            continue;
        };
        if relation.identifier != ctx.identifier {
            tracing::trace!(
                goal = %ctx.goal_id,
                sibling = %sibling,
                reason = %Incompatibility::DifferentRelation,
                "sibling not compatible"
            );
            continue;
        }

        match cache_compatible(&ctx.shape, &relation.shape, representative) {
            Ok(()) => {
                select.extend(relation.shape.keys().cloned());
                cache_share.push(*sibling);
            }
            Err(reason) => {
                tracing::trace!(
                    goal = %ctx.goal_id,
                    sibling = %sibling,
                    reason = %reason,
                    "sibling not cache-compatible"
                );
                continue;
            }
        }

        if ctx.config.enable_query_merging {
            match merge_compatible(&ctx.shape, &relation.shape, representative) {
                Ok(()) => {
                    // fuse the sibling's WHERE values into ours
                    collect_where(
                        &relation.shape,
                        batch,
                        &ctx.options.full_scan_keys,
                        &mut where_values,
                    );
                    select.extend(relation.shape.keys().cloned());
                }
                Err(reason) => {
                    tracing::trace!(
                        goal = %ctx.goal_id,
                        sibling = %sibling,
                        reason = %reason,
                        "sibling not merge-compatible"
                    );
                }
            }
        }
    }

    let conditions: Vec<WhereCondition> = where_values
        .into_iter()
        .map(|(column, mut values)| {
            let (operator, value) = match values.len() {
                1 => (
                    crate::store::Operator::Eq,
                    WhereValue::One(values.remove(0)),
                ),
                _ => (crate::store::Operator::In, WhereValue::Many(values)),
            };
            WhereCondition {
                column,
                operator,
                value,
            }
        })
        .collect();

    let select_columns = match &ctx.options.select_columns {
        Some(overridden) => overridden.clone(),
        None => select.into_iter().collect(),
    };

    Planned {
        params: QueryParams {
            relation: ctx.identifier.clone(),
            select_columns,
            conditions,
            limit: ctx.limit,
            offset: ctx.offset,
            options: ctx.options.clone(),
            goal_id: ctx.goal_id,
            log: Some(ctx.log.clone()),
        },
        cache_share,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn shape(pairs: Vec<(&str, Term)>) -> QueryShape {
        pairs
            .into_iter()
            .map(|(c, t)| (c.to_string(), t))
            .collect()
    }

    #[test]
    fn merge_requires_identical_columns_and_terms() {
        let rep = Substitution::root();
        let a = shape(vec![("id", Term::var("u")), ("name", Term::var("n"))]);
        let b = shape(vec![("id", Term::var("u")), ("name", Term::var("n"))]);
        assert!(merge_compatible(&a, &b, &rep).is_ok());

        let c = shape(vec![("id", Term::var("u"))]);
        assert_eq!(
            merge_compatible(&a, &c, &rep),
            Err(Incompatibility::ColumnMismatch)
        );

        let d = shape(vec![("id", Term::var("v")), ("name", Term::var("n"))]);
        assert_eq!(
            merge_compatible(&a, &d, &rep),
            Err(Incompatibility::ValueNotMatch)
        );
    }

    #[test]
    fn merge_ground_values_must_match() {
        let rep = Substitution::root();
        let a = shape(vec![("status", Term::text("active"))]);
        let b = shape(vec![("status", Term::text("active"))]);
        assert!(merge_compatible(&a, &b, &rep).is_ok());

        let c = shape(vec![("status", Term::text("archived"))]);
        assert_eq!(
            merge_compatible(&a, &c, &rep),
            Err(Incompatibility::ValueNotMatch)
        );

        let d = shape(vec![("status", Term::var("s"))]);
        assert_eq!(
            merge_compatible(&a, &d, &rep),
            Err(Incompatibility::TermToVar)
        );
        assert_eq!(
            merge_compatible(&d, &a, &rep),
            Err(Incompatibility::VarToTerm)
        );
    }

    #[test]
    fn cache_allows_extra_columns_and_foreign_vars() {
        let rep = Substitution::root();
        let ours = shape(vec![("id", Term::var("u")), ("name", Term::var("n"))]);
        let theirs = shape(vec![("id", Term::var("x")), ("email", Term::var("e"))]);
        assert!(cache_compatible(&ours, &theirs, &rep).is_ok());
    }

    #[test]
    fn cache_rejects_our_var_against_their_ground() {
        let rep = Substitution::root();
        let ours = shape(vec![("status", Term::var("s"))]);
        let theirs = shape(vec![("status", Term::text("active"))]);
        assert_eq!(
            cache_compatible(&ours, &theirs, &rep),
            Err(Incompatibility::VarToTerm)
        );
        // the reverse direction is fine: the row binds their variable
        assert!(cache_compatible(&theirs, &ours, &rep).is_ok());
    }

    #[test]
    fn cache_ground_mismatch_is_tagged() {
        let rep = Substitution::root();
        let ours = shape(vec![("status", Term::text("active"))]);
        let theirs = shape(vec![("status", Term::text("archived"))]);
        assert_eq!(
            cache_compatible(&ours, &theirs, &rep),
            Err(Incompatibility::ValueNotMatch)
        );
    }

    #[test]
    fn where_collection_requires_every_substitution_ground() {
        let shape = shape(vec![("id", Term::var("u"))]);
        let s1 = crate::unify::unify(&Term::var("u"), &Term::int(1), &Substitution::root())
            .unwrap();
        let s2 = crate::unify::unify(&Term::var("u"), &Term::int(2), &Substitution::root())
            .unwrap();

        let mut values = BTreeMap::new();
        collect_where(&shape, &[s1.clone(), s2.clone()], &[], &mut values);
        assert_eq!(
            values["id"],
            vec![Scalar::Int(1), Scalar::Int(2)]
        );

        // one free substitution drops the whole condition
        let mut values = BTreeMap::new();
        collect_where(&shape, &[s1, Substitution::root()], &[], &mut values);
        assert!(values.is_empty());
    }

    #[test]
    fn full_scan_keys_never_constrain() {
        let shape = shape(vec![("id", Term::int(5))]);
        let mut values = BTreeMap::new();
        collect_where(
            &shape,
            &[Substitution::root()],
            &["id".to_string()],
            &mut values,
        );
        assert!(values.is_empty());
    }
}
