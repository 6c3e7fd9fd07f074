//! Substitution-scoped row cache
//!
//! Cache entries ride inside substitutions, so a goal's cached rows are
//! visible exactly to the descendants of the substitution that carried them
//! and vanish with it: backtracking through `or` restores the prior cache
//! for free, and there is nothing to invalidate globally.

use crate::registry::GoalId;
use crate::store::DataRow;
use crate::subst::Substitution;
use std::sync::Arc;
use std::time::Instant;

/// Rows cached for one goal, scoped to one substitution lineage.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub rows: Arc<Vec<DataRow>>,
    pub timestamp: Instant,
    /// The goal whose flush produced these rows
    pub origin: GoalId,
}

/// Cache contract. `get` never mutates; `set` derives a new substitution.
pub trait CacheManager: Send + Sync {
    fn get(&self, goal: GoalId, subst: &Substitution) -> Option<Arc<Vec<DataRow>>>;

    fn set(
        &self,
        goal: GoalId,
        subst: &Substitution,
        rows: Arc<Vec<DataRow>>,
        origin: GoalId,
    ) -> Substitution;
}

/// The default implementation: entries live in the substitution itself.
#[derive(Debug, Default)]
pub struct SubstCache;

impl CacheManager for SubstCache {
    fn get(&self, goal: GoalId, subst: &Substitution) -> Option<Arc<Vec<DataRow>>> {
        subst.cache_entry(goal).map(|entry| entry.rows.clone())
    }

    fn set(
        &self,
        goal: GoalId,
        subst: &Substitution,
        rows: Arc<Vec<DataRow>>,
        origin: GoalId,
    ) -> Substitution {
        subst.with_cache_entry(
            goal,
            CacheEntry {
                rows,
                timestamp: Instant::now(),
                origin,
            },
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::term::Scalar;
    use std::collections::BTreeMap;

    fn row(id: i64) -> DataRow {
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), Scalar::Int(id));
        row
    }

    #[test]
    fn set_derives_get_reads() {
        let cache = SubstCache;
        let root = Substitution::root();
        let goal = GoalId(7);
        let origin = GoalId(3);

        assert!(cache.get(goal, &root).is_none());
        let rows = Arc::new(vec![row(1), row(2)]);
        let with = cache.set(goal, &root, rows.clone(), origin);

        // the original substitution is untouched
        assert!(cache.get(goal, &root).is_none());
        assert_eq!(cache.get(goal, &with).unwrap().len(), 2);
        assert_eq!(with.cache_entry(goal).unwrap().origin, origin);
    }

    #[test]
    fn entries_propagate_to_descendants() {
        let cache = SubstCache;
        let goal = GoalId(1);
        let with = cache.set(goal, &Substitution::root(), Arc::new(vec![row(9)]), goal);
        let child = crate::unify::unify(
            &crate::term::Term::var("x"),
            &crate::term::Term::int(5),
            &with,
        )
        .unwrap();
        assert!(cache.get(goal, &child).is_some());
    }
}
