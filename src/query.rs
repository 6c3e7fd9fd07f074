//! Query frontend
//!
//! A small fluent layer over the goal tree: allocate variables, declare a
//! projection, add root conjuncts, then consume results. Execution threads a
//! single empty substitution through `and(goals)` and walks each selected
//! term per emitted substitution.
//!
//! Substitutions still carrying unresolved suspended constraints are not
//! solutions; the projected terminals drop them. The raw stream keeps them.

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::goal::Goal;
use crate::stream::{Event, LStream, SubstStream, Subscription};
use crate::subst::Substitution;
use crate::term::Term;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One projected solution: select-shape key to walked term.
pub type ResultRow = BTreeMap<String, Term>;

pub struct QueryBuilder {
    engine: Engine,
    vars: HashMap<String, Term>,
    select: Vec<(String, Term)>,
    goals: Vec<Goal>,
}

impl Engine {
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder {
            engine: self.clone(),
            vars: HashMap::new(),
            select: Vec::new(),
            goals: Vec::new(),
        }
    }
}

impl QueryBuilder {
    /// A query-scoped variable: the first access allocates a fresh
    /// engine-unique variable, later accesses return the same one.
    pub fn var(&mut self, name: &str) -> Term {
        if let Some(existing) = self.vars.get(name) {
            return existing.clone();
        }
        let fresh = self.engine.fresh_var(name);
        self.vars.insert(name.to_string(), fresh.clone());
        fresh
    }

    /// Declare the projection. Unselected bindings are dropped from results.
    pub fn select<K: Into<String>>(&mut self, pairs: Vec<(K, Term)>) -> &mut Self {
        self.select = pairs.into_iter().map(|(k, t)| (k.into(), t)).collect();
        self
    }

    pub fn goal(&mut self, goal: Goal) -> &mut Self {
        self.goals.push(goal);
        self
    }

    pub fn goals(&mut self, goals: Vec<Goal>) -> &mut Self {
        self.goals.extend(goals);
        self
    }

    /// The raw substitution stream of the root conjunction.
    pub fn stream(&mut self) -> SubstStream {
        let engine = self.engine.clone();
        let goals = std::mem::take(&mut self.goals);
        LStream::new(move |out| async move {
            let root = engine.and(goals);
            engine.run(&root).pipe(&out).await;
        })
    }

    fn solutions(&mut self) -> LStream<ResultRow> {
        let select = Arc::new(std::mem::take(&mut self.select));
        self.stream()
            .filter(|s: &Substitution| !s.has_pending_constraints())
            .map(move |s: Substitution| project(&select, &s))
    }

    /// Collect every solution.
    pub async fn to_vec(&mut self) -> EngineResult<Vec<ResultRow>> {
        self.solutions().to_vec().await
    }

    /// Async pull iterator; dropping it early cancels the whole pipeline.
    pub fn fetch(&mut self) -> ResultIter {
        ResultIter {
            subscription: self.solutions().subscribe(),
        }
    }
}

fn project(select: &[(String, Term)], subst: &Substitution) -> ResultRow {
    select
        .iter()
        .map(|(key, term)| (key.clone(), subst.walk_deep(term)))
        .collect()
}

/// Async iterator over projected solutions.
pub struct ResultIter {
    subscription: Subscription<ResultRow>,
}

impl ResultIter {
    /// Next solution; `None` on completion. Errors surface once and end the
    /// iteration.
    pub async fn next(&mut self) -> Option<EngineResult<ResultRow>> {
        match self.subscription.next().await {
            Some(Event::Next(row)) => Some(Ok(row)),
            Some(Event::Error(e)) => Some(Err(e)),
            None => None,
        }
    }

    /// Stop early, cancelling upstream.
    pub fn cancel(&self) {
        self.subscription.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn projects_selected_terms() {
        let engine = Engine::new();
        let mut q = engine.query();
        let x = q.var("x");
        let y = q.var("y");
        q.select(vec![("a", x.clone()), ("b", y.clone())]);
        q.goal(engine.eq(x, Term::int(1)));
        q.goal(engine.eq(y, Term::text("hi")));
        let rows = q.to_vec().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a"], Term::int(1));
        assert_eq!(rows[0]["b"], Term::text("hi"));
    }

    #[tokio::test]
    async fn var_is_memoised_per_builder() {
        let engine = Engine::new();
        let mut q = engine.query();
        assert_eq!(q.var("x"), q.var("x"));
        let mut q2 = engine.query();
        assert_ne!(q.var("x"), q2.var("x"));
    }

    #[tokio::test]
    async fn fetch_pulls_and_cancels() {
        let engine = Engine::new();
        let mut q = engine.query();
        let x = q.var("x");
        q.select(vec![("x", x.clone())]);
        q.goal(engine.or(vec![
            engine.eq(x.clone(), Term::int(1)),
            engine.eq(x.clone(), Term::int(2)),
            engine.eq(x.clone(), Term::int(3)),
        ]));
        let mut iter = q.fetch();
        let first = iter.next().await.unwrap().unwrap();
        assert!(first["x"].as_scalar().is_some());
        iter.cancel();
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn pending_constraints_are_not_solutions() {
        let engine = Engine::new();
        let mut q = engine.query();
        let (x, y, z) = (q.var("x"), q.var("y"), q.var("z"));
        q.select(vec![("z", z.clone())]);
        q.goal(engine.eq(x.clone(), Term::int(3)));
        q.goal(engine.plus(x, y, z));
        let rows = q.to_vec().await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn unbound_selected_vars_stay_variables() {
        let engine = Engine::new();
        let mut q = engine.query();
        let x = q.var("x");
        let free = q.var("free");
        q.select(vec![("x", x.clone()), ("free", free.clone())]);
        q.goal(engine.eq(x, Term::int(5)));
        let rows = q.to_vec().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["x"], Term::int(5));
        assert!(rows[0]["free"].is_var());
    }
}
