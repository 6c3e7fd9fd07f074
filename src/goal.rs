//! Goals and combinators
//!
//! A goal is a pure function from a stream of substitutions to a stream of
//! substitutions, with an observable identity registered at construction.
//! `and` folds left through serialised `flat_map`, `or` multicasts the input
//! and merges branch outputs, `not` is negation-as-failure by bounded
//! probing. Conjunctions and disjunctions tag the substitutions they thread
//! with their child goal ids so relation goals further down can discover
//! their siblings.

use crate::engine::Engine;
use crate::registry::GoalId;
use crate::stream::{LStream, SubstStream};
use crate::subst::Substitution;
use crate::term::Term;
use crate::unify::unify;
use std::sync::Arc;

type GoalBody = Arc<dyn Fn(SubstStream) -> SubstStream + Send + Sync>;

/// A registered goal. Cloning shares the body and identity.
#[derive(Clone)]
pub struct Goal {
    id: GoalId,
    name: Arc<str>,
    body: GoalBody,
}

impl Goal {
    pub(crate) fn new(id: GoalId, name: impl AsRef<str>, body: GoalBody) -> Self {
        Goal {
            id,
            name: Arc::from(name.as_ref()),
            body,
        }
    }

    pub fn id(&self) -> GoalId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build this goal's output stream for the given input stream. Cold:
    /// nothing runs until the result is subscribed.
    pub fn apply(&self, input: SubstStream) -> SubstStream {
        (self.body)(input)
    }
}

impl std::fmt::Debug for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Goal({} {})", self.id, self.name)
    }
}

impl Engine {
    /// Unification goal: emits the unified substitution, or nothing on clash.
    pub fn eq(&self, a: Term, b: Term) -> Goal {
        let id = self.registry().register(format!("eq({}, {})", a, b), None);
        Goal::new(
            id,
            "eq",
            Arc::new(move |input: SubstStream| {
                let a = a.clone();
                let b = b.clone();
                input.flat_map(move |s| match unify(&a, &b, &s) {
                    Some(next) => LStream::one(next),
                    None => LStream::empty(),
                })
            }),
        )
    }

    /// Conjunction: left fold, each goal consuming the previous one's output.
    pub fn and(&self, goals: Vec<Goal>) -> Goal {
        let id = self.registry().register("and", None);
        let child_ids: Arc<Vec<GoalId>> = Arc::new(goals.iter().map(Goal::id).collect());
        let goals = Arc::new(goals);
        Goal::new(
            id,
            "and",
            Arc::new(move |input: SubstStream| {
                let ids = child_ids.clone();
                let tagged = input.map(move |s: Substitution| s.with_conj_group(&ids));
                goals
                    .iter()
                    .fold(tagged, |acc, goal| goal.apply(acc))
            }),
        )
    }

    /// Disjunction: every branch independently tries each input substitution;
    /// outputs merge in arrival order.
    pub fn or(&self, goals: Vec<Goal>) -> Goal {
        let id = self.registry().register("or", None);
        let child_ids: Arc<Vec<GoalId>> = Arc::new(goals.iter().map(Goal::id).collect());
        let goals = Arc::new(goals);
        Goal::new(
            id,
            "or",
            Arc::new(move |input: SubstStream| {
                let ids = child_ids.clone();
                let goals = goals.clone();
                LStream::new(move |out| async move {
                    let tagged = input.map(move |s: Substitution| s.extend_group_all(&ids));
                    let shared = tagged.share();
                    let branches: Vec<SubstStream> =
                        goals.iter().map(|g| g.apply(shared.stream())).collect();
                    LStream::merge(branches).pipe(&out).await;
                })
            }),
        )
    }

    /// Negation-as-failure: passes a substitution through iff the inner goal
    /// emits nothing for it. Probing is bounded to the first emission.
    pub fn not(&self, goal: Goal) -> Goal {
        let id = self
            .registry()
            .register(format!("not({})", goal.name()), None);
        Goal::new(
            id,
            "not",
            Arc::new(move |input: SubstStream| {
                let goal = goal.clone();
                input.flat_map(move |s| {
                    let goal = goal.clone();
                    LStream::new(move |out| async move {
                        match goal.apply(LStream::one(s.clone())).first().await {
                            Ok(None) => {
                                let _ = out.emit(s).await;
                            }
                            Ok(Some(_)) => {}
                            Err(e) => {
                                let _ = out.error(e).await;
                            }
                        }
                    })
                })
            }),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::term::Scalar;

    #[tokio::test]
    async fn eq_binds_a_variable() {
        let engine = Engine::new();
        let goal = engine.eq(Term::var("x"), Term::int(42));
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].walk(&Term::var("x")), Term::int(42));
    }

    #[tokio::test]
    async fn eq_clash_emits_nothing() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::int(1)),
            engine.eq(Term::var("x"), Term::int(2)),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn and_threads_left_to_right() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.eq(Term::var("x"), Term::int(1)),
            engine.eq(Term::var("y"), Term::var("x")),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].walk(&Term::var("y")), Term::int(1));
    }

    #[tokio::test]
    async fn or_tries_every_branch() {
        let engine = Engine::new();
        let goal = engine.or(vec![
            engine.eq(Term::var("x"), Term::int(1)),
            engine.eq(Term::var("x"), Term::int(2)),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        let mut values: Vec<Term> = out.iter().map(|s| s.walk(&Term::var("x"))).collect();
        values.sort_by_key(|t| match t {
            Term::Scalar(Scalar::Int(n)) => *n,
            _ => i64::MAX,
        });
        assert_eq!(values, vec![Term::int(1), Term::int(2)]);
    }

    #[tokio::test]
    async fn and_of_ors_has_product_cardinality() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.or(vec![
                engine.eq(Term::var("x"), Term::int(1)),
                engine.eq(Term::var("x"), Term::int(2)),
            ]),
            engine.or(vec![
                engine.eq(Term::var("y"), Term::text("a")),
                engine.eq(Term::var("y"), Term::text("b")),
            ]),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 4);
        let mut pairs: Vec<(Term, Term)> = out
            .iter()
            .map(|s| (s.walk(&Term::var("x")), s.walk(&Term::var("y"))))
            .collect();
        pairs.sort_by_key(|(a, b)| (format!("{}", a), format!("{}", b)));
        assert_eq!(
            pairs,
            vec![
                (Term::int(1), Term::text("a")),
                (Term::int(1), Term::text("b")),
                (Term::int(2), Term::text("a")),
                (Term::int(2), Term::text("b")),
            ]
        );
    }

    #[tokio::test]
    async fn not_drops_provable_substitutions() {
        let engine = Engine::new();
        let goal = engine.and(vec![
            engine.or(vec![
                engine.eq(Term::var("x"), Term::int(1)),
                engine.eq(Term::var("x"), Term::int(2)),
            ]),
            engine.not(engine.eq(Term::var("x"), Term::int(1))),
        ]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].walk(&Term::var("x")), Term::int(2));
    }

    #[tokio::test]
    async fn conjunction_tags_sibling_groups() {
        let engine = Engine::new();
        let left = engine.eq(Term::var("x"), Term::int(1));
        let right = engine.eq(Term::var("y"), Term::int(2));
        let left_id = left.id();
        let right_id = right.id();
        let goal = engine.and(vec![left, right]);
        let out = engine.run(&goal).to_vec().await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].group_all().contains(&left_id));
        assert!(out[0].group_all().contains(&right_id));
        assert_eq!(out[0].group_conj(), &[left_id, right_id]);
    }
}
