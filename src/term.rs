//! Term representation
//!
//! A `Term` is the value domain of the engine: logic variables, ground
//! scalars, logic lists (`Cons`/`Nil`), and finite ordered sequences.
//! Equality on ground terms is structural; floats compare bitwise so scalars
//! can live in hash sets (WHERE-value collection relies on this).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a logic variable.
pub type VarId = String;

/// A ground scalar value.
///
/// `Int` is kept distinct from `Float`: structural equality means `1` and
/// `1.0` are different terms, even though the stores may compare them
/// numerically in WHERE clauses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view, for range comparisons and arithmetic constraints.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(n) => Some(*n as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            // bitwise: NaN == NaN inside the engine
            (Scalar::Float(a), Scalar::Float(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl std::hash::Hash for Scalar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Null => {}
            Scalar::Bool(b) => b.hash(state),
            Scalar::Int(n) => n.hash(state),
            Scalar::Float(f) => f.to_bits().hash(state),
            Scalar::Text(s) => s.hash(state),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(s: &Scalar) -> u8 {
            match s {
                Scalar::Null => 0,
                Scalar::Bool(_) => 1,
                Scalar::Int(_) => 2,
                Scalar::Float(_) => 3,
                Scalar::Text(_) => 4,
            }
        }
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

/// JSON values map onto scalars; nested structures keep their JSON text,
/// since a data row cell must be a scalar.
impl From<&serde_json::Value> for Scalar {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Scalar::Null,
            serde_json::Value::Bool(b) => Scalar::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }
}

/// A logic term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Logic variable
    Var(VarId),
    /// Ground scalar
    Scalar(Scalar),
    /// Logic list cell
    Cons(Arc<Term>, Arc<Term>),
    /// Empty logic list
    Nil,
    /// Finite ordered sequence; unifies pairwise with a sequence of equal length
    Seq(Arc<Vec<Term>>),
}

impl Term {
    pub fn var(id: impl Into<VarId>) -> Self {
        Term::Var(id.into())
    }

    pub fn int(n: i64) -> Self {
        Term::Scalar(Scalar::Int(n))
    }

    pub fn float(f: f64) -> Self {
        Term::Scalar(Scalar::Float(f))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Term::Scalar(Scalar::Text(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        Term::Scalar(Scalar::Bool(b))
    }

    pub fn null() -> Self {
        Term::Scalar(Scalar::Null)
    }

    pub fn seq(items: Vec<Term>) -> Self {
        Term::Seq(Arc::new(items))
    }

    /// Build a logic list (`Cons` chain terminated by `Nil`).
    pub fn list(items: Vec<Term>) -> Self {
        items.into_iter().rev().fold(Term::Nil, |tail, head| {
            Term::Cons(Arc::new(head), Arc::new(tail))
        })
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    /// Ground scalar view; composites and variables return `None`.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Term::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Collect the elements of a logic list, if this term is a proper list.
    pub fn list_elements(&self) -> Option<Vec<Term>> {
        let mut out = Vec::new();
        let mut cur = self;
        loop {
            match cur {
                Term::Nil => return Some(out),
                Term::Cons(head, tail) => {
                    out.push((**head).clone());
                    cur = tail;
                }
                _ => return None,
            }
        }
    }

    /// Whether `var` occurs anywhere inside this term.
    pub(crate) fn occurs(&self, var: &str) -> bool {
        match self {
            Term::Var(v) => v == var,
            Term::Scalar(_) | Term::Nil => false,
            Term::Cons(head, tail) => head.occurs(var) || tail.occurs(var),
            Term::Seq(items) => items.iter().any(|t| t.occurs(var)),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "?{}", v),
            Term::Scalar(s) => write!(f, "{}", s),
            Term::Nil => write!(f, "()"),
            Term::Cons(_, _) => {
                write!(f, "(")?;
                let mut cur = self;
                let mut first = true;
                loop {
                    match cur {
                        Term::Cons(head, tail) => {
                            if !first {
                                write!(f, " ")?;
                            }
                            write!(f, "{}", head)?;
                            first = false;
                            cur = tail;
                        }
                        Term::Nil => break,
                        other => {
                            write!(f, " . {}", other)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Term::Seq(items) => {
                write!(f, "[")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<Scalar> for Term {
    fn from(s: Scalar) -> Self {
        Term::Scalar(s)
    }
}

impl From<i64> for Term {
    fn from(n: i64) -> Self {
        Term::int(n)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::text(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn list_round_trip() {
        let l = Term::list(vec![Term::int(1), Term::int(2), Term::int(3)]);
        assert_eq!(
            l.list_elements(),
            Some(vec![Term::int(1), Term::int(2), Term::int(3)])
        );
        assert_eq!(Term::Nil.list_elements(), Some(vec![]));
    }

    #[test]
    fn improper_list_is_not_a_list() {
        let t = Term::Cons(Arc::new(Term::int(1)), Arc::new(Term::int(2)));
        assert_eq!(t.list_elements(), None);
    }

    #[test]
    fn scalar_structural_equality() {
        assert_eq!(Scalar::Int(1), Scalar::Int(1));
        assert_ne!(Scalar::Int(1), Scalar::Float(1.0));
        assert_eq!(Scalar::Float(f64::NAN), Scalar::Float(f64::NAN));
        assert_ne!(Scalar::Text("a".into()), Scalar::Null);
    }

    #[test]
    fn occurs_check_descends_into_composites() {
        let t = Term::list(vec![Term::int(1), Term::var("x")]);
        assert!(t.occurs("x"));
        assert!(!t.occurs("y"));
    }

    #[test]
    fn scalars_from_json() {
        assert_eq!(Scalar::from(&serde_json::json!(1)), Scalar::Int(1));
        assert_eq!(Scalar::from(&serde_json::json!(1.5)), Scalar::Float(1.5));
        assert_eq!(
            Scalar::from(&serde_json::json!("x")),
            Scalar::Text("x".to_string())
        );
        assert_eq!(Scalar::from(&serde_json::json!(null)), Scalar::Null);
        assert_eq!(
            Scalar::from(&serde_json::json!({"a": 1})),
            Scalar::Text("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn display_forms() {
        let l = Term::list(vec![Term::int(1), Term::text("a")]);
        assert_eq!(l.to_string(), "(1 a)");
        assert_eq!(Term::var("u").to_string(), "?u");
        assert_eq!(Term::seq(vec![Term::int(1)]).to_string(), "[1]");
    }
}
