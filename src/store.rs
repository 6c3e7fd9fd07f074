//! DataStore contract
//!
//! A relation projects an external tabular source into goals; the source
//! itself is abstracted behind [`DataStore`]. Stores receive a fully planned
//! [`QueryParams`] (relation identifier, select columns, fused WHERE
//! conditions, paging, options) and return plain rows. The engine never
//! retries; transient failures surface on the goal's output stream.

use crate::config::RelationOptions;
use crate::error::EngineResult;
use crate::registry::GoalId;
use crate::term::{Scalar, Term};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One row from a store: column name to ground scalar, never a variable.
pub type DataRow = BTreeMap<String, Scalar>;

/// A relation goal's query shape: column name to term.
pub type QueryShape = BTreeMap<String, Term>;

/// Callback the store invokes with the final backend-formatted query string.
pub type LogSink = Arc<dyn Fn(String) + Send + Sync>;

/// WHERE-clause operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    In,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::In => "in",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Like => "like",
        }
    }
}

/// WHERE-clause value: a single scalar for `eq` and the range operators, a
/// value set for `in`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WhereValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl WhereValue {
    pub fn values(&self) -> &[Scalar] {
        match self {
            WhereValue::One(v) => std::slice::from_ref(v),
            WhereValue::Many(vs) => vs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereCondition {
    pub column: String,
    pub operator: Operator,
    pub value: WhereValue,
}

impl WhereCondition {
    pub fn eq(column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        WhereCondition {
            column: column.into(),
            operator: Operator::Eq,
            value: WhereValue::One(value.into()),
        }
    }

    pub fn within(column: impl Into<String>, values: Vec<Scalar>) -> Self {
        WhereCondition {
            column: column.into(),
            operator: Operator::In,
            value: WhereValue::Many(values),
        }
    }
}

/// A planned backend query.
#[derive(Clone)]
pub struct QueryParams {
    /// Opaque relation identifier: table name, path template, ...
    pub relation: String,
    /// Union of the columns needed by the goal and its merge/cache partners
    pub select_columns: Vec<String>,
    pub conditions: Vec<WhereCondition>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub options: RelationOptions,
    /// Originating goal, for logging and correlation
    pub goal_id: GoalId,
    pub log: Option<LogSink>,
}

impl QueryParams {
    /// Invoke the log sink, if one is attached.
    pub fn log_query(&self, query: impl Into<String>) {
        if let Some(sink) = &self.log {
            sink(query.into());
        }
    }
}

impl std::fmt::Debug for QueryParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryParams")
            .field("relation", &self.relation)
            .field("select_columns", &self.select_columns)
            .field("conditions", &self.conditions)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("goal_id", &self.goal_id)
            .finish()
    }
}

/// Contract every backing store implements.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Store kind: "sql", "rest", "memory", or a custom tag.
    fn store_type(&self) -> &str;

    /// Execute one planned query. May fail with transient or permanent
    /// store errors; a conforming store honours `limit` and `offset` when
    /// present.
    async fn execute_query(&self, params: QueryParams) -> EngineResult<Vec<DataRow>>;

    /// Optional column listing, used for validation only.
    async fn columns(&self, _relation: &str) -> Option<Vec<String>> {
        None
    }

    /// Release resources. Idempotent.
    async fn close(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// Compare two scalars the way stores order them: numerically across
/// `Int`/`Float`, lexicographically for text. `None` when the kinds are not
/// comparable.
pub fn compare_scalars(a: &Scalar, b: &Scalar) -> Option<std::cmp::Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Scalar::Text(x), Scalar::Text(y)) => Some(x.cmp(y)),
            (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn where_value_views() {
        let one = WhereCondition::eq("id", 1i64);
        assert_eq!(one.value.values(), &[Scalar::Int(1)]);
        let many = WhereCondition::within("id", vec![Scalar::Int(1), Scalar::Int(2)]);
        assert_eq!(many.value.values().len(), 2);
    }

    #[test]
    fn scalar_comparison_is_numeric_across_kinds() {
        use std::cmp::Ordering;
        assert_eq!(
            compare_scalars(&Scalar::Int(1), &Scalar::Float(1.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_scalars(&Scalar::Text("a".into()), &Scalar::Text("b".into())),
            Some(Ordering::Less)
        );
        assert_eq!(compare_scalars(&Scalar::Int(1), &Scalar::Text("1".into())), None);
    }
}
