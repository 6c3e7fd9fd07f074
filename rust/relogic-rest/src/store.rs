//! REST data store
//!
//! Maps planned queries onto HTTP GETs: `:name` / `:name?` path-template
//! tokens are filled from ground `eq` conditions, `in` conditions either
//! join comma-separated or fan out into sequential `eq` requests with
//! row-wise deduplication, range operators become `column[op]=value`, and
//! paged `{results, page}` responses are followed until a short page.
//!
//! HTTP 5xx and timeouts surface as transient store failures, other 4xx as
//! permanent ones; the engine decides nothing about retries.

use crate::config::RestConfig;
use async_trait::async_trait;
use relogic::{
    DataRow, DataStore, EngineError, EngineResult, Operator, QueryParams, Scalar,
    WhereCondition, WhereValue,
};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

pub struct RestDataStore {
    config: RestConfig,
    client: reqwest::Client,
}

impl RestDataStore {
    /// Build the store, validating configuration up front.
    pub fn new(config: RestConfig) -> EngineResult<Self> {
        if config.base_url.is_empty() {
            return Err(EngineError::Config("base_url cannot be empty".to_string()));
        }
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(EngineError::Config(format!(
                "invalid base_url: {}",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {}", e)))?;
        Ok(RestDataStore { config, client })
    }

    async fn run_single(
        &self,
        params: &QueryParams,
        mut conditions: Vec<WhereCondition>,
    ) -> EngineResult<Vec<DataRow>> {
        let mut path = expand_template(&params.relation, &mut conditions);

        if self.config.primary_key_in_path {
            let pk = params
                .options
                .rest_primary_key
                .as_ref()
                .or(params.options.primary_key.as_ref());
            if let Some(pk) = pk {
                if let Some(pos) = conditions
                    .iter()
                    .position(|c| &c.column == pk && c.operator == Operator::Eq)
                {
                    let cond = conditions.remove(pos);
                    if let Some(value) = cond.value.values().first() {
                        path = format!(
                            "{}/{}",
                            path.trim_end_matches('/'),
                            urlencoding::encode(&value.to_string())
                        );
                    }
                }
            }
        }

        let mut query: Vec<(String, String)> = Vec::new();
        for cond in &conditions {
            let pairs = match &self.config.query_param_formatter {
                Some(formatter) => formatter(cond),
                None => default_query_pairs(cond),
            };
            query.extend(pairs);
        }
        if self.config.supports_field_selection && !params.select_columns.is_empty() {
            query.push(("fields".to_string(), params.select_columns.join(",")));
        }

        let target = params.limit.unwrap_or(50);
        let mut requested: Option<u64> = None;
        if let Some(limit) = params.limit {
            let page_limit = limit.min(self.config.pagination.max_page_size);
            requested = Some(page_limit);
            query.push((
                self.config.pagination.limit_param.clone(),
                page_limit.to_string(),
            ));
        }
        if let Some(offset) = params.offset {
            query.push((
                self.config.pagination.offset_param.clone(),
                offset.to_string(),
            ));
        }

        let url = match &self.config.url_builder {
            Some(builder) => builder(&self.config, params),
            None => format!("{}{}", self.config.base_url.trim_end_matches('/'), path),
        };

        let body = self.fetch(&url, &query, params).await?;
        let (mut rows, first_page) = parse_response(&body);

        // {results, page} responses auto-paginate up to `target`, advancing
        // the page and limit params until a short or empty page
        if let Some(mut current_page) = first_page {
            let mut last_batch = rows.len() as u64;
            loop {
                if rows.len() as u64 >= target {
                    rows.truncate(target as usize);
                    break;
                }
                if last_batch == 0 {
                    break;
                }
                if let Some(limit) = requested {
                    if last_batch < limit {
                        break;
                    }
                }

                let remaining = target - rows.len() as u64;
                let page_limit = remaining.min(self.config.pagination.max_page_size);
                requested = Some(page_limit);

                let mut next_query: Vec<(String, String)> = query
                    .iter()
                    .filter(|(k, _)| k != &self.config.pagination.limit_param && k != "page")
                    .cloned()
                    .collect();
                next_query.push((
                    self.config.pagination.limit_param.clone(),
                    page_limit.to_string(),
                ));
                next_query.push(("page".to_string(), (current_page + 1).to_string()));

                let next_body = self.fetch(&url, &next_query, params).await?;
                let (next_rows, next_page) = parse_response(&next_body);
                last_batch = next_rows.len() as u64;
                current_page = next_page.unwrap_or(current_page + 1);
                rows.extend(next_rows);
            }
        }

        Ok(rows)
    }

    async fn fetch(
        &self,
        url: &str,
        query: &[(String, String)],
        params: &QueryParams,
    ) -> EngineResult<Value> {
        let rendered = render_query(url, query);
        debug!(goal = %params.goal_id, url = %rendered, "rest query");
        params.log_query(rendered);

        let mut request = self.client.get(url).query(query);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout {
                    operation: "executeQuery".to_string(),
                    duration_ms: self.config.timeout_ms,
                }
            } else {
                EngineError::transient(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EngineError::transient(format!("HTTP {}", status)));
        }
        if status.is_client_error() {
            return Err(EngineError::permanent(format!("HTTP {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::permanent(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl DataStore for RestDataStore {
    fn store_type(&self) -> &str {
        "rest"
    }

    async fn execute_query(&self, params: QueryParams) -> EngineResult<Vec<DataRow>> {
        let variants = if self.config.supports_in_operator {
            vec![params.conditions.clone()]
        } else {
            expand_in_conditions(params.conditions.clone())
        };

        let mut rows: Vec<DataRow> = Vec::new();
        let mut seen: HashSet<DataRow> = HashSet::new();
        for conditions in variants {
            for row in self.run_single(&params, conditions).await? {
                if seen.insert(row.clone()) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }
}

/// Replace `:name` / `:name?` tokens with matching `eq` values
/// (percent-encoded, consumed from the conditions). Unmatched optional
/// tokens vanish; consecutive slashes collapse.
fn expand_template(relation: &str, conditions: &mut Vec<WhereCondition>) -> String {
    let mut segments: Vec<String> = Vec::new();
    for segment in relation.split('/') {
        match segment.strip_prefix(':') {
            Some(token) => {
                let name = token.strip_suffix('?').unwrap_or(token);
                let matched = conditions
                    .iter()
                    .position(|c| c.column == name && c.operator == Operator::Eq);
                if let Some(pos) = matched {
                    let cond = conditions.remove(pos);
                    if let Some(value) = cond.value.values().first() {
                        segments.push(urlencoding::encode(&value.to_string()).into_owned());
                    }
                }
            }
            None => segments.push(segment.to_string()),
        }
    }
    let joined: Vec<String> = segments.into_iter().filter(|s| !s.is_empty()).collect();
    format!("/{}", joined.join("/"))
}

/// `in` fan-out for stores without the operator: the cartesian expansion of
/// every `in` condition into `eq` variants, executed sequentially.
fn expand_in_conditions(conditions: Vec<WhereCondition>) -> Vec<Vec<WhereCondition>> {
    let mut variants: Vec<Vec<WhereCondition>> = vec![Vec::new()];
    for cond in conditions {
        if cond.operator == Operator::In {
            let values = cond.value.values().to_vec();
            let mut expanded = Vec::with_capacity(variants.len() * values.len());
            for variant in &variants {
                for value in &values {
                    let mut with = variant.clone();
                    with.push(WhereCondition {
                        column: cond.column.clone(),
                        operator: Operator::Eq,
                        value: WhereValue::One(value.clone()),
                    });
                    expanded.push(with);
                }
            }
            variants = expanded;
        } else {
            for variant in &mut variants {
                variant.push(cond.clone());
            }
        }
    }
    variants
}

fn default_query_pairs(cond: &WhereCondition) -> Vec<(String, String)> {
    match cond.operator {
        Operator::Eq => cond
            .value
            .values()
            .first()
            .map(|v| vec![(cond.column.clone(), v.to_string())])
            .unwrap_or_default(),
        Operator::In => {
            let joined = cond
                .value
                .values()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",");
            vec![(cond.column.clone(), joined)]
        }
        Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte | Operator::Like => cond
            .value
            .values()
            .first()
            .map(|v| {
                vec![(
                    format!("{}[{}]", cond.column, cond.operator.as_str()),
                    v.to_string(),
                )]
            })
            .unwrap_or_default(),
    }
}

/// Accepted response shapes: bare array, `{data: [...]}`, and
/// `{results: [...], page: n}` (the page number enables auto-pagination).
fn parse_response(body: &Value) -> (Vec<DataRow>, Option<u64>) {
    match body {
        Value::Array(items) => (rows_from(items), None),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("data") {
                (rows_from(items), None)
            } else if let Some(Value::Array(items)) = map.get("results") {
                let page = map.get("page").and_then(Value::as_u64);
                (rows_from(items), page.or(Some(1)))
            } else {
                (Vec::new(), None)
            }
        }
        _ => (Vec::new(), None),
    }
}

fn rows_from(items: &[Value]) -> Vec<DataRow> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(
                map.iter()
                    .map(|(column, value)| (column.clone(), Scalar::from(value)))
                    .collect::<DataRow>(),
            ),
            _ => None,
        })
        .collect()
}

fn render_query(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let encoded: Vec<String> = query
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k),
                urlencoding::encode(v)
            )
        })
        .collect();
    format!("{}?{}", url, encoded.join("&"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_and_consumes() {
        let mut conditions = vec![
            WhereCondition::eq("id", 7i64),
            WhereCondition::eq("title", "x"),
        ];
        let path = expand_template("/users/:id/posts", &mut conditions);
        assert_eq!(path, "/users/7/posts");
        // the id condition was consumed, title remains
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].column, "title");
    }

    #[test]
    fn optional_tokens_collapse() {
        let mut conditions = vec![];
        assert_eq!(expand_template("/users/:id?", &mut conditions), "/users");
        assert_eq!(
            expand_template("/a/:x?/b/:y?", &mut conditions),
            "/a/b"
        );
    }

    #[test]
    fn template_values_are_percent_encoded() {
        let mut conditions = vec![WhereCondition::eq("name", "a b/c")];
        let path = expand_template("/tags/:name", &mut conditions);
        assert_eq!(path, "/tags/a%20b%2Fc");
    }

    #[test]
    fn in_expansion_is_cartesian() {
        let variants = expand_in_conditions(vec![
            WhereCondition::within("id", vec![Scalar::Int(1), Scalar::Int(2)]),
            WhereCondition::eq("kind", "post"),
        ]);
        assert_eq!(variants.len(), 2);
        for variant in &variants {
            assert_eq!(variant.len(), 2);
            assert!(variant.iter().all(|c| c.operator == Operator::Eq));
        }
    }

    #[test]
    fn range_operators_bracket_the_column() {
        let pairs = default_query_pairs(&WhereCondition {
            column: "age".to_string(),
            operator: Operator::Gte,
            value: WhereValue::One(Scalar::Int(21)),
        });
        assert_eq!(pairs, vec![("age[gte]".to_string(), "21".to_string())]);
    }

    #[test]
    fn response_shapes() {
        let bare = serde_json::json!([{"id": 1}]);
        let (rows, page) = parse_response(&bare);
        assert_eq!(rows.len(), 1);
        assert_eq!(page, None);

        let wrapped = serde_json::json!({"data": [{"id": 1}, {"id": 2}]});
        let (rows, page) = parse_response(&wrapped);
        assert_eq!(rows.len(), 2);
        assert_eq!(page, None);

        let paged = serde_json::json!({"results": [{"id": 1}], "page": 3});
        let (rows, page) = parse_response(&paged);
        assert_eq!(rows.len(), 1);
        assert_eq!(page, Some(3));
    }

    #[test]
    fn rows_skip_non_objects() {
        let items = vec![
            serde_json::json!({"id": 1}),
            serde_json::json!("not a row"),
            serde_json::json!({"id": 2, "meta": {"a": 1}}),
        ];
        let rows = rows_from(&items);
        assert_eq!(rows.len(), 2);
        // nested values keep their JSON text
        assert_eq!(rows[1]["meta"], Scalar::Text("{\"a\":1}".to_string()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(RestDataStore::new(RestConfig::default()).is_err());
        assert!(RestDataStore::new(RestConfig::new("ftp://nope")).is_err());
        assert!(RestDataStore::new(RestConfig::new("https://ok.example.com")).is_ok());
    }
}
