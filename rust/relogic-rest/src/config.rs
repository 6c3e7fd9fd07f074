//! REST adapter configuration

use relogic::{QueryParams, WhereCondition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Override hook: build the full request URL yourself.
pub type UrlBuilder = Arc<dyn Fn(&RestConfig, &QueryParams) -> String + Send + Sync>;

/// Override hook: turn one WHERE condition into query-string pairs.
pub type QueryParamFormatter =
    Arc<dyn Fn(&WhereCondition) -> Vec<(String, String)> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub limit_param: String,
    pub offset_param: String,
    /// Per-request cap; larger limits are fetched across pages
    pub max_page_size: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        PaginationConfig {
            limit_param: "limit".to_string(),
            offset_param: "offset".to_string(),
            max_page_size: 100,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RestConfig {
    pub base_url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub headers: HashMap<String, String>,
    pub pagination: PaginationConfig,
    /// Append the ground primary-key value to the path instead of the query
    pub primary_key_in_path: bool,
    /// When false, `in` conditions fan out into sequential `eq` requests
    pub supports_in_operator: bool,
    /// Emit a `fields` parameter with the select columns
    pub supports_field_selection: bool,
    #[serde(skip)]
    pub url_builder: Option<UrlBuilder>,
    #[serde(skip)]
    pub query_param_formatter: Option<QueryParamFormatter>,
}

impl Default for RestConfig {
    fn default() -> Self {
        RestConfig {
            base_url: String::new(),
            api_key: None,
            timeout_ms: 30_000,
            headers: HashMap::new(),
            pagination: PaginationConfig::default(),
            primary_key_in_path: false,
            supports_in_operator: true,
            supports_field_selection: false,
            url_builder: None,
            query_param_formatter: None,
        }
    }
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        RestConfig {
            base_url: base_url.into(),
            ..RestConfig::default()
        }
    }
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("headers", &self.headers)
            .field("pagination", &self.pagination)
            .field("primary_key_in_path", &self.primary_key_in_path)
            .field("supports_in_operator", &self.supports_in_operator)
            .field("supports_field_selection", &self.supports_field_selection)
            .field("custom_url_builder", &self.url_builder.is_some())
            .field("custom_param_formatter", &self.query_param_formatter.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RestConfig::new("https://api.example.com");
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.pagination.limit_param, "limit");
        assert_eq!(config.pagination.max_page_size, 100);
        assert!(config.supports_in_operator);
        assert!(!config.supports_field_selection);
    }

    #[test]
    fn debug_redacts_the_api_key() {
        let config = RestConfig {
            api_key: Some("secret".to_string()),
            ..RestConfig::new("https://api.example.com")
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("secret"));
    }
}
