//! REST adapter for the relogic engine
//!
//! Projects REST endpoints into relogic relations through the
//! [`relogic::DataStore`] contract: path templating, query-string WHERE
//! conditions, optional `in`-operator fan-out, field selection, and
//! auto-pagination of paged responses.
//!
//! ```no_run
//! use relogic::{Engine, RelationConfig};
//! use relogic_rest::{RestConfig, RestDataStore};
//! use std::sync::Arc;
//!
//! # fn main() -> relogic::EngineResult<()> {
//! let engine = Engine::new();
//! let store = Arc::new(RestDataStore::new(RestConfig::new("https://api.example.com"))?);
//! let _posts = engine.relation(store, "/users/:id/posts", RelationConfig::rest_defaults())?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod config;
pub mod store;

pub use config::{PaginationConfig, QueryParamFormatter, RestConfig, UrlBuilder};
pub use store::RestDataStore;
