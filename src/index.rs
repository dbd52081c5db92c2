use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::query::SearchRequest;

/// Record types kept in the search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Annotation,
    Document,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Annotation => "annotation",
            Kind::Document => "document",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub total: u64,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone)]
pub enum BulkOp {
    Index { id: String, source: Value },
    Delete { id: String },
}

/// The external search engine.
///
/// `refresh` asks for the write to be visible to searches before the call
/// returns. Without it a search issued right after a write may miss it.
///
/// Failures to reach the engine are reported as `Unavailable`; a record
/// that is simply missing is `Ok(None)` from `fetch` and `Ok(false)` from
/// `delete`.
#[async_trait]
pub trait Index: Send + Sync {
    async fn fetch(&self, kind: Kind, id: &str) -> Result<Option<Hit>, StoreError>;

    async fn search(
        &self,
        kind: Kind,
        request: &SearchRequest,
    ) -> Result<SearchResult, StoreError>;

    /// Runs a query written in the engine's own DSL and returns the engine's
    /// response unchanged. Engines without such a DSL answer `Unsupported`.
    async fn search_raw(&self, kind: Kind, body: Value) -> Result<Value, StoreError>;

    /// Indexes `source`, under `id` when given or a fresh id otherwise.
    /// Returns the id.
    async fn put(
        &self,
        kind: Kind,
        id: Option<&str>,
        source: Value,
        refresh: bool,
    ) -> Result<String, StoreError>;

    async fn delete(
        &self,
        kind: Kind,
        id: &str,
        refresh: bool,
    ) -> Result<bool, StoreError>;

    /// Not atomic: operations are applied in order and a failure may leave
    /// earlier ones applied.
    async fn bulk(
        &self,
        kind: Kind,
        ops: Vec<BulkOp>,
        refresh: bool,
    ) -> Result<(), StoreError>;
}
