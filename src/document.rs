//! Document identity.
//!
//! A document may be reachable under several uris (html page, pdf, doi).
//! Stored documents are kept as equivalence classes of uris: saving a
//! document merges every stored document sharing a uri with it, followed
//! transitively, into a single record.
//!
//! The merge is not transactional. It reads the class, writes the canonical
//! record and then deletes the rest. Two saves racing on overlapping classes
//! may each pick a different canonical record and delete the other's, so
//! links merged by one of them can be lost. Last writer wins per record.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use serde::Deserialize;

use crate::error::StoreError;
use crate::index::{BulkOp, Index, Kind};
use crate::query::{Filter, SearchRequest, Sort, SortOrder};
use crate::types::{from_hit, to_source, Document};

fn default_max_rounds() -> usize {
    5
}
fn default_page_size() -> usize {
    200
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Upper bound on lookup rounds while following shared uris.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Documents fetched per lookup round.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            max_rounds: default_max_rounds(),
            page_size: default_page_size(),
        }
    }
}

pub struct DocumentResolver {
    index: Arc<dyn Index>,
    config: ResolverConfig,
}

impl DocumentResolver {
    pub fn new(index: Arc<dyn Index>, config: ResolverConfig) -> Self {
        Self { index, config }
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Document>, StoreError> {
        match self.index.fetch(Kind::Document, id).await? {
            Some(hit) => Ok(Some(from_hit(hit)?)),
            None => Ok(None),
        }
    }

    /// Stored documents having any of `uris`, oldest first.
    async fn find_by_uris(&self, uris: &[String]) -> Result<Vec<Document>, StoreError> {
        let mut request = SearchRequest::new(Filter::nested(
            "link",
            Filter::terms("link.href", uris.to_vec()),
        ));
        request.size = self.config.page_size;
        request.sort = vec![Sort::new("updated", SortOrder::Asc)];
        let result = self.index.search(Kind::Document, &request).await?;
        if result.total > result.hits.len() as u64 {
            warn!(
                "document: lookup truncated to {} of {} documents sharing a uri",
                result.hits.len(),
                result.total
            );
        }
        result.hits.into_iter().map(from_hit).collect()
    }

    /// All stored documents transitively sharing a uri with `uris`, in the
    /// order they were discovered.
    ///
    /// Stops after `max_rounds` lookups even if new uris remain, in which
    /// case the class returned may be incomplete.
    pub async fn get_all_by_uris(
        &self,
        uris: &[String],
    ) -> Result<Vec<Document>, StoreError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = Vec::new();
        for uri in uris {
            if seen.insert(uri.clone()) {
                frontier.push(uri.clone());
            }
        }

        let mut found: Vec<Document> = Vec::new();
        let mut found_ids: HashSet<String> = HashSet::new();
        let mut rounds = 0;

        while !frontier.is_empty() {
            if rounds == self.config.max_rounds {
                warn!(
                    "document: merge capped after {} rounds, {} uris left unexplored",
                    rounds,
                    frontier.len()
                );
                break;
            }
            rounds += 1;

            let mut next = Vec::new();
            for doc in self.find_by_uris(&frontier).await? {
                let Some(id) = doc.id.clone() else { continue };
                if !found_ids.insert(id) {
                    continue;
                }
                for uri in doc.uris() {
                    if seen.insert(uri.clone()) {
                        next.push(uri);
                    }
                }
                found.push(doc);
            }
            frontier = next;
        }

        Ok(found)
    }

    /// Every uri known to name the same document as `uri`, including
    /// `uri` itself. Read-only.
    pub async fn uris_for(&self, uri: &str) -> Result<Vec<String>, StoreError> {
        let docs = self.get_all_by_uris(&[uri.to_string()]).await?;
        let mut uris = vec![uri.to_string()];
        for doc in docs {
            for other in doc.uris() {
                if !uris.contains(&other) {
                    uris.push(other);
                }
            }
        }
        Ok(uris)
    }

    pub async fn save(
        &self,
        mut doc: Document,
        refresh: bool,
    ) -> Result<Document, StoreError> {
        let now = Utc::now();
        doc.created.get_or_insert(now);
        doc.updated = Some(now);
        let source = to_source(&doc)?;
        let id = self
            .index
            .put(Kind::Document, doc.id.as_deref(), source, refresh)
            .await?;
        doc.id = Some(id);
        Ok(doc)
    }

    /// Saves `incoming` into its equivalence class and returns the single
    /// record that now represents the class.
    pub async fn resolve_and_merge(
        &self,
        incoming: Document,
        refresh: bool,
    ) -> Result<Document, StoreError> {
        let mut class = self.get_all_by_uris(&incoming.uris()).await?;

        if class.is_empty() {
            return self.save(incoming, refresh).await;
        }

        let mut canonical = class.remove(0);
        for other in &class {
            canonical.merge_links(&other.link);
            if canonical.title.is_none() {
                canonical.title = other.title.clone();
            }
        }
        canonical.merge_links(&incoming.link);
        if canonical.title.is_none() {
            canonical.title = incoming.title;
        }

        let canonical = self.save(canonical, refresh).await?;

        let duplicates: Vec<BulkOp> = class
            .into_iter()
            .filter_map(|doc| doc.id)
            .map(|id| BulkOp::Delete { id })
            .collect();
        if !duplicates.is_empty() {
            debug!(
                "document: merged {} duplicates into {:?}",
                duplicates.len(),
                canonical.id
            );
            self.index
                .bulk(Kind::Document, duplicates, refresh)
                .await?;
        }

        Ok(canonical)
    }
}
