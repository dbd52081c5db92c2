use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::index::{BulkOp, Hit, Index, Kind, SearchResult};
use crate::query::{values_at, SearchRequest, SortOrder};

/// In-process index evaluating queries directly against stored sources.
/// Writes are visible immediately, so `refresh` is a no-op.
#[derive(Default)]
pub struct MemoryIndex {
    records: Mutex<HashMap<Kind, BTreeMap<String, Value>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, kind: Kind) -> usize {
        let records = self.records.lock().await;
        records.get(&kind).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl Index for MemoryIndex {
    async fn fetch(&self, kind: Kind, id: &str) -> Result<Option<Hit>, StoreError> {
        let records = self.records.lock().await;
        let hit = records.get(&kind).and_then(|r| r.get(id)).map(|source| Hit {
            id: id.to_string(),
            source: source.clone(),
        });
        Ok(hit)
    }

    async fn search(
        &self,
        kind: Kind,
        request: &SearchRequest,
    ) -> Result<SearchResult, StoreError> {
        let records = self.records.lock().await;
        let mut hits: Vec<Hit> = records
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|(id, source)| request.matches(id, source))
            .map(|(id, source)| Hit {
                id: id.clone(),
                source: source.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            for sort in &request.sort {
                let ord = compare_fields(
                    sort_value(&a.source, &sort.field),
                    sort_value(&b.source, &sort.field),
                    sort.order,
                );
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let total = hits.len() as u64;
        let hits = hits
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .collect();
        Ok(SearchResult { total, hits })
    }

    async fn search_raw(&self, _kind: Kind, _body: Value) -> Result<Value, StoreError> {
        Err(StoreError::unsupported(
            "Raw search needs an Elasticsearch index",
        ))
    }

    async fn put(
        &self,
        kind: Kind,
        id: Option<&str>,
        source: Value,
        _refresh: bool,
    ) -> Result<String, StoreError> {
        let id = match id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let mut records = self.records.lock().await;
        records.entry(kind).or_default().insert(id.clone(), source);
        Ok(id)
    }

    async fn delete(
        &self,
        kind: Kind,
        id: &str,
        _refresh: bool,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let removed = records.get_mut(&kind).and_then(|r| r.remove(id));
        Ok(removed.is_some())
    }

    async fn bulk(
        &self,
        kind: Kind,
        ops: Vec<BulkOp>,
        _refresh: bool,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let table = records.entry(kind).or_default();
        for op in ops {
            match op {
                BulkOp::Index { id, source } => {
                    table.insert(id, source);
                }
                BulkOp::Delete { id } => {
                    table.remove(&id);
                }
            }
        }
        Ok(())
    }
}

/// Sorts on the first value at a dotted path, as the remote index does for
/// multi-valued fields.
fn sort_value<'a>(source: &'a Value, field: &str) -> Option<&'a Value> {
    values_at(source, field).into_iter().next()
}

/// Missing values sort last in either direction.
fn compare_fields(
    a: Option<&Value>,
    b: Option<&Value>,
    order: SortOrder,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = compare_values(a, b);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => {
            match (parse_time(a), parse_time(b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

fn parse_time(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}
