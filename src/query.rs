//! Engine-neutral boolean queries.
//!
//! A [`Filter`] renders to the Elasticsearch query DSL for the remote index
//! and can also be evaluated in-process against a stored JSON source, which
//! is what [`crate::memory::MemoryIndex`] does. Both readings must agree:
//! term clauses are exact matches, arrays match when any element matches,
//! and analyzed `Match` clauses match when any token is shared.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    MatchAll,
    Ids(Vec<String>),
    Term { field: String, value: String },
    Terms { field: String, values: Vec<String> },
    /// Full-text match on an analyzed field.
    Match { field: String, text: String },
    /// Applies the inner filter to each object of the array at `path`.
    Nested { path: String, filter: Box<Filter> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn term(field: &str, value: &str) -> Self {
        Filter::Term {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn terms(field: &str, values: Vec<String>) -> Self {
        Filter::Terms {
            field: field.to_string(),
            values,
        }
    }

    pub fn text(field: &str, text: &str) -> Self {
        Filter::Match {
            field: field.to_string(),
            text: text.to_string(),
        }
    }

    pub fn nested(path: &str, filter: Filter) -> Self {
        Filter::Nested {
            path: path.to_string(),
            filter: Box::new(filter),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::MatchAll => json!({ "match_all": {} }),
            Filter::Ids(ids) => json!({ "ids": { "values": ids } }),
            Filter::Term { field, value } => {
                json!({ "term": { field.as_str(): value } })
            }
            Filter::Terms { field, values } => {
                json!({ "terms": { field.as_str(): values } })
            }
            Filter::Match { field, text } => {
                json!({ "match": { field.as_str(): text } })
            }
            Filter::Nested { path, filter } => json!({
                "nested": { "path": path, "query": filter.to_json() }
            }),
            Filter::And(clauses) => json!({
                "bool": {
                    "must": clauses.iter().map(Filter::to_json).collect::<Vec<_>>()
                }
            }),
            Filter::Or(clauses) => json!({
                "bool": {
                    "should": clauses.iter().map(Filter::to_json).collect::<Vec<_>>(),
                    "minimum_should_match": 1
                }
            }),
        }
    }

    /// Evaluates the filter against a stored record.
    pub fn matches(&self, id: &str, source: &Value) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::Ids(ids) => ids.iter().any(|i| i == id),
            Filter::Term { field, value } => values_at(source, field)
                .into_iter()
                .any(|v| term_eq(v, value)),
            Filter::Terms { field, values } => values_at(source, field)
                .into_iter()
                .any(|v| values.iter().any(|value| term_eq(v, value))),
            Filter::Match { field, text } => {
                let wanted = tokens(text);
                values_at(source, field).into_iter().any(|v| match v {
                    Value::String(s) => {
                        tokens(s).iter().any(|t| wanted.contains(t))
                    }
                    _ => false,
                })
            }
            Filter::Nested { path, filter } => values_at(source, path)
                .into_iter()
                .any(|item| filter.matches(id, &wrap(path, item))),
            Filter::And(clauses) => clauses.iter().all(|f| f.matches(id, source)),
            Filter::Or(clauses) => clauses.iter().any(|f| f.matches(id, source)),
        }
    }
}

/// Collects the values at a dotted path, descending through arrays the way
/// an inverted index flattens them.
pub(crate) fn values_at<'a>(source: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![source];
    for key in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(v) = map.get(key) {
                        next.push(v);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(v) = item.get(key) {
                            next.push(v);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect(),
            v => vec![v],
        })
        .collect()
}

fn wrap(path: &str, item: &Value) -> Value {
    path.rsplit('.')
        .fold(item.clone(), |inner, key| json!({ key: inner }))
}

fn term_eq(stored: &Value, wanted: &str) -> bool {
    match stored {
        Value::String(s) => s == wanted,
        Value::Number(n) => n.to_string() == wanted,
        Value::Bool(b) => b.to_string() == wanted,
        _ => false,
    }
}

pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything but "asc" sorts descending.
    pub fn parse(order: &str) -> Self {
        if order.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn new(field: &str, order: SortOrder) -> Self {
        Sort {
            field: field.to_string(),
            order,
        }
    }
}

/// A compiled request: `query` must match and, when present, so must the
/// restricting `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Filter,
    pub filter: Option<Filter>,
    pub from: usize,
    pub size: usize,
    pub sort: Vec<Sort>,
}

impl SearchRequest {
    pub fn new(query: Filter) -> Self {
        SearchRequest {
            query,
            filter: None,
            from: 0,
            size: 0,
            sort: Vec::new(),
        }
    }

    pub fn matches(&self, id: &str, source: &Value) -> bool {
        self.query.matches(id, source)
            && self.filter.as_ref().map_or(true, |f| f.matches(id, source))
    }

    pub fn to_json(&self) -> Value {
        let mut bool_query = json!({ "must": [self.query.to_json()] });
        if let Some(filter) = &self.filter {
            bool_query["filter"] = json!([filter.to_json()]);
        }
        let sort: Vec<Value> = self
            .sort
            .iter()
            .map(|s| {
                json!({ s.field.as_str(): {
                    "order": s.order.as_str(),
                    "unmapped_type": "keyword"
                } })
            })
            .collect();
        json!({
            "query": { "bool": bool_query },
            "from": self.from,
            "size": self.size,
            "sort": sort,
            "track_total_hits": true
        })
    }
}
