use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use log::trace;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::authz::{authorize, permissions_filter};
use crate::document::DocumentResolver;
use crate::error::{internal_error, StoreError};
use crate::index::{Index, Kind};
use crate::permissions::{Action, Permissions};
use crate::protocol::SearchResponse;
use crate::query::{Filter, SearchRequest, Sort, SortOrder};
use crate::types::{from_hit, to_source, Annotation, Caller, UserField};

const CREATE_FILTER_FIELDS: [&str; 4] = ["updated", "created", "consumer", "id"];
const UPDATE_FILTER_FIELDS: [&str; 4] = ["updated", "created", "user", "consumer"];

fn default_true() -> bool {
    true
}
fn default_max_results() -> usize {
    200
}
fn default_results() -> usize {
    20
}
fn default_analyzed_fields() -> Vec<String> {
    vec![
        "text".to_string(),
        "quote".to_string(),
        "document.title".to_string(),
    ]
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    /// Restrict search results to what the caller may read.
    #[serde(default = "default_true")]
    pub authorization_enabled: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_results")]
    pub default_results: usize,
    /// Fields searched as full text. Everything else is an exact match.
    #[serde(default = "default_analyzed_fields")]
    pub analyzed_fields: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            authorization_enabled: true,
            max_results: default_max_results(),
            default_results: default_results(),
            analyzed_fields: default_analyzed_fields(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub terms: BTreeMap<String, String>,
    pub offset: i64,
    pub limit: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<SortOrder>,
}

impl SearchParams {
    /// Splits raw query parameters into paging/sorting and search terms.
    /// Unparsable numbers become 0.
    pub fn from_query(mut params: HashMap<String, String>) -> Self {
        let offset = params.remove("offset").map_or(0, |v| atoi(&v));
        let limit = params.remove("limit").map(|v| atoi(&v));
        let sort = params.remove("sort");
        let order = params.remove("order").map(|v| SortOrder::parse(&v));
        SearchParams {
            terms: params.into_iter().collect(),
            offset,
            limit,
            sort,
            order,
        }
    }

    pub fn term(mut self, field: &str, value: &str) -> Self {
        self.terms.insert(field.to_string(), value.to_string());
        self
    }
}

fn atoi(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

fn raw_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => atoi(s),
        _ => 0,
    }
}

/// Builds a raw Elasticsearch request from url parameters. `q` and `df`
/// make a `query_string` query, `sort` takes `field` or `field:order`,
/// `fields` is comma separated. Other parameters are ignored.
pub fn raw_query_from_params(params: HashMap<String, String>) -> Value {
    let mut body = Map::new();
    let mut query_string = Map::new();
    for (key, value) in params {
        match key.as_str() {
            "q" => {
                query_string.insert("query".to_string(), Value::String(value));
            }
            "df" => {
                query_string.insert("default_field".to_string(), Value::String(value));
            }
            "from" | "size" | "timeout" => {
                body.insert(key, Value::String(value));
            }
            "fields" => {
                let fields: Vec<Value> = value
                    .split(',')
                    .map(|f| Value::String(f.trim().to_string()))
                    .collect();
                body.insert(key, Value::Array(fields));
            }
            "sort" => {
                let clause = match value.rsplit_once(':') {
                    Some((field, order)) => json!({ field: order }),
                    None => Value::String(value),
                };
                body.insert(key, json!([clause]));
            }
            _ => {}
        }
    }
    let query = if query_string.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "query_string": query_string })
    };
    body.insert("query".to_string(), query);
    Value::Object(body)
}

/// Annotation store: search and count with permission filtering, plus the
/// create/read/update/delete workflow with per-record authorization.
pub struct Annotations {
    index: Arc<dyn Index>,
    documents: Arc<DocumentResolver>,
    config: SearchConfig,
}

impl Annotations {
    pub fn new(
        index: Arc<dyn Index>,
        documents: Arc<DocumentResolver>,
        config: SearchConfig,
    ) -> Self {
        Self {
            index,
            documents,
            config,
        }
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Annotation>, StoreError> {
        match self.index.fetch(Kind::Annotation, id).await? {
            Some(hit) => Ok(Some(from_hit(hit)?)),
            None => Ok(None),
        }
    }

    async fn build_request(
        &self,
        params: &SearchParams,
        caller: Option<&Caller>,
    ) -> Result<SearchRequest, StoreError> {
        // Refuse before doing any work for a forged caller.
        let filter = if self.config.authorization_enabled {
            Some(permissions_filter(caller)?)
        } else {
            None
        };

        let mut clauses = Vec::new();
        for (field, value) in &params.terms {
            let clause = if field == "uri" {
                let uris = self.documents.uris_for(value).await?;
                Filter::terms("uri", uris)
            } else if self.config.analyzed_fields.contains(field) {
                Filter::text(field, value)
            } else {
                Filter::term(field, value)
            };
            clauses.push(clause);
        }
        let query = if clauses.is_empty() {
            Filter::MatchAll
        } else {
            Filter::And(clauses)
        };

        let limit = params.limit.unwrap_or(self.config.default_results as i64);
        let mut request = SearchRequest::new(query);
        request.filter = filter;
        request.from = params.offset.max(0) as usize;
        request.size = limit.clamp(0, self.config.max_results as i64) as usize;
        request.sort = vec![Sort::new(
            params.sort.as_deref().unwrap_or("updated"),
            params.order.unwrap_or(SortOrder::Desc),
        )];
        Ok(request)
    }

    pub async fn search(
        &self,
        params: &SearchParams,
        caller: Option<&Caller>,
    ) -> Result<SearchResponse, StoreError> {
        let request = self.build_request(params, caller).await?;
        trace!("annotations: search {}", request.to_json());
        let result = self.index.search(Kind::Annotation, &request).await?;
        let rows = result
            .hits
            .into_iter()
            .map(from_hit)
            .collect::<Result<Vec<Annotation>, _>>()?;
        Ok(SearchResponse {
            total: result.total,
            rows,
        })
    }

    /// Number of matches for the same query and filter `search` would use.
    pub async fn count(
        &self,
        params: &SearchParams,
        caller: Option<&Caller>,
    ) -> Result<u64, StoreError> {
        let mut request = self.build_request(params, caller).await?;
        request.from = 0;
        request.size = 0;
        let result = self.index.search(Kind::Annotation, &request).await?;
        Ok(result.total)
    }

    /// Clamps paging in a raw request and restricts it to what `caller` may
    /// read.
    fn build_raw_request(
        &self,
        body: Value,
        caller: Option<&Caller>,
    ) -> Result<Value, StoreError> {
        let Value::Object(mut body) = body else {
            return Err(StoreError::bad_request("Could not parse request payload!"));
        };
        let filter = if self.config.authorization_enabled {
            Some(permissions_filter(caller)?)
        } else {
            None
        };

        if let Some(from) = body.get("from").map(raw_int) {
            body.insert("from".to_string(), json!(from.max(0)));
        }
        if let Some(size) = body.get("size").map(raw_int) {
            let size = size.clamp(0, self.config.max_results as i64);
            body.insert("size".to_string(), json!(size));
        }

        if let Some(filter) = filter {
            let query = body
                .remove("query")
                .unwrap_or_else(|| json!({ "match_all": {} }));
            body.insert(
                "query".to_string(),
                json!({ "bool": { "must": [query], "filter": [filter.to_json()] } }),
            );
        }
        Ok(Value::Object(body))
    }

    /// Runs a query written in the Elasticsearch DSL and returns the engine's
    /// response as is. The permissions filter still applies.
    pub async fn search_raw(
        &self,
        body: Value,
        caller: Option<&Caller>,
    ) -> Result<Value, StoreError> {
        let request = self.build_raw_request(body, caller)?;
        trace!("annotations: raw search {}", request);
        self.index.search_raw(Kind::Annotation, request).await
    }

    /// Saves without authorization checks. Fills in default permissions and
    /// timestamps, and merges attached document metadata.
    pub async fn save(
        &self,
        mut annotation: Annotation,
        refresh: bool,
    ) -> Result<Annotation, StoreError> {
        if annotation.permissions.is_none() {
            annotation.permissions = Some(Permissions::consumer_readable());
        }

        if let Some(document) = &annotation.document {
            if !document.link.is_empty() {
                self.documents
                    .resolve_and_merge(document.clone(), refresh)
                    .await?;
            }
        }

        let now = Utc::now();
        annotation.created.get_or_insert(now);
        annotation.updated = Some(now);

        let source = to_source(&annotation)?;
        let id = self
            .index
            .put(Kind::Annotation, annotation.id.as_deref(), source, refresh)
            .await?;
        annotation.id = Some(id);
        Ok(annotation)
    }

    pub async fn read(
        &self,
        id: &str,
        caller: Option<&Caller>,
    ) -> Result<Annotation, StoreError> {
        let annotation = self
            .fetch(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Annotation not found!"))?;
        check_action(&annotation, Action::Read, caller, "")?;
        Ok(annotation)
    }

    pub async fn create(
        &self,
        payload: Value,
        caller: Option<&Caller>,
        refresh: bool,
    ) -> Result<Annotation, StoreError> {
        let Some(caller) = caller else {
            return Err(StoreError::forbidden(
                "Cannot authorize request (create annotation)",
            ));
        };
        let fields = filter_input(payload, &CREATE_FILTER_FIELDS)?;
        let mut annotation: Annotation = parse(Value::Object(fields))?;

        annotation.consumer = Some(caller.consumer_key.clone());
        if annotation.owner_id() != Some(caller.id.as_str()) {
            annotation.user = Some(UserField::PlainId(caller.id.clone()));
        }

        self.save(annotation, refresh).await
    }

    pub async fn update(
        &self,
        id: &str,
        patch: Value,
        caller: Option<&Caller>,
        refresh: bool,
    ) -> Result<Annotation, StoreError> {
        let annotation = self.fetch(id).await?.ok_or_else(|| {
            StoreError::not_found("Annotation not found! No update performed.")
        })?;
        check_action(&annotation, Action::Update, caller, "")?;

        let fields = filter_input(patch, &UPDATE_FILTER_FIELDS)?;
        if let Some(permissions) = fields.get("permissions") {
            let permissions: Option<Permissions> = parse(permissions.clone())?;
            if permissions != annotation.permissions {
                check_action(&annotation, Action::Admin, caller, "permissions update")?;
            }
        }

        let Value::Object(mut merged) =
            serde_json::to_value(&annotation).map_err(internal_error)?
        else {
            return Err(StoreError::internal("Annotation is not an object"));
        };
        merged.extend(fields);
        merged.insert("id".to_string(), Value::String(id.to_string()));

        let updated: Annotation = parse(Value::Object(merged))?;
        self.save(updated, refresh).await
    }

    pub async fn delete(
        &self,
        id: &str,
        caller: Option<&Caller>,
        refresh: bool,
    ) -> Result<(), StoreError> {
        let annotation = self.fetch(id).await?.ok_or_else(|| {
            StoreError::not_found("Annotation not found. No delete performed.")
        })?;
        check_action(&annotation, Action::Delete, caller, "")?;
        self.index.delete(Kind::Annotation, id, refresh).await?;
        Ok(())
    }
}

fn check_action(
    annotation: &Annotation,
    action: Action,
    caller: Option<&Caller>,
    message: &str,
) -> Result<(), StoreError> {
    if authorize(annotation, action, caller) {
        return Ok(());
    }
    let detail = if message.is_empty() {
        String::new()
    } else {
        format!(" ({})", message)
    };
    Err(StoreError::forbidden(&format!(
        "Cannot authorize request{}. (action={}, user={}, consumer={})",
        detail,
        action.as_str(),
        caller.map_or("none", |c| c.id.as_str()),
        caller.map_or("none", |c| c.consumer_key.as_str()),
    )))
}

fn filter_input(payload: Value, fields: &[&str]) -> Result<Map<String, Value>, StoreError> {
    let Value::Object(mut map) = payload else {
        return Err(StoreError::bad_request("Expected a JSON object"));
    };
    for field in fields {
        map.remove(*field);
    }
    Ok(map)
}

fn parse<T>(value: Value) -> Result<T, StoreError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(value)
        .map_err(|err| StoreError::bad_request(&err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::ResolverConfig;
    use crate::elastic::{ElasticConfig, ElasticIndex};
    use crate::memory::MemoryIndex;
    use crate::permissions::{GROUP_CONSUMER, GROUP_WORLD};
    use crate::protocol::ErrorCode;
    use crate::types::{Document, Link};

    fn store(config: SearchConfig) -> (Arc<MemoryIndex>, Annotations) {
        let index = Arc::new(MemoryIndex::new());
        let documents = Arc::new(DocumentResolver::new(
            index.clone(),
            ResolverConfig::default(),
        ));
        (index.clone(), Annotations::new(index, documents, config))
    }

    fn owned(user: &str, consumer: &str, read: &[&str]) -> Annotation {
        Annotation {
            user: Some(UserField::PlainId(user.to_string())),
            consumer: Some(consumer.to_string()),
            permissions: Some(Permissions {
                read: read.iter().map(|s| s.to_string()).collect(),
                ..Permissions::default()
            }),
            ..Annotation::default()
        }
    }

    #[test]
    fn params_parse_leniently() {
        let raw: HashMap<String, String> = [
            ("offset", "-10"),
            ("limit", "lots"),
            ("order", "asc"),
            ("text", "hello"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let params = SearchParams::from_query(raw);
        assert_eq!(params.offset, -10);
        assert_eq!(params.limit, Some(0));
        assert_eq!(params.order, Some(SortOrder::Asc));
        assert_eq!(params.terms.get("text").map(String::as_str), Some("hello"));
        assert!(!params.terms.contains_key("limit"));
    }

    #[tokio::test]
    async fn paging_clamps() {
        let (_, annotations) = store(SearchConfig {
            max_results: 3,
            ..SearchConfig::default()
        });
        for _ in 0..5 {
            annotations
                .save(owned("alice", "c1", &[GROUP_WORLD]), true)
                .await
                .unwrap();
        }

        let negative = SearchParams {
            limit: Some(-5),
            ..SearchParams::default()
        };
        let res = annotations.search(&negative, None).await.unwrap();
        assert!(res.rows.is_empty());
        assert_eq!(res.total, 5);

        let huge = SearchParams {
            limit: Some(100_000),
            ..SearchParams::default()
        };
        assert_eq!(annotations.search(&huge, None).await.unwrap().rows.len(), 3);

        let behind = SearchParams {
            offset: -10,
            limit: Some(2),
            ..SearchParams::default()
        };
        let from_start = SearchParams {
            limit: Some(2),
            ..SearchParams::default()
        };
        let a = annotations.search(&behind, None).await.unwrap();
        let b = annotations.search(&from_start, None).await.unwrap();
        let ids = |r: &SearchResponse| r.rows.iter().map(|a| a.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[tokio::test]
    async fn default_limit_and_most_recent_first() {
        let (_, annotations) = store(SearchConfig::default());
        for _ in 0..25 {
            annotations
                .save(owned("alice", "c1", &[GROUP_WORLD]), true)
                .await
                .unwrap();
        }
        let res = annotations
            .search(&SearchParams::default(), None)
            .await
            .unwrap();
        assert_eq!(res.rows.len(), 20);
        let updated: Vec<_> = res.rows.iter().map(|a| a.updated.unwrap()).collect();
        assert!(updated.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn search_and_count_apply_permissions() {
        let (_, annotations) = store(SearchConfig::default());
        annotations
            .save(owned("alice", "c1", &[GROUP_WORLD]), true)
            .await
            .unwrap();
        annotations
            .save(owned("alice", "c1", &[GROUP_CONSUMER]), true)
            .await
            .unwrap();
        annotations
            .save(owned("alice", "c2", &["bob"]), true)
            .await
            .unwrap();

        let params = SearchParams::default();
        let bob_c1 = Caller::new("bob", "c1");
        let bob_c2 = Caller::new("bob", "c2");
        for (caller, expected) in [(None, 1), (Some(&bob_c1), 2), (Some(&bob_c2), 2)] {
            let res = annotations.search(&params, caller).await.unwrap();
            assert_eq!(res.rows.len(), expected as usize);
            assert_eq!(res.total, expected as u64);
            assert_eq!(annotations.count(&params, caller).await.unwrap(), expected as u64);
        }
    }

    #[tokio::test]
    async fn spoofed_search_is_an_error_not_empty() {
        let (_, annotations) = store(SearchConfig::default());
        let evil = Caller::new("group:__world__", "c1");
        let params = SearchParams::default();
        let err = annotations.search(&params, Some(&evil)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FilterConstructionFailed);
        let err = annotations.count(&params, Some(&evil)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FilterConstructionFailed);
    }

    #[tokio::test]
    async fn disabled_authorization_skips_filter() {
        let (_, annotations) = store(SearchConfig {
            authorization_enabled: false,
            ..SearchConfig::default()
        });
        annotations.save(owned("alice", "c1", &[]), true).await.unwrap();
        let res = annotations
            .search(&SearchParams::default(), None)
            .await
            .unwrap();
        assert_eq!(res.total, 1);
    }

    #[test]
    fn raw_request_clamps_paging_and_adds_filter() {
        let (_, annotations) = store(SearchConfig::default());
        let alice = Caller::new("alice", "c1");
        let query = json!({ "term": { "tags": "foo" } });
        let request = annotations
            .build_raw_request(
                json!({ "from": -4, "size": 100000, "query": query.clone() }),
                Some(&alice),
            )
            .unwrap();
        assert_eq!(request["from"], json!(0));
        assert_eq!(request["size"], json!(200));
        assert_eq!(request["query"]["bool"]["must"], json!([query]));
        assert_eq!(
            request["query"]["bool"]["filter"],
            json!([permissions_filter(Some(&alice)).unwrap().to_json()])
        );

        let request = annotations
            .build_raw_request(json!({ "size": "7", "from": "x" }), None)
            .unwrap();
        assert_eq!(request["size"], json!(7));
        assert_eq!(request["from"], json!(0));
        assert_eq!(request["query"]["bool"]["must"], json!([{ "match_all": {} }]));
    }

    #[test]
    fn raw_request_without_authorization_is_untouched() {
        let (_, annotations) = store(SearchConfig {
            authorization_enabled: false,
            ..SearchConfig::default()
        });
        let body = json!({ "query": { "match_all": {} }, "size": 5 });
        let request = annotations.build_raw_request(body.clone(), None).unwrap();
        assert_eq!(request, body);
    }

    #[tokio::test]
    async fn raw_search_refuses_forged_callers() {
        let (_, annotations) = store(SearchConfig::default());
        let evil = Caller::new("group:__world__", "c1");
        let err = annotations
            .search_raw(json!({ "size": 10 }), Some(&evil))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FilterConstructionFailed);

        let err = annotations.search_raw(json!([1, 2]), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);

        // the in-memory index has no query DSL of its own
        let err = annotations.search_raw(json!({}), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unsupported);
    }

    #[test]
    fn raw_query_from_url_params() {
        let params: HashMap<String, String> = [
            ("q", "text:hello"),
            ("df", "text"),
            ("sort", "updated:desc"),
            ("fields", "text, quote"),
            ("size", "3"),
            ("other", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let body = raw_query_from_params(params);
        assert_eq!(
            body,
            json!({
                "query": { "query_string": { "query": "text:hello", "default_field": "text" } },
                "sort": [{ "updated": "desc" }],
                "fields": ["text", "quote"],
                "size": "3"
            })
        );
        assert_eq!(
            raw_query_from_params(HashMap::new()),
            json!({ "query": { "match_all": {} } })
        );
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable_not_missing() {
        let index: Arc<dyn Index> = Arc::new(ElasticIndex::new(ElasticConfig {
            url: "http://127.0.0.1:1".to_string(),
            index: "annotator".to_string(),
        }));
        let documents = Arc::new(DocumentResolver::new(
            index.clone(),
            ResolverConfig::default(),
        ));
        let annotations = Annotations::new(index, documents, SearchConfig::default());

        let err = annotations.read("id", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
        let err = annotations
            .search(&SearchParams::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
        let err = annotations
            .search(&SearchParams::default().term("uri", "http://a"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn terms_are_exact_unless_analyzed() {
        let (_, annotations) = store(SearchConfig::default());
        let mut ann = owned("alice", "c1", &[GROUP_WORLD]);
        ann.extra.insert("text".into(), json!("Hello World"));
        ann.extra.insert("tags".into(), json!(["Foo", "bar"]));
        annotations.save(ann, true).await.unwrap();

        let search = |params: SearchParams| {
            let annotations = &annotations;
            async move { annotations.search(&params, None).await.unwrap().total }
        };
        assert_eq!(search(SearchParams::default().term("text", "world")).await, 1);
        assert_eq!(search(SearchParams::default().term("tags", "Foo")).await, 1);
        assert_eq!(search(SearchParams::default().term("tags", "foo")).await, 0);
        assert_eq!(search(SearchParams::default().term("user", "alice")).await, 1);
    }

    #[tokio::test]
    async fn uri_search_covers_other_representations() {
        let (_, annotations) = store(SearchConfig::default());
        let mut html = owned("alice", "c1", &[GROUP_WORLD]);
        html.uri = Some("http://a/".into());
        html.document = Some(Document {
            link: vec![
                Link::new("http://a/", "text/html"),
                Link::new("http://a/a.pdf", "application/pdf"),
            ],
            ..Document::default()
        });
        annotations.save(html, true).await.unwrap();

        let mut pdf = owned("bob", "c1", &[GROUP_WORLD]);
        pdf.uri = Some("http://a/a.pdf".into());
        annotations.save(pdf, true).await.unwrap();

        let mut other = owned("bob", "c1", &[GROUP_WORLD]);
        other.uri = Some("http://b/".into());
        annotations.save(other, true).await.unwrap();

        let params = SearchParams::default().term("uri", "http://a/a.pdf");
        assert_eq!(annotations.search(&params, None).await.unwrap().total, 2);
        let params = SearchParams::default().term("uri", "http://b/");
        assert_eq!(annotations.search(&params, None).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn save_merges_document_metadata() {
        let (index, annotations) = store(SearchConfig::default());
        for hrefs in [["A", "B"], ["B", "C"]] {
            let mut ann = owned("alice", "c1", &[]);
            ann.document = Some(Document {
                link: hrefs.iter().map(|h| Link::new(h, "text/html")).collect(),
                ..Document::default()
            });
            annotations.save(ann, true).await.unwrap();
        }
        assert_eq!(index.len(Kind::Document).await, 1);
    }

    #[tokio::test]
    async fn default_permissions_only_when_absent() {
        let (_, annotations) = store(SearchConfig::default());
        let mut ann = owned("alice", "c1", &[]);
        ann.permissions = None;
        let saved = annotations.save(ann, true).await.unwrap();
        assert_eq!(saved.permissions, Some(Permissions::consumer_readable()));

        let explicit = annotations.save(owned("alice", "c1", &[]), true).await.unwrap();
        assert_eq!(explicit.permissions, Some(Permissions::empty()));
    }

    #[tokio::test]
    async fn create_stamps_owner_and_consumer() {
        let (_, annotations) = store(SearchConfig::default());
        let alice = Caller::new("alice", "c1");
        let created = annotations
            .create(
                json!({ "id": "forged", "user": "mallory", "consumer": "c9", "text": "hi" }),
                Some(&alice),
                true,
            )
            .await
            .unwrap();
        assert_ne!(created.id.as_deref(), Some("forged"));
        assert_eq!(created.owner_id(), Some("alice"));
        assert_eq!(created.consumer.as_deref(), Some("c1"));
        assert!(created.created.is_some());

        let err = annotations
            .create(json!({ "text": "hi" }), None, true)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthorizationDenied);
    }

    #[tokio::test]
    async fn read_update_delete_are_checked() {
        let (_, annotations) = store(SearchConfig::default());
        let alice = Caller::new("alice", "c1");
        let bob = Caller::new("bob", "c1");
        let created = annotations
            .create(
                json!({ "text": "hi", "permissions": { "read": ["bob"], "update": ["bob"] } }),
                Some(&alice),
                true,
            )
            .await
            .unwrap();
        let id = created.id.clone().unwrap();

        assert!(annotations.read(&id, Some(&bob)).await.is_ok());
        let err = annotations.read(&id, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthorizationDenied);
        let err = annotations.read("missing", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let updated = annotations
            .update(&id, json!({ "text": "edited", "user": "bob" }), Some(&bob), true)
            .await
            .unwrap();
        assert_eq!(updated.extra["text"], json!("edited"));
        assert_eq!(updated.owner_id(), Some("alice"));
        assert_eq!(updated.created, created.created);

        // bob may update but not change permissions
        let err = annotations
            .update(&id, json!({ "permissions": { "read": [GROUP_WORLD] } }), Some(&bob), true)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthorizationDenied);
        annotations
            .update(&id, json!({ "permissions": { "read": [GROUP_WORLD] } }), Some(&alice), true)
            .await
            .unwrap();

        let err = annotations.delete(&id, Some(&bob), true).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthorizationDenied);
        annotations.delete(&id, Some(&alice), true).await.unwrap();
        assert!(annotations.fetch(&id).await.unwrap().is_none());
    }
}
