use async_trait::async_trait;
use log::{debug, trace};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{internal_error, unavailable_error, StoreError};
use crate::index::{BulkOp, Hit, Index, Kind, SearchResult};
use crate::query::SearchRequest;

fn default_url() -> String {
    "http://127.0.0.1:9200".to_string()
}
fn default_index() -> String {
    "annotator".to_string()
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ElasticConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Prefix of the index names, one index per record kind.
    #[serde(default = "default_index")]
    pub index: String,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        ElasticConfig {
            url: default_url(),
            index: default_index(),
        }
    }
}

pub struct ElasticIndex {
    client: Client,
    config: ElasticConfig,
}

impl ElasticIndex {
    pub fn new(config: ElasticConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn index_name(&self, kind: Kind) -> String {
        format!("{}-{}", self.config.index, kind.name())
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.url).map_err(internal_error)?;
        url.path_segments_mut()
            .map_err(|_| StoreError::internal("Invalid Elasticsearch url"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn doc_url(
        &self,
        kind: Kind,
        id: Option<&str>,
        refresh: Option<bool>,
    ) -> Result<Url, StoreError> {
        let index = self.index_name(kind);
        let mut url = match id {
            Some(id) => self.url(&[index.as_str(), "_doc", id])?,
            None => self.url(&[index.as_str(), "_doc"])?,
        };
        if let Some(refresh) = refresh {
            url.query_pairs_mut()
                .append_pair("refresh", if refresh { "true" } else { "false" });
        }
        Ok(url)
    }

    async fn send(
        &self,
        req: RequestBuilder,
    ) -> Result<(StatusCode, Value), StoreError> {
        let res = req.send().await.map_err(unavailable_error)?;
        let status = res.status();
        let text = res.text().await.map_err(unavailable_error)?;
        trace!("elastic: {} {}", status, text);
        if status.is_server_error() {
            return Err(StoreError::unavailable(&format!(
                "Elasticsearch responded with {}",
                status
            )));
        }
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(internal_error)?
        };
        Ok((status, body))
    }

    fn json_request(&self, req: RequestBuilder, body: &Value) -> RequestBuilder {
        req.header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
    }

    /// Creates the indices with their mappings. Existing indices are kept.
    pub async fn create_indices(&self) -> Result<(), StoreError> {
        for kind in [Kind::Annotation, Kind::Document] {
            let url = self.url(&[self.index_name(kind).as_str()])?;
            let req = self.json_request(self.client.put(url), &mappings(kind));
            let (status, body) = self.send(req).await?;
            if status.is_success() {
                debug!("elastic: created index {}", self.index_name(kind));
                continue;
            }
            if body["error"]["type"] == "resource_already_exists_exception" {
                continue;
            }
            return Err(StoreError::internal(&format!(
                "Can not create index {}: {}",
                self.index_name(kind),
                body
            )));
        }
        Ok(())
    }
}

fn unexpected(status: StatusCode, body: &Value) -> StoreError {
    StoreError::internal(&format!(
        "Unexpected Elasticsearch response {}: {}",
        status, body
    ))
}

/// A search the engine refuses to run, such as sorting on an analyzed field,
/// is the client's fault.
fn search_failed(status: StatusCode, body: &Value) -> StoreError {
    if !status.is_client_error() {
        return unexpected(status, body);
    }
    let reason = body["error"]["root_cause"][0]["reason"]
        .as_str()
        .or_else(|| body["error"]["reason"].as_str())
        .unwrap_or("invalid query");
    StoreError::bad_request(&format!("Search rejected: {}", reason))
}

fn hit_from(value: &Value) -> Option<Hit> {
    Some(Hit {
        id: value["_id"].as_str()?.to_string(),
        source: value.get("_source").cloned().unwrap_or(json!({})),
    })
}

#[async_trait]
impl Index for ElasticIndex {
    async fn fetch(&self, kind: Kind, id: &str) -> Result<Option<Hit>, StoreError> {
        let url = self.doc_url(kind, Some(id), None)?;
        let (status, body) = self.send(self.client.get(url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(unexpected(status, &body));
        }
        Ok(hit_from(&body))
    }

    async fn search(
        &self,
        kind: Kind,
        request: &SearchRequest,
    ) -> Result<SearchResult, StoreError> {
        let url = self.url(&[self.index_name(kind).as_str(), "_search"])?;
        let req = self.json_request(self.client.post(url), &request.to_json());
        let (status, body) = self.send(req).await?;
        if !status.is_success() {
            return Err(search_failed(status, &body));
        }
        let total = body["hits"]["total"]["value"]
            .as_u64()
            .or_else(|| body["hits"]["total"].as_u64())
            .unwrap_or(0);
        let hits = body["hits"]["hits"]
            .as_array()
            .map(|hits| hits.iter().filter_map(hit_from).collect())
            .unwrap_or_default();
        Ok(SearchResult { total, hits })
    }

    async fn search_raw(&self, kind: Kind, body: Value) -> Result<Value, StoreError> {
        let url = self.url(&[self.index_name(kind).as_str(), "_search"])?;
        let req = self.json_request(self.client.post(url), &body);
        let (status, body) = self.send(req).await?;
        if !status.is_success() {
            return Err(search_failed(status, &body));
        }
        Ok(body)
    }

    async fn put(
        &self,
        kind: Kind,
        id: Option<&str>,
        source: Value,
        refresh: bool,
    ) -> Result<String, StoreError> {
        let url = self.doc_url(kind, id, Some(refresh))?;
        let req = match id {
            Some(_) => self.client.put(url),
            None => self.client.post(url),
        };
        let (status, body) = self.send(self.json_request(req, &source)).await?;
        if !status.is_success() {
            return Err(unexpected(status, &body));
        }
        match body["_id"].as_str() {
            Some(id) => Ok(id.to_string()),
            None => Err(unexpected(status, &body)),
        }
    }

    async fn delete(
        &self,
        kind: Kind,
        id: &str,
        refresh: bool,
    ) -> Result<bool, StoreError> {
        let url = self.doc_url(kind, Some(id), Some(refresh))?;
        let (status, body) = self.send(self.client.delete(url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(unexpected(status, &body));
        }
        Ok(true)
    }

    async fn bulk(
        &self,
        kind: Kind,
        ops: Vec<BulkOp>,
        refresh: bool,
    ) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let index = self.index_name(kind);
        let mut payload = String::new();
        for op in ops {
            match op {
                BulkOp::Index { id, source } => {
                    payload.push_str(
                        &json!({ "index": { "_index": index, "_id": id } })
                            .to_string(),
                    );
                    payload.push('\n');
                    payload.push_str(&source.to_string());
                }
                BulkOp::Delete { id } => {
                    payload.push_str(
                        &json!({ "delete": { "_index": index, "_id": id } })
                            .to_string(),
                    );
                }
            }
            payload.push('\n');
        }

        let mut url = self.url(&["_bulk"])?;
        url.query_pairs_mut()
            .append_pair("refresh", if refresh { "true" } else { "false" });
        let req = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload);
        let (status, body) = self.send(req).await?;
        if !status.is_success() || body["errors"] == Value::Bool(true) {
            return Err(unexpected(status, &body));
        }
        Ok(())
    }
}

fn link_mapping() -> Value {
    json!({
        "type": "nested",
        "properties": {
            "href": { "type": "keyword" },
            "type": { "type": "keyword" }
        }
    })
}

/// Strings are exact-match keywords unless listed as analyzed text.
fn mappings(kind: Kind) -> Value {
    let properties = match kind {
        Kind::Annotation => json!({
            "created": { "type": "date" },
            "updated": { "type": "date" },
            "text": { "type": "text" },
            "quote": { "type": "text" },
            "document": {
                "properties": {
                    "title": { "type": "text" }
                }
            }
        }),
        Kind::Document => json!({
            "created": { "type": "date" },
            "updated": { "type": "date" },
            "title": { "type": "text" },
            "link": link_mapping()
        }),
    };
    json!({
        "mappings": {
            "dynamic_templates": [{
                "strings_as_keywords": {
                    "match_mapping_type": "string",
                    "mapping": { "type": "keyword" }
                }
            }],
            "properties": properties
        }
    })
}
