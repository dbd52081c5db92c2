use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{info, trace};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Duration;

use crate::annotation::{raw_query_from_params, Annotations, SearchConfig, SearchParams};
use crate::document::{DocumentResolver, ResolverConfig};
use crate::elastic::{ElasticConfig, ElasticIndex};
use crate::error::{internal_error, StoreError};
use crate::identity::IdentityResolver;
use crate::index::Index;
use crate::memory::MemoryIndex;
use crate::protocol::*;
use crate::types::Caller;

const AUTH_TOKEN_HEADER: &str = "x-annotator-auth-token";

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u32 {
    5000
}
fn default_auth_cache_secs() -> u64 {
    60
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u32,
    pub auth_url: Option<String>,
    #[serde(default = "default_auth_cache_secs")]
    pub auth_cache_secs: u64,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub documents: ResolverConfig,
    /// Without it records are kept in memory.
    pub elasticsearch: Option<ElasticConfig>,
}

#[derive(Clone)]
pub struct Store {
    annotations: Arc<Annotations>,
    identity: Arc<IdentityResolver>,
    elastic: Option<Arc<ElasticIndex>>,
    host: String,
    port: u32,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let elastic = config.elasticsearch.map(|c| Arc::new(ElasticIndex::new(c)));
        let index: Arc<dyn Index> = match &elastic {
            Some(elastic) => elastic.clone(),
            None => Arc::new(MemoryIndex::new()),
        };
        Self::with_index(
            index,
            elastic,
            config.search,
            config.documents,
            IdentityResolver::new(
                config.auth_url,
                Duration::from_secs(config.auth_cache_secs),
            ),
            config.host,
            config.port,
        )
    }

    fn with_index(
        index: Arc<dyn Index>,
        elastic: Option<Arc<ElasticIndex>>,
        search: SearchConfig,
        documents: ResolverConfig,
        identity: IdentityResolver,
        host: String,
        port: u32,
    ) -> Self {
        let documents = Arc::new(DocumentResolver::new(index.clone(), documents));
        let annotations = Arc::new(Annotations::new(index, documents, search));
        Self {
            annotations,
            identity: Arc::new(identity),
            elastic,
            host,
            port,
        }
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    async fn caller(&self, headers: &HeaderMap) -> Result<Option<Caller>, StoreError> {
        let token = headers
            .get(AUTH_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        self.identity.resolve(token).await
    }

    pub fn app(&self) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/annotations", get(index).post(create_annotation))
            .route(
                "/annotations/:id",
                get(read_annotation)
                    .put(update_annotation)
                    .post(update_annotation)
                    .delete(delete_annotation),
            )
            .route("/search", get(search_annotations))
            .route(
                "/search_raw",
                get(search_raw_from_params).post(search_raw_from_body),
            )
            .with_state(self.clone())
    }

    pub async fn run(&self) -> Result<(), StoreError> {
        if let Some(elastic) = &self.elastic {
            elastic.create_indices().await?;
        }

        let app = self.app();
        let host = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&host)
            .await
            .map_err(internal_error)?;
        info!("annotator-store: listening on {}", host);
        axum::serve(listener, app).await.map_err(internal_error)
    }
}

async fn root() -> Response {
    let endpoint = |method: &str, url: &str, desc: &str| Endpoint {
        method: method.to_string(),
        url: url.to_string(),
        desc: desc.to_string(),
    };
    Json(RootMessage {
        message: "Annotator Store API".to_string(),
        links: vec![
            endpoint("GET", "/annotations", "List annotations"),
            endpoint("POST", "/annotations", "Create a new annotation"),
            endpoint("GET", "/annotations/:id", "Get an existing annotation"),
            endpoint("PUT", "/annotations/:id", "Update an existing annotation"),
            endpoint("DELETE", "/annotations/:id", "Delete an annotation"),
            endpoint("GET", "/search", "Basic search API"),
            endpoint(
                "GET/POST",
                "/search_raw",
                "Advanced search API, Elasticsearch query DSL",
            ),
        ],
    })
    .into_response()
}

// Api response helpers

fn store_err_response(error: StoreError, caller: Option<&Caller>) -> Response {
    let status = match error.code {
        ErrorCode::BadRequest
        | ErrorCode::SpoofedIdentity
        | ErrorCode::FilterConstructionFailed => StatusCode::BAD_REQUEST,
        ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
        // Anonymous callers may succeed after logging in, others may not.
        ErrorCode::AuthorizationDenied if caller.is_none() => {
            StatusCode::UNAUTHORIZED
        }
        ErrorCode::AuthorizationDenied => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Unsupported => StatusCode::NOT_IMPLEMENTED,
        ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = Json(ErrorBody { error });
    (status, body).into_response()
}

fn store_response<T>(result: Result<T, StoreError>, caller: Option<&Caller>) -> Response
where
    T: Serialize,
{
    match result {
        Ok(res) => Json(res).into_response(),
        Err(err) => store_err_response(err, caller),
    }
}

// Annotation handlers

#[derive(Deserialize)]
struct WriteQuery {
    refresh: Option<String>,
}

impl WriteQuery {
    fn refresh(&self) -> bool {
        self.refresh.as_deref() != Some("false")
    }
}

fn payload(body: Result<Json<Value>, JsonRejection>) -> Result<Value, StoreError> {
    body.map(|Json(value)| value)
        .map_err(|rej| StoreError::bad_request(&rej.body_text()))
}

async fn index(State(store): State<Store>, headers: HeaderMap) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    let res = store
        .annotations
        .search(&SearchParams::default(), caller.as_ref())
        .await
        .map(|res| res.rows);
    store_response(res, caller.as_ref())
}

async fn create_annotation(
    State(store): State<Store>,
    Query(query): Query<WriteQuery>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    let res = match payload(body) {
        Ok(payload) => {
            store
                .annotations
                .create(payload, caller.as_ref(), query.refresh())
                .await
        }
        Err(err) => Err(err),
    };
    match res {
        Ok(annotation) => {
            let location =
                format!("/annotations/{}", annotation.id.as_deref().unwrap_or(""));
            trace!("annotator-store: created {}", location);
            (
                StatusCode::CREATED,
                [(header::LOCATION, location)],
                Json(annotation),
            )
                .into_response()
        }
        Err(err) => store_err_response(err, caller.as_ref()),
    }
}

async fn read_annotation(
    State(store): State<Store>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    let res = store.annotations.read(&id, caller.as_ref()).await;
    store_response(res, caller.as_ref())
}

async fn update_annotation(
    State(store): State<Store>,
    Path(id): Path<String>,
    Query(query): Query<WriteQuery>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    let res = match payload(body) {
        Ok(patch) => {
            store
                .annotations
                .update(&id, patch, caller.as_ref(), query.refresh())
                .await
        }
        Err(err) => Err(err),
    };
    store_response(res, caller.as_ref())
}

async fn delete_annotation(
    State(store): State<Store>,
    Path(id): Path<String>,
    Query(query): Query<WriteQuery>,
    headers: HeaderMap,
) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    match store
        .annotations
        .delete(&id, caller.as_ref(), query.refresh())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_err_response(err, caller.as_ref()),
    }
}

async fn search_annotations(
    State(store): State<Store>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    let params = SearchParams::from_query(params);
    let res = store.annotations.search(&params, caller.as_ref()).await;
    store_response(res, caller.as_ref())
}

async fn search_raw_from_params(
    State(store): State<Store>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    let res = store
        .annotations
        .search_raw(raw_query_from_params(params), caller.as_ref())
        .await;
    store_response(res, caller.as_ref())
}

async fn search_raw_from_body(
    State(store): State<Store>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let caller = match store.caller(&headers).await {
        Ok(caller) => caller,
        Err(err) => return store_err_response(err, None),
    };
    let res = match payload(body) {
        Ok(body) => store.annotations.search_raw(body, caller.as_ref()).await,
        Err(err) => Err(err),
    };
    store_response(res, caller.as_ref())
}
