use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::Annotation;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "bad_request")]
    BadRequest,
    #[serde(rename = "auth_failed")]
    AuthFailed,
    #[serde(rename = "not_found")]
    NotFound,
    #[serde(rename = "authorization_denied")]
    AuthorizationDenied,
    #[serde(rename = "spoofed_identity")]
    SpoofedIdentity,
    #[serde(rename = "filter_construction_failed")]
    FilterConstructionFailed,
    #[serde(rename = "external_store_unavailable")]
    Unavailable,
    #[serde(rename = "unsupported")]
    Unsupported,
    #[serde(rename = "internal_server_error")]
    InternalServerError,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SearchResponse {
    pub total: u64,
    pub rows: Vec<Annotation>,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: StoreError,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Endpoint {
    pub method: String,
    pub url: String,
    pub desc: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RootMessage {
    pub message: String,
    pub links: Vec<Endpoint>,
}
