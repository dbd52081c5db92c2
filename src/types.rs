use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{internal_error, StoreError};
use crate::index::Hit;
use crate::permissions::Permissions;

/// Owner of an annotation, stored either as a bare id or as an object
/// carrying at least an `id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum UserField {
    PlainId(String),
    Structured {
        id: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl UserField {
    pub fn owner_id(&self) -> &str {
        match self {
            UserField::PlainId(id) => id,
            UserField::Structured { id, .. } => id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    /// Everything else the client sent: text, quote, tags, ranges, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Annotation {
    pub fn owner_id(&self) -> Option<&str> {
        self.user.as_ref().map(UserField::owner_id)
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions.clone().unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Link {
    pub fn new(href: &str, kind: &str) -> Self {
        Link {
            href: Some(href.to_string()),
            kind: Some(kind.to_string()),
        }
    }
}

/// Metadata about an annotated document. Alternate representations of the
/// same document (html page, pdf, doi) are listed in `link`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    pub fn uris(&self) -> Vec<String> {
        self.link.iter().filter_map(|l| l.href.clone()).collect()
    }

    /// Appends links whose href is not yet known. Links missing either
    /// `href` or `type` are skipped.
    pub fn merge_links(&mut self, links: &[Link]) {
        for link in links {
            let (Some(href), Some(_)) = (&link.href, &link.kind) else {
                continue;
            };
            if self.link.iter().any(|l| l.href.as_ref() == Some(href)) {
                continue;
            }
            self.link.push(link.clone());
        }
    }
}

/// Authenticated identity of the current request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub id: String,
    pub consumer_key: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Caller {
    pub fn new(id: &str, consumer_key: &str) -> Self {
        Caller {
            id: id.to_string(),
            consumer_key: consumer_key.to_string(),
            is_admin: false,
        }
    }

    pub fn admin(id: &str, consumer_key: &str) -> Self {
        Caller {
            is_admin: true,
            ..Caller::new(id, consumer_key)
        }
    }
}

/// Stored source of a record. The id lives beside the source, not in it.
pub fn to_source<T: Serialize>(record: &T) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(record).map_err(internal_error)?;
    if let Value::Object(map) = &mut value {
        map.remove("id");
    }
    Ok(value)
}

pub fn from_hit<T>(hit: Hit) -> Result<T, StoreError>
where
    T: serde::de::DeserializeOwned,
{
    let Hit { id, mut source } = hit;
    if let Value::Object(map) = &mut source {
        map.insert("id".to_string(), Value::String(id));
    }
    serde_json::from_value(source).map_err(internal_error)
}
