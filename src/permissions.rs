use serde::{Deserialize, Serialize};

pub const GROUP_WORLD: &str = "group:__world__";
pub const GROUP_AUTHENTICATED: &str = "group:__authenticated__";
pub const GROUP_CONSUMER: &str = "group:__consumer__";

/// Prefix shared by every group token. Never valid for a real user id.
pub const GROUP_PREFIX: &str = "group:";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Update,
    Delete,
    Admin,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Admin => "admin",
        }
    }
}

/// Grantees per action. A grantee is a user id or one of the group tokens.
/// An absent list and an empty list mean the same thing: owner only.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin: Vec<String>,
}

impl Permissions {
    pub fn empty() -> Self {
        Permissions::default()
    }

    /// Applied to annotations saved without any permissions at all.
    pub fn consumer_readable() -> Self {
        Permissions {
            read: vec![GROUP_CONSUMER.to_string()],
            ..Permissions::default()
        }
    }

    pub fn get(&self, action: Action) -> &[String] {
        match action {
            Action::Read => &self.read,
            Action::Update => &self.update,
            Action::Delete => &self.delete,
            Action::Admin => &self.admin,
        }
    }

    pub fn grants(&self, action: Action, grantee: &str) -> bool {
        self.get(action).iter().any(|g| g == grantee)
    }
}

pub fn is_group_id(id: &str) -> bool {
    id.starts_with(GROUP_PREFIX)
}
