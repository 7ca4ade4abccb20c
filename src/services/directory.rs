use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryKind {
    Users,
    Channels,
}

impl DirectoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DirectoryKind::Users => "users",
            DirectoryKind::Channels => "channels",
        }
    }
}

/// A record that can live in a directory snapshot.
pub trait DirectoryEntry:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: DirectoryKind;

    fn id(&self) -> &str;

    /// Lowercase keys for the name index.
    fn lookup_keys(&self) -> Vec<String>;

    /// Parses one backend record; `None` when it has no usable id.
    fn from_wire(value: &Value) -> Option<Self>;
}

fn str_field(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub real_name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl DirectoryEntry for User {
    const KIND: DirectoryKind = DirectoryKind::Users;

    fn id(&self) -> &str {
        &self.id
    }

    fn lookup_keys(&self) -> Vec<String> {
        let mut keys = vec![self.name.to_lowercase()];
        if !self.display_name.is_empty() {
            keys.push(self.display_name.to_lowercase());
        }
        keys.retain(|k| !k.is_empty());
        keys.dedup();
        keys
    }

    fn from_wire(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?.trim();
        if id.is_empty() {
            return None;
        }
        let mut real_name = str_field(value, "/real_name");
        if real_name.is_empty() {
            real_name = str_field(value, "/profile/real_name");
        }
        let email = value
            .pointer("/profile/email")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Some(User {
            id: id.to_string(),
            name: str_field(value, "/name"),
            real_name,
            display_name: str_field(value, "/profile/display_name"),
            email,
            is_bot: value.get("is_bot").and_then(|v| v.as_bool()).unwrap_or(false),
            deleted: value.get("deleted").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Public,
    Private,
    Im,
    Mpim,
}

impl ChannelKind {
    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "public" | "public_channel" => Some(ChannelKind::Public),
            "private" | "private_channel" => Some(ChannelKind::Private),
            "im" => Some(ChannelKind::Im),
            "mpim" => Some(ChannelKind::Mpim),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub member_count: u64,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub purpose: String,
    /// Counterpart user of a direct message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl DirectoryEntry for Channel {
    const KIND: DirectoryKind = DirectoryKind::Channels;

    fn id(&self) -> &str {
        &self.id
    }

    fn lookup_keys(&self) -> Vec<String> {
        match (&self.kind, &self.user) {
            (ChannelKind::Im, Some(user)) => vec![format!("@{}", user.to_lowercase())],
            _ if self.name.is_empty() => Vec::new(),
            _ => vec![format!("#{}", self.name.to_lowercase())],
        }
    }

    fn from_wire(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?.trim();
        if id.is_empty() {
            return None;
        }
        let flag = |name: &str| value.get(name).and_then(|v| v.as_bool()).unwrap_or(false);
        let kind = if flag("is_im") {
            ChannelKind::Im
        } else if flag("is_mpim") {
            ChannelKind::Mpim
        } else if flag("is_private") || flag("is_group") {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        };
        Some(Channel {
            id: id.to_string(),
            name: str_field(value, "/name"),
            kind,
            member_count: value.get("num_members").and_then(|v| v.as_u64()).unwrap_or(0),
            topic: str_field(value, "/topic/value"),
            purpose: str_field(value, "/purpose/value"),
            user: value
                .get("user")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }
}
