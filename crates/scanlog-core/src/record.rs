use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-record synchronization status.
///
/// ```text
/// Pending -> Syncing -> Synced
///              |    \-> Error -> Pending (manual retry)
///              |           \---> Syncing (retry attempt)
/// Synced -> Pending (local edit)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    /// Eligible for the push phase.
    pub fn is_pushable(self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }

    /// Only confirmed remote copies may be dropped locally.
    pub fn is_evictable(self) -> bool {
        self == Self::Synced
    }

    pub fn dirty(self) -> Option<Self> {
        match self {
            Self::Synced => Some(Self::Pending),
            _ => None,
        }
    }

    pub fn begin(self) -> Option<Self> {
        match self {
            Self::Pending | Self::Error => Some(Self::Syncing),
            _ => None,
        }
    }

    pub fn complete(self) -> Option<Self> {
        match self {
            Self::Syncing => Some(Self::Synced),
            _ => None,
        }
    }

    pub fn fail(self) -> Option<Self> {
        match self {
            Self::Syncing => Some(Self::Error),
            _ => None,
        }
    }

    pub fn retry(self) -> Option<Self> {
        match self {
            Self::Error => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Link,
    Text,
}

impl Category {
    pub fn infer(payload: &str) -> Self {
        let trimmed = payload.trim_start();
        let head: String = trimmed.chars().take(8).collect::<String>().to_ascii_lowercase();
        if head.starts_with("http://") || head.starts_with("https://") {
            Self::Link
        } else {
            Self::Text
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub payload: String,
    #[serde(default)]
    pub label: Option<String>,
    pub created_at: i64,
    pub category: Category,
    pub sync_state: SyncState,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub origin_flag: bool,
}

impl Record {
    /// A freshly decoded scan, not yet offered to the remote.
    pub fn capture(payload: impl Into<String>) -> Self {
        Self::capture_at(payload, now_millis())
    }

    pub fn capture_at(payload: impl Into<String>, created_at: i64) -> Self {
        let payload = payload.into();
        Self {
            id: Uuid::new_v4().to_string(),
            category: Category::infer(&payload),
            payload,
            label: None,
            created_at,
            sync_state: SyncState::Pending,
            origin_flag: false,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// Label as shown to users; unset and empty both render blank.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or_default()
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
