use chrono::DateTime;
use scanlog_core::{Category, Record, SyncState};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const WIRE_TYPE_LINK: &str = "URL";
const WIRE_TYPE_TEXT: &str = "TEXT";

/// A record as the spreadsheet webhook stores it.
///
/// `name` uses the empty string for an unset label. Spreadsheet cells may come
/// back as numbers or dates, so the reader accepts those for every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub data: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushRequest<'a> {
    pub token: &'a str,
    pub items: Vec<RemoteRecord>,
}

/// Body-level status returned by the webhook for every request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub added: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub total_processed: u64,
}

impl RemoteStatus {
    pub fn is_success(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("success"))
    }

    pub fn is_error(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("error"))
    }
}

impl RemoteRecord {
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            timestamp: record.created_at,
            name: record.label.clone().unwrap_or_default(),
            data: record.payload.clone(),
            kind: match record.category {
                Category::Link => WIRE_TYPE_LINK,
                Category::Text => WIRE_TYPE_TEXT,
            }
            .to_string(),
        }
    }

    pub fn label(&self) -> Option<String> {
        if self.name.is_empty() {
            None
        } else {
            Some(self.name.clone())
        }
    }

    pub fn category(&self) -> Category {
        let kind = self.kind.trim();
        if kind.eq_ignore_ascii_case(WIRE_TYPE_LINK) || kind.eq_ignore_ascii_case("link") {
            Category::Link
        } else {
            Category::Text
        }
    }

    /// Cloud copies are confirmed by definition.
    pub fn into_record(self) -> Record {
        Record {
            label: self.label(),
            category: self.category(),
            id: self.id,
            payload: self.data,
            created_at: self.timestamp,
            sync_state: SyncState::Synced,
            origin_flag: false,
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        Value::Bool(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string-like value, got {other}"
        ))),
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {number}"))),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if let Ok(millis) = trimmed.parse::<i64>() {
                return Ok(millis);
            }
            DateTime::parse_from_rfc3339(trimmed)
                .map(|parsed| parsed.timestamp_millis())
                .map_err(|_| D::Error::custom(format!("unrecognized timestamp '{trimmed}'")))
        }
        other => Err(D::Error::custom(format!(
            "expected a numeric timestamp, got {other}"
        ))),
    }
}
