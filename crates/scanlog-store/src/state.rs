use crate::storage::{Storage, storage_key};
use chrono::Utc;
use scanlog_core::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const TOKEN_ENTRY: &str = "token";
const APP_STATE_ENTRY: &str = "app_state";
const TOKEN_VAR: &str = "SCANLOG_TOKEN";
const ENV_FILE_VAR: &str = "SCANLOG_ENV_FILE";

/// Bookkeeping about the last push and sync, shown by `sync status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub last_push_at: Option<String>,
    pub last_sync_at: Option<String>,
    pub last_sync_status: Option<String>,
    #[serde(default)]
    pub last_report: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Environment,
    EnvFile,
    Stored,
}

#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub token: String,
    pub source: TokenSource,
    pub env_file: Option<PathBuf>,
}

impl AppState {
    pub fn mark_push_ok(&mut self, report: serde_json::Value) {
        self.last_push_at = Some(Utc::now().to_rfc3339());
        self.last_sync_status = Some("ok".to_string());
        self.last_report = Some(report);
    }

    pub fn mark_sync_ok(&mut self, report: serde_json::Value) {
        let now = Utc::now().to_rfc3339();
        self.last_push_at = Some(now.clone());
        self.last_sync_at = Some(now);
        self.last_sync_status = Some("ok".to_string());
        self.last_report = Some(report);
    }

    pub fn mark_error(&mut self, message: &str) {
        self.last_sync_status = Some(format!("error: {message}"));
    }
}

pub fn load_app_state(storage: &dyn Storage, profile: &str) -> ScanResult<AppState> {
    let key = storage_key(profile, APP_STATE_ENTRY);
    let Some(raw) = storage.read(&key)? else {
        return Ok(AppState::default());
    };

    serde_json::from_str::<AppState>(&raw)
        .map_err(|err| ScanError::io(format!("failed to parse app state under '{key}': {err}")))
}

pub fn save_app_state(storage: &dyn Storage, profile: &str, state: &AppState) -> ScanResult<()> {
    let payload = serde_json::to_string(state)
        .map_err(|err| ScanError::io(format!("failed to serialize app state: {err}")))?;
    storage.write(&storage_key(profile, APP_STATE_ENTRY), &payload)
}

pub fn load_token(storage: &dyn Storage, profile: &str) -> ScanResult<Option<String>> {
    Ok(storage
        .read(&storage_key(profile, TOKEN_ENTRY))?
        .filter(|token| !token.trim().is_empty()))
}

pub fn save_token(storage: &dyn Storage, profile: &str, token: &str) -> ScanResult<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ScanError::usage("token must not be empty"));
    }
    storage.write(&storage_key(profile, TOKEN_ENTRY), token)
}

pub fn clear_token(storage: &dyn Storage, profile: &str) -> ScanResult<()> {
    storage.delete(&storage_key(profile, TOKEN_ENTRY))
}

/// Looks for a token in `SCANLOG_TOKEN`, then a `.env` file, then the stored
/// profile entry.
pub fn resolve_token(
    storage: &dyn Storage,
    profile: &str,
    workspace_root: &Path,
) -> ScanResult<Option<ResolvedToken>> {
    if let Some(token) = non_empty(std::env::var(TOKEN_VAR).ok()) {
        return Ok(Some(ResolvedToken {
            token,
            source: TokenSource::Environment,
            env_file: None,
        }));
    }

    if let Some(path) = resolve_env_file(workspace_root) {
        let values = load_env_file(&path)?;
        if let Some(token) = non_empty(values.get(TOKEN_VAR).cloned()) {
            return Ok(Some(ResolvedToken {
                token,
                source: TokenSource::EnvFile,
                env_file: Some(path),
            }));
        }
    }

    Ok(load_token(storage, profile)?.map(|token| ResolvedToken {
        token,
        source: TokenSource::Stored,
        env_file: None,
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_env_file(workspace_root: &Path) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_FILE_VAR) {
        let candidate = PathBuf::from(path);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    search_upwards_for(workspace_root, Path::new(".env"))
}

fn search_upwards_for(start: &Path, relative_path: &Path) -> Option<PathBuf> {
    let mut cursor = Some(start);

    while let Some(path) = cursor {
        let candidate = path.join(relative_path);
        if candidate.is_file() {
            return Some(candidate);
        }
        cursor = path.parent();
    }

    None
}

fn load_env_file(path: &Path) -> ScanResult<BTreeMap<String, String>> {
    let raw = fs::read_to_string(path).map_err(|err| {
        ScanError::io(format!(
            "failed to read env file '{}': {}",
            path.display(),
            err
        ))
    })?;

    let mut vars = BTreeMap::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let value = value.trim();
        let unquoted = if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            &value[1..value.len() - 1]
        } else {
            value
        };

        vars.insert(key.to_string(), unquoted.to_string());
    }

    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[test]
    fn env_file_values_are_unquoted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".env");
        fs::write(
            &path,
            "# comment\nexport SCANLOG_TOKEN=\"abc 123\"\nOTHER='x'\nBROKEN\n=value\n",
        )
        .expect("write env");

        let values = load_env_file(&path).expect("parse");
        assert_eq!(values.get("SCANLOG_TOKEN").map(String::as_str), Some("abc 123"));
        assert_eq!(values.get("OTHER").map(String::as_str), Some("x"));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn upward_search_finds_parent_env_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(temp.path().join(".env"), "SCANLOG_TOKEN=t").expect("write");

        assert_eq!(
            search_upwards_for(&nested, Path::new(".env")),
            Some(temp.path().join(".env"))
        );
    }

    #[test]
    fn stored_token_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(load_token(&storage, "default").expect("load"), None);

        save_token(&storage, "default", "  secret  ").expect("save");
        assert_eq!(
            load_token(&storage, "default").expect("load").as_deref(),
            Some("secret")
        );
        assert!(save_token(&storage, "default", "   ").is_err());

        clear_token(&storage, "default").expect("clear");
        assert_eq!(load_token(&storage, "default").expect("load"), None);
    }

    #[test]
    fn app_state_marks_outcomes() {
        let storage = MemoryStorage::new();
        let mut state = load_app_state(&storage, "default").expect("default state");
        assert_eq!(state, AppState::default());

        state.mark_sync_ok(serde_json::json!({"pushed": 1}));
        save_app_state(&storage, "default", &state).expect("save");
        let mut loaded = load_app_state(&storage, "default").expect("load");
        assert_eq!(loaded.last_sync_status.as_deref(), Some("ok"));
        assert!(loaded.last_sync_at.is_some());

        loaded.mark_error("webhook rejected the token");
        assert_eq!(
            loaded.last_sync_status.as_deref(),
            Some("error: webhook rejected the token")
        );
        assert!(loaded.last_report.is_some());
    }
}
