use crate::workspace::WorkspacePaths;
use scanlog_core::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// One upsert request per record; failures are isolated per record.
    #[default]
    PerRecord,
    /// A single upsert request for every pending record.
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub version: u32,
    pub active_profile: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub push_mode: PushMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub name: String,
    pub active: bool,
    pub endpoint: Option<String>,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProfile {
    pub name: String,
    pub endpoint: Option<String>,
    pub capacity: usize,
    pub push_mode: PushMode,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            capacity: DEFAULT_CAPACITY,
            push_mode: PushMode::default(),
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl WorkspaceConfig {
    pub fn with_default_endpoint(endpoint: Option<&str>) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            DEFAULT_PROFILE.to_string(),
            ProfileConfig {
                endpoint: normalize_endpoint(endpoint),
                ..ProfileConfig::default()
            },
        );

        Self {
            version: CONFIG_VERSION,
            active_profile: DEFAULT_PROFILE.to_string(),
            profiles,
        }
    }

    pub fn ensure_defaults(&mut self) {
        if self.version == 0 {
            self.version = CONFIG_VERSION;
        }

        if self.profiles.is_empty() {
            self.profiles
                .insert(DEFAULT_PROFILE.to_string(), ProfileConfig::default());
        }

        for profile in self.profiles.values_mut() {
            if profile.capacity == 0 {
                profile.capacity = DEFAULT_CAPACITY;
            }
        }

        if self.active_profile.is_empty() || !self.profiles.contains_key(&self.active_profile) {
            self.active_profile = self
                .profiles
                .keys()
                .next()
                .cloned()
                .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        }
    }
}

pub fn load_config(paths: &WorkspacePaths) -> ScanResult<WorkspaceConfig> {
    let contents = fs::read_to_string(&paths.config_path).map_err(|err| {
        ScanError::io(format!(
            "failed to read workspace config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })?;

    let mut config: WorkspaceConfig = toml::from_str(&contents).map_err(|err| {
        ScanError::io(format!(
            "failed to parse workspace config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })?;
    config.ensure_defaults();
    Ok(config)
}

pub fn save_config(paths: &WorkspacePaths, config: &WorkspaceConfig) -> ScanResult<()> {
    let serialized = toml::to_string_pretty(config)
        .map_err(|err| ScanError::io(format!("failed to encode config.toml: {err}")))?;

    fs::write(&paths.config_path, serialized).map_err(|err| {
        ScanError::io(format!(
            "failed to write workspace config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })
}

pub fn list_profiles(config: &WorkspaceConfig) -> Vec<ProfileView> {
    config
        .profiles
        .iter()
        .map(|(name, profile)| ProfileView {
            name: name.clone(),
            active: name == &config.active_profile,
            endpoint: profile.endpoint.clone(),
            capacity: profile.capacity,
        })
        .collect()
}

pub fn set_active_profile(config: &mut WorkspaceConfig, name: &str) -> ScanResult<()> {
    if !config.profiles.contains_key(name) {
        return Err(ScanError::usage(format!(
            "profile '{name}' not found in workspace config"
        )));
    }

    config.active_profile = name.to_string();
    Ok(())
}

/// Creates the profile when missing; capacity and push mode are only touched
/// when given.
pub fn set_profile_endpoint(
    config: &mut WorkspaceConfig,
    name: &str,
    endpoint: Option<&str>,
    capacity: Option<usize>,
    push_mode: Option<PushMode>,
) -> ScanResult<()> {
    if capacity == Some(0) {
        return Err(ScanError::usage("capacity must be at least 1"));
    }

    let profile = config.profiles.entry(name.to_string()).or_default();
    if let Some(endpoint) = endpoint {
        profile.endpoint = normalize_endpoint(Some(endpoint));
    }
    if let Some(capacity) = capacity {
        profile.capacity = capacity;
    }
    if let Some(push_mode) = push_mode {
        profile.push_mode = push_mode;
    }

    if config.active_profile.is_empty() {
        config.active_profile = name.to_string();
    }
    Ok(())
}

pub fn resolve_profile(
    config: &WorkspaceConfig,
    profile_override: Option<&str>,
    endpoint_override: Option<&str>,
) -> ScanResult<ResolvedProfile> {
    let requested_profile = profile_override.unwrap_or(&config.active_profile);
    let profile = config.profiles.get(requested_profile).ok_or_else(|| {
        ScanError::usage(format!(
            "profile '{requested_profile}' not found in workspace config"
        ))
    })?;

    let endpoint = match endpoint_override {
        Some(value) => normalize_endpoint(Some(value)),
        None => profile.endpoint.clone(),
    };

    Ok(ResolvedProfile {
        name: requested_profile.to_string(),
        endpoint,
        capacity: profile.capacity,
        push_mode: profile.push_mode,
    })
}

fn normalize_endpoint(endpoint: Option<&str>) -> Option<String> {
    endpoint
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
