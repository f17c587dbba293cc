use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml_edit::{Array, DocumentMut, Item, Table, value};

pub const CASETRAIL_DIR_NAME: &str = ".casetrail";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 2;
pub const MAX_FETCH_CONCURRENCY: usize = 16;
pub const DEFAULT_FIXTURE_DIR: &str = "fixtures";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchSourceKind {
    #[default]
    Http,
    Fixture,
}

impl FetchSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Fixture => "fixture",
        }
    }
}

impl std::str::FromStr for FetchSourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "http" => Ok(Self::Http),
            "fixture" => Ok(Self::Fixture),
            other => Err(format!(
                "invalid fetch source '{other}', expected one of: http, fixture"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CasetrailConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub event_codes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrackingConfig {
    #[serde(default)]
    pub cases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub source: FetchSourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture_dir: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            source: FetchSourceKind::Http,
            endpoint: None,
            fixture_dir: None,
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("failed to edit config TOML: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn casetrail_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(CASETRAIL_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    casetrail_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<CasetrailConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(CasetrailConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: CasetrailConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<CasetrailConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(casetrail_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = CasetrailConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &CasetrailConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.tracking.cases.is_empty() {
        warnings.push(ConfigWarning {
            code: "tracking_empty",
            message: "no cases are tracked; add one with `casetraild track add <ID>`".to_owned(),
        });
    }

    match config.fetch.source {
        FetchSourceKind::Http if config.fetch.endpoint.is_none() => {
            warnings.push(ConfigWarning {
                code: "fetch_endpoint_missing",
                message: "fetch.source is \"http\" but fetch.endpoint is not set".to_owned(),
            });
        }
        FetchSourceKind::Fixture if config.fetch.fixture_dir.is_none() => {
            warnings.push(ConfigWarning {
                code: "fixture_dir_defaulted",
                message: format!(
                    "fetch.source is \"fixture\" without fetch.fixture_dir; using '{DEFAULT_FIXTURE_DIR}'"
                ),
            });
        }
        _ => {}
    }

    warnings
}

/// Adds `case_id` to `[tracking] cases`, keeping the rest of the file untouched.
/// Returns `false` when the id was already tracked.
pub fn add_tracked_case(
    workspace_root: impl AsRef<Path>,
    case_id: &str,
) -> Result<bool, ConfigError> {
    let case_id = normalize_case_id(case_id)
        .ok_or_else(|| ConfigError::Invalid("case id must not be empty".to_owned()))?;

    edit_tracked_cases(workspace_root.as_ref(), |cases| {
        if cases.iter().any(|existing| existing.as_str() == Some(case_id.as_str())) {
            return false;
        }
        cases.push(case_id.as_str());
        true
    })
}

/// Removes `case_id` from `[tracking] cases`. Returns `false` when it was not tracked.
pub fn remove_tracked_case(
    workspace_root: impl AsRef<Path>,
    case_id: &str,
) -> Result<bool, ConfigError> {
    let Some(case_id) = normalize_case_id(case_id) else {
        return Ok(false);
    };

    edit_tracked_cases(workspace_root.as_ref(), |cases| {
        let before = cases.len();
        cases.retain(|existing| existing.as_str() != Some(case_id.as_str()));
        cases.len() != before
    })
}

fn edit_tracked_cases(
    workspace_root: &Path,
    edit: impl FnOnce(&mut Array) -> bool,
) -> Result<bool, ConfigError> {
    ensure_workspace_config(workspace_root)?;
    let path = config_path(workspace_root);
    let mut document = fs::read_to_string(&path)?.parse::<DocumentMut>()?;

    let tracking = document
        .entry("tracking")
        .or_insert_with(|| Item::Table(Table::new()))
        .as_table_mut()
        .ok_or_else(|| ConfigError::Invalid("[tracking] must be a table".to_owned()))?;
    let cases = tracking
        .entry("cases")
        .or_insert_with(|| value(Array::new()))
        .as_array_mut()
        .ok_or_else(|| ConfigError::Invalid("tracking.cases must be an array".to_owned()))?;

    let changed = edit(cases);
    if changed {
        fs::write(&path, document.to_string())?;
    }
    Ok(changed)
}

fn default_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_concurrency() -> usize {
    DEFAULT_FETCH_CONCURRENCY
}

/// Case ids are compared case-insensitively and stored upper-cased.
pub fn normalize_case_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_ascii_uppercase())
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: CasetrailConfig) -> CasetrailConfig {
    let mut seen = BTreeSet::new();
    config.tracking.cases = config
        .tracking
        .cases
        .iter()
        .filter_map(|id| normalize_case_id(id))
        .filter(|id| seen.insert(id.clone()))
        .collect();

    config.fetch.endpoint = normalize_optional(config.fetch.endpoint.take())
        .map(|endpoint| endpoint.trim_end_matches('/').to_owned());
    config.fetch.fixture_dir = normalize_optional(config.fetch.fixture_dir.take());
    config.fetch.timeout_secs = config.fetch.timeout_secs.max(1);
    config.fetch.concurrency = config.fetch.concurrency.clamp(1, MAX_FETCH_CONCURRENCY);

    config
}
