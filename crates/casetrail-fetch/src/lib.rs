use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use casetrail_config::{DEFAULT_FIXTURE_DIR, FetchConfig, FetchSourceKind};
use casetrail_core::{RawCase, now_rfc3339};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch.endpoint is required for the http source")]
    MissingEndpoint,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status} for {case_id}")]
    Status { case_id: String, status: u16 },
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no fixture for {case_id} at {}", .path.display())]
    FixtureMissing { case_id: String, path: PathBuf },
    #[error("fetch for {case_id} timed out after {secs}s")]
    Timeout { case_id: String, secs: u64 },
    #[error("{0}")]
    Unavailable(String),
}

/// Supplies raw, unreconciled case payloads.
#[async_trait]
pub trait CaseSource: Send + Sync {
    async fn fetch_case(&self, case_id: &str) -> Result<RawCase, FetchError>;
}

pub struct LoadedSource {
    pub source: Box<dyn CaseSource>,
    pub source_name: String,
}

#[derive(Debug, Clone)]
pub struct HttpCaseSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCaseSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
        })
    }

    fn status_url(&self, case_id: &str) -> String {
        format!("{}/cases/{}", self.endpoint, case_id)
    }

    fn documents_url(&self, case_id: &str) -> String {
        format!("{}/cases/{}/documents", self.endpoint, case_id)
    }

    async fn get_json(&self, case_id: &str, url: String) -> Result<Value, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                case_id: case_id.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CaseSource for HttpCaseSource {
    async fn fetch_case(&self, case_id: &str) -> Result<RawCase, FetchError> {
        let status = self.get_json(case_id, self.status_url(case_id)).await?;

        let documents = match self.get_json(case_id, self.documents_url(case_id)).await {
            Ok(documents) => documents,
            Err(err) => {
                tracing::warn!(
                    case_id,
                    error = %err,
                    "documents unavailable, continuing without them"
                );
                Value::Null
            }
        };

        Ok(RawCase {
            id: case_id.to_owned(),
            status,
            documents,
            fetched_at: now_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    status: Value,
    #[serde(default)]
    documents: Value,
    #[serde(default, rename = "fetchedAt")]
    fetched_at: Option<String>,
}

/// Reads `<dir>/<CASE_ID>.json` files shaped `{"status": ..., "documents": ...}`.
#[derive(Debug, Clone)]
pub struct FixtureCaseSource {
    dir: PathBuf,
}

impl FixtureCaseSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn fixture_path(&self, case_id: &str) -> PathBuf {
        self.dir.join(format!("{case_id}.json"))
    }
}

#[async_trait]
impl CaseSource for FixtureCaseSource {
    async fn fetch_case(&self, case_id: &str) -> Result<RawCase, FetchError> {
        let path = self.fixture_path(case_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::FixtureMissing {
                    case_id: case_id.to_owned(),
                    path,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let fixture: FixtureFile = serde_json::from_str(&raw)?;
        Ok(RawCase {
            id: case_id.to_owned(),
            status: fixture.status,
            documents: fixture.documents,
            fetched_at: fixture.fetched_at.unwrap_or_else(now_rfc3339),
        })
    }
}

/// In-memory source. Ids without a payload fail with `FetchError::Unavailable`.
#[derive(Debug, Clone, Default)]
pub struct StaticCaseSource {
    payloads: HashMap<String, Value>,
}

impl StaticCaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_case(mut self, case_id: impl Into<String>, status: Value) -> Self {
        self.payloads.insert(case_id.into(), status);
        self
    }
}

#[async_trait]
impl CaseSource for StaticCaseSource {
    async fn fetch_case(&self, case_id: &str) -> Result<RawCase, FetchError> {
        let status = self
            .payloads
            .get(case_id)
            .cloned()
            .ok_or_else(|| FetchError::Unavailable(format!("no payload for {case_id}")))?;

        Ok(RawCase {
            id: case_id.to_owned(),
            status,
            documents: Value::Null,
            fetched_at: now_rfc3339(),
        })
    }
}

pub fn load_case_source(
    workspace_root: impl AsRef<Path>,
    config: &FetchConfig,
) -> Result<LoadedSource, FetchError> {
    match config.source {
        FetchSourceKind::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or(FetchError::MissingEndpoint)?;
            let source =
                HttpCaseSource::new(endpoint, Duration::from_secs(config.timeout_secs.max(1)))?;
            Ok(LoadedSource {
                source: Box::new(source),
                source_name: FetchSourceKind::Http.as_str().to_owned(),
            })
        }
        FetchSourceKind::Fixture => {
            let dir = config.fixture_dir.as_deref().unwrap_or(DEFAULT_FIXTURE_DIR);
            Ok(LoadedSource {
                source: Box::new(FixtureCaseSource::new(workspace_root.as_ref().join(dir))),
                source_name: FetchSourceKind::Fixture.as_str().to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn fixture_source_reads_status_and_documents() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join("IOE0000000001.json"),
            r#"{"status":{"formType":"I-485","events":[]},"documents":{"notices":[]},"fetchedAt":"2024-01-01T00:00:00.000Z"}"#,
        )
        .expect("write fixture");

        let source = FixtureCaseSource::new(temp.path());
        let raw = source
            .fetch_case("IOE0000000001")
            .await
            .expect("fetch fixture");

        assert_eq!(raw.id, "IOE0000000001");
        assert_eq!(raw.status["formType"], "I-485");
        assert_eq!(raw.documents, json!({ "notices": [] }));
        assert_eq!(raw.fetched_at, "2024-01-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn fixture_source_reports_missing_and_malformed_files() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("BAD.json"), "{").expect("write fixture");
        let source = FixtureCaseSource::new(temp.path());

        let missing = source.fetch_case("NOPE").await;
        assert!(matches!(missing, Err(FetchError::FixtureMissing { .. })));

        let malformed = source.fetch_case("BAD").await;
        assert!(matches!(malformed, Err(FetchError::Json(_))));
    }

    #[tokio::test]
    async fn static_source_serves_known_cases_only() {
        let source = StaticCaseSource::new().with_case("A", json!({ "events": [] }));

        let raw = source.fetch_case("A").await.expect("known case");
        assert_eq!(raw.status, json!({ "events": [] }));
        assert!(matches!(
            source.fetch_case("B").await,
            Err(FetchError::Unavailable(_))
        ));
    }

    #[test]
    fn http_source_builds_case_urls() {
        let source = HttpCaseSource::new("https://cases.example.test/api/", Duration::from_secs(5))
            .expect("build source");
        assert_eq!(
            source.status_url("IOE1"),
            "https://cases.example.test/api/cases/IOE1"
        );
        assert_eq!(
            source.documents_url("IOE1"),
            "https://cases.example.test/api/cases/IOE1/documents"
        );
    }

    #[test]
    fn load_case_source_requires_endpoint_for_http() {
        let temp = tempdir().expect("tempdir");
        let result = load_case_source(temp.path(), &FetchConfig::default());
        assert!(matches!(result, Err(FetchError::MissingEndpoint)));

        let fixture = FetchConfig {
            source: FetchSourceKind::Fixture,
            ..FetchConfig::default()
        };
        let loaded = load_case_source(temp.path(), &fixture).expect("fixture source");
        assert_eq!(loaded.source_name, "fixture");
    }
}
