//! Discovery Connector
//!
//! Talks to the control plane over HTTP: combiner assignment plus compute
//! package acquisition. Assignment is the only negotiation; the supervisor
//! keeps retrying retryable outcomes at a fixed cadence and treats
//! authorization and configuration rejections as fatal.

use crate::config::{ClientIdentity, WorkerConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fedmesh_proto::{AssignRequest, Assignment, ChecksumResponse};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Cadence for retrying TryAgain / transient assignment outcomes.
pub const ASSIGN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Outcome of one assignment attempt.
#[derive(Debug)]
pub enum AssignStatus {
    Assigned(Assignment),
    TryAgain(String),
    Unauthorized(String),
    UnmatchedConfig(String),
    TransientError(String),
}

/// Fatal assignment outcomes. Everything else is retried.
#[derive(Error, Debug)]
pub enum AssignError {
    #[error("discovery service rejected credentials: {0}")]
    Unauthorized(String),
    #[error("discovery service rejected configuration: {0}")]
    UnmatchedConfig(String),
}

/// Anything that can hand out combiner assignments.
#[async_trait]
pub trait AssignmentSource: Send + Sync {
    async fn assign(&self) -> AssignStatus;
}

/// HTTP client for the discovery control plane.
pub struct DiscoveryClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
    request: AssignRequest,
}

impl DiscoveryClient {
    pub fn new(config: &WorkerConfig, identity: &ClientIdentity) -> Result<Self> {
        let scheme = if config.force_ssl || config.verify {
            "https"
        } else {
            "http"
        };
        let base_url = format!("{}://{}:{}", scheme, config.discover_host, config.discover_port);

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build discovery HTTP client")?;

        let request = AssignRequest {
            name: identity.name.clone(),
            client_id: identity.client_id.clone(),
            preferred_combiner: config.preferred_combiner.clone(),
            force_ssl: config.force_ssl,
            verify: config.verify,
        };

        Ok(Self {
            base_url,
            token: config.token.clone(),
            http,
            request,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Token {token}")),
            None => builder,
        }
    }

    /// Fetch the assigned compute package into `dest_dir`, returning the
    /// archive path.
    pub async fn download_package(&self, dest_dir: &Path) -> Result<PathBuf> {
        let url = format!("{}/package", self.base_url);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to fetch compute package from {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("package endpoint returned {}", response.status());
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read compute package body")?;
        if bytes.is_empty() {
            anyhow::bail!("package endpoint returned an empty archive");
        }

        let archive_path = dest_dir.join("package.tgz");
        tokio::fs::write(&archive_path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", archive_path.display()))?;
        Ok(archive_path)
    }

    /// Server-side digest of the compute package.
    pub async fn package_checksum(&self) -> Result<String> {
        let url = format!("{}/package_checksum", self.base_url);
        let response: ChecksumResponse = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to fetch package checksum from {url}"))?
            .json()
            .await
            .context("Failed to parse package checksum body")?;
        Ok(response.checksum)
    }
}

#[async_trait]
impl AssignmentSource for DiscoveryClient {
    async fn assign(&self) -> AssignStatus {
        let url = format!("{}/assign", self.base_url);
        let response = match self
            .authorized(self.http.post(&url))
            .json(&self.request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return AssignStatus::TransientError(err.to_string()),
        };

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                AssignStatus::Unauthorized(body_or_status(response, status).await)
            }
            StatusCode::CONFLICT => {
                AssignStatus::UnmatchedConfig(body_or_status(response, status).await)
            }
            StatusCode::NON_AUTHORITATIVE_INFORMATION => {
                AssignStatus::TryAgain(body_or_status(response, status).await)
            }
            s if s.is_success() => match response.json::<Assignment>().await {
                Ok(assignment) => AssignStatus::Assigned(assignment),
                Err(err) => {
                    AssignStatus::TryAgain(format!("assignment body not parseable: {err}"))
                }
            },
            _ => AssignStatus::TryAgain(body_or_status(response, status).await),
        }
    }
}

async fn body_or_status(response: reqwest::Response, status: StatusCode) -> String {
    match response.text().await {
        Ok(body) if !body.is_empty() => body,
        _ => format!("discovery returned {status}"),
    }
}

/// Ask for an assignment until one is granted or a fatal outcome arrives.
///
/// Retryable outcomes sleep `delay` between attempts, indefinitely.
pub async fn assign_with_retry(
    source: &dyn AssignmentSource,
    delay: Duration,
) -> Result<Assignment, AssignError> {
    info!("asking discovery service for a combiner assignment");
    loop {
        match source.assign().await {
            AssignStatus::Assigned(assignment) => {
                info!(
                    host = %assignment.host,
                    port = assignment.port,
                    "combiner assignment received"
                );
                return Ok(assignment);
            }
            AssignStatus::TryAgain(msg) => {
                info!("assignment not ready: {msg}");
            }
            AssignStatus::TransientError(msg) => {
                warn!("assignment attempt failed: {msg}");
            }
            AssignStatus::Unauthorized(msg) => return Err(AssignError::Unauthorized(msg)),
            AssignStatus::UnmatchedConfig(msg) => return Err(AssignError::UnmatchedConfig(msg)),
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedSource {
        outcomes: Mutex<Vec<AssignStatus>>,
        attempts: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(mut outcomes: Vec<AssignStatus>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                attempts: Mutex::new(0),
            }
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }
    }

    #[async_trait]
    impl AssignmentSource for ScriptedSource {
        async fn assign(&self) -> AssignStatus {
            *self.attempts.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| AssignStatus::TryAgain("script exhausted".to_string()))
        }
    }

    fn assignment(host: &str) -> Assignment {
        serde_json::from_str(&format!(r#"{{"host": "{host}", "port": 12080}}"#)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_try_again_then_connects() {
        let source = ScriptedSource::new(vec![
            AssignStatus::TryAgain("pending".to_string()),
            AssignStatus::TryAgain("pending".to_string()),
            AssignStatus::TryAgain("pending".to_string()),
            AssignStatus::Assigned(assignment("combiner0")),
        ]);

        let started = tokio::time::Instant::now();
        let result = assign_with_retry(&source, ASSIGN_RETRY_DELAY).await.unwrap();

        assert_eq!(result.host, "combiner0");
        assert_eq!(source.attempts(), 4);
        // three retryable outcomes, each followed by the fixed 5 s sleep
        assert_eq!(started.elapsed(), ASSIGN_RETRY_DELAY * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let source = ScriptedSource::new(vec![
            AssignStatus::TransientError("connection refused".to_string()),
            AssignStatus::Assigned(assignment("combiner1")),
        ]);

        let result = assign_with_retry(&source, ASSIGN_RETRY_DELAY).await.unwrap();
        assert_eq!(result.host, "combiner1");
        assert_eq!(source.attempts(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let source = ScriptedSource::new(vec![AssignStatus::Unauthorized("bad token".to_string())]);
        let err = assign_with_retry(&source, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignError::Unauthorized(_)));
        assert_eq!(source.attempts(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_config_is_fatal() {
        let source =
            ScriptedSource::new(vec![AssignStatus::UnmatchedConfig("bad combiner".to_string())]);
        let err = assign_with_retry(&source, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignError::UnmatchedConfig(_)));
    }
}
