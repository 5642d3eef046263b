//! HTTP client for the external video-generation provider.
//!
//! `TaskClient` is the real reqwest-backed client; `TaskService` is the
//! seam the orchestrator and tests depend on. The client owns no mutable
//! state and is cheap to clone.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Job, JobState, ModelTier};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub mod model;

use model::{CreateTaskRequest, CreateTaskResponse, TaskInput, TaskStatusResponse};

const PROVIDER_API_BASE: &str = "https://api.aicoding.sh/v1/";

pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider operations the orchestrator needs. Implemented by the real
/// client and by recording mocks in tests.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Create one generation job; returns the provider-assigned job id.
    async fn create_task(
        &self,
        tier: ModelTier,
        prompt: &str,
        images: Option<&[String]>,
    ) -> Result<String>;

    /// Query one job's current state. One provider round trip per call.
    async fn task_status(&self, job_id: &str) -> Result<Job>;
}

#[derive(Clone)]
pub struct TaskClient {
    http: Client,
    base_url: Url,
    api_key: String,
    create_timeout: Duration,
    status_timeout: Duration,
}

impl fmt::Debug for TaskClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TaskClient {
    pub fn new(api_key: String) -> Self {
        let base_url = Url::parse(PROVIDER_API_BASE).expect("valid default provider URL");
        Self::with_base_url(api_key, base_url)
    }

    /// Base URL must end with a trailing slash so relative joins keep the
    /// path prefix.
    pub fn with_base_url(api_key: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("credit-gate/0.1")
            .build()
            .expect("reqwest client");
        TaskClient {
            http,
            base_url,
            api_key,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.provider.base_url)
            .map_err(|e| Error::ProviderUnreachable(format!("invalid base url: {}", e)))?;
        let mut client = Self::with_base_url(cfg.provider.api_key.clone(), base_url);
        client.create_timeout = Duration::from_secs(cfg.provider.create_timeout_seconds);
        client.status_timeout = Duration::from_secs(cfg.provider.status_timeout_seconds);
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::ProviderUnreachable(format!("invalid endpoint {}: {}", path, e)))
    }
}

#[async_trait]
impl TaskService for TaskClient {
    #[instrument(skip_all, fields(model = tier.as_str()))]
    async fn create_task(
        &self,
        tier: ModelTier,
        prompt: &str,
        images: Option<&[String]>,
    ) -> Result<String> {
        let body = CreateTaskRequest {
            model: tier.as_str(),
            input: TaskInput { prompt, images },
        };
        let url = self.endpoint("task/create")?;

        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .timeout(self.create_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;
        if !status.is_success() {
            warn!(%status, "provider rejected create call");
            return Err(Error::ProviderRejected {
                message: model::rejection_message(status, &text),
            });
        }

        let payload: CreateTaskResponse = serde_json::from_str(&text)
            .map_err(|e| Error::ProviderUnreachable(format!("invalid create response: {}", e)))?;
        let job_id = payload
            .job_id()
            .ok_or_else(|| Error::ProviderUnreachable("create response missing job id".into()))?;
        debug!(job_id, "provider acknowledged job");
        Ok(job_id.to_string())
    }

    #[instrument(skip_all, fields(job_id))]
    async fn task_status(&self, job_id: &str) -> Result<Job> {
        let url = self.endpoint(&format!("task/{}", job_id))?;

        let res = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::ProviderRejected {
                message: model::rejection_message(status, &text),
            });
        }

        let payload: TaskStatusResponse = serde_json::from_str(&text)
            .map_err(|e| Error::ProviderUnreachable(format!("invalid status response: {}", e)))?;
        map_status(job_id, payload)
    }
}

/// Map a raw status payload onto the local job mirror.
fn map_status(job_id: &str, payload: TaskStatusResponse) -> Result<Job> {
    let state = JobState::parse_state(&payload.status).ok_or_else(|| {
        Error::ProviderUnreachable(format!("unexpected job status '{}'", payload.status))
    })?;

    let progress_pct = payload.progress.progress_pct.clamp(0.0, 100.0).round() as u8;
    let output_url = payload.result.and_then(|r| r.output_url);
    let error_message = if state == JobState::Failed {
        payload.message.filter(|m| !m.trim().is_empty())
    } else {
        None
    };

    Ok(Job {
        job_id: job_id.to_string(),
        state,
        progress_pct,
        output_url,
        error_message,
    })
}
