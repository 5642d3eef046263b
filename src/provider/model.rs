//! Wire types for the external job-provider API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct CreateTaskRequest<'a> {
    pub model: &'a str,
    pub input: TaskInput<'a>,
}

#[derive(Debug, Serialize)]
pub struct TaskInput<'a> {
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<&'a [String]>,
}

/// Create-call acknowledgement. Some provider deployments populate `id`,
/// others `task_id`; either identifies the job.
#[derive(Debug, Deserialize)]
pub struct CreateTaskResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl CreateTaskResponse {
    pub fn job_id(&self) -> Option<&str> {
        self.task_id
            .as_deref()
            .or(self.id.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskProgress {
    #[serde(default)]
    pub progress_pct: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub output_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: TaskProgress,
    #[serde(default)]
    pub result: Option<TaskResult>,
}

/// Extract a human-readable message from a provider error body, which is
/// either `{"error": {"message": ...}}` or `{"message": ...}`. Falls back
/// to the raw body, then to the HTTP status.
pub fn rejection_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = value
            .pointer("/error/message")
            .or_else(|| value.pointer("/message"))
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("provider error {}", status)
    } else {
        format!("provider error {}: {}", status, trimmed)
    }
}
