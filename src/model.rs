use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two credit-accounting tracks. Authenticated users debit a durable
/// balance; anonymous visitors hold their balance in a client-side token
/// that the server never reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated {
        user_id: String,
        email: Option<String>,
    },
    Anonymous {
        visitor_id: Uuid,
    },
}

impl Identity {
    pub fn authenticated(user_id: impl Into<String>, email: Option<String>) -> Self {
        Identity::Authenticated {
            user_id: user_id.into(),
            email,
        }
    }

    pub fn anonymous(visitor_id: Uuid) -> Self {
        Identity::Anonymous { visitor_id }
    }

    /// Resolve an identity from what the request handler extracted: an
    /// authenticated user id wins, otherwise the visitor id from the
    /// client token. Nothing at all is a caller error.
    pub fn resolve(
        user_id: Option<(String, Option<String>)>,
        visitor_id: Option<Uuid>,
    ) -> Result<Self> {
        match (user_id, visitor_id) {
            (Some((id, _)), _) if id.trim().is_empty() => Err(Error::IdentityMissing),
            (Some((id, email)), _) => Ok(Identity::Authenticated { user_id: id, email }),
            (None, Some(visitor_id)) => Ok(Identity::Anonymous { visitor_id }),
            (None, None) => Err(Error::IdentityMissing),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous { .. })
    }
}

/// Gated actions that consume credits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CreditAction {
    WatermarkRemoval,
    VideoGeneration,
    PromptGeneration,
}

impl CreditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditAction::WatermarkRemoval => "watermark_removal",
            CreditAction::VideoGeneration => "video_generation",
            CreditAction::PromptGeneration => "prompt_generation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "watermark_removal" => Some(CreditAction::WatermarkRemoval),
            "video_generation" => Some(CreditAction::VideoGeneration),
            "prompt_generation" => Some(CreditAction::PromptGeneration),
            _ => None,
        }
    }
}

/// Provider model tiers for video generation. The unwatermarked tier costs
/// double.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelTier {
    Sora2,
    Sora2Unwm,
}

impl ModelTier {
    /// Wire name sent to the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Sora2 => "sora2",
            ModelTier::Sora2Unwm => "sora2-unwm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sora2" => Some(ModelTier::Sora2),
            "sora2-unwm" => Some(ModelTier::Sora2Unwm),
            _ => None,
        }
    }

    /// Credits charged per job at this tier.
    pub fn unit_cost(&self) -> i64 {
        match self {
            ModelTier::Sora2 => 1,
            ModelTier::Sora2Unwm => 2,
        }
    }
}

/// Job lifecycle: `pending -> processing -> {completed | failed}`. No
/// transition leaves a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Local mirror of one provider-owned generation job. Mutated only by
/// polling responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Provider-assigned id; never generated locally.
    pub job_id: String,
    pub state: JobState,
    /// Provider-reported progress, 0..=100. Independent of any locally
    /// simulated progress ramp.
    pub progress_pct: u8,
    /// Set once the job completes.
    pub output_url: Option<String>,
    /// Set when the provider reports the job failed.
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(job_id: impl Into<String>) -> Self {
        Job {
            job_id: job_id.into(),
            state: JobState::Pending,
            progress_pct: 0,
            output_url: None,
            error_message: None,
        }
    }
}

/// Ordered jobs created from one submission. Order matches submission
/// order; billing is one settlement for the whole batch, never per job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobBatch {
    pub jobs: Vec<Job>,
}

impl JobBatch {
    pub fn new(jobs: Vec<Job>) -> Self {
        JobBatch { jobs }
    }

    /// A batch is finished only when every job is terminal. Partial
    /// completion is a displayable intermediate state, not an error.
    pub fn is_finished(&self) -> bool {
        self.jobs.iter().all(|j| j.state.is_terminal())
    }

    pub fn completed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Failed)
            .count()
    }
}

/// Outcome of the external action a settlement is finalizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed { message: String },
}

impl ActionOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        ActionOutcome::Failed {
            message: message.into(),
        }
    }
}
