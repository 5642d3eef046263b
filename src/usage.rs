//! Best-effort usage-log writer for analytics and audit.
//!
//! A failed write must never abort the primary flow, so `record` swallows
//! store errors after logging them.

use crate::db::{self, repo::Pool};
use crate::model::{CreditAction, Identity};
use tracing::{instrument, warn};

/// Outcome recorded on a usage row. `Unbilled` marks the reconciliation
/// case: the external action succeeded but settlement could not reach the
/// ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    Success,
    Failed,
    Unbilled,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Success => "success",
            UsageStatus::Failed => "failed",
            UsageStatus::Unbilled => "unbilled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsageEntry {
    pub identity: Identity,
    pub action: CreditAction,
    pub credits_used: i64,
    /// Post-settlement balance when known (database track only).
    pub credits_remaining: Option<i64>,
    pub status: UsageStatus,
    pub error_message: Option<String>,
}

#[derive(Clone)]
pub struct UsageWriter {
    pool: Pool,
}

impl UsageWriter {
    pub fn new(pool: Pool) -> Self {
        UsageWriter { pool }
    }

    /// Write one usage row. Best-effort: failures are logged and dropped.
    #[instrument(skip_all, fields(action = entry.action.as_str(), status = entry.status.as_str()))]
    pub async fn record(&self, entry: &UsageEntry) {
        let (user_id, user_email, visitor_id) = match &entry.identity {
            Identity::Authenticated { user_id, email } => {
                (Some(user_id.as_str()), email.as_deref(), None)
            }
            Identity::Anonymous { visitor_id } => (None, None, Some(visitor_id.to_string())),
        };

        let result = db::insert_usage_log(
            &self.pool,
            user_id,
            visitor_id.as_deref(),
            user_email,
            entry.action.as_str(),
            entry.credits_used,
            entry.credits_remaining,
            entry.status.as_str(),
            entry.error_message.as_deref(),
        )
        .await;

        if let Err(err) = result {
            warn!(?err, "failed to write usage log; continuing");
        }
    }
}
