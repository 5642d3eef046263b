use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Settlement status recorded on a `credit_transactions` row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(TxStatus::Success),
            "failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }
}

/// Durable per-user credit record. The only mutable shared state in the
/// core; mutated exclusively through the guarded decrement / grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

/// Append-only settlement log entry. Written exactly once per settled
/// attempt and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: i64,
    pub user_id: String,
    pub action: String,
    pub credits_used: i64,
    /// Balance snapshot after the debit (or the unchanged balance for a
    /// failed settlement). Never negative.
    pub credits_remaining: i64,
    pub status: TxStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
