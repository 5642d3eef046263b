//! Client-held credit token for anonymous visitors (the cookie track).
//!
//! The server never stores these balances; it only mints, validates and
//! advises. The caller keeps the encoded token in a cookie and self-debits
//! when `settle` says so. The token is plain JSON with no signature, so
//! the balance is entirely client-trusted: a known integrity gap.
//! Validation only rejects malformed, expired, or implausible tokens.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorToken {
    pub visitor_id: Uuid,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VisitorToken {
    /// Mint a fresh token with the configured starting grant and TTL.
    pub fn issue(initial_credits: i64, ttl_days: i64, now: DateTime<Utc>) -> Self {
        VisitorToken {
            visitor_id: Uuid::new_v4(),
            credits: initial_credits.max(0),
            created_at: now,
            expires_at: now + Duration::days(ttl_days),
        }
    }

    /// Parse and validate an encoded token. Returns `None` for anything
    /// structurally broken, expired, or holding an implausible balance —
    /// the caller then mints a fresh token, exactly as a corrupt cookie
    /// would be replaced.
    pub fn parse(raw: &str, max_credits: i64, now: DateTime<Utc>) -> Option<Self> {
        let token: VisitorToken = serde_json::from_str(raw).ok()?;
        if token.credits < 0 || token.credits > max_credits {
            return None;
        }
        if token.expires_at <= now {
            return None;
        }
        Some(token)
    }

    /// Parse the caller's cookie value if present and valid, otherwise
    /// mint a new visitor.
    pub fn get_or_issue(
        raw: Option<&str>,
        initial_credits: i64,
        ttl_days: i64,
        now: DateTime<Utc>,
    ) -> Self {
        raw.and_then(|r| Self::parse(r, initial_credits, now))
            .unwrap_or_else(|| Self::issue(initial_credits, ttl_days, now))
    }

    pub fn encode(&self) -> String {
        // Serialization of a plain struct cannot fail.
        serde_json::to_string(self).expect("visitor token serializes")
    }

    pub fn has_credits(&self) -> bool {
        self.credits > 0
    }

    /// Self-debit one credit. Returns the remaining balance.
    pub fn consume(&mut self) -> Result<i64> {
        if self.credits < 1 {
            return Err(Error::InsufficientCredits {
                required: 1,
                available: 0,
            });
        }
        self.credits -= 1;
        Ok(self.credits)
    }
}
