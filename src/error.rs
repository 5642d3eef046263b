use thiserror::Error;

/// Unified error taxonomy for the ledger and the orchestrator.
///
/// The variants fall into three classes that callers handle differently:
/// caller programming errors (`IdentityMissing`, `InvalidAmount`,
/// `InvalidSpec`) fail fast and are never retried; expected business
/// conditions (`InsufficientCredits`) surface verbatim to the end user;
/// transient infrastructure failures (`ProviderUnreachable`,
/// `LedgerUnavailable`, `PollingAbandoned`) carry their own retry or
/// reconciliation policy.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither an authenticated user id nor a visitor id was supplied.
    #[error("identity missing: neither a user id nor a visitor id was supplied")]
    IdentityMissing,

    /// Unit cost or quantity was zero or negative.
    #[error("invalid amount: unit cost and quantity must be positive")]
    InvalidAmount,

    /// Batch spec failed validation before any external side effect.
    #[error("invalid batch spec: {0}")]
    InvalidSpec(&'static str),

    /// Balance too low for the requested action. Terminal and user-facing;
    /// the caller should prompt for a purchase, never retry.
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// Transport-level failure talking to the job provider (timeout,
    /// connection reset, unparseable response). Retryable during batch
    /// creation; counts against the consecutive-failure budget when polling.
    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// The provider answered with a non-success status. Assumed
    /// deterministic (e.g. invalid prompt) and never retried.
    #[error("provider rejected request: {message}")]
    ProviderRejected { message: String },

    /// Durable-store failure during a ledger operation. When this happens
    /// after a successful external action the action is NOT undone; the
    /// attempt must be logged as unbilled for manual reconciliation.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(#[from] sqlx::Error),

    /// Local, caller-side give-up after too many consecutive poll failures.
    /// Distinct from a provider-reported `failed` job: this means the
    /// network is flaky, not that generation failed.
    #[error("polling abandoned after {failures} consecutive transport failures")]
    PollingAbandoned { failures: u32 },
}

impl Error {
    /// Whether a batch-creation attempt may be retried after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ProviderUnreachable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
