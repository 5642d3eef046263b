//! Batch creation and polling orchestration for asynchronous generation
//! jobs.
//!
//! `create_batch` drives the whole billed flow: validate, authorize,
//! create each job sequentially against the provider (fail-fast with a
//! bounded retry per call), then settle the ledger exactly once for the
//! batch. Polling is caller-driven: `JobPoller` wraps one job with the
//! consecutive-failure budget and terminal-state latching, and `PollTask`
//! runs that loop as a cancellable background task.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{Ledger, Settlement};
use crate::model::{ActionOutcome, CreditAction, Identity, Job, JobBatch, JobState, ModelTier};
use crate::provider::TaskService;
use crate::retry::retry;
use crate::usage::{UsageEntry, UsageStatus, UsageWriter};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Consecutive transport failures tolerated before polling is abandoned.
pub const DEFAULT_POLL_FAILURE_BUDGET: u32 = 5;

const DEFAULT_CREATE_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One user submission: N jobs at one tier, billed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpec {
    pub tier: ModelTier,
    pub prompt: String,
    /// Optional reference images (data URLs or fetchable URLs).
    pub images: Vec<String>,
    pub job_count: u32,
}

impl BatchSpec {
    pub fn new(tier: ModelTier, prompt: impl Into<String>, job_count: u32) -> Self {
        BatchSpec {
            tier,
            prompt: prompt.into(),
            images: Vec::new(),
            job_count,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidSpec("prompt must be non-empty"));
        }
        if self.job_count == 0 {
            return Err(Error::InvalidSpec("job count must be positive"));
        }
        Ok(())
    }
}

/// How the batch was billed. The asymmetry matters for user messaging:
/// `Unbilled` means "your videos are coming, but billing needs manual
/// reconciliation", not a failure of the action itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Billing {
    /// Database track: debit applied.
    Settled { new_balance: i64 },
    /// Cookie track: the caller must decrement its own token iff true.
    ClientDebit { should_consume_credit: bool },
    /// Jobs exist but the guarded debit refused at settlement: a concurrent
    /// spend won between authorization and settlement. Nothing was charged.
    DebitRefused { required: i64, available: i64 },
    /// Jobs exist but the ledger was unavailable at settlement.
    Unbilled { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchCreated {
    pub batch: JobBatch,
    pub billing: Billing,
}

pub struct Orchestrator {
    provider: Arc<dyn TaskService>,
    ledger: Ledger,
    usage: UsageWriter,
    max_create_attempts: u32,
    retry_delay: Duration,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn TaskService>, ledger: Ledger, usage: UsageWriter) -> Self {
        Orchestrator {
            provider,
            ledger,
            usage,
            max_create_attempts: DEFAULT_CREATE_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_settings(
        provider: Arc<dyn TaskService>,
        ledger: Ledger,
        usage: UsageWriter,
        cfg: &Config,
    ) -> Self {
        let mut this = Self::new(provider, ledger, usage);
        this.max_create_attempts = cfg.provider.max_create_attempts.max(1);
        this.retry_delay = Duration::from_millis(cfg.provider.retry_delay_ms);
        this
    }

    /// Create `spec.job_count` jobs sequentially, then settle once for the
    /// whole batch.
    ///
    /// Creation is deliberately sequential so job index correlates with
    /// submission order and fail-fast stays simple. Each provider call is
    /// retried on transient failure up to the configured attempt count; a
    /// call that exhausts its retries aborts the whole batch. Jobs already
    /// created provider-side are not rolled back, but nothing is charged.
    #[instrument(skip_all, fields(tier = spec.tier.as_str(), job_count = spec.job_count))]
    pub async fn create_batch(
        &self,
        identity: &Identity,
        spec: &BatchSpec,
    ) -> Result<BatchCreated> {
        spec.validate()?;
        let unit_cost = spec.tier.unit_cost();
        let quantity = i64::from(spec.job_count);
        self.ledger
            .authorize(identity, CreditAction::VideoGeneration, unit_cost, quantity)
            .await?;

        let images = if spec.images.is_empty() {
            None
        } else {
            Some(spec.images.as_slice())
        };

        let mut jobs: Vec<Job> = Vec::with_capacity(spec.job_count as usize);
        for index in 0..spec.job_count {
            let created = retry(
                || self.provider.create_task(spec.tier, &spec.prompt, images),
                self.max_create_attempts,
                self.retry_delay,
                Error::is_transient,
            )
            .await;

            match created {
                Ok(job_id) => {
                    debug!(index, %job_id, "job created");
                    jobs.push(Job::new(job_id));
                }
                Err(err) => {
                    warn!(%err, index, created = jobs.len(), "job creation failed; aborting batch");
                    // Record the failed attempt; charges nothing on either
                    // track.
                    let outcome = ActionOutcome::failed(err.to_string());
                    if let Err(settle_err) = self
                        .ledger
                        .settle(identity, CreditAction::VideoGeneration, 0, &outcome)
                        .await
                    {
                        warn!(%settle_err, "could not record failed batch settlement");
                    }
                    self.usage
                        .record(&UsageEntry {
                            identity: identity.clone(),
                            action: CreditAction::VideoGeneration,
                            credits_used: 0,
                            credits_remaining: None,
                            status: UsageStatus::Failed,
                            error_message: Some(err.to_string()),
                        })
                        .await;
                    return Err(err);
                }
            }
        }

        let credits_used = unit_cost * quantity;
        let billing = match self
            .ledger
            .settle(
                identity,
                CreditAction::VideoGeneration,
                credits_used,
                &ActionOutcome::Succeeded,
            )
            .await
        {
            Ok(Settlement::Debited { new_balance })
            | Ok(Settlement::Recorded {
                balance: new_balance,
            }) => {
                self.usage
                    .record(&UsageEntry {
                        identity: identity.clone(),
                        action: CreditAction::VideoGeneration,
                        credits_used,
                        credits_remaining: Some(new_balance),
                        status: UsageStatus::Success,
                        error_message: None,
                    })
                    .await;
                Billing::Settled { new_balance }
            }
            Ok(Settlement::ClientDebit {
                should_consume_credit,
            }) => {
                self.usage
                    .record(&UsageEntry {
                        identity: identity.clone(),
                        action: CreditAction::VideoGeneration,
                        credits_used,
                        credits_remaining: None,
                        status: UsageStatus::Success,
                        error_message: None,
                    })
                    .await;
                Billing::ClientDebit {
                    should_consume_credit,
                }
            }
            Err(Error::LedgerUnavailable(err)) => {
                // The jobs exist; do not fail the user-visible action.
                // Flag for manual reconciliation instead.
                warn!(%err, "batch created but settlement unavailable; marking unbilled");
                let reason = err.to_string();
                self.usage
                    .record(&UsageEntry {
                        identity: identity.clone(),
                        action: CreditAction::VideoGeneration,
                        credits_used,
                        credits_remaining: None,
                        status: UsageStatus::Unbilled,
                        error_message: Some(reason.clone()),
                    })
                    .await;
                Billing::Unbilled { reason }
            }
            Err(Error::InsufficientCredits {
                required,
                available,
            }) => {
                // A concurrent spend won between authorization and
                // settlement. The jobs exist; return them uncharged rather
                // than dropping the ids the caller already paid provider
                // traffic for.
                warn!(required, available, "debit refused at settlement; batch returned uncharged");
                self.usage
                    .record(&UsageEntry {
                        identity: identity.clone(),
                        action: CreditAction::VideoGeneration,
                        credits_used: 0,
                        credits_remaining: Some(available),
                        status: UsageStatus::Failed,
                        error_message: Some(format!(
                            "insufficient credits at settlement: required {}, available {}",
                            required, available
                        )),
                    })
                    .await;
                Billing::DebitRefused {
                    required,
                    available,
                }
            }
            Err(err) => {
                self.usage
                    .record(&UsageEntry {
                        identity: identity.clone(),
                        action: CreditAction::VideoGeneration,
                        credits_used: 0,
                        credits_remaining: None,
                        status: UsageStatus::Failed,
                        error_message: Some(err.to_string()),
                    })
                    .await;
                return Err(err);
            }
        };

        info!(jobs = jobs.len(), ?billing, "batch created");
        Ok(BatchCreated {
            batch: JobBatch::new(jobs),
            billing,
        })
    }

    /// Per-call polling contract: one provider round trip, mapped state.
    pub async fn poll_status(&self, job_id: &str) -> Result<Job> {
        self.provider.task_status(job_id).await
    }

    /// Poll every non-terminal job in the batch concurrently and apply the
    /// updates. Terminal jobs are not re-queried and report their latched
    /// state. Returns one result per job, in batch order.
    pub async fn poll_batch(&self, batch: &mut JobBatch) -> Vec<Result<JobState>> {
        let lookups = batch.jobs.iter().map(|job| async {
            if job.state.is_terminal() {
                None
            } else {
                Some(self.provider.task_status(&job.job_id).await)
            }
        });
        let results = join_all(lookups).await;

        results
            .into_iter()
            .zip(batch.jobs.iter_mut())
            .map(|(res, job)| match res {
                None => Ok(job.state),
                Some(Ok(update)) => {
                    *job = update;
                    Ok(job.state)
                }
                Some(Err(err)) => Err(err),
            })
            .collect()
    }

    pub fn poller(&self, job: Job, failure_budget: u32) -> JobPoller {
        JobPoller::with_budget(Arc::clone(&self.provider), job, failure_budget)
    }
}

/// Caller-driven polling wrapper for one job.
///
/// Tolerates up to `failure_budget` consecutive transport failures; one
/// more forces `PollingAbandoned`, which is distinct from a
/// provider-reported `failed` job. A successful poll resets the counter.
/// Once a terminal state is observed it is latched: the provider is never
/// queried again for this job.
pub struct JobPoller {
    provider: Arc<dyn TaskService>,
    job: Job,
    consecutive_failures: u32,
    failure_budget: u32,
}

impl JobPoller {
    pub fn new(provider: Arc<dyn TaskService>, job: Job) -> Self {
        Self::with_budget(provider, job, DEFAULT_POLL_FAILURE_BUDGET)
    }

    pub fn with_budget(provider: Arc<dyn TaskService>, job: Job, failure_budget: u32) -> Self {
        JobPoller {
            provider,
            job,
            consecutive_failures: 0,
            failure_budget,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// One polling tick.
    pub async fn poll_once(&mut self) -> Result<JobState> {
        if self.job.state.is_terminal() {
            return Ok(self.job.state);
        }

        match self.provider.task_status(&self.job.job_id).await {
            Ok(update) => {
                self.consecutive_failures = 0;
                self.job = update;
                Ok(self.job.state)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures > self.failure_budget {
                    warn!(
                        job_id = %self.job.job_id,
                        failures = self.consecutive_failures,
                        "abandoning polling"
                    );
                    Err(Error::PollingAbandoned {
                        failures: self.consecutive_failures,
                    })
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Last observed state of a background polling task.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub job: Job,
    /// True once the failure budget was exhausted and polling stopped.
    pub abandoned: bool,
}

/// Cancellable background polling loop for one job. Replaces ad-hoc
/// interval timers: the task polls on a fixed cadence, publishes snapshots
/// through a watch channel, and stops on terminal state, abandonment, or
/// `stop()`/drop.
pub struct PollTask {
    handle: JoinHandle<()>,
    rx: watch::Receiver<PollSnapshot>,
}

impl PollTask {
    pub fn spawn(
        provider: Arc<dyn TaskService>,
        job: Job,
        interval: Duration,
        failure_budget: u32,
    ) -> Self {
        let (tx, rx) = watch::channel(PollSnapshot {
            job: job.clone(),
            abandoned: false,
        });
        let handle = tokio::spawn(async move {
            let mut poller = JobPoller::with_budget(provider, job, failure_budget);
            loop {
                match poller.poll_once().await {
                    Ok(state) => {
                        let _ = tx.send(PollSnapshot {
                            job: poller.job().clone(),
                            abandoned: false,
                        });
                        if state.is_terminal() {
                            break;
                        }
                    }
                    Err(Error::PollingAbandoned { .. }) => {
                        let _ = tx.send(PollSnapshot {
                            job: poller.job().clone(),
                            abandoned: true,
                        });
                        break;
                    }
                    // Transient failure within budget: keep polling.
                    Err(_) => {}
                }
                tokio::time::sleep(interval).await;
            }
        });
        PollTask { handle, rx }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.rx.clone()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.rx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop polling. The provider is not notified; there is no cancel-job
    /// operation.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// UX-only progress ramp for jobs that have not reported provider-side
/// progress yet. Monotone in `elapsed`, capped below 100 so it can never
/// look terminal, and never a substitute for a provider-reported
/// percentage once one arrives.
pub fn simulated_progress(elapsed: Duration, expected_total: Duration) -> u8 {
    const CAP: f64 = 95.0;
    if expected_total.is_zero() {
        return 0;
    }
    let ratio = elapsed.as_secs_f64() / expected_total.as_secs_f64();
    (ratio * 100.0).min(CAP) as u8
}
