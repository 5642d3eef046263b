//! Credit ledger: authorization and settlement across the two identity
//! tracks.
//!
//! Database track (authenticated users): credits live in `user_profiles`
//! and are debited with a single guarded `UPDATE`. Cookie track (anonymous
//! visitors): the server holds no balance at all — `authorize` is advisory
//! and `settle` only tells the caller whether to decrement its own token.

use crate::db::{self, repo::Pool, TxStatus};
use crate::error::{Error, Result};
use crate::model::{ActionOutcome, CreditAction, Identity};
use tracing::{info, instrument, warn};

/// Which accounting path an authorization took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Database,
    Cookie,
}

/// Result of a successful `authorize` call. Read-only; nothing has been
/// debited yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub track: Track,
    pub required: i64,
    /// Server-known balance. `None` on the cookie track, where the balance
    /// is client-held and the caller must pre-check its own token.
    pub available: Option<i64>,
}

/// Result of a `settle` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Database track, successful action: the balance was decremented and
    /// the transaction log written. `new_balance` is the post-debit balance.
    Debited { new_balance: i64 },
    /// Database track, failed action: a failed-attempt row was written and
    /// nothing was charged. `balance` is the unchanged balance.
    Recorded { balance: i64 },
    /// Cookie track: no server mutation happened. The caller decrements its
    /// local token iff `should_consume_credit` is true.
    ClientDebit { should_consume_credit: bool },
}

#[derive(Clone)]
pub struct Ledger {
    pool: Pool,
}

impl Ledger {
    pub fn new(pool: Pool) -> Self {
        Ledger { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Decide whether `identity` may perform `action` at
    /// `unit_cost * quantity` credits. Read-only on both tracks.
    ///
    /// Cookie-track authorization is structurally always granted: the
    /// server cannot see the client-held balance, so the client is
    /// responsible for its own pre-check.
    #[instrument(skip_all, fields(action = action.as_str()))]
    pub async fn authorize(
        &self,
        identity: &Identity,
        action: CreditAction,
        unit_cost: i64,
        quantity: i64,
    ) -> Result<Authorization> {
        if unit_cost <= 0 || quantity <= 0 {
            return Err(Error::InvalidAmount);
        }
        let required = unit_cost * quantity;

        match identity {
            Identity::Authenticated { user_id, .. } => {
                let available = db::fetch_credits(&self.pool, user_id).await?.unwrap_or(0);
                if available < required {
                    return Err(Error::InsufficientCredits {
                        required,
                        available,
                    });
                }
                Ok(Authorization {
                    track: Track::Database,
                    required,
                    available: Some(available),
                })
            }
            Identity::Anonymous { .. } => Ok(Authorization {
                track: Track::Cookie,
                required,
                available: None,
            }),
        }
    }

    /// Finalize the cost of an action whose external outcome is known.
    /// Must be called exactly once per logical attempt; this crate's
    /// orchestrator calls it once per batch, never per job.
    ///
    /// Database track: atomic guarded decrement plus one append-only
    /// transaction row. A failed external action charges nothing but is
    /// still recorded. Cookie track: no server mutation; the returned flag
    /// instructs the caller to self-debit.
    #[instrument(skip_all, fields(action = action.as_str(), credits_used))]
    pub async fn settle(
        &self,
        identity: &Identity,
        action: CreditAction,
        credits_used: i64,
        outcome: &ActionOutcome,
    ) -> Result<Settlement> {
        if credits_used < 0 {
            return Err(Error::InvalidAmount);
        }

        match identity {
            Identity::Anonymous { .. } => {
                let should_consume_credit = matches!(outcome, ActionOutcome::Succeeded);
                Ok(Settlement::ClientDebit {
                    should_consume_credit,
                })
            }
            Identity::Authenticated { user_id, .. } => match outcome {
                ActionOutcome::Failed { message } => {
                    // No credits for a failed external action; record the
                    // attempt with the unchanged balance.
                    let balance = db::fetch_credits(&self.pool, user_id).await?.unwrap_or(0);
                    db::insert_credit_transaction(
                        &self.pool,
                        user_id,
                        action.as_str(),
                        0,
                        balance,
                        TxStatus::Failed,
                        Some(message),
                    )
                    .await?;
                    Ok(Settlement::Recorded { balance })
                }
                ActionOutcome::Succeeded => {
                    match db::debit_credits(&self.pool, user_id, credits_used).await? {
                        Some(new_balance) => {
                            db::insert_credit_transaction(
                                &self.pool,
                                user_id,
                                action.as_str(),
                                credits_used,
                                new_balance,
                                TxStatus::Success,
                                None,
                            )
                            .await?;
                            info!(user_id, new_balance, "credits settled");
                            Ok(Settlement::Debited { new_balance })
                        }
                        None => {
                            // Lost a race to a concurrent settlement (or the
                            // profile vanished). Balance is unchanged.
                            let available =
                                db::fetch_credits(&self.pool, user_id).await?.unwrap_or(0);
                            warn!(user_id, available, credits_used, "debit guard refused");
                            db::insert_credit_transaction(
                                &self.pool,
                                user_id,
                                action.as_str(),
                                0,
                                available,
                                TxStatus::Failed,
                                Some("insufficient credits at settlement"),
                            )
                            .await?;
                            Err(Error::InsufficientCredits {
                                required: credits_used,
                                available,
                            })
                        }
                    }
                }
            },
        }
    }

    /// Read the durable balance. `None` on the cookie track (client-held).
    pub async fn balance(&self, identity: &Identity) -> Result<Option<i64>> {
        match identity {
            Identity::Authenticated { user_id, .. } => {
                Ok(db::fetch_credits(&self.pool, user_id).await?)
            }
            Identity::Anonymous { .. } => Ok(None),
        }
    }

    /// Credit top-up for the payment-webhook collaborator. Atomic
    /// increment; records a grant transaction with the post-grant balance.
    #[instrument(skip_all, fields(user_id))]
    pub async fn grant(&self, user_id: &str, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        let new_balance = db::grant_credits(&self.pool, user_id, amount).await?;
        db::insert_credit_transaction(
            &self.pool,
            user_id,
            "credit_grant",
            0,
            new_balance,
            TxStatus::Success,
            None,
        )
        .await?;
        info!(user_id, amount, new_balance, "credits granted");
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo;
    use uuid::Uuid;

    async fn setup_ledger() -> Ledger {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Ledger::new(pool)
    }

    fn user(id: &str) -> Identity {
        Identity::authenticated(id, None)
    }

    #[tokio::test]
    async fn authorize_checks_balance_on_database_track() {
        let ledger = setup_ledger().await;
        repo::ensure_profile(ledger.pool(), "u1", None, 3)
            .await
            .unwrap();

        let auth = ledger
            .authorize(&user("u1"), CreditAction::VideoGeneration, 2, 1)
            .await
            .unwrap();
        assert_eq!(auth.track, Track::Database);
        assert_eq!(auth.available, Some(3));

        let err = ledger
            .authorize(&user("u1"), CreditAction::VideoGeneration, 2, 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCredits {
                required: 4,
                available: 3
            }
        ));
    }

    #[tokio::test]
    async fn authorize_rejects_bad_amounts() {
        let ledger = setup_ledger().await;
        let err = ledger
            .authorize(&user("u1"), CreditAction::WatermarkRemoval, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount));
        let err = ledger
            .authorize(&user("u1"), CreditAction::WatermarkRemoval, 1, -1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount));
    }

    #[tokio::test]
    async fn cookie_track_is_advisory_and_never_touches_the_store() {
        let ledger = setup_ledger().await;
        let visitor = Identity::anonymous(Uuid::new_v4());

        let auth = ledger
            .authorize(&visitor, CreditAction::WatermarkRemoval, 1, 1)
            .await
            .unwrap();
        assert_eq!(auth.track, Track::Cookie);
        assert_eq!(auth.available, None);

        let ok = ledger
            .settle(&visitor, CreditAction::WatermarkRemoval, 1, &ActionOutcome::Succeeded)
            .await
            .unwrap();
        assert_eq!(
            ok,
            Settlement::ClientDebit {
                should_consume_credit: true
            }
        );

        let failed = ledger
            .settle(
                &visitor,
                CreditAction::WatermarkRemoval,
                1,
                &ActionOutcome::failed("provider rejected"),
            )
            .await
            .unwrap();
        assert_eq!(
            failed,
            Settlement::ClientDebit {
                should_consume_credit: false
            }
        );

        // Nothing durable was written for the anonymous track.
        let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_profiles")
            .fetch_one(ledger.pool())
            .await
            .unwrap();
        let txs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions")
            .fetch_one(ledger.pool())
            .await
            .unwrap();
        assert_eq!((profiles, txs), (0, 0));
    }

    #[tokio::test]
    async fn settle_debits_once_and_logs_transaction() {
        let ledger = setup_ledger().await;
        repo::ensure_profile(ledger.pool(), "u1", None, 3)
            .await
            .unwrap();

        let settlement = ledger
            .settle(&user("u1"), CreditAction::VideoGeneration, 2, &ActionOutcome::Succeeded)
            .await
            .unwrap();
        assert_eq!(settlement, Settlement::Debited { new_balance: 1 });

        let txs = repo::recent_transactions(ledger.pool(), "u1", 10)
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].credits_used, 2);
        assert_eq!(txs[0].credits_remaining, 1);
        assert_eq!(txs[0].status, TxStatus::Success);
    }

    #[tokio::test]
    async fn failed_action_charges_nothing() {
        let ledger = setup_ledger().await;
        repo::ensure_profile(ledger.pool(), "u1", None, 3)
            .await
            .unwrap();

        let settlement = ledger
            .settle(
                &user("u1"),
                CreditAction::VideoGeneration,
                2,
                &ActionOutcome::failed("timeout after retries"),
            )
            .await
            .unwrap();
        // No debit happened; the attempt was only recorded.
        assert_eq!(settlement, Settlement::Recorded { balance: 3 });
        assert_eq!(repo::fetch_credits(ledger.pool(), "u1").await.unwrap(), Some(3));

        let txs = repo::recent_transactions(ledger.pool(), "u1", 10)
            .await
            .unwrap();
        assert_eq!(txs[0].credits_used, 0);
        assert_eq!(txs[0].status, TxStatus::Failed);
        assert_eq!(txs[0].error_message.as_deref(), Some("timeout after retries"));
    }

    #[tokio::test]
    async fn lost_race_is_recorded_and_surfaced() {
        let ledger = setup_ledger().await;
        repo::ensure_profile(ledger.pool(), "u1", None, 1)
            .await
            .unwrap();

        let err = ledger
            .settle(&user("u1"), CreditAction::VideoGeneration, 2, &ActionOutcome::Succeeded)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCredits {
                required: 2,
                available: 1
            }
        ));

        let txs = repo::recent_transactions(ledger.pool(), "u1", 10)
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TxStatus::Failed);
        assert_eq!(txs[0].credits_used, 0);
        assert_eq!(repo::fetch_credits(ledger.pool(), "u1").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn concurrent_settlements_never_double_spend() {
        let ledger = setup_ledger().await;
        repo::ensure_profile(ledger.pool(), "u1", None, 3)
            .await
            .unwrap();

        let user_a = user("u1");
        let user_b = user("u1");
        let a = ledger.settle(&user_a, CreditAction::VideoGeneration, 2, &ActionOutcome::Succeeded);
        let b = ledger.settle(&user_b, CreditAction::VideoGeneration, 2, &ActionOutcome::Succeeded);
        let (ra, rb) = tokio::join!(a, b);

        let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one settlement may win");
        assert_eq!(repo::fetch_credits(ledger.pool(), "u1").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn grant_tops_up_and_logs() {
        let ledger = setup_ledger().await;
        assert!(matches!(
            ledger.grant("u1", 0).await.unwrap_err(),
            Error::InvalidAmount
        ));

        assert_eq!(ledger.grant("u1", 5).await.unwrap(), 5);
        assert_eq!(ledger.grant("u1", 2).await.unwrap(), 7);

        let txs = repo::recent_transactions(ledger.pool(), "u1", 10)
            .await
            .unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].action, "credit_grant");
        assert_eq!(txs[0].credits_remaining, 7);
    }
}
