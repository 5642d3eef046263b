use super::model::{CreditTransaction, TxStatus, UserProfile};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> sqlx::Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let path = rest.trim_start_matches("//");
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let expanded = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> sqlx::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

/// Create the profile if absent (with the starting grant), then return it.
#[instrument(skip_all)]
pub async fn ensure_profile(
    pool: &Pool,
    user_id: &str,
    email: Option<&str>,
    starting_credits: i64,
) -> sqlx::Result<UserProfile> {
    sqlx::query(
        "INSERT INTO user_profiles (id, email, credits) VALUES (?, ?, ?) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(user_id)
    .bind(email)
    .bind(starting_credits)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT id, email, credits, created_at FROM user_profiles WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(UserProfile {
        id: row.get("id"),
        email: row.get("email"),
        credits: row.get("credits"),
        created_at: row.get("created_at"),
    })
}

#[instrument(skip_all)]
pub async fn fetch_credits(pool: &Pool, user_id: &str) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>("SELECT credits FROM user_profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Atomic conditional decrement. Returns the post-debit balance, or `None`
/// when the non-negative guard refused the debit (or the profile does not
/// exist). Single statement so concurrent settlements serialize correctly;
/// never read-then-write.
#[instrument(skip_all)]
pub async fn debit_credits(pool: &Pool, user_id: &str, amount: i64) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE user_profiles \
         SET credits = credits - ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND credits >= ? \
         RETURNING credits",
    )
    .bind(amount)
    .bind(user_id)
    .bind(amount)
    .fetch_optional(pool)
    .await
}

/// Credit top-up (payment webhook contract). Creates the profile when it
/// does not exist yet. Returns the post-grant balance.
#[instrument(skip_all)]
pub async fn grant_credits(pool: &Pool, user_id: &str, amount: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO user_profiles (id, credits) VALUES (?, ?) \
         ON CONFLICT (id) DO UPDATE \
         SET credits = credits + excluded.credits, updated_at = CURRENT_TIMESTAMP \
         RETURNING credits",
    )
    .bind(user_id)
    .bind(amount)
    .fetch_one(pool)
    .await
}

#[instrument(skip_all)]
pub async fn insert_credit_transaction(
    pool: &Pool,
    user_id: &str,
    action: &str,
    credits_used: i64,
    credits_remaining: i64,
    status: TxStatus,
    error_message: Option<&str>,
) -> sqlx::Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO credit_transactions \
         (user_id, action, credits_used, credits_remaining, status, error_message) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(action)
    .bind(credits_used)
    .bind(credits_remaining)
    .bind(status.as_str())
    .bind(error_message)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn recent_transactions(
    pool: &Pool,
    user_id: &str,
    limit: i64,
) -> sqlx::Result<Vec<CreditTransaction>> {
    let rows = sqlx::query(
        "SELECT id, user_id, action, credits_used, credits_remaining, status, error_message, created_at \
         FROM credit_transactions WHERE user_id = ? \
         ORDER BY id DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let status_str: String = row.get("status");
            let status = TxStatus::parse(&status_str).ok_or_else(|| {
                sqlx::Error::Decode(
                    format!("unknown transaction status: {}", status_str).into(),
                )
            })?;
            Ok(CreditTransaction {
                id: row.get("id"),
                user_id: row.get("user_id"),
                action: row.get("action"),
                credits_used: row.get("credits_used"),
                credits_remaining: row.get("credits_remaining"),
                status,
                error_message: row.get("error_message"),
                created_at: row.get("created_at"),
            })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub async fn insert_usage_log(
    pool: &Pool,
    user_id: Option<&str>,
    visitor_id: Option<&str>,
    user_email: Option<&str>,
    action: &str,
    credits_used: i64,
    credits_remaining: Option<i64>,
    status: &str,
    error_message: Option<&str>,
) -> sqlx::Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO usage_logs \
         (user_id, visitor_id, user_email, action, credits_used, credits_remaining, status, error_message) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(visitor_id)
    .bind(user_email)
    .bind(action)
    .bind(credits_used)
    .bind(credits_remaining)
    .bind(status)
    .bind(error_message)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://x/y"),
            "postgres://x/y".to_string()
        );
        assert!(prepare_sqlite_url("sqlite:///tmp/a/b.db").starts_with("sqlite:///tmp/a/"));
    }

    #[tokio::test]
    async fn ensure_profile_is_idempotent() {
        let pool = setup_pool().await;
        let p1 = ensure_profile(&pool, "u1", Some("u1@example.com"), 3)
            .await
            .unwrap();
        assert_eq!(p1.credits, 3);

        // Second call must not re-grant.
        debit_credits(&pool, "u1", 1).await.unwrap();
        let p2 = ensure_profile(&pool, "u1", None, 3).await.unwrap();
        assert_eq!(p2.credits, 2);
        assert_eq!(p2.email.as_deref(), Some("u1@example.com"));
    }

    #[tokio::test]
    async fn debit_respects_guard() {
        let pool = setup_pool().await;
        ensure_profile(&pool, "u1", None, 2).await.unwrap();

        assert_eq!(debit_credits(&pool, "u1", 2).await.unwrap(), Some(0));
        // Balance exhausted: guard refuses.
        assert_eq!(debit_credits(&pool, "u1", 1).await.unwrap(), None);
        assert_eq!(fetch_credits(&pool, "u1").await.unwrap(), Some(0));
        // Unknown user looks the same as a refused debit.
        assert_eq!(debit_credits(&pool, "nobody", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn grant_upserts_profile() {
        let pool = setup_pool().await;
        assert_eq!(grant_credits(&pool, "fresh", 5).await.unwrap(), 5);
        assert_eq!(grant_credits(&pool, "fresh", 2).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn transactions_are_append_only_and_ordered() {
        let pool = setup_pool().await;
        ensure_profile(&pool, "u1", None, 5).await.unwrap();
        insert_credit_transaction(&pool, "u1", "video_generation", 2, 3, TxStatus::Success, None)
            .await
            .unwrap();
        insert_credit_transaction(
            &pool,
            "u1",
            "video_generation",
            0,
            3,
            TxStatus::Failed,
            Some("provider down"),
        )
        .await
        .unwrap();

        let txs = recent_transactions(&pool, "u1", 10).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].status, TxStatus::Failed);
        assert_eq!(txs[0].credits_used, 0);
        assert_eq!(txs[1].status, TxStatus::Success);
        assert_eq!(txs[1].credits_remaining, 3);
    }

    #[tokio::test]
    async fn usage_log_accepts_both_tracks() {
        let pool = setup_pool().await;
        insert_usage_log(
            &pool,
            Some("u1"),
            None,
            Some("u1@example.com"),
            "watermark_removal",
            1,
            Some(4),
            "success",
            None,
        )
        .await
        .unwrap();
        insert_usage_log(
            &pool,
            None,
            Some("11111111-2222-3333-4444-555555555555"),
            None,
            "watermark_removal",
            0,
            None,
            "failed",
            Some("provider rejected"),
        )
        .await
        .unwrap();

        let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(cnt, 2);
    }
}
