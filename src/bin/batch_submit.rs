//! Submit a batch of generation jobs and poll them to completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use credit_gate::config;
use credit_gate::db;
use credit_gate::ledger::Ledger;
use credit_gate::model::{Identity, ModelTier};
use credit_gate::orchestrator::{BatchSpec, Billing, Orchestrator};
use credit_gate::provider::TaskClient;
use credit_gate::usage::UsageWriter;
use credit_gate::visitor::VisitorToken;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Generation prompt
    #[arg(long)]
    prompt: String,

    /// Model tier (sora2 or sora2-unwm)
    #[arg(long, default_value = "sora2")]
    model: String,

    /// Number of jobs to create
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Reference image URL or data URL (repeatable)
    #[arg(long)]
    image: Vec<String>,

    /// Bill this user's durable balance; omitted means a fresh anonymous
    /// visitor
    #[arg(long)]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let Some(tier) = ModelTier::parse(&args.model) else {
        bail!("unknown model tier: {}", args.model);
    };

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/credit-gate.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let mut visitor = None;
    let identity = match &args.user {
        Some(user_id) => {
            db::ensure_profile(&pool, user_id, None, cfg.credits.visitor_initial)
                .await
                .context("ensure profile")?;
            Identity::authenticated(user_id.clone(), None)
        }
        None => {
            let token = VisitorToken::issue(
                cfg.credits.visitor_initial,
                cfg.credits.visitor_expiry_days,
                chrono::Utc::now(),
            );
            let identity = Identity::anonymous(token.visitor_id);
            visitor = Some(token);
            identity
        }
    };

    let client = Arc::new(TaskClient::from_config(&cfg)?);
    let ledger = Ledger::new(pool);
    let usage = UsageWriter::new(ledger.pool().clone());
    let orchestrator = Orchestrator::with_settings(client, ledger, usage, &cfg);

    let mut spec = BatchSpec::new(tier, args.prompt.clone(), args.count);
    spec.images = args.image.clone();

    let created = orchestrator.create_batch(&identity, &spec).await?;
    match &created.billing {
        Billing::Settled { new_balance } => {
            println!("billed; balance is now {}", new_balance);
        }
        Billing::ClientDebit {
            should_consume_credit,
        } => {
            if let Some(token) = visitor.as_mut() {
                if *should_consume_credit {
                    let remaining = token.consume()?;
                    println!("visitor credit consumed; {} remaining", remaining);
                }
                println!("visitor token: {}", token.encode());
            }
        }
        Billing::DebitRefused {
            required,
            available,
        } => {
            warn!(
                required,
                available, "debit refused at settlement; jobs created uncharged"
            );
        }
        Billing::Unbilled { reason } => {
            warn!(%reason, "batch created but unbilled");
        }
    }
    for job in &created.batch.jobs {
        println!("created {}", job.job_id);
    }

    let mut batch = created.batch;
    let interval = Duration::from_millis(cfg.app.poll_interval_ms);
    while !batch.is_finished() {
        tokio::time::sleep(interval).await;
        for result in orchestrator.poll_batch(&mut batch).await {
            if let Err(err) = result {
                warn!(%err, "poll failed");
            }
        }
        println!(
            "progress: {} completed, {} failed, {} total",
            batch.completed(),
            batch.failed(),
            batch.jobs.len()
        );
    }

    for job in &batch.jobs {
        match &job.output_url {
            Some(url) => println!("{}: {}", job.job_id, url),
            None => println!(
                "{}: {} ({})",
                job.job_id,
                job.state.as_str(),
                job.error_message.as_deref().unwrap_or("no detail")
            ),
        }
    }
    Ok(())
}
