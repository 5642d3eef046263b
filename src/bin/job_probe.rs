//! Poll one provider job until it reaches a terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use credit_gate::config;
use credit_gate::model::Job;
use credit_gate::orchestrator::JobPoller;
use credit_gate::provider::{TaskClient, TaskService};
use credit_gate::Error;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Provider job id to poll
    #[arg(long)]
    job_id: String,

    /// Query once and exit instead of polling to a terminal state
    #[arg(long)]
    once: bool,
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

    let client = Arc::new(TaskClient::from_config(&cfg)?);
    if args.once {
        let job = client.task_status(&args.job_id).await?;
        print_job(&job);
        return Ok(());
    }

    let interval = Duration::from_millis(cfg.app.poll_interval_ms);
    let mut poller = JobPoller::with_budget(
        client,
        Job::new(&args.job_id),
        cfg.app.poll_failure_budget,
    );
    loop {
        match poller.poll_once().await {
            Ok(state) => {
                print_job(poller.job());
                if state.is_terminal() {
                    return Ok(());
                }
            }
            Err(Error::PollingAbandoned { failures }) => {
                anyhow::bail!("gave up after {} consecutive polling failures", failures);
            }
            Err(err) => {
                warn!(%err, "poll failed; will retry");
            }
        }
        tokio::time::sleep(interval).await;
    }
}

fn print_job(job: &Job) {
    print!("{}: {} ({}%)", job.job_id, job.state.as_str(), job.progress_pct);
    if let Some(url) = &job.output_url {
        print!(" -> {}", url);
    }
    if let Some(msg) = &job.error_message {
        print!(" [{}]", msg);
    }
    println!();
}
