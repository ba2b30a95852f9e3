//! Drives a simulated flaky visitor service through a single-call session, a
//! batch run and a few poll cycles, logging every outcome.
//!
//! ```text
//! callflow-demo --retries 2 --retry-base-ms 50 --items 20 --poll-interval-ms 500
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use callflow_core::{CancelReason, OperationError};
use callflow_runtime::{
    init_tracing, ArgOperation, BatchRunner, CallOptions, CallSession, CancellationToken,
    Executor, LogFormat, MetricsErrorCounter, Operation, PollOptions, PollSession, RuntimeConfig,
    TracingAlertSink,
};
use clap::Parser;
use rand::Rng;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "callflow-demo",
    version,
    about = "Run the callflow sessions against a simulated flaky backend"
)]
struct Cli {
    #[command(flatten)]
    runtime: RuntimeConfig,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Items submitted to the batch run.
    #[arg(long, default_value_t = 12)]
    items: u32,

    /// Probability that one simulated request fails, between 0 and 1.
    #[arg(long = "failure-rate", default_value_t = 0.3)]
    failure_rate: f64,

    /// Poll cycles to wait for before stopping.
    #[arg(long = "poll-cycles", default_value_t = 3)]
    poll_cycles: u32,
}

/// Looks a visitor up after 20-120ms, failing with a 503 at `failure_rate`.
fn flaky_lookup(failure_rate: f64) -> ArgOperation<u32, String> {
    ArgOperation::new(move |id: u32, token: CancellationToken| {
        let mut rng = rand::rng();
        let fails = rng.random_bool(failure_rate);
        let latency = Duration::from_millis(rng.random_range(20..120));
        async move {
            tokio::select! {
                () = token.cancelled() => {
                    return Err(OperationError::cancelled(
                        token.reason().unwrap_or(CancelReason::Requested),
                    ));
                }
                () = tokio::time::sleep(latency) => {}
            }
            if fails {
                Err(OperationError::status(503, format!("visitor service unavailable for {id}")))
            } else {
                Ok(format!("visitor-{id}"))
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, "info")?;

    let executor = Executor::new(
        Arc::new(TracingAlertSink),
        Arc::new(MetricsErrorCounter::new()),
    )
    .with_config(cli.runtime.clone());
    let lookup = flaky_lookup(cli.failure_rate.clamp(0.0, 1.0));

    // Single call.
    let call = CallSession::with_options(
        &executor,
        lookup.clone(),
        CallOptions::new(&executor).with_execute_options(
            executor
                .default_options()
                .named("lookup_visitor")
                .with_success_message("Visitor found")
                .with_error_title("Lookup failed"),
        ),
    );
    match call.call(1).await {
        Ok(visitor) => info!(%visitor, "single call succeeded"),
        Err(err) => info!(error = %err, "single call did not succeed"),
    }

    // Batch.
    let runner = BatchRunner::new(&executor, lookup.clone());
    let options = runner.default_options().on_progress(|p| {
        info!(processed = p.processed, total = p.total, percent = p.percent(), "batch progress");
    });
    match runner.execute_batch((1..=cli.items).collect(), options).await {
        Ok(outcome) => info!(
            total = outcome.total,
            successful = outcome.successful,
            failed = outcome.failed,
            "batch finished"
        ),
        Err(err) => info!(error = %err, "batch stopped early"),
    }

    // Poll.
    let poll_lookup = lookup.clone();
    let poll = PollSession::with_options(
        &executor,
        move |token| {
            let bound = poll_lookup.bind(0);
            async move { bound.run(token).await }
        },
        PollOptions::new(&executor),
    );
    poll.start_polling();
    let wanted = u64::from(cli.poll_cycles);
    poll.subscribe()
        .wait_for(|s| s.cycles >= wanted)
        .await
        .context("poll session closed before enough cycles ran")?;
    poll.stop_polling();

    let state = poll.state();
    info!(
        cycles = state.cycles,
        skipped = state.skipped_cycles,
        last_value = state.data.as_deref().unwrap_or("-"),
        last_error = state.error.map(|e| e.to_string()).as_deref().unwrap_or("-"),
        "polling stopped"
    );
    Ok(())
}
