//! Load-balanced pipeline demo
//!
//! Usage:
//!   pipeline_demo --messages 50000 --stages 4
//!   pipeline_demo --config config/runtime.toml --balance minimum-queue

use actor_runtime::{
    chain_args, metrics, Actor, ActorRef, ChainArgs, ChainOutcome, Context, LoadBalance,
    Passthrough, Pipeline, Sink,
};
use anyhow::{bail, Context as _, Result};
use clap::{Parser, ValueEnum};
use runtime_config::{init_logging, load_config};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pipeline_demo")]
#[command(about = "Runs a load-balanced actor pipeline and reports throughput")]
#[command(version)]
struct Args {
    /// Path to runtime configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Number of chained messages to push through the pipeline
    #[arg(short, long, default_value_t = 50_000)]
    messages: usize,

    /// Number of parallel uppercase stages
    #[arg(short, long, default_value_t = 4)]
    stages: usize,

    /// Load-balancing policy for the fan-out
    #[arg(short, long, value_enum, default_value_t = Balance::RoundRobin)]
    balance: Balance,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Balance {
    RoundRobin,
    Random,
    MinimumQueue,
}

impl From<Balance> for LoadBalance {
    fn from(balance: Balance) -> Self {
        match balance {
            Balance::RoundRobin => LoadBalance::RoundRobin,
            Balance::Random => LoadBalance::Random,
            Balance::MinimumQueue => LoadBalance::MinimumQueue,
        }
    }
}

struct Uppercase;

impl Actor for Uppercase {
    fn process_chain(&mut self, mut args: ChainArgs, _ctx: &mut Context<'_, Self>) -> ChainOutcome {
        if args.is_end_of_stream() {
            return ChainOutcome::Forward(args);
        }
        let text: String = args.take(0);
        ChainOutcome::Forward(chain_args![text.to_uppercase()])
    }
}

#[derive(Default)]
struct Concatenate {
    combined: String,
}

impl Actor for Concatenate {
    fn process_chain(&mut self, mut args: ChainArgs, ctx: &mut Context<'_, Self>) -> ChainOutcome {
        if args.is_end_of_stream() {
            ctx.forward(chain_args![std::mem::take(&mut self.combined)]);
            return ChainOutcome::Forward(args);
        }
        self.combined.push_str(&args.take::<String>(0));
        ChainOutcome::Consume
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load runtime config")?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= args.json_logs;
    init_logging(&config.logging)?;

    if args.stages == 0 {
        bail!("--stages must be at least 1");
    }

    actor_runtime::startup_with(config)?;
    info!(
        workers = actor_runtime::worker_count(),
        messages = args.messages,
        stages = args.stages,
        balance = ?args.balance,
        "Starting pipeline demo"
    );

    let (tx, rx) = crossbeam_channel::bounded(1);
    let sink = ActorRef::new(Sink::new(move |mut args: ChainArgs| {
        if !args.is_end_of_stream() {
            let _ = tx.send(args.take::<String>(0));
        }
    }));
    let uppercase: Vec<_> = (0..args.stages).map(|_| ActorRef::new(Uppercase)).collect();

    let pipeline = Pipeline::new(&ActorRef::new(Passthrough))
        .balance(args.balance.into())
        .fan_out(&uppercase)
        .then(&ActorRef::new(Concatenate::default()))
        .then(&sink);

    let started = Instant::now();
    for i in 0..args.messages {
        let text = if i % 2 == 0 { "x" } else { "o" };
        pipeline.flow(chain_args![text.to_string()]);
    }
    pipeline.end();

    let combined = rx
        .recv_timeout(Duration::from_secs(60))
        .context("Pipeline did not produce a result")?;
    let elapsed = started.elapsed();

    if combined.len() != args.messages {
        bail!(
            "expected {} characters, pipeline produced {}",
            args.messages,
            combined.len()
        );
    }

    let snapshot = metrics();
    info!(
        characters = combined.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        msgs_per_sec = (args.messages as f64 / elapsed.as_secs_f64()) as u64,
        batches = snapshot.batches_run,
        yields = snapshot.yields,
        "Pipeline finished"
    );

    actor_runtime::shutdown_when_idle(false)?;
    Ok(())
}
