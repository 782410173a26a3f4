//! SerialQ CLI - run declarative step pipelines.

mod pipeline;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use pipeline::{Pipeline, StepDef};
use serialq_execution::{DeferralStrategy, QueueConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "serialq")]
#[command(about = "Sequential step queue runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline and print the final context
    Run {
        /// Pipeline file (JSON)
        pipeline: PathBuf,
        /// How step dispatch is deferred
        #[arg(long, value_enum)]
        deferral: Option<Deferral>,
        /// Delay used by the timer strategy, in milliseconds
        #[arg(long, default_value = "0")]
        timer_ms: u64,
        /// Label attached to log lines
        #[arg(long)]
        label: Option<String>,
        /// Print the context on a single line
        #[arg(long)]
        compact: bool,
    },
    /// Parse a pipeline and describe its steps
    Check {
        /// Pipeline file (JSON)
        pipeline: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Deferral {
    Spawn,
    Yield,
    Timer,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { pipeline, deferral, timer_ms, label, compact } => {
            let definition = Pipeline::load(&pipeline)?;
            let mut config = match deferral {
                None => QueueConfig::detect()?,
                Some(kind) => QueueConfig::new(strategy(kind, timer_ms)),
            };
            if let Some(label) = label {
                config = config.with_label(label);
            }

            info!(
                pipeline = %pipeline.display(),
                steps = definition.step_count(),
                deferral = config.deferral.name(),
                "starting"
            );
            let context = definition.run(config).await?;

            let rendered = if compact {
                serde_json::to_string(&context)?
            } else {
                serde_json::to_string_pretty(&context)?
            };
            println!("{rendered}");
        }
        Commands::Check { pipeline } => {
            let definition = Pipeline::load(&pipeline)?;
            println!("Pipeline: {}", pipeline.display());
            println!("  Seed keys: {}", definition.context.len());
            println!("  Steps: {}", definition.step_count());
            describe(&definition.steps, 2);
        }
    }

    Ok(())
}

fn strategy(kind: Deferral, timer_ms: u64) -> DeferralStrategy {
    let handle = Handle::current();
    match kind {
        Deferral::Spawn => DeferralStrategy::Spawn(handle),
        Deferral::Yield => DeferralStrategy::Yield(handle),
        Deferral::Timer => DeferralStrategy::Timer(handle, Duration::from_millis(timer_ms)),
    }
}

fn describe(steps: &[StepDef], indent: usize) {
    let pad = " ".repeat(indent);
    for (index, step) in steps.iter().enumerate() {
        match step {
            StepDef::Emit { outputs, values } => {
                println!("{pad}#{index} emit {} value(s) -> {:?}", values.len(), outputs);
            }
            StepDef::SubQueue { keys, steps } => {
                println!("{pad}#{index} sub-queue -> {keys:?}");
                describe(steps, indent + 2);
            }
            StepDef::Finish => println!("{pad}#{index} finish"),
        }
    }
}
