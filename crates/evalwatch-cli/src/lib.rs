#![forbid(unsafe_code)]

mod actions;
mod output;

use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;

use clap::{error::ErrorKind, ArgAction, Parser, Subcommand};
use evalwatch_core::logging::{init_tracing, LogOptions};
use evalwatch_core::{ExitCode, MachineError};
use evalwatch_pipeline::{PipelineError, PipelineErrorCode};
use evalwatch_policies::PolicyValidationError;
use evalwatch_store::StoreError;

pub use output::OutputMode;

pub const CRATE_NAME: &str = "evalwatch-cli";

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
Usage: {usage}

Options:
{options}

Commands:
{subcommands}
{after-help}";

#[derive(Parser)]
#[command(name = "evalwatch", version)]
#[command(about = "LLM evaluation and monitoring pipeline")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_help = "Environment:\n  EVALWATCH_LOG          Log filter override\n  EVALWATCH_LOG_JSON     Emit JSON logs\n  EVALWATCH_JUDGE_URL    OpenAI-compatible judge endpoint"
)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,
    #[arg(long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Threshold document; the built-in thresholds apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "evalwatch.db")]
    db: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate captured inference events from a JSON Lines file.
    Evaluate {
        #[arg(long)]
        events: PathBuf,
        /// Comma-separated metric names; defaults to every configured metric.
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
    },
    /// Generate responses with the mock provider and evaluate them.
    Smoke {
        #[arg(long)]
        model: String,
        #[arg(long = "prompt", required = true)]
        prompts: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
    },
    Results {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        metric: Option<String>,
        #[arg(long, default_value_t = false)]
        failed: bool,
        /// Epoch milliseconds, inclusive.
        #[arg(long)]
        since: Option<i64>,
        /// Epoch milliseconds, exclusive.
        #[arg(long)]
        until: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Latency percentiles over a window, with the p95 threshold verdict.
    Latency {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        since: Option<i64>,
        #[arg(long)]
        until: Option<i64>,
    },
    Summary {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    Alerts {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    AlertState,
    ValidateConfig,
}

#[derive(Debug)]
struct CliError {
    exit_code: ExitCode,
    machine: MachineError,
}

impl CliError {
    fn usage(message: &str) -> Self {
        Self {
            exit_code: ExitCode::Usage,
            machine: MachineError::new("usage_error", message),
        }
    }

    fn validation(message: &str) -> Self {
        Self {
            exit_code: ExitCode::Validation,
            machine: MachineError::new("validation_error", message),
        }
    }

    fn dependency(message: &str) -> Self {
        Self {
            exit_code: ExitCode::DependencyFailure,
            machine: MachineError::new("dependency_failure", message),
        }
    }

    fn internal(message: &str) -> Self {
        Self {
            exit_code: ExitCode::Internal,
            machine: MachineError::new("internal_error", message),
        }
    }
}

impl From<PolicyValidationError> for CliError {
    fn from(e: PolicyValidationError) -> Self {
        Self::validation(&e.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::dependency(&e.to_string()).with_detail("store_code", e.code.as_str())
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        let message = e.to_string();
        match e.code {
            PipelineErrorCode::StoreWrite => Self::dependency(&message),
            PipelineErrorCode::Config | PipelineErrorCode::InvalidEvent => {
                Self::validation(&message)
            }
            _ => Self::internal(&message),
        }
    }
}

impl CliError {
    fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.machine = self.machine.with_detail(key, value);
        self
    }
}

pub fn main_entry() -> ProcessExitCode {
    let wants_json = std::env::args().any(|arg| arg == "--json");
    match run() {
        Ok(()) => ProcessExitCode::from(ExitCode::Success as u8),
        Err(err) => {
            output::emit_error(&err.machine, wants_json);
            ProcessExitCode::from(err.exit_code as u8)
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{err}");
                return Ok(());
            }
            _ => {
                return Err(CliError::usage("invalid command line arguments")
                    .with_detail("error", &err.to_string()));
            }
        },
    };
    let output_mode = OutputMode { json: cli.json };
    let command = cli
        .command
        .ok_or_else(|| CliError::usage("missing command; see --help"))?;

    let log = LogOptions::default().with_verbosity(cli.verbose, cli.quiet);
    init_tracing(&log).map_err(|e| CliError::internal(&e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::internal(&format!("runtime init failed: {e}")))?;
    let ctx = actions::Context {
        config: cli.config,
        db: cli.db,
        output_mode,
    };
    runtime.block_on(dispatch(command, &ctx))
}

async fn dispatch(command: Commands, ctx: &actions::Context) -> Result<(), CliError> {
    match command {
        Commands::Evaluate { events, metrics } => actions::evaluate(ctx, &events, &metrics).await,
        Commands::Smoke {
            model,
            prompts,
            metrics,
        } => actions::smoke(ctx, &model, &prompts, &metrics).await,
        Commands::Results {
            model,
            metric,
            failed,
            since,
            until,
            limit,
        } => {
            actions::results(
                ctx,
                actions::ResultsArgs {
                    model,
                    metric,
                    failed,
                    since,
                    until,
                    limit,
                },
            )
            .await
        }
        Commands::Latency {
            model,
            since,
            until,
        } => actions::latency(ctx, model, since, until).await,
        Commands::Summary { hours } => actions::summary(ctx, hours).await,
        Commands::Alerts { limit } => actions::alerts(ctx, limit).await,
        Commands::AlertState => actions::alert_state(ctx).await,
        Commands::ValidateConfig => actions::validate_config(ctx),
    }
}
