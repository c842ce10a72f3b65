mod confirm_commands;
mod config_commands;
mod consensus_commands;
mod llm_commands;
mod sandbox_commands;
mod task_commands;
mod terminal_prompter;
mod worker_commands;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "helixcode", about = "HelixCode — distributed AI coding assistant control plane")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Path to a `helixcode.{toml,yaml,json}` config file (overrides discovery).
    #[arg(long, global = true, env = "HELIXCODE_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// SSH worker pool management.
    Worker {
        #[command(subcommand)]
        action: worker_commands::WorkerAction,
    },
    /// Submit and observe tasks on the worker pool.
    Task {
        #[command(subcommand)]
        action: task_commands::TaskAction,
    },
    /// Tool-execution confirmation pipeline.
    Confirm {
        #[command(subcommand)]
        action: confirm_commands::ConfirmAction,
    },
    /// LLM provider registry and generation.
    Llm {
        #[command(subcommand)]
        action: llm_commands::LlmAction,
    },
    /// One-shot sandbox provisioning demonstrations.
    Sandbox {
        #[command(subcommand)]
        action: sandbox_commands::SandboxAction,
    },
    /// Leader-election status.
    Consensus {
        #[command(subcommand)]
        action: consensus_commands::ConsensusAction,
    },
    /// Configuration inspection and persistence.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Initialize tracing: `EnvFilter` (env override wins over `--log-level`)
/// plus a json/human `fmt` layer switch. Grounded on the teacher's
/// `moltis-cli::main::init_telemetry`, minus the `LogBroadcastLayer` — that
/// layer exists to stream logs to a web UI, which this control plane has
/// none of.
fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true)).init();
    }
}

fn load_config(cli: &Cli) -> helix_config::HelixConfig {
    match &cli.config {
        Some(path) => helix_config::load_config(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            helix_config::HelixConfig::default()
        }),
        None => helix_config::discover_and_load(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "helixcode starting");
    let config = load_config(&cli);

    match cli.command {
        Commands::Worker { action } => worker_commands::handle_worker(action, &config).await,
        Commands::Task { action } => task_commands::handle_task(action, &config).await,
        Commands::Confirm { action } => confirm_commands::handle_confirm(action, &config).await,
        Commands::Llm { action } => llm_commands::handle_llm(action, &config).await,
        Commands::Sandbox { action } => sandbox_commands::handle_sandbox(action, &config).await,
        Commands::Consensus { action } => consensus_commands::handle_consensus(action, &config).await,
        Commands::Config { action } => config_commands::handle_config(action, &config).await,
    }
}
