//! Steward CLI: the main entry point.
//!
//! Commands:
//! - `init`   : Write the default config and create the data directory
//! - `run`    : Start the service with its background jobs
//! - `status` : Show configuration and component health
//! - `decide` : Resolve one decision
//! - `task`   : Submit one task
//! - `config` : Show, validate or locate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Steward: local decision-and-optimization core",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config and create the data directory
    Init,

    /// Run the service until Ctrl+C
    Run,

    /// Show configuration and component health
    Status {
        /// Print the health report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a decision, e.g. `steward decide file_operation canDelete -c '{"filePath":"a.rs"}'`
    Decide {
        category: String,
        action: String,

        /// Context as a JSON object
        #[arg(short, long, default_value = "{}")]
        context: String,
    },

    /// Submit a task, e.g. `steward task word_count -p '{"text":"hello world"}'`
    Task {
        /// Task type
        task_type: String,

        /// Parameters as JSON
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// low, normal, high or critical
        #[arg(long, default_value = "normal")]
        priority: String,

        /// Drain the queue once if the task was queued
        #[arg(long)]
        wait: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Run => commands::run::run().await?,
        Commands::Status { json } => commands::status::run(json).await?,
        Commands::Decide {
            category,
            action,
            context,
        } => commands::decide::run(&category, &action, &context).await?,
        Commands::Task {
            task_type,
            params,
            priority,
            wait,
        } => commands::task::run(&task_type, &params, &priority, wait).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
