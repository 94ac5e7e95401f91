use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolhost::config::GlobalSettings;
use toolhost::handlers;

#[derive(Parser)]
#[command(name = "toolhost")]
#[command(about = "Start stdio tool providers and call their tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Provider config file (default: search for mcp_config.json)
    #[arg(long, env = "TOOLHOST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configured providers
    Status {
        /// List each provider's tools
        #[arg(long)]
        tools: bool,
    },
    /// Start providers and verify the handshake
    Check {
        /// Only check this provider
        #[arg(long, short)]
        provider: Option<String>,
    },
    /// Call a tool on a provider
    Call {
        /// Provider name
        provider: String,
        /// Tool name
        tool: String,
        /// Arguments as JSON
        #[arg(long, short)]
        args: Option<String>,
        /// Retry timeouts and lost connections
        #[arg(long)]
        retry: bool,
    },
}

/// `RUST_LOG` wins, then `-v`, then the config's log settings
fn init_tracing(settings: Option<&GlobalSettings>, verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => match settings {
                Some(s) if s.enable_logging => s.log_level.as_str(),
                Some(_) => "off",
                None => "warn",
            },
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = handlers::load_config(cli.config.as_deref());
    init_tracing(
        config.as_ref().ok().map(|c| &c.global),
        cli.verbose,
        cli.log_json,
    );
    let config = config?;

    match cli.command {
        Commands::Status { tools } => handlers::run_status(&config, tools)?,
        Commands::Check { provider } => handlers::run_check(config, provider).await?,
        Commands::Call {
            provider,
            tool,
            args,
            retry,
        } => handlers::run_call(config, &provider, &tool, args, retry).await?,
    }

    Ok(())
}
