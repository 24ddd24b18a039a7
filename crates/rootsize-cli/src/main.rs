use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rootsize_core::FailureKind;

mod commands;

#[derive(Parser)]
#[command(
    name = "rootsize",
    about = "Instance-aware root volume sizing for node bootstrap",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Log output: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve this instance, decide, and grow the root volume if needed.
    ///
    /// Exit codes: 0 done, 10 metadata unavailable, 11 malformed metadata,
    /// 12 configuration error, 13 resize timeout, 14 filesystem extend
    /// failed, 15 provider error.
    Run {
        /// Config file (default: /etc/rootsize/rootsize.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Resolve and decide only; never modify the volume
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the decision for an instance type without querying anything
    Decide {
        /// Instance type, e.g. c6i.2xlarge
        #[arg(short = 't', long)]
        instance_type: String,
        /// Pretend the instance has local NVMe instance storage
        #[arg(long)]
        local_disk: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Validate and list the effective sizing table
    Rules {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_format) {
        eprintln!("error: {e:#}");
        return ExitCode::from(FailureKind::ConfigurationError.exit_code());
    }

    let code = match cli.command {
        Commands::Run { config, dry_run } => commands::run::run(config.as_deref(), dry_run).await,
        Commands::Decide {
            instance_type,
            local_disk,
            config,
            format,
        } => report(commands::decide::decide(&instance_type, local_disk, config.as_deref(), &format)),
        Commands::Rules { config } => report(commands::rules::list(config.as_deref())),
    };
    ExitCode::from(code)
}

fn init_tracing(format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("rootsize=info"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        "json" => builder.json().init(),
        "text" => builder.init(),
        other => anyhow::bail!("unknown log format {other:?} (expected text or json)"),
    }
    Ok(())
}

/// Offline commands only fail on bad configuration.
fn report(result: anyhow::Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            FailureKind::ConfigurationError.exit_code()
        }
    }
}
