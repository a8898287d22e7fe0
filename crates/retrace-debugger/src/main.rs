use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use retrace_config::RetraceConfig;
use tokio_util::sync::CancellationToken;

/// Record script executions and debug them backward and forward in time.
#[derive(Debug, Parser)]
#[command(name = "retrace", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `RETRACE_CONFIG` is used as a fallback. When neither is
    /// provided the built-in defaults apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve debugging sessions over TCP, or a single session over stdio.
    Serve {
        /// Address to listen on; defaults to `server.listen` from the config.
        #[arg(long, conflicts_with = "stdio")]
        listen: Option<String>,
        #[arg(long)]
        stdio: bool,
    },
    /// Run a script to completion and save its recording.
    Record {
        script: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// URL the script is recorded under; defaults to its `file://` path.
        #[arg(long)]
        url: Option<String>,
    },
    /// Print a summary of a saved recording.
    Inspect { recording: PathBuf },
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    retrace_debugger::hardening::init(&config);
    let config = Arc::new(config);

    match cli.command {
        Command::Serve { stdio: true, .. } => retrace_debugger::run_stdio(config).await,
        Command::Serve { listen, .. } => {
            let addr = listen.unwrap_or_else(|| config.server.listen.clone());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to listen on {addr}"))?;
            retrace_debugger::serve_tcp(listener, config, CancellationToken::new()).await
        }
        Command::Record { script, out, url } => {
            let end = retrace_debugger::commands::record(&script, &out, url, &config)?;
            println!("recorded {} execution points to {}", end, out.display());
            Ok(())
        }
        Command::Inspect { recording } => {
            print!("{}", retrace_debugger::commands::inspect(&recording)?);
            Ok(())
        }
    }
}

fn load_config(cli_path: Option<PathBuf>) -> RetraceConfig {
    match RetraceConfig::load(cli_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("retrace: failed to load config: {err}; continuing with defaults");
            RetraceConfig::default()
        }
    }
}
