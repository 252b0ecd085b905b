//! Parses the command line arguments, sets up logging, and starts the node.
//!
//! ```text
//! vnet A.lnx --log --level info
//! ```

use crate::{
    lnx::{read_lnx, LnxError},
    repl::Repl,
};
use clap::Parser;
use std::{
    fs::{create_dir_all, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};
use tracing_subscriber::{filter::ParseError, EnvFilter, FmtSubscriber};
use vnet_core::{Node, NodeError};

/// Runs one node of a virtual network.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// The topology file describing this node's links
    pub lnx: PathBuf,
    /// Write JSON logs to a file instead of stderr
    #[arg(short, long)]
    pub log: bool,
    /// Where log files go
    #[arg(long, default_value = "./logs")]
    pub log_dir: PathBuf,
    /// A tracing filter such as `info` or `vnet_core=debug,PACKET=trace`.
    /// Defaults to `debug` with --log and `warn` without.
    #[arg(long)]
    pub level: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    Filter(#[from] ParseError),
    #[error("Could not open the log file: {0}")]
    File(#[from] std::io::Error),
    #[error("{0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Logging(#[from] LoggingError),
    #[error("{0}")]
    Lnx(#[from] LnxError),
    #[error("{0}")]
    Node(#[from] NodeError),
}

/// Starts the node described by the command line and runs its prompt until
/// the user quits.
pub async fn run() -> ExitCode {
    let args = Args::parse();
    match start(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn start(args: &Args) -> Result<(), CliError> {
    initialize_logging(args)?;
    let links = read_lnx(&args.lnx).await?;
    let (node, received) = Node::start(&links).await?;
    Repl::new(node).run(received).await;
    Ok(())
}

/// Installs the global subscriber. Should only be called once.
fn initialize_logging(args: &Args) -> Result<(), LoggingError> {
    let level = args
        .level
        .as_deref()
        .unwrap_or(if args.log { "debug" } else { "warn" });
    let filter = EnvFilter::try_new(level)?;

    if args.log {
        create_dir_all(&args.log_dir)?;
        let path = args.log_dir.join(format!(
            "debug-{}.log",
            chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
        ));
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Arc::new(file))
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}
