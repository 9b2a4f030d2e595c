use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use tops_feed::pipeline::{Pipeline, PipelineConfig, WorkspaceRegistry};
use tops_feed::split::{PcapSplitter, SplitterKind, TcpdumpSplitter};
use tops_feed::worker::DEFAULT_PROGRESS_INTERVAL;
use tops_feed::ProtocolVersion;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(version, about = "Decode IEX TOPS packet captures into JSON lines")]
struct Cli {
    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true, env = "TOPS_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a pcap capture into newline-delimited JSON
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
struct ConvertArgs {
    /// Input capture (.pcap)
    input: PathBuf,

    /// Output file, one JSON object per line
    output: PathBuf,

    /// TOPS protocol version (1.5 or 1.6)
    #[arg(long, env = "TOPS_PROTOCOL", default_value = "1.6")]
    protocol: ProtocolVersion,

    /// Number of shard workers; defaults to the available cores
    #[arg(long, env = "TOPS_WORKERS")]
    workers: Option<usize>,

    /// How to split the capture (tcpdump or native)
    #[arg(long, env = "TOPS_SPLITTER", default_value = "tcpdump")]
    splitter: SplitterKind,

    /// tcpdump executable
    #[arg(long, env = "TOPS_TCPDUMP", default_value = "tcpdump")]
    tcpdump: PathBuf,

    /// Directory for the temporary workspace; defaults to the output's directory
    #[arg(long, env = "TOPS_WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,

    /// Payloads between progress reports, 0 to disable
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: u64,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    Ok(())
}

fn convert(args: ConvertArgs) -> Result<()> {
    let config = PipelineConfig {
        protocol: args.protocol,
        workers: args.workers,
        workspace_root: args.workspace_dir,
        progress_interval: args.progress_interval,
    };

    // Remove the live workspace when interrupted
    let registry = WorkspaceRegistry::new();
    let handler_registry = registry.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        match handler_registry.remove_active() {
            Ok(Some(path)) => eprintln!("interrupted, removed workspace {}", path.display()),
            Ok(None) => eprintln!("interrupted"),
            Err(e) => eprintln!("interrupted, cannot remove workspace: {e}"),
        }
        std::process::exit(130);
    }) {
        warn!(error = %e, "cannot install interrupt handler");
    }

    let pipeline = match args.splitter {
        SplitterKind::Tcpdump => Pipeline::new(config, TcpdumpSplitter::new(&args.tcpdump)),
        SplitterKind::Native => Pipeline::new(config, PcapSplitter),
    }
    .with_registry(registry);

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        protocol = %args.protocol,
        splitter = %args.splitter,
        workers = pipeline.worker_count(),
        "converting"
    );

    pipeline
        .run(&args.input, &args.output)
        .with_context(|| {
            format!("converting {} to {}", args.input.display(), args.output.display())
        })?;
    Ok(())
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Convert(args) => convert(args),
    }
}
