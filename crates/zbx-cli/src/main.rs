//! zbx command-line client
//!
//! - `send`: push item values to a server or proxy
//! - `get`: ask an agent for one key

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use zbx_proto::config::{DEFAULT_AGENT_PORT, DEFAULT_SENDER_PORT};
use zbx_proto::{
    AgentResponse, CancellationToken, GetConfig, Getter, ItemValue, Node, Sender, SenderConfig,
    Version,
};

/// Exit code for a run that completed but not cleanly: rejected items or an
/// unsupported key.
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser)]
#[command(name = "zbx")]
#[command(about = "Sender and get client for Zabbix-compatible servers and agents")]
#[command(version)]
#[command(after_help = "\
Examples:
  zbx send -z zbx.local -s web-01 -k app.status -o up
  zbx send -z zbx.local:10051 --input batch.json --chunk-size 100
  zbx send -c /etc/zabbix/zabbix_agentd.conf -s web-01 -k trap -o 1
  zbx get -s web-01 -k system.uptime
")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Per-operation timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send item values to a server or proxy
    Send(SendArgs),

    /// Get one item value from an agent
    Get(GetArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Server or proxy, `host[:port]`
    #[arg(short = 'z', long = "server", value_name = "HOST[:PORT]")]
    server: Option<String>,

    /// Agent configuration file to read ServerActive and SourceIP from
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Host name the item belongs to
    #[arg(short = 's', long, required_unless_present = "input")]
    host: Option<String>,

    /// Item key
    #[arg(short, long, required_unless_present = "input")]
    key: Option<String>,

    /// Item value
    #[arg(short = 'o', long, required_unless_present = "input")]
    value: Option<String>,

    /// Value timestamp, unix seconds
    #[arg(long, conflicts_with = "input")]
    clock: Option<i64>,

    /// Nanoseconds part of the timestamp
    #[arg(long, requires = "clock")]
    ns: Option<i32>,

    /// JSON file holding an array of `{host, key, value[, clock, ns]}`
    #[arg(short, long, value_name = "PATH", conflicts_with_all = ["host", "key", "value"])]
    input: Option<PathBuf>,

    /// Records per round-trip
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Print the per-chunk result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct GetArgs {
    /// Agent, `host[:port]`
    #[arg(short = 's', long = "host", value_name = "HOST[:PORT]")]
    host: String,

    /// Item key
    #[arg(short, long)]
    key: String,

    /// Agent version, when it predates framed requests
    #[arg(long, value_name = "VERSION")]
    agent_version: Option<String>,
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zbx={default_level}")));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .with(filter)
        .init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

fn sender_config(args: &SendArgs, timeout: Option<u64>) -> Result<SenderConfig> {
    let mut config = match &args.config {
        Some(path) => SenderConfig::from_agent_config(path)
            .with_context(|| format!("Failed to read agent config {}", path.display()))?,
        None => SenderConfig::default(),
    };

    if let Some(server) = &args.server {
        let node = Node::parse(server, DEFAULT_SENDER_PORT)?;
        config.clusters = vec![vec![node]];
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(secs) = timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }

    Ok(config)
}

fn read_records(path: &Path) -> Result<Vec<ItemValue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid item records in {}", path.display()))
}

fn records(args: &SendArgs) -> Result<Vec<ItemValue>> {
    if let Some(path) = &args.input {
        return read_records(path);
    }

    let (Some(host), Some(key), Some(value)) = (&args.host, &args.key, &args.value) else {
        bail!("--host, --key and --value are required without --input");
    };

    let mut item = ItemValue::new(host.as_str(), key.as_str(), value.as_str())?;
    if let Some(clock) = args.clock {
        item = item.with_clock(clock);
    }
    if let Some(ns) = args.ns {
        item = item.with_ns(ns)?;
    }
    Ok(vec![item])
}

async fn run_send(args: SendArgs, timeout: Option<u64>) -> Result<ExitCode> {
    let config = sender_config(&args, timeout)?;
    let records = records(&args)?;
    let sender = Sender::new(config).context("Invalid sender configuration")?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    let result = sender.send_with_cancel(&records, &cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for report in result.failed_chunks() {
            eprintln!(
                "Chunk {} failed: {}",
                report.response.chunk,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        println!("{}", result.total());
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    })
}

async fn run_get(args: GetArgs, timeout: Option<u64>) -> Result<ExitCode> {
    let mut config = GetConfig::for_agent(Node::parse(&args.host, DEFAULT_AGENT_PORT)?);
    if let Some(secs) = timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if let Some(version) = &args.agent_version {
        config = config.with_peer_version(Version::parse(version)?);
    }

    let getter = Getter::new(config).context("Invalid get configuration")?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    match getter.get_with_cancel(&args.key, &cancel).await? {
        AgentResponse::Value(value) => {
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
        AgentResponse::NotSupported { reason } => {
            match reason {
                Some(reason) => eprintln!("ZBX_NOTSUPPORTED: {reason}"),
                None => eprintln!("ZBX_NOTSUPPORTED"),
            }
            Ok(ExitCode::from(EXIT_PARTIAL))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let result = match cli.command {
        Commands::Send(args) => run_send(args, cli.timeout).await,
        Commands::Get(args) => run_get(args, cli.timeout).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
