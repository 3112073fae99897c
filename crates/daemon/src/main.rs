//! Twos CLI
//!
//! Runs the Oni supervisor (`twos serve`) or talks to a running one over its
//! control plane.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use oni_daemon::config::{TwosConfig, DEFAULT_CONFIG_FILE};
use oni_daemon::control::{ClientError, ControlClient};
use oni_daemon::pidfile::read_pid;
use oni_daemon::Supervisor;
use oni_protocol::{Entries, Mode, WikiState, WikiStatus, DEFAULT_HOST, DEFAULT_PORT};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Twos - supervisor and control client for wiki runtimes.
#[derive(Parser, Debug)]
#[command(name = "twos")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE", env = "TWOS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Supervisor mode (dev or prod)
    #[arg(short, long, global = true, default_value = "dev")]
    pub mode: Mode,

    /// Control-plane host (overrides the config)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Control-plane port (overrides the config)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the supervisor in the foreground
    Serve,

    /// Check that the supervisor answers
    Health,

    /// Show supervisor status
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List configured wikis and their states
    Wikis {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Request a wiki start
    Start {
        /// Wiki id
        id: String,
    },

    /// Request a wiki stop
    Stop {
        /// Wiki id
        id: String,
    },

    /// Ask the supervisor to shut down
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.clone() {
        Commands::Serve => serve(&cli).await,
        command => {
            let level = if cli.verbose { "debug" } else { "warn" };
            let _guard = init_logging(level, None, cli.mode)?;
            run_client(&cli, command).await;
            Ok(())
        }
    }
}

/// Run the supervisor until it shuts down.
async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(&config_path(cli))?;

    if let Some(server) = config.oni_servers.get_mut(cli.mode.as_str()) {
        if let Some(host) = &cli.host {
            server.host = host.clone();
        }
        if let Some(port) = cli.port {
            server.port = port;
        }
    }

    let server = config.server(cli.mode);
    let level = match (cli.verbose, server) {
        (true, _) => "debug".to_string(),
        (false, Some(server)) => server.log_level.clone(),
        (false, None) => "info".to_string(),
    };
    let log_dir = server.and_then(|server| server.log_path.clone());
    let _guard = init_logging(&level, log_dir.as_deref(), cli.mode)?;

    tracing::info!(mode = %cli.mode, "Oni supervisor starting...");

    let supervisor = Supervisor::start(cli.mode, config).await?;
    supervisor.wait().await;

    tracing::info!("Oni supervisor stopped");
    Ok(())
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn load_config(path: &Path) -> anyhow::Result<TwosConfig> {
    let mut config = TwosConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Initialise tracing. With `log_dir`, output also goes to
/// `<log_dir>/oni-<mode>.log`; the returned guard flushes it on drop.
fn init_logging(
    level: &str,
    log_dir: Option<&Path>,
    mode: Mode,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, format!("oni-{mode}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Where a client command connects, and where to look for the lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    pid_dir: Option<PathBuf>,
}

fn resolve_target(cli: &Cli) -> Target {
    let path = config_path(cli);
    let server = if cli.config.is_some() || path.exists() {
        match load_config(&path) {
            Ok(config) => config.server(cli.mode).cloned(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable config");
                None
            }
        }
    } else {
        None
    };

    let (host, port, pid_dir) = match server {
        Some(server) => (server.host, server.port, Some(server.pid_path)),
        None => (DEFAULT_HOST.to_string(), DEFAULT_PORT, None),
    };

    Target {
        host: connect_host(cli.host.as_deref().unwrap_or(&host)),
        port: cli.port.unwrap_or(port),
        pid_dir,
    }
}

/// A wildcard bind address is reached through loopback.
fn connect_host(host: &str) -> String {
    match host {
        "0.0.0.0" | "" => "127.0.0.1".to_string(),
        "::" | "[::]" => "::1".to_string(),
        other => other.to_string(),
    }
}

/// Execute a control-plane command, exiting non-zero on failure.
async fn run_client(cli: &Cli, command: Commands) {
    let target = resolve_target(cli);
    let client = match ControlClient::new(&target.host, target.port) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    tracing::debug!(url = client.base_url(), "using control plane");

    let result = match command {
        Commands::Serve => return,
        Commands::Health => client.health().await.map(|health| {
            println!(
                "Oni server ({}) is healthy at {}",
                health.mode,
                client.base_url()
            );
        }),
        Commands::Status { json } => client.status().await.map(|status| {
            if json {
                print_json(&status);
            } else {
                println!(
                    "Oni server: {}",
                    if status.shutting_down { "shutting down" } else { "running" }
                );
                println!("  Mode:     {}", status.mode);
                println!("  PID:      {}", status.pid);
                println!("  Address:  {}:{}", status.host, status.port);
                println!("  Uptime:   {}", format_duration(status.uptime_ms / 1000));
                println!("  Wikis:    {}", summarize_states(&status.wikis));
            }
        }),
        Commands::Wikis { json } => client.wikis().await.map(|wikis| {
            if json {
                print_json(&wikis.wikis);
            } else {
                print!("{}", render_wikis_table(&wikis.wikis));
            }
        }),
        Commands::Start { id } => client
            .start_wiki(&id)
            .await
            .map(|started| println!("Start requested for wiki {}", started.started)),
        Commands::Stop { id } => client
            .stop_wiki(&id)
            .await
            .map(|stopped| println!("Stop requested for wiki {}", stopped.stopped)),
        Commands::Shutdown => client
            .shutdown()
            .await
            .map(|_| println!("Shutdown requested")),
    };

    if let Err(e) = result {
        report_failure(cli.mode, &target, &e);
        std::process::exit(1);
    }
}

fn report_failure(mode: Mode, target: &Target, err: &ClientError) {
    match err.server_message() {
        Some(message) => eprintln!("Error: {}", message),
        None => eprintln!("Error: {}", err),
    }

    if err.is_unreachable() {
        let pid = target
            .pid_dir
            .as_deref()
            .and_then(|dir| read_pid(dir, mode));
        match pid {
            Some(pid) => eprintln!(
                "Oni server ({}) is running as pid {} but not answering on {}:{}",
                mode, pid, target.host, target.port
            ),
            None => {
                eprintln!("Is the supervisor running? Start it with:");
                eprintln!("  twos serve --mode {}", mode);
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to encode JSON: {}", e),
    }
}

/// Render wikis as an aligned table, one row per wiki in config order.
fn render_wikis_table(wikis: &Entries<WikiStatus>) -> String {
    if wikis.is_empty() {
        return "No wikis configured.\n".to_string();
    }

    let id_width = wikis.keys().map(str::len).max().unwrap_or(2).max(2);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:<id_width$}  {:<9}  {:<8}  ADDRESS",
        "ID", "ROLE", "STATE"
    );
    let _ = writeln!(out, "{}", "-".repeat(id_width + 2 + 9 + 2 + 8 + 2 + 7));

    for (id, wiki) in wikis {
        let scheme = if wiki.https { "https" } else { "http" };
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<9}  {:<8}  {}://{}:{}",
            id,
            wiki.role.as_str(),
            wiki.state.as_str(),
            scheme,
            wiki.host,
            wiki.port
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Total: {} wiki(s)", wikis.len());
    out
}

/// One-line count of wikis per state, e.g. `3 (1 running, 2 stopped)`.
fn summarize_states(wikis: &Entries<WikiStatus>) -> String {
    const ORDER: [WikiState; 5] = [
        WikiState::Running,
        WikiState::Starting,
        WikiState::Stopping,
        WikiState::Stopped,
        WikiState::Error,
    ];

    let parts: Vec<String> = ORDER
        .iter()
        .filter_map(|state| {
            let count = wikis.values().filter(|w| w.state == *state).count();
            (count > 0).then(|| format!("{} {}", count, state))
        })
        .collect();

    if parts.is_empty() {
        "0".to_string()
    } else {
        format!("{} ({})", wikis.len(), parts.join(", "))
    }
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
