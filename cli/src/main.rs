// confsig — ConfSignal command-line client
//
// Joins a conferencing room as publisher or viewer, or places a 1:1 call,
// through a websocket signaling server.

mod config;
mod media;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use confsignal_core::engine::WebRtcEngine;
use confsignal_core::transport::{self, SignalConnection};
use confsignal_core::{CallStatus, Notice, NoticeLevel, Orchestrator, OrchestratorConfig, Role, Shape, UserAction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "confsig")]
#[command(about = "ConfSignal — conferencing signaling client", long_about = None)]
#[command(version)]
struct Cli {
    /// Write logs to daily files in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a room
    Join {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        room: String,
        /// publisher (user) or viewer (manager)
        #[arg(long, default_value = "publisher")]
        role: Role,
        /// Override the configured server URL
        #[arg(short, long)]
        server: Option<String>,
    },
    /// Place a 1:1 call
    Call {
        /// Label for the remote side
        #[arg(long, default_value = "remote")]
        peer: String,
        #[arg(short, long)]
        server: Option<String>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Show where the config file lives
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Join {
            name,
            room,
            role,
            server,
        } => {
            let join = UserAction::Join { name, room, role };
            cmd_session(Shape::Room, server, Some(join)).await
        }
        Commands::Call { peer, server } => cmd_session(Shape::Call { identity: peer }, server, None).await,
        Commands::Config { action } => cmd_config(action),
    }
}

fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(dir, "confsig.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => println!("{} Unknown key: {}", "✗".red(), key),
        },

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}

async fn cmd_session(shape: Shape, server: Option<String>, initial: Option<UserAction>) -> Result<()> {
    let config = config::Config::load()?;
    let url = transport::endpoint_url(server.as_deref().unwrap_or(&config.server_url))?;
    let is_call = matches!(shape, Shape::Call { .. });

    println!("{}", "ConfSignal — Connecting...".bold());
    let SignalConnection {
        outbound,
        inbound,
        mut tasks,
    } = transport::connect(&url)
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    println!("{} Connected to {}", "✓".green(), url.bright_cyan());

    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    let engine = Arc::new(WebRtcEngine::new(config.ice_servers.clone()));
    let media = Arc::new(media::HeadlessMedia::new(config.capture_enabled));
    let orchestrator = Orchestrator::new(
        shape,
        engine,
        media,
        outbound,
        notice_tx,
        OrchestratorConfig {
            answer_timeout: config.answer_timeout(),
        },
    );

    let status_task = orchestrator.call_status().map(|rx| tokio::spawn(print_call_status(rx)));
    let notice_task = tokio::spawn(print_notices(notice_rx));

    if let Some(action) = initial {
        action_tx.send(action).context("Orchestrator gone before start")?;
    }
    print_help(is_call);
    let stdin_task = tokio::spawn(read_commands(action_tx, is_call));

    let result = orchestrator.run(inbound, action_rx).await;

    stdin_task.abort();
    if let Some(task) = status_task {
        task.abort();
    }
    if tokio::time::timeout(Duration::from_secs(2), tasks.drain()).await.is_err() {
        tracing::warn!("Websocket did not close in time");
    }
    notice_task.abort();

    match result {
        Ok(()) => {
            println!("Shutting down...");
            Ok(())
        }
        Err(e) => Err(e).context("Signaling session ended"),
    }
}

fn print_help(is_call: bool) {
    println!();
    println!("{}", "Commands:".bold());
    if is_call {
        println!("  {}                       ", "start".bright_green());
        println!("  {}                        ", "stop".bright_green());
    } else {
        println!("  {} <name> <room> [role]  ", "join".bright_green());
        println!("  {}                       ", "leave".bright_green());
    }
    println!("  {}                        ", "quit".bright_green());
    println!();
}

fn prompt() {
    print!("> ");
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

async fn read_commands(actions: mpsc::UnboundedSender<UserAction>, is_call: bool) {
    use tokio::io::AsyncBufReadExt;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    prompt();
    while let Ok(Some(line)) = lines.next_line().await {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let action = match (is_call, parts.as_slice()) {
            (_, []) => None,
            (_, ["quit"] | ["exit"]) => break,
            (true, ["start"]) => Some(UserAction::Start),
            (true, ["stop"]) => Some(UserAction::Stop),
            (false, ["leave"]) => Some(UserAction::Leave),
            (false, ["join", name, room, rest @ ..]) => {
                let role = match rest.first().map(|r| r.parse::<Role>()) {
                    None => Ok(Role::Publisher),
                    Some(parsed) => parsed,
                };
                match role {
                    Ok(role) => Some(UserAction::Join {
                        name: name.to_string(),
                        room: room.to_string(),
                        role,
                    }),
                    Err(e) => {
                        println!("{} {}", "✗".red(), e);
                        None
                    }
                }
            }
            _ => {
                print_help(is_call);
                None
            }
        };

        if let Some(action) = action {
            if actions.send(action).is_err() {
                return;
            }
        }
        prompt();
    }
}

async fn print_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        match notice.level {
            NoticeLevel::Info => println!("\n{} {}", "•".bright_blue(), notice.text),
            NoticeLevel::Error => println!("\n{} {}", "✗".red(), notice.text.red()),
        }
        prompt();
    }
}

async fn print_call_status(mut status: watch::Receiver<CallStatus>) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        let start = if current.affordances.start_enabled {
            "start".bright_green()
        } else {
            "start".dimmed()
        };
        let stop = if current.affordances.stop_enabled {
            "stop".bright_green()
        } else {
            "stop".dimmed()
        };
        println!("\n{} Call {} [{} {}]", "☎".bright_cyan(), current.state, start, stop);
        prompt();
    }
}
