//! ctxbroker - contextualization broker
//!
//! CLI entry point: runs the daemon or talks to it.

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use ctxbroker::broker::Broker;
use ctxbroker::cli::{Cli, Command, MemberFile, identity_query, load_identities};
use ctxbroker::config::Config;
use ctxbroker::daemon::{BrokerDaemon, DaemonManager};
use ctxbroker::domain::{MemberId, ResolvedDocument};
use ctxbroker::ipc::{BrokerClient, CreateRunRequest, RemoteError, listener};

/// Exit code for `retrieve` without `--wait` when the document is not ready
const EXIT_NOT_READY: i32 = 2;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, to_file: bool) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_file {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ctxbroker")
            .join("logs");
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
        let log_file = fs::File::create(log_dir.join("ctxbroker.log")).context("Failed to create log file")?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    let is_serve = matches!(cli.command, Command::Serve { .. });
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref(), is_serve)
        .context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(socket) = cli.socket.clone() {
        config.daemon.socket_path = Some(socket);
    }

    let client = BrokerClient::from_config(&config.daemon);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { foreground } => cmd_serve(&config, cli.config.as_deref(), foreground).await,
        Command::Create {
            run_id,
            no_injections,
            creator,
            lifetime_secs,
        } => {
            let request = CreateRunRequest {
                run_id,
                allow_injections: no_injections.then_some(false),
                creator_identity: creator,
                lifetime_secs,
            };
            let run_id = client.create_run(request).await?;
            println!("{}", run_id);
            Ok(())
        }
        Command::Destroy { run_id } => {
            client.destroy_run(&run_id).await?;
            println!("{} Destroyed run: {}", "✓".green(), run_id);
            Ok(())
        }
        Command::Register {
            run_id,
            member_id,
            spec,
            total,
        } => {
            let member = MemberFile::load(&spec)?;
            client
                .add_workspace(&run_id, member_id, member.identities, member.requires, member.provides, total)
                .await?;
            println!("{} Registered member #{} in {}", "✓".green(), member_id, run_id.cyan());
            Ok(())
        }
        Command::Inject { run_id, name, value } => {
            client.inject_data(&run_id, &name, &value).await?;
            println!("{} Injected {}", "✓".green(), name.yellow());
            Ok(())
        }
        Command::Close { run_id } => {
            client.no_more_injections(&run_id).await?;
            println!("{} Injections closed for {}", "✓".green(), run_id.cyan());
            Ok(())
        }
        Command::OkExit { run_id, member_id } => {
            client.ok_exit(&run_id, member_id).await?;
            println!("{} Member #{} reported ok", "✓".green(), member_id);
            Ok(())
        }
        Command::ErrorExit {
            run_id,
            member_id,
            code,
            message,
        } => {
            client.error_exit(&run_id, member_id, code, &message).await?;
            println!("{} Member #{} reported error {}", "✓".green(), member_id, code.to_string().red());
            Ok(())
        }
        Command::Identities { run_id, host, ip } => {
            let identities = client.identities(&run_id, identity_query(host, ip)).await?;
            println!("{}", serde_json::to_string_pretty(&identities)?);
            Ok(())
        }
        Command::Retrieve {
            run_id,
            member_id,
            identities,
            wait,
        } => cmd_retrieve(&client, &config, &run_id, member_id, identities.as_deref(), wait).await,
        Command::Context { run_id } => {
            let context = client.context(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&context)?);
            Ok(())
        }
        Command::Ping => {
            let version = client.ping().await?;
            println!("{} ctxbroker daemon is alive (version {})", "✓".green(), version);
            Ok(())
        }
        Command::Shutdown => {
            client.shutdown().await?;
            println!("{} Shutdown requested", "✓".green());
            Ok(())
        }
    }
}

/// Start the daemon, in the foreground or as a background process
async fn cmd_serve(config: &Config, config_path: Option<&Path>, foreground: bool) -> Result<()> {
    debug!(foreground, "cmd_serve: called");
    let client = BrokerClient::from_config(&config.daemon);
    if let Ok(version) = client.ping().await {
        println!("ctxbroker is already running (version {})", version);
        return Ok(());
    }

    if foreground {
        run_daemon(config).await
    } else {
        let socket_path = config.daemon.socket_path.as_deref();
        let pid = DaemonManager::new().start(config_path, socket_path)?;
        println!("ctxbroker started (PID: {})", pid);
        Ok(())
    }
}

/// Run the daemon until a signal or a shutdown request arrives
async fn run_daemon(config: &Config) -> Result<()> {
    let (ipc_listener, socket_path) = listener::create_listener_at(&config.daemon.socket_path())?;
    info!(?socket_path, "IPC socket listening");

    let manager = DaemonManager::new();
    manager.register_self()?;

    let daemon = BrokerDaemon::new(Broker::new(config.broker.clone()), config.daemon.clone());
    let shutdown_tx = daemon.shutdown_handle();
    let mut handle = tokio::spawn(daemon.run(ipc_listener));

    let finished = tokio::select! {
        joined = &mut handle => Some(joined),
        _ = wait_for_signal() => None,
    };
    let result = match finished {
        Some(joined) => joined,
        None => {
            let _ = shutdown_tx.send(()).await;
            handle.await
        }
    };

    info!("Daemon shutting down...");
    listener::cleanup_socket(&socket_path);
    if let Err(e) = manager.remove_pid_file() {
        warn!(error = %e, "Failed to remove PID file");
    }

    result.context("Daemon task failed")?
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => warn!("SIGINT received"),
                    _ = sigterm.recv() => warn!("SIGTERM received"),
                }
                return;
            }
            _ => warn!("Failed to install signal handlers, falling back to ctrl_c"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to wait for ctrl_c");
        std::future::pending::<()>().await;
    }
}

async fn cmd_retrieve(
    client: &BrokerClient,
    config: &Config,
    run_id: &str,
    member_id: MemberId,
    identities: Option<&Path>,
    wait: bool,
) -> Result<()> {
    let identities = identities.map(load_identities).transpose()?.unwrap_or_default();
    let poll = Duration::from_millis(config.daemon.poll_interval_ms.max(1));

    loop {
        match client.retrieve(run_id, member_id, identities.clone()).await {
            Ok(Some(document)) => return print_document(&document),
            Ok(None) if wait => {
                debug!(?poll, "cmd_retrieve: not ready, polling");
                tokio::time::sleep(poll).await;
            }
            Ok(None) => {
                eprintln!("{} Not ready yet", "…".yellow());
                std::process::exit(EXIT_NOT_READY);
            }
            // Transport failures are retried while waiting; broker errors are not
            Err(e) if wait && e.downcast_ref::<RemoteError>().is_none() => {
                warn!(error = %e, "cmd_retrieve: request failed, retrying");
                tokio::time::sleep(poll).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn print_document(document: &ResolvedDocument) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(document).context("Failed to serialize document")?);
    Ok(())
}
