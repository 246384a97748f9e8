use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use devserve_common::ServerName;
use devserve_orchestration::{
    OrchestrationResult, Orchestrator, Selection, ServerFile, ServerState, ServerStatus,
};

/// devserve - development server dependency and lifecycle orchestrator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server configuration file (YAML)
    #[arg(short, long, value_name = "FILE", default_value = ".devserve.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start servers (all auto-start servers, or the named ones plus
    /// their dependencies) and supervise them until interrupted
    Start {
        /// Servers to start; empty means every auto-start server
        names: Vec<String>,

        /// Include servers marked `auto_start: false`
        #[arg(long)]
        all_servers: bool,
    },

    /// Stop servers in reverse dependency order
    Stop {
        /// Servers to stop; empty means all
        names: Vec<String>,
    },

    /// Restart one server
    Restart { name: String },

    /// Show server status
    Status {
        /// A single server; empty means all
        name: Option<String>,
    },

    /// Show captured output for one server
    Logs {
        name: String,

        /// Number of trailing lines
        #[arg(long, default_value_t = 50)]
        tail: usize,
    },

    /// Check the configuration without starting anything
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging(args.debug)?;

    let file = ServerFile::load_from_file(&args.config)?;
    info!(
        "Loaded {} server definitions from {}",
        file.servers.len(),
        args.config
    );

    let mut orchestrator = Orchestrator::new(file)?;

    match args.command {
        Command::Start { names, all_servers } => {
            let selection = selection_from(names, all_servers);
            run_start_session(&mut orchestrator, &selection).await?;
        }
        Command::Stop { names } => {
            let selection = selection_from(names, true);
            let result = orchestrator.run_stop(&selection).await?;
            print_result(&result);
            bail_on_failure(&result)?;
        }
        Command::Restart { name } => {
            let status = orchestrator.restart(&ServerName::from(name)).await?;
            print_status(&status);
            if let Some(err) = &status.last_error {
                anyhow::bail!("Restart failed: {}", err);
            }
        }
        Command::Status { name } => match name {
            Some(name) => {
                let status = orchestrator.status(&ServerName::from(name))?;
                print_status(&status);
            }
            None => {
                for status in orchestrator.status_all() {
                    print_status(&status);
                }
            }
        },
        Command::Logs { name, tail } => {
            for entry in orchestrator.logs(&ServerName::from(name), tail)? {
                println!(
                    "{} [{}] {}",
                    entry.timestamp.format("%H:%M:%S%.3f"),
                    entry.stream,
                    entry.line
                );
            }
        }
        Command::Validate => {
            let report = orchestrator.validate();
            if report.is_ok() {
                println!("Configuration is valid");
            } else {
                for problem in report.problems() {
                    eprintln!("error: {}", problem);
                }
                anyhow::bail!("Configuration is invalid");
            }
        }
    }

    Ok(())
}

/// Start the selection, supervise until a shutdown signal, then stop
/// everything that was started.
async fn run_start_session(
    orchestrator: &mut Orchestrator,
    selection: &Selection,
) -> Result<()> {
    let result = orchestrator.run_start(selection).await?;
    print_result(&result);

    if !result.all_succeeded() {
        warn!("Some servers did not start; supervising the rest");
    }
    if result
        .reports
        .iter()
        .all(|r| r.state != ServerState::Running && r.state != ServerState::Unhealthy)
    {
        error!("No server is running, nothing to supervise");
        anyhow::bail!("Start failed");
    }

    info!("Servers are up; press Ctrl+C to stop");
    wait_for_shutdown().await;

    info!("Shutting down...");
    let stop = orchestrator
        .run_stop(&Selection::All {
            include_manual: true,
        })
        .await?;
    print_result(&stop);
    bail_on_failure(&result)?;
    bail_on_failure(&stop)
}

fn selection_from(names: Vec<String>, include_manual: bool) -> Selection {
    if names.is_empty() {
        Selection::All { include_manual }
    } else {
        Selection::Named(names.into_iter().map(ServerName::from).collect())
    }
}

fn print_result(result: &OrchestrationResult) {
    for report in &result.reports {
        let note = match (&report.error, report.skipped) {
            (Some(err), _) => format!(" ({})", err),
            (None, true) => " (skipped)".to_string(),
            (None, false) => String::new(),
        };
        println!("{:<20} {}{}", report.name, report.state, note);
    }
}

fn print_status(status: &ServerStatus) {
    let pid = status
        .pid
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    let since = status
        .started_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:<10} health={:<9} pid={:<8} restarts={} since={}",
        status.name, status.state, status.health, pid, status.restart_count, since
    );
    if let Some(err) = &status.last_error {
        println!("{:<20} last error: {}", "", err);
    }
}

fn bail_on_failure(result: &OrchestrationResult) -> Result<()> {
    let failed: Vec<String> = result.failures().map(|r| r.name.to_string()).collect();
    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Servers with problems: {}", failed.join(", "))
    }
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    Ok(())
}

async fn wait_for_shutdown() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            r = signal::ctrl_c() => {
                if let Err(e) = r {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
