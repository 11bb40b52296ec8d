use clap::{Parser, Subcommand};
use jacques_daemon::daemon::Daemon;
use jacques_daemon::logging::WsLogLayer;
use jacques_daemon::state::{
    DEFAULT_HTTP_PORT, DEFAULT_SOCKET_PATH, DEFAULT_WS_PORT, DaemonConfig, default_pid_file,
};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "jacques", about = "Session-observability daemon for AI coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default when no subcommand is given)
    Daemon {
        /// Ingress socket path for assistant hook events
        #[arg(long, env = "JACQUES_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,

        /// Websocket fan-out port
        #[arg(long, env = "JACQUES_WS_PORT", default_value_t = DEFAULT_WS_PORT)]
        ws_port: u16,

        /// HTTP query port
        #[arg(long, env = "JACQUES_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
        http_port: u16,

        /// Idle minutes before the stale-session sweeper unregisters a session
        #[arg(long, default_value_t = 60)]
        max_idle_minutes: u64,
    },
    /// Extract catalogs for one project, or for every known project
    Extract {
        /// Project directory; omit to extract all projects
        #[arg(long)]
        project: Option<PathBuf>,

        /// Re-extract even when transcripts are unchanged
        #[arg(long)]
        force: bool,
    },
    /// Report whether a daemon appears to be running
    Status {
        #[arg(long, env = "JACQUES_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        None => run_daemon(DaemonConfig::default()).await,
        Some(Commands::Daemon {
            socket,
            ws_port,
            http_port,
            max_idle_minutes,
        }) => {
            run_daemon(DaemonConfig {
                socket_path: socket,
                ws_port,
                http_port,
                max_idle_minutes,
                ..DaemonConfig::default()
            })
            .await
        }
        Some(Commands::Extract { project, force }) => run_extract(project, force),
        Some(Commands::Status { socket }) => run_status(&socket).await,
    };
    std::process::exit(code);
}

async fn run_daemon(config: DaemonConfig) -> i32 {
    let daemon = Daemon::new(config);

    // Log pipeline: console via fmt, plus the websocket mirror layer.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(WsLogLayer::new(daemon.broadcaster().sender()))
        .init();

    // Ctrl-C triggers the cooperative shutdown path.
    let cancel = daemon.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            cancel.cancel();
        }
    });

    match daemon.run().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "daemon startup failed");
            e.exit_code()
        }
    }
}

fn run_extract(project: Option<PathBuf>, force: bool) -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Some(projects_root) = jacques_catalog::paths::claude_projects_root() else {
        eprintln!("cannot resolve the home directory");
        return 1;
    };
    let mut on_report = |report: &jacques_catalog::ExtractionReport| {
        if let Some(error) = &report.error {
            eprintln!("{}: error: {error}", report.session_id);
        } else if report.skipped {
            println!("{}: unchanged, skipped", report.session_id);
        } else {
            println!(
                "{}: extracted ({} plans, {} subagents, {} searches)",
                report.session_id,
                report.plans_extracted,
                report.subagents_extracted,
                report.searches_extracted
            );
        }
    };

    let summary = match project {
        Some(project_dir) => jacques_catalog::extract_project_catalog(
            &project_dir,
            &projects_root,
            force,
            &mut on_report,
        ),
        None => jacques_catalog::extract_all_catalogs(&projects_root, force, &mut on_report),
    };
    println!(
        "extracted {} / skipped {} / errors {}",
        summary.extracted, summary.skipped, summary.errors
    );
    if summary.errors > 0 { 1 } else { 0 }
}

/// Probe liveness the way startup does: a connectable ingress socket means
/// a daemon is up.
async fn run_status(socket: &PathBuf) -> i32 {
    match tokio::net::UnixStream::connect(socket).await {
        Ok(_) => {
            println!("jacques daemon is running (socket {})", socket.display());
            0
        }
        Err(_) => {
            println!("jacques daemon is not running");
            if let Ok(pid) = std::fs::read_to_string(default_pid_file()) {
                println!("stale PID file references pid {}", pid.trim());
            }
            1
        }
    }
}
