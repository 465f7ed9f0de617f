use anyhow::Context;
use clap::{ArgAction, Parser};
use loadprobe::config::Config;
use loadprobe::report::print_summary;
use loadprobe::runner::{EXIT_INVALID_CONFIG, Runner};
use loadprobe::script::TestPlan;
use loadprobe::status::{StatusState, serve};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "loadprobe")]
#[command(about = "Ramping virtual-user HTTP load harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Test script (JSON)
    script: PathBuf,

    /// Serve live status (health, JSON and Prometheus metrics) on this address
    #[arg(long, env = "STATUS_ADDR")]
    status_addr: Option<SocketAddr>,

    /// Per-request timeout, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    http_timeout: Option<Duration>,

    /// Validate the script and exit without generating traffic
    #[arg(long)]
    check: bool,

    /// Do not print the end-of-run summary
    #[arg(short, long)]
    quiet: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "loadprobe=info",
        1 => "loadprobe=debug,tower_http=debug",
        _ => "loadprobe=trace,tower_http=debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl-C; never resolves if the signal handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Load configuration from environment, then apply flags
    let mut config = Config::from_env();
    if let Some(addr) = cli.status_addr {
        config.status_addr = Some(addr);
    }
    if let Some(timeout) = cli.http_timeout {
        config.http.timeout = timeout;
    }

    let plan = match TestPlan::from_path(&cli.script, &config.defaults) {
        Ok(plan) => plan,
        Err(e) => {
            error!("Invalid script {:?}: {}", cli.script, e);
            return Ok(EXIT_INVALID_CONFIG);
        }
    };
    info!(
        "Loaded {:?}: {} scenario(s), {} threshold(s)",
        cli.script,
        plan.scenarios.len(),
        plan.thresholds.len()
    );
    if cli.check {
        info!("Script is valid");
        return Ok(0);
    }

    let runner = Runner::new(plan, &config)?;

    // Status endpoint runs until the test is over
    let mut status_task = None;
    if let Some(addr) = config.status_addr {
        let prometheus = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        let state = StatusState::new(runner.run_id(), runner.aggregator()).with_prometheus(prometheus);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status endpoint on {}", addr))?;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.await;
            };
            if let Err(e) = serve(listener, state, shutdown).await {
                error!("Status endpoint failed: {}", e);
            }
        });
        status_task = Some((stop_tx, handle));
    }

    let report = runner.run(ctrl_c()).await?;

    if let Some((stop_tx, handle)) = status_task {
        let _ = stop_tx.send(());
        let _ = handle.await;
    }

    if !cli.quiet {
        print_summary(&report);
    }
    Ok(report.exit_code())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = run(cli).await?;
    std::process::exit(code);
}
