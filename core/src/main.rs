//! `cylcd` — run a single workflow's scheduling core in the foreground.
//!
//! This binary wires the library's pieces into a running process: load the
//! normalized config, compile the graph, rehydrate (or freshly start) the
//! task pool from the private run database, and drive the main loop one
//! quantum at a time until a shutdown request or a fatal error ends it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, Context, Result};
use tracing::{error, info};

use cylc_core::adapters::AdapterRegistry;
use cylc_core::clock::{Clock, SystemClock};
use cylc_core::config::NormalizedConfig;
use cylc_core::cycle::{CyclePoint, Interval};
use cylc_core::graph::{compile, CustomOutputDecl, GraphSection};
use cylc_core::messaging::{channel, TaskMessage};
use cylc_core::pool::RunaheadLimit;
use cylc_core::scheduler::{restore, CyclingMode, MainLoop, MainLoopConfig, ShutdownRequest};
use cylc_core::subprocess::{QosLimits, SubprocessPool};

#[derive(Parser)]
#[command(name = "cylcd", about = "Run a cycling workflow's scheduling core", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Run directory (holds `.service/`, `log/`, `share/`, `work/`).
    run_dir: PathBuf,

    /// Explicit path to the normalized config document, overriding
    /// `<run_dir>/.service/config.yaml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum concurrent subprocesses (submission/poll/kill combined).
    #[arg(long, default_value_t = 8)]
    max_concurrent_jobs: usize,

    /// Seconds between scheduling quanta when there is no pending work to
    /// react to immediately.
    #[arg(long, default_value_t = 1)]
    quantum_interval_secs: u64,
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Parses `runahead_limit` as either a bare count (`"3"`) or an ISO8601
/// duration/integer interval (`"PT6H"`, `"5"` under integer cycling already
/// handled above — this only runs for the non-count form).
fn parse_runahead_limit(raw: &str) -> Result<RunaheadLimit> {
    if let Ok(count) = raw.parse::<u32>() {
        return Ok(RunaheadLimit::Count(count));
    }
    let interval: Interval = raw.parse().map_err(|err| eyre!("malformed runahead_limit '{raw}': {err}"))?;
    Ok(RunaheadLimit::Interval(interval))
}

fn parse_optional_point(raw: &Option<String>, mode: CyclingMode) -> Result<Option<CyclePoint>> {
    raw.as_deref().map(|s| mode.parse_point(s)).transpose().map_err(|err| eyre!(err))
}

async fn run(cli: Cli) -> Result<i32> {
    let config = NormalizedConfig::load(cli.config.as_deref(), &cli.run_dir).context("loading normalized config")?;

    let mode = CyclingMode::parse(Some(config.cycling_mode.as_str())).map_err(|err| eyre!(err))?;
    let icp = parse_optional_point(&config.initial_cycle_point, mode)?
        .ok_or_else(|| eyre!("initial_cycle_point is required to start a run"))?;
    let fcp = parse_optional_point(&config.final_cycle_point, mode)?;

    let sections: Vec<GraphSection> = config
        .graph_sections
        .iter()
        .map(|s| GraphSection { sequence_text: s.sequence_spec.clone(), graph_text: s.graph_text.clone() })
        .collect();
    let custom_outputs: Vec<CustomOutputDecl> = config
        .custom_outputs
        .iter()
        .map(|c| CustomOutputDecl { task_name: c.task_name.clone(), output_name: c.output_name.clone(), required: c.required })
        .collect();
    let mut graph = compile(&sections, &config.families, &custom_outputs).context("compiling workflow graph")?;
    for (task_name, settings) in &config.runtime {
        if let Some(def) = graph.definitions.get_mut(task_name) {
            def.execution = settings.clone();
        }
    }
    graph.apply_clock_gates(&config.special_tasks.clock_trigger, &config.special_tasks.clock_expire);
    graph.rebuild_children_index();

    let runahead_limit = parse_runahead_limit(&config.runahead_limit)?;
    let default_queue_limit = config.queues.get("default").map(|q| q.limit).unwrap_or(0);

    std::fs::create_dir_all(cli.run_dir.join(".service")).context("creating .service directory")?;
    let db_path = cli.run_dir.join(".service").join("db");
    let store = cylc_store::PrivateStore::open(&db_path).context("opening private run database")?;

    let outcome = restore(&store, &graph, None, runahead_limit, default_queue_limit).context("restart protocol")?;
    for (id, job) in &outcome.jobs_to_poll {
        info!(proxy = %id, job_id = ?job.job_id, "cylcd: job left in-flight across restart, will poll before resuming");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let adapters = AdapterRegistry::with_builtins();
    let (subprocess, results_rx) = SubprocessPool::new(cli.max_concurrent_jobs, QosLimits::default());
    let (_inbound_tx, inbound_rx) = channel::<TaskMessage>(256);

    let config_for_loop = MainLoopConfig {
        default_batch_system: "background".to_string(),
        suite_name: cli.run_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
    };

    let mut main_loop = MainLoop::new(
        outcome.pool,
        graph,
        outcome.broadcasts,
        clock,
        adapters,
        subprocess,
        results_rx,
        inbound_rx,
        icp,
        fcp,
        config_for_loop,
        Some(store),
        outcome.params.next_flow_label,
    );

    info!(run_dir = %cli.run_dir.display(), "cylcd: scheduler starting");

    let quantum_interval = Duration::from_secs(cli.quantum_interval_secs.max(1));
    let mut ticker = tokio::time::interval(quantum_interval);
    let mut stalled_since: Option<tokio::time::Instant> = None;
    const STALL_TIMEOUT: Duration = Duration::from_secs(3600);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = main_loop.run_quantum().await;
                if report.is_stalled {
                    let since = *stalled_since.get_or_insert_with(tokio::time::Instant::now);
                    if since.elapsed() > STALL_TIMEOUT {
                        error!("cylcd: workflow stalled with no actionable work for longer than the timeout");
                        return Ok(3);
                    }
                } else {
                    stalled_since = None;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("cylcd: received interrupt, beginning soft shutdown");
                let mut report = cylc_core::QuantumReport::default();
                main_loop.begin_shutdown(&ShutdownRequest::after_active_jobs(), &mut report);
                while !main_loop.shutdown_ready() {
                    ticker.tick().await;
                    main_loop.run_quantum().await;
                }
                break;
            }
        }
    }

    info!("cylcd: scheduler stopped cleanly");
    Ok(0)
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    let exit_code = runtime.block_on(run(cli)).unwrap_or_else(|err| {
        error!(error = %err, "cylcd: fatal error");
        4
    });

    std::process::exit(exit_code);
}
