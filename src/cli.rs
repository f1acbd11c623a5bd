use crate::{
    config::Config,
    monitor::probe_name,
    plan::{load_unit_specs, BatchPlan},
    supervisor::Supervisor,
    util::{ensure_dir, expand_tilde, now_rfc3339},
    worker::{executable_exists, WorkerCommand},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Exit code when the batch ran but left units unresolved.
pub const EXIT_INCOMPLETE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "batch-warden")]
#[command(about = "Unattended batch supervisor for UI-driven document workers")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./batch-warden.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Doctor {},
    Plan {
        #[arg(long)]
        units: PathBuf,
    },
    Run {
        #[arg(long)]
        units: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Reference worker; launched by the supervisor, not by hand.
    #[command(hide = true)]
    DemoWorker {},
}

/// Returns the process exit code.
pub fn dispatch(args: Args) -> Result<i32> {
    match &args.cmd {
        Command::DemoWorker {} => crate::worker::demo::run(),
        Command::Doctor {} => {
            let (cfg, cfg_path) = load_config(&args)?;
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            doctor(&cfg, &cfg_path).map(|_| 0)
        }
        Command::Plan { units } => {
            let (cfg, _) = load_config(&args)?;
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            plan(&cfg, units).map(|_| 0)
        }
        Command::Run { units, out_dir } => {
            let (cfg, _) = load_config(&args)?;
            run(&args, &cfg, units, out_dir.as_deref())
        }
    }
}

fn load_config(args: &Args) -> Result<(Config, PathBuf)> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;
    Ok((cfg, cfg_path))
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("batch-warden.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("batch-warden.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config, cfg_path: &Path) -> Result<()> {
    let mut capabilities: BTreeSet<String> = cfg.worker.executables.keys().cloned().collect();
    capabilities.insert(cfg.units.default_capability.clone());

    let workers = capabilities
        .iter()
        .map(|capability| match WorkerCommand::for_capability(&cfg.worker, capability) {
            Ok(cmd) => serde_json::json!({
                "capability": capability,
                "executable": cmd.executable,
                "found": executable_exists(&cmd.executable),
            }),
            Err(err) => serde_json::json!({
                "capability": capability,
                "error": err.to_string(),
            }),
        })
        .collect::<Vec<_>>();

    let diag = serde_json::json!({
        "config": cfg_path,
        "data_dir": expand_tilde(&cfg.paths.data_dir),
        "harness_dir": cfg.paths.harness_dir,
        "responsiveness_probe": probe_name(),
        "dialogs_enabled": cfg.dialogs.enabled,
        "workers": workers,
    });
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn plan(cfg: &Config, units: &Path) -> Result<()> {
    let specs = load_unit_specs(units)?;
    let session_id = uuid::Uuid::new_v4().to_string();
    let plan = BatchPlan::build(&cfg.units, &session_id, specs);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn run(args: &Args, cfg: &Config, units: &Path, out_override: Option<&Path>) -> Result<i32> {
    let specs = load_unit_specs(units)?;
    let session_id = uuid::Uuid::new_v4().to_string();

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let batch_dir = out_root.join(&session_id);
    ensure_dir(&batch_dir)?;

    let log_path = resolve_log_path(cfg, Some(&batch_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!("session_id={session_id} out={}", batch_dir.display());

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(batch_dir.join("effective-config.toml"), raw)?;
    }

    let plan = BatchPlan::build(&cfg.units, &session_id, specs);
    if plan.groups.is_empty() {
        return Err(anyhow!("no work units to process in {}", units.display()));
    }

    let started = now_rfc3339();
    let mut supervisor = Supervisor::new(cfg, &session_id)?;
    let report = supervisor.run_batch(&plan)?;

    let report_path = batch_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing report: {}", report_path.display()))?;

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "session_id": session_id,
                "batch_dir": batch_dir,
                "started": started,
                "finished": report.finished,
                "groups": report.groups.iter().map(|g| serde_json::json!({
                    "capability": g.capability,
                    "outcome": g.outcome,
                    "completed": g.completed.len(),
                    "failed": g.failed.len(),
                    "unresolved": g.unresolved.len(),
                })).collect::<Vec<_>>(),
                "skipped": report.skipped.len(),
            }))?
        );
    }

    if !report.hook_errors.is_empty() {
        return Err(anyhow!("post-processing hooks failed: {}", report.hook_errors.join("; ")));
    }
    Ok(if report.all_completed() { 0 } else { EXIT_INCOMPLETE })
}

fn resolve_log_path(cfg: &Config, batch_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(batch_dir) = batch_dir {
        return Some(batch_dir.join("logs").join("batch-warden.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("batch-warden.log"))
}
