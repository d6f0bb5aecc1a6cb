use crate::leaves::Workspace;
use crate::manifest::{BuildManifest, RunnerConfig, DEFAULT_MANIFEST};
use crate::pipeline::{build_registry, DEFAULT_TASK};
use clap::{ArgAction, Parser};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use waverun_core::events::format_elapsed;
use waverun_core::{
    ExecutionPlan, Resources, RunOptions, RunReport, Runner, TaskState, TracingSink,
};

/// Exit status for configuration and resolution errors
pub const EXIT_USAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "waverun")]
#[command(version, about = "Declarative task-graph build runner", long_about = None)]
pub struct Args {
    /// Tasks to run
    #[arg(default_value = DEFAULT_TASK)]
    pub tasks: Vec<String>,

    /// Path to the build manifest [default: <root>/waverun.toml]
    #[arg(short, long, env = "WAVERUN_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Project root
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Maximum number of tasks running at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Keep running independent tasks after a failure
    #[arg(short, long)]
    pub keep_going: bool,

    /// Per-task timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Wait for each wave to settle before starting the next
    #[arg(long)]
    pub wave_barrier: bool,

    /// Log what would run without touching the file system
    #[arg(long)]
    pub dry_run: bool,

    /// List registered tasks and exit
    #[arg(long, conflicts_with = "plan")]
    pub list: bool,

    /// Print the execution plan and exit
    #[arg(long)]
    pub plan: bool,

    /// Print machine readable output
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_MANIFEST))
    }

    /// Manifest `[runner]` defaults with command line overrides applied
    pub fn run_options(&self, runner: &RunnerConfig) -> RunOptions {
        let mut options = RunOptions::default();
        if let Some(limit) = self.jobs.or(runner.concurrency) {
            options = options.with_concurrency(limit);
        }
        if let Some(fail_fast) = runner.fail_fast {
            options = options.with_fail_fast(fail_fast);
        }
        if self.keep_going {
            options = options.with_fail_fast(false);
        }
        if let Some(secs) = self.timeout.or(runner.task_timeout_secs) {
            options = options.with_task_timeout(Some(Duration::from_secs(secs)));
        }
        options.with_wave_barrier(self.wave_barrier)
    }
}

pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "waverun=info",
        1 => "waverun=debug",
        _ => "waverun=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_target(false)
        .init();
}

/// Load the manifest, build the graph and run the requested tasks.
///
/// Returns the process exit status; only output errors are `Err`.
pub async fn execute<W: Write>(args: &Args, out: &mut W) -> anyhow::Result<i32> {
    let manifest_path = args.manifest_path();
    let manifest = match BuildManifest::load(&manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::error!("{}", e);
            return Ok(EXIT_USAGE);
        }
    };

    let registry = match build_registry(&manifest, args.dry_run) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!("Invalid task graph: {}", e);
            return Ok(EXIT_USAGE);
        }
    };

    if args.list {
        for task in registry.tasks() {
            writeln!(
                out,
                "{:<32} {}",
                task.name,
                task.description.as_deref().unwrap_or("")
            )?;
        }
        return Ok(0);
    }

    let options = args.run_options(&manifest.runner);
    let workspace = Workspace::new(manifest, &args.root);
    let runner = Runner::new(registry)
        .with_sink(Arc::new(TracingSink))
        .with_resources(Resources::new().with(workspace));

    if args.plan {
        return match runner.resolve(&args.tasks) {
            Ok(plan) => {
                write_plan(out, &plan, args.json)?;
                Ok(0)
            }
            Err(e) => {
                tracing::error!("{}", e);
                Ok(EXIT_USAGE)
            }
        };
    }

    tracing::info!("Using manifest {}", manifest_path.display());
    let report = match runner.run(&args.tasks, options).await {
        Ok(report) => report,
        Err(e) if e.is_resolution_error() => {
            tracing::error!("Cannot resolve {}: {}", args.tasks.join(", "), e);
            return Ok(EXIT_USAGE);
        }
        Err(e) => {
            tracing::error!("{}", e);
            return Ok(EXIT_USAGE);
        }
    };
    for failure in report.failures() {
        tracing::error!("{}", failure);
    }

    if args.json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        out.write_all(render_summary(&report).as_bytes())?;
    }
    Ok(report.exit_code())
}

fn write_plan<W: Write>(out: &mut W, plan: &ExecutionPlan, json: bool) -> anyhow::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, plan.waves())?;
        writeln!(out)?;
        return Ok(());
    }
    for (index, wave) in plan.waves().iter().enumerate() {
        let names: Vec<&str> = wave.iter().map(|name| name.as_str()).collect();
        writeln!(out, "wave {}: {}", index, names.join(", "))?;
    }
    Ok(())
}

/// Table of task outcomes followed by a one line summary
pub fn render_summary(report: &RunReport) -> String {
    let mut table = format!("{:<32} {:<10} {:>10}  {}\n", "TASK", "STATE", "TIME", "DETAIL");
    for entry in report.entries() {
        let time = entry.elapsed.map(format_elapsed).unwrap_or_default();
        let detail = match entry.state {
            TaskState::Failed => entry
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default(),
            TaskState::Skipped => entry.skip_reason.clone().unwrap_or_default(),
            _ => String::new(),
        };
        table.push_str(
            format!("{:<32} {:<10} {:>10}  {}", entry.name, entry.state, time, detail)
                .trim_end(),
        );
        table.push('\n');
    }

    let summary = report.summary();
    table.push_str(&format!(
        "\n{} succeeded, {} failed, {} skipped in {}\n",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        format_elapsed(summary.total_elapsed)
    ));
    if summary.malformed > 0 {
        table.push_str(&format!(
            "{} task(s) broke their completion contract\n",
            summary.malformed
        ));
    }
    table
}
