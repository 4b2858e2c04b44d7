use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use conductor::adapters::{CommandBackend, LocalToolHost, ModelBackend, OfflineBackend};
use conductor::config::Config;
use conductor::orchestration::{Coordinator, Planner, ToolWorker, WorkerPool};
use conductor::{clog, clog_warn, Result, RunStatus, Workspace};

/// Conductor - plan a request into tasks and run them with parallel workers
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1            Enable debug logging (alternative to --debug)\n    CONDUCTOR_LOG=LEVEL          Log level: error, warn, info, debug or trace\n    CONDUCTOR_MAX_WORKERS=N      Override max_workers\n    CONDUCTOR_BACKEND_COMMAND=.. Override the model backend command"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conductor/conductor.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Decompose a request and print the plan as JSON
    Plan {
        /// The request in natural language
        request: String,

        /// Working directory (defaults to the configured one, then the current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Plan a request, execute it and print the execution report as JSON
    Run {
        /// The request in natural language
        request: String,

        /// Working directory (defaults to the configured one, then the current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Maximum number of concurrent workers
        #[arg(long, short = 'w')]
        workers: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    conductor::log::init_with_debug(cli.debug);

    let config = Config::load()?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Plan { request, workdir } => {
            let workspace = workspace(&config, workdir)?;
            let planner = planner(&config, &workspace);
            let plan = rt.block_on(planner.plan(&request, config.max_tasks));
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Run {
            request,
            workdir,
            workers,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.max_workers = workers;
                config.validate()?;
            }
            let workspace = workspace(&config, workdir)?;
            let coordinator = coordinator(&config, &workspace);

            let report = rt.block_on(async {
                let plan = coordinator.plan(&request).await;
                coordinator.execute(&plan).await
            });
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.status != RunStatus::Succeeded {
                clog!("Run finished: {}", report.summary());
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn workspace(config: &Config, workdir: Option<PathBuf>) -> Result<Workspace> {
    let root = match workdir {
        Some(dir) => dir,
        None => config.effective_working_dir()?,
    };
    Ok(Workspace::new(root.canonicalize()?))
}

fn backend(config: &Config, workspace: &Workspace) -> Arc<dyn ModelBackend> {
    match CommandBackend::from_command_line(config.effective_command(), workspace.root()) {
        Ok(backend) => Arc::new(backend.with_timeout(config.backend_timeout())),
        Err(e) => {
            clog_warn!(
                "Model backend `{}` not usable ({}), planning will use the fallback",
                config.effective_command(),
                e
            );
            Arc::new(OfflineBackend)
        }
    }
}

fn planner(config: &Config, workspace: &Workspace) -> Planner {
    Planner::from_config(backend(config, workspace), workspace.clone(), config)
}

fn coordinator(config: &Config, workspace: &Workspace) -> Coordinator {
    let host = LocalToolHost::new(workspace.clone()).with_command_timeout(config.tool_timeout());
    let worker = ToolWorker::new(workspace.clone(), Arc::new(host))
        .with_backend(backend(config, workspace))
        .with_call_timeout(config.tool_timeout())
        .with_task_timeout(config.task_timeout());
    let pool = WorkerPool::new(Arc::new(worker), config.max_workers, config.task_timeout());
    Coordinator::new(planner(config, workspace), pool, workspace.clone())
}
