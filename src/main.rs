//! jobsched - administer a job store.
//!
//! Usage:
//!   jobsched validate <config>          Validate a configuration file
//!   jobsched list                       List jobs
//!   jobsched executions <job-id>        Show a job's recent runs
//!   jobsched enable|disable <job-id>    Set the operator enable flag
//!   jobsched schedule <job-id> <when>   Set the next execution
//!   jobsched clear-running <job-id>     Unstick a job left claimed

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use jobsched::service::open_storage;
use jobsched::{
    ADMIN_TENANT_ID, Job, JobFilter, JobId, JobService, PageRequest, Storage, StorageConfig,
    TenantId, YamlLoader,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// jobsched - administer a persistent job store
#[derive(Parser)]
#[command(name = "jobsched")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Configuration file naming the store
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the configured store
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Tenant to operate on (default: the admin tenant)
    #[arg(long, global = true, value_name = "TENANT_ID")]
    tenant: Option<TenantId>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        #[arg(value_name = "CONFIG")]
        path: PathBuf,
    },

    #[command(flatten)]
    Admin(AdminCommand),
}

/// Commands that operate on a job store.
#[derive(Subcommand)]
enum AdminCommand {
    /// List jobs
    List {
        /// Case-insensitive substring of the job name
        #[arg(long = "match", value_name = "TEXT")]
        match_text: Option<String>,

        /// Hide jobs disabled by configuration or an operator
        #[arg(long)]
        exclude_disabled: bool,

        /// Zero-based page
        #[arg(long, default_value = "0")]
        page: usize,

        #[arg(long, default_value = "50")]
        size: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show a job's executions, newest first
    Executions {
        #[arg(value_name = "JOB_ID")]
        job_id: JobId,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Only failed runs
        #[arg(long)]
        failed: bool,
    },

    /// Enable a job
    Enable {
        #[arg(value_name = "JOB_ID")]
        job_id: JobId,
    },

    /// Disable a job
    Disable {
        #[arg(value_name = "JOB_ID")]
        job_id: JobId,
    },

    /// Set when a job runs next
    Schedule {
        #[arg(value_name = "JOB_ID")]
        job_id: JobId,

        /// RFC 3339 instant, e.g. 2024-05-01T02:00:00Z
        #[arg(value_name = "WHEN")]
        when: DateTime<Utc>,
    },

    /// Clear the running status of a job left claimed by a crashed worker
    ClearRunning {
        #[arg(value_name = "JOB_ID")]
        job_id: JobId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => validate_config(&path),
        Commands::Admin(command) => administer(&cli.store, command).await,
    }
}

async fn administer(store: &StoreArgs, command: AdminCommand) -> anyhow::Result<()> {
    let tenant = store.tenant.unwrap_or(ADMIN_TENANT_ID);
    let service = JobService::new(connect(store).await?);

    match command {
        AdminCommand::List {
            match_text,
            exclude_disabled,
            page,
            size,
            json,
        } => {
            let filter = JobFilter {
                match_text,
                exclude_disabled,
            };
            list_jobs(&service, &tenant, &filter, PageRequest::new(page, size), json).await?;
        }
        AdminCommand::Executions {
            job_id,
            limit,
            failed,
        } => {
            show_executions(&service, &tenant, &job_id, limit, failed).await?;
        }
        AdminCommand::Enable { job_id } => {
            if !service.set_user_enabled(&tenant, &job_id, true).await? {
                bail!("job {} not found", job_id);
            }
            println!("Enabled {}", job_id);
        }
        AdminCommand::Disable { job_id } => {
            if !service.set_user_enabled(&tenant, &job_id, false).await? {
                bail!("job {} not found", job_id);
            }
            println!("Disabled {}", job_id);
        }
        AdminCommand::Schedule { job_id, when } => {
            if !service.set_next_execution(&tenant, &job_id, Some(when)).await? {
                bail!("job {} not found or currently running", job_id);
            }
            println!("Job {} runs next at {}", job_id, when.to_rfc3339());
        }
        AdminCommand::ClearRunning { job_id } => {
            if !service.clear_running_status(&tenant, &job_id).await? {
                bail!("job {} not found", job_id);
            }
            println!("Cleared running status of {}", job_id);
        }
    }

    Ok(())
}

/// Open the store given by `--db`, or by the configuration file.
async fn connect(store: &StoreArgs) -> anyhow::Result<Arc<dyn Storage>> {
    let storage_config = match (&store.db, &store.config) {
        (Some(db), _) => StorageConfig::Sqlite {
            path: db.to_string_lossy().into_owned(),
        },
        (None, Some(path)) => {
            YamlLoader::load_config(path)
                .with_context(|| format!("loading {}", path.display()))?
                .storage
        }
        (None, None) => bail!("no store given, pass --db <PATH> or --config <FILE>"),
    };
    if storage_config == StorageConfig::Memory {
        bail!("the configured store is in memory, there is nothing to administer");
    }
    info!(storage = ?storage_config, "Opening job store");
    Ok(open_storage(&storage_config).await?)
}

fn validate_config(path: &Path) -> anyhow::Result<()> {
    let config =
        YamlLoader::load_config(path).with_context(|| format!("validating {}", path.display()))?;
    let scheduler = &config.job_scheduler;

    println!("Configuration {} is valid", path.display());
    println!("  Application: {}", config.application.name);
    println!("  Scheduler enabled: {}", scheduler.enabled);
    if let Some(max) = scheduler.max_parallel_jobs {
        println!("  Max parallel jobs: {}", max);
    }
    println!("  Poll interval: {:?}", scheduler.poll_interval);
    println!("  Exit when idle: {}", scheduler.exit_when_idle);
    println!("  Reconciler: {}", if scheduler.reconciler_enabled() { "on" } else { "off" });

    let mut keys: Vec<_> = scheduler.jobs_enabled.iter().collect();
    keys.sort();
    for (key, enabled) in keys {
        println!("    {}: {}", key, enabled);
    }
    Ok(())
}

async fn list_jobs(
    service: &JobService,
    tenant: &TenantId,
    filter: &JobFilter,
    page: PageRequest,
    json: bool,
) -> anyhow::Result<()> {
    let total = service.count(tenant, filter).await?;
    let jobs = service.find(tenant, page, filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!("Jobs ({} of {}):", jobs.len(), total);
    println!();
    for job in &jobs {
        print_job(job);
        println!();
    }
    Ok(())
}

fn print_job(job: &Job) {
    println!("ID: {}", job.id);
    println!("  Name: {}", job.name);
    println!("  Application: {}", job.application_name);
    println!("  Schedule: {}", job.schedule);
    println!(
        "  Enabled: {} (config: {}, user: {})",
        job.is_enabled(),
        job.config_enabled,
        job.user_enabled
    );
    match job.next_execution {
        Some(next) => println!("  Next execution: {}", next.to_rfc3339()),
        None => println!("  Next execution: none"),
    }
    if let Some(execution_id) = job.job_execution_id {
        println!("  Running: {}", execution_id);
    }
    println!("  Executions: {}", job.execution_count);
    if let Some(at) = job.last_successfully_executed {
        println!("  Last success: {}", at.to_rfc3339());
    }
    if let Some(at) = job.last_failed_execution {
        println!("  Last failure: {}", at.to_rfc3339());
    }
}

async fn show_executions(
    service: &JobService,
    tenant: &TenantId,
    job_id: &JobId,
    limit: usize,
    failed_only: bool,
) -> anyhow::Result<()> {
    let job = service.get(tenant, job_id).await?;
    let outcome = failed_only.then_some(false);
    let executions = service
        .executions_for_job(tenant, job_id, outcome, PageRequest::new(0, limit))
        .await?;

    println!("Executions of {}:", job.name);
    for execution in &executions {
        let status = if execution.success { "ok" } else { "FAILED" };
        println!(
            "  {} {} {}",
            execution.created_date.to_rfc3339(),
            execution.id,
            status
        );
        if let Some(trace) = &execution.stack_trace {
            for line in trace.lines() {
                println!("      {}", line);
            }
        }
    }
    if executions.is_empty() {
        println!("  (none)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_validate_does_not_need_a_store() {
        let cli = Cli::try_parse_from(["jobsched", "validate", "app.yaml"]).unwrap();
        match cli.command {
            Commands::Validate { path } => assert_eq!(path, PathBuf::from("app.yaml")),
            _ => panic!("expected the validate command"),
        }
    }

    #[test]
    fn test_executions_failed_filter_parses() {
        let job_id = JobId::new();
        let id = job_id.to_string();
        let cli = Cli::try_parse_from([
            "jobsched",
            "executions",
            id.as_str(),
            "-n",
            "5",
            "--failed",
            "--db",
            "jobs.db",
        ])
        .unwrap();

        assert_eq!(cli.store.db.as_deref(), Some(Path::new("jobs.db")));
        match cli.command {
            Commands::Admin(AdminCommand::Executions {
                job_id: parsed,
                limit,
                failed,
            }) => {
                assert_eq!(parsed, job_id);
                assert_eq!(limit, 5);
                assert!(failed);
            }
            _ => panic!("expected the executions command"),
        }
    }
}
