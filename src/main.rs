// Dispatcher entry point: build a job's pipeline, validate it, and run it
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use hilrun_job::{DeviceDescription, JobDefinition, DEFAULT_NAMESPACE};
use hilrun_overlay::build_pipeline;
use hilrun_overlay::keys::{COMPRESSED_OVERLAY, NFS_ROOT, NFS_SERVER};
use hilrun_pipeline::{ErrorClass, Job, JobContext, JobRunner, Pipeline};
use hilrun_protocols::protocols_for_job;
use std::collections::BTreeMap;
use std::io::stderr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod config;

use config::{ConfigOverrides, DispatcherConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Hardware-in-the-loop test job dispatcher", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the job's pipeline and report every validation error
    Validate(JobArgs),
    /// Validate, then execute the pipeline
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct JobArgs {
    /// Job definition (YAML)
    #[arg(long)]
    job: PathBuf,

    /// Rendered device description (YAML)
    #[arg(long)]
    device: PathBuf,

    /// Dispatcher config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Support-script source tree
    #[arg(long)]
    test_shell_dir: Option<PathBuf>,

    /// Output directory, overriding the job's own
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    job_id: u64,

    /// Name this job uses towards its multinode peers
    #[arg(long)]
    client_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    job: JobArgs,

    /// JSON object of protocol name to device assignment, applied after
    /// validation
    #[arg(long)]
    assignment: Option<PathBuf>,

    /// Keep the private overlay directories after the run
    #[arg(long, default_value_t = false)]
    keep_overlay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "hilrun={level},hilrun_pipeline={level},hilrun_overlay={level},hilrun_protocols={level}",
        level = default_level
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    let code = match cli.command {
        Commands::Validate(args) => validate(args)?,
        Commands::Run(args) => run(args).await?,
    };
    std::process::exit(code);
}

fn prepare(args: &JobArgs) -> Result<JobRunner> {
    let config = DispatcherConfig::load(&ConfigOverrides {
        config: args.config.clone(),
        test_shell_dir: args.test_shell_dir.clone(),
    })?;

    let mut definition = JobDefinition::from_file(&args.job)
        .wrap_err_with(|| format!("Failed to load job {}", args.job.display()))?;
    if let Some(dir) = &args.output_dir {
        definition.output_dir = Some(dir.clone());
    }
    let device = DeviceDescription::from_file(&args.device)
        .wrap_err_with(|| format!("Failed to load device {}", args.device.display()))?;

    let client_name = args
        .client_name
        .clone()
        .or_else(|| device.hostname.clone())
        .unwrap_or_else(|| format!("job-{}", args.job_id));
    let protocols = protocols_for_job(&definition, &client_name, config.coordinator())?;
    debug!(client = %client_name, protocols = protocols.len(), "protocols ready");

    let job = Job::new(args.job_id, definition, device).with_protocols(protocols);
    let pipeline = build_pipeline(&job, Arc::new(config.overlay_settings()))?;
    let mut ctx = JobContext::new(job);
    if let Some(tmp) = &config.tmp_dir {
        ctx = ctx.with_tmp_root(tmp);
    }
    Ok(JobRunner::new(pipeline, ctx))
}

fn print_tree(pipeline: &Pipeline) {
    for line in pipeline.describe() {
        let indent = "  ".repeat(line.level.depth().saturating_sub(1));
        println!("{}{} {}: {}", indent, line.level, line.name, line.summary);
    }
}

/// Validate and print the tree; `false` when the job is invalid
fn validate_and_report(runner: &mut JobRunner) -> Result<bool> {
    let report = runner.validate()?;
    print_tree(runner.pipeline());
    if report.is_valid() {
        println!("job is valid");
        return Ok(true);
    }
    println!("{}", report);
    eprintln!("job is invalid: {}", ErrorClass::Validation.hint());
    Ok(false)
}

fn validate(args: JobArgs) -> Result<i32> {
    let mut runner = prepare(&args)?;
    Ok(if validate_and_report(&mut runner)? { 0 } else { 1 })
}

async fn run(args: RunArgs) -> Result<i32> {
    let mut runner = prepare(&args.job)?;
    if !validate_and_report(&mut runner)? {
        return Ok(1);
    }

    if let Some(path) = &args.assignment {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read assignment {}", path.display()))?;
        let assignments: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)
            .wrap_err_with(|| format!("Invalid assignment {}", path.display()))?;
        for (protocol, assignment) in assignments {
            info!(protocol = %protocol, "applying device assignment");
            runner.assign_protocol(&protocol, assignment)?;
        }
    }

    if let Err(e) = runner.run(None).await {
        eprintln!("{}", e);
        eprintln!("{} error: {}", e.class(), e.class().hint());
        return Ok(1);
    }

    let mut ctx = runner.into_context();
    let mut namespaces: Vec<String> = Vec::new();
    for deploy in ctx.job.definition.deployments() {
        let namespace = deploy
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if !namespaces.contains(&namespace) {
            namespaces.push(namespace);
        }
    }
    for namespace in &namespaces {
        if let Some(archive) = ctx.store.get(namespace, COMPRESSED_OVERLAY) {
            println!("[{}] overlay: {}", namespace, archive.display());
        }
        if let (Some(server), Some(root)) = (
            ctx.store.get(namespace, NFS_SERVER),
            ctx.store.get(namespace, NFS_ROOT),
        ) {
            println!("[{}] persistent nfs: {}:{}", namespace, server, root);
        }
    }
    if args.keep_overlay {
        for dir in ctx.persist_scratch() {
            warn!(path = %dir.display(), "overlay directory kept");
        }
    }
    Ok(0)
}
