use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use futures::future::join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use labelq::config::Config;
use labelq::id::{derive_job_id, now_ms};
use labelq::renderer::LabelaryRenderer;
use labelq::scheduler::{JobHandle, JobRequest, Plan, Scheduler, classify_plan};
use labelq::storage::open_store;
use labelq::LabelqError;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("labelq")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("labelq.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Render {
            patterns,
            plan,
            user,
            size,
            labels,
            out,
            stats,
        } => {
            let options = RenderOptions {
                plan,
                user,
                size,
                labels: *labels,
                out,
                stats: *stats,
                verbose: cli.is_verbose(),
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(handle_render_command(patterns, &options, config))
        }
        Commands::Config => handle_config_command(config),
        Commands::Classify { plan } => handle_classify_command(plan),
    }
}

struct RenderOptions<'a> {
    plan: &'a str,
    user: &'a str,
    size: &'a str,
    labels: u32,
    out: &'a Path,
    stats: bool,
    verbose: bool,
}

/// Expand glob patterns into a sorted, de-duplicated file list
fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let mut matched = false;
        for entry in glob::glob(pattern).context(format!("Invalid pattern: {}", pattern))? {
            match entry {
                Ok(path) if path.is_file() => {
                    files.push(path);
                    matched = true;
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable path: {}", e),
            }
        }
        if !matched {
            println!("{} no files match {}", "Warning:".yellow(), pattern);
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn output_path(out: &Path, source: &Path, extension: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "label".to_string());
    out.join(format!("{}.{}", stem, extension))
}

/// Input files whose contents map to the same job
#[derive(Debug)]
struct DocumentGroup {
    job_id: String,
    document: String,
    paths: Vec<PathBuf>,
}

/// Group documents by job id, in order of first appearance
fn group_documents(documents: Vec<(PathBuf, String)>, user: &str, size: &str) -> Vec<DocumentGroup> {
    let mut groups: Vec<DocumentGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (path, document) in documents {
        let job_id = derive_job_id(user, size, &document);
        match index.get(&job_id) {
            Some(&i) => groups[i].paths.push(path),
            None => {
                index.insert(job_id.clone(), groups.len());
                groups.push(DocumentGroup {
                    job_id,
                    document,
                    paths: vec![path],
                });
            }
        }
    }
    groups
}

fn describe_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

async fn handle_render_command(patterns: &[String], options: &RenderOptions<'_>, config: &Config) -> Result<()> {
    let started = now_ms();
    let files = expand_patterns(patterns)?;
    if files.is_empty() {
        eyre::bail!("No input files");
    }
    fs::create_dir_all(options.out).context(format!("Failed to create {}", options.out.display()))?;

    let renderer = Arc::new(LabelaryRenderer::new(config.renderer.clone())?);
    let store = open_store(&config.storage)?;
    let scheduler = Scheduler::start(config.scheduler.clone(), renderer, store)?;

    let recovered = if config.storage.recover_on_start {
        scheduler.recover()?
    } else {
        0
    };
    if recovered > 0 {
        println!("{} {} unfinished job(s) from the store", "Recovered".cyan(), recovered);
    }

    let mut documents = Vec::new();
    for path in files {
        let document = fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))?;
        documents.push((path, document));
    }
    let total = documents.len();

    let mut pending: Vec<(Vec<PathBuf>, JobHandle)> = Vec::new();
    for group in group_documents(documents, options.user, options.size) {
        let request = JobRequest::new(&group.job_id, options.user, options.plan, group.document, options.size)
            .with_label_count(options.labels);
        let sources = describe_paths(&group.paths);

        // A live job with the same id was recovered from the store; wait on it
        let (verb, submitted) = match scheduler.submit(request.clone()) {
            Err(LabelqError::DuplicateJob(id)) => match scheduler.attach(&id) {
                Some(handle) => ("Attached", Ok(handle)),
                None => ("Queued", scheduler.submit(request)),
            },
            other => ("Queued", other),
        };
        let handle = submitted.context(format!("Failed to submit {}", sources))?;

        let ack = handle.ack();
        println!(
            "{} {} {} ({}, position {}, ~{}s)",
            verb.cyan(),
            sources,
            ack.job_id.dimmed(),
            ack.priority,
            ack.position,
            ack.estimated_wait_secs
        );
        pending.push((group.paths, handle));
    }

    let results = join_all(
        pending
            .into_iter()
            .map(|(paths, handle)| async move { (paths, handle.wait().await) }),
    )
    .await;

    let extension = config.renderer.format.extension();
    let mut failed = 0;
    for (paths, result) in results {
        match result {
            Ok(output) => {
                for path in &paths {
                    let target = output_path(options.out, path, extension);
                    fs::write(&target, &output.bytes).context(format!("Failed to write {}", target.display()))?;
                    println!("{} {} -> {}", "Rendered".green(), path.display(), target.display());
                }
            }
            Err(failure) => {
                failed += paths.len();
                println!("{} {}: {}", "Failed".red(), describe_paths(&paths), failure);
            }
        }
    }

    // Recovered jobs no file attached to have no waiter; let them drain before stopping
    if recovered > 0 {
        loop {
            let stats = scheduler.stats();
            if stats.total_queued + stats.total_processing == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    if options.stats {
        println!("{}", serde_json::to_string_pretty(&scheduler.stats())?);
    }
    scheduler.shutdown().await;

    if options.verbose {
        println!("Finished {} job(s) in {} ms", total, now_ms().saturating_sub(started));
    }
    if failed > 0 {
        eyre::bail!("{} of {} job(s) failed", failed, total);
    }
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    info!("Printing effective configuration");
    print!("{}", serde_yaml::to_string(config).context("Failed to serialize configuration")?);
    Ok(())
}

fn handle_classify_command(plan: &str) -> Result<()> {
    let priority = classify_plan(plan);
    let normalized: Plan = match plan.parse() {
        Ok(plan) => plan,
        Err(never) => match never {},
    };
    info!("Classified plan {} as {}", normalized, priority);
    println!("{} -> {}", normalized, priority.to_string().bold());
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with the configured level
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
