// src/lib.rs

pub mod actions;
pub mod cache;
pub mod cli;
pub mod config;
pub mod definition;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod expr;
pub mod logging;
pub mod registry;
pub mod service;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ServiceConfig, default_config_path, load_and_validate, load_job};
use crate::definition::JobDefinition;
use crate::engine::{JobOptions, JobOutcome};
use crate::service::{LOCAL_MACHINE, StaxService};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - service configuration loading
/// - job document loading and validation
/// - the service (timed event queue, job runner, local backends)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_service_config(args.config.as_deref())?;
    let job_path = PathBuf::from(&args.job);

    if args.dry_run {
        let definition = load_job(&job_path, LOCAL_MACHINE)?;
        print_dry_run(&definition, &config);
        return Ok(());
    }

    let service = StaxService::new(config);
    let definition = service.load_definition(&job_path)?;
    let options = JobOptions {
        name: None,
        function: args.function.clone(),
        args: args.args.clone(),
        max_threads: args.max_threads,
        breakpoints: args.breakpoints.then_some(true),
    };
    let submitted = service.submit(definition, options);
    let job = submitted.id();

    // Ctrl-C → terminate the job's main block.
    {
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!(job, "interrupted; terminating job");
            if let Err(err) = service.terminate_job(job).await {
                debug!(job, error = %err, "terminate after Ctrl-C failed");
            }
        });
    }

    let outcome = submitted.wait().await?;
    print_summary(&outcome);

    if !outcome.status.is_normal() {
        bail!("job {} ({}) ended {}", outcome.job, outcome.name, outcome.status);
    }
    Ok(())
}

/// An explicit `--config` must exist; the default path is optional.
fn load_service_config(path: Option<&str>) -> Result<ServiceConfig> {
    match path {
        Some(path) => Ok(load_and_validate(path)?),
        None => {
            let path = default_config_path();
            if Path::new(&path).exists() {
                info!(config = %path.display(), "using default service configuration file");
                Ok(load_and_validate(&path)?)
            } else {
                Ok(ServiceConfig::default())
            }
        }
    }
}

fn print_summary(outcome: &JobOutcome) {
    let elapsed = outcome.ended - outcome.started;
    println!("job {} ({})", outcome.job, outcome.name);
    println!("  status: {}", outcome.status);
    println!("  result: {}", outcome.result);
    println!("  elapsed: {}ms", elapsed.num_milliseconds());

    if !outcome.testcases.is_empty() {
        println!();
        println!("testcases ({}):", outcome.testcases.len());
        for tc in &outcome.testcases {
            let status = tc
                .last_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string());
            println!(
                "  - {}: passes={} fails={} last={} elapsed={}ms",
                tc.name,
                tc.passes,
                tc.fails,
                status,
                tc.elapsed.as_millis()
            );
        }
    }
}

/// Simple dry-run output: print the job's functions and settings.
fn print_dry_run(definition: &JobDefinition, config: &ServiceConfig) {
    println!("stax dry-run");
    println!("  job: {}", definition.name);
    println!("  file: {}", definition.file.display());
    println!("  start function: {}", definition.start_function);
    if let Some(args) = &definition.start_args {
        println!("  start args: {args}");
    }
    println!(
        "  max threads: {}",
        definition.max_threads.unwrap_or(config.config.max_stax_threads)
    );
    println!("  defaults: {}", definition.defaults.len());
    println!();

    println!("functions ({}):", definition.functions.len());
    for (name, function) in &definition.functions {
        println!("  - {name} ({:?} scope)", function.scope);
        if let Some(prolog) = &function.prolog {
            println!("      {prolog}");
        }
        for arg in &function.args {
            let mut line = format!("      arg {}", arg.name);
            if arg.required {
                line.push_str(" (required)");
            }
            if let Some(default) = &arg.default {
                line.push_str(&format!(" = {default}"));
            }
            println!("{line}");
        }
        println!("      body: {}", function.body.summary());
    }

    debug!("dry-run complete (no execution)");
}
