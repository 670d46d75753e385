use std::sync::Arc;
use std::time::Duration;

use mrbench_core::bench::{format_progress_line, BenchmarkOutcome, ProgressEvent, ProgressSink};
use mrbench_core::storage::{ArtifactStore, JobStatus};
use mrbench_core::{BenchOptions, BenchmarkSuite, Orchestrator};

use super::print_json;
use crate::cli::args::BenchArgs;
use crate::cli::context::{cancel_on_ctrl_c, Context};
use crate::exit_codes::for_run_status;

pub async fn run(ctx: &Context, args: BenchArgs) -> anyhow::Result<i32> {
    let suite = BenchmarkSuite::load(&args.suite)?;
    let registry = ctx.registry();
    let store = ctx.open_store()?;

    let mut options = BenchOptions::from_config(&ctx.config);
    options.providers = args.providers.clone();
    options.models.extend(args.models.iter().cloned());
    options.store_prompts |= args.store_prompts;
    if let Some(secs) = args.timeout {
        options.timeout = Duration::from_secs(secs);
    }

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| ctx.config.general.output_dir.clone());
    let progress: ProgressSink =
        Arc::new(|ev: ProgressEvent| eprintln!("{}", format_progress_line(&ev)));
    let suite_path = args.suite.display().to_string();

    let outcome = Orchestrator::new(&registry, &store, &ctx.config)
        .with_artifacts(ArtifactStore::new(output_dir))
        .with_cancel(cancel_on_ctrl_c())
        .with_progress(progress)
        .run_suite(&suite, Some(&suite_path), &options)
        .await?;

    if args.json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }
    Ok(for_run_status(outcome.status))
}

fn print_outcome(outcome: &BenchmarkOutcome) {
    println!("run {} {}", outcome.run_id, outcome.status.as_str());
    println!(
        "  jobs: {} completed, {} failed, {} timeout",
        outcome.count(JobStatus::Completed),
        outcome.count(JobStatus::Failed),
        outcome.count(JobStatus::Timeout)
    );
    for job in outcome.jobs.iter().filter(|j| j.status != JobStatus::Completed) {
        println!(
            "  {} {}/{} {}: {}",
            job.prompt_id,
            job.provider,
            job.model,
            job.status.as_str(),
            job.error.as_deref().unwrap_or("-")
        );
    }
    if let Some(dir) = &outcome.run_dir {
        println!("  artifacts: {}", dir.display());
    }
    println!("  report: mrbench report {}", outcome.run_id);
}
