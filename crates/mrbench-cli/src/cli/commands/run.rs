use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use mrbench_core::storage::JobStatus;
use mrbench_core::{BenchOptions, Orchestrator, Router};
use serde_json::json;

use super::print_json;
use crate::cli::args::RunArgs;
use crate::cli::context::{cancel_on_ctrl_c, Context};
use crate::exit_codes::for_run_status;

pub async fn run(ctx: &Context, args: RunArgs) -> anyhow::Result<i32> {
    let prompt = read_prompt(args.prompt.as_deref())?;
    let registry = ctx.registry();
    let store = ctx.open_store()?;

    let (provider, model) = match &args.provider {
        Some(provider) => (provider.clone(), args.model.clone()),
        None => {
            let detections = registry.detect_all().await;
            let policy = args.policy.unwrap_or(ctx.config.routing.default_policy);
            let decision = Router::from_config(&registry, &ctx.config)
                .with_history(&store)
                .route(
                    &detections,
                    policy,
                    &ctx.config.routing.constraints,
                    args.model.as_deref(),
                )
                .await?;
            (decision.provider, Some(decision.model))
        }
    };

    let mut options = BenchOptions::from_config(&ctx.config);
    options.store_prompts |= args.store_prompts;
    if let Some(secs) = args.timeout {
        options.timeout = Duration::from_secs(secs);
    }
    let streamed = Arc::new(AtomicBool::new(false));
    if args.stream {
        options.stream = true;
        if !args.json {
            let seen = streamed.clone();
            options.on_chunk = Some(Arc::new(move |chunk: &str| {
                seen.store(true, Ordering::Relaxed);
                println!("{chunk}");
            }));
        }
    }

    let outcome = Orchestrator::new(&registry, &store, &ctx.config)
        .with_cancel(cancel_on_ctrl_c())
        .run_single(&prompt, &provider, model.as_deref(), &options)
        .await?;

    let Some(job) = outcome.jobs.first() else {
        eprintln!("run {} {}", outcome.run_id, outcome.status.as_str());
        return Ok(for_run_status(outcome.status));
    };

    if args.json {
        print_json(&json!({
            "run_id": outcome.run_id,
            "status": outcome.status,
            "job": job,
            "output": job.output,
        }))?;
    } else {
        if !streamed.load(Ordering::Relaxed) && !job.output.is_empty() {
            println!("{}", job.output);
        }
        if job.status != JobStatus::Completed {
            eprintln!(
                "{}/{} {}: {}",
                job.provider,
                job.model,
                job.status.as_str(),
                job.error.as_deref().unwrap_or("no error reported")
            );
        }
    }
    Ok(for_run_status(outcome.status))
}

/// Reads the prompt file, or stdin without one. Trailing line breaks are dropped.
fn read_prompt(path: Option<&Path>) -> anyhow::Result<String> {
    let raw = match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("failed to read prompt file {}", p.display()))?,
        None => std::io::read_to_string(std::io::stdin()).context("failed to read prompt from stdin")?,
    };
    let prompt = raw.trim_end_matches(['\r', '\n']);
    if prompt.trim().is_empty() {
        anyhow::bail!("prompt is empty");
    }
    Ok(prompt.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_file_loses_trailing_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.txt");
        std::fs::write(&path, "line one\nline two\n\n").unwrap();
        assert_eq!(read_prompt(Some(&path)).unwrap(), "line one\nline two");
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.txt");
        std::fs::write(&path, "  \n").unwrap();
        assert!(read_prompt(Some(&path)).is_err());
        assert!(read_prompt(Some(&dir.path().join("missing.txt"))).is_err());
    }
}
