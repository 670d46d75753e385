//! Sequential benchmark execution: one job per (prompt, provider) pair, suite order first.
//!
//! Pre-flight failures (`UnknownProvider`, `NoEligibleProvider`, an invalid suite) return before
//! any run row exists. Once a run is created every job failure is recorded and execution moves
//! on. Cancellation is checked between jobs and inside the in-flight adapter call.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::progress::{ProgressEvent, ProgressSink};
use super::suite::{BenchmarkSuite, SuitePrompt};
use crate::adapters::{
    estimate_tokens, resolve_model, AdapterCapabilities, AdapterRegistry, ChunkSink, RunOptions,
    RunResult,
};
use crate::config::MrbenchConfig;
use crate::error::{MrbenchError, Result};
use crate::redaction::redact;
use crate::routing::{COST_METRIC, WALL_TIME_METRIC};
use crate::storage::{
    hash_prompt, now_rfc3339, ArtifactStore, JobArtifact, JobOutcome, JobStatus, NewJob,
    NewMetric, RunMeta, RunStatus, Store,
};

const PREVIEW_CHARS: usize = 100;

#[derive(Clone)]
pub struct BenchOptions {
    /// Provider names in execution order. Empty means every detected provider.
    pub providers: Vec<String>,
    /// Per-provider model overrides.
    pub models: BTreeMap<String, String>,
    /// Persist a redacted prompt preview and the raw prompt file.
    pub store_prompts: bool,
    pub stream: bool,
    pub timeout: Duration,
    pub on_chunk: Option<ChunkSink>,
}

impl BenchOptions {
    pub fn from_config(config: &MrbenchConfig) -> Self {
        Self {
            providers: Vec::new(),
            models: BTreeMap::new(),
            store_prompts: config.general.store_prompts,
            stream: false,
            timeout: config.timeout(),
            on_chunk: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub prompt_id: String,
    pub provider: String,
    pub model: String,
    pub status: JobStatus,
    pub exit_code: i32,
    pub wall_time_ms: f64,
    pub ttft_ms: Option<f64>,
    /// Redacted.
    pub error: Option<String>,
    pub cancelled: bool,
    /// Backend output as returned; never persisted unredacted.
    #[serde(skip)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub jobs: Vec<JobSummary>,
    pub run_dir: Option<PathBuf>,
}

impl BenchmarkOutcome {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

#[derive(Debug, Clone)]
struct Target {
    provider: String,
    model: String,
}

/// `timeout` when the executor timed out, `completed` on a clean zero exit, `failed` otherwise.
pub fn classify(result: &RunResult) -> JobStatus {
    if result.timed_out {
        JobStatus::Timeout
    } else if result.success() {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    }
}

pub struct Orchestrator<'a> {
    registry: &'a AdapterRegistry,
    store: &'a Store,
    config: &'a MrbenchConfig,
    artifacts: Option<ArtifactStore>,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a AdapterRegistry, store: &'a Store, config: &'a MrbenchConfig) -> Self {
        Self {
            registry,
            store,
            config,
            artifacts: None,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// One prompt against one provider, recorded as a single-job run.
    pub async fn run_single(
        &self,
        prompt: &str,
        provider: &str,
        model: Option<&str>,
        options: &BenchOptions,
    ) -> Result<BenchmarkOutcome> {
        let mut options = options.clone();
        options.providers = vec![provider.to_string()];
        if let Some(model) = model {
            options.models.insert(provider.to_string(), model.to_string());
        }
        self.run_suite(&BenchmarkSuite::single(prompt), None, &options)
            .await
    }

    pub async fn run_suite(
        &self,
        suite: &BenchmarkSuite,
        suite_path: Option<&str>,
        options: &BenchOptions,
    ) -> Result<BenchmarkOutcome> {
        suite.validate()?;
        let targets = self.resolve_targets(options).await?;

        if self.config.general.parallelism > 1 {
            tracing::info!(
                parallelism = self.config.general.parallelism,
                "parallel job execution is not available; running sequentially"
            );
        }

        let snapshot = self.config.snapshot_json()?;
        let run = self.store.create_run(suite_path, Some(&snapshot))?;
        tracing::info!(
            run_id = %run.id,
            suite = %suite.name,
            jobs = suite.len() * targets.len(),
            "benchmark started"
        );

        let (jobs, status) = match self.execute(&run.id, suite, &targets, options).await {
            Ok(done) => done,
            Err(e) => {
                if let Err(finish) = self.store.finish_run(&run.id, RunStatus::Failed) {
                    tracing::warn!(run_id = %run.id, error = %finish, "could not mark run failed");
                }
                return Err(e);
            }
        };
        self.store.finish_run(&run.id, status)?;

        if let Some(artifacts) = &self.artifacts {
            let meta = RunMeta {
                run_id: run.id.clone(),
                suite: Some(suite.name.clone()),
                suite_path: suite_path.map(str::to_string),
                status,
                started_at: run.created_at.clone(),
                completed_at: Some(now_rfc3339()),
                providers: targets.iter().map(|t| t.provider.clone()).collect(),
                job_count: jobs.len(),
            };
            if let Err(e) = artifacts.write_run_meta(&meta) {
                tracing::warn!(run_id = %run.id, error = %e, "failed to write run metadata");
            }
        }

        tracing::info!(run_id = %run.id, status = status.as_str(), jobs = jobs.len(), "benchmark finished");
        Ok(BenchmarkOutcome {
            run_dir: self.artifacts.as_ref().map(|a| a.run_dir(&run.id)),
            run_id: run.id,
            status,
            jobs,
        })
    }

    async fn resolve_targets(&self, options: &BenchOptions) -> Result<Vec<Target>> {
        let names = if options.providers.is_empty() {
            let available = self.registry.available().await;
            if available.is_empty() {
                return Err(MrbenchError::NoEligibleProvider {
                    detail: "no providers detected".to_string(),
                });
            }
            available
        } else {
            let mut names: Vec<String> = Vec::with_capacity(options.providers.len());
            for name in &options.providers {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            names
        };

        // Every name is checked before any model listing runs.
        for name in &names {
            self.registry.require(name)?;
        }

        let mut targets = Vec::with_capacity(names.len());
        for provider in names {
            let adapter = self.registry.require(&provider)?;
            let model = resolve_model(
                adapter,
                options.models.get(&provider).map(String::as_str),
                self.config.default_model(&provider),
            )
            .await;
            targets.push(Target { provider, model });
        }
        Ok(targets)
    }

    async fn execute(
        &self,
        run_id: &str,
        suite: &BenchmarkSuite,
        targets: &[Target],
        options: &BenchOptions,
    ) -> Result<(Vec<JobSummary>, RunStatus)> {
        let total = suite.len() * targets.len();
        let mut jobs = Vec::with_capacity(total);
        let mut cancelled = false;

        'prompts: for prompt in &suite.prompts {
            for target in targets {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'prompts;
                }
                let job = self.run_job(run_id, prompt, target, options).await?;
                if let Some(sink) = &self.progress {
                    sink(ProgressEvent {
                        done: jobs.len() + 1,
                        total,
                        provider: job.provider.clone(),
                        prompt_id: job.prompt_id.clone(),
                        status: job.status,
                    });
                }
                let interrupted = job.cancelled;
                jobs.push(job);
                if interrupted {
                    cancelled = true;
                    break 'prompts;
                }
            }
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if jobs.iter().all(|j| j.status == JobStatus::Completed) {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        Ok((jobs, status))
    }

    async fn run_job(
        &self,
        run_id: &str,
        prompt: &SuitePrompt,
        target: &Target,
        options: &BenchOptions,
    ) -> Result<JobSummary> {
        let adapter = self.registry.require(&target.provider)?;
        let store_prompts = options.store_prompts;
        let job = self.store.create_job(&NewJob {
            run_id: run_id.to_string(),
            provider: target.provider.clone(),
            model: target.model.clone(),
            prompt_hash: hash_prompt(&prompt.text),
            prompt_preview: store_prompts.then(|| redact(&preview(&prompt.text))),
            prompt_stored: store_prompts && self.artifacts.is_some(),
        })?;

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            provider = %target.provider,
            model = %target.model,
            prompt_id = %prompt.id
        );

        async move {
            self.store.start_job(&job.id)?;

            let caps = adapter.capabilities();
            let mut run_options = RunOptions::default()
                .with_timeout(options.timeout)
                .with_cancel(self.cancel.clone());
            if options.stream && caps.streaming {
                run_options = run_options.streaming(options.on_chunk.clone());
            }

            let result = adapter.run(&prompt.text, &target.model, &run_options).await;
            let status = classify(&result);
            let error = job_error(&result, status).map(|e| redact(&e));
            let metrics = job_metrics(&result, status, &prompt.text, &caps);

            self.store.finish_job(
                &job.id,
                &JobOutcome {
                    status,
                    exit_code: Some(result.exit_code),
                    error_message: error.clone(),
                },
                &metrics,
            )?;

            if status == JobStatus::Completed {
                tracing::info!(wall_time_ms = result.wall_time_ms, "job completed");
            } else {
                tracing::warn!(
                    status = status.as_str(),
                    error = error.as_deref().unwrap_or_default(),
                    "job did not complete"
                );
            }

            let summary = JobSummary {
                job_id: job.id.clone(),
                prompt_id: prompt.id.clone(),
                provider: target.provider.clone(),
                model: target.model.clone(),
                status,
                exit_code: result.exit_code,
                wall_time_ms: result.wall_time_ms,
                ttft_ms: result.ttft_ms,
                error,
                cancelled: result.cancelled,
                output: result.output,
            };
            self.write_job_artifacts(run_id, &summary, &prompt.text, store_prompts);
            Ok::<_, MrbenchError>(summary)
        }
        .instrument(span)
        .await
    }

    /// Artifact failures are logged; the job row is already final.
    fn write_job_artifacts(
        &self,
        run_id: &str,
        summary: &JobSummary,
        prompt: &str,
        store_prompts: bool,
    ) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };
        let artifact = JobArtifact {
            job_id: summary.job_id.clone(),
            prompt_id: summary.prompt_id.clone(),
            provider: summary.provider.clone(),
            model: summary.model.clone(),
            status: summary.status,
            exit_code: summary.exit_code,
            wall_time_ms: summary.wall_time_ms,
            ttft_ms: summary.ttft_ms,
            output_length: summary.output.chars().count(),
            output: redact(&summary.output),
            error: summary.error.clone(),
        };
        if let Err(e) = artifacts.write_job(run_id, &artifact) {
            tracing::warn!(error = %e, "failed to write job artifact");
        }
        if store_prompts {
            if let Err(e) = artifacts.write_prompt(run_id, &summary.job_id, prompt) {
                tracing::warn!(error = %e, "failed to write prompt file");
            }
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn job_error(result: &RunResult, status: JobStatus) -> Option<String> {
    match status {
        JobStatus::Completed => None,
        _ if result.cancelled => Some("cancelled".to_string()),
        _ => Some(result.error.clone().unwrap_or_else(|| {
            MrbenchError::SubprocessFailure {
                exit_code: result.exit_code,
                detail: String::new(),
            }
            .to_string()
        })),
    }
}

/// Wall time always, TTFT when measured; token counts and cost only for completed jobs.
fn job_metrics(
    result: &RunResult,
    status: JobStatus,
    prompt: &str,
    caps: &AdapterCapabilities,
) -> Vec<NewMetric> {
    let mut metrics = vec![NewMetric::measured(WALL_TIME_METRIC, result.wall_time_ms, "ms")];
    if let Some(ttft) = result.ttft_ms {
        metrics.push(NewMetric::measured("ttft_ms", ttft, "ms"));
    }
    if status != JobStatus::Completed {
        return metrics;
    }

    let (input, output, estimated) = match (result.input_tokens, result.output_tokens) {
        (Some(i), Some(o)) => (i, o, result.tokens_estimated),
        (i, o) => (
            i.unwrap_or_else(|| estimate_tokens(prompt)),
            o.unwrap_or_else(|| estimate_tokens(&result.output)),
            true,
        ),
    };
    let tokens = |name: &str, value: u64| {
        if estimated {
            NewMetric::estimated(name, value as f64, "tokens")
        } else {
            NewMetric::measured(name, value as f64, "tokens")
        }
    };
    metrics.push(tokens("input_tokens", input));
    metrics.push(tokens("output_tokens", output));

    if let Some(cost) = caps.estimate_cost(input, output) {
        metrics.push(NewMetric::estimated(COST_METRIC, cost, "usd"));
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FakeAdapter;
    use std::sync::{Arc, Mutex};

    fn registry() -> AdapterRegistry {
        let mut reg = AdapterRegistry::new();
        reg.register(FakeAdapter);
        reg
    }

    fn store() -> Store {
        let s = Store::memory().unwrap();
        s.init_schema().unwrap();
        s
    }

    fn suite(n: usize) -> BenchmarkSuite {
        let prompts: String = (0..n)
            .map(|i| format!("  - text: \"prompt number {i}\"\n"))
            .collect();
        BenchmarkSuite::parse(&format!("name: t\nprompts:\n{prompts}"), "t").unwrap()
    }

    fn options(model: &str) -> BenchOptions {
        let mut o = BenchOptions::from_config(&MrbenchConfig::default());
        o.providers = vec!["fake".into()];
        o.models.insert("fake".into(), model.into());
        o
    }

    #[tokio::test]
    async fn two_prompts_make_one_run_with_two_completed_jobs() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let orch = Orchestrator::new(&reg, &store, &cfg);
        let out = orch
            .run_suite(&suite(2), Some("suite.yaml"), &options("fake-fast"))
            .await
            .unwrap();

        assert_eq!(out.status, RunStatus::Completed);
        assert_eq!(out.jobs.len(), 2);
        assert_eq!(out.jobs[0].prompt_id, "prompt_0");
        assert_eq!(out.jobs[1].prompt_id, "prompt_1");

        let runs = store.list_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].suite_path.as_deref(), Some("suite.yaml"));
        assert!(runs[0].config_snapshot.is_some());

        let jobs = store.jobs_for_run(&out.run_id).unwrap();
        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            assert_eq!(job.status, JobStatus::Completed);
            assert!(job.prompt_preview.is_none());
            let metrics = store.metrics_for_job(&job.id).unwrap();
            let names: Vec<_> = metrics.iter().map(|m| m.name.as_str()).collect();
            assert!(names.contains(&"wall_time_ms"));
            assert!(names.contains(&"output_tokens"));
            assert!(names.contains(&"cost_usd"));
            let tokens = metrics.iter().find(|m| m.name == "input_tokens").unwrap();
            assert!(tokens.is_estimated);
        }
    }

    #[tokio::test]
    async fn error_model_fails_job_and_run_but_continues() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let out = Orchestrator::new(&reg, &store, &cfg)
            .run_suite(&suite(2), None, &options("fake-error"))
            .await
            .unwrap();
        assert_eq!(out.status, RunStatus::Failed);
        assert_eq!(out.count(JobStatus::Failed), 2);
        let job = store.get_job(&out.jobs[0].job_id).unwrap().unwrap();
        assert_eq!(job.exit_code, Some(1));
        assert!(!job.error_message.unwrap().is_empty());
        let names: Vec<_> = store
            .metrics_for_job(&job.id)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["wall_time_ms".to_string()]);
    }

    #[tokio::test]
    async fn slow_model_past_timeout_is_timeout_status() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let mut opts = options("fake-slow");
        opts.timeout = Duration::from_millis(20);
        let out = Orchestrator::new(&reg, &store, &cfg)
            .run_suite(&suite(1), None, &opts)
            .await
            .unwrap();
        assert_eq!(out.jobs[0].status, JobStatus::Timeout);
        assert_eq!(out.status, RunStatus::Failed);
        let job = store.get_job(&out.jobs[0].job_id).unwrap().unwrap();
        assert!(job.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_provider_creates_no_run() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let mut opts = options("fake-fast");
        opts.providers = vec!["fake".into(), "nope".into()];
        let err = Orchestrator::new(&reg, &store, &cfg)
            .run_suite(&suite(1), None, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, MrbenchError::UnknownProvider { .. }));
        assert!(store.list_runs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_detected_is_no_eligible_provider() {
        let (reg, store, cfg) = (AdapterRegistry::new(), store(), MrbenchConfig::default());
        let opts = BenchOptions::from_config(&cfg);
        let err = Orchestrator::new(&reg, &store, &cfg)
            .run_suite(&suite(1), None, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, MrbenchError::NoEligibleProvider { .. }));
        assert!(store.list_runs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_provider_list_uses_detected() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let opts = BenchOptions::from_config(&cfg);
        let out = Orchestrator::new(&reg, &store, &cfg)
            .run_suite(&suite(1), None, &opts)
            .await
            .unwrap();
        assert_eq!(out.jobs[0].provider, "fake");
        assert_eq!(out.jobs[0].model, "fake-fast");
    }

    #[tokio::test]
    async fn cancel_between_jobs_leaves_rest_uncreated() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let token = CancellationToken::new();
        let trip = token.clone();
        let out = Orchestrator::new(&reg, &store, &cfg)
            .with_cancel(token)
            .with_progress(Arc::new(move |ev: ProgressEvent| {
                if ev.done == 1 {
                    trip.cancel();
                }
            }))
            .run_suite(&suite(3), None, &options("fake-fast"))
            .await
            .unwrap();
        assert_eq!(out.status, RunStatus::Cancelled);
        assert_eq!(out.jobs.len(), 1);
        assert_eq!(store.jobs_for_run(&out.run_id).unwrap().len(), 1);
        let run = store.get_run(&out.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_in_flight_fails_the_job() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let token = CancellationToken::new();
        let trip = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trip.cancel();
        });
        let out = Orchestrator::new(&reg, &store, &cfg)
            .with_cancel(token)
            .run_suite(&suite(2), None, &options("fake-slow"))
            .await
            .unwrap();
        assert_eq!(out.status, RunStatus::Cancelled);
        assert_eq!(out.jobs.len(), 1);
        assert_eq!(out.jobs[0].status, JobStatus::Failed);
        assert_eq!(out.jobs[0].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn prompts_and_outputs_are_redacted_in_storage_and_artifacts() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let secret = "sk-ant-REDACTED";
        let mut opts = options("fake-fast");
        opts.store_prompts = true;

        let out = Orchestrator::new(&reg, &store, &cfg)
            .with_artifacts(ArtifactStore::new(dir.path()))
            .run_single(&format!("use {secret}"), "fake", None, &opts)
            .await
            .unwrap();
        let job = store.get_job(&out.jobs[0].job_id).unwrap().unwrap();
        let preview = job.prompt_preview.unwrap();
        assert!(preview.contains("[REDACTED]"));
        assert!(!preview.contains(secret));
        assert!(job.prompt_stored);

        let jobs_dir = dir.path().join(&out.run_id).join("jobs");
        let artifact = std::fs::read_to_string(jobs_dir.join(format!("{}.json", job.id))).unwrap();
        assert!(!artifact.contains(secret));
        let raw = std::fs::read_to_string(jobs_dir.join(format!("{}.prompt.txt", job.id))).unwrap();
        assert!(raw.contains(secret));
        assert!(dir.path().join(&out.run_id).join("run_meta.json").exists());
    }

    #[tokio::test]
    async fn prompt_file_absent_without_opt_in() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let out = Orchestrator::new(&reg, &store, &cfg)
            .with_artifacts(ArtifactStore::new(dir.path()))
            .run_single("hi", "fake", None, &options("fake-fast"))
            .await
            .unwrap();
        let jobs_dir = dir.path().join(&out.run_id).join("jobs");
        let files: Vec<_> = std::fs::read_dir(jobs_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec![format!("{}.json", out.jobs[0].job_id)]);
    }

    #[tokio::test]
    async fn streaming_forwards_chunks() {
        let (reg, store, cfg) = (registry(), store(), MrbenchConfig::default());
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        let mut opts = options("fake-stream");
        opts.stream = true;
        opts.on_chunk = Some(Arc::new(move |c: &str| sink.lock().unwrap().push(c.to_string())));
        let out = Orchestrator::new(&reg, &store, &cfg)
            .run_single("one two", "fake", None, &opts)
            .await
            .unwrap();
        assert!(seen.lock().unwrap().len() > 1);
        let metrics = store.metrics_for_job(&out.jobs[0].job_id).unwrap();
        assert!(metrics.iter().any(|m| m.name == "ttft_ms"));
    }

    #[test]
    fn classification() {
        let timed_out = RunResult {
            timed_out: true,
            exit_code: 124,
            ..Default::default()
        };
        assert_eq!(classify(&timed_out), JobStatus::Timeout);
        assert_eq!(classify(&RunResult::default()), JobStatus::Completed);
        let reported = RunResult {
            error: Some("bad".into()),
            ..Default::default()
        };
        assert_eq!(classify(&reported), JobStatus::Failed);
    }
}
