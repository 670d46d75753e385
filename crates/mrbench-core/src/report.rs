//! Per-run aggregates over stored jobs and metrics. Rendering belongs to the caller.

use serde::Serialize;

use crate::error::Result;
use crate::routing::WALL_TIME_METRIC;
use crate::storage::{JobStatus, RunRow, Store};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub provider: String,
    pub model: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    /// `completed / total`, 0.0 for an empty group.
    pub success_rate: f64,
    /// Wall time and TTFT aggregate completed jobs only.
    pub mean_wall_time_ms: Option<f64>,
    pub min_wall_time_ms: Option<f64>,
    pub max_wall_time_ms: Option<f64>,
    pub mean_ttft_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobLine {
    pub job_id: String,
    pub provider: String,
    pub model: String,
    pub status: JobStatus,
    pub wall_time_ms: Option<f64>,
    pub ttft_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run: RunRow,
    /// One entry per (provider, model), in first-seen job order.
    pub providers: Vec<ProviderStats>,
    pub jobs: Vec<JobLine>,
}

impl RunSummary {
    /// `None` when the run does not exist.
    pub fn load(store: &Store, run_id: &str) -> Result<Option<Self>> {
        let Some(run) = store.get_run(run_id)? else {
            return Ok(None);
        };

        let mut jobs = Vec::new();
        for job in store.jobs_for_run(run_id)? {
            let metrics = store.metrics_for_job(&job.id)?;
            let metric = |name: &str| metrics.iter().find(|m| m.name == name).map(|m| m.value);
            jobs.push(JobLine {
                wall_time_ms: metric(WALL_TIME_METRIC),
                ttft_ms: metric("ttft_ms"),
                job_id: job.id,
                provider: job.provider,
                model: job.model,
                status: job.status,
                error: job.error_message,
            });
        }

        let mut groups: Vec<(String, String)> = Vec::new();
        for j in &jobs {
            let key = (j.provider.clone(), j.model.clone());
            if !groups.contains(&key) {
                groups.push(key);
            }
        }
        let providers = groups
            .into_iter()
            .map(|(provider, model)| {
                let members: Vec<&JobLine> = jobs
                    .iter()
                    .filter(|j| j.provider == provider && j.model == model)
                    .collect();
                stats(provider, model, &members)
            })
            .collect();

        Ok(Some(Self {
            run,
            providers,
            jobs,
        }))
    }
}

fn stats(provider: String, model: String, jobs: &[&JobLine]) -> ProviderStats {
    let count = |s: JobStatus| jobs.iter().filter(|j| j.status == s).count();
    let completed: Vec<&&JobLine> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .collect();
    let walls: Vec<f64> = completed.iter().filter_map(|j| j.wall_time_ms).collect();
    let ttfts: Vec<f64> = completed.iter().filter_map(|j| j.ttft_ms).collect();

    let total = jobs.len();
    ProviderStats {
        provider,
        model,
        total,
        completed: completed.len(),
        failed: count(JobStatus::Failed),
        timeout: count(JobStatus::Timeout),
        success_rate: if total == 0 {
            0.0
        } else {
            completed.len() as f64 / total as f64
        },
        mean_wall_time_ms: mean(&walls),
        min_wall_time_ms: walls.iter().copied().reduce(f64::min),
        max_wall_time_ms: walls.iter().copied().reduce(f64::max),
        mean_ttft_ms: mean(&ttfts),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
