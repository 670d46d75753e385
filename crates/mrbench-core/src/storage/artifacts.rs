//! Per-run artifact tree:
//!
//! ```text
//! <root>/<run_id>/run_meta.json
//! <root>/<run_id>/jobs/<job_id>.json
//! <root>/<run_id>/jobs/<job_id>.prompt.txt   (prompt storage only)
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::rows::{JobStatus, RunStatus};
use crate::error::Result;

/// Contents of `run_meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub suite: Option<String>,
    pub suite_path: Option<String>,
    pub status: RunStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub providers: Vec<String>,
    pub job_count: usize,
}

/// Contents of `jobs/<job_id>.json`. Text fields are redacted before they get here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifact {
    pub job_id: String,
    pub prompt_id: String,
    pub provider: String,
    pub model: String,
    pub status: JobStatus,
    pub exit_code: i32,
    pub wall_time_ms: f64,
    pub ttft_ms: Option<f64>,
    pub output: String,
    pub output_length: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn jobs_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("jobs")
    }

    pub fn write_run_meta(&self, meta: &RunMeta) -> Result<PathBuf> {
        let path = self.run_dir(&meta.run_id).join("run_meta.json");
        write_atomic(&path, serde_json::to_string_pretty(meta)?.as_bytes())?;
        Ok(path)
    }

    pub fn write_job(&self, run_id: &str, artifact: &JobArtifact) -> Result<PathBuf> {
        let path = self
            .jobs_dir(run_id)
            .join(format!("{}.json", artifact.job_id));
        write_atomic(&path, serde_json::to_string_pretty(artifact)?.as_bytes())?;
        Ok(path)
    }

    /// Raw prompt text. Callers write this only under the prompt-storage opt-in.
    pub fn write_prompt(&self, run_id: &str, job_id: &str, prompt: &str) -> Result<PathBuf> {
        let path = self.jobs_dir(run_id).join(format!("{job_id}.prompt.txt"));
        write_atomic(&path, prompt.as_bytes())?;
        Ok(path)
    }

    pub fn read_run_meta(&self, run_id: &str) -> Result<RunMeta> {
        let raw = std::fs::read_to_string(self.run_dir(run_id).join("run_meta.json"))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Writes through a temporary file in the target directory, then renames over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(job_id: &str) -> JobArtifact {
        JobArtifact {
            job_id: job_id.to_string(),
            prompt_id: "prompt_0".to_string(),
            provider: "fake".to_string(),
            model: "fake-fast".to_string(),
            status: JobStatus::Completed,
            exit_code: 0,
            wall_time_ms: 1.5,
            ttft_ms: None,
            output: "hi".to_string(),
            output_length: 2,
            error: None,
        }
    }

    #[test]
    fn layout_matches_run_and_job_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let job = store.write_job("run-1", &artifact("job-1")).unwrap();
        assert_eq!(job, dir.path().join("run-1/jobs/job-1.json"));

        let prompt = store.write_prompt("run-1", "job-1", "secret prompt").unwrap();
        assert_eq!(prompt, dir.path().join("run-1/jobs/job-1.prompt.txt"));
        assert_eq!(std::fs::read_to_string(prompt).unwrap(), "secret prompt");

        let meta = RunMeta {
            run_id: "run-1".into(),
            suite: Some("smoke".into()),
            suite_path: None,
            status: RunStatus::Completed,
            started_at: "2026-01-01T00:00:00.000Z".into(),
            completed_at: None,
            providers: vec!["fake".into()],
            job_count: 1,
        };
        store.write_run_meta(&meta).unwrap();
        assert_eq!(store.read_run_meta("run-1").unwrap(), meta);
    }

    #[test]
    fn rewrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut a = artifact("job-2");
        a.output = "x".repeat(4096);
        store.write_job("run", &a).unwrap();
        a.output = "short".into();
        let path = store.write_job("run", &a).unwrap();

        let back: JobArtifact =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back.output, "short");
        let leftovers = std::fs::read_dir(dir.path().join("run/jobs")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
