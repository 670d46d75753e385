//! Uniform contract over external AI command-line backends.
//!
//! An [`Adapter`] detects its backend, lists models and runs a prompt. Failures never surface as
//! `Err`: a missing binary is `detected = false`, a failed run is a non-zero `exit_code` with a
//! populated `error`. Prompts reach the backend only through stdin.

pub mod backend;
pub mod cli;
pub mod fake;
pub mod registry;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::MrbenchError;
use crate::executor::{ExecutorResult, EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND};

pub use crate::discovery::AuthStatus;
pub use backend::{Backend, ModelSource};
pub use cli::CliAdapter;
pub use fake::FakeAdapter;
pub use registry::{AdapterRegistry, ProviderDetection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub name: String,
    pub streaming: bool,
    pub tool_calling: bool,
    pub max_tokens: Option<u32>,
    pub max_context: Option<u32>,
    pub supports_system_prompt: bool,
    /// Runs without network access.
    pub offline: bool,
    /// USD per 1k tokens, when known.
    pub cost_per_1k_input: Option<f64>,
    pub cost_per_1k_output: Option<f64>,
}

impl AdapterCapabilities {
    /// Estimated cost of a call, when both prices are known.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> Option<f64> {
        let input = self.cost_per_1k_input?;
        let output = self.cost_per_1k_output?;
        Some(input * input_tokens as f64 / 1000.0 + output * output_tokens as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DetectionResult {
    pub detected: bool,
    pub binary_path: Option<PathBuf>,
    pub version: Option<String>,
    pub auth_status: AuthStatus,
    pub trusted: bool,
    /// Redacted.
    pub error: Option<String>,
}

impl DetectionResult {
    pub fn missing(error: impl Into<String>) -> Self {
        Self {
            detected: false,
            error: Some(crate::redaction::redact(&error.into())),
            ..Default::default()
        }
    }
}

/// Receives streamed output lines as they arrive.
pub type ChunkSink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    /// Use the streaming path when the adapter supports it.
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub cancel: Option<CancellationToken>,
    pub on_chunk: Option<ChunkSink>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            stream: false,
            max_tokens: None,
            system_prompt: None,
            cancel: None,
            on_chunk: None,
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("timeout", &self.timeout)
            .field("stream", &self.stream)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt.as_ref().map(|_| "<set>"))
            .field("cancel", &self.cancel.is_some())
            .field("on_chunk", &self.on_chunk.is_some())
            .finish()
    }
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn streaming(mut self, on_chunk: Option<ChunkSink>) -> Self {
        self.stream = true;
        self.on_chunk = on_chunk;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunResult {
    pub output: String,
    pub exit_code: i32,
    pub wall_time_ms: f64,
    pub ttft_ms: Option<f64>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Token counts are approximations, not backend-reported.
    pub tokens_estimated: bool,
    pub chunks: Vec<String>,
}

impl RunResult {
    /// A run that never reached a process (missing binary, unresolvable model).
    pub fn failure(exit_code: i32, error: impl Into<String>) -> Self {
        Self {
            exit_code,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Projects an executor result, describing failures with the error taxonomy.
    pub fn from_exec(provider: &str, exec: ExecutorResult, timeout: Duration) -> Self {
        let error = if exec.timed_out {
            Some(MrbenchError::Timeout { timeout }.to_string())
        } else if exec.cancelled {
            Some("cancelled".to_string())
        } else if exec.exit_code == EXIT_NOT_FOUND || exec.exit_code == EXIT_NOT_EXECUTABLE {
            Some(format!(
                "{}: {}",
                MrbenchError::BinaryNotFound {
                    provider: provider.to_string()
                },
                exec.stderr.trim()
            ))
        } else if exec.exit_code != 0 {
            Some(
                MrbenchError::SubprocessFailure {
                    exit_code: exec.exit_code,
                    detail: tail(exec.stderr.trim(), 500).to_string(),
                }
                .to_string(),
            )
        } else {
            None
        };

        Self {
            output: exec.stdout.trim_end().to_string(),
            exit_code: exec.exit_code,
            wall_time_ms: exec.wall_time_ms,
            ttft_ms: exec.ttft_ms,
            error,
            timed_out: exec.timed_out,
            cancelled: exec.cancelled,
            input_tokens: None,
            output_tokens: None,
            tokens_estimated: false,
            chunks: exec.chunks,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none() && !self.timed_out && !self.cancelled
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Rough token count (4 characters per token) for backends that report none.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    async fn detect(&self) -> DetectionResult;

    async fn list_models(&self) -> Vec<String>;

    async fn run(&self, prompt: &str, model: &str, options: &RunOptions) -> RunResult;

    fn capabilities(&self) -> AdapterCapabilities;
}

/// Model for a run: `explicit`, else `configured`, else the adapter's first listed model, else
/// `"default"`.
pub async fn resolve_model(
    adapter: &dyn Adapter,
    explicit: Option<&str>,
    configured: Option<&str>,
) -> String {
    match explicit.or(configured) {
        Some(m) => m.to_string(),
        None => adapter
            .list_models()
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| "default".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(exit_code: i32, stderr: &str) -> ExecutorResult {
        ExecutorResult {
            stdout: "out\n".into(),
            stderr: stderr.into(),
            exit_code,
            wall_time_ms: 12.0,
            ..Default::default()
        }
    }

    #[test]
    fn success_projection() {
        let r = RunResult::from_exec("p", exec(0, ""), Duration::from_secs(1));
        assert!(r.success());
        assert_eq!(r.output, "out");
        assert_eq!(r.error, None);
    }

    #[test]
    fn failure_projection_names_exit_code() {
        let r = RunResult::from_exec("p", exec(2, "bad flag"), Duration::from_secs(1));
        assert!(!r.success());
        assert_eq!(
            r.error.as_deref(),
            Some("subprocess exited with code 2: bad flag")
        );
    }

    #[test]
    fn missing_binary_projection() {
        let r = RunResult::from_exec("codex", exec(127, "failed to start"), Duration::from_secs(1));
        assert!(r.error.unwrap().starts_with("binary not found for provider 'codex'"));
    }

    #[test]
    fn timeout_projection() {
        let mut e = exec(124, "");
        e.timed_out = true;
        let r = RunResult::from_exec("p", e, Duration::from_millis(250));
        assert!(r.timed_out);
        assert_eq!(r.error.as_deref(), Some("process timed out after 250ms"));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let long = "é".repeat(400);
        let t = tail(&long, 501);
        assert!(t.len() <= 501);
        assert!(t.chars().all(|c| c == 'é'));
    }

    #[test]
    fn cost_needs_both_prices() {
        let mut caps = FakeAdapter.capabilities();
        assert_eq!(caps.estimate_cost(1000, 1000), Some(0.0));
        caps.cost_per_1k_output = None;
        assert_eq!(caps.estimate_cost(1000, 1000), None);
    }
}
