//! Deterministic in-process adapter for contract tests and dry runs.
//!
//! Models:
//! - `fake-fast`: immediate echo, exit 0
//! - `fake-slow`: same after a 150 ms delay
//! - `fake-error`: exit 1 with an error message
//! - `fake-stream`: echo emitted word by word at 10 ms intervals
//!
//! Unknown model names behave like `fake-fast`. The run timeout and cancellation token are
//! honoured the same way the executor honours them.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Adapter, AdapterCapabilities, AuthStatus, DetectionResult, RunOptions, RunResult};
use crate::error::MrbenchError;
use crate::executor::{EXIT_CANCELLED, EXIT_TIMEOUT};

pub const FAKE_MODELS: [&str; 4] = ["fake-fast", "fake-slow", "fake-error", "fake-stream"];

const SLOW_DELAY: Duration = Duration::from_millis(150);
const STREAM_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct FakeAdapter;

impl FakeAdapter {
    fn response_for(prompt: &str) -> String {
        let head: String = prompt.chars().take(50).collect();
        format!("Fake response to: {head}...")
    }

    async fn simulate(&self, prompt: &str, model: &str, options: &RunOptions, start: Instant) -> RunResult {
        let output = Self::response_for(prompt);
        let mut result = RunResult {
            input_tokens: Some(word_count(prompt)),
            output_tokens: Some(word_count(&output)),
            tokens_estimated: true,
            ..Default::default()
        };

        match model {
            "fake-slow" => {
                tokio::time::sleep(SLOW_DELAY).await;
                result.output = output;
            }
            "fake-error" => {
                result.exit_code = 1;
                result.output_tokens = Some(0);
                result.error = Some("Simulated error from fake-error model".to_string());
            }
            "fake-stream" => {
                for word in output.split_whitespace() {
                    tokio::time::sleep(STREAM_INTERVAL).await;
                    if result.ttft_ms.is_none() {
                        result.ttft_ms = Some(elapsed_ms(start));
                    }
                    if let Some(sink) = &options.on_chunk {
                        sink(word);
                    }
                    result.chunks.push(word.to_string());
                }
                result.output = result.chunks.join(" ");
            }
            _ => result.output = output,
        }

        result.wall_time_ms = elapsed_ms(start);
        result
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn name(&self) -> &str {
        "fake"
    }

    fn display_name(&self) -> &str {
        "Fake (testing)"
    }

    async fn detect(&self) -> DetectionResult {
        DetectionResult {
            detected: true,
            binary_path: Some(PathBuf::from("fake")),
            version: Some("1.0.0".to_string()),
            auth_status: AuthStatus::Authenticated,
            trusted: true,
            error: None,
        }
    }

    async fn list_models(&self) -> Vec<String> {
        FAKE_MODELS.iter().map(|s| s.to_string()).collect()
    }

    async fn run(&self, prompt: &str, model: &str, options: &RunOptions) -> RunResult {
        let start = Instant::now();
        let cancel = options.cancel.clone().unwrap_or_default();

        tokio::select! {
            biased;
            _ = tokio::time::sleep(options.timeout) => RunResult {
                exit_code: EXIT_TIMEOUT,
                wall_time_ms: elapsed_ms(start),
                timed_out: true,
                error: Some(MrbenchError::Timeout { timeout: options.timeout }.to_string()),
                ..Default::default()
            },
            _ = cancel.cancelled() => RunResult {
                exit_code: EXIT_CANCELLED,
                wall_time_ms: elapsed_ms(start),
                cancelled: true,
                error: Some("cancelled".to_string()),
                ..Default::default()
            },
            result = self.simulate(prompt, model, options, start) => result,
        }
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            name: "fake".to_string(),
            streaming: true,
            tool_calling: false,
            max_tokens: Some(4096),
            max_context: Some(8192),
            supports_system_prompt: true,
            offline: true,
            cost_per_1k_input: Some(0.0),
            cost_per_1k_output: Some(0.0),
        }
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
