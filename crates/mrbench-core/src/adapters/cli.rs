//! Adapter for backends driven through their own command-line binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::backend::{parse_model_table, parse_version, Backend, ModelSource};
use super::{Adapter, AdapterCapabilities, AuthStatus, DetectionResult, RunOptions, RunResult};
use crate::config::MrbenchConfig;
use crate::discovery;
use crate::error::MrbenchError;
use crate::executor::{Executor, EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CliAdapter {
    backend: Backend,
    binary: Option<PathBuf>,
    /// Replaces `PATH` when set.
    search_dirs: Option<Vec<PathBuf>>,
    extra_dirs: Vec<PathBuf>,
    trusted_dirs: Vec<PathBuf>,
    home: Option<PathBuf>,
    probe_timeout: Duration,
}

impl CliAdapter {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            binary: None,
            search_dirs: None,
            extra_dirs: Vec::new(),
            trusted_dirs: Vec::new(),
            home: dirs::home_dir(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Adapter configured from the `discovery` and `providers.<name>` sections.
    pub fn from_config(backend: Backend, config: &MrbenchConfig) -> Self {
        let mut adapter = Self::new(backend)
            .with_extra_dirs(config.discovery.extra_paths.clone())
            .with_trusted_dirs(config.discovery.trusted_paths.clone())
            .with_probe_timeout(config.detect_timeout());
        if let Some(binary) = config.provider(backend.name()).binary {
            adapter = adapter.with_binary(binary);
        }
        adapter
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = Some(dirs);
        self
    }

    pub fn with_extra_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.extra_dirs = dirs;
        self
    }

    pub fn with_trusted_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.trusted_dirs = dirs;
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Bound for `--version` and model-listing probes.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn resolve_binary(&self) -> Option<PathBuf> {
        if let Some(explicit) = &self.binary {
            return discovery::is_executable(explicit).then(|| explicit.clone());
        }
        let mut dirs = match &self.search_dirs {
            Some(dirs) => dirs.clone(),
            None => discovery::search_dirs(&[]),
        };
        dirs.extend(self.extra_dirs.iter().cloned());
        discovery::find_binary(self.backend.binary_names(), &dirs)
    }

    fn gguf_models(&self) -> Vec<PathBuf> {
        discovery::find_gguf_models(&discovery::default_gguf_dirs(self.home.as_deref()))
    }

    /// llama.cpp takes a file path; accept either a path or a model file stem.
    fn resolve_model_path(&self, model: &str) -> Option<PathBuf> {
        let direct = Path::new(model);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }
        self.gguf_models().into_iter().find(|p| {
            p.file_stem().and_then(|s| s.to_str()) == Some(model)
                || p.file_name().and_then(|s| s.to_str()) == Some(model)
        })
    }

    fn argv(&self, cmd: &Path, args: &[&str]) -> Vec<String> {
        std::iter::once(cmd.to_string_lossy().into_owned())
            .chain(args.iter().map(|s| s.to_string()))
            .collect()
    }
}

#[async_trait]
impl Adapter for CliAdapter {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn display_name(&self) -> &str {
        self.backend.display_name()
    }

    async fn detect(&self) -> DetectionResult {
        let Some(binary) = self.resolve_binary() else {
            let looked_for = match &self.binary {
                Some(p) => p.display().to_string(),
                None => self.backend.binary_names().join(", "),
            };
            return DetectionResult::missing(format!(
                "{} (looked for {looked_for})",
                MrbenchError::BinaryNotFound {
                    provider: self.name().to_string()
                }
            ));
        };

        let probe = Executor::new()
            .run(&self.argv(&binary, &["--version"]), None, self.probe_timeout)
            .await;
        if probe.exit_code == EXIT_NOT_FOUND || probe.exit_code == EXIT_NOT_EXECUTABLE {
            let mut result = DetectionResult::missing(format!(
                "{} could not be executed: {}",
                binary.display(),
                probe.stderr.trim()
            ));
            result.binary_path = Some(binary);
            return result;
        }
        let version = if probe.success() {
            parse_version(&probe.stdout)
        } else {
            tracing::debug!(provider = self.name(), exit_code = probe.exit_code, "version probe failed");
            None
        };

        let auth_status = if self.backend.is_offline() {
            AuthStatus::Authenticated
        } else {
            discovery::auth_presence(
                self.home.clone(),
                self.backend.auth_markers(),
                discovery::AUTH_CHECK_TIMEOUT,
            )
            .await
        };

        DetectionResult {
            detected: true,
            trusted: discovery::is_trusted(&binary, &self.trusted_dirs),
            binary_path: Some(binary),
            version,
            auth_status,
            error: None,
        }
    }

    async fn list_models(&self) -> Vec<String> {
        match self.backend.model_source() {
            ModelSource::Static(models) => models.iter().map(|s| s.to_string()).collect(),
            ModelSource::GgufScan => self
                .gguf_models()
                .iter()
                .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect(),
            ModelSource::Command(args) => {
                let Some(binary) = self.resolve_binary() else {
                    return Vec::new();
                };
                let res = Executor::new()
                    .run(&self.argv(&binary, args), None, self.probe_timeout)
                    .await;
                if !res.success() {
                    tracing::debug!(provider = self.name(), exit_code = res.exit_code, "model listing failed");
                    return Vec::new();
                }
                parse_model_table(&res.stdout)
            }
        }
    }

    async fn run(&self, prompt: &str, model: &str, options: &RunOptions) -> RunResult {
        let Some(binary) = self.resolve_binary() else {
            return RunResult::failure(
                EXIT_NOT_FOUND,
                MrbenchError::BinaryNotFound {
                    provider: self.name().to_string(),
                }
                .to_string(),
            );
        };

        let model_arg = if self.backend == Backend::LlamaCpp {
            match self.resolve_model_path(model) {
                Some(path) => path.to_string_lossy().into_owned(),
                None => {
                    return RunResult::failure(1, format!("model file not found for '{model}'"))
                }
            }
        } else {
            model.to_string()
        };

        let argv = self.backend.invocation(&binary, &model_arg, options);
        let mut executor = Executor::new();
        if let Some(token) = &options.cancel {
            executor = executor.with_cancel(token.clone());
        }

        let exec = if options.stream && self.capabilities().streaming {
            let sink = options.on_chunk.clone();
            executor
                .run_streaming(&argv, Some(prompt), options.timeout, move |line| {
                    if let Some(sink) = &sink {
                        sink(line);
                    }
                })
                .await
        } else {
            executor.run(&argv, Some(prompt), options.timeout).await
        };

        RunResult::from_exec(self.name(), exec, options.timeout)
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.backend.capabilities()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_binary_detects_false_without_panicking() {
        let empty = tempfile::tempdir().unwrap();
        for backend in Backend::ALL {
            let adapter = CliAdapter::new(backend).with_search_dirs(vec![empty.path().to_path_buf()]);
            let det = adapter.detect().await;
            assert!(!det.detected, "{backend:?}");
            assert!(det.error.as_deref().unwrap().contains("binary not found"));
            assert!(det.binary_path.is_none());
        }
    }

    #[tokio::test]
    async fn explicit_binary_that_does_not_exist() {
        let det = CliAdapter::new(Backend::Codex)
            .with_binary("/nonexistent/codex")
            .detect()
            .await;
        assert!(!det.detected);
        assert!(det.error.unwrap().contains("/nonexistent/codex"));
    }

    #[tokio::test]
    async fn detect_reads_version_and_auth_marker() {
        let bin = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        script(bin.path(), "claude", "echo '1.0.33 (Claude Code)'");
        std::fs::write(home.path().join(".claude.json"), "{}").unwrap();

        let det = CliAdapter::new(Backend::Claude)
            .with_search_dirs(vec![bin.path().to_path_buf()])
            .with_home(Some(home.path().to_path_buf()))
            .with_trusted_dirs(vec![bin.path().to_path_buf()])
            .detect()
            .await;
        assert!(det.detected);
        assert_eq!(det.version.as_deref(), Some("1.0.33 (Claude Code)"));
        assert_eq!(det.auth_status, AuthStatus::Authenticated);
        assert!(det.trusted);
    }

    #[tokio::test]
    async fn prompt_goes_through_stdin_only() {
        let bin = tempfile::tempdir().unwrap();
        // echoes its argv, then whatever arrives on stdin
        let path = script(bin.path(), "claude", "echo \"ARGS:$*\"; cat");
        let adapter = CliAdapter::new(Backend::Claude).with_binary(path);

        let res = adapter
            .run("TOP-SECRET prompt text", "sonnet", &RunOptions::default())
            .await;
        assert!(res.success(), "{res:?}");
        let mut lines = res.output.lines();
        let args = lines.next().unwrap();
        assert_eq!(args, "ARGS:-p --output-format text --model sonnet");
        assert!(!args.contains("TOP-SECRET"));
        assert_eq!(lines.next(), Some("TOP-SECRET prompt text"));
    }

    #[tokio::test]
    async fn streaming_run_feeds_sink() {
        let bin = tempfile::tempdir().unwrap();
        let path = script(bin.path(), "ollama", "echo one; echo two");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let opts = RunOptions::default().streaming(Some(Arc::new(move |l: &str| {
            sink_seen.lock().unwrap().push(l.to_string())
        })));

        let res = CliAdapter::new(Backend::Ollama)
            .with_binary(path)
            .run("hi", "llama3", &opts)
            .await;
        assert!(res.success());
        assert!(res.ttft_ms.is_some());
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn failing_backend_reports_error_not_panic() {
        let bin = tempfile::tempdir().unwrap();
        let path = script(bin.path(), "codex", "echo 'api_key=abcdefgh12345678 rejected' >&2; exit 2");
        let res = CliAdapter::new(Backend::Codex)
            .with_binary(path)
            .run("hi", "o3", &RunOptions::default())
            .await;
        assert_eq!(res.exit_code, 2);
        let err = res.error.unwrap();
        assert!(err.starts_with("subprocess exited with code 2"));
    }

    #[tokio::test]
    async fn run_without_binary_is_127() {
        let empty = tempfile::tempdir().unwrap();
        let res = CliAdapter::new(Backend::Gemini)
            .with_search_dirs(vec![empty.path().to_path_buf()])
            .run("hi", "default", &RunOptions::default())
            .await;
        assert_eq!(res.exit_code, EXIT_NOT_FOUND);
        assert!(res.error.is_some());
    }

    #[tokio::test]
    async fn ollama_models_from_list_command() {
        let bin = tempfile::tempdir().unwrap();
        script(
            bin.path(),
            "ollama",
            "printf 'NAME ID SIZE\\nllama3.2:latest a 2GB\\nphi4:14b b 9GB\\n'",
        );
        let models = CliAdapter::new(Backend::Ollama)
            .with_search_dirs(vec![bin.path().to_path_buf()])
            .list_models()
            .await;
        assert_eq!(models, vec!["llama3.2:latest", "phi4:14b"]);
    }

    #[tokio::test]
    async fn llamacpp_models_from_home_cache() {
        let home = tempfile::tempdir().unwrap();
        let dir = home.path().join(".cache").join("llama.cpp");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("qwen-q4.gguf"), "").unwrap();

        let adapter = CliAdapter::new(Backend::LlamaCpp).with_home(Some(home.path().to_path_buf()));
        assert_eq!(adapter.list_models().await, vec!["qwen-q4"]);
        assert_eq!(
            adapter.resolve_model_path("qwen-q4"),
            Some(dir.join("qwen-q4.gguf"))
        );
        assert_eq!(adapter.resolve_model_path("missing"), None);
    }
}
