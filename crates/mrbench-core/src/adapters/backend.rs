//! Per-backend discovery contract: binary names, auth markers, model listing, invocation.
//!
//! The exact command lines belong to the backends and change with their releases; keeping them
//! in one table makes that churn a one-file edit.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AdapterCapabilities, RunOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ollama,
    Claude,
    Codex,
    Gemini,
    Goose,
    OpenCode,
    LlamaCpp,
    Vllm,
}

/// Where a backend's model list comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    /// Run the binary with these args; first column of each line after the header.
    Command(&'static [&'static str]),
    Static(&'static [&'static str]),
    /// `.gguf` files in the conventional model directories.
    GgufScan,
}

impl Backend {
    pub const ALL: [Backend; 8] = [
        Backend::Ollama,
        Backend::Claude,
        Backend::Codex,
        Backend::Gemini,
        Backend::Goose,
        Backend::OpenCode,
        Backend::LlamaCpp,
        Backend::Vllm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Ollama => "ollama",
            Backend::Claude => "claude",
            Backend::Codex => "codex",
            Backend::Gemini => "gemini",
            Backend::Goose => "goose",
            Backend::OpenCode => "opencode",
            Backend::LlamaCpp => "llamacpp",
            Backend::Vllm => "vllm",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Backend::Ollama => "Ollama",
            Backend::Claude => "Claude Code",
            Backend::Codex => "OpenAI Codex CLI",
            Backend::Gemini => "Gemini CLI",
            Backend::Goose => "Goose",
            Backend::OpenCode => "OpenCode",
            Backend::LlamaCpp => "llama.cpp",
            Backend::Vllm => "vLLM",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Candidate executable names, most specific first.
    pub fn binary_names(self) -> &'static [&'static str] {
        match self {
            Backend::Ollama => &["ollama"],
            Backend::Claude => &["claude"],
            Backend::Codex => &["codex"],
            Backend::Gemini => &["gemini"],
            Backend::Goose => &["goose"],
            Backend::OpenCode => &["opencode"],
            Backend::LlamaCpp => &["llama-cli", "llama"],
            Backend::Vllm => &["vllm"],
        }
    }

    pub fn is_offline(self) -> bool {
        matches!(self, Backend::Ollama | Backend::LlamaCpp | Backend::Vllm)
    }

    /// Credential marker files relative to the home directory. Only existence is checked.
    pub fn auth_markers(self) -> &'static [&'static str] {
        match self {
            Backend::Claude => &[".claude/.credentials.json", ".claude.json"],
            Backend::Codex => &[".codex/auth.json"],
            Backend::Gemini => &[".gemini/oauth_creds.json", ".gemini/settings.json"],
            Backend::Goose => &[".config/goose/config.yaml"],
            Backend::OpenCode => &[".local/share/opencode/auth.json"],
            Backend::Ollama | Backend::LlamaCpp | Backend::Vllm => &[],
        }
    }

    pub fn model_source(self) -> ModelSource {
        match self {
            Backend::Ollama => ModelSource::Command(&["list"]),
            Backend::Claude => ModelSource::Static(&["sonnet", "opus", "haiku"]),
            Backend::Codex => ModelSource::Static(&["o4-mini", "o3", "gpt-4.1"]),
            Backend::Gemini => ModelSource::Static(&["gemini-2.5-pro", "gemini-2.5-flash"]),
            Backend::Goose | Backend::OpenCode | Backend::Vllm => ModelSource::Static(&[]),
            Backend::LlamaCpp => ModelSource::GgufScan,
        }
    }

    /// Full argv for one prompt invocation. The prompt itself is written to stdin.
    ///
    /// `model` is a model file path for llama.cpp and a model name elsewhere; `"default"` leaves
    /// the choice to the backend where it has one.
    pub fn invocation(self, binary: &Path, model: &str, options: &RunOptions) -> Vec<String> {
        let mut argv = vec![binary.to_string_lossy().into_owned()];
        let explicit = !model.is_empty() && model != "default";
        let mut push = |parts: &[&str]| argv.extend(parts.iter().map(|s| s.to_string()));

        match self {
            Backend::Ollama => push(&["run", model]),
            Backend::Claude => {
                push(&["-p", "--output-format", "text"]);
                if explicit {
                    push(&["--model", model]);
                }
                if let Some(system) = options.system_prompt.as_deref() {
                    push(&["--append-system-prompt", system]);
                }
            }
            Backend::Codex => {
                push(&["exec", "--skip-git-repo-check"]);
                if explicit {
                    push(&["--model", model]);
                }
                push(&["-"]);
            }
            Backend::Gemini => {
                if explicit {
                    push(&["--model", model]);
                }
            }
            Backend::Goose => push(&["run", "--instructions", "-"]),
            Backend::OpenCode => {
                push(&["run"]);
                if explicit {
                    push(&["--model", model]);
                }
            }
            Backend::LlamaCpp => {
                let n = options.max_tokens.unwrap_or(512).to_string();
                push(&["-m", model, "--file", "/dev/stdin", "--no-display-prompt", "-n", &n]);
            }
            Backend::Vllm => {
                push(&["complete"]);
                if explicit {
                    push(&["--model-name", model]);
                }
            }
        }
        argv
    }

    pub fn capabilities(self) -> AdapterCapabilities {
        let offline = self.is_offline();
        let (streaming, tool_calling, max_context) = match self {
            Backend::Ollama => (true, false, None),
            Backend::Claude => (true, true, Some(200_000)),
            Backend::Codex => (false, true, Some(200_000)),
            Backend::Gemini => (true, true, Some(1_000_000)),
            Backend::Goose => (true, true, None),
            Backend::OpenCode => (false, true, None),
            Backend::LlamaCpp => (true, false, None),
            Backend::Vllm => (false, false, None),
        };
        AdapterCapabilities {
            name: self.name().to_string(),
            streaming,
            tool_calling,
            max_tokens: None,
            max_context,
            supports_system_prompt: matches!(self, Backend::Claude),
            offline,
            // Local inference has no per-token price.
            cost_per_1k_input: offline.then_some(0.0),
            cost_per_1k_output: offline.then_some(0.0),
        }
    }
}

/// Parses `ollama list` style output: a header line, then the model name in the first column.
pub fn parse_model_table(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// First non-empty line of `--version` output, without a leading `<name> version` prefix.
pub fn parse_version(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let version = match line.to_ascii_lowercase().find("version") {
        Some(idx) => line[idx + "version".len()..].trim(),
        None => line,
    };
    let version = version.trim_start_matches(':').trim();
    let version = version.strip_prefix("is ").unwrap_or(version);
    (!version.is_empty()).then(|| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_resolvable() {
        for b in Backend::ALL {
            assert_eq!(Backend::from_name(b.name()), Some(b));
        }
        assert_eq!(Backend::from_name("fake"), None);
    }

    #[test]
    fn llamacpp_reads_prompt_file_from_stdin() {
        let opts = RunOptions {
            max_tokens: Some(64),
            ..Default::default()
        };
        let argv = Backend::LlamaCpp.invocation(Path::new("llama-cli"), "/m/q4.gguf", &opts);
        assert_eq!(
            argv,
            vec!["llama-cli", "-m", "/m/q4.gguf", "--file", "/dev/stdin", "--no-display-prompt", "-n", "64"]
        );
    }

    #[test]
    fn default_model_is_left_to_backend() {
        let argv = Backend::Claude.invocation(Path::new("claude"), "default", &RunOptions::default());
        assert_eq!(argv, vec!["claude", "-p", "--output-format", "text"]);
        let argv = Backend::Codex.invocation(Path::new("codex"), "o3", &RunOptions::default());
        assert_eq!(
            argv,
            vec!["codex", "exec", "--skip-git-repo-check", "--model", "o3", "-"]
        );
    }

    #[test]
    fn ollama_list_parsing() {
        let out = "NAME            ID      SIZE   MODIFIED\nllama3.2:latest abc 2.0 GB 2 days ago\n\nqwen2.5:7b def 4.7 GB 1 week ago\n";
        assert_eq!(parse_model_table(out), vec!["llama3.2:latest", "qwen2.5:7b"]);
        assert!(parse_model_table("NAME ID\n").is_empty());
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("ollama version is 0.5.7\n").as_deref(), Some("0.5.7"));
        assert_eq!(parse_version("\n1.0.33 (Claude Code)\n").as_deref(), Some("1.0.33 (Claude Code)"));
        assert_eq!(parse_version("codex-cli 0.2.0").as_deref(), Some("codex-cli 0.2.0"));
        assert_eq!(parse_version("Version: 2.1").as_deref(), Some("2.1"));
        assert_eq!(parse_version("   \n"), None);
    }

    #[test]
    fn offline_backends_are_free() {
        assert_eq!(Backend::Ollama.capabilities().cost_per_1k_input, Some(0.0));
        assert_eq!(Backend::Claude.capabilities().cost_per_1k_input, None);
        assert!(Backend::Vllm.capabilities().offline);
        assert!(!Backend::Gemini.capabilities().offline);
    }
}
