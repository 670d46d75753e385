//! Locating backend binaries and their local state on this host.
//!
//! Everything here is read-only: binaries are found by walking search directories, auth
//! presence is a file-existence check (credential files are never opened), and model files are
//! found by extension. The one exception is [`check_tool_auth`], which runs each installed
//! tool's auth command and only when asked to.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::{Executor, EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND};

/// Upper bound for the auth-marker check, which may touch network home directories.
pub const AUTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

const GGUF_SCAN_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Authenticated,
    Unauthenticated,
    #[default]
    Unknown,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Authenticated => "authenticated",
            AuthStatus::Unauthenticated => "unauthenticated",
            AuthStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "authenticated" => AuthStatus::Authenticated,
            "unauthenticated" => AuthStatus::Unauthenticated,
            _ => AuthStatus::Unknown,
        }
    }
}

/// `PATH` entries followed by `extra`.
pub fn search_dirs(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
    dirs.extend(extra.iter().cloned());
    dirs
}

pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// First executable named one of `names` in `dirs`, trying names in order.
pub fn find_binary(names: &[&str], dirs: &[PathBuf]) -> Option<PathBuf> {
    for name in names {
        for dir in dirs {
            for candidate in candidates(dir, name) {
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(format!("{name}.exe")), dir.join(format!("{name}.cmd")), dir.join(name)]
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// True when `binary` lives under one of `trusted`.
pub fn is_trusted(binary: &Path, trusted: &[PathBuf]) -> bool {
    let resolved = binary.canonicalize().unwrap_or_else(|_| binary.to_path_buf());
    trusted.iter().any(|root| {
        let root = root.canonicalize().unwrap_or_else(|_| root.clone());
        resolved.starts_with(&root)
    })
}

/// Checks whether any of `markers` (paths relative to `home`) exists.
///
/// Runs off the async runtime and gives up after `timeout`, reporting `Unknown`.
pub async fn auth_presence(
    home: Option<PathBuf>,
    markers: &'static [&'static str],
    timeout: Duration,
) -> AuthStatus {
    let Some(home) = home else {
        return AuthStatus::Unknown;
    };
    if markers.is_empty() {
        return AuthStatus::Unknown;
    }
    let check = tokio::task::spawn_blocking(move || markers.iter().any(|m| home.join(m).exists()));
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(true)) => AuthStatus::Authenticated,
        Ok(Ok(false)) => AuthStatus::Unknown,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "auth check task failed");
            AuthStatus::Unknown
        }
        Err(_) => {
            tracing::debug!(?timeout, "auth check timed out");
            AuthStatus::Unknown
        }
    }
}

/// Conventional llama.cpp model directories under `home`.
pub fn default_gguf_dirs(home: Option<&Path>) -> Vec<PathBuf> {
    let Some(home) = home else {
        return Vec::new();
    };
    vec![
        home.join(".cache").join("llama.cpp"),
        home.join(".local").join("share").join("llama.cpp").join("models"),
        home.join("models"),
    ]
}

/// `.gguf` files under `dirs`, sorted and de-duplicated.
pub fn find_gguf_models(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in dirs {
        collect_gguf(dir, GGUF_SCAN_DEPTH, &mut found);
    }
    found.sort();
    found.dedup();
    found
}

fn collect_gguf(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(kind) = entry.file_type() else {
            continue;
        };
        if kind.is_dir() {
            if depth > 0 {
                collect_gguf(&path, depth - 1, out);
            }
        } else if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("gguf")) {
            out.push(path);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub kernel: Option<String>,
}

impl HostInfo {
    pub fn current() -> Self {
        Self {
            hostname: host_name().unwrap_or_else(|| "unknown".to_string()),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            kernel: kernel_version(),
        }
    }
}

#[cfg(feature = "process-tree")]
fn host_name() -> Option<String> {
    sysinfo::System::host_name()
}

#[cfg(not(feature = "process-tree"))]
fn host_name() -> Option<String> {
    None
}

#[cfg(feature = "process-tree")]
fn kernel_version() -> Option<String> {
    sysinfo::System::kernel_version()
}

#[cfg(not(feature = "process-tree"))]
fn kernel_version() -> Option<String> {
    None
}

/// A tool `discover` looks for. `config_locations` are relative to the home directory.
#[derive(Debug, Clone, Copy)]
pub struct KnownTool {
    pub name: &'static str,
    pub binaries: &'static [&'static str],
    pub config_locations: &'static [&'static str],
    /// Arguments after the binary; exit status 0 means logged in. Only run on request.
    pub auth_check: Option<&'static [&'static str]>,
    pub offline: bool,
}

const fn tool(
    name: &'static str,
    binaries: &'static [&'static str],
    config_locations: &'static [&'static str],
    auth_check: Option<&'static [&'static str]>,
    offline: bool,
) -> KnownTool {
    KnownTool {
        name,
        binaries,
        config_locations,
        auth_check,
        offline,
    }
}

/// Every backend first, in registration order, then other AI and cloud CLIs worth knowing about.
pub const KNOWN_TOOLS: &[KnownTool] = &[
    tool("ollama", &["ollama"], &[".ollama"], Some(&["list"]), true),
    tool(
        "claude",
        &["claude"],
        &[".claude", ".config/claude", ".claude.json"],
        Some(&["--version"]),
        false,
    ),
    tool("codex", &["codex"], &[".codex", ".config/codex"], Some(&["--version"]), false),
    tool("gemini", &["gemini"], &[".config/gemini", ".gemini"], Some(&["--version"]), false),
    tool("goose", &["goose"], &[".config/goose", ".goose"], Some(&["--version"]), false),
    tool(
        "opencode",
        &["opencode"],
        &[".opencode", ".config/opencode"],
        Some(&["--version"]),
        false,
    ),
    tool("llamacpp", &["llama-cli", "llama"], &[], None, true),
    tool("vllm", &["vllm"], &[], None, true),
    tool(
        "aider",
        &["aider"],
        &[".aider", ".config/aider", ".aider.conf.yml"],
        None,
        false,
    ),
    tool(
        "cursor",
        &["cursor"],
        &[".cursor", "Library/Application Support/Cursor"],
        None,
        false,
    ),
    tool("continue", &["continue"], &[".continue"], None, false),
    tool("cody", &["cody"], &[], None, false),
    tool("copilot", &["copilot"], &[], None, false),
    tool(
        "aws",
        &["aws"],
        &[".aws/credentials", ".aws/config"],
        Some(&["sts", "get-caller-identity"]),
        false,
    ),
    tool("gcloud", &["gcloud"], &[".config/gcloud"], Some(&["auth", "list"]), false),
    tool("azure", &["az"], &[".azure"], Some(&["account", "show"]), false),
    tool("gh", &["gh"], &[".config/gh"], Some(&["auth", "status"]), false),
    tool("mlx_lm", &["mlx_lm", "mlx_lm.generate"], &[], None, true),
    tool("kilocode", &["kilocode"], &[], None, false),
    tool("sourcegraph", &["sourcegraph", "src"], &[], None, false),
    tool("tabnine", &["tabnine"], &[], None, false),
];

/// How far along a tool is. Each stage implies the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    NotFound,
    Installed,
    Configured,
    Ready,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::NotFound => "not_found",
            ToolStatus::Installed => "installed",
            ToolStatus::Configured => "configured",
            ToolStatus::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPresence {
    pub name: String,
    pub status: ToolStatus,
    pub binary_path: Option<PathBuf>,
    /// First existing config location.
    pub config_path: Option<PathBuf>,
    pub offline: bool,
    /// `None` until [`check_tool_auth`] has run the tool's auth command.
    pub auth_status: Option<AuthStatus>,
}

impl ToolPresence {
    fn classify(&mut self) {
        self.status = match (&self.binary_path, &self.config_path, self.auth_status) {
            (None, _, _) => ToolStatus::NotFound,
            (Some(_), _, Some(AuthStatus::Authenticated)) => ToolStatus::Ready,
            (Some(_), Some(_), _) => ToolStatus::Configured,
            (Some(_), None, _) => ToolStatus::Installed,
        };
    }
}

/// Tool names grouped by status. `installed` holds every tool with a binary, `configured` the
/// installed ones with a config location, `ready` those whose auth check passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBuckets {
    pub installed: Vec<String>,
    pub configured: Vec<String>,
    pub ready: Vec<String>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInventory {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub host: HostInfo,
    pub tools: Vec<ToolPresence>,
}

impl ToolInventory {
    pub fn found(&self) -> usize {
        self.tools.iter().filter(|t| t.binary_path.is_some()).count()
    }

    pub fn buckets(&self) -> ToolBuckets {
        let mut buckets = ToolBuckets::default();
        for t in &self.tools {
            if t.status == ToolStatus::NotFound {
                buckets.not_found.push(t.name.clone());
                continue;
            }
            buckets.installed.push(t.name.clone());
            if t.config_path.is_some() {
                buckets.configured.push(t.name.clone());
            }
            if t.status == ToolStatus::Ready {
                buckets.ready.push(t.name.clone());
            }
        }
        buckets
    }
}

/// First of `locations` (relative to `home`) that exists.
pub fn find_config(home: Option<&Path>, locations: &[&str]) -> Option<PathBuf> {
    let home = home?;
    locations
        .iter()
        .map(|l| home.join(l))
        .find(|p| p.exists())
}

/// Looks for every [`KNOWN_TOOLS`] binary in `dirs` and its config under `home`, without
/// executing anything.
pub fn scan_known_tools(dirs: &[PathBuf], home: Option<&Path>) -> ToolInventory {
    let tools = KNOWN_TOOLS
        .iter()
        .map(|known| {
            let mut presence = ToolPresence {
                name: known.name.to_string(),
                status: ToolStatus::NotFound,
                binary_path: find_binary(known.binaries, dirs),
                config_path: find_config(home, known.config_locations),
                offline: known.offline,
                auth_status: None,
            };
            presence.classify();
            presence
        })
        .collect();
    ToolInventory {
        generated_at: chrono::Utc::now(),
        host: HostInfo::current(),
        tools,
    }
}

/// Runs the auth command of every installed tool that has one and reclassifies it.
///
/// Spawn failures and timeouts leave the status `unknown`; any other non-zero exit is
/// `unauthenticated`.
pub async fn check_tool_auth(
    inventory: &mut ToolInventory,
    executor: &Executor,
    timeout: Duration,
) {
    for presence in &mut inventory.tools {
        let Some(binary) = presence.binary_path.clone() else {
            continue;
        };
        let Some(args) = KNOWN_TOOLS
            .iter()
            .find(|k| k.name == presence.name)
            .and_then(|k| k.auth_check)
        else {
            continue;
        };
        let mut argv = vec![binary.to_string_lossy().into_owned()];
        argv.extend(args.iter().map(|a| a.to_string()));
        let res = executor.run(&argv, None, timeout).await;
        let status = match res.exit_code {
            _ if res.timed_out || res.cancelled => AuthStatus::Unknown,
            0 => AuthStatus::Authenticated,
            EXIT_NOT_FOUND | EXIT_NOT_EXECUTABLE => AuthStatus::Unknown,
            _ => AuthStatus::Unauthenticated,
        };
        tracing::debug!(
            tool = %presence.name,
            exit = res.exit_code,
            status = status.as_str(),
            "auth check"
        );
        presence.auth_status = Some(status);
        presence.classify();
    }
}
