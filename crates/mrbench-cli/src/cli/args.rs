use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mrbench_core::config::{MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use mrbench_core::RoutingPolicy;

#[derive(Parser)]
#[command(
    name = "mrbench",
    version,
    about = "Detect, route to and benchmark the AI command-line tools installed on this machine"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Config file (default: <config dir>/mrbench/config.yaml)
    #[arg(long, global = true, env = "MRBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database (default: <data dir>/mrbench/mrbench.db)
    #[arg(long, global = true, env = "MRBENCH_DB")]
    pub db: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Detect every registered provider
    Detect(DetectArgs),
    /// List registered adapters and their capabilities
    Providers(ProvidersArgs),
    /// List the models a provider offers
    Models(ModelsArgs),
    /// Look for known AI CLI binaries and their config without running them
    Discover(DiscoverArgs),
    /// Host information plus the detection status of every provider
    Doctor(DoctorArgs),
    /// Pick a provider under a policy and constraints
    Route(RouteArgs),
    /// Run one prompt and record it as a single-job run
    Run(RunArgs),
    /// Run a benchmark suite across providers
    Bench(BenchArgs),
    /// Summarize a recorded run
    Report(ReportArgs),
    /// List recent runs
    Runs(RunsArgs),
    Version,
}

#[derive(Args, Clone, Debug)]
pub struct DetectArgs {
    #[arg(long)]
    pub json: bool,

    /// Store a capability snapshot for every detected provider
    #[arg(long)]
    pub save: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ProvidersArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ModelsArgs {
    pub provider: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct DiscoverArgs {
    /// Also run each installed tool's auth command (e.g. `gh auth status`)
    #[arg(long)]
    pub check_auth: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct DoctorArgs {
    #[arg(long, short = 'j')]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RouteArgs {
    /// preference | fastest | cheapest | offline_only (default: routing.default_policy)
    #[arg(long)]
    pub policy: Option<RoutingPolicy>,

    #[arg(long)]
    pub offline_only: bool,

    #[arg(long)]
    pub streaming_required: bool,

    /// Exclude providers whose best recorded wall time exceeds this
    #[arg(long)]
    pub max_latency_ms: Option<f64>,

    /// Print every candidate and the reason each excluded one was dropped
    #[arg(long)]
    pub explain: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Provider to run against; routed under --policy when omitted
    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Prompt file; stdin when omitted
    #[arg(long)]
    pub prompt: Option<PathBuf>,

    #[arg(long)]
    pub policy: Option<RoutingPolicy>,

    /// Print output as it arrives when the provider supports streaming
    #[arg(long)]
    pub stream: bool,

    /// Seconds (default: general.timeout_secs)
    #[arg(long, value_parser = clap::value_parser!(u64).range(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS))]
    pub timeout: Option<u64>,

    /// Keep a redacted prompt preview in the database
    #[arg(long)]
    pub store_prompts: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct BenchArgs {
    /// Suite YAML file
    #[arg(long)]
    pub suite: PathBuf,

    /// Provider to include (repeatable); every detected provider when omitted
    #[arg(long = "provider")]
    pub providers: Vec<String>,

    /// Model override as provider=model (repeatable)
    #[arg(long = "model", value_parser = parse_model_override)]
    pub models: Vec<(String, String)>,

    /// Artifact root (default: general.output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Keep redacted prompt previews and prompt files
    #[arg(long)]
    pub store_prompts: bool,

    /// Seconds per job (default: general.timeout_secs)
    #[arg(long, value_parser = clap::value_parser!(u64).range(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS))]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ReportArgs {
    pub run_id: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RunsArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    #[arg(long)]
    pub json: bool,
}

fn parse_model_override(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider.to_string(), model.to_string()))
        }
        _ => Err(format!("expected provider=model, got '{s}'")),
    }
}
