use std::path::PathBuf;

use mrbench_core::discovery::{AuthStatus, HostInfo};
use serde::Serialize;

use super::{or_dash, print_json};
use crate::cli::args::DoctorArgs;
use crate::cli::context::Context;
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Debug, Serialize)]
struct DoctorReport {
    mrbench_version: &'static str,
    host: HostInfo,
    providers: Vec<ProviderStatus>,
}

#[derive(Debug, Serialize)]
struct ProviderStatus {
    name: String,
    display_name: String,
    detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    binary_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    auth_status: AuthStatus,
    trusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DoctorReport {
    fn detected(&self) -> usize {
        self.providers.iter().filter(|p| p.detected).count()
    }
}

pub async fn run(ctx: &Context, args: DoctorArgs) -> anyhow::Result<i32> {
    let registry = ctx.registry();
    let providers = registry
        .detect_all()
        .await
        .into_iter()
        .map(|det| ProviderStatus {
            display_name: registry
                .get(&det.provider)
                .map_or_else(|| det.provider.clone(), |a| a.display_name().to_string()),
            name: det.provider,
            detected: det.result.detected,
            binary_path: det.result.binary_path,
            version: det.result.version,
            auth_status: det.result.auth_status,
            trusted: det.result.trusted,
            error: det.result.error,
        })
        .collect();
    let report = DoctorReport {
        mrbench_version: env!("CARGO_PKG_VERSION"),
        host: HostInfo::current(),
        providers,
    };

    if args.json {
        print_json(&report)?;
        return Ok(EXIT_SUCCESS);
    }

    println!("mrbench {}", report.mrbench_version);
    println!(
        "Host: {} ({}/{}, kernel {})",
        report.host.hostname,
        report.host.os,
        report.host.arch,
        or_dash(report.host.kernel.as_deref())
    );
    println!();
    println!(
        "{:<18} {:<10} {:<12} {:<15} PATH",
        "PROVIDER", "STATUS", "VERSION", "AUTH"
    );
    for p in &report.providers {
        let (status, auth, path) = if p.detected {
            (
                "detected",
                p.auth_status.as_str(),
                or_dash(p.binary_path.as_ref().map(|b| b.display())),
            )
        } else {
            ("not found", "-", or_dash(p.error.as_deref()))
        };
        println!(
            "{:<18} {:<10} {:<12} {:<15} {}",
            p.display_name,
            status,
            or_dash(p.version.as_deref()),
            auth,
            path
        );
    }
    println!();

    let detected = report.detected();
    if detected == 0 {
        println!("No providers detected. Install Ollama or another AI CLI to get started:");
        println!("  Ollama:      https://ollama.com/download");
        println!("  Claude Code: npm install -g @anthropic-ai/claude-code");
        println!("  Gemini CLI:  npm install -g @google/gemini-cli");
    } else {
        println!("{detected}/{} providers available", report.providers.len());
    }
    Ok(EXIT_SUCCESS)
}
