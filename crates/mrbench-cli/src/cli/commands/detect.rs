use mrbench_core::adapters::ProviderDetection;
use mrbench_core::storage::CapabilitySnapshot;

use super::{or_dash, print_json};
use crate::cli::args::DetectArgs;
use crate::cli::context::Context;
use crate::exit_codes::EXIT_SUCCESS;

pub async fn run(ctx: &Context, args: DetectArgs) -> anyhow::Result<i32> {
    let registry = ctx.registry();
    let detections = registry.detect_all().await;

    if args.save {
        let store = ctx.open_store()?;
        let mut saved = 0usize;
        for det in detections.iter().filter(|d| d.result.detected) {
            let adapter = registry.require(&det.provider)?;
            let snapshot = CapabilitySnapshot {
                provider: det.provider.clone(),
                binary_path: det
                    .result
                    .binary_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                binary_version: det.result.version.clone(),
                auth_status: det.result.auth_status,
                models: adapter.list_models().await,
                features: serde_json::to_value(adapter.capabilities())?,
                detected_at: None,
            };
            store.save_capabilities(&snapshot)?;
            saved += 1;
        }
        tracing::info!(saved, "capability snapshots stored");
    }

    if args.json {
        print_json(&detections)?;
    } else {
        print_table(&detections);
    }
    Ok(EXIT_SUCCESS)
}

fn print_table(detections: &[ProviderDetection]) {
    println!(
        "{:<10} {:<9} {:<12} {:<15} PATH",
        "PROVIDER", "DETECTED", "VERSION", "AUTH"
    );
    for det in detections {
        let r = &det.result;
        let path = match (&r.binary_path, &r.error) {
            (Some(p), _) => p.display().to_string(),
            (None, Some(e)) => format!("({e})"),
            (None, None) => "-".to_string(),
        };
        println!(
            "{:<10} {:<9} {:<12} {:<15} {}",
            det.provider,
            if r.detected { "yes" } else { "no" },
            or_dash(r.version.as_deref()),
            r.auth_status.as_str(),
            path
        );
    }
}
