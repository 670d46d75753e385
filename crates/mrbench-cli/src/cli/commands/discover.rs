use mrbench_core::discovery::{
    check_tool_auth, home_dir, scan_known_tools, search_dirs, ToolBuckets, ToolInventory,
};
use mrbench_core::executor::Executor;
use serde::Serialize;

use super::{or_dash, print_json};
use crate::cli::args::DiscoverArgs;
use crate::cli::context::Context;
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Serialize)]
struct DiscoverReport<'a> {
    #[serde(flatten)]
    inventory: &'a ToolInventory,
    buckets: ToolBuckets,
}

pub async fn run(ctx: &Context, args: DiscoverArgs) -> anyhow::Result<i32> {
    let dirs = search_dirs(&ctx.config.discovery.extra_paths);
    let mut inventory = scan_known_tools(&dirs, home_dir().as_deref());
    if args.check_auth {
        check_tool_auth(&mut inventory, &Executor::new(), ctx.config.detect_timeout()).await;
    }
    let buckets = inventory.buckets();

    if args.json {
        print_json(&DiscoverReport {
            inventory: &inventory,
            buckets,
        })?;
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "Host: {} ({}/{})",
        inventory.host.hostname, inventory.host.os, inventory.host.arch
    );
    println!(
        "Found {} of {} known tools ({} configured, {} ready)",
        buckets.installed.len(),
        inventory.tools.len(),
        buckets.configured.len(),
        buckets.ready.len()
    );
    for tool in inventory.tools.iter().filter(|t| t.binary_path.is_some()) {
        let kind = if tool.offline { "offline" } else { "network" };
        println!(
            "  {:<12} {:<11} {:<8} {:<15} {}",
            tool.name,
            tool.status.as_str(),
            kind,
            tool.auth_status.map_or("-", |a| a.as_str()),
            or_dash(tool.binary_path.as_ref().map(|p| p.display())),
        );
        if let Some(config) = &tool.config_path {
            println!("  {:<12} config: {}", "", config.display());
        }
    }
    if !buckets.not_found.is_empty() {
        println!("Not found: {}", buckets.not_found.join(", "));
    }
    Ok(EXIT_SUCCESS)
}
