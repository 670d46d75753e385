use mrbench_core::adapters::AdapterCapabilities;
use serde::Serialize;

use super::print_json;
use crate::cli::args::ProvidersArgs;
use crate::cli::context::Context;
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Serialize)]
struct ProviderLine {
    name: String,
    display_name: String,
    capabilities: AdapterCapabilities,
}

pub fn run(ctx: &Context, args: ProvidersArgs) -> anyhow::Result<i32> {
    let registry = ctx.registry();
    let lines: Vec<ProviderLine> = registry
        .list_all()
        .map(|a| ProviderLine {
            name: a.name().to_string(),
            display_name: a.display_name().to_string(),
            capabilities: a.capabilities(),
        })
        .collect();

    if args.json {
        print_json(&lines)?;
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "{:<10} {:<18} {:<9} {:<7} {:<7}",
        "PROVIDER", "NAME", "STREAMING", "TOOLS", "OFFLINE"
    );
    for line in &lines {
        let caps = &line.capabilities;
        println!(
            "{:<10} {:<18} {:<9} {:<7} {:<7}",
            line.name,
            line.display_name,
            yes_no(caps.streaming),
            yes_no(caps.tool_calling),
            yes_no(caps.offline)
        );
    }
    Ok(EXIT_SUCCESS)
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
