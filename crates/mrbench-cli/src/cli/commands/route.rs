use mrbench_core::routing::{RoutingConstraints, RoutingTrace};
use mrbench_core::Router;
use serde_json::json;

use super::print_json;
use crate::cli::args::RouteArgs;
use crate::cli::context::Context;
use crate::exit_codes::{EXIT_NO_PROVIDER, EXIT_SUCCESS};

pub async fn run(ctx: &Context, args: RouteArgs) -> anyhow::Result<i32> {
    let registry = ctx.registry();
    let store = ctx.open_store()?;
    let detections = registry.detect_all().await;

    let policy = args.policy.unwrap_or(ctx.config.routing.default_policy);
    let constraints = merge_constraints(&ctx.config.routing.constraints, &args);
    let router = Router::from_config(&registry, &ctx.config).with_history(&store);

    let trace = router.explain(&detections, policy, &constraints);
    if args.explain && !args.json {
        print_trace(&trace);
    }

    match router.route(&detections, policy, &constraints, None).await {
        Ok(decision) => {
            if args.json {
                print_json(&decision)?;
            } else {
                println!("{} {}", decision.provider, decision.model);
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e) if e.is_preflight() => {
            if args.json {
                print_json(&json!({ "provider": null, "model": null, "trace": trace }))?;
            }
            eprintln!("error: {e}");
            Ok(EXIT_NO_PROVIDER)
        }
        Err(e) => Err(e.into()),
    }
}

/// Command-line flags tighten the configured constraints; `--max-latency-ms` replaces the limit.
fn merge_constraints(configured: &RoutingConstraints, args: &RouteArgs) -> RoutingConstraints {
    let mut c = configured.clone();
    c.offline_only |= args.offline_only;
    c.streaming_required |= args.streaming_required;
    if args.max_latency_ms.is_some() {
        c.max_latency_ms = args.max_latency_ms;
    }
    c
}

fn print_trace(trace: &RoutingTrace) {
    println!("policy: {}", trace.policy);
    if trace.ordered.is_empty() {
        println!("candidates: none");
    } else {
        println!("candidates:");
        for (i, c) in trace.ordered.iter().enumerate() {
            match c.metric {
                Some(m) => println!("  {}. {} (best {:.1})", i + 1, c.provider, m),
                None => println!("  {}. {}", i + 1, c.provider),
            }
        }
    }
    if !trace.excluded.is_empty() {
        println!("excluded:");
        for e in &trace.excluded {
            println!("  - {}: {}", e.provider, e.exclusion);
        }
    }
}
