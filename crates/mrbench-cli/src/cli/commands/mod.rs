use super::args::*;
use super::context::Context;

pub mod bench;
pub mod detect;
pub mod discover;
pub mod doctor;
pub mod models;
pub mod providers;
pub mod report;
pub mod route;
pub mod run;
pub mod runs;

use crate::exit_codes::EXIT_SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    if let Command::Version = cli.cmd {
        println!("mrbench {}", env!("CARGO_PKG_VERSION"));
        return Ok(EXIT_SUCCESS);
    }

    let ctx = Context::load(&cli.global)?;
    match cli.cmd {
        Command::Detect(args) => detect::run(&ctx, args).await,
        Command::Providers(args) => providers::run(&ctx, args),
        Command::Models(args) => models::run(&ctx, args).await,
        Command::Discover(args) => discover::run(&ctx, args).await,
        Command::Doctor(args) => doctor::run(&ctx, args).await,
        Command::Route(args) => route::run(&ctx, args).await,
        Command::Run(args) => run::run(&ctx, args).await,
        Command::Bench(args) => bench::run(&ctx, args).await,
        Command::Report(args) => report::run(&ctx, args),
        Command::Runs(args) => runs::run(&ctx, args),
        Command::Version => Ok(EXIT_SUCCESS),
    }
}

/// Pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `-` for a missing value.
pub(crate) fn or_dash(value: Option<impl std::fmt::Display>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
