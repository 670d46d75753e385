use super::{or_dash, print_json};
use crate::cli::args::RunsArgs;
use crate::cli::context::Context;
use crate::exit_codes::EXIT_SUCCESS;

pub fn run(ctx: &Context, args: RunsArgs) -> anyhow::Result<i32> {
    let store = ctx.open_store()?;
    let runs = store.list_runs(args.limit)?;

    if args.json {
        print_json(&runs)?;
        return Ok(EXIT_SUCCESS);
    }
    if runs.is_empty() {
        eprintln!("no runs recorded in {}", ctx.db_path().display());
        return Ok(EXIT_SUCCESS);
    }

    println!("{:<36}  {:<9}  {:<24}  SUITE", "RUN", "STATUS", "STARTED");
    for run in &runs {
        println!(
            "{:<36}  {:<9}  {:<24}  {}",
            run.id,
            run.status.as_str(),
            run.created_at,
            or_dash(run.suite_path.as_deref())
        );
    }
    Ok(EXIT_SUCCESS)
}
