use super::print_json;
use crate::cli::args::ModelsArgs;
use crate::cli::context::Context;
use crate::exit_codes::EXIT_SUCCESS;

pub async fn run(ctx: &Context, args: ModelsArgs) -> anyhow::Result<i32> {
    let registry = ctx.registry();
    let adapter = registry.require(&args.provider)?;
    let models = adapter.list_models().await;

    if args.json {
        print_json(&models)?;
    } else if models.is_empty() {
        eprintln!("{}: no models reported", args.provider);
    } else {
        for model in &models {
            println!("{model}");
        }
    }
    Ok(EXIT_SUCCESS)
}
