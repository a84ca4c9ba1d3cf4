use std::{env, io, process};

use engine::Context;
use log::info;
use mlp::TrainerConfig;
use swaption::PricerConfig;

fn main() -> io::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <mlp|swaption> [config.json]", args[0]);
        process::exit(1);
    }

    let mode = &args[1];
    let config_path = args.get(2);

    let ctx = Context::from_env().map_err(io::Error::other)?;
    info!("running with {} workers", ctx.num_workers());

    match mode.as_str() {
        "mlp" => {
            let config = match config_path {
                Some(path) => TrainerConfig::from_file(path)?,
                None => TrainerConfig::default(),
            };

            let (report, test_error) = mlp::run(&ctx, config)?;
            info!(
                "trained {} steps in {:.3}s, test error {test_error}",
                report.steps,
                report.elapsed.as_secs_f64()
            );
        }
        "swaption" => {
            let config = match config_path {
                Some(path) => PricerConfig::from_file(path)?,
                None => PricerConfig::default(),
            };

            let quotes = swaption::run(&ctx, config)?;
            println!("{}", serde_json::to_string_pretty(&quotes)?);
        }
        _ => {
            eprintln!("Unknown mode: {mode}. You must use 'mlp' or 'swaption'.");
            process::exit(1);
        }
    }

    Ok(())
}
