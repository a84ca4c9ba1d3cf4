use std::{env, io};

use engine::Context;
use log::info;
use mlp::TrainerConfig;

fn main() -> io::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => TrainerConfig::from_file(path)?,
        None => TrainerConfig::default(),
    };

    let ctx = Context::from_env().map_err(io::Error::other)?;
    info!("running with {} workers", ctx.num_workers());

    let (report, test_error) = mlp::run(&ctx, config)?;
    info!(
        "trained {} steps in {:.3}s, test error {test_error}",
        report.steps,
        report.elapsed.as_secs_f64()
    );

    Ok(())
}
