use std::{env, io};

use engine::Context;
use log::info;
use swaption::PricerConfig;

fn main() -> io::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => PricerConfig::from_file(path)?,
        None => PricerConfig::default(),
    };

    let ctx = Context::from_env().map_err(io::Error::other)?;
    info!("running with {} workers", ctx.num_workers());

    let quotes = swaption::run(&ctx, config)?;
    println!("{}", serde_json::to_string_pretty(&quotes)?);

    Ok(())
}
