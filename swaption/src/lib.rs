//! Monte Carlo pricing of European payer swaptions under the LIBOR market model, on top of the
//! tiled array engine.

pub mod config;
mod error;
pub mod lmm;
pub mod pricer;

use engine::Context;

pub use config::{PricerConfig, Product};
pub use error::{Result, SwaptionErr};
pub use pricer::{Curves, Pricer, Quote};

/// Prices every product described by `config`.
pub fn run(ctx: &Context, config: PricerConfig) -> Result<Vec<Quote>> {
    Pricer::new(ctx, config)?.price_all()
}
