//! A tiled, lazily evaluated array engine.
//!
//! Arrays are split in tiles of bounded size and expressions over them are built as immutable
//! graphs. Evaluating a graph computes every output tile in parallel on the `Context`'s worker
//! pool, fetching from each input only the region a tile needs.

mod array;
mod collector;
mod config;
mod context;
mod error;
pub mod expr;
pub mod extent;
pub mod tiling;

pub use array::{DistArray, Tile};
pub use collector::RowCollector;
pub use config::{EngineConfig, SEED_VAR, TILE_SIZE_VAR, WORKERS_VAR};
pub use context::Context;
pub use error::{EngineErr, Result};
pub use expr::{
    Expr, Index, IntoExpr, arange, arange_range, assign, concatenate, dot, evaluate_all, full,
    maximum, ones, zeros,
};
