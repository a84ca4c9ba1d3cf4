//! A two layer perceptron trained on handwritten digits, on top of the tiled array engine.

pub mod config;
pub mod data;
mod error;
pub mod network;
pub mod trainer;

use engine::Context;
use rand::{SeedableRng, rngs::StdRng};

pub use config::{DatasetConfig, TrainerConfig};
pub use error::{MlpErr, Result};
pub use trainer::{MnistTrainer, TrainReport};

/// Generates the digit set described by `config`, trains on it and measures the test error.
///
/// # Returns
/// The training report and the final test error.
pub fn run(ctx: &Context, config: TrainerConfig) -> Result<(TrainReport, f32)> {
    let dataset = config.dataset;
    let mut rng = StdRng::seed_from_u64(dataset.seed);
    let set = data::DigitSet::synthetic(&mut rng, dataset.train_per_digit, dataset.test_per_digit);

    let mut trainer = MnistTrainer::new(ctx, config)?;
    let (train, test) = data::prepare(ctx, &set, trainer.mb_size(), &mut rng)?;

    let report = trainer.run(&train)?;
    let test_error = trainer.evaluate_test(&test)?;
    Ok((report, test_error))
}
