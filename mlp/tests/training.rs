use std::num::NonZeroUsize;

use engine::{Context, EngineConfig};
use mlp::{
    DatasetConfig, MnistTrainer, TrainerConfig,
    data::{DigitSet, prepare},
};
use rand::{SeedableRng, rngs::StdRng};

fn config() -> TrainerConfig {
    TrainerConfig {
        num_epochs: 3,
        mb_size: NonZeroUsize::new(32),
        hidden: NonZeroUsize::new(64),
        eps_w: 0.1,
        eps_b: 0.1,
        report_every: NonZeroUsize::new(5).unwrap(),
        dataset: DatasetConfig {
            train_per_digit: 40,
            test_per_digit: 10,
            seed: 11,
        },
    }
}

#[test]
fn training_lowers_the_test_error() -> mlp::Result<()> {
    let ctx = Context::new(EngineConfig::default().with_seed(17).with_tile_size(1 << 13))?;
    let config = config();

    let mut rng = StdRng::seed_from_u64(config.dataset.seed);
    let set = DigitSet::synthetic(&mut rng, 40, 10);

    let mut trainer = MnistTrainer::new(&ctx, config)?;
    let (train, test) = prepare(&ctx, &set, trainer.mb_size(), &mut rng)?;
    assert_eq!(train.len(), 13);

    let before = trainer.evaluate_test(&test)?;
    let report = trainer.run(&train)?;
    let after = trainer.evaluate_test(&test)?;

    assert_eq!(report.steps, 39);
    assert_eq!(report.errors.len(), 7);
    assert!(after < before, "test error went from {before} to {after}");
    assert!(after < 0.5, "test error stayed at {after}");
    Ok(())
}

#[test]
fn same_seed_same_run() -> mlp::Result<()> {
    let run = || -> mlp::Result<f32> {
        let ctx = Context::new(EngineConfig::default().with_seed(3).with_workers(2))?;
        let config = TrainerConfig {
            num_epochs: 1,
            ..config()
        };
        let (_, test_error) = mlp::run(&ctx, config)?;
        Ok(test_error)
    };

    assert_eq!(run()?, run()?);
    Ok(())
}
