use std::time::{Duration, Instant};

use engine::{Context, Expr, evaluate_all};
use log::{debug, info};

use crate::{
    Result, TrainerConfig,
    data::{Minibatch, NUM_CLASSES, NUM_PIXELS},
    network::{self, Weights},
};

/// What a training run went through.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs: usize,
    pub steps: usize,
    /// `(step, training error)` pairs, one per report.
    pub errors: Vec<(usize, f32)>,
    pub elapsed: Duration,
}

/// Trains a 784-hidden-10 perceptron with plain minibatch gradient descent.
pub struct MnistTrainer<'a> {
    ctx: &'a Context,
    config: TrainerConfig,
    mb_size: usize,
    weights: Weights,
}

impl<'a> MnistTrainer<'a> {
    /// Creates a new `MnistTrainer` with freshly initialized weights.
    ///
    /// # Arguments
    /// * `ctx` - The engine context the training runs on.
    /// * `config` - The hyperparameters.
    pub fn new(ctx: &'a Context, config: TrainerConfig) -> Result<Self> {
        config.validate()?;

        let mb_size = config.mb_size(ctx.num_workers());
        let hidden = config.hidden(mb_size);
        let weights = Weights::init(ctx, NUM_PIXELS, hidden, NUM_CLASSES)?;

        debug!(mb_size = mb_size, hidden = hidden; "trainer initialized");
        Ok(Self {
            ctx,
            config,
            mb_size,
            weights,
        })
    }

    /// Samples per minibatch.
    pub fn mb_size(&self) -> usize {
        self.mb_size
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Runs `num_epochs` passes over `minibatches`, reporting the training error every
    /// `report_every` steps.
    pub fn run(&mut self, minibatches: &[Minibatch]) -> Result<TrainReport> {
        let report_every = self.config.report_every.get();
        let begin = Instant::now();

        let mut count = 1;
        let mut errors = Vec::new();

        for epoch in 0..self.config.num_epochs {
            info!("---start epoch #{epoch}");

            for mb in minibatches {
                if let Some(err) = self.step(mb, count % report_every == 0)? {
                    info!("training error: {err}");
                    errors.push((count, err));
                }

                count += 1;
            }

            info!("spent {:.3}s", begin.elapsed().as_secs_f64());
        }

        Ok(TrainReport {
            epochs: self.config.num_epochs,
            steps: count - 1,
            errors,
            elapsed: begin.elapsed(),
        })
    }

    /// A single forward, backward and update, returning the training error when `report` is set.
    fn step(&mut self, mb: &Minibatch, report: bool) -> Result<Option<f32>> {
        let samples = Expr::from(&mb.samples);
        let target = Expr::from(&mb.labels).t();

        let fwd = network::forward(&self.weights, &samples)?;
        let grads = network::backward(&self.weights, &fwd, &target)?;

        let err = if report {
            evaluate_all(self.ctx, &[fwd.a2.clone(), fwd.out.clone()])?;
            Some(network::training_error(self.ctx, &fwd.out, &target)?)
        } else {
            None
        };

        self.weights = network::sgd_step(
            self.ctx,
            &self.weights,
            &grads,
            self.config.eps_w,
            self.config.eps_b,
        )?;

        Ok(err)
    }

    /// Classification error of the current weights on held out samples.
    pub fn evaluate_test(&self, test: &Minibatch) -> Result<f32> {
        let samples = Expr::from(&test.samples);
        let target = Expr::from(&test.labels).t();

        let fwd = network::forward(&self.weights, &samples)?;
        let err = network::training_error(self.ctx, &fwd.out, &target)?;

        info!("testing error: {err}");
        Ok(err)
    }
}
