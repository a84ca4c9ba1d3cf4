use std::{fs, num::NonZeroUsize, path::Path};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{MlpErr, Result};

/// Minibatch size used with a single worker, it grows with the square root of the workers.
pub const BASE_MB_SIZE: usize = 256;

/// Where the training samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Training samples generated per digit.
    pub train_per_digit: usize,
    /// Test samples generated per digit.
    pub test_per_digit: usize,
    /// Seed for generating and shuffling the samples.
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            train_per_digit: 5000,
            test_per_digit: 500,
            seed: 7,
        }
    }
}

/// The trainer's hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub num_epochs: usize,
    /// Samples per minibatch, `256·√num_workers` when unset.
    pub mb_size: Option<NonZeroUsize>,
    /// Hidden layer width, the minibatch size when unset.
    pub hidden: Option<NonZeroUsize>,
    /// Learning rate of the weights.
    pub eps_w: f32,
    /// Learning rate of the biases.
    pub eps_b: f32,
    /// Steps between training error reports.
    pub report_every: NonZeroUsize,
    pub dataset: DatasetConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_epochs: 1,
            mb_size: None,
            hidden: None,
            eps_w: 0.01,
            eps_b: 0.01,
            report_every: NonZeroUsize::new(40).unwrap_or(NonZeroUsize::MIN),
            dataset: DatasetConfig::default(),
        }
    }
}

impl TrainerConfig {
    /// Reads a config from a JSON file, missing fields take their default value.
    ///
    /// # Arguments
    /// * `path` - The file's path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| MlpErr::Config(format!("cannot read '{}': {e}", path.display())))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| MlpErr::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the learning rates are usable.
    pub fn validate(&self) -> Result<()> {
        for (name, eps) in [("eps_w", self.eps_w), ("eps_b", self.eps_b)] {
            if !eps.is_finite() || eps <= 0.0 {
                return Err(MlpErr::Config(format!("{name} must be positive, got {eps}")));
            }
        }

        Ok(())
    }

    /// The minibatch size for a given amount of workers.
    pub fn mb_size(&self, num_workers: usize) -> usize {
        match self.mb_size {
            Some(mb_size) => mb_size.get(),
            None => (BASE_MB_SIZE as f64 * (num_workers as f64).sqrt()) as usize,
        }
    }

    /// The hidden layer width given the minibatch size.
    pub fn hidden(&self, mb_size: usize) -> usize {
        match self.hidden {
            Some(hidden) if hidden.get() != mb_size => {
                warn!(hidden = hidden.get(), mb_size = mb_size; "hidden layer size overridden");
                hidden.get()
            }
            Some(hidden) => hidden.get(),
            None => mb_size,
        }
    }
}
