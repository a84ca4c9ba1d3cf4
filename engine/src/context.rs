use log::debug;
use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{DistArray, EngineConfig, EngineErr, Expr, Result};

/// The engine runtime: a worker pool executing tile computations and the random number
/// generator behind `randn`.
pub struct Context {
    config: EngineConfig,
    pool: ThreadPool,
    rng: Mutex<StdRng>,
}

impl Context {
    /// Creates a new `Context`.
    ///
    /// # Arguments
    /// * `config` - The execution bounds.
    ///
    /// # Returns
    /// An error if the worker pool can't be spawned.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let workers = config.num_workers.get();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("engine-worker-{i}"))
            .build()
            .map_err(|e| EngineErr::ThreadPool(e.to_string()))?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        debug!(
            workers = workers,
            tile_size = config.tile_size.get();
            "engine context initialized"
        );

        Ok(Self {
            config,
            pool,
            rng: Mutex::new(rng),
        })
    }

    /// Creates a new `Context` configured from the `ENGINE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(EngineConfig::from_env()?)
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers.get()
    }

    /// The maximum amount of elements per tile.
    pub fn tile_size(&self) -> usize {
        self.config.tile_size.get()
    }

    /// Runs `f` inside the worker pool, parallel iterators in `f` use the pool's workers.
    pub fn install<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.pool.install(f)
    }

    /// Samples an array of standard normal values.
    ///
    /// # Arguments
    /// * `shape` - The shape of the array.
    pub fn randn(&self, shape: &[usize]) -> Expr {
        let data = {
            let mut rng = self.rng.lock();
            ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.sample::<f32, _>(StandardNormal))
        };

        Expr::from(DistArray::from_array(self, data))
    }
}
