use engine::{Context, DistArray};
use log::info;
use ndarray::{Array2, ArrayView2, Axis, concatenate, s};
use rand::{Rng, seq::SliceRandom};
use rand_distr::StandardNormal;

use crate::{MlpErr, Result};

/// Pixels in a digit image.
pub const NUM_PIXELS: usize = 784;
/// Amount of digit classes.
pub const NUM_CLASSES: usize = 10;

/// Standard deviation of the pixel noise in synthetic samples.
const NOISE: f32 = 40.0;

/// Raw digit samples: one `[n, 784]` array of `u8` intensities per digit, for training and for
/// testing.
#[derive(Debug, Clone)]
pub struct DigitSet {
    train: Vec<Array2<u8>>,
    test: Vec<Array2<u8>>,
}

impl DigitSet {
    /// Creates a new `DigitSet`.
    ///
    /// # Arguments
    /// * `train` - The training samples, indexed by digit.
    /// * `test` - The test samples, indexed by digit.
    ///
    /// # Returns
    /// An error if there aren't exactly 10 digits or a sample isn't 784 pixels long.
    pub fn new(train: Vec<Array2<u8>>, test: Vec<Array2<u8>>) -> Result<Self> {
        for (prefix, set) in [("train", &train), ("test", &test)] {
            if set.len() != NUM_CLASSES {
                return Err(MlpErr::Data(format!(
                    "expected {NUM_CLASSES} {prefix} digits, got {}",
                    set.len()
                )));
            }

            if let Some(dig) = set.iter().position(|s| s.ncols() != NUM_PIXELS) {
                return Err(MlpErr::Data(format!(
                    "{prefix}{dig} samples have {} pixels instead of {NUM_PIXELS}",
                    set[dig].ncols()
                )));
            }
        }

        Ok(Self { train, test })
    }

    /// Generates a learnable stand-in for MNIST: every digit has a random prototype image and
    /// its samples are noisy copies of it.
    ///
    /// # Arguments
    /// * `rng` - The source of randomness, the same seed yields the same set.
    /// * `train_per_digit` - Training samples per digit.
    /// * `test_per_digit` - Test samples per digit.
    pub fn synthetic<R: Rng>(rng: &mut R, train_per_digit: usize, test_per_digit: usize) -> Self {
        let prototypes: Vec<Vec<f32>> = (0..NUM_CLASSES)
            .map(|_| {
                (0..NUM_PIXELS)
                    .map(|_| if rng.random_bool(0.2) { 220.0 } else { 10.0 })
                    .collect()
            })
            .collect();

        let mut samples = |n: usize, proto: &[f32]| {
            Array2::from_shape_fn((n, NUM_PIXELS), |(_, p)| {
                let noise: f32 = rng.sample(StandardNormal);
                (proto[p] + NOISE * noise).clamp(0.0, 255.0) as u8
            })
        };

        let train = prototypes.iter().map(|p| samples(train_per_digit, p)).collect();
        let test = prototypes.iter().map(|p| samples(test_per_digit, p)).collect();
        Self { train, test }
    }

    /// Samples stored under `key`, `train0..train9` or `test0..test9`.
    pub fn get(&self, key: &str) -> Option<ArrayView2<'_, u8>> {
        let (set, digit) = match key.strip_prefix("train") {
            Some(digit) => (&self.train, digit),
            None => (&self.test, key.strip_prefix("test")?),
        };

        let digit: usize = digit.parse().ok()?;
        set.get(digit).map(|a| a.view())
    }
}

/// Builds the `[n, 785]` table of every `prefix` sample, pixels scaled to `[0, 1)` and the digit
/// appended as the last column.
///
/// # Arguments
/// * `prefix` - Either `train` or `test`.
/// * `set` - The raw samples.
pub fn extract(prefix: &str, set: &DigitSet) -> Result<Array2<f32>> {
    let parts = (0..NUM_CLASSES)
        .map(|dig| {
            let key = format!("{prefix}{dig}");
            let samples = set
                .get(&key)
                .ok_or_else(|| MlpErr::Data(format!("missing key {key}")))?;

            let mut table = Array2::from_elem((samples.nrows(), NUM_PIXELS + 1), dig as f32);
            table
                .slice_mut(s![.., ..NUM_PIXELS])
                .assign(&samples.mapv(|p| f32::from(p) / 256.0));
            Ok(table)
        })
        .collect::<Result<Vec<_>>>()?;

    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| MlpErr::Data(e.to_string()))
}

/// A training step's worth of samples.
#[derive(Debug, Clone)]
pub struct Minibatch {
    /// `[m, 784]`, one sample per row.
    pub samples: DistArray,
    /// `[m, 10]`, one-hot encoded digits.
    pub labels: DistArray,
}

impl Minibatch {
    /// Splits rows of an `extract` table into samples and one-hot labels.
    pub fn from_table(ctx: &Context, table: ArrayView2<f32>) -> Result<Self> {
        if table.ncols() != NUM_PIXELS + 1 {
            return Err(MlpErr::Data(format!(
                "expected {} columns, got {}",
                NUM_PIXELS + 1,
                table.ncols()
            )));
        }

        let samples = table.slice(s![.., ..NUM_PIXELS]).to_owned();
        let mut labels = Array2::<f32>::zeros((table.nrows(), NUM_CLASSES));

        for (i, &label) in table.column(NUM_PIXELS).iter().enumerate() {
            if label.fract() != 0.0 || !(0.0..NUM_CLASSES as f32).contains(&label) {
                return Err(MlpErr::Data(format!("row {i} has an invalid label {label}")));
            }

            labels[[i, label as usize]] = 1.0;
        }

        Ok(Self {
            samples: DistArray::from_array(ctx, samples.into_dyn()),
            labels: DistArray::from_array(ctx, labels.into_dyn()),
        })
    }

    /// Amount of samples.
    pub fn len(&self) -> usize {
        self.samples.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shuffles the rows of `table` and splits them into minibatches of `mb_size` rows, the last one
/// may be shorter.
pub fn split<R: Rng>(
    ctx: &Context,
    table: &Array2<f32>,
    mb_size: usize,
    rng: &mut R,
) -> Result<Vec<Minibatch>> {
    if mb_size == 0 {
        return Err(MlpErr::Config("minibatch size must be positive".into()));
    }

    let mut order: Vec<usize> = (0..table.nrows()).collect();
    order.shuffle(rng);
    let shuffled = table.select(Axis(0), &order);

    shuffled
        .axis_chunks_iter(Axis(0), mb_size)
        .map(|chunk| Minibatch::from_table(ctx, chunk))
        .collect()
}

/// Turns a digit set into shuffled training minibatches and a single test batch.
pub fn prepare<R: Rng>(
    ctx: &Context,
    set: &DigitSet,
    mb_size: usize,
    rng: &mut R,
) -> Result<(Vec<Minibatch>, Minibatch)> {
    let train = split(ctx, &extract("train", set)?, mb_size, rng)?;
    let test = Minibatch::from_table(ctx, extract("test", set)?.view())?;

    info!("training data: {} mini-batches", train.len());
    info!("test data: {} samples", test.len());
    Ok((train, test))
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn ctx() -> Context {
        Context::new(engine::EngineConfig::default().with_tile_size(1 << 12)).unwrap()
    }

    #[test]
    fn extract_appends_labels() {
        let mut rng = StdRng::seed_from_u64(1);
        let set = DigitSet::synthetic(&mut rng, 3, 2);

        let table = extract("train", &set).unwrap();
        assert_eq!(table.dim(), (30, NUM_PIXELS + 1));
        assert_eq!(table[[0, NUM_PIXELS]], 0.0);
        assert_eq!(table[[29, NUM_PIXELS]], 9.0);
        assert!(table.slice(s![.., ..NUM_PIXELS]).iter().all(|&p| (0.0..1.0).contains(&p)));

        assert_eq!(extract("test", &set).unwrap().nrows(), 20);
        assert!(extract("valid", &set).is_err());
    }

    #[test]
    fn split_keeps_every_sample() {
        let ctx = ctx();
        let mut rng = StdRng::seed_from_u64(2);
        let set = DigitSet::synthetic(&mut rng, 5, 0);
        let table = extract("train", &set).unwrap();

        let batches = split(&ctx, &table, 16, &mut rng).unwrap();
        let sizes: Vec<usize> = batches.iter().map(Minibatch::len).collect();
        assert_eq!(sizes, vec![16, 16, 16, 2]);

        let labels: f32 = batches.iter().map(|b| b.labels.glom().sum()).sum();
        assert_eq!(labels, 50.0);
    }

    #[test]
    fn one_hot_labels() {
        let ctx = ctx();
        let mut table = Array2::<f32>::zeros((2, NUM_PIXELS + 1));
        table[[0, NUM_PIXELS]] = 3.0;
        table[[1, NUM_PIXELS]] = 9.0;

        let mb = Minibatch::from_table(&ctx, table.view()).unwrap();
        let labels = mb.labels.glom().into_dimensionality::<ndarray::Ix2>().unwrap();
        assert_eq!(labels[[0, 3]], 1.0);
        assert_eq!(labels[[1, 9]], 1.0);
        assert_eq!(labels.sum(), 2.0);

        table[[1, NUM_PIXELS]] = 10.0;
        assert!(Minibatch::from_table(&ctx, table.view()).is_err());
    }

    #[test]
    fn digit_set_validates_shapes() {
        let digits = |cols| vec![Array2::<u8>::zeros((1, cols)); NUM_CLASSES];
        assert!(DigitSet::new(digits(NUM_PIXELS), digits(NUM_PIXELS)).is_ok());
        assert!(DigitSet::new(digits(10), digits(NUM_PIXELS)).is_err());
        assert!(DigitSet::new(digits(NUM_PIXELS)[..9].to_vec(), digits(NUM_PIXELS)).is_err());
    }
}
