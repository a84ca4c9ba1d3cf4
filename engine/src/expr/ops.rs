use ndarray::{ArrayView1, ArrayViewD, Dimension};

use crate::extent::{TileExtent, ravelled_pos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Abs,
}

impl UnaryOp {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Abs => "abs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    /// `1.0` where `lhs > rhs`, `0.0` elsewhere.
    Greater,
}

impl BinaryOp {
    pub fn apply(self, x: f32, y: f32) -> f32 {
        match self {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Maximum => x.max(y),
            BinaryOp::Minimum => x.min(y),
            BinaryOp::Greater => f32::from(u8::from(x > y)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Greater => "greater",
        }
    }

    /// The value `v` such that `x op v == x` for every `x`, if any.
    pub fn right_identity(self) -> Option<f32> {
        match self {
            BinaryOp::Add | BinaryOp::Sub => Some(0.0),
            BinaryOp::Mul | BinaryOp::Div => Some(1.0),
            _ => None,
        }
    }

    /// The value `v` such that `v op x == x` for every `x`, if any.
    pub fn left_identity(self) -> Option<f32> {
        match self {
            BinaryOp::Add => Some(0.0),
            BinaryOp::Mul => Some(1.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    Mean,
    /// Population standard deviation.
    Std,
    /// Position of the first maximum.
    Argmax,
    CountNonzero,
}

/// What a tile contributes to a whole-array reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Partial {
    Sum(f64),
    Max(f32),
    Min(f32),
    Moments { n: usize, mean: f64, m2: f64 },
    Argmax { value: f32, pos: usize },
    Count(usize),
}

impl ReduceOp {
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
            ReduceOp::Mean => "mean",
            ReduceOp::Std => "std",
            ReduceOp::Argmax => "argmax",
            ReduceOp::CountNonzero => "count_nonzero",
        }
    }

    /// Whether reducing nothing is undefined.
    pub fn needs_elements(self) -> bool {
        !matches!(self, ReduceOp::Sum | ReduceOp::CountNonzero)
    }

    /// Reduces a single lane, `Argmax` yields the position within the lane.
    pub fn lane(self, lane: ArrayView1<f32>) -> f32 {
        match self {
            ReduceOp::Sum => lane.iter().map(|&x| f64::from(x)).sum::<f64>() as f32,
            ReduceOp::Max => lane.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            ReduceOp::Min => lane.iter().copied().fold(f32::INFINITY, f32::min),
            ReduceOp::CountNonzero => lane.iter().filter(|&&x| x != 0.0).count() as f32,
            ReduceOp::Argmax => {
                let mut best = (f32::NEG_INFINITY, 0);
                for (i, &x) in lane.iter().enumerate() {
                    if x > best.0 {
                        best = (x, i);
                    }
                }
                best.1 as f32
            }
            ReduceOp::Mean | ReduceOp::Std => {
                let moments = lane
                    .iter()
                    .fold(Partial::empty_moments(), |acc, &x| acc.push_moment(x));
                self.finish(moments)
            }
        }
    }

    /// Reduces a whole tile into a partial result.
    ///
    /// # Arguments
    /// * `data` - The tile's data.
    /// * `extent` - Where the tile lives, needed to report global positions.
    pub fn partial(self, data: ArrayViewD<f32>, extent: &TileExtent) -> Partial {
        match self {
            ReduceOp::Sum => Partial::Sum(data.iter().map(|&x| f64::from(x)).sum()),
            ReduceOp::Max => Partial::Max(data.iter().copied().fold(f32::NEG_INFINITY, f32::max)),
            ReduceOp::Min => Partial::Min(data.iter().copied().fold(f32::INFINITY, f32::min)),
            ReduceOp::CountNonzero => Partial::Count(data.iter().filter(|&&x| x != 0.0).count()),
            ReduceOp::Mean | ReduceOp::Std => data
                .iter()
                .fold(Partial::empty_moments(), |acc, &x| acc.push_moment(x)),
            ReduceOp::Argmax => {
                // NaN never wins, a tile without a comparable value points at its first element
                let mut best = Partial::Argmax {
                    value: f32::NEG_INFINITY,
                    pos: extent.ravelled_pos(),
                };

                for (idx, &x) in data.indexed_iter() {
                    let global: Vec<usize> = idx
                        .slice()
                        .iter()
                        .zip(extent.ul())
                        .map(|(i, u)| i + u)
                        .collect();
                    let pos = ravelled_pos(&global, extent.array_shape());
                    best = combine(best, Partial::Argmax { value: x, pos });
                }

                best
            }
        }
    }

    /// Turns a combined partial into the reduced value.
    pub fn finish(self, partial: Partial) -> f32 {
        match (self, partial) {
            (ReduceOp::Std, Partial::Moments { n, m2, .. }) if n > 0 => (m2 / n as f64).sqrt() as f32,
            (_, Partial::Moments { n, mean, .. }) if n > 0 => mean as f32,
            (_, Partial::Moments { .. }) => f32::NAN,
            (_, Partial::Sum(s)) => s as f32,
            (_, Partial::Max(v)) | (_, Partial::Min(v)) => v,
            (_, Partial::Argmax { pos, .. }) => pos as f32,
            (_, Partial::Count(c)) => c as f32,
        }
    }
}

impl Partial {
    fn empty_moments() -> Self {
        Partial::Moments {
            n: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Welford update with a new observation.
    fn push_moment(self, x: f32) -> Self {
        let Partial::Moments { n, mean, m2 } = self else {
            return self;
        };

        let x = f64::from(x);
        let n = n + 1;
        let delta = x - mean;
        let mean = mean + delta / n as f64;
        let m2 = m2 + delta * (x - mean);
        Partial::Moments { n, mean, m2 }
    }
}

/// Merges two partial results of the same reduction.
pub fn combine(a: Partial, b: Partial) -> Partial {
    match (a, b) {
        (Partial::Sum(x), Partial::Sum(y)) => Partial::Sum(x + y),
        (Partial::Max(x), Partial::Max(y)) => Partial::Max(x.max(y)),
        (Partial::Min(x), Partial::Min(y)) => Partial::Min(x.min(y)),
        (Partial::Count(x), Partial::Count(y)) => Partial::Count(x + y),
        (
            Partial::Argmax {
                value: va,
                pos: pa,
            },
            Partial::Argmax {
                value: vb,
                pos: pb,
            },
        ) => {
            if vb > va || (vb == va && pb < pa) {
                Partial::Argmax { value: vb, pos: pb }
            } else {
                Partial::Argmax { value: va, pos: pa }
            }
        }
        (
            Partial::Moments {
                n: na,
                mean: ma,
                m2: m2a,
            },
            Partial::Moments {
                n: nb,
                mean: mb,
                m2: m2b,
            },
        ) => {
            if na == 0 {
                return b;
            }
            if nb == 0 {
                return a;
            }

            let n = na + nb;
            let delta = mb - ma;
            let mean = ma + delta * nb as f64 / n as f64;
            let m2 = m2a + m2b + delta * delta * (na as f64 * nb as f64) / n as f64;
            Partial::Moments { n, mean, m2 }
        }
        // partials of a single reduction always agree
        (a, _) => a,
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, ArrayD, IxDyn, arr1};

    use super::*;

    #[test]
    fn greater_is_a_mask() {
        assert_eq!(BinaryOp::Greater.apply(2.0, 0.0), 1.0);
        assert_eq!(BinaryOp::Greater.apply(0.0, 0.0), 0.0);
        assert_eq!(BinaryOp::Greater.apply(-1.0, 0.0), 0.0);
    }

    #[test]
    fn argmax_takes_the_first_maximum() {
        let lane = arr1(&[1.0, 3.0, 3.0, 2.0]);
        assert_eq!(ReduceOp::Argmax.lane(lane.view()), 1.0);
    }

    #[test]
    fn moments_combine_like_a_single_pass() {
        let xs: Array1<f32> = (0..10).map(|i| (i * i) as f32).collect();
        let whole = ReduceOp::Std.lane(xs.view());

        let split = |r: std::ops::Range<usize>| {
            let data = ArrayD::from_shape_vec(IxDyn(&[r.len()]), xs.as_slice().unwrap()[r.clone()].to_vec())
                .unwrap();
            let extent = TileExtent::new(vec![r.start], vec![r.end], vec![10]).unwrap();
            ReduceOp::Std.partial(data.view(), &extent)
        };

        let combined = combine(split(0..3), split(3..10));
        assert!((ReduceOp::Std.finish(combined) - whole).abs() < 1e-4);
    }

    #[test]
    fn argmax_partials_keep_global_positions() {
        let a = Partial::Argmax { value: 5.0, pos: 7 };
        let b = Partial::Argmax { value: 5.0, pos: 3 };
        assert_eq!(combine(a, b), Partial::Argmax { value: 5.0, pos: 3 });
    }

    #[test]
    fn argmax_of_nan_tiles_points_at_the_first_element() {
        let data = ArrayD::from_elem(IxDyn(&[2, 2]), f32::NAN);
        let first = TileExtent::new(vec![0, 0], vec![2, 2], vec![4, 2]).unwrap();
        let second = TileExtent::new(vec![2, 0], vec![4, 2], vec![4, 2]).unwrap();

        let combined = combine(
            ReduceOp::Argmax.partial(data.view(), &first),
            ReduceOp::Argmax.partial(data.view(), &second),
        );
        assert_eq!(ReduceOp::Argmax.finish(combined), 0.0);

        let lane = arr1(&[f32::NAN; 4]);
        assert_eq!(ReduceOp::Argmax.lane(lane.view()), 0.0);
    }

    #[test]
    fn mean_of_nothing_is_nan() {
        let empty: Array1<f32> = Array1::zeros(0);
        assert!(ReduceOp::Mean.lane(empty.view()).is_nan());
        assert_eq!(ReduceOp::Sum.lane(empty.view()), 0.0);
    }
}
