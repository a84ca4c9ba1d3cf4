use engine::{Context, DistArray, Expr, evaluate_all, zeros};

use crate::Result;

/// `x` where `x > 0`, `0` elsewhere.
pub fn relu(x: &Expr) -> Result<Expr> {
    Ok(x.gt(0.0)?.mul(x)?)
}

/// Backpropagates `grad` through a ReLU whose output was `act`.
///
/// The mask uses the activation instead of its input, both agree since `relu(x) > 0` iff `x > 0`.
pub fn relu_back(grad: &Expr, act: &Expr) -> Result<Expr> {
    Ok(act.gt(0.0)?.mul(grad)?)
}

/// Column-wise softmax, every column of the result sums to 1.
///
/// `exp(m - logsumexp(m))` with the column maximum taken out of the exponentials.
pub fn softmax(m: &Expr) -> Result<Expr> {
    let maxval = m.max(Some(0))?;
    let centered = m.sub(&maxval)?;
    let normalizer = centered.exp().sum(Some(0))?.log().add(&maxval)?;
    Ok(m.sub(&normalizer)?.exp())
}

/// The parameters of a 2-layer perceptron, always evaluated.
#[derive(Debug, Clone)]
pub struct Weights {
    /// `[hidden, inputs]`
    pub w1: Expr,
    /// `[hidden, 1]`
    pub b1: Expr,
    /// `[outputs, hidden]`
    pub w2: Expr,
    /// `[outputs, 1]`
    pub b2: Expr,
}

impl Weights {
    /// Initializes the weights with scaled standard normal samples and the biases with zeros.
    ///
    /// # Arguments
    /// * `ctx` - The engine context, provides the random samples.
    /// * `inputs` - Width of the input layer.
    /// * `hidden` - Width of the hidden layer.
    /// * `outputs` - Width of the output layer.
    pub fn init(ctx: &Context, inputs: usize, hidden: usize, outputs: usize) -> Result<Self> {
        let scale = |fan_in: usize, fan_out: usize| (4.0 / (fan_in + fan_out) as f32).sqrt();

        let w1 = ctx.randn(&[hidden, inputs]).mul(scale(inputs, hidden))?;
        let w2 = ctx.randn(&[outputs, hidden]).mul(scale(hidden, outputs))?;
        let b1 = zeros(&[hidden, 1]);
        let b2 = zeros(&[outputs, 1]);

        Self::evaluated(ctx, [w1, b1, w2, b2])
    }

    fn evaluated(ctx: &Context, exprs: [Expr; 4]) -> Result<Self> {
        let [w1, b1, w2, b2]: [DistArray; 4] = evaluate_all(ctx, &exprs)?
            .try_into()
            .map_err(|_| engine::EngineErr::InvalidArgument("expected four parameters"))?;

        Ok(Self {
            w1: w1.into(),
            b1: b1.into(),
            w2: w2.into(),
            b2: b2.into(),
        })
    }

    pub fn hidden(&self) -> usize {
        self.w1.shape()[0]
    }

    /// All parameters, in `w1, b1, w2, b2` order.
    pub fn to_vec(&self) -> Vec<Expr> {
        vec![
            self.w1.clone(),
            self.b1.clone(),
            self.w2.clone(),
            self.b2.clone(),
        ]
    }
}

/// The activations of a forward pass.
#[derive(Debug, Clone)]
pub struct Forward {
    /// The samples, one per column.
    pub a1: Expr,
    pub a2: Expr,
    /// Class probabilities, one column per sample.
    pub out: Expr,
}

impl Forward {
    /// Amount of samples.
    pub fn len(&self) -> usize {
        self.a1.shape()[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the forward pass over a `[n, inputs]` sample matrix.
pub fn forward(w: &Weights, samples: &Expr) -> Result<Forward> {
    let a1 = samples.t();
    let a2 = relu(&w.w1.dot(&a1)?.add(&w.b1)?)?;
    let a3 = w.w2.dot(&a2)?.add(&w.b2)?;
    let out = softmax(&a3)?;

    Ok(Forward { a1, a2, out })
}

/// Gradients of the cross entropy loss, shaped like the `Weights`.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub gw1: Expr,
    pub gb1: Expr,
    pub gw2: Expr,
    pub gb2: Expr,
}

/// Builds the backward pass.
///
/// # Arguments
/// * `w` - The weights the forward pass used.
/// * `fwd` - The forward pass.
/// * `target` - One-hot labels, one column per sample.
pub fn backward(w: &Weights, fwd: &Forward, target: &Expr) -> Result<Gradients> {
    let n = fwd.len() as f32;

    let s3 = fwd.out.sub(target)?;
    let s2 = relu_back(&w.w2.t().dot(&s3)?, &fwd.a2)?;

    let gw1 = s2.dot(fwd.a1.t())?.div(n)?;
    let gb1 = s2.sum(Some(1))?.div(n)?.reshape(&[s2.shape()[0], 1])?;
    let gw2 = s3.dot(fwd.a2.t())?.div(n)?;
    let gb2 = s3.sum(Some(1))?.div(n)?.reshape(&[s3.shape()[0], 1])?;

    Ok(Gradients { gw1, gb1, gw2, gb2 })
}

/// Takes a plain gradient descent step, returning the new weights.
///
/// The four updates are evaluated together so the passes they depend on run once.
pub fn sgd_step(ctx: &Context, w: &Weights, g: &Gradients, eps_w: f32, eps_b: f32) -> Result<Weights> {
    let w1 = w.w1.sub(g.gw1.mul(eps_w)?)?;
    let b1 = w.b1.sub(g.gb1.mul(eps_b)?)?;
    let w2 = w.w2.sub(g.gw2.mul(eps_w)?)?;
    let b2 = w.b2.sub(g.gb2.mul(eps_b)?)?;

    Weights::evaluated(ctx, [w1, b1, w2, b2])
}

/// Fraction of samples whose most likely class isn't the labelled one.
///
/// # Arguments
/// * `out` - Class scores, one column per sample.
/// * `target` - One-hot labels, one column per sample.
pub fn training_error(ctx: &Context, out: &Expr, target: &Expr) -> Result<f32> {
    let [_, n] = out.matrix_shape("training_error")?;
    if n == 0 {
        return Ok(0.0);
    }

    let wrong = out
        .argmax(Some(0))?
        .sub(target.argmax(Some(0))?)?
        .count_nonzero(None)?;

    Ok(wrong.scalar_value(ctx)? / n as f32)
}
