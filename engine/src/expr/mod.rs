//! Lazy array expressions.
//!
//! Building an expression only checks shapes, nothing is computed until `evaluate` (or `glom`)
//! is called on it.

mod eval;
mod ops;
mod optimize;

use std::{
    ops::{Range, RangeFrom, RangeFull},
    sync::{Arc, OnceLock},
};

use ndarray::ArrayD;

use crate::{Context, DistArray, EngineErr, Result};
use ops::{BinaryOp, ReduceOp, UnaryOp};

/// Selects part of an axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    /// A single position, the axis is dropped.
    At(usize),
    /// The last position, the axis is dropped.
    Last,
    Range(Range<usize>),
    From(usize),
    Full,
}

impl From<usize> for Index {
    fn from(i: usize) -> Self {
        Index::At(i)
    }
}

impl From<Range<usize>> for Index {
    fn from(r: Range<usize>) -> Self {
        Index::Range(r)
    }
}

impl From<RangeFrom<usize>> for Index {
    fn from(r: RangeFrom<usize>) -> Self {
        Index::From(r.start)
    }
}

impl From<RangeFull> for Index {
    fn from(_: RangeFull) -> Self {
        Index::Full
    }
}

/// An `Index` resolved against an axis length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AxisSel {
    pub start: usize,
    pub stop: usize,
    pub keep: bool,
}

pub(crate) enum Op {
    Value(DistArray),
    Fill(f32),
    Arange { start: f32, step: f32 },
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    Reduce(ReduceOp, Expr, Option<usize>),
    Dot(Expr, Expr),
    Transpose(Expr),
    Reshape(Expr),
    Index(Expr, Vec<AxisSel>),
    Concat(Expr, Expr, usize),
    Assign(Expr, Vec<AxisSel>, Expr),
    Fused(Expr),
}

impl Op {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Op::Value(_) => "value",
            Op::Fill(_) => "fill",
            Op::Arange { .. } => "arange",
            Op::Unary(op, _) => op.name(),
            Op::Binary(op, ..) => op.name(),
            Op::Reduce(op, ..) => op.name(),
            Op::Dot(..) => "dot",
            Op::Transpose(_) => "transpose",
            Op::Reshape(_) => "reshape",
            Op::Index(..) => "index",
            Op::Concat(..) => "concatenate",
            Op::Assign(..) => "assign",
            Op::Fused(_) => "fused",
        }
    }
}

pub(crate) struct Node {
    pub op: Op,
    pub shape: Vec<usize>,
    pub cache: OnceLock<DistArray>,
}

/// A handle to an immutable node of an expression graph.
///
/// Cloning is cheap and clones share the node, so a subexpression used several times is
/// evaluated once.
#[derive(Clone)]
pub struct Expr(Arc<Node>);

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expr")
            .field("op", &self.0.op.name())
            .field("shape", &self.0.shape)
            .field("evaluated", &self.0.cache.get().is_some())
            .finish()
    }
}

/// Anything usable as an operand: expressions, arrays and scalars.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for &Expr {
    fn into_expr(self) -> Expr {
        self.clone()
    }
}

impl IntoExpr for f32 {
    fn into_expr(self) -> Expr {
        Expr::scalar(self)
    }
}

impl IntoExpr for DistArray {
    fn into_expr(self) -> Expr {
        Expr::from(self)
    }
}

impl IntoExpr for &DistArray {
    fn into_expr(self) -> Expr {
        Expr::from(self)
    }
}

impl From<DistArray> for Expr {
    fn from(array: DistArray) -> Self {
        let shape = array.shape().to_vec();
        Expr::new(Op::Value(array), shape)
    }
}

impl From<&DistArray> for Expr {
    fn from(array: &DistArray) -> Self {
        Expr::from(array.clone())
    }
}

/// An array of zeros.
pub fn zeros(shape: &[usize]) -> Expr {
    full(shape, 0.0)
}

/// An array of ones.
pub fn ones(shape: &[usize]) -> Expr {
    full(shape, 1.0)
}

/// An array filled with `value`.
pub fn full(shape: &[usize], value: f32) -> Expr {
    Expr::new(Op::Fill(value), shape.to_vec())
}

/// An array holding its own row-major positions `0, 1, 2, ...`.
pub fn arange(shape: &[usize]) -> Expr {
    Expr::new(
        Op::Arange {
            start: 0.0,
            step: 1.0,
        },
        shape.to_vec(),
    )
}

/// The 1-D array `start, start + step, ...` stopping before `stop`.
///
/// # Returns
/// An error if `step` is zero or not finite.
pub fn arange_range(start: f32, stop: f32, step: f32) -> Result<Expr> {
    if step == 0.0 || !step.is_finite() || !start.is_finite() || !stop.is_finite() {
        return Err(EngineErr::InvalidArgument("arange needs a finite, non zero step"));
    }

    let len = ((stop - start) / step).ceil().max(0.0) as usize;
    Ok(Expr::new(Op::Arange { start, step }, vec![len]))
}

/// Joins two arrays along `axis`.
pub fn concatenate(a: impl IntoExpr, b: impl IntoExpr, axis: usize) -> Result<Expr> {
    a.into_expr().concatenate(b, axis)
}

/// Returns a new array equal to `array` except for `array[index] = value`.
///
/// `array` itself is left untouched.
pub fn assign(array: impl IntoExpr, index: &[Index], value: impl IntoExpr) -> Result<Expr> {
    array.into_expr().assign(index, value)
}

/// Matrix product of two 2-D arrays.
pub fn dot(a: impl IntoExpr, b: impl IntoExpr) -> Result<Expr> {
    a.into_expr().dot(b)
}

/// Evaluates several expressions together, subexpressions they share are computed once.
///
/// # Returns
/// The values in the same order as `exprs`.
pub fn evaluate_all(ctx: &Context, exprs: &[Expr]) -> Result<Vec<DistArray>> {
    eval::Evaluator::run_all(ctx, exprs)
}

/// Elementwise maximum.
pub fn maximum(a: impl IntoExpr, b: impl IntoExpr) -> Result<Expr> {
    a.into_expr().maximum(b)
}

impl Expr {
    fn new(op: Op, shape: Vec<usize>) -> Self {
        Self(Arc::new(Node {
            op,
            shape,
            cache: OnceLock::new(),
        }))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    /// Identity of the underlying node.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// A 0-d array.
    pub fn scalar(value: f32) -> Self {
        full(&[], value)
    }

    /// Tiles a dense array.
    pub fn from_array(ctx: &Context, data: ArrayD<f32>) -> Self {
        Expr::from(DistArray::from_array(ctx, data))
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    pub fn ndim(&self) -> usize {
        self.0.shape.len()
    }

    /// Returns the amount of elements.
    pub fn len(&self) -> usize {
        self.0.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `[rows, cols]` of a 2-D expression.
    ///
    /// # Arguments
    /// * `op` - The operation needing a matrix, reported on error.
    pub fn matrix_shape(&self, op: &'static str) -> Result<[usize; 2]> {
        match *self.shape() {
            [rows, cols] => Ok([rows, cols]),
            _ => Err(EngineErr::ShapeMismatch {
                op,
                lhs: self.shape().to_vec(),
                rhs: vec![],
            }),
        }
    }

    pub(crate) fn is_elementwise(&self) -> bool {
        matches!(self.0.op, Op::Unary(..) | Op::Binary(..))
    }

    /// Whether the node is computed on the fly from its extent alone.
    pub(crate) fn is_generator(&self) -> bool {
        matches!(self.0.op, Op::Fill(_) | Op::Arange { .. })
    }

    pub(crate) fn as_constant(&self) -> Option<f32> {
        match self.0.op {
            Op::Fill(v) if self.0.shape.is_empty() => Some(v),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Elementwise
    // -------------------------------------------------------------------------

    fn unary(&self, op: UnaryOp) -> Expr {
        Expr::new(Op::Unary(op, self.clone()), self.0.shape.clone())
    }

    fn binary(&self, op: BinaryOp, rhs: impl IntoExpr) -> Result<Expr> {
        let rhs = rhs.into_expr();
        let shape = broadcast_shape(op.name(), self.shape(), rhs.shape())?;
        Ok(Expr::new(Op::Binary(op, self.clone(), rhs), shape))
    }

    pub fn add(&self, rhs: impl IntoExpr) -> Result<Expr> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: impl IntoExpr) -> Result<Expr> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: impl IntoExpr) -> Result<Expr> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: impl IntoExpr) -> Result<Expr> {
        self.binary(BinaryOp::Div, rhs)
    }

    pub fn maximum(&self, rhs: impl IntoExpr) -> Result<Expr> {
        self.binary(BinaryOp::Maximum, rhs)
    }

    pub fn minimum(&self, rhs: impl IntoExpr) -> Result<Expr> {
        self.binary(BinaryOp::Minimum, rhs)
    }

    /// `1.0` where `self > rhs`, `0.0` elsewhere.
    pub fn gt(&self, rhs: impl IntoExpr) -> Result<Expr> {
        self.binary(BinaryOp::Greater, rhs)
    }

    pub fn neg(&self) -> Expr {
        self.unary(UnaryOp::Neg)
    }

    pub fn exp(&self) -> Expr {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> Expr {
        self.unary(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Expr {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn abs(&self) -> Expr {
        self.unary(UnaryOp::Abs)
    }

    // -------------------------------------------------------------------------
    // Reductions
    // -------------------------------------------------------------------------

    fn reduce(&self, op: ReduceOp, axis: Option<usize>) -> Result<Expr> {
        let ndim = self.ndim();
        let (shape, reduced) = match axis {
            Some(axis) if axis >= ndim => return Err(EngineErr::AxisOutOfBounds { axis, ndim }),
            Some(axis) => {
                let mut shape = self.shape().to_vec();
                let reduced = shape.remove(axis);
                (shape, reduced)
            }
            None => (vec![], self.len()),
        };

        if reduced == 0 && op.needs_elements() {
            return Err(EngineErr::EmptyReduction { op: op.name() });
        }

        Ok(Expr::new(Op::Reduce(op, self.clone(), axis), shape))
    }

    pub fn sum(&self, axis: Option<usize>) -> Result<Expr> {
        self.reduce(ReduceOp::Sum, axis)
    }

    pub fn max(&self, axis: Option<usize>) -> Result<Expr> {
        self.reduce(ReduceOp::Max, axis)
    }

    pub fn min(&self, axis: Option<usize>) -> Result<Expr> {
        self.reduce(ReduceOp::Min, axis)
    }

    pub fn mean(&self, axis: Option<usize>) -> Result<Expr> {
        self.reduce(ReduceOp::Mean, axis)
    }

    /// Population standard deviation.
    pub fn std(&self, axis: Option<usize>) -> Result<Expr> {
        self.reduce(ReduceOp::Std, axis)
    }

    /// Position of the first maximum, along `axis` or over the flattened array.
    pub fn argmax(&self, axis: Option<usize>) -> Result<Expr> {
        self.reduce(ReduceOp::Argmax, axis)
    }

    pub fn count_nonzero(&self, axis: Option<usize>) -> Result<Expr> {
        self.reduce(ReduceOp::CountNonzero, axis)
    }

    // -------------------------------------------------------------------------
    // Linear algebra and structure
    // -------------------------------------------------------------------------

    /// Matrix product, `[m, k] . [k, n] -> [m, n]`.
    pub fn dot(&self, rhs: impl IntoExpr) -> Result<Expr> {
        let rhs = rhs.into_expr();
        match (self.shape(), rhs.shape()) {
            (&[m, k1], &[k2, n]) if k1 == k2 => {
                Ok(Expr::new(Op::Dot(self.clone(), rhs.clone()), vec![m, n]))
            }
            (lhs, rhs) => Err(EngineErr::ShapeMismatch {
                op: "dot",
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
            }),
        }
    }

    /// Reverses the axes.
    pub fn t(&self) -> Expr {
        let shape = self.shape().iter().rev().copied().collect();
        Expr::new(Op::Transpose(self.clone()), shape)
    }

    /// Same elements in row-major order, different shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Expr> {
        if shape.iter().product::<usize>() != self.len() {
            return Err(EngineErr::InvalidReshape {
                from: self.shape().to_vec(),
                to: shape.to_vec(),
            });
        }

        Ok(Expr::new(Op::Reshape(self.clone()), shape.to_vec()))
    }

    /// Selects a region, axes indexed with a single position are dropped and missing trailing
    /// indices select the whole axis.
    pub fn index(&self, index: &[Index]) -> Result<Expr> {
        let sels = resolve(self.shape(), index)?;
        let shape = selected_shape(&sels);
        Ok(Expr::new(Op::Index(self.clone(), sels), shape))
    }

    /// `self[i, ...]`.
    pub fn row(&self, i: usize) -> Result<Expr> {
        self.index(&[Index::At(i)])
    }

    /// `self[range, ...]`.
    pub fn rows(&self, range: Range<usize>) -> Result<Expr> {
        self.index(&[Index::Range(range)])
    }

    /// Joins `self` and `other` along `axis`.
    pub fn concatenate(&self, other: impl IntoExpr, axis: usize) -> Result<Expr> {
        let other = other.into_expr();
        let ndim = self.ndim();
        if axis >= ndim {
            return Err(EngineErr::AxisOutOfBounds { axis, ndim });
        }

        let compatible = other.ndim() == ndim
            && (0..ndim).all(|a| a == axis || self.shape()[a] == other.shape()[a]);
        if !compatible {
            return Err(EngineErr::ShapeMismatch {
                op: "concatenate",
                lhs: self.shape().to_vec(),
                rhs: other.shape().to_vec(),
            });
        }

        let mut shape = self.shape().to_vec();
        shape[axis] += other.shape()[axis];
        Ok(Expr::new(Op::Concat(self.clone(), other, axis), shape))
    }

    /// Returns a new array equal to `self` except for `self[index] = value`, `value` is
    /// broadcast over the selected region.
    pub fn assign(&self, index: &[Index], value: impl IntoExpr) -> Result<Expr> {
        let value = value.into_expr();
        let sels = resolve(self.shape(), index)?;
        let region = selected_shape(&sels);

        let shape = broadcast_shape("assign", &region, value.shape())?;
        if shape != region {
            return Err(EngineErr::ShapeMismatch {
                op: "assign",
                lhs: region,
                rhs: value.shape().to_vec(),
            });
        }

        Ok(Expr::new(
            Op::Assign(self.clone(), sels, value),
            self.shape().to_vec(),
        ))
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Rewrites the graph for evaluation: folds constants, drops identities and fuses chains of
    /// elementwise operations so they run in a single pass over each tile.
    pub fn optimized(&self) -> Expr {
        optimize::optimize(self)
    }

    /// Materialises the expression. The result is cached, evaluating again is free.
    pub fn evaluate(&self, ctx: &Context) -> Result<DistArray> {
        eval::Evaluator::run(ctx, self)
    }

    /// Evaluates and gathers the result into a dense array.
    pub fn glom(&self, ctx: &Context) -> Result<ArrayD<f32>> {
        Ok(self.evaluate(ctx)?.glom())
    }

    /// Evaluates a single element expression.
    pub fn scalar_value(&self, ctx: &Context) -> Result<f32> {
        if self.len() != 1 {
            return Err(EngineErr::ShapeMismatch {
                op: "scalar_value",
                lhs: self.shape().to_vec(),
                rhs: vec![],
            });
        }

        let data = self.glom(ctx)?;
        data.iter()
            .next()
            .copied()
            .ok_or(EngineErr::InvalidArgument("empty scalar"))
    }
}

/// Numpy broadcasting: shapes are right aligned and axes must match or be 1.
pub(crate) fn broadcast_shape(op: &'static str, a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut shape = vec![0; ndim];

    for i in 0..ndim {
        let da = a.len().checked_sub(ndim - i).map_or(1, |j| a[j]);
        let db = b.len().checked_sub(ndim - i).map_or(1, |j| b[j]);

        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(EngineErr::ShapeMismatch {
                    op,
                    lhs: a.to_vec(),
                    rhs: b.to_vec(),
                });
            }
        };
    }

    Ok(shape)
}

fn resolve(shape: &[usize], index: &[Index]) -> Result<Vec<AxisSel>> {
    if index.len() > shape.len() {
        return Err(EngineErr::InvalidArgument("too many indices for array"));
    }

    shape
        .iter()
        .enumerate()
        .map(|(axis, &len)| {
            let sel = |start, stop, keep| Ok(AxisSel { start, stop, keep });
            match index.get(axis).unwrap_or(&Index::Full) {
                Index::At(i) if *i < len => sel(*i, i + 1, false),
                Index::At(i) => Err(EngineErr::IndexOutOfBounds { index: *i, len }),
                Index::Last if len > 0 => sel(len - 1, len, false),
                Index::Last => Err(EngineErr::IndexOutOfBounds { index: 0, len }),
                Index::Range(r) if r.start <= r.end && r.end <= len => sel(r.start, r.end, true),
                Index::Range(r) => Err(EngineErr::IndexOutOfBounds { index: r.end, len }),
                Index::From(start) if *start <= len => sel(*start, len, true),
                Index::From(start) => Err(EngineErr::IndexOutOfBounds { index: *start, len }),
                Index::Full => sel(0, len, true),
            }
        })
        .collect()
}

fn selected_shape(sels: &[AxisSel]) -> Vec<usize> {
    sels.iter()
        .filter(|s| s.keep)
        .map(|s| s.stop - s.start)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasting_rules() {
        assert_eq!(broadcast_shape("t", &[3, 1], &[1, 4]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shape("t", &[5, 4], &[4]).unwrap(), vec![5, 4]);
        assert_eq!(broadcast_shape("t", &[5, 4], &[]).unwrap(), vec![5, 4]);
        assert!(broadcast_shape("t", &[5, 4], &[5]).is_err());
    }

    #[test]
    fn shape_errors_surface_when_building() {
        let a = zeros(&[3, 4]);
        let b = zeros(&[5, 4]);

        assert!(matches!(a.add(&b), Err(EngineErr::ShapeMismatch { op: "add", .. })));
        assert!(a.dot(&b).is_err());
        assert!(a.dot(b.t()).is_ok());
        assert!(matches!(a.sum(Some(2)), Err(EngineErr::AxisOutOfBounds { .. })));
        assert!(a.reshape(&[5]).is_err());
    }

    #[test]
    fn index_shapes() {
        let a = zeros(&[4, 5]);
        assert_eq!(a.row(1).unwrap().shape(), &[5]);
        assert_eq!(a.index(&[Index::From(1)]).unwrap().shape(), &[3, 5]);
        assert_eq!(a.index(&[Index::Full, Index::Last]).unwrap().shape(), &[4]);
        assert_eq!(a.index(&[1.into(), (2..4).into()]).unwrap().shape(), &[2]);
        assert!(a.row(4).is_err());
        assert!(a.index(&[Index::Full, Index::Full, Index::Full]).is_err());
    }

    #[test]
    fn matrix_shape_needs_two_axes() {
        assert_eq!(zeros(&[3, 4]).matrix_shape("t").unwrap(), [3, 4]);
        assert!(matches!(
            zeros(&[3]).matrix_shape("t"),
            Err(EngineErr::ShapeMismatch { op: "t", .. })
        ));
        assert!(zeros(&[2, 3, 4]).matrix_shape("t").is_err());
    }

    #[test]
    fn assign_requires_a_broadcastable_value() {
        let a = zeros(&[4, 5]);
        assert!(a.assign(&[Index::At(0)], ones(&[5])).is_ok());
        assert!(a.assign(&[Index::At(0)], 2.0).is_ok());
        assert!(a.assign(&[Index::At(0)], ones(&[4])).is_err());
        assert!(a.assign(&[Index::At(0)], ones(&[2, 5])).is_err());
    }

    #[test]
    fn arange_range_lengths() {
        assert_eq!(arange_range(0.0, 2.5, 0.5).unwrap().shape(), &[5]);
        assert_eq!(arange_range(0.0, 3.0, 0.5).unwrap().shape(), &[6]);
        assert_eq!(arange_range(1.0, 0.0, 0.5).unwrap().shape(), &[0]);
        assert!(arange_range(0.0, 1.0, 0.0).is_err());
    }

    #[test]
    fn reductions_of_nothing() {
        let empty = zeros(&[0, 3]);
        assert!(empty.sum(None).is_ok());
        assert!(matches!(empty.max(Some(0)), Err(EngineErr::EmptyReduction { .. })));
        assert!(empty.max(Some(1)).is_ok());
    }
}
