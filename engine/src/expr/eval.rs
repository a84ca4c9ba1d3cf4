use std::collections::HashMap;

use log::{debug, trace};
use ndarray::{ArrayD, Axis, Dimension, Ix2, IxDyn, Zip, arr0};
use rayon::prelude::*;

use super::{AxisSel, Expr, Op, ops, optimize};
use crate::{
    Context, DistArray, EngineErr, Result,
    array::{Tile, view_mut},
    extent::{TileExtent, ravelled_pos},
    tiling,
};

/// Evaluates an expression graph, every distinct node at most once.
///
/// Intermediate results live in `memo` for the duration of a single evaluation, only the root
/// keeps its value afterwards.
pub(crate) struct Evaluator<'a> {
    ctx: &'a Context,
    memo: HashMap<usize, DistArray>,
}

impl<'a> Evaluator<'a> {
    pub fn run(ctx: &'a Context, expr: &Expr) -> Result<DistArray> {
        let mut values = Self::run_all(ctx, std::slice::from_ref(expr))?;
        values
            .pop()
            .ok_or(EngineErr::InvalidArgument("nothing was evaluated"))
    }

    /// Evaluates several expressions sharing a single memo, so common subexpressions are
    /// computed once across all of them.
    pub fn run_all(ctx: &'a Context, exprs: &[Expr]) -> Result<Vec<DistArray>> {
        let pending: Vec<Expr> = exprs
            .iter()
            .filter(|e| e.node().cache.get().is_none())
            .cloned()
            .collect();

        let mut evaluator = Self {
            ctx,
            memo: HashMap::new(),
        };

        // memo keys are node addresses, the rewritten graphs must outlive the memo
        let optimized = optimize::optimize_all(&pending);
        for (expr, root) in pending.iter().zip(&optimized) {
            let value = evaluator.materialize(root)?;
            debug!(
                op = expr.node().op.name(),
                len = expr.len(),
                tiles = value.num_tiles();
                "expression evaluated"
            );

            expr.node().cache.get_or_init(|| value);
        }

        exprs
            .iter()
            .map(|e| {
                e.node()
                    .cache
                    .get()
                    .cloned()
                    .ok_or(EngineErr::InvalidArgument("expression left unevaluated"))
            })
            .collect()
    }

    fn materialize(&mut self, expr: &Expr) -> Result<DistArray> {
        let node = expr.node();
        if let Some(value) = node.cache.get() {
            return Ok(value.clone());
        }

        if let Some(value) = self.memo.get(&expr.key()) {
            return Ok(value.clone());
        }

        let value = match &node.op {
            Op::Value(array) => return Ok(array.clone()),
            Op::Reduce(op, a, None) => self.reduce_all(*op, a)?,
            Op::Reduce(op, a, Some(axis)) => self.reduce_axis(*op, a, *axis, &node.shape)?,
            Op::Dot(a, b) => self.dot(a, b, &node.shape)?,
            Op::Reshape(a) => self.reshape(a, &node.shape)?,
            _ => {
                self.prepare(expr)?;
                self.tiled(&node.shape, |ext| self.region(expr, ext, false))?
            }
        };

        trace!(op = node.op.name(), tiles = value.num_tiles(); "node materialized");
        self.memo.insert(expr.key(), value.clone());
        Ok(value)
    }

    /// Computes every tile of an array of `shape` in parallel.
    fn tiled<F>(&self, shape: &[usize], f: F) -> Result<DistArray>
    where
        F: Fn(&TileExtent) -> Result<ArrayD<f32>> + Sync,
    {
        let extents = tiling::split(shape, self.ctx.tile_size());
        let tiles = self.ctx.install(|| {
            extents
                .into_par_iter()
                .map(|extent| {
                    let data = f(&extent)?;
                    Tile::new(extent, data)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(DistArray::from_tiles(shape.to_vec(), tiles))
    }

    // -------------------------------------------------------------------------
    // Operands
    // -------------------------------------------------------------------------

    /// Materialises whatever the tile computations of `expr` will fetch.
    fn prepare(&mut self, expr: &Expr) -> Result<()> {
        match &expr.node().op {
            Op::Unary(_, a) | Op::Transpose(a) | Op::Index(a, _) => self.prepare_operand(a, false),
            Op::Binary(_, a, b) | Op::Concat(a, b, _) | Op::Assign(a, _, b) => {
                self.prepare_operand(a, false)?;
                self.prepare_operand(b, false)
            }
            Op::Fused(inner) => self.prepare_operand(inner, true),
            _ => Ok(()),
        }
    }

    fn prepare_operand(&mut self, a: &Expr, fused: bool) -> Result<()> {
        if a.node().cache.get().is_some() || a.is_generator() {
            return Ok(());
        }

        if matches!(a.node().op, Op::Value(_)) {
            return Ok(());
        }

        if fused && a.is_elementwise() {
            return match &a.node().op {
                Op::Unary(_, x) => self.prepare_operand(x, true),
                Op::Binary(_, x, y) => {
                    self.prepare_operand(x, true)?;
                    self.prepare_operand(y, true)
                }
                _ => Ok(()),
            };
        }

        self.materialize(a).map(drop)
    }

    /// Region `ext` of the operand `a`.
    fn operand(&self, a: &Expr, ext: &TileExtent, fused: bool) -> Result<ArrayD<f32>> {
        if let Some(value) = a.node().cache.get() {
            return value.fetch(ext);
        }

        if let Op::Value(array) = &a.node().op {
            return array.fetch(ext);
        }

        if a.is_generator() || (fused && a.is_elementwise()) {
            return self.region(a, ext, fused);
        }

        match self.memo.get(&a.key()) {
            Some(value) => value.fetch(ext),
            None => Err(EngineErr::InvalidArgument("operand fetched before it was evaluated")),
        }
    }

    /// Computes the region `ext` of `expr` from its operands.
    fn region(&self, expr: &Expr, ext: &TileExtent, fused: bool) -> Result<ArrayD<f32>> {
        let shape = ext.shape();

        match &expr.node().op {
            Op::Fill(v) => Ok(ArrayD::from_elem(IxDyn(&shape), *v)),
            Op::Arange { start, step } => Ok(ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
                let global: Vec<usize> =
                    idx.slice().iter().zip(ext.ul()).map(|(i, u)| i + u).collect();
                start + step * ravelled_pos(&global, ext.array_shape()) as f32
            })),
            Op::Unary(op, a) => {
                let op = *op;
                let data = self.operand(a, &broadcast_extent(ext, a.shape()), fused)?;
                Ok(data.mapv_into(|x| op.apply(x)))
            }
            Op::Binary(op, a, b) => {
                let op = *op;
                let lhs = self.operand(a, &broadcast_extent(ext, a.shape()), fused)?;
                let rhs = self.operand(b, &broadcast_extent(ext, b.shape()), fused)?;

                let dim = IxDyn(&shape);
                let (Some(lhs), Some(rhs)) = (lhs.broadcast(dim.clone()), rhs.broadcast(dim)) else {
                    return Err(EngineErr::ShapeMismatch {
                        op: op.name(),
                        lhs: a.shape().to_vec(),
                        rhs: b.shape().to_vec(),
                    });
                };

                Ok(Zip::from(&lhs).and(&rhs).map_collect(|&x, &y| op.apply(x, y)))
            }
            Op::Fused(inner) => self.region(inner, ext, true),
            Op::Transpose(a) => {
                let src = TileExtent::from_parts(
                    ext.ul().iter().rev().copied().collect(),
                    ext.lr().iter().rev().copied().collect(),
                    ext.array_shape().iter().rev().copied().collect(),
                );

                let data = self.operand(a, &src, false)?;
                Ok(data.reversed_axes().as_standard_layout().into_owned())
            }
            Op::Index(a, sels) => {
                let src = source_extent(ext, sels, a.shape());
                let data = self.operand(a, &src, false)?;
                reshaped(data, &shape)
            }
            Op::Concat(a, b, axis) => self.concat_region(a, b, *axis, ext),
            Op::Assign(base, sels, value) => self.assign_region(base, sels, value, ext),
            _ => self.operand(expr, ext, false),
        }
    }

    fn concat_region(&self, a: &Expr, b: &Expr, axis: usize, ext: &TileExtent) -> Result<ArrayD<f32>> {
        let split = a.shape()[axis];
        let (lo, hi) = (ext.ul()[axis], ext.lr()[axis]);

        let part = |src: &Expr, from: usize, to: usize| {
            let mut ul = ext.ul().to_vec();
            let mut lr = ext.lr().to_vec();
            ul[axis] = from;
            lr[axis] = to;
            self.operand(src, &TileExtent::from_parts(ul, lr, src.shape().to_vec()), false)
        };

        let mut parts = Vec::with_capacity(2);
        if lo < split {
            parts.push(part(a, lo, hi.min(split))?);
        }
        if hi > split {
            parts.push(part(b, lo.max(split) - split, hi - split)?);
        }

        match parts.len() {
            0 => Ok(ArrayD::zeros(IxDyn(&ext.shape()))),
            1 => Ok(parts.swap_remove(0)),
            _ => {
                let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
                ndarray::concatenate(Axis(axis), &views).map_err(|_| EngineErr::ShapeMismatch {
                    op: "concatenate",
                    lhs: a.shape().to_vec(),
                    rhs: b.shape().to_vec(),
                })
            }
        }
    }

    fn assign_region(
        &self,
        base: &Expr,
        sels: &[AxisSel],
        value: &Expr,
        ext: &TileExtent,
    ) -> Result<ArrayD<f32>> {
        let mut out = self.operand(base, ext, false)?;

        let region = TileExtent::from_parts(
            sels.iter().map(|s| s.start).collect(),
            sels.iter().map(|s| s.stop).collect(),
            base.shape().to_vec(),
        );

        let Some(overlap) = ext.intersection(&region) else {
            return Ok(out);
        };

        // the overlap expressed within the selected region, dropped axes removed
        let kept: Vec<usize> = (0..sels.len()).filter(|&a| sels[a].keep).collect();
        let selected = TileExtent::from_parts(
            kept.iter().map(|&a| overlap.ul()[a] - sels[a].start).collect(),
            kept.iter().map(|&a| overlap.lr()[a] - sels[a].start).collect(),
            kept.iter().map(|&a| sels[a].stop - sels[a].start).collect(),
        );

        let data = self.operand(value, &broadcast_extent(&selected, value.shape()), false)?;
        let data = data
            .broadcast(IxDyn(&selected.shape()))
            .ok_or_else(|| EngineErr::ShapeMismatch {
                op: "assign",
                lhs: selected.array_shape().to_vec(),
                rhs: value.shape().to_vec(),
            })?
            .to_owned();

        let data = reshaped(data, &overlap.shape())?;
        view_mut(&mut out, &overlap.offset_from(ext)).assign(&data);
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Non tile-local operations
    // -------------------------------------------------------------------------

    fn reduce_all(&mut self, op: ops::ReduceOp, a: &Expr) -> Result<DistArray> {
        let input = self.materialize(a)?;

        let partials: Vec<ops::Partial> = self.ctx.install(|| {
            input
                .tiles()
                .par_iter()
                .map(|tile| op.partial(tile.data().view(), tile.extent()))
                .collect()
        });

        let combined = partials.into_iter().reduce(ops::combine);
        let value = match combined {
            Some(partial) => op.finish(partial),
            None => return Err(EngineErr::EmptyReduction { op: op.name() }),
        };

        let tile = Tile::new(TileExtent::full(&[]), arr0(value).into_dyn())?;
        Ok(DistArray::from_tiles(vec![], vec![tile]))
    }

    fn reduce_axis(
        &mut self,
        op: ops::ReduceOp,
        a: &Expr,
        axis: usize,
        shape: &[usize],
    ) -> Result<DistArray> {
        let input = self.materialize(a)?;
        let len = a.shape()[axis];

        self.tiled(shape, |ext| {
            let data = input.fetch(&ext.insert_axis(axis, len))?;
            Ok(data.map_axis(Axis(axis), |lane| op.lane(lane)))
        })
    }

    fn dot(&mut self, a: &Expr, b: &Expr, shape: &[usize]) -> Result<DistArray> {
        let lhs = self.materialize(a)?;
        let rhs = self.materialize(b)?;
        let (m, k, n) = (a.shape()[0], a.shape()[1], b.shape()[1]);

        let as_matrix = |data: ArrayD<f32>| {
            let lhs = data.shape().to_vec();
            data.into_dimensionality::<Ix2>()
                .map_err(|_| EngineErr::ShapeMismatch {
                    op: "dot",
                    lhs,
                    rhs: vec![],
                })
        };

        self.tiled(shape, |ext| {
            let (r0, r1) = (ext.ul()[0], ext.lr()[0]);
            let (c0, c1) = (ext.ul()[1], ext.lr()[1]);

            let rows = lhs.fetch(&TileExtent::from_parts(vec![r0, 0], vec![r1, k], vec![m, k]))?;
            let cols = rhs.fetch(&TileExtent::from_parts(vec![0, c0], vec![k, c1], vec![k, n]))?;

            Ok(as_matrix(rows)?.dot(&as_matrix(cols)?).into_dyn())
        })
    }

    fn reshape(&mut self, a: &Expr, shape: &[usize]) -> Result<DistArray> {
        let data = self.materialize(a)?.glom();
        let data = reshaped(data, shape)?;
        Ok(DistArray::from_array(self.ctx, data))
    }
}

/// Maps an extent of a broadcast result onto an operand of shape `shape`.
///
/// Axes are right aligned, missing leading axes are dropped and axes of length 1 are pinned to
/// their single element.
pub(crate) fn broadcast_extent(ext: &TileExtent, shape: &[usize]) -> TileExtent {
    let skip = ext.ndim() - shape.len();
    let mut ul = Vec::with_capacity(shape.len());
    let mut lr = Vec::with_capacity(shape.len());

    for (axis, &len) in shape.iter().enumerate() {
        if len == 1 && ext.array_shape()[skip + axis] != 1 {
            ul.push(0);
            lr.push(1);
        } else {
            ul.push(ext.ul()[skip + axis]);
            lr.push(ext.lr()[skip + axis]);
        }
    }

    TileExtent::from_parts(ul, lr, shape.to_vec())
}

/// Maps an extent of an indexing result back onto the indexed array.
fn source_extent(ext: &TileExtent, sels: &[AxisSel], shape: &[usize]) -> TileExtent {
    let mut out_axis = 0;
    let mut ul = Vec::with_capacity(sels.len());
    let mut lr = Vec::with_capacity(sels.len());

    for sel in sels {
        if sel.keep {
            ul.push(sel.start + ext.ul()[out_axis]);
            lr.push(sel.start + ext.lr()[out_axis]);
            out_axis += 1;
        } else {
            ul.push(sel.start);
            lr.push(sel.stop);
        }
    }

    TileExtent::from_parts(ul, lr, shape.to_vec())
}

/// Row-major reshape of an owned array, whatever its memory layout.
fn reshaped(data: ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    let from = data.shape().to_vec();
    let flat: Vec<f32> = data.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(shape), flat).map_err(|_| EngineErr::InvalidReshape {
        from,
        to: shape.to_vec(),
    })
}
