use std::collections::BTreeMap;

use crate::{
    EngineErr, Result,
    expr::{Expr, Index, IntoExpr, broadcast_shape, zeros},
};

/// Collects row writes over an immutable base array.
///
/// Reads see earlier writes, `finish` turns every write into an `assign` over the base so the
/// result can be evaluated in one go. The base itself is never modified.
#[derive(Debug, Clone)]
pub struct RowCollector {
    base: Expr,
    writes: BTreeMap<usize, Expr>,
}

impl RowCollector {
    /// Creates a new `RowCollector`.
    ///
    /// # Arguments
    /// * `base` - The array holding the rows before any write, at least 1-D.
    pub fn new(base: impl IntoExpr) -> Result<Self> {
        let base = base.into_expr();
        if base.ndim() == 0 {
            return Err(EngineErr::AxisOutOfBounds { axis: 0, ndim: 0 });
        }

        Ok(Self {
            base,
            writes: BTreeMap::new(),
        })
    }

    /// Amount of rows.
    pub fn len(&self) -> usize {
        self.base.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of a single row.
    pub fn row_shape(&self) -> &[usize] {
        &self.base.shape()[1..]
    }

    /// The latest value of row `i`.
    pub fn row(&self, i: usize) -> Result<Expr> {
        match self.writes.get(&i) {
            Some(row) => Ok(row.clone()),
            None => self.base.row(i),
        }
    }

    /// Records `row` as the new value of row `i`, `row` is broadcast to the row shape.
    pub fn write(&mut self, i: usize, row: impl IntoExpr) -> Result<()> {
        let len = self.len();
        if i >= len {
            return Err(EngineErr::IndexOutOfBounds { index: i, len });
        }

        let row = row.into_expr();
        let shape = broadcast_shape("assign", self.row_shape(), row.shape())?;
        if shape != self.row_shape() {
            return Err(EngineErr::ShapeMismatch {
                op: "assign",
                lhs: self.row_shape().to_vec(),
                rhs: row.shape().to_vec(),
            });
        }

        let row = if row.shape() == shape.as_slice() {
            row
        } else {
            zeros(&shape).add(row)?
        };

        self.writes.insert(i, row);
        Ok(())
    }

    /// Folds every write into a single array.
    pub fn finish(self) -> Result<Expr> {
        self.writes
            .into_iter()
            .try_fold(self.base, |acc, (i, row)| acc.assign(&[Index::At(i)], row))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;
    use crate::{Context, EngineConfig, expr::arange};

    fn ctx() -> Context {
        Context::new(EngineConfig::default().with_tile_size(4).with_workers(2)).unwrap()
    }

    #[test]
    fn reads_see_previous_writes() {
        let ctx = ctx();
        let mut rows = RowCollector::new(arange(&[4, 3])).unwrap();

        let doubled = rows.row(1).unwrap().mul(2.0).unwrap();
        rows.write(2, &doubled).unwrap();
        let next = rows.row(2).unwrap().add(1.0).unwrap();
        rows.write(3, next).unwrap();

        let got = rows.row(3).unwrap().glom(&ctx).unwrap();
        assert_eq!(got.as_slice().unwrap(), &[7.0, 9.0, 11.0]);
    }

    #[test]
    fn finish_applies_every_write_and_leaves_the_base_alone() {
        let ctx = ctx();
        let base = arange(&[3, 2]);
        let mut rows = RowCollector::new(&base).unwrap();

        rows.write(0, 9.0).unwrap();
        rows.write(2, rows.row(0).unwrap().neg()).unwrap();

        let out = rows.finish().unwrap().glom(&ctx).unwrap();
        let expected =
            ArrayD::from_shape_vec(IxDyn(&[3, 2]), vec![9.0, 9.0, 2.0, 3.0, -9.0, -9.0]).unwrap();
        assert_eq!(out, expected);

        let base = base.glom(&ctx).unwrap();
        assert_eq!(base.as_slice().unwrap(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn rejects_bad_writes() {
        let mut rows = RowCollector::new(arange(&[3, 2])).unwrap();
        assert!(matches!(rows.write(3, 0.0), Err(EngineErr::IndexOutOfBounds { .. })));
        assert!(rows.write(0, arange(&[3])).is_err());
        assert!(RowCollector::new(Expr::scalar(1.0)).is_err());
    }
}
