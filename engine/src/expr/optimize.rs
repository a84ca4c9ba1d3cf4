use std::collections::HashMap;

use log::debug;

use super::{Expr, Op};

/// Rewrites an expression graph into an equivalent one that is cheaper to evaluate.
///
/// Shared nodes stay shared in the rewritten graph.
pub(crate) fn optimize(expr: &Expr) -> Expr {
    optimize_all(std::slice::from_ref(expr))
        .pop()
        .unwrap_or_else(|| expr.clone())
}

/// Rewrites several graphs at once, nodes they share stay shared across the results.
pub(crate) fn optimize_all(exprs: &[Expr]) -> Vec<Expr> {
    let mut rewriter = Rewriter::default();
    let out = exprs.iter().map(|e| rewriter.rewrite(e, false)).collect();

    if rewriter.fused > 0 || rewriter.folded > 0 {
        debug!(fused = rewriter.fused, folded = rewriter.folded; "expression optimized");
    }

    out
}

#[derive(Default)]
struct Rewriter {
    /// Keyed by node identity and whether the node sits inside a fused region.
    memo: HashMap<(usize, bool), Expr>,
    fused: usize,
    folded: usize,
}

impl Rewriter {
    fn rewrite(&mut self, expr: &Expr, inside: bool) -> Expr {
        let inside = inside && expr.is_elementwise();
        let key = (expr.key(), inside);
        if let Some(done) = self.memo.get(&key) {
            return done.clone();
        }

        let out = self.rewrite_node(expr, inside);
        self.memo.insert(key, out.clone());
        out
    }

    fn rewrite_node(&mut self, expr: &Expr, inside: bool) -> Expr {
        let node = expr.node();
        if let Some(value) = node.cache.get() {
            return Expr::from(value.clone());
        }

        // the outermost node of an elementwise chain
        if expr.is_elementwise() && !inside {
            let body = self.rewrite(expr, true);
            if !body.is_elementwise() {
                return body;
            }

            self.fused += 1;
            return Expr::new(Op::Fused(body), node.shape.clone());
        }

        let shape = node.shape.clone();
        match &node.op {
            Op::Value(_) | Op::Fill(_) | Op::Arange { .. } => expr.clone(),
            Op::Unary(op, a) => {
                let a = self.rewrite(a, true);
                if let Some(v) = a.as_constant() {
                    self.folded += 1;
                    return Expr::new(Op::Fill(op.apply(v)), shape);
                }

                Expr::new(Op::Unary(*op, a), shape)
            }
            Op::Binary(op, a, b) => {
                let a = self.rewrite(a, true);
                let b = self.rewrite(b, true);

                if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
                    self.folded += 1;
                    return Expr::new(Op::Fill(op.apply(x, y)), shape);
                }

                let is_identity = |e: &Expr, id: Option<f32>| id.is_some() && e.as_constant() == id;
                if is_identity(&b, op.right_identity()) && a.shape() == shape.as_slice() {
                    return a;
                }

                if is_identity(&a, op.left_identity()) && b.shape() == shape.as_slice() {
                    return b;
                }

                Expr::new(Op::Binary(*op, a, b), shape)
            }
            Op::Fused(inner) => {
                let body = self.rewrite(inner, true);
                if !body.is_elementwise() {
                    return body;
                }

                Expr::new(Op::Fused(body), shape)
            }
            Op::Reduce(op, a, axis) => Expr::new(Op::Reduce(*op, self.rewrite(a, false), *axis), shape),
            Op::Dot(a, b) => {
                let a = self.rewrite(a, false);
                let b = self.rewrite(b, false);
                Expr::new(Op::Dot(a, b), shape)
            }
            Op::Transpose(a) => {
                let a = self.rewrite(a, false);
                if let Op::Transpose(x) = &a.node().op {
                    return x.clone();
                }

                Expr::new(Op::Transpose(a), shape)
            }
            Op::Reshape(a) => Expr::new(Op::Reshape(self.rewrite(a, false)), shape),
            Op::Index(a, sels) => Expr::new(Op::Index(self.rewrite(a, false), sels.clone()), shape),
            Op::Concat(a, b, axis) => {
                let a = self.rewrite(a, false);
                let b = self.rewrite(b, false);
                Expr::new(Op::Concat(a, b, *axis), shape)
            }
            Op::Assign(base, sels, value) => {
                let base = self.rewrite(base, false);
                let value = self.rewrite(value, false);
                Expr::new(Op::Assign(base, sels.clone(), value), shape)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{arange, ones, zeros};

    fn count(expr: &Expr, pred: &dyn Fn(&Op) -> bool) -> usize {
        let node = expr.node();
        let own = usize::from(pred(&node.op));
        let children = match &node.op {
            Op::Unary(_, a)
            | Op::Reduce(_, a, _)
            | Op::Transpose(a)
            | Op::Reshape(a)
            | Op::Index(a, _)
            | Op::Fused(a) => count(a, pred),
            Op::Binary(_, a, b) | Op::Dot(a, b) | Op::Concat(a, b, _) | Op::Assign(a, _, b) => {
                count(a, pred) + count(b, pred)
            }
            _ => 0,
        };

        own + children
    }

    #[test]
    fn folds_scalar_constants() {
        let e = Expr::scalar(2.0).mul(3.0).unwrap().add(1.0).unwrap().neg();
        let opt = optimize(&e);
        assert_eq!(opt.as_constant(), Some(-7.0));
    }

    #[test]
    fn drops_identities_that_keep_the_shape() {
        let x = arange(&[3, 4]);
        let e = x.mul(1.0).unwrap().add(0.0).unwrap();
        let opt = optimize(&e);
        assert!(matches!(opt.node().op, Op::Arange { .. }));

        // only scalar constants count as identities
        let v = arange(&[4]);
        let e = v.add(zeros(&[3, 4])).unwrap();
        let opt = optimize(&e);
        assert_eq!(opt.shape(), &[3, 4]);
        assert!(matches!(opt.node().op, Op::Fused(_)));
    }

    #[test]
    fn collapses_double_transpose() {
        let x = arange(&[3, 4]);
        let opt = optimize(&x.t().t());
        assert!(matches!(opt.node().op, Op::Arange { .. }));
    }

    #[test]
    fn wraps_each_elementwise_chain_once() {
        let x = arange(&[4, 4]);
        let chain = x.exp().mul(&x).unwrap().sub(ones(&[4, 4])).unwrap();
        let e = chain.sum(Some(0)).unwrap().sqrt();

        let opt = optimize(&e);
        assert_eq!(count(&opt, &|op| matches!(op, Op::Fused(_))), 2);
        assert_eq!(count(&opt, &|op| matches!(op, Op::Reduce(..))), 1);
    }

    #[test]
    fn keeps_shared_nodes_shared() {
        let x = arange(&[4, 4]);
        let y = x.dot(&x).unwrap();
        let e = y.add(&y).unwrap();

        let opt = optimize(&e);
        let Op::Fused(body) = &opt.node().op else {
            panic!("expected a fused root");
        };
        let Op::Binary(_, a, b) = &body.node().op else {
            panic!("expected a binary body");
        };
        assert_eq!(a.key(), b.key());
    }
}
