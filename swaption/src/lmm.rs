//! Building blocks of the LIBOR market model, one column per simulated path.
//!
//! Forward curves are `[periods, paths]` arrays where row `j` holds the rate over
//! `[j·delta, (j + 1)·delta)` as seen from the current time step.

use engine::{Expr, Index, RowCollector, arange, ones};

use crate::Result;

/// Time steps of the simulation, `0, delta, ..., ts`.
pub fn time_structure(ts: f32, delta: f32) -> Result<Expr> {
    grid(ts / delta + 1.0, delta)
}

/// Start of every forward period up to the swap maturity, `0, delta, ..., te - delta`.
pub fn maturity_structure(te: f32, delta: f32) -> Result<Expr> {
    grid(te / delta, delta)
}

fn grid(points: f32, delta: f32) -> Result<Expr> {
    Ok(arange(&[points.round() as usize]).mul(delta)?)
}

/// The drift of the forward rates under the spot measure, up to a `lambda·delta` factor.
///
/// Row `i` is the running sum of `lambda·delta·f / (1 + delta·f)` over rows `1..=i + 1` of `f`,
/// so the result has one row less than `f`.
///
/// # Arguments
/// * `f` - The current forward curve.
/// * `lambda` - The forward rate volatility.
/// * `delta` - The tenor.
pub fn mu(f: &Expr, lambda: f32, delta: f32) -> Result<Expr> {
    let [rows, _] = f.matrix_shape("mu")?;
    if rows < 2 {
        return Ok(f.rows(0..0)?);
    }

    let scaled = f.rows(1..rows)?.mul(delta)?;
    let tmp = scaled.mul(lambda)?.div(scaled.add(1.0)?)?;

    let mut acc = RowCollector::new(&tmp)?;
    for i in 1..acc.len() {
        let next = acc.row(i - 1)?.add(tmp.row(i)?)?;
        acc.write(i, next)?;
    }

    Ok(acc.finish()?)
}

/// Moves a forward curve one tenor ahead, dropping the period that just fixed.
///
/// # Arguments
/// * `f` - The forward curve at the current step.
/// * `eps` - One standard normal shock per path.
/// * `lambda` - The forward rate volatility.
/// * `delta` - The tenor.
pub fn step_curve(f: &Expr, eps: &Expr, lambda: f32, delta: f32) -> Result<Expr> {
    let [rows, _] = f.matrix_shape("step_curve")?;

    let drift = mu(f, lambda, delta)?.mul(lambda * delta)?;
    let shock = eps.mul(lambda * delta.sqrt())?;
    let growth = drift
        .sub(0.5 * lambda * lambda * delta)?
        .add(shock)?
        .exp();

    Ok(f.rows(1..rows)?.mul(growth)?)
}

/// Zero coupon bond prices at the option maturity, one row per remaining payment date.
///
/// Row 0 is 1 and row `j + 1` discounts row `j` by `1 + delta·f[j]`.
///
/// # Arguments
/// * `f` - The forward curve at the option maturity.
/// * `rows` - Payment dates, including the option maturity itself.
/// * `delta` - The tenor.
pub fn zero_coupon_bonds(f: &Expr, rows: usize, delta: f32) -> Result<Expr> {
    let [_, paths] = f.matrix_shape("zero_coupon_bonds")?;

    let mut zcb = RowCollector::new(ones(&[rows, paths]))?;
    for j in 1..rows {
        let discount = f.row(j - 1)?.mul(delta)?.add(1.0)?;
        let next = zcb.row(j - 1)?.div(discount)?;
        zcb.write(j, next)?;
    }

    Ok(zcb.finish()?)
}

/// Value of the payer swap at the option maturity, floored at 0.
///
/// `max(1 - zcb[-1] - theta·delta·Σ zcb[1:], 0)` along every path.
pub fn swap_payoff(zcb: &Expr, theta: f32, delta: f32) -> Result<Expr> {
    let [rows, _] = zcb.matrix_shape("swap_payoff")?;

    let annuity = zcb.rows(1..rows)?.sum(Some(0))?;
    let last = zcb.index(&[Index::Last])?;

    Ok(Expr::scalar(1.0)
        .sub(&last)?
        .sub(annuity.mul(theta * delta)?)?
        .maximum(0.0)?)
}

/// The spot numeraire at the option maturity, `Π (1 + delta·f_kk[j])` over the first `steps` rows.
///
/// # Arguments
/// * `f_kk` - The fixed rates, row `j` is the rate fixed at step `j`.
/// * `steps` - The periods until the option maturity.
/// * `delta` - The tenor.
pub fn spot_numeraire(f_kk: &Expr, steps: usize, delta: f32) -> Result<Expr> {
    let [_, paths] = f_kk.matrix_shape("spot_numeraire")?;

    (0..steps).try_fold(ones(&[paths]), |acc, j| {
        let growth = f_kk.row(j)?.mul(delta)?.add(1.0)?;
        Ok(acc.mul(growth)?)
    })
}

#[cfg(test)]
mod tests {
    use engine::{Context, EngineConfig, full};
    use ndarray::Ix2;

    use super::*;

    fn ctx() -> Context {
        Context::new(EngineConfig::default().with_tile_size(16).with_seed(2)).unwrap()
    }

    #[test]
    fn structures_span_the_maturities() {
        let ctx = ctx();

        let times = time_structure(2.0, 0.5).unwrap().glom(&ctx).unwrap();
        assert_eq!(times.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);

        let maturities = maturity_structure(2.0, 0.5).unwrap().glom(&ctx).unwrap();
        assert_eq!(maturities.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn mu_accumulates_over_rows() {
        let ctx = ctx();
        let f = full(&[4, 3], 0.06);

        let got = mu(&f, 0.2, 0.5).unwrap().glom(&ctx).unwrap();
        let got = got.into_dimensionality::<Ix2>().unwrap();
        assert_eq!(got.dim(), (3, 3));

        let term = 0.2 * 0.5 * 0.06 / (1.0 + 0.5 * 0.06);
        for ((i, _), v) in got.indexed_iter() {
            let expected = term * (i + 1) as f32;
            assert!((v - expected).abs() < 1e-6, "mu[{i}] = {v}, expected {expected}");
        }
    }

    #[test]
    fn mu_of_a_single_row_is_empty() {
        let f = full(&[1, 5], 0.06);
        assert_eq!(mu(&f, 0.2, 0.5).unwrap().shape(), &[0, 5]);
    }

    #[test]
    fn curves_must_be_matrices() {
        let flat = full(&[5], 0.06);
        let eps = full(&[5], 0.0);

        assert!(mu(&flat, 0.2, 0.5).is_err());
        assert!(step_curve(&flat, &eps, 0.2, 0.5).is_err());
        assert!(zero_coupon_bonds(&flat, 3, 0.5).is_err());
        assert!(swap_payoff(&flat, 0.06, 0.5).is_err());
        assert!(spot_numeraire(&flat, 2, 0.5).is_err());
    }

    #[test]
    fn zero_volatility_keeps_the_curve_flat() {
        let ctx = ctx();
        let f = full(&[5, 4], 0.06);
        let eps = ctx.randn(&[4]);

        let next = step_curve(&f, &eps, 0.0, 0.5).unwrap();
        assert_eq!(next.shape(), &[4, 4]);
        for v in next.glom(&ctx).unwrap() {
            assert!((v - 0.06).abs() < 1e-7);
        }
    }

    #[test]
    fn bonds_discount_at_the_forward_rates() {
        let ctx = ctx();
        let f = full(&[3, 2], 0.06);

        let zcb = zero_coupon_bonds(&f, 4, 0.5).unwrap().glom(&ctx).unwrap();
        let zcb = zcb.into_dimensionality::<Ix2>().unwrap();
        for ((j, _), v) in zcb.indexed_iter() {
            let expected = 1.03f32.powi(-(j as i32));
            assert!((v - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn at_the_money_swap_on_a_flat_curve_is_worthless() {
        let ctx = ctx();
        let f = full(&[4, 3], 0.06);
        let zcb = zero_coupon_bonds(&f, 5, 0.5).unwrap();

        let atm = swap_payoff(&zcb, 0.06, 0.5).unwrap().glom(&ctx).unwrap();
        assert!(atm.iter().all(|v| v.abs() < 1e-6));

        let payer = swap_payoff(&zcb, 0.04, 0.5).unwrap().glom(&ctx).unwrap();
        assert!(payer.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn numeraire_compounds_the_fixed_rates() {
        let ctx = ctx();
        let f_kk = full(&[4, 2], 0.06);

        let b = spot_numeraire(&f_kk, 3, 0.5).unwrap().glom(&ctx).unwrap();
        assert_eq!(b.shape(), &[2]);
        for v in b {
            assert!((v - 1.03f32.powi(3)).abs() < 1e-6);
        }
    }
}
