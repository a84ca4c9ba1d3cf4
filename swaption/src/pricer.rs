use std::time::Instant;

use engine::{
    Context, DistArray, Expr, Index, RowCollector, concatenate, evaluate_all, full, zeros,
};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::{PricerConfig, Result, lmm};

/// Basis points per unit.
const BPS: f32 = 1e4;

/// The Monte Carlo price of a payer swaption.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ts: f32,
    pub te: f32,
    pub lambda: f32,
    /// Mean discounted payoff, in basis points.
    pub mean_bps: f32,
    /// Standard error of the mean, in basis points.
    pub se_bps: f32,
}

/// The simulated forward curves of a product, one column per path.
#[derive(Debug, Clone)]
pub struct Curves {
    /// `[steps + 1, paths]`, row `t` is the rate fixed at step `t`.
    pub f_kk: DistArray,
    /// `[te/delta - steps, paths]`, the forward curve at the option maturity.
    pub f_kn: DistArray,
}

/// Prices payer swaptions under a one factor LIBOR market model with antithetic paths.
pub struct Pricer<'a> {
    ctx: &'a Context,
    config: PricerConfig,
}

impl<'a> Pricer<'a> {
    /// Creates a new `Pricer`.
    ///
    /// # Arguments
    /// * `ctx` - The engine context the simulations run on.
    /// * `config` - The model parameters and products.
    pub fn new(ctx: &'a Context, config: PricerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { ctx, config })
    }

    /// Simulates `2·paths` forward curves from today to the option maturity.
    ///
    /// The second half of the paths use the negated shocks of the first half. Each step is
    /// evaluated before the next one is built.
    ///
    /// # Arguments
    /// * `ts` - The option maturity.
    /// * `te` - The swap maturity.
    /// * `lambda` - The forward rate volatility.
    pub fn simulate_curve(&self, ts: f32, te: f32, lambda: f32) -> Result<Curves> {
        self.config.check_maturities(ts, te)?;

        let delta = self.config.delta;
        let paths = self.config.paths.get();

        let steps = lmm::time_structure(ts, delta)?.shape()[0] - 1;
        let periods = lmm::maturity_structure(te, delta)?.shape()[0];

        let eps = self.ctx.randn(&[steps, paths]);
        let eps = Expr::from(concatenate(&eps, eps.neg(), 1)?.evaluate(self.ctx)?);

        let mut f_kk = RowCollector::new(zeros(&[steps + 1, 2 * paths]))?;
        f_kk.write(0, self.config.f0)?;

        let mut f_kn = full(&[periods, 2 * paths], self.config.f0).evaluate(self.ctx)?;
        for t in 1..=steps {
            let next = lmm::step_curve(&Expr::from(&f_kn), &eps.row(t - 1)?, lambda, delta)?;
            f_kn = next.evaluate(self.ctx)?;
            f_kk.write(t, Expr::from(&f_kn).row(0)?)?;

            trace!(step = t, periods = f_kn.shape()[0]; "forward curve advanced");
        }

        let f_kk = f_kk.finish()?.evaluate(self.ctx)?;
        Ok(Curves { f_kk, f_kn })
    }

    /// The payoff of every path discounted with the spot numeraire, `[2·paths]`.
    pub fn discounted_payoffs(&self, ts: f32, te: f32, lambda: f32) -> Result<DistArray> {
        let delta = self.config.delta;
        let Curves { f_kk, f_kn } = self.simulate_curve(ts, te, lambda)?;

        let f_kn = Expr::from(f_kn);
        let zcb = lmm::zero_coupon_bonds(&f_kn, f_kn.shape()[0] + 1, delta)?;
        let swap = lmm::swap_payoff(&zcb, self.config.theta, delta)?;
        let numeraire = lmm::spot_numeraire(&Expr::from(f_kk), self.config.periods(ts), delta)?;

        Ok(swap.div(numeraire)?.evaluate(self.ctx)?)
    }

    /// Prices the swaption exercised at `ts` into a swap maturing at `te`.
    pub fn price(&self, ts: f32, te: f32, lambda: f32) -> Result<Quote> {
        let paths = self.config.paths.get();
        let payoffs = Expr::from(self.discounted_payoffs(ts, te, lambda)?);

        let pair = payoffs
            .index(&[Index::Range(0..paths)])?
            .add(payoffs.index(&[Index::From(paths)])?)?
            .div(2.0)?;
        let mean = pair.mean(None)?.mul(BPS)?;
        let se = pair.std(None)?.div((paths as f32).sqrt())?.mul(BPS)?;

        let [mean_bps, se_bps] = evaluate_all(self.ctx, &[mean, se])?
            .into_iter()
            .map(|a| Expr::from(a).scalar_value(self.ctx))
            .collect::<engine::Result<Vec<_>>>()?
            .try_into()
            .map_err(|_| engine::EngineErr::InvalidArgument("expected two statistics"))?;

        Ok(Quote {
            ts,
            te,
            lambda,
            mean_bps,
            se_bps,
        })
    }

    /// Prices every option maturity of every configured product, in order.
    pub fn price_all(&self) -> Result<Vec<Quote>> {
        let begin = Instant::now();
        let mut quotes = Vec::new();

        for product in &self.config.products {
            debug!(te = product.te, lambda = product.lambda; "pricing product");

            for &ts in &product.ts {
                let quote = self.price(ts, product.te, product.lambda)?;
                info!(
                    "ts = {ts}, te = {}: {:.4} bps (se {:.4})",
                    quote.te, quote.mean_bps, quote.se_bps
                );
                quotes.push(quote);
            }
        }

        info!("priced {} swaptions in {:.3}s", quotes.len(), begin.elapsed().as_secs_f64());
        Ok(quotes)
    }
}
