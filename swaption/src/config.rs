use std::{fs, num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Result, SwaptionErr};

/// Grid points closer than this to an integer count as one.
const GRID_TOLERANCE: f32 = 1e-4;

/// A family of payer swaptions sharing the swap maturity and volatility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Option maturities, in years.
    pub ts: Vec<f32>,
    /// Swap maturity, in years.
    pub te: f32,
    /// Forward rate volatility.
    pub lambda: f32,
}

/// The model's parameters and the products to price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricerConfig {
    /// Antithetic path pairs, `2·paths` curves are simulated per product.
    pub paths: NonZeroUsize,
    /// Tenor of the forward rates, in years.
    pub delta: f32,
    /// Flat initial forward rate.
    pub f0: f32,
    /// Fixed rate of the swap.
    pub theta: f32,
    pub products: Vec<Product>,
}

impl Default for PricerConfig {
    fn default() -> Self {
        let products = [(4.0, vec![1.0, 2.0, 3.0]), (10.0, vec![1.0, 2.0, 5.0])]
            .into_iter()
            .map(|(te, ts)| Product {
                ts,
                te,
                lambda: 0.2,
            })
            .collect();

        Self {
            paths: NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN),
            delta: 0.5,
            f0: 0.06,
            theta: 0.06,
            products,
        }
    }
}

impl PricerConfig {
    /// Reads a config from a JSON file, missing fields take their default value.
    ///
    /// # Arguments
    /// * `path` - The file's path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SwaptionErr::Config(format!("cannot read '{}': {e}", path.display())))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| SwaptionErr::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the model parameters and every product.
    pub fn validate(&self) -> Result<()> {
        if !self.delta.is_finite() || self.delta <= 0.0 {
            return Err(SwaptionErr::Config(format!(
                "delta must be positive, got {}",
                self.delta
            )));
        }

        if self.paths.get() < 2 {
            return Err(SwaptionErr::Config(
                "at least 2 path pairs are needed for a standard error".to_string(),
            ));
        }

        for (name, v) in [("f0", self.f0), ("theta", self.theta)] {
            if !v.is_finite() {
                return Err(SwaptionErr::Config(format!("{name} must be finite, got {v}")));
            }
        }

        for product in &self.products {
            if !product.lambda.is_finite() || product.lambda < 0.0 {
                return Err(SwaptionErr::Config(format!(
                    "lambda must be non negative, got {}",
                    product.lambda
                )));
            }

            for &ts in &product.ts {
                self.check_maturities(ts, product.te)?;
            }
        }

        Ok(())
    }

    /// Checks `0 < ts < te` with both on the `delta` grid.
    ///
    /// # Arguments
    /// * `ts` - The option maturity.
    /// * `te` - The swap maturity.
    pub fn check_maturities(&self, ts: f32, te: f32) -> Result<()> {
        if !(ts > 0.0 && ts < te) {
            return Err(SwaptionErr::Config(format!(
                "maturities must satisfy 0 < ts < te, got ts = {ts}, te = {te}"
            )));
        }

        for (name, t) in [("ts", ts), ("te", te)] {
            let steps = t / self.delta;
            if (steps - steps.round()).abs() > GRID_TOLERANCE {
                return Err(SwaptionErr::Config(format!(
                    "{name} = {t} is not a multiple of delta = {}",
                    self.delta
                )));
            }
        }

        Ok(())
    }

    /// Whole `delta` periods in `t`.
    pub fn periods(&self, t: f32) -> usize {
        (t / self.delta).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PricerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.paths.get(), 100);
        assert_eq!(config.periods(10.0), 20);
    }

    #[test]
    fn maturities_must_be_ordered_and_on_the_grid() {
        let config = PricerConfig::default();

        assert!(config.check_maturities(1.0, 4.0).is_ok());
        assert!(config.check_maturities(4.0, 4.0).is_err());
        assert!(config.check_maturities(0.0, 4.0).is_err());
        assert!(config.check_maturities(1.25, 4.0).is_err());
        assert!(config.check_maturities(1.0, 4.3).is_err());
    }

    #[test]
    fn rejects_bad_parameters() {
        let bad_delta = PricerConfig {
            delta: 0.0,
            ..PricerConfig::default()
        };
        assert!(matches!(bad_delta.validate(), Err(SwaptionErr::Config(_))));

        let one_path = PricerConfig {
            paths: NonZeroUsize::MIN,
            ..PricerConfig::default()
        };
        assert!(one_path.validate().is_err());

        let mut bad_lambda = PricerConfig::default();
        bad_lambda.products[0].lambda = f32::NAN;
        assert!(bad_lambda.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: PricerConfig = serde_json::from_str(r#"{ "paths": 10 }"#).unwrap();
        assert_eq!(config.paths.get(), 10);
        assert_eq!(config.delta, 0.5);
        assert_eq!(config.products, PricerConfig::default().products);
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let err = PricerConfig::from_file("/nonexistent/pricer.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
