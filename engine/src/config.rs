use std::{env, num::NonZeroUsize, str::FromStr, thread};

use serde::{Deserialize, Serialize};

use crate::{EngineErr, Result};

const DEFAULT_TILE_SIZE: usize = 4096;

/// Environment variable overriding the amount of workers.
pub const WORKERS_VAR: &str = "ENGINE_WORKERS";
/// Environment variable overriding the maximum amount of elements per tile.
pub const TILE_SIZE_VAR: &str = "ENGINE_TILE_SIZE";
/// Environment variable fixing the seed of the context's random number generator.
pub const SEED_VAR: &str = "ENGINE_SEED";

/// Immutable execution bounds of an engine `Context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub num_workers: NonZeroUsize,
    pub tile_size: NonZeroUsize,
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let num_workers = thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        let tile_size = NonZeroUsize::new(DEFAULT_TILE_SIZE).unwrap_or(NonZeroUsize::MIN);

        Self {
            num_workers,
            tile_size,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Returns the default config overridden by the `ENGINE_*` environment variables.
    ///
    /// # Returns
    /// An error if any of the variables is set but can't be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name))
    }

    /// Returns the default config overridden by the variables `lookup` finds.
    ///
    /// # Arguments
    /// * `lookup` - Resolves a variable name the way `std::env::var` does.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, env::VarError>,
    {
        let mut config = Self::default();

        if let Some(workers) = parse_var::<NonZeroUsize, _>(&lookup, WORKERS_VAR)? {
            config.num_workers = workers;
        }

        if let Some(tile_size) = parse_var::<NonZeroUsize, _>(&lookup, TILE_SIZE_VAR)? {
            config.tile_size = tile_size;
        }

        if let Some(seed) = parse_var::<u64, _>(&lookup, SEED_VAR)? {
            config.seed = Some(seed);
        }

        Ok(config)
    }

    /// Sets the amount of workers, zero is clamped to one.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = NonZeroUsize::new(num_workers).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Sets the maximum amount of elements per tile, zero is clamped to one.
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = NonZeroUsize::new(tile_size).unwrap_or(NonZeroUsize::MIN);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> std::result::Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineErr::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(EngineErr::Config(format!("{name}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn builders_clamp_zero() {
        let config = EngineConfig::default().with_workers(0).with_tile_size(0);
        assert_eq!(config.num_workers.get(), 1);
        assert_eq!(config.tile_size.get(), 1);
    }

    #[test]
    fn deserializes_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{ "tile_size": 500 }"#).unwrap();
        assert_eq!(config.tile_size.get(), 500);
        assert_eq!(config.seed, None);
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn variables_override_the_defaults() {
        let env = vars(&[(WORKERS_VAR, "3"), (TILE_SIZE_VAR, " 500 "), (SEED_VAR, "42")]);
        let config =
            EngineConfig::from_vars(|name| env.get(name).cloned().ok_or(env::VarError::NotPresent))
                .unwrap();

        assert_eq!(config.num_workers.get(), 3);
        assert_eq!(config.tile_size.get(), 500);
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn missing_variables_keep_the_defaults() {
        let config = EngineConfig::from_vars(|_| Err(env::VarError::NotPresent)).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn invalid_variables_are_config_errors() {
        for (name, raw) in [(WORKERS_VAR, "0"), (TILE_SIZE_VAR, "many"), (SEED_VAR, "-1")] {
            let env = vars(&[(name, raw)]);
            let res =
                EngineConfig::from_vars(|n| env.get(n).cloned().ok_or(env::VarError::NotPresent));

            match res {
                Err(EngineErr::Config(msg)) => assert!(msg.contains(name), "{msg}"),
                other => panic!("expected a config error for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_zero_tile_size_in_json() {
        let res = serde_json::from_str::<EngineConfig>(r#"{ "tile_size": 0 }"#);
        assert!(res.is_err());
    }
}
