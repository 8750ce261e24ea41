use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    cache::{Cache, Geometry, IsCache},
    error::ConfigError,
    replace::{fifo::Fifo, lru::Lru, nmru::Nmru},
    replay::MalformedPolicy,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Oldest install goes first; hits do not refresh.
    #[default]
    Fifo,
    Lru,
    Nmru,
}

impl FromStr for Policy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Policy::Fifo),
            "lru" => Ok(Policy::Lru),
            "nmru" => Ok(Policy::Nmru),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

fn default_name() -> String {
    "L1".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    pub set_bits: u32,
    pub block_bits: u32,
    pub lines_per_set: usize,
    #[serde(default)]
    pub repl: Policy,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub malformed: MalformedPolicy,
}

impl Config {
    pub fn new(set_bits: u32, block_bits: u32, lines_per_set: usize) -> Self {
        Config {
            name: default_name(),
            set_bits,
            block_bits,
            lines_per_set,
            repl: Policy::default(),
            seed: 0,
            malformed: MalformedPolicy::default(),
        }
    }

    pub fn to_cache(&self) -> Result<Box<dyn IsCache>, ConfigError> {
        let geometry = Geometry::new(self.set_bits, self.block_bits, self.lines_per_set)?;
        log::debug!(
            "{}: {} sets x {} lines, {} byte blocks, {:?} replacement",
            self.name,
            geometry.n_sets,
            geometry.n_ways,
            geometry.block_size(),
            self.repl
        );

        let name = self.name.clone();
        let cache = match self.repl {
            Policy::Fifo => {
                Box::new(Cache::new(name, geometry, Fifo::new())?) as Box<dyn IsCache>
            }
            Policy::Lru => {
                let repl = Lru::new(geometry.n_sets).map_err(|_| geometry.too_large())?;
                Box::new(Cache::new(name, geometry, repl)?) as Box<dyn IsCache>
            }
            Policy::Nmru => {
                let repl = Nmru::new(geometry.n_sets, self.seed)
                    .map_err(|_| geometry.too_large())?;
                Box::new(Cache::new(name, geometry, repl)?) as Box<dyn IsCache>
            }
        };
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Policy};
    use crate::{error::ConfigError, replay::MalformedPolicy};
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_json_with_defaults() {
        let json = r#"{"set_bits": 4, "block_bits": 4, "lines_per_set": 2}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config, Config::new(4, 4, 2));
        assert_eq!(config.repl, Policy::Fifo);
        assert_eq!(config.malformed, MalformedPolicy::Reject);
    }

    #[test]
    fn parses_full_json() {
        let config: Config = serde_json::from_str(
            r#"{"name": "d1", "set_bits": 2, "block_bits": 6, "lines_per_set": 8,
                "repl": "nmru", "seed": 9, "malformed": "skip"}"#,
        )
        .unwrap();
        assert_eq!(config.name, "d1");
        assert_eq!(config.repl, Policy::Nmru);
        assert_eq!(config.seed, 9);
        assert_eq!(config.malformed, MalformedPolicy::Skip);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(serde_json::from_str::<Config>(
            r#"{"set_bits": 1, "block_bits": 1, "lines_per_set": 1, "repl": "plru"}"#
        )
        .is_err());
        assert!(matches!(
            "plru".parse::<Policy>(),
            Err(ConfigError::UnknownPolicy(name)) if name == "plru"
        ));
        assert_eq!("lru".parse::<Policy>().unwrap(), Policy::Lru);
    }

    #[test]
    fn builds_every_policy() {
        for repl in [Policy::Fifo, Policy::Lru, Policy::Nmru] {
            let config = Config {
                repl,
                ..Config::new(2, 4, 2)
            };
            let mut cache = config.to_cache().unwrap();
            cache.access(0x40);
            cache.access(0x40);
            assert_eq!(cache.counters().hits, 1, "{repl:?}");
            assert_eq!(cache.geometry().n_sets, 4);
        }
    }

    #[test]
    fn invalid_shape_builds_nothing() {
        assert!(matches!(
            Config::new(32, 32, 1).to_cache(),
            Err(ConfigError::AddressBitsOverflow { .. })
        ));
        assert!(matches!(
            Config::new(1, 1, 0).to_cache(),
            Err(ConfigError::ZeroAssociativity)
        ));
    }

    #[test]
    fn oversized_cache_is_an_error_not_an_abort() {
        for repl in [Policy::Fifo, Policy::Lru, Policy::Nmru] {
            for (set_bits, block_bits) in [(62, 1), (40, 1)] {
                let config = Config {
                    repl,
                    ..Config::new(set_bits, block_bits, 1)
                };
                assert!(
                    matches!(config.to_cache(), Err(ConfigError::TooLarge { .. })),
                    "{repl:?} s={set_bits}"
                );
            }
        }
    }
}
