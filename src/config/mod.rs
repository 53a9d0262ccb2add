use serde::Deserialize;

use std::path::Path;

mod counter;
mod general;
mod log;
mod perf;

pub use counter::{Counter, GroupKind};
use general::General;
use log::Log;
use perf::Perf;

#[derive(Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    log: Log,
    #[serde(default)]
    perf: Perf,
    #[serde(default)]
    counters: Vec<Counter>,
}

impl Config {
    pub fn load(path: &dyn AsRef<Path>) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| {
                eprintln!("unable to open config file: {e}");
                std::process::exit(1);
            })
            .unwrap();

        let config: Config = toml::from_str(&content)
            .map_err(|e| {
                eprintln!("failed to parse config file: {e}");
                std::process::exit(1);
            })
            .unwrap();

        config.log.check();
        config.perf.check();

        for (index, counter) in config.counters.iter().enumerate() {
            counter.check(index);
        }

        Ok(config)
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn perf(&self) -> &Perf {
        &self.perf
    }

    pub fn counters(&self) -> &[Counter] {
        &self.counters
    }
}
