use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::sim::ConflictPolicy;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimConfig {
    /// Cap on immediate firings per step; guards against immediate feedback loops.
    #[serde(default = "default_max_immediate_iterations")]
    pub max_immediate_iterations: usize,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Seed for the controller's RNG; absent means seeded from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Slack for comparisons against accumulated float time.
    #[serde(default = "default_time_epsilon")]
    pub time_epsilon: f64,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RunConfig {
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default)]
    pub max_steps: Option<u64>,
    /// Wall-clock period between ticks of the interval driver.
    #[serde(default = "default_cadence_ms")]
    pub cadence_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_immediate_iterations: default_max_immediate_iterations(),
            conflict_policy: ConflictPolicy::default(),
            seed: None,
            time_epsilon: default_time_epsilon(),
            run: RunConfig::default(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            max_steps: None,
            cadence_ms: default_cadence_ms(),
        }
    }
}

impl SimConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SimConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.check()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    fn check(&self) -> Result<()> {
        anyhow::ensure!(
            self.run.dt.is_finite() && self.run.dt > 0.0,
            "run.dt must be positive, got {}",
            self.run.dt
        );
        anyhow::ensure!(
            self.time_epsilon.is_finite() && self.time_epsilon >= 0.0,
            "time_epsilon must be non-negative, got {}",
            self.time_epsilon
        );
        Ok(())
    }
}

fn default_max_immediate_iterations() -> usize {
    1000
}

fn default_time_epsilon() -> f64 {
    1e-9
}

fn default_dt() -> f64 {
    0.1
}

fn default_cadence_ms() -> u64 {
    50
}
