//! File-based configuration for the HTTP server and the rate solver.

use std::path::Path;

use serde::Deserialize;

use crate::core::EquivalentRateConfig;
use crate::error::TaxLotResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub solver: SolverSettings,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            solver: SolverSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> TaxLotResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> TaxLotResult<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        config.solver.to_solver_config().validate()?;
        Ok(config)
    }

    /// Falls back to defaults when `path` does not exist.
    pub fn load_or_default(path: Option<&Path>) -> TaxLotResult<Self> {
        match path {
            Some(path) if path.exists() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }
}

/// Bisection bounds and tolerances, all optional in the file.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSettings {
    pub initial_high: f64,
    pub max_doublings: u32,
    pub max_iterations: u32,
    pub value_tolerance: f64,
    pub relative_tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        let defaults = EquivalentRateConfig::default();
        Self {
            initial_high: defaults.initial_high,
            max_doublings: defaults.max_doublings,
            max_iterations: defaults.max_iterations,
            value_tolerance: defaults.value_tolerance,
            relative_tolerance: defaults.relative_tolerance,
        }
    }
}

impl SolverSettings {
    pub fn to_solver_config(self) -> EquivalentRateConfig {
        EquivalentRateConfig {
            initial_high: self.initial_high,
            max_doublings: self.max_doublings,
            max_iterations: self.max_iterations,
            value_tolerance: self.value_tolerance,
            relative_tolerance: self.relative_tolerance,
            ..EquivalentRateConfig::default()
        }
    }
}
