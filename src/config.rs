//! Agent configuration.
//!
//! Defaults follow the lazy-training setup of the neural bandit literature:
//! a two-layer network of width 20, exploration scale 0.1 and a retrain
//! every 50 rounds. The minibatch size has no default and must be chosen
//! by the caller.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Configuration for a [`NeuralAgent`](crate::bandit::NeuralAgent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Number of arms offered every round (K)
    pub arms: usize,
    /// Number of rounds the history buffers can hold (T)
    pub horizon: usize,
    /// Context dimension (d), must be even
    pub context_dim: usize,
    /// Number of weight layers (L)
    #[serde(default = "default_layers")]
    pub layers: usize,
    /// Network width (m), must be even
    #[serde(default = "default_width")]
    pub width: usize,
    /// Exploration scale applied to the posterior standard deviation (nu)
    #[serde(default = "default_nu")]
    pub nu: f64,
    /// Regularization strength and initial diagonal of the confidence matrix
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// SGD step size (eta)
    #[serde(default = "default_eta")]
    pub eta: f64,
    /// Retrain the network every `frequency` rounds
    #[serde(default = "default_frequency")]
    pub frequency: usize,
    /// Minibatch size used while retraining. Required.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Seed for network initialization, sampling and shuffling
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
}

fn default_layers() -> usize { 2 }
fn default_width() -> usize { 20 }
fn default_nu() -> f64 { 0.1 }
fn default_lambda() -> f64 { 1.0 }
fn default_eta() -> f64 { 0.01 }
fn default_frequency() -> usize { 50 }
fn default_random_seed() -> u64 { 12345 }

impl AgentConfig {
    /// Create a config with default hyperparameters and no batch size.
    pub fn new(arms: usize, horizon: usize, context_dim: usize) -> Self {
        Self {
            arms,
            horizon,
            context_dim,
            layers: default_layers(),
            width: default_width(),
            nu: default_nu(),
            lambda: default_lambda(),
            eta: default_eta(),
            frequency: default_frequency(),
            batch_size: None,
            random_seed: default_random_seed(),
        }
    }

    pub fn with_layers(mut self, layers: usize) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn with_nu(mut self, nu: f64) -> Self {
        self.nu = nu;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_eta(mut self, eta: f64) -> Self {
        self.eta = eta;
        self
    }

    pub fn with_frequency(mut self, frequency: usize) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = random_seed;
        self
    }

    /// Parse a config from JSON. The result is not validated.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid config JSON: {e}")))
    }

    /// Read a JSON config file. The result is not validated.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Total scalar parameter count p of the network this config describes.
    ///
    /// `d·m` for the input layer, `m²` per middle layer and `m` for the output column.
    pub fn num_parameters(&self) -> usize {
        self.context_dim * self.width
            + self.layers.saturating_sub(2) * self.width * self.width
            + self.width
    }

    /// The validated minibatch size.
    pub fn require_batch_size(&self) -> Result<usize> {
        match self.batch_size {
            None => Err(Error::config("batch_size must be set, it has no default")),
            Some(0) => Err(Error::config("batch_size must be > 0, got 0")),
            Some(b) => Ok(b),
        }
    }

    /// Validate invariants that would make the agent unusable.
    ///
    /// Returns the first violated invariant. Must be called before any
    /// network or matrix allocation.
    pub fn validate(&self) -> Result<()> {
        self.require_batch_size()?;

        let positive = [
            ("arms (K)", self.arms),
            ("horizon (T)", self.horizon),
            ("context_dim (d)", self.context_dim),
            ("layers (L)", self.layers),
            ("width (m)", self.width),
            ("frequency", self.frequency),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::config(format!("{name} must be > 0, got 0")));
            }
        }
        if self.layers < 2 {
            return Err(Error::config(format!(
                "layers (L) must be >= 2 for an input and an output layer, got {}",
                self.layers
            )));
        }
        if self.context_dim % 2 != 0 {
            return Err(Error::config(format!(
                "context_dim (d) must be even, got {}",
                self.context_dim
            )));
        }
        if self.width % 2 != 0 {
            return Err(Error::config(format!(
                "width (m) must be even, got {}",
                self.width
            )));
        }
        if !self.lambda.is_finite() || self.lambda <= 0.0 {
            return Err(Error::config(format!(
                "lambda must be finite and > 0.0, got {}. The confidence matrix is only positive-definite for lambda > 0.",
                self.lambda
            )));
        }
        if !self.nu.is_finite() || self.nu < 0.0 {
            return Err(Error::config(format!(
                "nu must be finite and >= 0.0, got {}",
                self.nu
            )));
        }
        if !self.eta.is_finite() || self.eta <= 0.0 {
            return Err(Error::config(format!(
                "eta must be finite and > 0.0, got {}",
                self.eta
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> AgentConfig {
        AgentConfig::new(4, 100, 6).with_batch_size(8)
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new(2, 10, 2);
        assert_eq!(config.layers, 2);
        assert_eq!(config.width, 20);
        assert!((config.nu - 0.1).abs() < 1e-12);
        assert!((config.lambda - 1.0).abs() < 1e-12);
        assert!((config.eta - 0.01).abs() < 1e-12);
        assert_eq!(config.frequency, 50);
        assert_eq!(config.random_seed, 12345);
        assert!(config.batch_size.is_none());
    }

    #[test]
    fn test_missing_batch_size_rejected() {
        let err = AgentConfig::new(2, 10, 2).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("batch_size")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            valid().with_batch_size(0),
            AgentConfig { arms: 0, ..valid() },
            AgentConfig { horizon: 0, ..valid() },
            AgentConfig { context_dim: 0, ..valid() },
            AgentConfig { context_dim: 3, ..valid() },
            valid().with_width(7),
            valid().with_width(0),
            valid().with_layers(1),
            valid().with_lambda(0.0),
            valid().with_lambda(f64::NAN),
            valid().with_nu(-0.5),
            valid().with_eta(0.0),
            valid().with_frequency(0),
        ];
        for config in cases {
            let result = config.validate();
            assert!(
                matches!(result, Err(Error::Configuration(_))),
                "expected configuration error for {config:?}"
            );
        }
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_num_parameters() {
        // d=2, m=20, L=2: 2*20 + 20
        assert_eq!(AgentConfig::new(2, 5, 2).num_parameters(), 60);
        // d=4, m=6, L=4: 24 + 2*36 + 6
        let config = AgentConfig::new(2, 5, 4).with_width(6).with_layers(4);
        assert_eq!(config.num_parameters(), 102);
    }

    #[test]
    fn test_json_defaults_fill_in() {
        let config =
            AgentConfig::from_json_str(r#"{"arms": 3, "horizon": 50, "context_dim": 4, "batch_size": 5}"#)
                .unwrap();
        assert_eq!(config.width, 20);
        assert_eq!(config.batch_size, Some(5));
        assert!(config.validate().is_ok());

        let config =
            AgentConfig::from_json_str(r#"{"arms": 3, "horizon": 50, "context_dim": 4}"#).unwrap();
        assert!(config.validate().is_err());

        assert!(AgentConfig::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"arms": 2, "horizon": 20, "context_dim": 2, "width": 8, "batch_size": 4}}"#
        )
        .unwrap();
        let config = AgentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.width, 8);
        assert_eq!(config.arms, 2);

        let missing = AgentConfig::from_json_file("/nonexistent/agent.json");
        assert!(matches!(missing, Err(Error::Configuration(_))));
    }
}
