//! Synthetic environment for offline agent comparison.
//!
//! # Model
//!
//! Each round:
//! 1. Draw K contexts x_k ~ N(0, I_d), normalized to unit length
//! 2. The played arm pays `x_kᵀAᵀAx_k + ε`, with ε ~ N(0, noise²)
//!
//! `A` is a `d × d` matrix with N(0, 1/d) entries, drawn once from the seed.
//! Regret is measured against the expected reward of the best arm.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bandit::BanditAgent;
use crate::errors::{Error, Result};

/// Log cumulative regret every N rounds.
const PROGRESS_LOG_INTERVAL: usize = 100;

/// Seeded linear-oracle environment.
#[derive(Debug, Clone)]
pub struct LinearOracleEnv {
    arms: usize,
    dim: usize,
    oracle: DMatrix<f64>,
    noise: Option<Normal<f64>>,
    rng: StdRng,
}

impl LinearOracleEnv {
    pub fn new(arms: usize, dim: usize, noise_std: f64, seed: u64) -> Result<Self> {
        if arms == 0 || dim == 0 {
            return Err(Error::config(format!(
                "environment needs arms > 0 and dim > 0, got arms={arms}, dim={dim}"
            )));
        }
        if !(noise_std >= 0.0 && noise_std.is_finite()) {
            return Err(Error::config(format!("noise_std must be >= 0, got {noise_std}")));
        }
        let noise = if noise_std > 0.0 {
            Some(Normal::new(0.0, noise_std).map_err(|e| Error::config(e.to_string()))?)
        } else {
            None
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let scale = (1.0 / dim as f64).sqrt();
        let oracle = DMatrix::from_fn(dim, dim, |_, _| {
            let z: f64 = StandardNormal.sample(&mut rng);
            z * scale
        });

        Ok(Self {
            arms,
            dim,
            oracle,
            noise,
            rng,
        })
    }

    pub fn arms(&self) -> usize {
        self.arms
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The matrix `A`, e.g. to build a [`BestAgent`](crate::bandit::BestAgent).
    pub fn oracle(&self) -> &DMatrix<f64> {
        &self.oracle
    }

    /// Draw the next round's `K × d` context matrix.
    pub fn contexts(&mut self) -> DMatrix<f64> {
        let mut contexts =
            DMatrix::<f64>::from_fn(self.arms, self.dim, |_, _| StandardNormal.sample(&mut self.rng));
        for mut row in contexts.row_iter_mut() {
            let norm = row.norm();
            if norm > 0.0 {
                row /= norm;
            }
        }
        contexts
    }

    /// Noise-free reward `xᵀAᵀAx`.
    pub fn expected_reward(&self, context: &[f64]) -> f64 {
        let x = DVector::from_column_slice(context);
        (&self.oracle * x).norm_squared()
    }

    /// Observed reward: expected reward plus Gaussian noise.
    pub fn reward(&mut self, context: &[f64]) -> f64 {
        let expected = self.expected_reward(context);
        match &self.noise {
            Some(noise) => expected + noise.sample(&mut self.rng),
            None => expected,
        }
    }
}

/// Outcome of one agent's run against the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub agent: String,
    pub rounds: usize,
    pub cumulative_reward: f64,
    /// Σ_t (best expected reward − expected reward of the played arm)
    pub cumulative_regret: f64,
    /// Cumulative regret after each round
    pub regret_curve: Vec<f64>,
}

impl EpisodeSummary {
    /// Mean per-round regret over the episode.
    pub fn average_regret(&self) -> f64 {
        if self.rounds == 0 {
            0.0
        } else {
            self.cumulative_regret / self.rounds as f64
        }
    }
}

/// Play `rounds` Action/Update cycles of `agent` against `env`.
pub fn run_episode(
    agent: &mut dyn BanditAgent,
    env: &mut LinearOracleEnv,
    rounds: usize,
) -> Result<EpisodeSummary> {
    let remaining = agent.horizon() - agent.rounds();
    if rounds > remaining {
        return Err(Error::sequence(format!(
            "episode of {rounds} rounds exceeds remaining horizon {remaining}"
        )));
    }

    let name = agent.name().to_string();
    info!(agent = %name, rounds, arms = env.arms(), dim = env.dim(), "Episode started");

    let mut cumulative_reward = 0.0;
    let mut cumulative_regret = 0.0;
    let mut regret_curve = Vec::with_capacity(rounds);

    for t in 0..rounds {
        let contexts = env.contexts();
        let expected: Vec<f64> = contexts
            .row_iter()
            .map(|row| {
                let x: Vec<f64> = row.iter().copied().collect();
                env.expected_reward(&x)
            })
            .collect();
        let best = expected.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let arm = agent.action(&contexts)?;
        let context: Vec<f64> = contexts.row(arm).iter().copied().collect();
        let reward = env.reward(&context);
        agent.update(reward)?;

        cumulative_reward += reward;
        cumulative_regret += best - expected[arm];
        regret_curve.push(cumulative_regret);

        if (t + 1) % PROGRESS_LOG_INTERVAL == 0 {
            debug!(agent = %name, round = t + 1, cumulative_regret, "Episode progress");
        }
    }

    info!(agent = %name, cumulative_reward, cumulative_regret, "Episode finished");

    Ok(EpisodeSummary {
        agent: name,
        rounds,
        cumulative_reward,
        cumulative_regret,
        regret_curve,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::{BestAgent, UniformAgent};

    #[test]
    fn test_contexts_are_unit_norm() {
        let mut env = LinearOracleEnv::new(4, 6, 0.0, 3).unwrap();
        let contexts = env.contexts();
        assert_eq!(contexts.shape(), (4, 6));
        for row in contexts.row_iter() {
            assert!((row.norm() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_noise_free_reward_is_expected() {
        let mut env = LinearOracleEnv::new(2, 3, 0.0, 1).unwrap();
        let x = [0.6, 0.0, 0.8];
        let expected = env.expected_reward(&x);
        assert!(expected >= 0.0);
        assert_eq!(env.reward(&x), expected);
    }

    #[test]
    fn test_same_seed_same_environment() {
        let mut a = LinearOracleEnv::new(3, 4, 0.1, 99).unwrap();
        let mut b = LinearOracleEnv::new(3, 4, 0.1, 99).unwrap();
        assert_eq!(a.oracle(), b.oracle());
        assert_eq!(a.contexts(), b.contexts());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(LinearOracleEnv::new(0, 2, 0.0, 0), Err(Error::Configuration(_))));
        assert!(matches!(LinearOracleEnv::new(2, 2, -1.0, 0), Err(Error::Configuration(_))));
        assert!(matches!(LinearOracleEnv::new(2, 2, f64::NAN, 0), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_best_agent_has_zero_regret() {
        let mut env = LinearOracleEnv::new(3, 4, 0.05, 11).unwrap();
        let mut agent = BestAgent::new(3, 50, 4, env.oracle().clone()).unwrap();
        let summary = run_episode(&mut agent, &mut env, 50).unwrap();
        assert_eq!(summary.rounds, 50);
        assert_eq!(summary.agent, "best");
        assert!(summary.cumulative_regret.abs() < 1e-12);
        assert_eq!(summary.regret_curve.len(), 50);
    }

    #[test]
    fn test_regret_curve_is_cumulative() {
        let mut env = LinearOracleEnv::new(3, 4, 0.0, 5).unwrap();
        let mut agent = UniformAgent::new(3, 40, 4, 5).unwrap();
        let summary = run_episode(&mut agent, &mut env, 40).unwrap();
        for pair in summary.regret_curve.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(summary.regret_curve.last().copied(), Some(summary.cumulative_regret));
        assert!(summary.average_regret() >= 0.0);
    }

    #[test]
    fn test_episode_longer_than_horizon_rejected() {
        let mut env = LinearOracleEnv::new(2, 2, 0.0, 0).unwrap();
        let mut agent = UniformAgent::new(2, 5, 2, 0).unwrap();
        let result = run_episode(&mut agent, &mut env, 6);
        assert!(matches!(result, Err(Error::Sequence(_))));
        assert_eq!(agent.rounds(), 0);
    }
}
