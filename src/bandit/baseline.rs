//! Reference decision rules for offline comparison.
//!
//! - [`BestAgent`] knows the linear oracle `A` and plays `argmax_k ‖A x_k‖²`.
//! - [`UniformAgent`] picks an arm uniformly at random.
//!
//! Both follow the same Action/Update sequencing and history layout as
//! [`NeuralAgent`](super::NeuralAgent).

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::history::History;
use super::{argmax_first, check_contexts, check_reward, context_row, AgentPhase, BanditAgent};
use crate::errors::{Error, Result};

fn validate_shape(arms: usize, horizon: usize, context_dim: usize) -> Result<()> {
    for (name, value) in [("arms (K)", arms), ("horizon (T)", horizon), ("context_dim (d)", context_dim)] {
        if value == 0 {
            return Err(Error::config(format!("{name} must be > 0, got 0")));
        }
    }
    Ok(())
}

/// Oracle agent for rewards of the form `xᵀAᵀAx`.
#[derive(Debug, Clone)]
pub struct BestAgent {
    arms: usize,
    oracle: DMatrix<f64>,
    history: History,
    phase: AgentPhase,
}

impl BestAgent {
    /// `oracle` is the matrix `A`; it must have `context_dim` columns.
    pub fn new(arms: usize, horizon: usize, context_dim: usize, oracle: DMatrix<f64>) -> Result<Self> {
        validate_shape(arms, horizon, context_dim)?;
        if oracle.ncols() != context_dim {
            return Err(Error::config(format!(
                "oracle matrix must have {context_dim} columns, got {}",
                oracle.ncols()
            )));
        }
        Ok(Self {
            arms,
            oracle,
            history: History::new(horizon, context_dim),
            phase: AgentPhase::ReadyForAction,
        })
    }

    /// Expected reward `xᵀAᵀAx = ‖Ax‖²` of a single context.
    pub fn expected_reward(&self, context: &[f64]) -> f64 {
        let x = DVector::from_column_slice(context);
        (&self.oracle * x).norm_squared()
    }
}

impl BanditAgent for BestAgent {
    fn action(&mut self, contexts: &DMatrix<f64>) -> Result<usize> {
        self.phase.check_action(&self.history)?;
        check_contexts(contexts, self.arms, self.history.contexts().ncols())?;

        let expected: Vec<f64> = (0..self.arms)
            .map(|k| self.expected_reward(&context_row(contexts, k)))
            .collect();
        let arm = argmax_first(&expected);

        self.history
            .record_choice(arm, &context_row(contexts, arm), expected[arm])?;
        self.phase = AgentPhase::ReadyForUpdate;
        Ok(arm)
    }

    fn update(&mut self, reward: f64) -> Result<()> {
        self.phase.check_update()?;
        check_reward(reward)?;
        self.history.record_reward(reward)?;
        self.phase = AgentPhase::ReadyForAction;
        Ok(())
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn name(&self) -> &str {
        "best"
    }
}

/// Uniformly random arm choice. Records a predicted reward of 0.0.
#[derive(Debug, Clone)]
pub struct UniformAgent {
    arms: usize,
    rng: StdRng,
    history: History,
    phase: AgentPhase,
}

impl UniformAgent {
    pub fn new(arms: usize, horizon: usize, context_dim: usize, seed: u64) -> Result<Self> {
        validate_shape(arms, horizon, context_dim)?;
        Ok(Self {
            arms,
            rng: StdRng::seed_from_u64(seed),
            history: History::new(horizon, context_dim),
            phase: AgentPhase::ReadyForAction,
        })
    }
}

impl BanditAgent for UniformAgent {
    fn action(&mut self, contexts: &DMatrix<f64>) -> Result<usize> {
        self.phase.check_action(&self.history)?;
        check_contexts(contexts, self.arms, self.history.contexts().ncols())?;

        let arm = self.rng.gen_range(0..self.arms);
        self.history.record_choice(arm, &context_row(contexts, arm), 0.0)?;
        self.phase = AgentPhase::ReadyForUpdate;
        Ok(arm)
    }

    fn update(&mut self, reward: f64) -> Result<()> {
        self.phase.check_update()?;
        check_reward(reward)?;
        self.history.record_reward(reward)?;
        self.phase = AgentPhase::ReadyForAction;
        Ok(())
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn name(&self) -> &str {
        "uniform"
    }
}
