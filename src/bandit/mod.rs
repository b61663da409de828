//! Contextual bandit agents.
//!
//! ## Architecture
//!
//! ```text
//! contexts (K × d)
//!   → NeuralNetwork      μ_k = f(x_k; θ),  g_k = ∇θ f(x_k; θ)
//!   → ConfidenceMatrix   σ²_k = λ·g_kᵀU⁻¹g_k / m
//!   → Thompson sample    s_k ~ N(μ_k, (ν·σ_k)²)
//!   → argmax_k s_k       (lowest index on ties)
//! reward
//!   → U += g gᵀ / m
//!   → every `frequency` rounds: reset θ to θ₀ and retrain (Retrainer)
//! ```
//!
//! All agents share the [`BanditAgent`] contract: `action` and `update`
//! strictly alternate, starting with `action`, for at most `horizon` rounds.

pub mod agent;
pub mod baseline;
pub mod confidence;
pub mod history;
pub mod network;
pub mod trainer;


// Re-export key types
pub use agent::{AgentSummary, ArmScore, ArmSelection, NeuralAgent};
pub use baseline::{BestAgent, UniformAgent};
pub use confidence::ConfidenceMatrix;
pub use history::History;
pub use network::{ForwardTrace, Layer, NeuralNetwork};
pub use trainer::{batch_ranges, CancelHandle, EpochMetrics, RetrainReport, Retrainer, MAX_EPOCHS};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Common Action/Update contract of every agent.
pub trait BanditAgent {
    /// Pick an arm given one context row per arm (`K × d`).
    fn action(&mut self, contexts: &DMatrix<f64>) -> Result<usize>;

    /// Reveal the reward of the arm picked by the preceding `action`.
    fn update(&mut self, reward: f64) -> Result<()>;

    /// Recorded rounds.
    fn history(&self) -> &History;

    /// Name of this decision rule.
    fn name(&self) -> &str;

    /// Completed rounds t.
    fn rounds(&self) -> usize {
        self.history().len()
    }

    fn horizon(&self) -> usize {
        self.history().horizon()
    }
}

/// Where an agent is in its Action/Update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    /// Waiting for contexts
    ReadyForAction,
    /// Waiting for the reward of the last chosen arm
    ReadyForUpdate,
}

impl AgentPhase {
    /// Check that `action` may run now.
    pub(crate) fn check_action(self, history: &History) -> Result<()> {
        if self == AgentPhase::ReadyForUpdate {
            return Err(Error::sequence(
                "action called twice without an update in between",
            ));
        }
        if history.is_full() {
            return Err(Error::sequence(format!(
                "agent exhausted: all {} rounds have been played",
                history.horizon()
            )));
        }
        Ok(())
    }

    /// Check that `update` may run now.
    pub(crate) fn check_update(self) -> Result<()> {
        if self == AgentPhase::ReadyForAction {
            return Err(Error::sequence(
                "update called without a preceding action",
            ));
        }
        Ok(())
    }
}

/// Reject NaN and infinite rewards before any state changes.
pub(crate) fn check_reward(reward: f64) -> Result<()> {
    if reward.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidReward(reward))
    }
}

/// Validate a `K × d` context matrix.
pub(crate) fn check_contexts(contexts: &DMatrix<f64>, arms: usize, context_dim: usize) -> Result<()> {
    if contexts.nrows() != arms {
        return Err(Error::dimension("context rows (arms)", arms, contexts.nrows()));
    }
    if contexts.ncols() != context_dim {
        return Err(Error::dimension("context columns", context_dim, contexts.ncols()));
    }
    Ok(())
}

/// Row `k` of a context matrix as an owned vector.
pub(crate) fn context_row(contexts: &DMatrix<f64>, k: usize) -> Vec<f64> {
    contexts.row(k).iter().copied().collect()
}

/// Index of the largest value, lowest index on ties. NaN never wins.
pub(crate) fn argmax_first(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best_value = v;
            best = i;
        }
    }
    best
}
