//! Neural Thompson Sampling agent.
//!
//! Each round the agent scores every arm with the reward network, sizes a
//! Gaussian around each prediction from the confidence matrix, samples once
//! per arm and plays the largest sample. Rewards fold the played context's
//! gradient into the confidence matrix; every `frequency` rounds the network
//! is reset to its initial parameters and retrained on the whole history.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::confidence::ConfidenceMatrix;
use super::history::History;
use super::network::NeuralNetwork;
use super::trainer::{CancelHandle, RetrainReport, Retrainer};
use super::{
    argmax_first, check_contexts, check_reward, context_row, AgentPhase, BanditAgent,
};
use crate::config::AgentConfig;
use crate::errors::{Error, Result};

/// Offset separating the shuffling stream from the sampling stream.
const SHUFFLE_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Per-arm quantities computed during `action`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmScore {
    /// Predicted mean reward μ_k
    pub mean: f64,
    /// Exploration variance σ²_k
    pub variance: f64,
    /// Thompson sample s_k
    pub sample: f64,
}

/// Result of arm selection, kept for inspection until the next `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSelection {
    /// Round counter t at selection time
    pub round: usize,
    /// Arm index selected
    pub arm: usize,
    /// Scores of every arm, in arm order
    pub scores: Vec<ArmScore>,
    /// Whether the sampled arm differs from the greedy (highest mean) arm
    pub is_exploration: bool,
}

/// Summary statistics for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Completed rounds t
    pub rounds: usize,
    /// History capacity T
    pub horizon: usize,
    /// Network parameter count p
    pub num_parameters: usize,
    /// Retraining episodes run so far
    pub retrain_count: u64,
    /// trace(U)
    pub confidence_trace: f64,
    /// Final epoch loss of the latest retrain
    pub last_retrain_loss: Option<f64>,
}

/// Neural Thompson Sampling agent.
pub struct NeuralAgent {
    config: AgentConfig,
    network: NeuralNetwork,
    confidence: ConfidenceMatrix,
    retrainer: Retrainer,
    history: History,
    phase: AgentPhase,
    /// Gaussian draws for Thompson sampling.
    sampling_rng: StdRng,
    /// Epoch shuffles during retraining.
    shuffle_rng: StdRng,
    cancel: CancelHandle,
    last_selection: Option<ArmSelection>,
    last_retrain: Option<RetrainReport>,
    retrain_count: u64,
}

impl NeuralAgent {
    /// Validate `config` and build the agent.
    ///
    /// Configuration errors are returned before the network or the
    /// confidence matrix is allocated.
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let batch_size = config.require_batch_size()?;

        let network = NeuralNetwork::new(
            config.context_dim,
            config.layers,
            config.width,
            config.random_seed,
        )?;
        let confidence = ConfidenceMatrix::new(network.num_parameters(), config.lambda, config.width);
        let retrainer = Retrainer::new(config.lambda, config.eta, batch_size)?;
        let history = History::new(config.horizon, config.context_dim);

        debug!(
            arms = config.arms,
            horizon = config.horizon,
            context_dim = config.context_dim,
            layers = config.layers,
            width = config.width,
            num_parameters = network.num_parameters(),
            "Neural Thompson Sampling agent created"
        );

        Ok(Self {
            sampling_rng: StdRng::seed_from_u64(config.random_seed),
            shuffle_rng: StdRng::seed_from_u64(config.random_seed ^ SHUFFLE_STREAM),
            config,
            network,
            confidence,
            retrainer,
            history,
            phase: AgentPhase::ReadyForAction,
            cancel: CancelHandle::new(),
            last_selection: None,
            last_retrain: None,
            retrain_count: 0,
        })
    }

    /// Choose an arm for this round.
    ///
    /// `contexts` has one row per arm (`K × d`). The choice is recorded at
    /// the current round; the round counter only advances in [`update`](Self::update).
    /// On error nothing is recorded and the agent stays ready for an action.
    pub fn action(&mut self, contexts: &DMatrix<f64>) -> Result<usize> {
        self.phase.check_action(&self.history)?;
        check_contexts(contexts, self.config.arms, self.config.context_dim)?;

        let inverse = self.confidence.inverse().map_err(|e| {
            warn!(round = self.history.len(), error = %e, "Confidence matrix inversion failed");
            e
        })?;

        // Means and variances first so a numeric failure leaves the RNG untouched.
        let mut moments = Vec::with_capacity(self.config.arms);
        for k in 0..self.config.arms {
            let (mean, gradient) = self.network.gradient(&context_row(contexts, k))?;
            let variance = self.confidence.variance(&gradient, &inverse)?;
            let std_dev = self.config.nu * variance.sqrt();
            let normal = Normal::new(mean, std_dev).map_err(|_| Error::SingularMatrix {
                dimension: self.confidence.dimension(),
            })?;
            moments.push((mean, variance, normal));
        }

        let scores: Vec<ArmScore> = moments
            .into_iter()
            .map(|(mean, variance, normal)| ArmScore {
                mean,
                variance,
                sample: normal.sample(&mut self.sampling_rng),
            })
            .collect();

        let samples: Vec<f64> = scores.iter().map(|s| s.sample).collect();
        let means: Vec<f64> = scores.iter().map(|s| s.mean).collect();
        let arm = argmax_first(&samples);
        let greedy_arm = argmax_first(&means);
        let round = self.history.len();

        self.history
            .record_choice(arm, &context_row(contexts, arm), scores[arm].mean)?;
        self.phase = AgentPhase::ReadyForUpdate;

        debug!(
            round,
            arm,
            mean = scores[arm].mean,
            variance = scores[arm].variance,
            sample = scores[arm].sample,
            is_exploration = arm != greedy_arm,
            "Arm selected"
        );

        self.last_selection = Some(ArmSelection {
            round,
            arm,
            scores,
            is_exploration: arm != greedy_arm,
        });
        Ok(arm)
    }

    /// Reveal the reward of the arm chosen by the preceding [`action`](Self::action).
    ///
    /// Folds the chosen context's gradient into the confidence matrix,
    /// retrains the network when `(t + 1) % frequency == 0`, then advances t.
    /// A NaN or infinite reward is rejected with [`Error::InvalidReward`] and
    /// leaves the agent waiting for a valid reward.
    pub fn update(&mut self, reward: f64) -> Result<()> {
        self.phase.check_update()?;
        check_reward(reward)?;

        let round = self.history.len();
        let context = self.history.context(round);
        let (_, gradient) = self.network.gradient(&context)?;

        self.confidence.rank_one_update(&gradient)?;
        self.history.record_reward(reward)?;
        self.phase = AgentPhase::ReadyForAction;

        if (round + 1) % self.config.frequency == 0 {
            let (contexts, rewards) = self.history.observations(round + 1);
            let report = self.retrainer.retrain(
                &mut self.network,
                &contexts,
                &rewards,
                round,
                &mut self.shuffle_rng,
                &self.cancel,
            )?;
            if report.cancelled {
                self.cancel.clear();
            }
            self.retrain_count += 1;
            self.last_retrain = Some(report);
        }

        Ok(())
    }

    /// Handle for stopping a long retrain from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Completed rounds t.
    pub fn rounds(&self) -> usize {
        self.history.len()
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    pub fn confidence(&self) -> &ConfidenceMatrix {
        &self.confidence
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Realized rewards, length T. Entries at index >= t read as 0.0.
    pub fn history_reward(&self) -> &[f64] {
        self.history.rewards()
    }

    /// Chosen arms, length T. Entries at index >= t read as 0.
    pub fn history_action(&self) -> &[usize] {
        self.history.actions()
    }

    /// Chosen contexts, T × d. Rows at index >= t are zero, except the open
    /// round between `action` and `update`.
    pub fn history_context(&self) -> &DMatrix<f64> {
        self.history.contexts()
    }

    /// Predicted mean of the chosen arm, length T.
    pub fn predicted_rewards(&self) -> &[f64] {
        self.history.predicted()
    }

    pub fn last_selection(&self) -> Option<&ArmSelection> {
        self.last_selection.as_ref()
    }

    pub fn last_retrain(&self) -> Option<&RetrainReport> {
        self.last_retrain.as_ref()
    }

    pub fn retrain_count(&self) -> u64 {
        self.retrain_count
    }

    /// Get summary statistics for logging.
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            rounds: self.history.len(),
            horizon: self.history.horizon(),
            num_parameters: self.network.num_parameters(),
            retrain_count: self.retrain_count,
            confidence_trace: self.confidence.trace(),
            last_retrain_loss: self.last_retrain.as_ref().and_then(|r| r.final_loss()),
        }
    }
}

impl BanditAgent for NeuralAgent {
    fn action(&mut self, contexts: &DMatrix<f64>) -> Result<usize> {
        NeuralAgent::action(self, contexts)
    }

    fn update(&mut self, reward: f64) -> Result<()> {
        NeuralAgent::update(self, reward)
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn name(&self) -> &str {
        "neural_ts"
    }
}

impl std::fmt::Debug for NeuralAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralAgent")
            .field("rounds", &self.history.len())
            .field("horizon", &self.history.horizon())
            .field("phase", &self.phase)
            .field("num_parameters", &self.network.num_parameters())
            .field("retrain_count", &self.retrain_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(arms: usize, horizon: usize, frequency: usize) -> NeuralAgent {
        let config = AgentConfig::new(arms, horizon, 2)
            .with_width(8)
            .with_frequency(frequency)
            .with_batch_size(2);
        NeuralAgent::new(config).unwrap()
    }

    fn eye2() -> DMatrix<f64> {
        DMatrix::identity(2, 2)
    }

    #[test]
    fn test_new_rejects_missing_batch_size() {
        let err = NeuralAgent::new(AgentConfig::new(2, 5, 2)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_initial_state() {
        let agent = agent(2, 5, 2);
        assert_eq!(agent.rounds(), 0);
        assert_eq!(agent.phase(), AgentPhase::ReadyForAction);
        assert_eq!(agent.confidence().dimension(), agent.network().num_parameters());
        assert_eq!(agent.history_reward().len(), 5);
        assert_eq!(agent.history_context().shape(), (5, 2));
        assert!(agent.last_selection().is_none());
    }

    #[test]
    fn test_action_records_choice_without_advancing() {
        let mut agent = agent(2, 5, 10);
        let arm = agent.action(&eye2()).unwrap();
        assert!(arm < 2);
        assert_eq!(agent.rounds(), 0);
        assert_eq!(agent.phase(), AgentPhase::ReadyForUpdate);
        assert_eq!(agent.history_action()[0], arm);
        assert_eq!(agent.history.context(0), context_row(&eye2(), arm));

        let selection = agent.last_selection().unwrap();
        assert_eq!(selection.arm, arm);
        assert_eq!(selection.round, 0);
        assert_eq!(selection.scores.len(), 2);
        assert!(selection.scores.iter().all(|s| s.variance >= 0.0));
        assert_eq!(agent.predicted_rewards()[0], selection.scores[arm].mean);
    }

    #[test]
    fn test_action_twice_is_sequence_error() {
        let mut agent = agent(2, 5, 10);
        agent.action(&eye2()).unwrap();
        let before = agent.history().clone();
        assert!(matches!(agent.action(&eye2()), Err(Error::Sequence(_))));
        assert_eq!(agent.history(), &before);
        assert_eq!(agent.phase(), AgentPhase::ReadyForUpdate);
    }

    #[test]
    fn test_dimension_errors_leave_state_untouched() {
        let mut agent = agent(2, 5, 10);
        let wrong_rows = DMatrix::identity(3, 2);
        let wrong_cols = DMatrix::zeros(2, 4);
        assert_eq!(
            agent.action(&wrong_rows).unwrap_err(),
            Error::dimension("context rows (arms)", 2, 3)
        );
        assert_eq!(
            agent.action(&wrong_cols).unwrap_err(),
            Error::dimension("context columns", 2, 4)
        );
        assert_eq!(agent.phase(), AgentPhase::ReadyForAction);
        assert!(agent.last_selection().is_none());
        // still usable
        assert!(agent.action(&eye2()).is_ok());
    }

    #[test]
    fn test_update_advances_and_grows_confidence() {
        let mut agent = agent(2, 5, 10);
        let trace_before = agent.confidence().trace();
        agent.action(&eye2()).unwrap();
        agent.update(0.7).unwrap();
        assert_eq!(agent.rounds(), 1);
        assert_eq!(agent.history_reward()[0], 0.7);
        assert_eq!(agent.phase(), AgentPhase::ReadyForAction);
        assert!(agent.confidence().trace() > trace_before);
        assert_eq!(agent.confidence().updates(), 1);
    }

    #[test]
    fn test_retrain_fires_on_frequency() {
        let mut agent = agent(2, 6, 3);
        for round in 0..6 {
            agent.action(&eye2()).unwrap();
            agent.update(if round % 2 == 0 { 1.0 } else { 0.0 }).unwrap();
            let expected = ((round + 1) / 3) as u64;
            assert_eq!(agent.retrain_count(), expected, "after round {round}");
        }
        let report = agent.last_retrain().unwrap();
        assert_eq!(report.round, 5);
        assert_eq!(report.samples, 6);
        assert_eq!(report.epochs_requested, 5);
        assert_eq!(report.epochs_completed, 5);
        assert!(agent.summary().last_retrain_loss.is_some());
    }

    #[test]
    fn test_exhausted_agent_rejects_action() {
        let mut agent = agent(2, 2, 10);
        for _ in 0..2 {
            agent.action(&eye2()).unwrap();
            agent.update(1.0).unwrap();
        }
        assert!(matches!(agent.action(&eye2()), Err(Error::Sequence(ref m)) if m.contains("exhausted")));
        assert!(matches!(agent.update(1.0), Err(Error::Sequence(_))));
        assert_eq!(agent.rounds(), 2);
    }

    #[test]
    fn test_cancelled_retrain_still_completes_update() {
        let mut agent = agent(2, 4, 2);
        agent.action(&eye2()).unwrap();
        agent.update(1.0).unwrap();
        agent.action(&eye2()).unwrap();

        let handle = agent.cancel_handle();
        handle.cancel();
        agent.update(0.0).unwrap();

        assert_eq!(agent.rounds(), 2);
        let report = agent.last_retrain().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.epochs_completed, 0);
        // the flag is consumed by the cancelled retrain
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_zero_nu_is_greedy() {
        let config = AgentConfig::new(3, 5, 2)
            .with_width(8)
            .with_nu(0.0)
            .with_batch_size(1);
        let mut agent = NeuralAgent::new(config).unwrap();
        let contexts = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 0.5, -0.5]);
        let arm = agent.action(&contexts).unwrap();
        let selection = agent.last_selection().unwrap();
        assert!(!selection.is_exploration);
        for score in &selection.scores {
            assert_eq!(score.sample, score.mean);
        }
        let means: Vec<f64> = selection.scores.iter().map(|s| s.mean).collect();
        assert_eq!(arm, argmax_first(&means));
    }

    #[test]
    fn test_trait_object_dispatch() {
        let mut agent: Box<dyn BanditAgent> = Box::new(agent(2, 3, 10));
        assert_eq!(agent.name(), "neural_ts");
        agent.action(&eye2()).unwrap();
        agent.update(1.0).unwrap();
        assert_eq!(agent.rounds(), 1);
        assert_eq!(agent.horizon(), 3);
    }
}
