//! Periodic retraining of the reward network.
//!
//! Every retrain starts from the initial parameters and replays the full
//! recorded history with minibatch SGD:
//!
//! ```text
//! loss(θ) = Σ_batch (f(x_i; θ) − r_i)² / B  +  λ·‖θ − θ₀‖² / (2p)
//! ```
//!
//! The epoch count is capped at `min(t, 100)`.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::network::NeuralNetwork;
use crate::errors::{Error, Result};

/// Upper bound on epochs per retraining episode.
pub const MAX_EPOCHS: usize = 100;

/// Log the running loss every N epochs.
const LOSS_LOG_INTERVAL: usize = 20;

/// Shared flag used to stop a long retraining episode between epochs.
///
/// Clones observe the same flag. The agent clears it once a retrain has
/// honoured it.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running (or next) retrain stops at its next epoch boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Metrics for a single training epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch number (0-indexed)
    pub epoch: usize,
    /// Mean combined loss over the epoch's minibatches
    pub mean_loss: f64,
    /// Number of minibatches (SGD steps) in the epoch
    pub batches: usize,
}

/// Outcome of one retraining episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainReport {
    /// Round counter t at which the retrain fired
    pub round: usize,
    /// Number of (context, reward) pairs replayed, t + 1
    pub samples: usize,
    /// min(t, 100)
    pub epochs_requested: usize,
    pub epochs_completed: usize,
    pub epoch_metrics: Vec<EpochMetrics>,
    /// Stopped early through a [`CancelHandle`]
    pub cancelled: bool,
    /// Loss or parameters overflowed; the network was left at θ₀
    pub diverged: bool,
    /// ‖θ − θ₀‖² after training
    pub distance_from_initial_sq: f64,
}

impl RetrainReport {
    /// Mean loss of the last completed epoch.
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_metrics.last().map(|m| m.mean_loss)
    }
}

/// Minibatch boundaries for `samples` shuffled observations.
///
/// With `t = samples − 1` there are `t / batch_size` full batches followed by
/// one tail batch holding the remaining `t % batch_size + 1` samples, so the
/// tail is never empty and never larger than `batch_size`.
pub fn batch_ranges(samples: usize, batch_size: usize) -> Vec<Range<usize>> {
    if samples == 0 || batch_size == 0 {
        return Vec::new();
    }
    let full = (samples - 1) / batch_size;
    let mut ranges: Vec<Range<usize>> = (0..full)
        .map(|i| i * batch_size..(i + 1) * batch_size)
        .collect();
    // Tail batch
    ranges.push(full * batch_size..samples);
    ranges
}

/// Minibatch SGD trainer anchored at the network's initial parameters.
#[derive(Debug, Clone)]
pub struct Retrainer {
    lambda: f64,
    eta: f64,
    batch_size: usize,
}

impl Retrainer {
    pub fn new(lambda: f64, eta: f64, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("batch_size must be > 0, got 0"));
        }
        Ok(Self {
            lambda,
            eta,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Combined loss and per-layer gradients for one minibatch.
    pub fn batch_loss_and_gradients(
        &self,
        network: &NeuralNetwork,
        contexts: &DMatrix<f64>,
        rewards: &DVector<f64>,
    ) -> Result<(f64, Vec<DMatrix<f64>>)> {
        if contexts.nrows() != rewards.len() {
            return Err(Error::dimension("batch rewards", contexts.nrows(), rewards.len()));
        }
        let trace = network.forward_trace(contexts)?;
        let batch = rewards.len() as f64;
        let residual = trace.output() - rewards;
        let mse = residual.norm_squared() / batch;

        let upstream = residual * (2.0 / batch);
        let mut grads = network.backward(&trace, &upstream)?;

        let p = network.num_parameters() as f64;
        let reg_scale = self.lambda / p;
        for ((grad, live), init) in grads
            .iter_mut()
            .zip(network.layers())
            .zip(network.initial_layers())
        {
            *grad += (&live.weights - &init.weights) * reg_scale;
        }
        let regularization = network.regularization(self.lambda);

        Ok((mse + regularization, grads))
    }

    /// Reset `network` to its initial parameters and retrain on rounds `0..=round`.
    ///
    /// `contexts` holds one row per observation and `rewards` the matching
    /// rewards; both must contain exactly `round + 1` entries.
    pub fn retrain(
        &self,
        network: &mut NeuralNetwork,
        contexts: &DMatrix<f64>,
        rewards: &[f64],
        round: usize,
        rng: &mut StdRng,
        cancel: &CancelHandle,
    ) -> Result<RetrainReport> {
        let samples = round + 1;
        if contexts.nrows() != samples {
            return Err(Error::dimension("training contexts", samples, contexts.nrows()));
        }
        if rewards.len() != samples {
            return Err(Error::dimension("training rewards", samples, rewards.len()));
        }

        network.reset_to_initial();

        let epochs_requested = round.min(MAX_EPOCHS);
        let ranges = batch_ranges(samples, self.batch_size);
        let mut indices: Vec<usize> = (0..samples).collect();
        let mut epoch_metrics = Vec::with_capacity(epochs_requested);
        let mut cancelled = false;
        let mut diverged = false;

        info!(
            round,
            samples,
            epochs = epochs_requested,
            batches = ranges.len(),
            "Retraining network from initial parameters"
        );

        for epoch in 0..epochs_requested {
            if cancel.is_cancelled() {
                cancelled = true;
                warn!(round, epoch, "Retraining cancelled");
                break;
            }

            indices.shuffle(rng);
            let shuffled_x = contexts.select_rows(indices.iter());
            let shuffled_y = DVector::from_iterator(samples, indices.iter().map(|&i| rewards[i]));

            let mut loss_sum = 0.0;
            for range in &ranges {
                let x = shuffled_x.rows(range.start, range.len()).into_owned();
                let y = shuffled_y.rows(range.start, range.len()).into_owned();
                let (loss, grads) = self.batch_loss_and_gradients(network, &x, &y)?;
                if !loss.is_finite() {
                    diverged = true;
                    break;
                }
                network.apply_gradient_step(&grads, self.eta)?;
                loss_sum += loss;
            }
            if diverged || !network.is_finite() {
                diverged = true;
                break;
            }

            let mean_loss = loss_sum / ranges.len() as f64;
            epoch_metrics.push(EpochMetrics {
                epoch,
                mean_loss,
                batches: ranges.len(),
            });

            if (epoch + 1) % LOSS_LOG_INTERVAL == 0 {
                debug!(round, epoch = epoch + 1, mean_loss, "Training epoch");
            }
        }

        if diverged {
            network.reset_to_initial();
            warn!(
                round,
                epoch = epoch_metrics.len(),
                "Retraining diverged, network reset to initial parameters"
            );
        }

        let report = RetrainReport {
            round,
            samples,
            epochs_requested,
            epochs_completed: epoch_metrics.len(),
            epoch_metrics,
            cancelled,
            diverged,
            distance_from_initial_sq: network.distance_sq_from_initial(),
        };

        info!(
            round,
            epochs_completed = report.epochs_completed,
            final_loss = report.final_loss().unwrap_or(f64::NAN),
            cancelled,
            diverged,
            "Retraining finished"
        );

        Ok(report)
    }
}
