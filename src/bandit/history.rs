//! Fixed-capacity per-round history shared by all agents.
//!
//! Slots are written in round order and never rewritten. Slots at or beyond
//! the current round read as zero (zero row for contexts); callers should
//! only look at the first [`History::len`] entries.

use nalgebra::DMatrix;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    actions: Vec<usize>,
    rewards: Vec<f64>,
    predicted: Vec<f64>,
    /// One row per round.
    contexts: DMatrix<f64>,
    /// Completed rounds (slots with a reward).
    len: usize,
}

impl History {
    pub fn new(horizon: usize, context_dim: usize) -> Self {
        Self {
            actions: vec![0; horizon],
            rewards: vec![0.0; horizon],
            predicted: vec![0.0; horizon],
            contexts: DMatrix::zeros(horizon, context_dim),
            len: 0,
        }
    }

    pub fn horizon(&self) -> usize {
        self.rewards.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.horizon()
    }

    /// Record the decision for the current round (slot `len`).
    pub fn record_choice(&mut self, action: usize, context: &[f64], predicted: f64) -> Result<()> {
        let round = self.len;
        if round >= self.horizon() {
            return Err(Error::sequence(format!(
                "history is full after {} rounds",
                self.horizon()
            )));
        }
        if context.len() != self.contexts.ncols() {
            return Err(Error::dimension("context length", self.contexts.ncols(), context.len()));
        }
        self.actions[round] = action;
        self.predicted[round] = predicted;
        for (j, value) in context.iter().enumerate() {
            self.contexts[(round, j)] = *value;
        }
        Ok(())
    }

    /// Record the reward for the current round and close it.
    pub fn record_reward(&mut self, reward: f64) -> Result<()> {
        let round = self.len;
        if round >= self.horizon() {
            return Err(Error::sequence(format!(
                "history is full after {} rounds",
                self.horizon()
            )));
        }
        self.rewards[round] = reward;
        self.len += 1;
        Ok(())
    }

    /// Chosen arm per round, length T.
    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    /// Realized reward per round, length T.
    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    /// Predicted mean of the chosen arm per round, length T.
    pub fn predicted(&self) -> &[f64] {
        &self.predicted
    }

    /// Context of the chosen arm per round, shape T × d.
    pub fn contexts(&self) -> &DMatrix<f64> {
        &self.contexts
    }

    /// Context recorded for `round`, including the open round.
    ///
    /// # Panics
    ///
    /// Panics if `round >= horizon()`. Use [`History::get_context`] for a
    /// checked lookup.
    pub fn context(&self, round: usize) -> Vec<f64> {
        self.contexts.row(round).iter().copied().collect()
    }

    /// Context recorded for `round`, or `None` past the horizon.
    pub fn get_context(&self, round: usize) -> Option<Vec<f64>> {
        (round < self.horizon()).then(|| self.context(round))
    }

    /// Contexts and rewards of rounds `0..count`, in round order.
    pub fn observations(&self, count: usize) -> (DMatrix<f64>, Vec<f64>) {
        let count = count.min(self.horizon());
        (
            self.contexts.rows(0, count).into_owned(),
            self.rewards[..count].to_vec(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_round_order() {
        let mut history = History::new(3, 2);
        assert!(history.is_empty());

        history.record_choice(1, &[0.5, -0.5], 0.2).unwrap();
        // choice alone does not close the round
        assert_eq!(history.len(), 0);
        history.record_reward(1.5).unwrap();
        assert_eq!(history.len(), 1);

        history.record_choice(0, &[1.0, 2.0], -0.1).unwrap();
        history.record_reward(0.0).unwrap();

        assert_eq!(&history.actions()[..2], &[1, 0]);
        assert_eq!(&history.rewards()[..2], &[1.5, 0.0]);
        assert_eq!(&history.predicted()[..2], &[0.2, -0.1]);
        assert_eq!(history.context(1), vec![1.0, 2.0]);
        // unwritten slots read as zero
        assert_eq!(history.rewards()[2], 0.0);
        assert_eq!(history.context(2), vec![0.0, 0.0]);
        assert_eq!(history.contexts().shape(), (3, 2));
    }

    #[test]
    fn test_context_lookup_past_horizon() {
        let mut history = History::new(2, 2);
        history.record_choice(0, &[3.0, 4.0], 0.0).unwrap();
        assert_eq!(history.get_context(0), Some(vec![3.0, 4.0]));
        assert_eq!(history.get_context(1), Some(vec![0.0, 0.0]));
        assert_eq!(history.get_context(2), None);
    }

    #[test]
    #[should_panic]
    fn test_context_past_horizon_panics() {
        let history = History::new(2, 2);
        let _ = history.context(2);
    }

    #[test]
    fn test_full_history_rejects_writes() {
        let mut history = History::new(1, 2);
        history.record_choice(0, &[1.0, 1.0], 0.0).unwrap();
        history.record_reward(1.0).unwrap();
        assert!(history.is_full());
        assert!(matches!(history.record_choice(0, &[1.0, 1.0], 0.0), Err(Error::Sequence(_))));
        assert!(matches!(history.record_reward(1.0), Err(Error::Sequence(_))));
    }

    #[test]
    fn test_context_width_checked() {
        let mut history = History::new(2, 2);
        assert!(matches!(
            history.record_choice(0, &[1.0, 2.0, 3.0], 0.0),
            Err(Error::Dimension { .. })
        ));
    }

    #[test]
    fn test_observations_window() {
        let mut history = History::new(4, 2);
        for r in 0..3 {
            history.record_choice(r, &[r as f64, 1.0], 0.0).unwrap();
            history.record_reward(r as f64 * 10.0).unwrap();
        }
        let (x, y) = history.observations(2);
        assert_eq!(x.shape(), (2, 2));
        assert_eq!(x[(1, 0)], 1.0);
        assert_eq!(y, vec![0.0, 10.0]);
    }
}
