#![deny(unreachable_pub)]

// Core modules
mod errors;

pub mod bandit;
pub mod config;
pub mod logging;
pub mod simulation;

// Re-exports
pub use bandit::{
    AgentPhase, AgentSummary, ArmScore, ArmSelection, BanditAgent, BestAgent, CancelHandle,
    ConfidenceMatrix, History, NeuralAgent, NeuralNetwork, RetrainReport, UniformAgent,
};
pub use config::AgentConfig;
pub use errors::{Error, Result};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use simulation::{run_episode, EpisodeSummary, LinearOracleEnv};
