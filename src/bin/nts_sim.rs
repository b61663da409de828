//! Synthetic bandit experiment driver.
//!
//! Runs the Neural Thompson Sampling agent and/or the baselines against a
//! seeded linear-oracle environment and prints a JSON summary to stdout.
//!
//! Usage:
//! ```
//! cargo run --release --bin nts_sim -- --rounds 500 --arms 4 --dim 8 --agent all
//! ```

use clap::{Parser, ValueEnum};
use neural_ts::{
    init_logging, run_episode, AgentConfig, BanditAgent, BestAgent, EpisodeSummary,
    LinearOracleEnv, LogConfig, LogFormat, NeuralAgent, UniformAgent,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AgentKind {
    Neural,
    Best,
    Uniform,
    All,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Pretty,
    Json,
    Compact,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pretty => LogFormat::Pretty,
            FormatArg::Json => LogFormat::Json,
            FormatArg::Compact => LogFormat::Compact,
        }
    }
}

#[derive(Parser)]
#[command(name = "nts_sim", about = "Neural Thompson Sampling on a synthetic contextual bandit")]
struct Cli {
    /// Agent(s) to run
    #[arg(long, value_enum, default_value = "all")]
    agent: AgentKind,

    /// Number of rounds (also the agents' horizon)
    #[arg(long, default_value = "500")]
    rounds: usize,

    /// Number of arms K
    #[arg(long, default_value = "4")]
    arms: usize,

    /// Context dimension d
    #[arg(long, default_value = "8")]
    dim: usize,

    /// Reward noise standard deviation
    #[arg(long, default_value = "0.1")]
    noise: f64,

    /// Seed for the environment and the agents
    #[arg(long, default_value = "12345")]
    seed: u64,

    /// Agent configuration JSON; overrides the network flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hidden width m
    #[arg(long, default_value = "20")]
    width: usize,

    /// Number of layers L
    #[arg(long, default_value = "2")]
    layers: usize,

    /// Exploration scale ν
    #[arg(long, default_value = "0.1")]
    nu: f64,

    /// Regularization λ
    #[arg(long, default_value = "1.0")]
    lambda: f64,

    /// SGD step size η
    #[arg(long, default_value = "0.01")]
    eta: f64,

    /// Retrain every N rounds
    #[arg(long, default_value = "50")]
    frequency: usize,

    /// Minibatch size for retraining
    #[arg(long, default_value = "50")]
    batch_size: usize,

    /// Stdout log format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: FormatArg,

    /// Directory for a rolling JSON log file
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
    rounds: usize,
    arms: usize,
    dim: usize,
    seed: u64,
    episodes: Vec<EpisodeSummary>,
}

fn agent_config(cli: &Cli) -> neural_ts::Result<AgentConfig> {
    let config = match &cli.config {
        Some(path) => AgentConfig::from_json_file(path)?,
        None => AgentConfig::new(cli.arms, cli.rounds, cli.dim)
            .with_width(cli.width)
            .with_layers(cli.layers)
            .with_nu(cli.nu)
            .with_lambda(cli.lambda)
            .with_eta(cli.eta)
            .with_frequency(cli.frequency)
            .with_batch_size(cli.batch_size)
            .with_random_seed(cli.seed),
    };
    if config.arms != cli.arms || config.context_dim != cli.dim || config.horizon < cli.rounds {
        return Err(neural_ts::Error::config(format!(
            "config (arms={}, context_dim={}, horizon={}) does not fit the run (arms={}, dim={}, rounds={})",
            config.arms, config.context_dim, config.horizon, cli.arms, cli.dim, cli.rounds
        )));
    }
    Ok(config)
}

fn build_agents(cli: &Cli, env: &LinearOracleEnv) -> neural_ts::Result<Vec<Box<dyn BanditAgent>>> {
    let mut agents: Vec<Box<dyn BanditAgent>> = Vec::new();
    if matches!(cli.agent, AgentKind::Neural | AgentKind::All) {
        agents.push(Box::new(NeuralAgent::new(agent_config(cli)?)?));
    }
    if matches!(cli.agent, AgentKind::Best | AgentKind::All) {
        agents.push(Box::new(BestAgent::new(
            cli.arms,
            cli.rounds,
            cli.dim,
            env.oracle().clone(),
        )?));
    }
    if matches!(cli.agent, AgentKind::Uniform | AgentKind::All) {
        agents.push(Box::new(UniformAgent::new(cli.arms, cli.rounds, cli.dim, cli.seed)?));
    }
    Ok(agents)
}

fn run(cli: &Cli) -> neural_ts::Result<Report> {
    // Environment is rebuilt per agent so every agent sees the same context stream.
    let template = LinearOracleEnv::new(cli.arms, cli.dim, cli.noise, cli.seed)?;
    let mut agents = build_agents(cli, &template)?;

    let mut episodes = Vec::with_capacity(agents.len());
    for agent in agents.iter_mut() {
        let mut env = template.clone();
        episodes.push(run_episode(agent.as_mut(), &mut env, cli.rounds)?);
    }

    Ok(Report {
        rounds: cli.rounds,
        arms: cli.arms,
        dim: cli.dim,
        seed: cli.seed,
        episodes,
    })
}

fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default().with_format(cli.log_format.into());
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir.clone());
    }
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    let report = match run(&cli) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Simulation failed: {e}");
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize report: {e}");
            std::process::exit(1);
        }
    }
}
