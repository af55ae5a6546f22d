//! matchcast - operator CLI for the continuous-learning prediction engines
//!
//! # Usage
//! ```sh
//! matchcast replay results.json --features features.json
//! matchcast ratings
//! matchcast history TOR
//! matchcast predict TOR MTL --features features.json
//! matchcast force-train --features features.json
//! ```
//!
//! State lives in `MATCHCAST_DATA_DIR` (default `data/`). `MATCHCAST_CONFIG_FILE`
//! names an optional TOML file of model parameters.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use matchcast::application::bootstrap::EngineServices;
use matchcast::config::Config;
use matchcast::domain::ports::FeatureProvider;
use matchcast::domain::types::{Observation, TeamFeatures};
use matchcast::infrastructure::features::InMemoryFeatureProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "Continuous-learning match prediction engines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON array of finished games through the batch orchestrator
    Replay {
        observations: PathBuf,

        /// JSON array of feature snapshots for the tree models
        #[arg(short, long)]
        features: Option<PathBuf>,
    },

    /// Print current ratings, strongest first
    Ratings,

    /// Print the rating history of one team
    History { team: String },

    /// Score a matchup with every model
    Predict {
        home: String,
        away: String,

        #[arg(short, long)]
        features: Option<PathBuf>,
    },

    /// Retrain every model with pending observations
    ForceTrain {
        /// Feature snapshots for the tree models; without them their queues stay pending
        #[arg(short, long)]
        features: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Replay {
            observations,
            features,
        } => replay(&config, &observations, features.as_deref()),
        Commands::Ratings => {
            let services = EngineServices::build(&config, load_features(None)?)?;
            let mut ratings: Vec<(String, f64)> = services.elo.all_ratings().into_iter().collect();
            ratings.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (rank, (team, rating)) in ratings.iter().enumerate() {
                println!(
                    "{:>3}. {:<6} {:>8.1}  conf {:.2}  games {}",
                    rank + 1,
                    team,
                    rating,
                    services.elo.confidence(team),
                    services.elo.games_played(team)
                );
            }
            Ok(())
        }
        Commands::History { team } => {
            let services = EngineServices::build(&config, load_features(None)?)?;
            for entry in services.elo.rating_history(&team) {
                println!(
                    "{}  {} {:<4} vs {:<6} {:>8.1} -> {:>8.1} ({:+.1}, K {:.1})",
                    entry.timestamp.format("%Y-%m-%d"),
                    entry.score_line,
                    entry.outcome.to_string(),
                    entry.opponent,
                    entry.old_rating,
                    entry.new_rating,
                    entry.delta,
                    entry.k_factor
                );
            }
            Ok(())
        }
        Commands::Predict {
            home,
            away,
            features,
        } => {
            let provider = load_features(features.as_deref())?;
            let services = EngineServices::build(&config, provider.clone())?;
            let now = Utc::now();
            let home = provider
                .team_features(&home, now)
                .unwrap_or_else(|| TeamFeatures::bare(home.as_str()));
            let away = provider
                .team_features(&away, now)
                .unwrap_or_else(|| TeamFeatures::bare(away.as_str()));

            let results = services.predict_all(&home, &away)?;
            for result in &results {
                println!(
                    "{:<20} p(home) {:.3}  conf {:.2}  score {:<5} weight {:.2}",
                    result.model_name,
                    result.win_probability,
                    result.confidence,
                    result.predicted_score,
                    result.weight
                );
            }
            Ok(())
        }
        Commands::ForceTrain { features } => {
            let services = EngineServices::build(&config, load_features(features.as_deref())?)?;
            let trained = services.orchestrator.force_batch_training()?;
            for (family, report) in trained {
                println!(
                    "{:<18} absorbed {} skipped {} fitted on {}",
                    family.as_str(),
                    report.absorbed,
                    report.skipped,
                    report.fitted_on
                );
            }
            Ok(())
        }
    }
}

fn load_features(path: Option<&Path>) -> Result<Arc<dyn FeatureProvider>> {
    let provider = match path {
        Some(path) => {
            let provider = InMemoryFeatureProvider::load_json(path)?;
            info!(
                "Loaded features for {} teams from {:?}",
                provider.team_count(),
                path
            );
            provider
        }
        None => InMemoryFeatureProvider::new(),
    };
    let provider: Arc<dyn FeatureProvider> = Arc::new(provider);
    Ok(provider)
}

fn replay(config: &Config, observations: &Path, features: Option<&Path>) -> Result<()> {
    let raw = std::fs::read_to_string(observations)
        .with_context(|| format!("Failed to read {:?}", observations))?;
    let mut games: Vec<Observation> =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", observations))?;
    games.sort_by_key(|obs| obs.game_date);

    let services = EngineServices::build(config, load_features(features)?)?;
    info!("Replaying {} observations from {:?}", games.len(), observations);

    let mut accepted = 0usize;
    let mut retrains = 0usize;
    for obs in games {
        let id = obs.id.clone();
        match services.orchestrator.submit_observation(obs) {
            Ok(report) => {
                accepted += 1;
                retrains += report.trained.len();
            }
            Err(e) => warn!("Replay: rejected {}: {}", id, e),
        }
    }

    info!(
        "Replay complete: {} accepted, {} retrains, queues {:?}",
        accepted,
        retrains,
        services.orchestrator.queue_lengths()
    );
    Ok(())
}
