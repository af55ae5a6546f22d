use chrono::{Duration, TimeZone, Utc};
use matchcast::application::bootstrap::{EngineRepositories, EngineServices};
use matchcast::application::ml::GoalRateEngine;
use matchcast::application::training::BatchTrainingOrchestrator;
use matchcast::config::{BatchConfig, Config, GoalRateConfig};
use matchcast::domain::errors::ModelError;
use matchcast::domain::ports::{BatchTrainable, PredictionModel};
use matchcast::domain::types::{GameState, ModelFamily, Observation, TeamFeatures};
use matchcast::infrastructure::features::InMemoryFeatureProvider;
use matchcast::infrastructure::persistence::InMemoryDocumentRepository;
use std::collections::BTreeMap;
use std::sync::Arc;

const TEAMS: [(&str, [f64; 2]); 4] = [
    ("EDM", [0.9, 0.8]),
    ("COL", [0.8, 0.7]),
    ("SJS", [0.1, 0.2]),
    ("CHI", [0.2, 0.1]),
];

fn provider() -> InMemoryFeatureProvider {
    TEAMS
        .iter()
        .fold(InMemoryFeatureProvider::new(), |provider, (team, values)| {
            provider.with_team(team, values.to_vec())
        })
}

/// Strong teams (first two) always beat weak ones, alternating home ice.
fn season(games: usize) -> Vec<Observation> {
    let start = Utc.with_ymd_and_hms(2025, 10, 7, 23, 0, 0).unwrap();
    (0..games)
        .map(|i| {
            let strong = TEAMS[i % 2].0;
            let weak = TEAMS[2 + (i / 2) % 2].0;
            let date = start + Duration::days(i as i64);
            if i % 3 == 0 {
                Observation::new(format!("g{i}"), weak, strong, 1, 4, date)
            } else {
                Observation::new(format!("g{i}"), strong, weak, 5, 2, date)
            }
        })
        .collect()
}

#[test]
fn test_queue_conservation_across_families() {
    let services = EngineServices::build_with(
        &Config::default(),
        Arc::new(provider()),
        EngineRepositories::in_memory(),
    );

    let mut drained: BTreeMap<ModelFamily, usize> = BTreeMap::new();
    for obs in season(30) {
        let report = services.orchestrator.submit_observation(obs).unwrap();
        for (family, training) in &report.trained {
            *drained.entry(*family).or_insert(0) += training.absorbed + training.skipped;
        }
        for (family, len) in &report.queue_lengths {
            assert!(
                *len <= services.orchestrator.thresholds()[family]
                    || report.failed.contains_key(family),
                "{family} queue over threshold without a failed retrain"
            );
        }
    }

    let lengths = services.orchestrator.queue_lengths();
    for family in ModelFamily::ALL {
        let total = lengths[&family] + drained.get(&family).copied().unwrap_or(0);
        assert_eq!(total, 30, "{family} lost or duplicated observations");
    }
    assert_eq!(services.orchestrator.total_observed(), 30);

    // Ratings are applied on every submission.
    assert_eq!(lengths[&ModelFamily::Rating], 0);
    assert_eq!(services.elo.games_played("EDM"), 15);

    assert!(services.gradient_boosting.is_trained());
    assert!(services.random_forest.is_trained());

    let strong = TeamFeatures::new("EDM", vec![0.9, 0.8]);
    let weak = TeamFeatures::new("SJS", vec![0.1, 0.2]);
    for result in services.predict_all(&strong, &weak).unwrap() {
        assert!(
            result.win_probability > 0.5,
            "{} favoured the weak side: {}",
            result.model_name,
            result.win_probability
        );
    }
}

fn goal_rate_lane(size: usize) -> (Arc<GoalRateEngine>, BatchTrainingOrchestrator) {
    let engine = Arc::new(GoalRateEngine::new(
        GoalRateConfig::default(),
        Arc::new(InMemoryDocumentRepository::new()),
    ));
    let trainers: Vec<Arc<dyn BatchTrainable>> = vec![engine.clone()];
    let orchestrator = BatchTrainingOrchestrator::new(
        BatchConfig::fixed(size),
        trainers,
        Arc::new(InMemoryDocumentRepository::new()),
    );
    (engine, orchestrator)
}

#[test]
fn test_threshold_five_drains_once() {
    let (engine, orchestrator) = goal_rate_lane(5);
    let games = season(6);

    let mut retrains = 0;
    for obs in games.iter().take(5).cloned() {
        if orchestrator.submit_observation(obs).unwrap().retrained() {
            retrains += 1;
        }
    }
    assert_eq!(retrains, 1);
    assert_eq!(orchestrator.queue_lengths()[&ModelFamily::GoalRate], 0);
    assert_eq!(engine.absorbed_ids().len(), 5);

    let report = orchestrator.submit_observation(games[5].clone()).unwrap();
    assert!(!report.retrained());
    assert_eq!(report.queue_lengths[&ModelFamily::GoalRate], 1);
}

#[test]
fn test_live_game_is_rejected_everywhere() {
    let (engine, orchestrator) = goal_rate_lane(1);
    let live = season(1).remove(0).with_state(GameState::Live);

    match orchestrator.submit_observation(live) {
        Err(ModelError::NotFinished { observation_id, .. }) => assert_eq!(observation_id, "g0"),
        other => panic!("expected NotFinished, got {other:?}"),
    }
    assert_eq!(orchestrator.queue_lengths()[&ModelFamily::GoalRate], 0);

    let result = engine
        .predict(&TeamFeatures::bare("EDM"), &TeamFeatures::bare("SJS"))
        .unwrap();
    assert_eq!(result.win_probability, 0.5);
}

#[test]
fn test_force_training_drains_below_threshold() {
    let services = EngineServices::build_with(
        &Config::default(),
        Arc::new(provider()),
        EngineRepositories::in_memory(),
    );
    for obs in season(3) {
        services.orchestrator.submit_observation(obs).unwrap();
    }

    // Three rows are too few for either tree model.
    match services.orchestrator.force_batch_training() {
        Err(ModelError::TrainingFailed { families }) => {
            assert!(families.contains("gradient_boosting"));
            assert!(families.contains("random_forest"));
            assert!(!families.contains("goal_rate"));
        }
        other => panic!("expected TrainingFailed, got {other:?}"),
    }

    let lengths = services.orchestrator.queue_lengths();
    assert_eq!(lengths[&ModelFamily::GoalRate], 0);
    assert_eq!(lengths[&ModelFamily::GradientBoosting], 3);
    assert_eq!(lengths[&ModelFamily::RandomForest], 3);
}

/// Second handle on the same stores, as a restarted process would see them.
fn reopen(repos: &EngineRepositories) -> EngineRepositories {
    EngineRepositories {
        ratings: repos.ratings.clone(),
        boosting: repos.boosting.clone(),
        forest: repos.forest.clone(),
        goal_rates: repos.goal_rates.clone(),
        queues: repos.queues.clone(),
    }
}

#[test]
fn test_force_training_without_features_keeps_tree_queues() {
    let repos = EngineRepositories::in_memory();
    let games = season(33);
    {
        let services =
            EngineServices::build_with(&Config::default(), Arc::new(provider()), reopen(&repos));
        for obs in games.iter().take(30).cloned() {
            services.orchestrator.submit_observation(obs).unwrap();
        }
        services.orchestrator.force_batch_training().unwrap();
        assert!(services.gradient_boosting.is_trained());
        assert!(services.random_forest.is_trained());
    }

    // A later run started without a feature file.
    let services = EngineServices::build_with(
        &Config::default(),
        Arc::new(InMemoryFeatureProvider::new()),
        reopen(&repos),
    );
    let rows_before = services.gradient_boosting.training_rows();
    assert!(rows_before > 0);
    for obs in games.iter().skip(30).cloned() {
        services.orchestrator.submit_observation(obs).unwrap();
    }

    match services.orchestrator.force_batch_training() {
        Err(ModelError::TrainingFailed { families }) => {
            assert!(families.contains("gradient_boosting"));
            assert!(families.contains("random_forest"));
            assert!(!families.contains("goal_rate"));
        }
        other => panic!("expected TrainingFailed, got {other:?}"),
    }

    let lengths = services.orchestrator.queue_lengths();
    assert_eq!(lengths[&ModelFamily::GradientBoosting], 3);
    assert_eq!(lengths[&ModelFamily::RandomForest], 3);
    assert_eq!(lengths[&ModelFamily::GoalRate], 0);
    assert_eq!(services.gradient_boosting.training_rows(), rows_before);

    // The queued games are still trained once features are available again.
    let restarted =
        EngineServices::build_with(&Config::default(), Arc::new(provider()), reopen(&repos));
    let trained = restarted.orchestrator.force_batch_training().unwrap();
    assert_eq!(trained[&ModelFamily::GradientBoosting].absorbed, 3);
    assert_eq!(trained[&ModelFamily::RandomForest].absorbed, 3);
}
