use chrono::{Duration, TimeZone, Utc};
use matchcast::application::bootstrap::{EngineRepositories, EngineServices};
use matchcast::config::Config;
use matchcast::domain::types::{ModelFamily, Observation, TeamFeatures};
use matchcast::infrastructure::features::InMemoryFeatureProvider;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Readers keep scoring while the writer feeds results and the tree models
/// retrain underneath them. Every answer must be a complete, bounded result.
#[test]
fn test_predict_during_training() {
    let provider = InMemoryFeatureProvider::new()
        .with_team("VGK", vec![0.8, 0.6])
        .with_team("DAL", vec![0.7, 0.5])
        .with_team("ANA", vec![0.2, 0.3])
        .with_team("ARI", vec![0.1, 0.4]);
    let services = Arc::new(EngineServices::build_with(
        &Config::default(),
        Arc::new(provider),
        EngineRepositories::in_memory(),
    ));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..6)
        .map(|_| {
            let services = Arc::clone(&services);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let home = TeamFeatures::new("VGK", vec![0.8, 0.6]);
                let away = TeamFeatures::new("ANA", vec![0.2, 0.3]);
                let mut calls = 0usize;
                while !done.load(Ordering::SeqCst) || calls == 0 {
                    let results = services
                        .predict_all(&home, &away)
                        .expect("predict must not fail on well-formed features");
                    assert_eq!(results.len(), 4);
                    for result in results {
                        assert!((0.0..=1.0).contains(&result.win_probability));
                        assert!((0.0..=1.0).contains(&result.confidence));
                        assert!(!result.predicted_score.is_empty());
                    }
                    calls += 1;
                }
                calls
            })
        })
        .collect();

    let start = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
    let pairs = [("VGK", "ANA"), ("ARI", "DAL"), ("DAL", "ANA"), ("ARI", "VGK")];
    for i in 0..60 {
        let (home, away) = pairs[i % pairs.len()];
        let (home_score, away_score) = if home == "VGK" || home == "DAL" {
            (4, 1)
        } else {
            (2, 5)
        };
        let obs = Observation::new(
            format!("g{i}"),
            home,
            away,
            home_score,
            away_score,
            start + Duration::days(i as i64),
        );
        services.orchestrator.submit_observation(obs).unwrap();
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(services.elo.games_played("VGK"), 30);
    assert!(services.gradient_boosting.is_trained());
}

#[test]
fn test_concurrent_submissions_are_all_counted() {
    let services = Arc::new(EngineServices::build_with(
        &Config::default(),
        Arc::new(InMemoryFeatureProvider::new()),
        EngineRepositories::in_memory(),
    ));
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let services = Arc::clone(&services);
            thread::spawn(move || {
                for i in 0..10 {
                    let obs = Observation::new(
                        format!("w{w}-g{i}"),
                        "NYR",
                        "NJD",
                        3,
                        2,
                        start + Duration::hours((w * 10 + i) as i64),
                    );
                    services.orchestrator.submit_observation(obs).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(services.orchestrator.total_observed(), 40);
    assert_eq!(services.elo.games_played("NYR"), 40);
    let absorbed = services.goal_rate.current_table().unwrap().games_played["NJD"] as usize;
    let queued = services.orchestrator.queue_lengths()[&ModelFamily::GoalRate];
    assert_eq!(absorbed + queued, 40);
}
