use chrono::{Duration, Utc};

use super::*;

fn generation(status: GenerationStatus, heartbeat_age_seconds: i64) -> Generation {
    let now = Utc::now().naive_utc();
    Generation {
        id: 1,
        status,
        dimension: 768,
        distance_metric: DistanceMetric::Cosine.to_string(),
        created_at: now,
        heartbeat_at: now - Duration::seconds(heartbeat_age_seconds),
        committed_at: None,
        error_message: None,
    }
}

#[test]
fn generation_status_display() {
    assert_eq!(GenerationStatus::Staging.to_string(), "Staging");
    assert_eq!(GenerationStatus::Active.to_string(), "Active");
    assert_eq!(GenerationStatus::Failed.to_string(), "Failed");
}

#[test]
fn distance_metric_is_stored_lowercase() {
    assert_eq!(DistanceMetric::Cosine.as_str(), "cosine");
    assert_eq!(DistanceMetric::Cosine.to_string(), "cosine");
}

#[test]
fn staleness_only_applies_to_staging() {
    assert!(generation(GenerationStatus::Staging, 300).is_stale(120));
    assert!(!generation(GenerationStatus::Staging, 10).is_stale(120));
    assert!(!generation(GenerationStatus::Failed, 300).is_stale(120));
    assert!(!generation(GenerationStatus::Active, 300).is_stale(120));
}

#[test]
fn status_helpers() {
    assert!(generation(GenerationStatus::Active, 0).is_active());
    assert!(generation(GenerationStatus::Staging, 0).is_staging());
    assert!(!generation(GenerationStatus::Failed, 0).is_active());
}
