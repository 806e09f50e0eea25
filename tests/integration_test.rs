//! End-to-end checks against a running gateway (`BASE_URL`, default
//! `http://localhost:8080`) polling the reference `gateway.toml`
//! deployment.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LabeledSample {
    register: i16,
    name: String,
    unit: String,
    value: f64,
    captured_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AlarmStateView {
    register: u16,
    label: String,
    condition: String,
    streak: u32,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    device: String,
    samples: Vec<LabeledSample>,
    alarms: Vec<AlarmStateView>,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
async fn health_endpoint_is_up() -> Result<()> {
    // ---
    let response = Client::new()
        .get(format!("{}/health", base_url()))
        .send()
        .await?;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ok");

    Ok(())
}

#[tokio::test]
async fn latest_returns_ordered_full_batches() -> Result<()> {
    // ---
    let url = format!("{}/devices/motor-a/latest?limit=25", base_url());
    let latest: LatestResponse = Client::new().get(&url).send().await?.json().await?;

    assert_eq!(latest.device, "motor-a");
    assert!(
        !latest.samples.is_empty(),
        "No samples returned from {} - has the loop completed a cycle?",
        url
    );

    // 0) Every sample is labeled through the register map
    for s in &latest.samples {
        assert!(!s.name.is_empty(), "register {} has no name", s.register);
        assert!(!s.unit.is_empty(), "register {} has no unit", s.register);
        assert!(s.value >= 0.0, "raw register values are unsigned");
    }

    // 1) Newest first, never increasing
    for pair in latest.samples.windows(2) {
        assert!(
            pair[0].captured_at >= pair[1].captured_at,
            "samples out of order: {} before {}",
            pair[0].captured_at,
            pair[1].captured_at
        );
    }

    // 2) Batches are atomic: every capture timestamp present in the
    //    response covers a distinct, non-repeating register set
    let mut seen: Vec<(DateTime<Utc>, i16)> = Vec::new();
    for s in &latest.samples {
        let key = (s.captured_at, s.register);
        assert!(
            !seen.contains(&key),
            "duplicate (timestamp, register) pair {:?}",
            key
        );
        seen.push(key);
    }

    // 3) Alarm state is present for every configured rule
    assert!(!latest.alarms.is_empty(), "no alarm state in response");
    for alarm in &latest.alarms {
        assert!(
            alarm.condition == "normal" || alarm.condition == "alarm",
            "unexpected condition '{}' for register {}",
            alarm.condition,
            alarm.register
        );
        assert!(!alarm.label.is_empty());
        if alarm.condition == "alarm" {
            assert!(alarm.streak >= 1, "alarm with empty streak");
        }
    }

    Ok(())
}

#[tokio::test]
async fn unknown_device_is_not_found() -> Result<()> {
    // ---
    let url = format!("{}/devices/no-such-device/latest", base_url());
    let response = Client::new().get(&url).send().await?;

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn limit_bounds_the_returned_cycles() -> Result<()> {
    // ---
    let url = format!("{}/devices/motor-a/latest?limit=5", base_url());
    let latest: LatestResponse = Client::new().get(&url).send().await?.json().await?;

    // Limit counts poll cycles; each cycle is one capture timestamp.
    let mut timestamps: Vec<_> = latest.samples.iter().map(|s| s.captured_at).collect();
    timestamps.dedup();
    assert!(timestamps.len() <= 5, "Limit not honored");

    Ok(())
}
