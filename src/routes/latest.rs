//! Viewer endpoint: the most recent samples plus current alarm state.
//!
//! Strictly read-only. Returns whatever the store last committed, which
//! may be stale by up to one poll period; it never waits on an
//! acquisition cycle.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::QueryState;
use crate::alarm::AlarmStateView;
use crate::config::DeviceConfig;
use crate::models::Sample;

/// Hard cap on the polled cycles in a single response, whatever the
/// caller asks for.
const MAX_LIMIT: u32 = 100;

/// Matches the page size of the operator view this endpoint feeds.
const DEFAULT_LIMIT: u32 = 10;

// ---

pub fn router() -> Router<QueryState> {
    // ---
    Router::new().route("/devices/{device}/latest", get(handler))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    /// Number of recent poll cycles to return; each cycle carries one
    /// sample per mapped register.
    limit: Option<u32>,
}

/// One stored sample, labeled through the register map.
#[derive(Debug, Serialize)]
struct LabeledSample {
    // ---
    register: i16,
    name: String,
    unit: String,
    value: f64,
    captured_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct LatestResponse {
    device: String,
    samples: Vec<LabeledSample>,
    alarms: Vec<AlarmStateView>,
}

async fn handler(
    Path(device_id): Path<String>,
    Query(params): Query<LatestQuery>,
    State(state): State<QueryState>,
) -> impl IntoResponse {
    // ---
    let Some(device) = state.gateway.device(&device_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown device '{device_id}'") })),
        )
            .into_response();
    };

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let samples = match state.store.query_recent(&device_id, limit).await {
        Ok(samples) => samples,
        Err(err) => {
            error!(device = %device_id, "sample query failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage read failed" })),
            )
                .into_response();
        }
    };

    let response = LatestResponse {
        samples: samples.iter().map(|s| label_sample(device, s)).collect(),
        alarms: state.alarms.device_snapshot(&device_id),
        device: device_id,
    };

    (StatusCode::OK, Json(response)).into_response()
}

fn label_sample(device: &DeviceConfig, sample: &Sample) -> LabeledSample {
    // ---
    let def = device.register(sample.register as u16);

    LabeledSample {
        register: sample.register,
        name: def.map(|d| d.name.clone()).unwrap_or_default(),
        unit: def.map(|d| d.unit.clone()).unwrap_or_default(),
        value: sample.value,
        captured_at: sample.captured_at,
    }
}
