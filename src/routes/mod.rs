use std::sync::Arc;

use axum::Router;

use crate::alarm::AlarmEvaluator;
use crate::config::GatewayConfig;
use crate::store::SampleStore;

mod health;
mod latest;

// ---

/// Shared read-only state for the viewer routes.
#[derive(Clone)]
pub struct QueryState {
    pub store: Arc<dyn SampleStore>,
    pub alarms: Arc<AlarmEvaluator>,
    pub gateway: Arc<GatewayConfig>,
}

pub fn router(state: QueryState) -> Router {
    // ---
    Router::new()
        .merge(latest::router())
        .merge(health::router())
        .with_state(state)
}
