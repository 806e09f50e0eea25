//! Append-only event sink for operator-visible pipeline events.
//!
//! The shipped sink writes structured tracing records; anything beyond
//! that (metrics, alert routing) is an external collaborator consuming
//! the log stream.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AlarmCondition, AlarmTransition};

// ---

/// Pipeline stage at which a cycle was given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Poll,
    Persist,
}

impl CycleStage {
    fn as_str(self) -> &'static str {
        match self {
            CycleStage::Poll => "poll",
            CycleStage::Persist => "persist",
        }
    }
}

/// An acquisition cycle that was abandoned without a stored sample.
#[derive(Debug, Clone)]
pub struct CycleAbandoned {
    // ---
    pub event_id: Uuid,
    pub device_id: String,
    pub stage: CycleStage,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl CycleAbandoned {
    pub fn new(device_id: &str, stage: CycleStage, reason: String) -> Self {
        // ---
        CycleAbandoned {
            event_id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            stage,
            reason,
            at: Utc::now(),
        }
    }
}

/// Consumer of abandoned-cycle and alarm-transition events.
///
/// Emission must never block the acquisition loop, so the trait is
/// synchronous and implementations only enqueue or log.
pub trait EventSink: Send + Sync {
    fn cycle_abandoned(&self, event: &CycleAbandoned);
    fn alarm_transition(&self, event: &AlarmTransition);
}

/// Default sink: one structured log record per event.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn cycle_abandoned(&self, event: &CycleAbandoned) {
        // ---
        tracing::warn!(
            event_id = %event.event_id,
            device = %event.device_id,
            stage = event.stage.as_str(),
            at = %event.at,
            "cycle abandoned: {}",
            event.reason
        );
    }

    fn alarm_transition(&self, event: &AlarmTransition) {
        // ---
        match event.to {
            AlarmCondition::Alarm => tracing::warn!(
                event_id = %event.event_id,
                device = %event.device_id,
                register = event.register,
                value = event.value,
                "ALARM raised: {}",
                event.label
            ),
            AlarmCondition::Normal => tracing::info!(
                event_id = %event.event_id,
                device = %event.device_id,
                register = event.register,
                value = event.value,
                "alarm cleared: {}",
                event.label
            ),
        }
    }
}

// ---
