//! Core data types for the acquisition pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// One block of raw input registers read in a single protocol
/// transaction. Produced by the register source, consumed by exactly
/// one acquisition cycle, then dropped.
#[derive(Debug, Clone)]
pub struct RegisterBlock {
    // ---
    pub device_id: String,
    pub start_offset: u16,
    pub values: Vec<u16>,
    pub captured_at: DateTime<Utc>,
}

/// One persisted observation. Append-only; uniqueness key is
/// (device_id, register, captured_at).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Sample {
    // ---
    pub device_id: String,
    pub register: i16,
    pub value: f64,
    pub captured_at: DateTime<Utc>,
}

impl RegisterBlock {
    /// Flatten the block into one sample per register. All samples
    /// share the block's capture timestamp, which is what lets the
    /// viewer reassemble a full register set from the store.
    pub fn to_samples(&self) -> Vec<Sample> {
        // ---
        self.values
            .iter()
            .enumerate()
            .map(|(i, &raw)| Sample {
                device_id: self.device_id.clone(),
                register: (self.start_offset + i as u16) as i16,
                value: f64::from(raw),
                captured_at: self.captured_at,
            })
            .collect()
    }
}

// ---

/// Comparison direction of an alarm rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn exceeds(self, value: f64, threshold: f64) -> bool {
        match self {
            Direction::Above => value > threshold,
            Direction::Below => value < threshold,
        }
    }
}

/// Confirmed condition of one monitored register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmCondition {
    Normal,
    Alarm,
}

/// A confirmed state change emitted by the alarm evaluator.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmTransition {
    // ---
    pub event_id: Uuid,
    pub device_id: String,
    pub register: u16,
    pub label: String,
    pub from: AlarmCondition,
    pub to: AlarmCondition,
    pub value: f64,
    pub at: DateTime<Utc>,
}
