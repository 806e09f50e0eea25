//! Debounced threshold evaluation.
//!
//! Each (device, register) with a configured rule owns a small state
//! machine: a raise is confirmed only after `debounce` consecutive
//! exceeding polls, while a clear fires on the first non-exceeding
//! poll. The asymmetry trades a slower raise for fewer false positives
//! and prompt recovery notice.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::models::{AlarmCondition, AlarmTransition, Direction, RegisterBlock};

// ---

#[derive(Debug, Clone)]
struct AlarmRule {
    threshold: f64,
    direction: Direction,
    debounce: u32,
    label: String,
}

#[derive(Debug, Clone)]
struct RegisterState {
    condition: AlarmCondition,
    streak: u32,
    since: Option<DateTime<Utc>>,
}

/// Published view of one register's alarm state.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmStateView {
    // ---
    pub register: u16,
    pub label: String,
    pub condition: AlarmCondition,
    pub streak: u32,
    pub since: Option<DateTime<Utc>>,
}

/// Stateful threshold checker for every configured rule.
///
/// State is mutated only by [`AlarmEvaluator::evaluate`], called from
/// the owning acquisition loop; the query methods take a read lock and
/// may be called concurrently from any number of viewer requests.
pub struct AlarmEvaluator {
    rules: HashMap<(String, u16), AlarmRule>,
    states: RwLock<HashMap<(String, u16), RegisterState>>,
}

impl AlarmEvaluator {
    /// Build the evaluator from the gateway config. Every ruled
    /// register starts out Normal with an empty streak, so the query
    /// path has an answer before the first poll completes.
    pub fn new(config: &GatewayConfig) -> Self {
        // ---
        let mut rules = HashMap::new();
        let mut states = HashMap::new();

        for device in &config.devices {
            for rule in &device.alarms {
                let key = (device.id.clone(), rule.register);
                rules.insert(
                    key.clone(),
                    AlarmRule {
                        threshold: rule.threshold,
                        direction: rule.direction,
                        debounce: rule.debounce,
                        label: rule.label.clone(),
                    },
                );
                states.insert(
                    key,
                    RegisterState {
                        condition: AlarmCondition::Normal,
                        streak: 0,
                        since: None,
                    },
                );
            }
        }

        AlarmEvaluator {
            rules,
            states: RwLock::new(states),
        }
    }

    /// Feed one register block through every matching rule, returning
    /// the confirmed transitions (zero or more, register-ascending).
    ///
    /// The whole block is applied under one write lock, so readers see
    /// either the pre-block or the post-block state, never a mix.
    pub fn evaluate(&self, block: &RegisterBlock) -> Vec<AlarmTransition> {
        // ---
        let mut transitions = Vec::new();
        let mut states = self.states.write();

        for (i, &raw) in block.values.iter().enumerate() {
            let register = block.start_offset + i as u16;
            let key = (block.device_id.clone(), register);

            let Some(rule) = self.rules.get(&key) else {
                continue;
            };
            let Some(state) = states.get_mut(&key) else {
                continue;
            };

            let value = f64::from(raw);

            if rule.direction.exceeds(value, rule.threshold) {
                state.streak = state.streak.saturating_add(1);

                if state.condition == AlarmCondition::Normal && state.streak >= rule.debounce {
                    state.condition = AlarmCondition::Alarm;
                    state.since = Some(block.captured_at);
                    transitions.push(AlarmTransition {
                        event_id: Uuid::new_v4(),
                        device_id: block.device_id.clone(),
                        register,
                        label: rule.label.clone(),
                        from: AlarmCondition::Normal,
                        to: AlarmCondition::Alarm,
                        value,
                        at: block.captured_at,
                    });
                }
            } else {
                state.streak = 0;

                if state.condition == AlarmCondition::Alarm {
                    state.condition = AlarmCondition::Normal;
                    state.since = Some(block.captured_at);
                    transitions.push(AlarmTransition {
                        event_id: Uuid::new_v4(),
                        device_id: block.device_id.clone(),
                        register,
                        label: rule.label.clone(),
                        from: AlarmCondition::Alarm,
                        to: AlarmCondition::Normal,
                        value,
                        at: block.captured_at,
                    });
                }
            }
        }

        transitions
    }

    /// Current state of one ruled register, if a rule exists for it.
    pub fn state_of(&self, device_id: &str, register: u16) -> Option<AlarmStateView> {
        // ---
        let key = (device_id.to_string(), register);
        let states = self.states.read();
        let state = states.get(&key)?;
        let rule = self.rules.get(&key)?;

        Some(AlarmStateView {
            register,
            label: rule.label.clone(),
            condition: state.condition,
            streak: state.streak,
            since: state.since,
        })
    }

    /// All ruled registers of one device, register-ascending.
    pub fn device_snapshot(&self, device_id: &str) -> Vec<AlarmStateView> {
        // ---
        let mut views: Vec<AlarmStateView> = self
            .rules
            .keys()
            .filter(|(dev, _)| dev == device_id)
            .filter_map(|(_, register)| self.state_of(device_id, *register))
            .collect();

        views.sort_by_key(|v| v.register);
        views
    }
}
