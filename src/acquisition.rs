//! The per-device acquisition loop.
//!
//! One loop instance owns one device end to end: its serial source, its
//! retry policy, and the only write paths into the store and the alarm
//! evaluator for that device. A cycle runs poll → validate → persist →
//! evaluate; any failure abandons the cycle without touching the next
//! one. Persist strictly precedes evaluate, so an observed alarm
//! transition is always backed by a durably stored sample.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::alarm::AlarmEvaluator;
use crate::config::DeviceConfig;
use crate::error::{ConfigMismatch, ProtocolError};
use crate::models::RegisterBlock;
use crate::sink::{CycleAbandoned, CycleStage, EventSink};
use crate::source::RegisterSource;
use crate::store::SampleStore;

// ---

/// Bounded retry for the poll stage. Attempt n sleeps `backoff * n`
/// before the next try (linear backoff).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

pub struct AcquisitionLoop<S> {
    // ---
    device: DeviceConfig,
    source: S,
    store: Arc<dyn SampleStore>,
    alarms: Arc<AlarmEvaluator>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl<S: RegisterSource> AcquisitionLoop<S> {
    pub fn new(
        device: DeviceConfig,
        source: S,
        store: Arc<dyn SampleStore>,
        alarms: Arc<AlarmEvaluator>,
        sink: Arc<dyn EventSink>,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        // ---
        AcquisitionLoop {
            device,
            source,
            store,
            alarms,
            sink,
            retry,
            shutdown,
        }
    }

    /// Drive cycles until shutdown or a fatal configuration mismatch.
    ///
    /// Cadence is wall-clock-anchored: a tick that lands while a cycle
    /// is still running is skipped, never queued, so a wedged device
    /// cannot build a backlog. Shutdown is honored only between cycles;
    /// an in-flight cycle always completes its serial exchange and its
    /// store write.
    pub async fn run(mut self) {
        // ---
        tracing::info!(
            device = %self.device.id,
            period_secs = self.device.poll_period_secs,
            "acquisition loop started"
        );

        let mut ticker = interval(self.device.poll_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(mismatch) = self.cycle().await {
                        tracing::error!(
                            device = %self.device.id,
                            "halting acquisition, operator correction required: {mismatch}"
                        );
                        return;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(device = %self.device.id, "acquisition loop stopped");
    }

    /// One full poll → validate → persist → evaluate pass.
    ///
    /// Returns Err only for the fatal register-count mismatch; every
    /// transient failure is reported to the sink and swallowed here.
    async fn cycle(&mut self) -> Result<(), ConfigMismatch> {
        // ---
        let block = match self.poll_with_retry().await {
            Ok(block) => block,
            Err(err) => {
                self.sink.cycle_abandoned(&CycleAbandoned::new(
                    &self.device.id,
                    CycleStage::Poll,
                    err.to_string(),
                ));
                return Ok(());
            }
        };

        let expected = self.device.registers.len();
        if block.values.len() != expected {
            return Err(ConfigMismatch {
                expected,
                actual: block.values.len(),
            });
        }

        let samples = block.to_samples();
        if let Err(first) = self.store.append(&samples).await {
            tracing::warn!(
                device = %self.device.id,
                "sample append failed, retrying once: {first}"
            );
            if let Err(second) = self.store.append(&samples).await {
                // The reading is lost; acquisition continuity wins over
                // completeness. Skipping evaluate keeps every published
                // alarm transition backed by a stored sample.
                self.sink.cycle_abandoned(&CycleAbandoned::new(
                    &self.device.id,
                    CycleStage::Persist,
                    second.to_string(),
                ));
                return Ok(());
            }
        }

        for transition in self.alarms.evaluate(&block) {
            self.sink.alarm_transition(&transition);
        }

        Ok(())
    }

    /// Up to `retry.max_attempts` single-exchange polls, linear backoff
    /// between attempts. `InvalidArgument` is never retried.
    async fn poll_with_retry(&mut self) -> Result<RegisterBlock, ProtocolError> {
        // ---
        let count = self.device.registers.len() as u16;
        let timeout = self.device.request_timeout();
        let mut attempt = 1u32;

        loop {
            match self
                .source
                .poll(self.device.slave, self.device.start_offset, count, timeout)
                .await
            {
                Ok(block) => return Ok(block),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        device = %self.device.id,
                        attempt,
                        "poll attempt failed: {err}"
                    );
                    sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
