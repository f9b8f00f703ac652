// Test dependencies - controllable clock and scripted pipeline
//
// Used by unit tests and by the integration tests under tests/.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use super::clock::Clock;
use super::pipeline::{BrandExtractionPipeline, CrawlRequest, ProgressReporter};

// =============================================================================
// Manual clock
// =============================================================================

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::days(365));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Mock pipeline
// =============================================================================

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed(serde_json::Value),
    Fail(String),
    Panic(String),
}

/// Pipeline that reports a scripted progress sequence, then succeeds, fails or panics.
///
/// With a gate, the pipeline reports its first step and then waits for
/// [`MockPipeline::release`] before continuing.
pub struct MockPipeline {
    steps: Vec<u8>,
    step_delay: Duration,
    outcome: MockOutcome,
    gate: Option<Arc<Notify>>,
    calls: Arc<Mutex<Vec<CrawlRequest>>>,
}

impl MockPipeline {
    pub fn succeeding(result: serde_json::Value) -> Self {
        Self::with_outcome(MockOutcome::Succeed(result))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_outcome(MockOutcome::Fail(message.to_string()))
    }

    pub fn panicking(message: &str) -> Self {
        Self::with_outcome(MockOutcome::Panic(message.to_string()))
    }

    fn with_outcome(outcome: MockOutcome) -> Self {
        Self {
            steps: Vec::new(),
            step_delay: Duration::ZERO,
            outcome,
            gate: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report these progress values, pausing `delay` after each.
    pub fn with_progress(mut self, steps: Vec<u8>, delay: Duration) -> Self {
        self.steps = steps;
        self.step_delay = delay;
        self
    }

    pub fn with_gate(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Let a gated pipeline continue past its first step.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<CrawlRequest> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl BrandExtractionPipeline for MockPipeline {
    async fn extract(
        &self,
        request: &CrawlRequest,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());

        for (i, step) in self.steps.iter().enumerate() {
            progress.report(*step);
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            } else {
                tokio::task::yield_now().await;
            }
            if i == 0 {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
        }

        match &self.outcome {
            MockOutcome::Succeed(result) => Ok(result.clone()),
            MockOutcome::Fail(message) => Err(anyhow!("{}", message)),
            MockOutcome::Panic(message) => panic!("{}", message),
        }
    }
}
