//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the engine without a real generation
//! service.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::canonical::canonical_key;
use crate::error::GenerationError;
use crate::generator::PageGenerator;
use crate::types::page::{PageMode, PageRequest};

type Outcome = Result<serde_json::Value, GenerationError>;

/// A mock page generator for testing.
///
/// Outcomes are scripted per canonical key and consumed in order; once a
/// key's script is empty, calls succeed with a default payload.
#[derive(Default, Clone)]
pub struct MockGenerator {
    /// Scripted outcomes by canonical key
    scripts: Arc<RwLock<HashMap<String, VecDeque<Outcome>>>>,

    /// Artificial latency per call
    delay: Option<Duration>,

    /// Latency for specific canonical keys, overriding `delay`
    key_delays: Arc<RwLock<HashMap<String, Duration>>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockGeneratorCall>>>,
}

/// Record of a call made to the mock generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockGeneratorCall {
    pub canonical_key: String,
    pub mode: PageMode,
}

impl MockGenerator {
    /// Create a mock that succeeds for every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the page with this canonical key.
    pub fn with_outcome(self, key: impl Into<String>, outcome: Outcome) -> Self {
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.into())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Queue a failure for the page with this canonical key.
    pub fn with_failure(self, key: impl Into<String>, error: GenerationError) -> Self {
        self.with_outcome(key, Err(error))
    }

    /// Queue `times` transient failures for the page with this canonical key.
    pub fn with_transient_failures(mut self, key: impl Into<String>, times: usize) -> Self {
        let key = key.into();
        for attempt in 1..=times {
            self = self.with_failure(
                key.clone(),
                GenerationError::transient(format!("upstream 503 on attempt {}", attempt)),
            );
        }
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep this long inside calls for one canonical key.
    pub fn with_key_delay(self, key: impl Into<String>, delay: Duration) -> Self {
        self.key_delays
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), delay);
        self
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<MockGeneratorCall> {
        self.calls.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of calls made for one canonical key.
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|call| call.canonical_key == key)
            .count()
    }

    /// Payload returned when no outcome is scripted.
    pub fn default_payload(key: &str, request: &PageRequest) -> serde_json::Value {
        json!({
            "canonical_key": key,
            "mode": request.mode,
            "title": format!("Generated page for {}", key),
        })
    }
}

#[async_trait]
impl PageGenerator for MockGenerator {
    async fn generate(&self, request: &PageRequest) -> Result<serde_json::Value, GenerationError> {
        let key = canonical_key(request).map_err(GenerationError::permanent)?;

        self.calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockGeneratorCall {
                canonical_key: key.clone(),
                mode: request.mode,
            });

        let delay = self
            .key_delays
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .copied()
            .or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| Ok(Self::default_payload(&key, request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes_run_in_order() {
        let request = PageRequest::service_hub("roofing", "Roofing");
        let generator = MockGenerator::new().with_transient_failures("service_hub:roofing", 2);

        assert!(generator.generate(&request).await.is_err());
        assert!(generator.generate(&request).await.is_err());
        assert!(generator.generate(&request).await.is_ok());
        assert_eq!(generator.calls_for("service_hub:roofing"), 3);
    }

    #[tokio::test]
    async fn default_payload_names_the_page() {
        let request = PageRequest::city_hub("tulsa-ok");
        let value = MockGenerator::new().generate(&request).await.unwrap();
        assert_eq!(value["canonical_key"], "city_hub:tulsa-ok");
        assert_eq!(value["mode"], "city_hub");
    }
}
