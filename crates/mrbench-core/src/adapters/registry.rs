//! Explicit registry of adapters, in registration order.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Adapter, Backend, CliAdapter, DetectionResult, FakeAdapter};
use crate::config::MrbenchConfig;
use crate::error::{MrbenchError, Result};

const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A detection result tagged with the adapter that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDetection {
    pub provider: String,
    pub result: DetectionResult,
}

pub struct AdapterRegistry {
    adapters: Vec<Box<dyn Adapter>>,
    detect_timeout: Duration,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            detect_timeout: DEFAULT_DETECT_TIMEOUT,
        }
    }

    /// Every enabled backend in canonical order, then the fake adapter.
    pub fn from_config(config: &MrbenchConfig) -> Self {
        let mut registry = Self::new().with_detect_timeout(config.detect_timeout());
        for backend in Backend::ALL {
            if config.is_enabled(backend.name()) {
                registry.register(CliAdapter::from_config(backend, config));
            }
        }
        if config.is_enabled("fake") {
            registry.register(FakeAdapter);
        }
        registry
    }

    pub fn with_detect_timeout(mut self, timeout: Duration) -> Self {
        self.detect_timeout = timeout;
        self
    }

    /// Adds `adapter`; an adapter with the same name is replaced in place.
    pub fn register<A: Adapter + 'static>(&mut self, adapter: A) {
        let adapter: Box<dyn Adapter> = Box::new(adapter);
        match self.adapters.iter().position(|a| a.name() == adapter.name()) {
            Some(idx) => self.adapters[idx] = adapter,
            None => self.adapters.push(adapter),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Adapter> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
    }

    /// Like [`AdapterRegistry::get`], failing with `UnknownProvider`.
    pub fn require(&self, name: &str) -> Result<&dyn Adapter> {
        self.get(name).ok_or_else(|| MrbenchError::UnknownProvider {
            name: name.to_string(),
            registered: self.names().join(", "),
        })
    }

    pub fn list_all(&self) -> impl Iterator<Item = &dyn Adapter> {
        self.adapters.iter().map(|a| a.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Detects every adapter in registration order, each bounded by the detect timeout.
    pub async fn detect_all(&self) -> Vec<ProviderDetection> {
        let mut out = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let result = match tokio::time::timeout(self.detect_timeout, adapter.detect()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(provider = adapter.name(), timeout = ?self.detect_timeout, "detection timed out");
                    DetectionResult::missing(format!(
                        "detection timed out after {}ms",
                        self.detect_timeout.as_millis()
                    ))
                }
            };
            out.push(ProviderDetection {
                provider: adapter.name().to_string(),
                result,
            });
        }
        out
    }

    /// Names of detected adapters, in registration order.
    pub async fn available(&self) -> Vec<String> {
        self.detect_all()
            .await
            .into_iter()
            .filter(|d| d.result.detected)
            .map(|d| d.provider)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterCapabilities, RunOptions, RunResult};
    use async_trait::async_trait;

    struct Hanging;

    #[async_trait]
    impl Adapter for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn detect(&self) -> DetectionResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            DetectionResult::default()
        }
        async fn list_models(&self) -> Vec<String> {
            Vec::new()
        }
        async fn run(&self, _: &str, _: &str, _: &RunOptions) -> RunResult {
            RunResult::default()
        }
        fn capabilities(&self) -> AdapterCapabilities {
            FakeAdapter.capabilities()
        }
    }

    #[tokio::test]
    async fn hung_detection_does_not_block_others() {
        let mut reg = AdapterRegistry::new().with_detect_timeout(Duration::from_millis(50));
        reg.register(Hanging);
        reg.register(FakeAdapter);

        let started = std::time::Instant::now();
        let all = reg.detect_all().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].provider, "hanging");
        assert!(!all[0].result.detected);
        assert!(all[0].result.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(all[1].provider, "fake");
        assert!(all[1].result.detected);
    }

    #[test]
    fn register_replaces_by_name_in_place() {
        let mut reg = AdapterRegistry::new();
        reg.register(FakeAdapter);
        reg.register(Hanging);
        reg.register(FakeAdapter);
        assert_eq!(reg.names(), vec!["fake", "hanging"]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unknown_provider_lists_registered() {
        let mut reg = AdapterRegistry::new();
        reg.register(FakeAdapter);
        assert!(reg.get("fake").is_some());
        let err = reg.require("nope").err().unwrap();
        assert!(matches!(err, MrbenchError::UnknownProvider { .. }));
        assert!(err.to_string().contains("fake"));
    }

    #[test]
    fn from_config_skips_disabled() {
        let cfg = crate::config::parse_config("providers:\n  claude:\n    enabled: false\n").unwrap();
        let reg = AdapterRegistry::from_config(&cfg);
        let names = reg.names();
        assert!(!names.contains(&"claude"));
        assert_eq!(names.first(), Some(&"ollama"));
        assert_eq!(names.last(), Some(&"fake"));
        assert_eq!(reg.len(), Backend::ALL.len());
    }
}
