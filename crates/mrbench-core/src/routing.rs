//! Provider selection under constraints and an ordering policy.
//!
//! Routing is a pure function of the registry's detection output, the constraints, the policy
//! and (for `fastest`/`cheapest`) the best historical metric per provider. Every excluded
//! provider carries the constraint it failed, so the same trace serves `--explain`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::adapters::{resolve_model, AdapterRegistry, ProviderDetection};
use crate::config::MrbenchConfig;
use crate::error::{MrbenchError, Result};

/// Providers that run without network access. Anything not listed is network-dependent.
pub const OFFLINE_PROVIDERS: &[&str] = &["ollama", "llamacpp", "vllm", "fake"];

pub const WALL_TIME_METRIC: &str = "wall_time_ms";
pub const COST_METRIC: &str = "cost_usd";

pub fn requires_network(provider: &str) -> bool {
    !OFFLINE_PROVIDERS.contains(&provider)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    #[default]
    Preference,
    Fastest,
    Cheapest,
    #[serde(alias = "offline-only", alias = "offlineOnly")]
    OfflineOnly,
}

impl RoutingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingPolicy::Preference => "preference",
            RoutingPolicy::Fastest => "fastest",
            RoutingPolicy::Cheapest => "cheapest",
            RoutingPolicy::OfflineOnly => "offline_only",
        }
    }

    /// Historical metric the policy orders by, if any.
    fn metric(&self) -> Option<&'static str> {
        match self {
            RoutingPolicy::Fastest => Some(WALL_TIME_METRIC),
            RoutingPolicy::Cheapest => Some(COST_METRIC),
            RoutingPolicy::Preference | RoutingPolicy::OfflineOnly => None,
        }
    }
}

impl fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingPolicy {
    type Err = MrbenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preference" => Ok(RoutingPolicy::Preference),
            "fastest" => Ok(RoutingPolicy::Fastest),
            "cheapest" => Ok(RoutingPolicy::Cheapest),
            "offline_only" | "offline-only" | "offlineOnly" => Ok(RoutingPolicy::OfflineOnly),
            other => Err(MrbenchError::Config(format!(
                "unknown routing policy '{other}' (expected preference, fastest, cheapest, offline_only)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RoutingConstraints {
    pub offline_only: bool,
    /// Advisory; enforced only against recorded history.
    pub max_latency_ms: Option<f64>,
    pub streaming_required: bool,
}

/// Best recorded value of a metric for a provider (lower is better).
pub trait ProviderHistory: Sync {
    fn best_metric(&self, provider: &str, metric: &str) -> Option<f64>;
}

/// History source with no records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl ProviderHistory for NoHistory {
    fn best_metric(&self, _provider: &str, _metric: &str) -> Option<f64> {
        None
    }
}

/// In-memory history keyed by `(provider, metric)`.
impl ProviderHistory for BTreeMap<(String, String), f64> {
    fn best_metric(&self, provider: &str, metric: &str) -> Option<f64> {
        self.get(&(provider.to_string(), metric.to_string())).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Exclusion {
    NotDetected { error: Option<String> },
    NotRegistered,
    RequiresNetwork,
    NoStreaming,
    LatencyExceeded { observed_ms: f64, limit_ms: f64 },
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::NotDetected { error: Some(e) } => write!(f, "not detected: {e}"),
            Exclusion::NotDetected { error: None } => f.write_str("not detected"),
            Exclusion::NotRegistered => f.write_str("no registered adapter"),
            Exclusion::RequiresNetwork => f.write_str("requires network (offline only)"),
            Exclusion::NoStreaming => f.write_str("streaming not supported"),
            Exclusion::LatencyExceeded {
                observed_ms,
                limit_ms,
            } => write!(f, "best latency {observed_ms:.0}ms exceeds {limit_ms:.0}ms"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub provider: String,
    /// Historical metric used for ordering, when the policy uses one.
    pub metric: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedProvider {
    pub provider: String,
    pub exclusion: Exclusion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingTrace {
    pub policy: RoutingPolicy,
    pub constraints: RoutingConstraints,
    pub ordered: Vec<RankedCandidate>,
    pub excluded: Vec<ExcludedProvider>,
}

impl RoutingTrace {
    pub fn selected(&self) -> Option<&str> {
        self.ordered.first().map(|c| c.provider.as_str())
    }

    fn summary(&self) -> String {
        if self.excluded.is_empty() {
            return "no providers detected".to_string();
        }
        self.excluded
            .iter()
            .map(|e| format!("{}: {}", e.provider, e.exclusion))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub provider: String,
    pub model: String,
    pub trace: RoutingTrace,
}

pub struct Router<'a> {
    registry: &'a AdapterRegistry,
    preference_order: Vec<String>,
    default_models: BTreeMap<String, String>,
    history: &'a dyn ProviderHistory,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a AdapterRegistry, preference_order: Vec<String>) -> Self {
        Self {
            registry,
            preference_order,
            default_models: BTreeMap::new(),
            history: &NoHistory,
        }
    }

    pub fn from_config(registry: &'a AdapterRegistry, config: &MrbenchConfig) -> Self {
        let mut router = Self::new(registry, config.routing.preference_order.clone());
        router.default_models = config
            .providers
            .iter()
            .filter_map(|(name, p)| p.default_model.clone().map(|m| (name.clone(), m)))
            .collect();
        router
    }

    pub fn with_history(mut self, history: &'a dyn ProviderHistory) -> Self {
        self.history = history;
        self
    }

    fn preference_rank(&self, provider: &str) -> usize {
        self.preference_order
            .iter()
            .position(|p| p == provider)
            .unwrap_or(usize::MAX)
    }

    /// Filters and orders `detections`, recording why each excluded provider was dropped.
    pub fn explain(
        &self,
        detections: &[ProviderDetection],
        policy: RoutingPolicy,
        constraints: &RoutingConstraints,
    ) -> RoutingTrace {
        let offline_only = constraints.offline_only || policy == RoutingPolicy::OfflineOnly;
        let mut eligible = Vec::new();
        let mut excluded = Vec::new();

        for det in detections {
            let provider = det.provider.as_str();
            let exclusion = match self.registry.get(provider) {
                None => Some(Exclusion::NotRegistered),
                Some(_) if !det.result.detected => Some(Exclusion::NotDetected {
                    error: det.result.error.clone(),
                }),
                Some(_) if offline_only && requires_network(provider) => {
                    Some(Exclusion::RequiresNetwork)
                }
                Some(adapter)
                    if constraints.streaming_required && !adapter.capabilities().streaming =>
                {
                    Some(Exclusion::NoStreaming)
                }
                Some(_) => constraints.max_latency_ms.and_then(|limit_ms| {
                    self.history
                        .best_metric(provider, WALL_TIME_METRIC)
                        .filter(|observed| *observed > limit_ms)
                        .map(|observed_ms| Exclusion::LatencyExceeded {
                            observed_ms,
                            limit_ms,
                        })
                }),
            };

            match exclusion {
                Some(exclusion) => excluded.push(ExcludedProvider {
                    provider: provider.to_string(),
                    exclusion,
                }),
                None => eligible.push(RankedCandidate {
                    provider: provider.to_string(),
                    metric: policy
                        .metric()
                        .and_then(|m| self.history.best_metric(provider, m)),
                }),
            }
        }

        // Candidates with history first (ascending), then preference order, then name.
        eligible.sort_by(|a, b| {
            let by_metric = match (a.metric, b.metric) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_metric
                .then_with(|| {
                    self.preference_rank(&a.provider)
                        .cmp(&self.preference_rank(&b.provider))
                })
                .then_with(|| a.provider.cmp(&b.provider))
        });

        RoutingTrace {
            policy,
            constraints: constraints.clone(),
            ordered: eligible,
            excluded,
        }
    }

    /// Selects a provider and resolves its model.
    ///
    /// Model resolution: `model`, else the configured default, else the adapter's first listed
    /// model, else `"default"`.
    pub async fn route(
        &self,
        detections: &[ProviderDetection],
        policy: RoutingPolicy,
        constraints: &RoutingConstraints,
        model: Option<&str>,
    ) -> Result<RoutingDecision> {
        let trace = self.explain(detections, policy, constraints);
        let Some(provider) = trace.selected().map(str::to_string) else {
            return Err(MrbenchError::NoEligibleProvider {
                detail: trace.summary(),
            });
        };

        let adapter = self.registry.require(&provider)?;
        let configured = self.default_models.get(&provider).map(String::as_str);
        let model = resolve_model(adapter, model, configured).await;

        tracing::info!(%provider, %model, %policy, "routed");
        Ok(RoutingDecision {
            provider,
            model,
            trace,
        })
    }
}
