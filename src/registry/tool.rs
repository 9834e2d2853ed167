//! Tool Registry: catalog of external-capability handles.
//!
//! Process-wide, thread-safe, populated at startup, mutated only by metrics
//! recording thereafter — the same "registry as concurrent map of
//! declarative records" shape as `graphweave::tools::registry::ToolRegistry`,
//! keyed by tool id instead of name and storing metadata records rather than
//! boxed trait objects (the core never executes a tool; it only catalogs and
//! hands invocation off to the owning agent).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Cost class of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCost {
    Free,
    ApiCall,
    Expensive,
}

/// Tool category, used for capability/intent-based `find` filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolCategory {
    Routing,
    Weather,
    Bunker,
    Compliance,
    Vessel,
    Calculation,
    Validation,
}

/// A named input or output parameter of a tool's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub type_name: String,
    pub required: bool,
}

/// Rate limit: at most `calls` invocations per `window`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    pub calls: u32,
    pub window: Duration,
}

/// Rolling execution metrics for a tool or agent.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    pub total: AtomicU64,
    pub success: AtomicU64,
    pub fail: AtomicU64,
    last_invoked_at_millis: AtomicU64,
}

impl ExecutionMetrics {
    pub fn record(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fail.fetch_add(1, Ordering::Relaxed);
        }
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_invoked_at_millis.store(now, Ordering::Relaxed);
    }

    pub fn last_invoked_at(&self) -> Option<SystemTime> {
        let millis = self.last_invoked_at_millis.load(Ordering::Relaxed);
        if millis == 0 {
            None
        } else {
            Some(SystemTime::UNIX_EPOCH + Duration::from_millis(millis))
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
            last_invoked_at: self.last_invoked_at(),
        }
    }
}

/// Plain-data snapshot of `ExecutionMetrics`, safe to clone/serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub success: u64,
    pub fail: u64,
    pub last_invoked_at: Option<SystemTime>,
}

/// A registered tool: identity, classification, schema, operational
/// characteristics, dependencies, access, and an implementation handle id
/// (resolved by the caller's tool-invocation layer; the registry itself
/// never executes tools).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub id: String,
    pub name: String,
    pub version: String,
    pub deprecated_by: Option<String>,
    pub category: ToolCategory,
    pub domain_tags: Vec<String>,
    pub inputs: Vec<ParamSpec>,
    pub outputs: Vec<ParamSpec>,
    pub cost: ToolCost,
    pub avg_latency: Duration,
    pub max_latency: Duration,
    pub reliability: f64,
    pub external_services: Vec<String>,
    pub depends_on_tools: Vec<String>,
    pub permitted_agent_ids: Vec<String>,
    pub requires_auth: bool,
    pub rate_limit: Option<RateLimit>,
    pub implementation_handle: String,
}

/// Filter criteria for `ToolRegistry::find`.
#[derive(Debug, Clone, Default)]
pub struct ToolCriteria {
    pub category: Option<ToolCategory>,
    pub domain_tag: Option<String>,
    pub min_reliability: Option<f64>,
    pub max_latency: Option<Duration>,
    pub cost: Option<ToolCost>,
    pub exclude_deprecated: bool,
}

/// Process-wide catalog of tool definitions.
pub struct ToolRegistry {
    definitions: DashMap<String, ToolDefinition>,
    metrics: DashMap<String, ExecutionMetrics>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            metrics: DashMap::new(),
        }
    }

    /// Registers a tool. Fails with `DuplicateId` if the id exists with a
    /// structurally different definition (same id + identical fields is a
    /// no-op re-registration, not an error).
    pub fn register(&self, def: ToolDefinition) -> Result<(), RegistryError> {
        if def.id.trim().is_empty() {
            return Err(RegistryError::InvalidDefinition("empty tool id".into()));
        }
        if !(0.0..=1.0).contains(&def.reliability) {
            return Err(RegistryError::InvalidDefinition(format!(
                "reliability {} out of range [0,1]",
                def.reliability
            )));
        }
        if let Some(existing) = self.definitions.get(&def.id) {
            if !definitions_equal(&existing, &def) {
                return Err(RegistryError::DuplicateId(def.id.clone()));
            }
            return Ok(());
        }
        self.metrics
            .entry(def.id.clone())
            .or_insert_with(ExecutionMetrics::default);
        self.definitions.insert(def.id.clone(), def);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ToolDefinition> {
        self.definitions.get(id).map(|e| e.value().clone())
    }

    pub fn has(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    /// Filters the catalog, returning a stable (id-sorted) result set.
    pub fn find(&self, criteria: &ToolCriteria) -> Vec<ToolDefinition> {
        let mut out: Vec<ToolDefinition> = self
            .definitions
            .iter()
            .map(|e| e.value().clone())
            .filter(|d| {
                if criteria.exclude_deprecated && d.deprecated_by.is_some() {
                    return false;
                }
                if let Some(cat) = criteria.category {
                    if d.category != cat {
                        return false;
                    }
                }
                if let Some(tag) = &criteria.domain_tag {
                    if !d.domain_tags.iter().any(|t| t == tag) {
                        return false;
                    }
                }
                if let Some(min_rel) = criteria.min_reliability {
                    if d.reliability < min_rel {
                        return false;
                    }
                }
                if let Some(max_lat) = criteria.max_latency {
                    if d.max_latency > max_lat {
                        return false;
                    }
                }
                if let Some(cost) = criteria.cost {
                    if d.cost != cost {
                        return false;
                    }
                }
                true
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Records the outcome of a tool invocation. Used by the executor.
    pub fn record_execution(&self, id: &str, success: bool, _duration: Duration) {
        self.metrics
            .entry(id.to_string())
            .or_insert_with(ExecutionMetrics::default)
            .record(success);
        metrics::counter!("tool_invocations_total", "tool_id" => id.to_string()).increment(1);
    }

    pub fn metrics_snapshot(&self, id: &str) -> Option<MetricsSnapshot> {
        self.metrics.get(id).map(|m| m.snapshot())
    }

    /// All registered tool ids, sorted, for callers that want to iterate
    /// the whole catalog's metrics (e.g. a process-wide metrics report).
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

fn definitions_equal(a: &ToolDefinition, b: &ToolDefinition) -> bool {
    a.id == b.id
        && a.name == b.name
        && a.version == b.version
        && a.category == b.category
        && a.cost == b.cost
}

/// Per-tool token-bucket rate limiter. `PlanExecutor` consults this before
/// running a stage that declares the tool in `tools_needed`: an exhausted
/// bucket makes the executor poll until a slot frees or the plan's context
/// deadline passes, at which point the stage fails with `RateLimited`. Kept
/// simple (no external crate): a count and a window start, reset when the
/// window elapses.
pub struct RateLimiter {
    buckets: DashMap<String, RateBucketState>,
}

struct RateBucketState {
    window_start: SystemTime,
    count: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if the call is allowed under `limit`, recording it.
    /// Returns `false` (caller should queue or fail with `RateLimited`) if
    /// the bucket is exhausted for the current window.
    pub fn try_acquire(&self, tool_id: &str, limit: &RateLimit) -> bool {
        let now = SystemTime::now();
        let mut entry = self
            .buckets
            .entry(tool_id.to_string())
            .or_insert_with(|| RateBucketState {
                window_start: now,
                count: 0,
            });
        if now.duration_since(entry.window_start).unwrap_or_default() >= limit.window {
            entry.window_start = now;
            entry.count = 0;
        }
        if entry.count >= limit.calls {
            false
        } else {
            entry.count += 1;
            true
        }
    }
}

/// A stable-ordered `HashMap` wrapper used by callers needing a plain map
/// view of the registry (e.g. plan generation's "known tools" context).
pub fn to_sorted_map(defs: &[ToolDefinition]) -> HashMap<String, ToolDefinition> {
    defs.iter().map(|d| (d.id.clone(), d.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> ToolDefinition {
        ToolDefinition {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            deprecated_by: None,
            category: ToolCategory::Routing,
            domain_tags: vec!["great-circle".into()],
            inputs: vec![],
            outputs: vec![],
            cost: ToolCost::ApiCall,
            avg_latency: Duration::from_millis(200),
            max_latency: Duration::from_secs(2),
            reliability: 0.99,
            external_services: vec!["routing-api".into()],
            depends_on_tools: vec![],
            permitted_agent_ids: vec!["route_agent".into()],
            requires_auth: false,
            rate_limit: Some(RateLimit {
                calls: 2,
                window: Duration::from_millis(50),
            }),
            implementation_handle: "route::great_circle".into(),
        }
    }

    #[test]
    fn register_and_get_roundtrip() {
        let reg = ToolRegistry::new();
        reg.register(sample("route_tool")).unwrap();
        assert!(reg.has("route_tool"));
        assert_eq!(reg.get("route_tool").unwrap().name, "route_tool");
    }

    #[test]
    fn duplicate_id_with_different_definition_fails() {
        let reg = ToolRegistry::new();
        reg.register(sample("route_tool")).unwrap();
        let mut other = sample("route_tool");
        other.version = "2.0.0".into();
        let err = reg.register(other).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(_)));
    }

    #[test]
    fn duplicate_id_with_identical_definition_is_noop() {
        let reg = ToolRegistry::new();
        reg.register(sample("route_tool")).unwrap();
        reg.register(sample("route_tool")).unwrap();
    }

    #[test]
    fn invalid_reliability_rejected() {
        let reg = ToolRegistry::new();
        let mut bad = sample("bad_tool");
        bad.reliability = 1.5;
        let err = reg.register(bad).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition(_)));
    }

    #[test]
    fn find_is_stable_ordered_by_id() {
        let reg = ToolRegistry::new();
        reg.register(sample("zzz_tool")).unwrap();
        reg.register(sample("aaa_tool")).unwrap();
        let found = reg.find(&ToolCriteria::default());
        assert_eq!(found[0].id, "aaa_tool");
        assert_eq!(found[1].id, "zzz_tool");
    }

    #[test]
    fn find_filters_by_category_and_reliability() {
        let reg = ToolRegistry::new();
        reg.register(sample("route_tool")).unwrap();
        let mut weather = sample("weather_tool");
        weather.category = ToolCategory::Weather;
        weather.reliability = 0.5;
        reg.register(weather).unwrap();

        let routing_only = reg.find(&ToolCriteria {
            category: Some(ToolCategory::Routing),
            ..Default::default()
        });
        assert_eq!(routing_only.len(), 1);
        assert_eq!(routing_only[0].id, "route_tool");

        let reliable_only = reg.find(&ToolCriteria {
            min_reliability: Some(0.9),
            ..Default::default()
        });
        assert_eq!(reliable_only.len(), 1);
    }

    #[test]
    fn record_execution_updates_metrics() {
        let reg = ToolRegistry::new();
        reg.register(sample("route_tool")).unwrap();
        reg.record_execution("route_tool", true, Duration::from_millis(10));
        reg.record_execution("route_tool", false, Duration::from_millis(20));
        let snap = reg.metrics_snapshot("route_tool").unwrap();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.success, 1);
        assert_eq!(snap.fail, 1);
        assert!(snap.last_invoked_at.is_some());
    }

    #[test]
    fn rate_limiter_exhausts_then_resets() {
        let limiter = RateLimiter::new();
        let limit = RateLimit {
            calls: 2,
            window: Duration::from_millis(30),
        };
        assert!(limiter.try_acquire("t", &limit));
        assert!(limiter.try_acquire("t", &limit));
        assert!(!limiter.try_acquire("t", &limit));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.try_acquire("t", &limit));
    }
}
