//! Process-wide metrics aggregation (spec.md §3, table row "Metrics"):
//! per-tool and per-agent counters already tracked in the registries'
//! `dashmap` maps, `metrics` crate histograms for latency, and a
//! compression-effectiveness report over a history of `CompressionStats`.
//!
//! This module owns no state of its own beyond the compression-history
//! aggregator; tool/agent counters live where they're recorded
//! (`ToolRegistry`/`AgentRegistry`), this just reads them out in one shot.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compress::compressor::CompressionStats;
use crate::registry::agent::AgentRegistry;
use crate::registry::tool::{MetricsSnapshot, ToolRegistry};

/// A single id's rolled-up counters, named for report output rather than
/// the atomics backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMetrics {
    pub id: String,
    pub total: u64,
    pub success: u64,
    pub fail: u64,
    pub success_rate: f64,
}

fn to_id_metrics(id: &str, snapshot: MetricsSnapshot) -> IdMetrics {
    let success_rate = if snapshot.total == 0 {
        1.0
    } else {
        snapshot.success as f64 / snapshot.total as f64
    };
    IdMetrics {
        id: id.to_string(),
        total: snapshot.total,
        success: snapshot.success,
        fail: snapshot.fail,
        success_rate,
    }
}

/// A full snapshot across both registries, the shape a `/metrics`-style
/// diagnostic endpoint or CLI report would serialize.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsReport {
    pub tools: Vec<IdMetrics>,
    pub agents: Vec<IdMetrics>,
}

/// Reads every registered tool's and agent's rolled-up counters. Ids with
/// zero recorded invocations are included (a freshly registered id still
/// has an `ExecutionMetrics` entry, created at `register` time).
pub fn collect_report(tools: &ToolRegistry, agents: &AgentRegistry) -> MetricsReport {
    let tool_metrics = tools
        .all_ids()
        .into_iter()
        .filter_map(|id| tools.metrics_snapshot(&id).map(|s| to_id_metrics(&id, s)))
        .collect();
    let agent_metrics = agents
        .all_ids()
        .into_iter()
        .filter_map(|id| agents.metrics_snapshot(&id).map(|s| to_id_metrics(&id, s)))
        .collect();
    MetricsReport {
        tools: tool_metrics,
        agents: agent_metrics,
    }
}

/// Records a stage or tool invocation's latency as a `metrics` crate
/// histogram, labeled by kind (`"stage"`/`"tool"`) and id. Separate from
/// `ToolRegistry::record_execution`/`AgentRegistry::record_execution`,
/// which only track success/failure counts — this is purely for the
/// latency distribution a Prometheus exporter would scrape.
pub fn record_latency(kind: &str, id: &str, duration: Duration) {
    metrics::histogram!("orchestrator_invocation_duration_seconds", "kind" => kind.to_string(), "id" => id.to_string())
        .record(duration.as_secs_f64());
}

/// A running aggregate over every `Compressor::compress` call observed so
/// far, answering "is compression pulling its weight across the process'
/// lifetime" rather than just for one state.
#[derive(Debug, Default)]
pub struct CompressionEffectivenessTracker {
    history: Mutex<Vec<CompressionStats>>,
}

/// Rendered form of the tracker's history: totals and a ratio, the shape
/// a report consumer actually wants rather than the raw per-call list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompressionEffectivenessReport {
    pub samples: usize,
    pub total_original_bytes: usize,
    pub total_compressed_bytes: usize,
    pub total_saved_bytes: usize,
    pub total_references_created: usize,
    /// `total_saved_bytes / total_original_bytes`, 0.0 if nothing observed
    /// yet or every sample had zero original size.
    pub savings_ratio: f64,
    /// Fields referenced across all observed samples, most-frequent first.
    pub most_referenced_fields: Vec<(String, usize)>,
}

impl CompressionEffectivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one `Compressor::compress` call's stats to the running
    /// history. Call this at the same point the executor or caller would
    /// otherwise discard the stats.
    pub fn record(&self, stats: CompressionStats) {
        self.history.lock().expect("compression history lock poisoned").push(stats);
    }

    pub fn report(&self) -> CompressionEffectivenessReport {
        let history = self.history.lock().expect("compression history lock poisoned");
        if history.is_empty() {
            return CompressionEffectivenessReport::default();
        }

        let mut field_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut total_original_bytes = 0usize;
        let mut total_compressed_bytes = 0usize;
        let mut total_saved_bytes = 0usize;
        let mut total_references_created = 0usize;

        for sample in history.iter() {
            total_original_bytes += sample.original_size;
            total_compressed_bytes += sample.compressed_size;
            total_saved_bytes += sample.saved_bytes;
            total_references_created += sample.references_created;
            for field in &sample.fields_referenced {
                *field_counts.entry(field.clone()).or_insert(0) += 1;
            }
        }

        let savings_ratio = if total_original_bytes == 0 {
            0.0
        } else {
            total_saved_bytes as f64 / total_original_bytes as f64
        };

        let mut most_referenced_fields: Vec<(String, usize)> = field_counts.into_iter().collect();
        most_referenced_fields.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        CompressionEffectivenessReport {
            samples: history.len(),
            total_original_bytes,
            total_compressed_bytes,
            total_saved_bytes,
            total_references_created,
            savings_ratio,
            most_referenced_fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use crate::registry::agent::{AgentDefinition, AgentHandler, AgentType, Consumes, DependencyHints, ExecutionHints, ToolBindings};
    use crate::registry::tool::{ToolCategory, ToolCost, ToolDefinition};
    use crate::state::{State, StatePatch};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoopAgent;

    #[async_trait]
    impl AgentHandler for NoopAgent {
        async fn run(&self, _state: &State) -> Result<StatePatch, ExecutorError> {
            Ok(StatePatch::new())
        }
    }

    fn tool_def(id: &str) -> ToolDefinition {
        ToolDefinition {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".into(),
            deprecated_by: None,
            category: ToolCategory::Routing,
            domain_tags: vec![],
            inputs: vec![],
            outputs: vec![],
            cost: ToolCost::Free,
            avg_latency: Duration::from_millis(100),
            max_latency: Duration::from_secs(1),
            reliability: 1.0,
            external_services: vec![],
            depends_on_tools: vec![],
            permitted_agent_ids: vec![],
            requires_auth: false,
            rate_limit: None,
            implementation_handle: format!("{id}_handle"),
        }
    }

    fn agent_def(id: &str) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            name: id.to_string(),
            agent_type: AgentType::Specialist,
            domain_tags: vec![],
            capability_tags: vec![],
            intent_tags: vec![],
            produces: vec![],
            consumes: Consumes::default(),
            tools: ToolBindings::default(),
            dependency_hints: DependencyHints::default(),
            execution_hints: ExecutionHints::default(),
            uses_llm: false,
            priority: 0,
            enabled: true,
            implementation_handle: Arc::new(NoopAgent),
        }
    }

    #[test]
    fn report_collects_registered_ids_with_zero_invocations() {
        let tools = ToolRegistry::new();
        tools.register(tool_def("route_tool")).unwrap();
        let agents = AgentRegistry::new();
        agents.register(agent_def("route_agent")).unwrap();

        let report = collect_report(&tools, &agents);
        assert_eq!(report.tools.len(), 1);
        assert_eq!(report.tools[0].id, "route_tool");
        assert_eq!(report.tools[0].total, 0);
        assert_eq!(report.tools[0].success_rate, 1.0);
        assert_eq!(report.agents[0].id, "route_agent");
    }

    #[test]
    fn report_reflects_recorded_executions() {
        let tools = ToolRegistry::new();
        tools.register(tool_def("weather_tool")).unwrap();
        tools.record_execution("weather_tool", true, Duration::from_millis(10));
        tools.record_execution("weather_tool", false, Duration::from_millis(10));

        let agents = AgentRegistry::new();
        let report = collect_report(&tools, &agents);
        let weather = report.tools.iter().find(|m| m.id == "weather_tool").unwrap();
        assert_eq!(weather.total, 2);
        assert_eq!(weather.success, 1);
        assert_eq!(weather.fail, 1);
        assert_eq!(weather.success_rate, 0.5);
    }

    #[test]
    fn compression_effectiveness_report_empty_history() {
        let tracker = CompressionEffectivenessTracker::new();
        let report = tracker.report();
        assert_eq!(report.samples, 0);
        assert_eq!(report.savings_ratio, 0.0);
    }

    #[test]
    fn compression_effectiveness_report_aggregates_samples() {
        let tracker = CompressionEffectivenessTracker::new();
        tracker.record(CompressionStats {
            original_size: 1000,
            compressed_size: 400,
            saved_bytes: 600,
            references_created: 1,
            fields_referenced: vec!["route_data".into()],
        });
        tracker.record(CompressionStats {
            original_size: 2000,
            compressed_size: 1800,
            saved_bytes: 200,
            references_created: 1,
            fields_referenced: vec!["route_data".into()],
        });

        let report = tracker.report();
        assert_eq!(report.samples, 2);
        assert_eq!(report.total_original_bytes, 3000);
        assert_eq!(report.total_saved_bytes, 800);
        assert!((report.savings_ratio - (800.0 / 3000.0)).abs() < 1e-9);
        assert_eq!(report.most_referenced_fields[0], ("route_data".to_string(), 2));
    }
}
