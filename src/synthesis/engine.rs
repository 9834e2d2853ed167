//! Synthesis Engine: extracts structured insights/recommendations/warnings/
//! alerts/next-steps from final state and a Plan Execution Result.
//!
//! Grounded on `loom::compress::compact_node::CompactNode`'s "try the LLM
//! path, otherwise pass state through unchanged" pattern for the one
//! LLM-backed step (the free-form reasoning paragraph) — every other
//! extraction here is a pure function of `state` and `result`, per spec.md
//! §4.11's "deterministic given the same state" invariant.

use std::sync::Arc;

use serde_json::Value;

use crate::executor::types::{PlanExecutionResult, StageStatus};
use crate::plan::llm::LlmClient;
use crate::state::State;
use crate::synthesis::types::{
    Alert, AlertSeverity, CoreData, Insight, NextStep, Priority, Recommendation, SynthesisMetrics, SynthesisResponse,
    Warning, WarningCategory,
};

const BUNKER_SAVINGS_INSIGHT_THRESHOLD_USD: f64 = 500.0;
const STALE_PRICE_WARNING_THRESHOLD_HOURS: f64 = 24.0;

pub struct SynthesisEngine {
    llm_client: Option<Arc<dyn LlmClient>>,
}

impl SynthesisEngine {
    pub fn new(llm_client: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm_client }
    }

    pub async fn synthesize(&self, state: &State, result: &PlanExecutionResult) -> SynthesisResponse {
        let core_data = extract_core_data(state);
        let insights = derive_insights(state, &core_data);
        let recommendations = derive_recommendations(&insights);
        let warnings = derive_warnings(state, result);
        let alerts = derive_alerts(state, &core_data);
        let metrics = SynthesisMetrics {
            duration_ms: result.duration.as_millis(),
            stages_completed: result.stages_completed.len(),
            stages_skipped: result.stages_skipped.len(),
            stages_failed: result.stages_failed.len(),
            costs: result.costs.clone(),
        };
        let next_steps = derive_next_steps(&recommendations);
        let reasoning = self.generate_reasoning(&core_data, &insights, &warnings, &alerts).await;

        SynthesisResponse {
            core_data,
            insights,
            recommendations,
            warnings,
            alerts,
            metrics,
            reasoning,
            next_steps,
        }
    }

    async fn generate_reasoning(&self, core_data: &CoreData, insights: &[Insight], warnings: &[Warning], alerts: &[Alert]) -> String {
        let fallback = deterministic_reasoning(core_data, insights, warnings, alerts);
        let Some(client) = &self.llm_client else {
            return fallback;
        };

        let prompt = format!(
            "Summarize this bunker-planning run in two or three sentences for an operations audience.\n\
             Insights: {}\nWarnings: {}\nAlerts: {}",
            insights.len(),
            warnings.len(),
            alerts.len(),
        );

        match client.generate_reasoning(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => fallback,
            Err(e) => {
                tracing::warn!(error = %e, "synthesis reasoning LLM call failed, using deterministic template");
                fallback
            }
        }
    }
}

fn deterministic_reasoning(core_data: &CoreData, insights: &[Insight], warnings: &[Warning], alerts: &[Alert]) -> String {
    let mut parts = Vec::new();
    if let Some(route) = &core_data.route_summary {
        parts.push(format!("Route data available: {route}."));
    }
    if let Some(bunker) = &core_data.bunker_best_option {
        parts.push(format!("Best bunker option identified: {bunker}."));
    }
    if !insights.is_empty() {
        parts.push(format!("{} insight(s) surfaced.", insights.len()));
    }
    if !alerts.is_empty() {
        parts.push(format!("{} alert(s) require attention.", alerts.len()));
    } else if !warnings.is_empty() {
        parts.push(format!("{} warning(s) recorded.", warnings.len()));
    }
    if parts.is_empty() {
        "Plan executed; no notable findings to report.".to_string()
    } else {
        parts.join(" ")
    }
}

fn extract_core_data(state: &State) -> CoreData {
    let vessel_list = state.get("vessel_list").and_then(Value::as_array);
    let vessel_count = vessel_list.map(|v| v.len()).unwrap_or(0);
    let vessel_types = vessel_list
        .map(|v| {
            v.iter()
                .filter_map(|entry| entry.get("vessel_type").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let bunker_alternatives = state
        .get("bunker_analysis")
        .and_then(|b| b.get("alternatives"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let compliance_zones = state
        .get("compliance_zones")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    CoreData {
        route_summary: state.get("route_data").cloned(),
        bunker_best_option: state
            .get("bunker_analysis")
            .and_then(|b| b.get("best_option"))
            .filter(|v| !v.is_null())
            .cloned(),
        bunker_alternatives,
        weather_impact: state.get("weather_impact").cloned(),
        vessel_count,
        vessel_types,
        noon_reports_summary: state.get("noon_reports").cloned(),
        consumption_profile_summary: state.get("consumption_profile").cloned(),
        compliance_zones,
    }
}

fn derive_insights(state: &State, core_data: &CoreData) -> Vec<Insight> {
    let mut insights = Vec::new();

    let max_savings = state
        .get("bunker_analysis")
        .and_then(|b| b.get("max_savings_usd"))
        .and_then(Value::as_f64);
    if let Some(savings) = max_savings {
        if savings > BUNKER_SAVINGS_INSIGHT_THRESHOLD_USD {
            insights.push(Insight {
                insight_type: "cost_optimization".to_string(),
                priority: if savings > BUNKER_SAVINGS_INSIGHT_THRESHOLD_USD * 4.0 {
                    Priority::High
                } else {
                    Priority::Medium
                },
                category: "bunker".to_string(),
                title: "Bunker savings opportunity identified".to_string(),
                description: format!("Switching to the best bunker option saves an estimated ${savings:.2}."),
                impact: serde_json::json!({ "max_savings_usd": savings }),
                confidence: 0.8,
            });
        }
    }

    if core_data.vessel_count > 1 {
        insights.push(Insight {
            insight_type: "fleet_coverage".to_string(),
            priority: Priority::Low,
            category: "vessel".to_string(),
            title: "Multiple vessels in scope".to_string(),
            description: format!("{} vessels were considered for this query.", core_data.vessel_count),
            impact: serde_json::json!({ "vessel_count": core_data.vessel_count }),
            confidence: 0.9,
        });
    }

    insights
}

fn derive_recommendations(insights: &[Insight]) -> Vec<Recommendation> {
    insights
        .iter()
        .filter(|i| i.insight_type == "cost_optimization")
        .enumerate()
        .map(|(idx, insight)| Recommendation {
            id: format!("rec-{idx}"),
            priority: insight.priority,
            action: "confirm_bunker_stem".to_string(),
            details: insight.description.clone(),
            rationale: "Identified savings exceed the reporting threshold.".to_string(),
            impact: insight.impact.clone(),
            confidence: insight.confidence,
            urgency: match insight.priority {
                Priority::Critical | Priority::High => "high".to_string(),
                Priority::Medium => "medium".to_string(),
                Priority::Low => "low".to_string(),
            },
            owner: "operations".to_string(),
        })
        .collect()
}

fn derive_warnings(state: &State, result: &PlanExecutionResult) -> Vec<Warning> {
    let mut warnings = Vec::new();

    for stage_result in &result.stage_results {
        if stage_result.status == StageStatus::Failed || stage_result.status == StageStatus::Timeout {
            warnings.push(Warning {
                category: WarningCategory::Execution,
                message: format!(
                    "stage {} ({}) did not complete: {}",
                    stage_result.stage_id,
                    stage_result.agent_id,
                    stage_result.error.clone().unwrap_or_else(|| "no error detail".to_string())
                ),
            });
        }
    }

    let price_age_hours = state
        .get("bunker_analysis")
        .and_then(|b| b.get("price_age_hours"))
        .and_then(Value::as_f64);
    if let Some(age) = price_age_hours {
        if age > STALE_PRICE_WARNING_THRESHOLD_HOURS {
            warnings.push(Warning {
                category: WarningCategory::DataQuality,
                message: format!("bunker prices are {age:.1} hours old, exceeding the freshness threshold."),
            });
        }
    }

    if !result.success {
        warnings.push(Warning {
            category: WarningCategory::System,
            message: "plan did not complete all required stages; response reflects partial results.".to_string(),
        });
    }

    warnings
}

fn derive_alerts(state: &State, core_data: &CoreData) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let requested_bunker = state.contains_key("bunker_analysis");
    if requested_bunker && core_data.bunker_best_option.is_none() {
        alerts.push(Alert {
            condition: "no_viable_bunker_option".to_string(),
            severity: AlertSeverity::Critical,
            message: "no viable bunker option was found for this route.".to_string(),
        });
    }

    let severe_weather = state
        .get("weather_impact")
        .and_then(|w| w.get("severity"))
        .and_then(Value::as_str)
        .map(|s| s.eq_ignore_ascii_case("severe"))
        .unwrap_or(false);
    if severe_weather {
        alerts.push(Alert {
            condition: "severe_weather".to_string(),
            severity: AlertSeverity::Critical,
            message: "severe weather conditions reported along the route.".to_string(),
        });
    }

    alerts
}

fn derive_next_steps(recommendations: &[Recommendation]) -> Vec<NextStep> {
    recommendations
        .iter()
        .enumerate()
        .map(|(idx, rec)| NextStep {
            step: format!("Act on recommendation: {}", rec.action),
            owner: rec.owner.clone(),
            depends_on: vec![],
            order: idx,
        })
        .collect()
}
