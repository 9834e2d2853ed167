//! Synthesis Engine data model (spec.md §3, §4.11): core data projections,
//! typed insights/recommendations/warnings/alerts, and the final response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::cost::CostAccounting;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreData {
    pub route_summary: Option<Value>,
    pub bunker_best_option: Option<Value>,
    pub bunker_alternatives: Vec<Value>,
    pub weather_impact: Option<Value>,
    pub vessel_count: usize,
    pub vessel_types: Vec<String>,
    pub noon_reports_summary: Option<Value>,
    pub consumption_profile_summary: Option<Value>,
    pub compliance_zones: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub insight_type: String,
    pub priority: Priority,
    pub category: String,
    pub title: String,
    pub description: String,
    pub impact: Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub priority: Priority,
    pub action: String,
    pub details: String,
    pub rationale: String,
    pub impact: Value,
    pub confidence: f64,
    pub urgency: String,
    pub owner: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningCategory {
    Execution,
    DataQuality,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub category: WarningCategory,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub condition: String,
    pub severity: AlertSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStep {
    pub step: String,
    pub owner: String,
    pub depends_on: Vec<String>,
    pub order: usize,
}

/// Re-projection of the executor's accounting, named per spec.md §4.11's
/// "Metrics: executor's duration/stages/costs".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisMetrics {
    pub duration_ms: u128,
    pub stages_completed: usize,
    pub stages_skipped: usize,
    pub stages_failed: usize,
    pub costs: CostAccounting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub core_data: CoreData,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
    pub warnings: Vec<Warning>,
    pub alerts: Vec<Alert>,
    pub metrics: SynthesisMetrics,
    pub reasoning: String,
    pub next_steps: Vec<NextStep>,
}
