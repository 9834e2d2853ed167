//! Cost accounting: tool pricing table, actual-cost computation, and the
//! `vs_estimates` diff the executor produces against the Plan Generator's
//! estimates.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::types::ToolCallRecord;
use crate::plan::types::Estimates;

/// Per-tool flat pricing, plus per-1M-token pricing for LLM-backed tools.
#[derive(Debug, Clone)]
pub struct PricingTable {
    pub flat_price_usd: HashMap<String, f64>,
    pub llm_price_per_1m_input_usd: f64,
    pub llm_price_per_1m_output_usd: f64,
    pub default_api_call_price_usd: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            flat_price_usd: HashMap::new(),
            llm_price_per_1m_input_usd: 3.0,
            llm_price_per_1m_output_usd: 15.0,
            default_api_call_price_usd: 0.01,
        }
    }
}

impl PricingTable {
    fn price_for_tool(&self, tool_id: &str) -> f64 {
        self.flat_price_usd
            .get(tool_id)
            .copied()
            .unwrap_or(self.default_api_call_price_usd)
    }
}

/// Signed difference between actual and estimated plan cost/duration/calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostDiff {
    pub cost_diff_usd: f64,
    pub duration_diff_ms: i64,
    pub llm_calls_diff: i64,
    pub api_calls_diff: i64,
}

/// Per-plan cost totals, produced at the end of `execute_plan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostAccounting {
    pub llm_calls: usize,
    pub api_calls: usize,
    pub actual_cost_usd: f64,
    pub vs_estimates: CostDiff,
}

/// Computes the actual cost from recorded tool calls plus an LLM-invocation
/// count, using flat per-call tool pricing and per-1M-token LLM pricing
/// (input/output tokens are not separately metered at this layer, so LLM
/// calls are costed at a representative fixed token estimate).
pub fn compute_actual_cost(pricing: &PricingTable, tool_calls: &[ToolCallRecord], llm_invocations: usize) -> f64 {
    let tool_cost: f64 = tool_calls.iter().map(|t| pricing.price_for_tool(&t.tool_id)).sum();
    const REPRESENTATIVE_INPUT_TOKENS: f64 = 1500.0;
    const REPRESENTATIVE_OUTPUT_TOKENS: f64 = 400.0;
    let llm_cost = llm_invocations as f64
        * ((REPRESENTATIVE_INPUT_TOKENS / 1_000_000.0) * pricing.llm_price_per_1m_input_usd
            + (REPRESENTATIVE_OUTPUT_TOKENS / 1_000_000.0) * pricing.llm_price_per_1m_output_usd);
    tool_cost + llm_cost
}

pub fn diff_against_estimates(
    estimates: &Estimates,
    actual_cost_usd: f64,
    actual_duration: Duration,
    actual_llm_calls: usize,
    actual_api_calls: usize,
) -> CostDiff {
    CostDiff {
        cost_diff_usd: actual_cost_usd - estimates.est_cost_usd,
        duration_diff_ms: actual_duration.as_millis() as i64 - estimates.est_duration.as_millis() as i64,
        llm_calls_diff: actual_llm_calls as i64 - estimates.llm_calls as i64,
        api_calls_diff: actual_api_calls as i64 - estimates.api_calls as i64,
    }
}
