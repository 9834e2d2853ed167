//! Execution Plan visualization and a human-readable explainer
//! (SPEC_FULL.md §20): a `generate_dot`/`generate_text` pair mirroring
//! `graphweave::graph::visualization`'s pair for `CompiledStateGraph`,
//! generalized from a single linear chain to a DAG with parallel groups,
//! `depends_on` edges, and skip/continue predicates. Used by the CLI and
//! test harness only; the executor never consults this module.

use std::fmt::Write as _;

use crate::plan::types::{ExecutionPlan, PlanStage};

/// Generates a Graphviz DOT representation of a plan: one node per stage
/// (dashed if optional), edges from each stage's `depends_on` plus implicit
/// edges between consecutive `order` values when `depends_on` is empty,
/// and a dotted box around each non-trivial parallel group.
pub fn generate_dot(plan: &ExecutionPlan) -> String {
    let mut dot = String::from("digraph {\n");
    let _ = writeln!(dot, "  rankdir=LR;");
    let _ = writeln!(dot, "  node [shape=box];");
    let _ = writeln!(dot, "  label=\"{}\";", plan.plan_id);
    dot.push('\n');

    let mut ordered: Vec<&PlanStage> = plan.stages.iter().collect();
    ordered.sort_by_key(|s| s.order);

    for stage in &ordered {
        let style = if stage.required { "solid" } else { "dashed" };
        let _ = writeln!(
            dot,
            "  \"{}\" [label=\"{}\\n({})\", style={}];",
            stage.stage_id, stage.stage_id, stage.agent_id, style
        );
    }
    dot.push('\n');

    for stage in &ordered {
        if stage.depends_on.is_empty() {
            continue;
        }
        for dep in &stage.depends_on {
            let _ = writeln!(dot, "  \"{}\" -> \"{}\";", dep, stage.stage_id);
        }
    }

    // Consecutive stages with no declared dependency edge still imply
    // plan order; draw it so a plan with no `depends_on` data isn't a
    // floating node cloud.
    for pair in ordered.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next.depends_on.is_empty() && prev.parallel_group != next.parallel_group {
            let _ = writeln!(dot, "  \"{}\" -> \"{}\" [style=dotted];", prev.stage_id, next.stage_id);
        }
    }

    for (i, group) in plan.parallel_groups.iter().enumerate() {
        if group.len() < 2 {
            continue;
        }
        let _ = writeln!(dot, "\n  subgraph cluster_{} {{", i);
        let _ = writeln!(dot, "    style=dotted;");
        let _ = writeln!(dot, "    label=\"parallel group {}\";", i);
        for stage_id in group {
            let _ = writeln!(dot, "    \"{}\";", stage_id);
        }
        dot.push_str("  }\n");
    }

    dot.push_str("}\n");
    dot
}

/// Generates a plain-text execution-order summary, grouping consecutive
/// same-`parallel_group` stages on one line.
pub fn generate_text(plan: &ExecutionPlan) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Plan {} ({} / {})", plan.plan_id, plan.workflow_id, plan.workflow_version);
    let _ = writeln!(text, "Stages: {}", plan.stages.len());
    let _ = writeln!(text, "\nExecution order:");

    let mut ordered: Vec<&PlanStage> = plan.stages.iter().collect();
    ordered.sort_by_key(|s| s.order);

    let mut i = 0;
    while i < ordered.len() {
        let group = ordered[i].parallel_group;
        let mut members = vec![ordered[i]];
        let mut j = i + 1;
        while j < ordered.len() && group.is_some() && ordered[j].parallel_group == group {
            members.push(ordered[j]);
            j += 1;
        }
        if members.len() > 1 {
            let names: Vec<String> = members.iter().map(|s| s.stage_id.clone()).collect();
            let _ = writeln!(text, "  [{}]  (parallel)", names.join(" | "));
        } else {
            let stage = members[0];
            let marker = if stage.required { "" } else { " (optional)" };
            let _ = writeln!(text, "  {}{}", stage.stage_id, marker);
        }
        i = j.max(i + 1);
    }

    text
}

/// Human-readable explanation of a plan, for CLI/test-harness debugging:
/// classification summary, per-stage skip/continue predicates, and the
/// rolled-up cost/duration estimate.
pub fn explain_plan(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan {} classified as '{}' (confidence {:.2})",
        plan.plan_id, plan.classification.query_type, plan.classification.confidence
    );
    let _ = writeln!(out, "Reasoning: {}", plan.classification.reasoning);
    if !plan.validation.is_valid {
        let _ = writeln!(out, "WARNING: plan failed validation: {:?}", plan.validation.warnings);
    }

    let mut ordered: Vec<&PlanStage> = plan.stages.iter().collect();
    ordered.sort_by_key(|s| s.order);
    for stage in ordered {
        let _ = writeln!(out, "\n- {} -> {}", stage.stage_id, stage.agent_id);
        if let Some(group) = stage.parallel_group {
            let _ = writeln!(out, "    parallel_group: {}", group);
        }
        if stage.skip_when.is_some() {
            let _ = writeln!(out, "    skip_when: predicate set");
        }
        if stage.continue_when.is_some() {
            let _ = writeln!(out, "    continue_when: predicate set");
        }
        if !stage.depends_on.is_empty() {
            let _ = writeln!(out, "    depends_on: {}", stage.depends_on.join(", "));
        }
    }

    let _ = writeln!(
        out,
        "\nEstimated: {} agents, {} LLM calls, {} API calls, ${:.2}, {:?}",
        plan.estimates.total_agents,
        plan.estimates.llm_calls,
        plan.estimates.api_calls,
        plan.estimates.est_cost_usd,
        plan.estimates.est_duration
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::{Classification, Estimates, PlanContext, ValidationOutcome};
    use crate::plan::llm::ExtractedEntities;
    use std::time::Duration;

    fn stage(id: &str, order: usize, parallel_group: Option<u32>, depends_on: Vec<&str>) -> PlanStage {
        PlanStage {
            stage_id: id.into(),
            agent_id: format!("{id}_agent"),
            required: true,
            parallel_group,
            skip_when: None,
            continue_when: None,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            provides: vec![],
            requires: vec![],
            tools_needed: vec![],
            est_cost_usd: 0.0,
            est_duration: Duration::from_secs(1),
            order,
        }
    }

    fn plan(stages: Vec<PlanStage>, parallel_groups: Vec<Vec<String>>) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: "plan-1".into(),
            query_type: "bunker_planning".into(),
            workflow_id: "bunker_planning".into(),
            workflow_version: "1.0.0".into(),
            classification: Classification {
                query_type: "bunker_planning".into(),
                confidence: 0.9,
                reasoning: "matched bunker keywords".into(),
                secondary_intents: vec![],
                extracted_entities: ExtractedEntities::default(),
                proposed_workflow_id: Some("bunker_planning".into()),
            },
            stages,
            validation: ValidationOutcome::default(),
            estimates: Estimates::default(),
            required_state: vec![],
            expected_outputs: vec![],
            context: PlanContext {
                timeout: Duration::from_secs(60),
                priority: 0,
                correlation_id: "corr-1".into(),
            },
            parallel_groups,
        }
    }

    #[test]
    fn dot_contains_nodes_and_dependency_edges() {
        let p = plan(
            vec![stage("route", 0, None, vec![]), stage("weather", 1, None, vec!["route"])],
            vec![],
        );
        let dot = generate_dot(&p);
        assert!(dot.contains("digraph"));
        assert!(dot.contains("\"route\""));
        assert!(dot.contains("\"route\" -> \"weather\";"));
    }

    #[test]
    fn dot_wraps_parallel_group_in_cluster() {
        let p = plan(
            vec![stage("bunker", 0, Some(1), vec![]), stage("vessel", 1, Some(1), vec![])],
            vec![vec!["bunker".into(), "vessel".into()]],
        );
        let dot = generate_dot(&p);
        assert!(dot.contains("subgraph cluster_0"));
        assert!(dot.contains("parallel group 0"));
    }

    #[test]
    fn text_groups_parallel_stages_on_one_line() {
        let p = plan(
            vec![stage("bunker", 0, Some(1), vec![]), stage("vessel", 1, Some(1), vec![])],
            vec![vec!["bunker".into(), "vessel".into()]],
        );
        let text = generate_text(&p);
        assert!(text.contains("bunker | vessel"));
        assert!(text.contains("parallel"));
    }

    #[test]
    fn explain_plan_reports_predicates_and_estimates() {
        let mut s = stage("bunker", 0, None, vec![]);
        s.skip_when = Some(crate::registry::workflow::Predicate::default());
        let p = plan(vec![s], vec![]);
        let explanation = explain_plan(&p);
        assert!(explanation.contains("skip_when: predicate set"));
        assert!(explanation.contains("Estimated:"));
    }
}
