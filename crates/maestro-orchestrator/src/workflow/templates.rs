use super::definition::{WorkflowDefinition, WorkflowStep};
use serde_json::json;

/// Built-in workflow templates.
pub fn default_workflows() -> Vec<WorkflowDefinition> {
    vec![business_analysis(), content_pipeline()]
}

/// Market analysis and KPI framework run side by side, then a synthesis
/// step combines both into recommendations.
fn business_analysis() -> WorkflowDefinition {
    let steps = vec![
        WorkflowStep::new("market_analysis", "analytics", "market_analysis")
            .with_description("Size the market and map competitors")
            .map_input("industry", "industry")
            .map_input("region", "region")
            .map_output("analysis.market", "market")
            .with_timeout_secs(600)
            .with_max_retries(2),
        WorkflowStep::new("kpi_framework", "analytics", "kpi_framework")
            .with_description("Pick the KPIs that matter for the business goals")
            .map_input("industry", "industry")
            .map_input("goals", "goals")
            .map_output("analysis.kpis", "kpis")
            .with_timeout_secs(600)
            .with_max_retries(2),
        WorkflowStep::new("synthesis", "strategy", "synthesize_recommendations")
            .with_description("Combine market and KPI findings into recommendations")
            .depends_on(&["market_analysis", "kpi_framework"])
            .map_input("market", "analysis.market")
            .map_input("kpis", "analysis.kpis")
            .map_input("goals", "goals")
            .map_output("recommendations", "recommendations")
            .with_timeout_secs(900),
    ];

    WorkflowDefinition::new("business_analysis", "Business analysis", steps)
        .with_description("Parallel market and KPI analysis feeding a strategy synthesis")
        .with_schemas(
            json!({
                "type": "object",
                "required": ["industry"],
                "properties": {
                    "industry": {"type": "string"},
                    "region": {"type": "string"},
                    "goals": {"type": "array", "items": {"type": "string"}}
                }
            }),
            json!({
                "type": "object",
                "properties": {"recommendations": {"type": "array"}}
            }),
        )
}

/// Research, draft and review, strictly in sequence.
fn content_pipeline() -> WorkflowDefinition {
    let steps = vec![
        WorkflowStep::new("research", "research", "topic_research")
            .map_input("topic", "topic")
            .map_input("audience", "audience")
            .map_output("research.notes", "notes"),
        WorkflowStep::new("draft", "content", "write_draft")
            .depends_on(&["research"])
            .map_input("topic", "topic")
            .map_input("notes", "research.notes")
            .map_input("tone", "tone")
            .map_output("content.draft", "text"),
        WorkflowStep::new("review", "content", "review_draft")
            .depends_on(&["draft"])
            .map_input("draft", "content.draft")
            .map_input("audience", "audience")
            .map_output("content.final", "text")
            .with_max_retries(1),
    ];

    WorkflowDefinition::new("content_pipeline", "Content pipeline", steps)
        .with_description("Research a topic, draft a piece and review it")
        .with_schemas(
            json!({
                "type": "object",
                "required": ["topic"],
                "properties": {
                    "topic": {"type": "string"},
                    "audience": {"type": "string"},
                    "tone": {"type": "string"}
                }
            }),
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}}
            }),
        )
}
