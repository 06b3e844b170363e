//! Prompt construction and defensive parsing of reasoning output.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{json, Value};

use agentrun_core::actions::actions_for_capability;
use agentrun_core::{
    BusinessRequest, ChatMessage, FollowUp, Priority, RecommendedAction, Step, StepId,
    WorkflowReport,
};

use crate::error::OrchestratorError;

const PLANNING_INSTRUCTIONS: &str = "You are the workflow planner of a CRM automation system. \
Break the business request into steps, each delegated to one worker capability. \
Respond with a single JSON object and nothing else, shaped as: \
{\"priority\": \"low|medium|high|urgent\", \"steps\": [{\"step_id\": \"step_1\", \
\"target\": \"<capability>\", \"action\": \"<action>\", \"payload\": {}, \
\"depends_on\": [\"<step_id>\"], \"estimated_duration_ms\": 1000}]}. \
Only use the capabilities listed. A step may depend only on steps in the same plan.";

const FOLLOW_UP_INSTRUCTIONS: &str = "You review the results of an executed CRM workflow. \
Respond with a single JSON object and nothing else, shaped as: \
{\"summary\": \"...\", \"recommended_actions\": [{\"action\": \"...\", \
\"priority\": \"low|medium|high|urgent\", \"description\": \"...\", \"target\": \"<capability or null>\"}]}.";

/// Conversation asking the collaborator to plan `request`.
pub fn planning_messages(request: &BusinessRequest, capabilities: &[String]) -> Vec<ChatMessage> {
    let catalog: Vec<Value> = capabilities
        .iter()
        .map(|capability| {
            let actions: Vec<&str> = actions_for_capability(capability).collect();
            json!({ "capability": capability, "actions": actions })
        })
        .collect();

    let prompt = json!({
        "request": request,
        "available_capabilities": catalog,
    });

    vec![
        ChatMessage::system(PLANNING_INSTRUCTIONS),
        ChatMessage::user(prompt.to_string()),
    ]
}

/// Conversation asking the collaborator to interpret an executed workflow.
pub fn follow_up_messages(report: &WorkflowReport, request: &BusinessRequest) -> Vec<ChatMessage> {
    let prompt = json!({
        "original_request": request,
        "workflow": report,
    });

    vec![
        ChatMessage::system(FOLLOW_UP_INSTRUCTIONS),
        ChatMessage::user(prompt.to_string()),
    ]
}

/// Pull the first JSON object out of free-form model output.
///
/// Accepts a fenced block (```json ... ```) or a bare object surrounded by prose.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(fenced) = fenced_block(text) {
        if let Some(value) = first_object(fenced) {
            return Some(value);
        }
    }
    first_object(text)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the info string (e.g. "json") up to the end of the line.
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Parse the first balanced `{ ... }` in `text`, ignoring braces inside strings.
fn first_object(text: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(&text[start..]) {
            let candidate = &text[start..start + end];
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, alias = "workflow")]
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default, alias = "id")]
    step_id: Option<String>,
    #[serde(alias = "capability", alias = "agent")]
    target: String,
    action: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, alias = "dependencies")]
    depends_on: Vec<String>,
    #[serde(default)]
    estimated_duration_ms: u64,
}

/// A parsed plan before it becomes a workflow record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    pub priority: Option<Priority>,
    pub steps: Vec<Step>,
}

/// Parse planner output into steps.
pub fn parse_plan(text: &str) -> Result<PlanDraft, OrchestratorError> {
    let value = extract_json(text)
        .ok_or_else(|| OrchestratorError::PlanParse("no JSON object in reply".to_string()))?;
    let raw: RawPlan =
        serde_json::from_value(value).map_err(|e| OrchestratorError::PlanParse(e.to_string()))?;
    if raw.steps.is_empty() {
        return Err(OrchestratorError::PlanParse("plan has no steps".to_string()));
    }

    let steps = raw
        .steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| Step {
            step_id: StepId::new(step.step_id.unwrap_or_else(|| format!("step_{}", i + 1))),
            target: step.target,
            action: step.action,
            payload: step.payload,
            depends_on: step.depends_on.into_iter().map(StepId::new).collect::<BTreeSet<_>>(),
            estimated_duration_ms: step.estimated_duration_ms,
        })
        .collect();

    Ok(PlanDraft {
        priority: raw.priority.as_deref().map(Priority::parse_lenient),
        steps,
    })
}

#[derive(Deserialize)]
struct RawFollowUp {
    summary: String,
    #[serde(default, alias = "actions")]
    recommended_actions: Vec<RawAction>,
}

#[derive(Deserialize)]
struct RawAction {
    action: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    target: Option<String>,
}

/// Parse follow-up output.
pub fn parse_follow_up(text: &str) -> Result<FollowUp, OrchestratorError> {
    let value = extract_json(text)
        .ok_or_else(|| OrchestratorError::FollowUpParse("no JSON object in reply".to_string()))?;
    let raw: RawFollowUp = serde_json::from_value(value)
        .map_err(|e| OrchestratorError::FollowUpParse(e.to_string()))?;

    Ok(FollowUp {
        summary: raw.summary,
        recommended_actions: raw
            .recommended_actions
            .into_iter()
            .map(|a| RecommendedAction {
                action: a.action,
                priority: a.priority.as_deref().map(Priority::parse_lenient).unwrap_or_default(),
                description: a.description,
                target: a.target,
            })
            .collect(),
    })
}

/// Conservative follow-up used when the collaborator's reply is unusable.
pub fn default_follow_up(report: &WorkflowReport) -> FollowUp {
    FollowUp {
        summary: format!(
            "Workflow {} finished with {} of {} steps completed. Review the step results before taking further action.",
            report.workflow_id,
            report.completed_steps.len(),
            report.total_steps
        ),
        recommended_actions: Vec::new(),
    }
}

/// Fixed follow-up for a request that could not be processed.
pub fn remediation(error: &str) -> FollowUp {
    FollowUp {
        summary: format!("The request could not be processed: {error}"),
        recommended_actions: vec![
            RecommendedAction::new(
                "manual_review",
                Priority::High,
                "Review the request manually and complete it by hand",
            ),
            RecommendedAction::new(
                "system_check",
                Priority::Medium,
                "Check worker availability and the reasoning service",
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here is the plan:\n```json\n{\"steps\": [{\"target\": \"pricing\"}]}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["steps"][0]["target"], "pricing");
    }

    #[test]
    fn test_extract_bare_json_with_braces_in_strings() {
        let text = r#"Sure! {"summary": "use {braces} carefully", "n": {"x": 1}} trailing"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["summary"], "use {braces} carefully");
        assert_eq!(value["n"]["x"], 1);
    }

    #[test]
    fn test_extract_skips_invalid_candidates() {
        let text = "{not json} then {\"ok\": true}";
        assert_eq!(extract_json(text).unwrap()["ok"], true);
        assert!(extract_json("no objects here").is_none());
        assert!(extract_json("{\"unterminated\": ").is_none());
    }

    #[test]
    fn test_parse_plan_with_aliases_and_defaults() {
        let text = r#"{"priority": "critical", "steps": [
            {"capability": "lead_analysis", "action": "analyze_lead"},
            {"id": "price", "agent": "pricing", "action": "calculate_pricing",
             "dependencies": ["step_1"]}
        ]}"#;
        let plan = parse_plan(text).unwrap();

        assert_eq!(plan.priority, Some(Priority::Urgent));
        assert_eq!(plan.steps[0].step_id, StepId::new("step_1"));
        assert_eq!(plan.steps[1].step_id, StepId::new("price"));
        assert!(plan.steps[1].depends_on.contains(&StepId::new("step_1")));
    }

    #[test]
    fn test_parse_plan_rejects_malformed() {
        assert!(matches!(
            parse_plan("I cannot help with that."),
            Err(OrchestratorError::PlanParse(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"steps": []}"#),
            Err(OrchestratorError::PlanParse(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"steps": [{"action": "x"}]}"#),
            Err(OrchestratorError::PlanParse(_))
        ));
    }

    #[test]
    fn test_parse_follow_up() {
        let text = r#"```json
{"summary": "Lead qualified", "recommended_actions": [
  {"action": "schedule_follow_up", "priority": "high", "description": "Call next week"},
  {"action": "send_quotation"}
]}
```"#;
        let follow_up = parse_follow_up(text).unwrap();
        assert_eq!(follow_up.summary, "Lead qualified");
        assert_eq!(follow_up.recommended_actions[0].priority, Priority::High);
        assert_eq!(follow_up.recommended_actions[1].priority, Priority::Medium);
    }

    #[test]
    fn test_planning_prompt_lists_capabilities() {
        let request = BusinessRequest::new("quotation_request", "Quote two excavators");
        let messages = planning_messages(&request, &["pricing".to_string()]);

        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("calculate_pricing"));
        assert!(messages[1].content.contains("Quote two excavators"));
    }

    #[test]
    fn test_remediation_actions() {
        let follow_up = remediation("planner down");
        let actions: Vec<&str> = follow_up
            .recommended_actions
            .iter()
            .map(|a| a.action.as_str())
            .collect();
        assert_eq!(actions, vec!["manual_review", "system_check"]);
    }
}
