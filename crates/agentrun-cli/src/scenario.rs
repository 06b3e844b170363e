//! The canned quotation scenario run by `agentrun demo`.

use serde_json::json;

use agentrun_core::{BusinessRequest, Priority};

pub fn demo_request() -> BusinessRequest {
    BusinessRequest::new(
        "quotation_request",
        "Acme Construction wants a quote for three excavators for a 6 month project",
    )
    .with_payload(json!({
        "company": "Acme Construction",
        "contact_email": "procurement@acme.example",
        "budget": 450000,
        "timeline": "Q3",
        "item": "excavator",
        "quantity": 3,
        "unit_price": 120000.0,
    }))
    .with_priority(Priority::High)
}

/// Replies standing in for the reasoning service when no URL is configured:
/// the plan first, then the follow-up.
pub fn scripted_replies() -> Vec<String> {
    let plan = json!({
        "priority": "high",
        "steps": [
            {
                "step_id": "qualify",
                "target": "lead_analysis",
                "action": "analyze_lead",
                "payload": {
                    "company": "Acme Construction",
                    "contact_email": "procurement@acme.example",
                    "budget": 450000,
                    "timeline": "Q3"
                },
                "estimated_duration_ms": 500
            },
            {
                "step_id": "price",
                "target": "pricing",
                "action": "calculate_pricing",
                "payload": {"item": "excavator", "quantity": 3, "unit_price": 120000.0, "discount_pct": 5},
                "depends_on": ["qualify"],
                "estimated_duration_ms": 800
            },
            {
                "step_id": "quote",
                "target": "quotation_generation",
                "action": "generate_quotation",
                "payload": {"currency": "USD"},
                "depends_on": ["qualify", "price"],
                "estimated_duration_ms": 1200
            }
        ]
    });

    let follow_up = json!({
        "summary": "Lead qualified and a discounted quotation for three excavators is ready.",
        "recommended_actions": [
            {
                "action": "send_quotation",
                "priority": "high",
                "description": "Send the quotation to procurement@acme.example",
                "target": "quotation_generation"
            },
            {
                "action": "schedule_follow_up",
                "priority": "medium",
                "description": "Call Acme procurement in three days",
                "target": "communication"
            }
        ]
    });

    vec![
        format!("Here is the workflow:\n```json\n{plan:#}\n```"),
        follow_up.to_string(),
    ]
}
