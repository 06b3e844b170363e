//! Static action → required capability table.
//!
//! A worker supports an action it has no direct handler for when this table
//! maps the action to a capability the worker declares.

/// Known CRM actions and the capability each one requires.
pub const ACTION_CAPABILITIES: &[(&str, &str)] = &[
    ("analyze_lead", "lead_analysis"),
    ("score_lead", "lead_analysis"),
    ("qualify_lead", "lead_qualification"),
    ("calculate_pricing", "pricing"),
    ("apply_discount", "pricing"),
    ("generate_quotation", "quotation_generation"),
    ("send_quotation", "quotation_generation"),
    ("forecast_deal", "deal_forecasting"),
    ("update_deal_stage", "deal_management"),
    ("check_equipment_availability", "equipment_management"),
    ("schedule_maintenance", "equipment_management"),
    ("draft_email", "communication"),
    ("schedule_follow_up", "communication"),
    ("process_request", "general_assistance"),
];

/// Capability required by `action`, if the action is known.
pub fn required_capability(action: &str) -> Option<&'static str> {
    ACTION_CAPABILITIES
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, capability)| *capability)
}

/// Actions served by a given capability.
pub fn actions_for_capability(capability: &str) -> impl Iterator<Item = &'static str> + '_ {
    ACTION_CAPABILITIES
        .iter()
        .filter(move |(_, cap)| *cap == capability)
        .map(|(action, _)| *action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_capability() {
        assert_eq!(required_capability("calculate_pricing"), Some("pricing"));
        assert_eq!(required_capability("launch_rocket"), None);
    }

    #[test]
    fn test_actions_for_capability() {
        let actions: Vec<_> = actions_for_capability("lead_analysis").collect();
        assert_eq!(actions, vec!["analyze_lead", "score_lead"]);
    }
}
