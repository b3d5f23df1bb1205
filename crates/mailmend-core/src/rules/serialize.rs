use super::types::RuleWithRelations;

/// Render a rule and its resolved relations as the textual block shown to
/// the decision maker. Output is a pure function of the rule state, so the
/// same state always yields byte-identical text (prompt caching and tests
/// rely on this). Field values are inserted verbatim.
pub fn serialize_rule(rule: &RuleWithRelations) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Rule name: {}", rule.rule.name));
    lines.push(format!(
        "Conditional operator: {}",
        rule.rule.conditional_operator.as_str().to_uppercase()
    ));

    if let Some(instructions) = rule.rule.ai_instructions.as_ref() {
        lines.push(format!("AI instructions: {instructions}"));
    }

    // Static conditions are one unit: they are always ANDed together, no
    // matter what the top-level operator is.
    if rule.rule.has_static_conditions() {
        lines.push("Static conditions (all must match):".to_string());
        if let Some(from) = rule.rule.from_pattern.as_ref() {
            lines.push(format!("- From: {from}"));
        }
        if let Some(to) = rule.rule.to_pattern.as_ref() {
            lines.push(format!("- To: {to}"));
        }
        if let Some(subject) = rule.rule.subject_pattern.as_ref() {
            lines.push(format!("- Subject: {subject}"));
        }
        if let Some(body) = rule.rule.body_pattern.as_ref() {
            lines.push(format!("- Body: {body}"));
        }
    }

    if let Some(group) = rule.group.as_ref() {
        lines.push(format!("Group condition: {}", group.group.name));
        if group.items.is_empty() {
            lines.push("(no items)".to_string());
        } else {
            for item in &group.items {
                lines.push(format!("- {}: {}", item.item_type.as_str(), item.value));
            }
        }
    }

    if !rule.categories.is_empty() {
        let filter_type = rule
            .rule
            .category_filter_type
            .map(|ty| ty.as_str())
            .unwrap_or("include");
        lines.push(format!("Category condition ({filter_type}):"));
        for category in &rule.categories {
            lines.push(format!("- {}", category.name));
        }
    }

    lines.join("\n")
}
