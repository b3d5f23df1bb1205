use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Combinator over the condition categories of one rule (static conditions
/// taken as a unit, group membership, category filters, AI instructions).
/// The static conditions themselves are always AND-combined with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalOperator {
    And,
    Or,
}

impl ConditionalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionalOperator::And => "and",
            ConditionalOperator::Or => "or",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupItemType {
    From,
    Subject,
}

impl GroupItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupItemType::From => "from",
            GroupItemType::Subject => "subject",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "from" => Some(Self::From),
            "subject" => Some(Self::Subject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilterType {
    Include,
    Exclude,
}

impl CategoryFilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryFilterType::Include => "include",
            CategoryFilterType::Exclude => "exclude",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "include" => Some(Self::Include),
            "exclude" => Some(Self::Exclude),
            _ => None,
        }
    }
}

/// One entry in a rule's ordered action list. Actions are opaque to the
/// repair agent: they are carried through edits untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleAction {
    pub action_type: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub conditional_operator: ConditionalOperator,
    pub ai_instructions: Option<String>,
    pub from_pattern: Option<String>,
    pub to_pattern: Option<String>,
    pub subject_pattern: Option<String>,
    pub body_pattern: Option<String>,
    pub group_id: Option<String>,
    pub category_filter_type: Option<CategoryFilterType>,
    pub actions: Vec<RuleAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn has_static_conditions(&self) -> bool {
        self.from_pattern.is_some()
            || self.to_pattern.is_some()
            || self.subject_pattern.is_some()
            || self.body_pattern.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub user_id: i64,
    pub name: String,
    pub conditional_operator: ConditionalOperator,
    pub ai_instructions: Option<String>,
    pub from_pattern: Option<String>,
    pub to_pattern: Option<String>,
    pub subject_pattern: Option<String>,
    pub body_pattern: Option<String>,
    pub group_id: Option<String>,
    pub category_filter_type: Option<CategoryFilterType>,
    /// Category names to link as filters; resolved to ids at insert time.
    pub category_names: Vec<String>,
    pub actions: Vec<RuleAction>,
}

/// Replacement for the condition portion of an existing rule. Name and
/// actions are never part of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionUpdate {
    pub conditional_operator: ConditionalOperator,
    pub ai_instructions: Option<String>,
    pub from_pattern: Option<String>,
    pub to_pattern: Option<String>,
    pub subject_pattern: Option<String>,
    pub body_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupItem {
    pub id: String,
    pub group_id: String,
    pub item_type: GroupItemType,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGroupItem {
    pub group_id: String,
    pub item_type: GroupItemType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWithItems {
    pub group: Group,
    pub items: Vec<GroupItem>,
}

/// A rule with its group and category relations resolved, as consumed by
/// the serializer and the repair session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleWithRelations {
    pub rule: Rule,
    pub group: Option<GroupWithItems>,
    pub categories: Vec<Category>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_value};

    #[test]
    fn enums_round_trip_through_as_str() {
        for op in [ConditionalOperator::And, ConditionalOperator::Or] {
            assert_eq!(ConditionalOperator::from_str(op.as_str()), Some(op));
        }
        for ty in [GroupItemType::From, GroupItemType::Subject] {
            assert_eq!(GroupItemType::from_str(ty.as_str()), Some(ty));
        }
        for ty in [CategoryFilterType::Include, CategoryFilterType::Exclude] {
            assert_eq!(CategoryFilterType::from_str(ty.as_str()), Some(ty));
        }

        assert_eq!(ConditionalOperator::from_str("xor"), None);
        assert_eq!(GroupItemType::from_str("body"), None);
        assert_eq!(CategoryFilterType::from_str("only"), None);
    }

    #[test]
    fn enums_serialize_to_snake_case() {
        assert_eq!(to_value(ConditionalOperator::And).unwrap(), json!("and"));
        assert_eq!(to_value(GroupItemType::Subject).unwrap(), json!("subject"));
        assert_eq!(
            to_value(CategoryFilterType::Exclude).unwrap(),
            json!("exclude")
        );
        assert_eq!(
            from_str::<ConditionalOperator>("\"or\"").unwrap(),
            ConditionalOperator::Or
        );
    }

    #[test]
    fn rule_action_defaults_parameters_to_null() {
        let action: RuleAction = serde_json::from_value(json!({"action_type": "archive"}))
            .expect("deserialize action");
        assert_eq!(action.action_type, "archive");
        assert_eq!(action.parameters, Value::Null);
    }

    #[test]
    fn has_static_conditions_checks_all_four_fields() {
        let mut rule = Rule {
            id: "r1".into(),
            user_id: 1,
            name: "Newsletter".into(),
            conditional_operator: ConditionalOperator::And,
            ai_instructions: None,
            from_pattern: None,
            to_pattern: None,
            subject_pattern: None,
            body_pattern: None,
            group_id: None,
            category_filter_type: None,
            actions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!rule.has_static_conditions());

        rule.body_pattern = Some("unsubscribe".into());
        assert!(rule.has_static_conditions());
    }
}
