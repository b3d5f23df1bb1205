use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::llm::types::Tool;
use crate::rules::types::{
    CategoryFilterType, ConditionUpdate, ConditionalOperator, GroupItemType, NewGroupItem, NewRule,
    RuleAction,
};

use super::session::SessionContext;
use super::store::{RepairStore, StoreError};

/// The terminal tool. Selecting it ends the session; it has no execute step.
pub const REPLY_TOOL_NAME: &str = "reply";

/// Result payload of one tool execution, exactly as the decision maker
/// sees it: `{"success": true}` or `{"error": "<reason>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    Success { success: bool },
    Error { error: String },
}

impl ToolOutcome {
    pub fn success() -> Self {
        Self::Success { success: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"error": "unserializable outcome"}))
    }
}

/// Static from/to/subject/body patterns. Present fields are always
/// AND-combined with each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StaticConditionsInput {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryFiltersInput {
    pub filter_type: CategoryFilterType,
    /// Names of sender categories the rule applies (or does not apply) to.
    pub categories: Vec<String>,
}

/// The condition portion of a rule as the decision maker proposes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConditionInput {
    /// How the condition categories (static conditions, group, categories,
    /// AI instructions) combine. Static conditions are always ANDed among
    /// themselves regardless of this operator.
    pub conditional_operator: ConditionalOperator,
    #[serde(default)]
    pub ai_instructions: Option<String>,
    #[serde(default)]
    pub static_conditions: Option<StaticConditionsInput>,
    #[serde(default)]
    pub category_filters: Option<CategoryFiltersInput>,
}

impl ConditionInput {
    fn to_update(&self) -> ConditionUpdate {
        let statics = self.static_conditions.clone().unwrap_or_default();
        ConditionUpdate {
            conditional_operator: self.conditional_operator,
            ai_instructions: self.ai_instructions.clone(),
            from_pattern: statics.from,
            to_pattern: statics.to,
            subject_pattern: statics.subject,
            body_pattern: statics.body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EditRuleArgs {
    /// Name of the rule to edit. Omit to edit the rule that matched the
    /// original email.
    #[serde(default)]
    pub rule_name: Option<String>,
    /// Why this edit fixes the user's complaint.
    pub explanation: String,
    pub condition: ConditionInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreateRuleArgs {
    /// Name for the new rule. Must not collide with an existing rule.
    pub name: String,
    pub condition: ConditionInput,
    /// Ordered actions to run when the rule matches.
    pub actions: Vec<RuleAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChangeSenderCategoryArgs {
    /// Email address of the sender to reassign.
    pub sender: String,
    /// One of the known category names, or "none" to clear the assignment.
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AddToGroupArgs {
    /// Name of the group to extend. Omit to use the matched rule's group.
    #[serde(default)]
    pub group_name: Option<String>,
    /// Either "from" or "subject".
    pub item_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RemoveFromGroupArgs {
    /// Either "from" or "subject".
    pub item_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplyArgs {
    /// The message shown to the user.
    pub content: String,
}

/// One mutating operation the decision maker can invoke. Implementations
/// validate their arguments against the declared schema before touching the
/// store; domain failures come back as `ToolOutcome::Error`, never panics
/// or transport errors.
#[async_trait]
pub trait RepairTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn definition(&self, session: &SessionContext) -> Tool;

    async fn execute(
        &self,
        session: &SessionContext,
        store: &dyn RepairStore,
        args: Value,
    ) -> ToolOutcome;
}

/// The set of tools exposed for one session. Built per session because the
/// category tool only exists when the user has categories configured, and
/// group removal only when the matched rule carries a group.
pub struct ToolRegistry {
    tools: Vec<Box<dyn RepairTool>>,
    definitions: Vec<Tool>,
}

impl ToolRegistry {
    pub fn for_session(session: &SessionContext) -> Self {
        let mut tools: Vec<Box<dyn RepairTool>> = vec![
            Box::new(EditRuleTool),
            Box::new(CreateRuleTool),
            Box::new(AddToGroupTool),
        ];

        if session.has_categories() {
            tools.push(Box::new(ChangeSenderCategoryTool));
        }

        if session.matched_rule().is_some_and(|rule| rule.group.is_some()) {
            tools.push(Box::new(RemoveFromGroupTool));
        }

        let mut definitions: Vec<Tool> =
            tools.iter().map(|tool| tool.definition(session)).collect();
        definitions.push(reply_definition());

        Self { tools, definitions }
    }

    /// Tool schemas to advertise, terminal reply tool included.
    pub fn definitions(&self) -> &[Tool] {
        &self.definitions
    }

    pub async fn execute(
        &self,
        name: &str,
        session: &SessionContext,
        store: &dyn RepairStore,
        args: Value,
    ) -> ToolOutcome {
        match self.tools.iter().find(|tool| tool.name() == name) {
            Some(tool) => tool.execute(session, store, args).await,
            None => ToolOutcome::error(format!("Unknown tool: {name}")),
        }
    }
}

fn reply_definition() -> Tool {
    Tool::new(REPLY_TOOL_NAME)
        .with_description(
            "Reply to the user and end the session. Call this once the rules \
             are fixed, or to explain why no change is needed.",
        )
        .with_schema(schema_value(schema_for!(ReplyArgs)))
}

fn schema_value(schema: schemars::Schema) -> Value {
    serde_json::to_value(schema).expect("schema should serialize")
}

/// Restrict the `categories` array of a condition schema to the session's
/// known category names.
fn constrain_condition_categories(schema: &mut Value, categories: &[String]) {
    let names: Vec<Value> = categories
        .iter()
        .map(|name| Value::String(name.clone()))
        .collect();
    if let Some(items) =
        schema.pointer_mut("/$defs/CategoryFiltersInput/properties/categories/items")
    {
        if let Some(obj) = items.as_object_mut() {
            obj.insert("enum".into(), Value::Array(names));
        }
    }
}

fn outcome_from_store_error(err: StoreError) -> ToolOutcome {
    if let StoreError::Backend(message) = &err {
        warn!(error = %message, "store backend failure during tool execution");
    }
    ToolOutcome::error(err.to_string())
}

struct EditRuleTool;

#[async_trait]
impl RepairTool for EditRuleTool {
    fn name(&self) -> &'static str {
        "edit_rule"
    }

    fn definition(&self, session: &SessionContext) -> Tool {
        let mut schema = schema_value(schema_for!(EditRuleArgs));
        if let Some(categories) = session.categories.as_deref() {
            constrain_condition_categories(&mut schema, categories);
        }
        Tool::new(self.name())
            .with_description(
                "Replace the condition of an existing rule. The rule's name \
                 and actions are preserved.",
            )
            .with_schema(schema)
    }

    async fn execute(
        &self,
        session: &SessionContext,
        store: &dyn RepairStore,
        args: Value,
    ) -> ToolOutcome {
        let args: EditRuleArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return ToolOutcome::error(format!("Invalid arguments: {err}")),
        };

        let target = match args.rule_name.as_deref() {
            Some(name) => match session.rule_by_name(name) {
                Some(rule) => rule,
                None => return ToolOutcome::error(format!("Rule not found: {name}")),
            },
            None => match session.matched_rule() {
                Some(rule) => rule,
                None => {
                    return ToolOutcome::error(
                        "No rule matched this email and no rule_name was given",
                    );
                }
            },
        };

        // Group and category linkage is not yet applied on edit: the
        // condition's category_filters are accepted here but the rule's
        // existing linkage stays untouched.
        let update = args.condition.to_update();
        match store
            .replace_rule_condition(session.user.id, &target.rule.id, &update)
            .await
        {
            Ok(()) => ToolOutcome::success(),
            Err(err) => outcome_from_store_error(err),
        }
    }
}

struct CreateRuleTool;

#[async_trait]
impl RepairTool for CreateRuleTool {
    fn name(&self) -> &'static str {
        "create_rule"
    }

    fn definition(&self, session: &SessionContext) -> Tool {
        let mut schema = schema_value(schema_for!(CreateRuleArgs));
        if let Some(categories) = session.categories.as_deref() {
            constrain_condition_categories(&mut schema, categories);
        }
        Tool::new(self.name())
            .with_description("Create a brand-new rule from scratch.")
            .with_schema(schema)
    }

    async fn execute(
        &self,
        session: &SessionContext,
        store: &dyn RepairStore,
        args: Value,
    ) -> ToolOutcome {
        let args: CreateRuleArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return ToolOutcome::error(format!("Invalid arguments: {err}")),
        };

        let (category_filter_type, category_names) = match (
            args.condition.category_filters.as_ref(),
            session.categories.as_deref(),
        ) {
            (Some(filters), Some(known)) => {
                for name in &filters.categories {
                    if !known.contains(name) {
                        return ToolOutcome::error(format!("Unknown category: {name}"));
                    }
                }
                (Some(filters.filter_type), filters.categories.clone())
            }
            (Some(_), None) => {
                return ToolOutcome::error("Sender categories are not enabled for this user");
            }
            (None, _) => (None, Vec::new()),
        };

        let statics = args.condition.static_conditions.clone().unwrap_or_default();
        let new_rule = NewRule {
            user_id: session.user.id,
            name: args.name,
            conditional_operator: args.condition.conditional_operator,
            ai_instructions: args.condition.ai_instructions.clone(),
            from_pattern: statics.from,
            to_pattern: statics.to,
            subject_pattern: statics.subject,
            body_pattern: statics.body,
            group_id: None,
            category_filter_type,
            category_names,
            actions: args.actions,
        };

        match store.insert_rule(new_rule).await {
            Ok(_) => ToolOutcome::success(),
            Err(err) => outcome_from_store_error(err),
        }
    }
}

struct ChangeSenderCategoryTool;

#[async_trait]
impl RepairTool for ChangeSenderCategoryTool {
    fn name(&self) -> &'static str {
        "change_sender_category"
    }

    fn definition(&self, session: &SessionContext) -> Tool {
        let mut schema = schema_value(schema_for!(ChangeSenderCategoryArgs));
        if let Some(categories) = session.categories.as_deref() {
            let mut allowed: Vec<Value> = categories
                .iter()
                .map(|name| Value::String(name.clone()))
                .collect();
            allowed.push(Value::String("none".into()));
            if let Some(category) = schema.pointer_mut("/properties/category") {
                if let Some(obj) = category.as_object_mut() {
                    obj.insert("enum".into(), Value::Array(allowed));
                }
            }
        }
        Tool::new(self.name())
            .with_description(
                "Reassign a sender to one of the known categories, or to \
                 \"none\" to clear the assignment.",
            )
            .with_schema(schema)
    }

    async fn execute(
        &self,
        session: &SessionContext,
        store: &dyn RepairStore,
        args: Value,
    ) -> ToolOutcome {
        let args: ChangeSenderCategoryArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return ToolOutcome::error(format!("Invalid arguments: {err}")),
        };

        let Some(known) = session.categories.as_deref() else {
            return ToolOutcome::error("Sender categories are not enabled for this user");
        };

        let category = if args.category == "none" {
            None
        } else if known.contains(&args.category) {
            Some(args.category.as_str())
        } else {
            return ToolOutcome::error(format!("Unknown category: {}", args.category));
        };

        match store
            .set_sender_category(session.user.id, &args.sender, category)
            .await
        {
            Ok(()) => ToolOutcome::success(),
            Err(err) => outcome_from_store_error(err),
        }
    }
}

struct AddToGroupTool;

#[async_trait]
impl RepairTool for AddToGroupTool {
    fn name(&self) -> &'static str {
        "add_to_group"
    }

    fn definition(&self, _session: &SessionContext) -> Tool {
        Tool::new(self.name())
            .with_description(
                "Add a sender or subject item to one of the user's groups. \
                 Only add recurring patterns, not one-off values.",
            )
            .with_schema(schema_value(schema_for!(AddToGroupArgs)))
    }

    async fn execute(
        &self,
        session: &SessionContext,
        store: &dyn RepairStore,
        args: Value,
    ) -> ToolOutcome {
        let args: AddToGroupArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return ToolOutcome::error(format!("Invalid arguments: {err}")),
        };

        let Some(item_type) = GroupItemType::from_str(&args.item_type) else {
            return ToolOutcome::error(format!("Invalid group item type: {}", args.item_type));
        };

        let group = match args.group_name.as_deref() {
            Some(name) => match session.group_by_name(name) {
                Some(group) => group,
                None => return ToolOutcome::error(format!("Group not found: {name}")),
            },
            None => match session.matched_rule().and_then(|rule| rule.group.as_ref()) {
                Some(group) => group,
                None => {
                    return ToolOutcome::error(
                        "No group_name was given and the matched rule has no group",
                    );
                }
            },
        };

        match store
            .append_group_item(NewGroupItem {
                group_id: group.group.id.clone(),
                item_type,
                value: args.value,
            })
            .await
        {
            Ok(_) => ToolOutcome::success(),
            Err(err) => outcome_from_store_error(err),
        }
    }
}

struct RemoveFromGroupTool;

#[async_trait]
impl RepairTool for RemoveFromGroupTool {
    fn name(&self) -> &'static str {
        "remove_from_group"
    }

    fn definition(&self, _session: &SessionContext) -> Tool {
        Tool::new(self.name())
            .with_description(
                "Remove an exactly-matching item from the matched rule's group.",
            )
            .with_schema(schema_value(schema_for!(RemoveFromGroupArgs)))
    }

    async fn execute(
        &self,
        session: &SessionContext,
        store: &dyn RepairStore,
        args: Value,
    ) -> ToolOutcome {
        let args: RemoveFromGroupArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return ToolOutcome::error(format!("Invalid arguments: {err}")),
        };

        let Some(item_type) = GroupItemType::from_str(&args.item_type) else {
            return ToolOutcome::error(format!("Invalid group item type: {}", args.item_type));
        };

        let Some(group) = session.matched_rule().and_then(|rule| rule.group.as_ref()) else {
            return ToolOutcome::error("The matched rule has no group");
        };

        let found = match store
            .find_group_item(&group.group.id, item_type, &args.value)
            .await
        {
            Ok(found) => found,
            Err(err) => return outcome_from_store_error(err),
        };

        let Some(item) = found else {
            return ToolOutcome::error("Group item not found");
        };

        match store.remove_group_item(&item.id).await {
            Ok(()) => ToolOutcome::success(),
            Err(err) => outcome_from_store_error(err),
        }
    }
}
