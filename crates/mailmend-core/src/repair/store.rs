use async_trait::async_trait;
use thiserror::Error;

use crate::db::Database;
use crate::rules::repositories::{
    GroupError, GroupRepository, RuleError, RuleRepository, SenderCategoryRepository,
};
use crate::rules::types::{ConditionUpdate, GroupItem, GroupItemType, NewGroupItem, NewRule, Rule};

/// Failures of the mutation interface. Everything except `Backend` is a
/// normal, in-session resolution failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Rule not found: {0}")]
    RuleNotFound(String),
    #[error("Group not found: {0}")]
    GroupNotFound(String),
    #[error("Group item not found")]
    GroupItemNotFound,
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
    #[error("A rule named \"{0}\" already exists")]
    DuplicateRuleName(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The write half of the rule store as the repair tools see it. All writes
/// are single-record; the agent never needs a multi-record transaction.
#[async_trait]
pub trait RepairStore: Send + Sync {
    /// Replace a rule's condition, carrying name and actions over unchanged.
    async fn replace_rule_condition(
        &self,
        user_id: i64,
        rule_id: &str,
        condition: &ConditionUpdate,
    ) -> Result<(), StoreError>;

    /// Insert a brand-new rule. Name-collision policy belongs to the store.
    async fn insert_rule(&self, new_rule: NewRule) -> Result<Rule, StoreError>;

    async fn append_group_item(&self, new_item: NewGroupItem) -> Result<GroupItem, StoreError>;

    /// Exact-match lookup on (type, value) within a group.
    async fn find_group_item(
        &self,
        group_id: &str,
        item_type: GroupItemType,
        value: &str,
    ) -> Result<Option<GroupItem>, StoreError>;

    async fn remove_group_item(&self, item_id: &str) -> Result<(), StoreError>;

    /// Record a sender's category assignment; `None` clears it.
    async fn set_sender_category(
        &self,
        user_id: i64,
        sender: &str,
        category: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Default store over the libsql repositories.
#[derive(Clone)]
pub struct LibsqlRepairStore {
    rules: RuleRepository,
    groups: GroupRepository,
    senders: SenderCategoryRepository,
}

impl LibsqlRepairStore {
    pub fn new(db: Database) -> Self {
        Self {
            rules: RuleRepository::new(db.clone()),
            groups: GroupRepository::new(db.clone()),
            senders: SenderCategoryRepository::new(db),
        }
    }
}

#[async_trait]
impl RepairStore for LibsqlRepairStore {
    async fn replace_rule_condition(
        &self,
        user_id: i64,
        rule_id: &str,
        condition: &ConditionUpdate,
    ) -> Result<(), StoreError> {
        self.rules
            .replace_condition(user_id, rule_id, condition)
            .await
            .map(|_| ())
            .map_err(map_rule_error)
    }

    async fn insert_rule(&self, new_rule: NewRule) -> Result<Rule, StoreError> {
        self.rules.create(new_rule).await.map_err(map_rule_error)
    }

    async fn append_group_item(&self, new_item: NewGroupItem) -> Result<GroupItem, StoreError> {
        self.groups.add_item(new_item).await.map_err(map_group_error)
    }

    async fn find_group_item(
        &self,
        group_id: &str,
        item_type: GroupItemType,
        value: &str,
    ) -> Result<Option<GroupItem>, StoreError> {
        self.groups
            .find_item(group_id, item_type, value)
            .await
            .map_err(map_group_error)
    }

    async fn remove_group_item(&self, item_id: &str) -> Result<(), StoreError> {
        self.groups.remove_item(item_id).await.map_err(map_group_error)
    }

    async fn set_sender_category(
        &self,
        user_id: i64,
        sender: &str,
        category: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = match category {
            Some(category) => self.senders.set(user_id, sender, category).await,
            None => self.senders.clear(user_id, sender).await,
        };
        result.map_err(|err| StoreError::Backend(err.to_string()))
    }
}

fn map_rule_error(err: RuleError) -> StoreError {
    match err {
        RuleError::NotFound(id) => StoreError::RuleNotFound(id),
        RuleError::DuplicateName(name) => StoreError::DuplicateRuleName(name),
        RuleError::UnknownCategory(name) => StoreError::UnknownCategory(name),
        other => StoreError::Backend(other.to_string()),
    }
}

fn map_group_error(err: GroupError) -> StoreError {
    match err {
        GroupError::NotFound(name) => StoreError::GroupNotFound(name),
        GroupError::ItemNotFound(_) => StoreError::GroupItemNotFound,
        other => StoreError::Backend(other.to_string()),
    }
}
