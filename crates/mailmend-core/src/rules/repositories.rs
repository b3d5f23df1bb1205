use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError};

use super::types::{
    Category, CategoryFilterType, ConditionUpdate, ConditionalOperator, Group, GroupItem,
    GroupItemType, GroupWithItems, NewGroupItem, NewRule, Rule, RuleWithRelations,
};

const RULE_COLUMNS: &str = "id, name, conditional_operator, ai_instructions, from_pattern, to_pattern, subject_pattern, body_pattern, group_id, category_filter_type, actions_json, created_at, updated_at, user_id";
const GROUP_COLUMNS: &str = "id, name, created_at, updated_at, user_id";
const GROUP_ITEM_COLUMNS: &str = "id, group_id, item_type, value, created_at";
const CATEGORY_COLUMNS: &str = "id, name, created_at, user_id";

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("rule not found: {0}")]
    NotFound(String),
    #[error("rule name already in use: {0}")]
    DuplicateName(String),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
    #[error("invalid conditional_operator value {0}")]
    InvalidOperator(String),
    #[error("invalid category_filter_type value {0}")]
    InvalidFilterType(String),
    #[error("group error: {0}")]
    Group(#[from] GroupError),
}

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("group not found: {0}")]
    NotFound(String),
    #[error("group item not found: {0}")]
    ItemNotFound(String),
    #[error("invalid item_type value {0}")]
    InvalidItemType(String),
}

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("category not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum SenderCategoryError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
}

#[derive(Clone)]
pub struct RuleRepository {
    db: Database,
}

impl RuleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a rule and link its category filters in one transaction.
    /// Name uniqueness is enforced by the store's unique index, not here.
    pub async fn create(&self, new_rule: NewRule) -> Result<Rule, RuleError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let actions_json = serde_json::to_string(&new_rule.actions)?;

        let conn = self.db.connection().await?;

        let mut category_ids = Vec::with_capacity(new_rule.category_names.len());
        for name in &new_rule.category_names {
            let mut rows = conn
                .query(
                    "SELECT id FROM categories WHERE user_id = ?1 AND name = ?2",
                    params![new_rule.user_id, name.as_str()],
                )
                .await?;
            match rows.next().await? {
                Some(row) => {
                    let category_id: String = row.get(0)?;
                    category_ids.push(category_id);
                }
                None => return Err(RuleError::UnknownCategory(name.clone())),
            }
        }

        let tx = conn.transaction().await?;
        let insert = tx
            .query(
                &format!(
                    "INSERT INTO rules (
                        id, user_id, name, conditional_operator, ai_instructions, from_pattern, to_pattern, subject_pattern, body_pattern, group_id, category_filter_type, actions_json, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
                    RETURNING {RULE_COLUMNS}"
                ),
                params![
                    id,
                    new_rule.user_id,
                    new_rule.name.as_str(),
                    new_rule.conditional_operator.as_str(),
                    new_rule.ai_instructions.clone(),
                    new_rule.from_pattern.clone(),
                    new_rule.to_pattern.clone(),
                    new_rule.subject_pattern.clone(),
                    new_rule.body_pattern.clone(),
                    new_rule.group_id.clone(),
                    new_rule.category_filter_type.map(|ty| ty.as_str().to_string()),
                    actions_json,
                    now
                ],
            )
            .await;

        let mut rows = match insert {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => {
                return Err(RuleError::DuplicateName(new_rule.name));
            }
            Err(err) => return Err(err.into()),
        };

        // The unique-index violation may surface when the statement is
        // issued or at the first row fetch, depending on the backend.
        let rule = match rows.next().await {
            Ok(Some(row)) => row_to_rule(row)?,
            Ok(None) => return Err(RuleError::NotFound("insert returned no row".into())),
            Err(err) if is_unique_violation(&err) => {
                return Err(RuleError::DuplicateName(new_rule.name));
            }
            Err(err) => return Err(err.into()),
        };
        // Release the RETURNING statement handle before issuing further
        // statements and committing; libsql refuses to commit a transaction
        // while a result set is still open on the connection.
        drop(rows);

        for category_id in &category_ids {
            tx.execute(
                "INSERT OR IGNORE INTO rule_category_filters (rule_id, category_id) VALUES (?1, ?2)",
                params![rule.id.as_str(), category_id.as_str()],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(rule)
    }

    pub async fn get_by_id(&self, user_id: i64, id: &str) -> Result<Rule, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE user_id = ?1 AND id = ?2"),
                params![user_id, id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(RuleError::NotFound(id.to_string())),
        }
    }

    pub async fn get_by_name(&self, user_id: i64, name: &str) -> Result<Rule, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE user_id = ?1 AND name = ?2"),
                params![user_id, name],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(RuleError::NotFound(name.to_string())),
        }
    }

    /// Load every rule for the user with group items and category filters
    /// resolved. Rules are ordered by name, categories by name, and group
    /// items by insertion order, so the serialized form is stable.
    pub async fn list_with_relations(
        &self,
        user_id: i64,
    ) -> Result<Vec<RuleWithRelations>, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE user_id = ?1 ORDER BY name"),
                params![user_id],
            )
            .await?;

        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            rules.push(row_to_rule(row)?);
        }

        let group_repo = GroupRepository::new(self.db.clone());
        let mut resolved = Vec::with_capacity(rules.len());
        for rule in rules {
            let group = match rule.group_id.as_deref() {
                Some(group_id) => Some(group_repo.get_with_items(group_id).await?),
                None => None,
            };

            let mut category_rows = conn
                .query(
                    "SELECT c.id, c.name, c.created_at, c.user_id
                     FROM rule_category_filters f
                     JOIN categories c ON c.id = f.category_id
                     WHERE f.rule_id = ?1
                     ORDER BY c.name",
                    params![rule.id.as_str()],
                )
                .await?;
            let mut categories = Vec::new();
            while let Some(row) = category_rows.next().await? {
                categories.push(row_to_category(row).map_err(|err| match err {
                    CategoryError::Database(e) => RuleError::Database(e),
                    CategoryError::Sql(e) => RuleError::Sql(e),
                    CategoryError::DateTimeParse(e) => RuleError::DateTimeParse(e),
                    CategoryError::NotFound(name) => RuleError::UnknownCategory(name),
                })?);
            }

            resolved.push(RuleWithRelations {
                rule,
                group,
                categories,
            });
        }

        Ok(resolved)
    }

    /// Replace only the condition columns of a rule. Name, actions, group
    /// and category linkage stay as they are.
    pub async fn replace_condition(
        &self,
        user_id: i64,
        rule_id: &str,
        condition: &ConditionUpdate,
    ) -> Result<Rule, RuleError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE rules SET
                        conditional_operator = ?1,
                        ai_instructions = ?2,
                        from_pattern = ?3,
                        to_pattern = ?4,
                        subject_pattern = ?5,
                        body_pattern = ?6,
                        updated_at = ?7
                     WHERE user_id = ?8 AND id = ?9
                     RETURNING {RULE_COLUMNS}"
                ),
                params![
                    condition.conditional_operator.as_str(),
                    condition.ai_instructions.clone(),
                    condition.from_pattern.clone(),
                    condition.to_pattern.clone(),
                    condition.subject_pattern.clone(),
                    condition.body_pattern.clone(),
                    now,
                    user_id,
                    rule_id
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(RuleError::NotFound(rule_id.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct GroupRepository {
    db: Database,
}

impl GroupRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, user_id: i64, name: &str) -> Result<Group, GroupError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO rule_groups (id, user_id, name, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     RETURNING {GROUP_COLUMNS}"
                ),
                params![id, user_id, name, now],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_group(row),
            None => Err(GroupError::NotFound("insert returned no row".into())),
        }
    }

    pub async fn get_with_items(&self, group_id: &str) -> Result<GroupWithItems, GroupError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {GROUP_COLUMNS} FROM rule_groups WHERE id = ?1"),
                params![group_id],
            )
            .await?;

        let group = match rows.next().await? {
            Some(row) => row_to_group(row)?,
            None => return Err(GroupError::NotFound(group_id.to_string())),
        };

        let mut item_rows = conn
            .query(
                &format!(
                    "SELECT {GROUP_ITEM_COLUMNS} FROM group_items WHERE group_id = ?1 ORDER BY created_at, id"
                ),
                params![group_id],
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = item_rows.next().await? {
            items.push(row_to_group_item(row)?);
        }

        Ok(GroupWithItems { group, items })
    }

    /// Duplicate (type, value) pairs are tolerated: every add inserts a new
    /// row, so a repeated add never corrupts existing items.
    pub async fn add_item(&self, new_item: NewGroupItem) -> Result<GroupItem, GroupError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO group_items (id, group_id, item_type, value, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     RETURNING {GROUP_ITEM_COLUMNS}"
                ),
                params![
                    id,
                    new_item.group_id.as_str(),
                    new_item.item_type.as_str(),
                    new_item.value.as_str(),
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_group_item(row),
            None => Err(GroupError::NotFound(new_item.group_id)),
        }
    }

    /// Exact-match lookup on (type, value). Returns the oldest matching item
    /// when duplicates exist.
    pub async fn find_item(
        &self,
        group_id: &str,
        item_type: GroupItemType,
        value: &str,
    ) -> Result<Option<GroupItem>, GroupError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {GROUP_ITEM_COLUMNS} FROM group_items
                     WHERE group_id = ?1 AND item_type = ?2 AND value = ?3
                     ORDER BY created_at, id LIMIT 1"
                ),
                params![group_id, item_type.as_str(), value],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_group_item(row)?)),
            None => Ok(None),
        }
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<(), GroupError> {
        let conn = self.db.connection().await?;
        let affected = conn
            .execute("DELETE FROM group_items WHERE id = ?1", params![item_id])
            .await?;
        if affected == 0 {
            return Err(GroupError::ItemNotFound(item_id.to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct CategoryRepository {
    db: Database,
}

impl CategoryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, user_id: i64, name: &str) -> Result<Category, CategoryError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO categories (id, user_id, name, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     RETURNING {CATEGORY_COLUMNS}"
                ),
                params![id, user_id, name, now],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_category(row),
            None => Err(CategoryError::NotFound("insert returned no row".into())),
        }
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<Category>, CategoryError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE user_id = ?1 ORDER BY name"),
                params![user_id],
            )
            .await?;

        let mut categories = Vec::new();
        while let Some(row) = rows.next().await? {
            categories.push(row_to_category(row)?);
        }
        Ok(categories)
    }
}

/// Sender to category assignments live beside the rules as an annotation:
/// they are written by the repair agent but never referenced by rule rows.
#[derive(Clone)]
pub struct SenderCategoryRepository {
    db: Database,
}

impl SenderCategoryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn set(
        &self,
        user_id: i64,
        sender: &str,
        category: &str,
    ) -> Result<(), SenderCategoryError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        conn.execute(
            "INSERT INTO sender_categories (user_id, sender, category, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, sender) DO UPDATE SET category = ?3, updated_at = ?4",
            params![user_id, sender, category, now],
        )
        .await?;
        Ok(())
    }

    pub async fn clear(&self, user_id: i64, sender: &str) -> Result<(), SenderCategoryError> {
        let conn = self.db.connection().await?;
        conn.execute(
            "DELETE FROM sender_categories WHERE user_id = ?1 AND sender = ?2",
            params![user_id, sender],
        )
        .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        user_id: i64,
        sender: &str,
    ) -> Result<Option<String>, SenderCategoryError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT category FROM sender_categories WHERE user_id = ?1 AND sender = ?2",
                params![user_id, sender],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

fn row_to_rule(row: Row) -> Result<Rule, RuleError> {
    let operator: String = row.get(2)?;
    let filter_type: Option<String> = row.get(9)?;
    let actions_json: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    let conditional_operator = ConditionalOperator::from_str(&operator)
        .ok_or_else(|| RuleError::InvalidOperator(operator.clone()))?;
    let category_filter_type = filter_type
        .map(|value| {
            CategoryFilterType::from_str(&value).ok_or(RuleError::InvalidFilterType(value))
        })
        .transpose()?;

    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        conditional_operator,
        ai_instructions: row.get(3)?,
        from_pattern: row.get(4)?,
        to_pattern: row.get(5)?,
        subject_pattern: row.get(6)?,
        body_pattern: row.get(7)?,
        group_id: row.get(8)?,
        category_filter_type,
        actions: serde_json::from_str(&actions_json)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
        user_id: row.get(13)?,
    })
}

fn row_to_group(row: Row) -> Result<Group, GroupError> {
    let created_at: String = row.get(2)?;
    let updated_at: String = row.get(3)?;

    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
        user_id: row.get(4)?,
    })
}

fn row_to_group_item(row: Row) -> Result<GroupItem, GroupError> {
    let item_type: String = row.get(2)?;
    let created_at: String = row.get(4)?;

    let item_type = GroupItemType::from_str(&item_type)
        .ok_or_else(|| GroupError::InvalidItemType(item_type.clone()))?;

    Ok(GroupItem {
        id: row.get(0)?,
        group_id: row.get(1)?,
        item_type,
        value: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

fn row_to_category(row: Row) -> Result<Category, CategoryError> {
    let created_at: String = row.get(2)?;

    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        user_id: row.get(3)?,
    })
}
