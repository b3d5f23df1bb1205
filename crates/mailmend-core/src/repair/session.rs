use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;
use crate::rules::repositories::{
    CategoryError, CategoryRepository, RuleError, RuleRepository, SenderCategoryError,
    SenderCategoryRepository,
};
use crate::rules::types::{GroupWithItems, RuleWithRelations};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub about: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from_email: String,
    pub subject: Option<String>,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
}

/// Everything one repair session needs, assembled fresh per request and
/// discarded when the loop ends. Never shared across sessions.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: UserProfile,
    /// The user's full rule set with relations resolved. Tools resolve
    /// names against this snapshot.
    pub rules: Vec<RuleWithRelations>,
    /// The natural-language correction from the user.
    pub correction: EmailMessage,
    /// The email whose handling is being complained about.
    pub original: EmailMessage,
    pub matched_rule_id: Option<String>,
    /// Valid category names, or None when category features are disabled.
    pub categories: Option<Vec<String>>,
    /// The original sender's current category assignment, if any.
    pub sender_category: Option<String>,
}

#[derive(Debug, Error)]
pub enum SessionLoadError {
    #[error("failed to load rules: {0}")]
    Rules(#[from] RuleError),
    #[error("failed to load categories: {0}")]
    Categories(#[from] CategoryError),
    #[error("failed to load sender category: {0}")]
    SenderCategory(#[from] SenderCategoryError),
    #[error("matched rule not found: {0}")]
    MatchedRuleNotFound(String),
}

impl SessionContext {
    /// Assemble a session from the store: the full rule set with relations,
    /// the user's category names (None when they have none configured), and
    /// the original sender's current category assignment.
    pub async fn load(
        db: &Database,
        user: UserProfile,
        correction: EmailMessage,
        original: EmailMessage,
        matched_rule_name: Option<&str>,
    ) -> Result<Self, SessionLoadError> {
        let rules = RuleRepository::new(db.clone())
            .list_with_relations(user.id)
            .await?;

        let matched_rule_id = match matched_rule_name {
            Some(name) => {
                let rule = rules
                    .iter()
                    .find(|r| r.rule.name == name)
                    .ok_or_else(|| SessionLoadError::MatchedRuleNotFound(name.to_string()))?;
                Some(rule.rule.id.clone())
            }
            None => None,
        };

        let categories = CategoryRepository::new(db.clone()).list(user.id).await?;
        let categories = if categories.is_empty() {
            None
        } else {
            Some(categories.into_iter().map(|c| c.name).collect())
        };

        let sender_category = SenderCategoryRepository::new(db.clone())
            .get(user.id, &original.from_email)
            .await?;

        Ok(Self {
            user,
            rules,
            correction,
            original,
            matched_rule_id,
            categories,
            sender_category,
        })
    }

    pub fn matched_rule(&self) -> Option<&RuleWithRelations> {
        let id = self.matched_rule_id.as_deref()?;
        self.rules.iter().find(|r| r.rule.id == id)
    }

    pub fn rule_by_name(&self, name: &str) -> Option<&RuleWithRelations> {
        self.rules.iter().find(|r| r.rule.name == name)
    }

    /// Resolve a group by name among the rule set's distinct groups.
    pub fn group_by_name(&self, name: &str) -> Option<&GroupWithItems> {
        self.rules
            .iter()
            .filter_map(|r| r.group.as_ref())
            .find(|g| g.group.name == name)
    }

    pub fn has_categories(&self) -> bool {
        self.categories.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::rules::repositories::GroupRepository;
    use crate::rules::types::{ConditionalOperator, NewGroupItem, NewRule};
    use crate::rules::types::GroupItemType;
    use tempfile::TempDir;

    fn user() -> UserProfile {
        UserProfile {
            id: 1,
            email: "me@example.com".into(),
            about: None,
        }
    }

    fn email(from: &str) -> EmailMessage {
        EmailMessage {
            from_email: from.into(),
            subject: Some("Subject".into()),
            body_plain: Some("Body".into()),
            body_html: None,
        }
    }

    async fn seeded_db(dir: &TempDir) -> Database {
        let db_path = dir.path().join("db.sqlite");
        let db = Database::new(&db_path).await.expect("create db");
        run_migrations(&db).await.expect("migrations");

        let groups = GroupRepository::new(db.clone());
        let group = groups.create(1, "Receipts").await.expect("group");
        groups
            .add_item(NewGroupItem {
                group_id: group.id.clone(),
                item_type: GroupItemType::Subject,
                value: "Invoice".into(),
            })
            .await
            .expect("item");

        let rules = RuleRepository::new(db.clone());
        rules
            .create(NewRule {
                user_id: 1,
                name: "Receipts".into(),
                conditional_operator: ConditionalOperator::And,
                ai_instructions: None,
                from_pattern: None,
                to_pattern: None,
                subject_pattern: None,
                body_pattern: None,
                group_id: Some(group.id),
                category_filter_type: None,
                category_names: vec![],
                actions: vec![],
            })
            .await
            .expect("rule");

        db
    }

    #[tokio::test]
    async fn load_resolves_matched_rule_and_relations() {
        let dir = TempDir::new().expect("temp dir");
        let db = seeded_db(&dir).await;

        let session = SessionContext::load(
            &db,
            user(),
            email("me@example.com"),
            email("billing@store.com"),
            Some("Receipts"),
        )
        .await
        .expect("load session");

        assert_eq!(session.rules.len(), 1);
        let matched = session.matched_rule().expect("matched rule");
        assert_eq!(matched.rule.name, "Receipts");
        assert!(matched.group.is_some());
        assert!(session.categories.is_none(), "no categories configured");
        assert!(session.sender_category.is_none());
    }

    #[tokio::test]
    async fn load_with_unknown_matched_rule_errors() {
        let dir = TempDir::new().expect("temp dir");
        let db = seeded_db(&dir).await;

        match SessionContext::load(
            &db,
            user(),
            email("me@example.com"),
            email("billing@store.com"),
            Some("Missing"),
        )
        .await
        {
            Err(SessionLoadError::MatchedRuleNotFound(name)) => assert_eq!(name, "Missing"),
            other => panic!("expected matched rule not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_collects_categories_and_sender_assignment() {
        let dir = TempDir::new().expect("temp dir");
        let db = seeded_db(&dir).await;

        CategoryRepository::new(db.clone())
            .create(1, "Newsletters")
            .await
            .expect("category");
        SenderCategoryRepository::new(db.clone())
            .set(1, "billing@store.com", "Newsletters")
            .await
            .expect("sender category");

        let session = SessionContext::load(
            &db,
            user(),
            email("me@example.com"),
            email("billing@store.com"),
            None,
        )
        .await
        .expect("load session");

        assert_eq!(session.categories, Some(vec!["Newsletters".into()]));
        assert_eq!(session.sender_category.as_deref(), Some("Newsletters"));
        assert!(session.matched_rule().is_none());
    }

    #[tokio::test]
    async fn group_by_name_searches_distinct_groups() {
        let dir = TempDir::new().expect("temp dir");
        let db = seeded_db(&dir).await;

        let session = SessionContext::load(
            &db,
            user(),
            email("me@example.com"),
            email("billing@store.com"),
            None,
        )
        .await
        .expect("load session");

        assert!(session.group_by_name("Receipts").is_some());
        assert!(session.group_by_name("Missing").is_none());
    }
}
