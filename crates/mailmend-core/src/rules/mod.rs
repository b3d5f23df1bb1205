pub mod repositories;
pub mod serialize;
pub mod types;

pub use serialize::serialize_rule;
pub use types::{
    Category, ConditionUpdate, ConditionalOperator, CategoryFilterType, Group, GroupItem,
    GroupItemType, GroupWithItems, NewGroupItem, NewRule, Rule, RuleAction, RuleWithRelations,
};
