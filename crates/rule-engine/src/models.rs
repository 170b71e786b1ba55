//! 规则引擎领域模型

use crate::operators::{LogicalOperator, Operator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则定义
///
/// 简单规则使用自身的 target/operator/value 作为单一条件；
/// `uses_advanced_conditions` 为 true 时改用 `conditions` 中的分组条件。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub target: RuleField,
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub is_case_sensitive: bool,
    #[serde(default)]
    pub scope: RuleScope,
    /// 序列化的订阅源 ID 列表，如 "[1,2,3]"
    #[serde(default)]
    pub feed_ids: Option<String>,
    /// 序列化的分类 ID 列表
    #[serde(default)]
    pub category_ids: Option<String>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// 数值越小越先评估
    #[serde(default)]
    pub priority: i32,
    pub action: RuleAction,
    #[serde(default)]
    pub uses_advanced_conditions: bool,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub match_count: i64,
    #[serde(default)]
    pub last_match_date: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// 创建简单规则（单一 target/operator/value 条件，作用于全部订阅源）
    pub fn simple(
        id: i64,
        name: impl Into<String>,
        target: RuleField,
        operator: Operator,
        value: impl Into<String>,
        action: RuleAction,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            target,
            operator,
            value: value.into(),
            negate: false,
            is_case_sensitive: false,
            scope: RuleScope::AllFeeds,
            feed_ids: None,
            category_ids: None,
            is_enabled: true,
            priority: 0,
            action,
            uses_advanced_conditions: false,
            conditions: Vec::new(),
            match_count: 0,
            last_match_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// 创建高级规则（分组条件）
    pub fn advanced(
        id: i64,
        name: impl Into<String>,
        conditions: Vec<RuleCondition>,
        action: RuleAction,
    ) -> Self {
        let conditions = conditions
            .into_iter()
            .map(|mut c| {
                c.rule_id = id;
                c
            })
            .collect();

        Self {
            uses_advanced_conditions: true,
            conditions,
            ..Self::simple(id, name, RuleField::Title, Operator::Contains, "", action)
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_negate(mut self, negate: bool) -> Self {
        self.negate = negate;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.is_case_sensitive = case_sensitive;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.is_enabled = enabled;
        self
    }

    /// 限定到指定订阅源，写入序列化列表
    pub fn for_feeds(mut self, feed_ids: &[i64]) -> Self {
        self.scope = RuleScope::SpecificFeeds;
        self.feed_ids = Some(serialize_id_list(feed_ids));
        self
    }

    /// 限定到指定分类，写入序列化列表
    pub fn for_categories(mut self, category_ids: &[i64]) -> Self {
        self.scope = RuleScope::SpecificCategories;
        self.category_ids = Some(serialize_id_list(category_ids));
        self
    }

    pub fn with_statistics(mut self, match_count: i64, last_match_date: Option<DateTime<Utc>>) -> Self {
        self.match_count = match_count;
        self.last_match_date = last_match_date;
        self
    }
}

fn serialize_id_list(ids: &[i64]) -> String {
    let items: Vec<String> = ids.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(","))
}

/// 条件可引用的文章字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Title,
    Content,
    Summary,
    Author,
    /// 任一分类满足即匹配
    Categories,
    PublishedAt,
    /// 标题、摘要、正文任一满足即匹配
    AnyText,
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Title => "title",
            Self::Content => "content",
            Self::Summary => "summary",
            Self::Author => "author",
            Self::Categories => "categories",
            Self::PublishedAt => "published_at",
            Self::AnyText => "any_text",
        };
        write!(f, "{}", s)
    }
}

/// 规则作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    #[default]
    AllFeeds,
    SpecificFeeds,
    SpecificCategories,
}

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// 规则命中后执行的动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    MarkAsRead,
    MarkAsStarred,
    ApplyTags {
        tag_ids: Vec<i64>,
    },
    HighlightArticle {
        color: String,
    },
    SendNotification {
        #[serde(default)]
        template: String,
        #[serde(default)]
        priority: NotificationPriority,
    },
}

impl RuleAction {
    /// 动作名称（用于日志与指标标签）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarkAsRead => "mark_as_read",
            Self::MarkAsStarred => "mark_as_starred",
            Self::ApplyTags { .. } => "apply_tags",
            Self::HighlightArticle { .. } => "highlight_article",
            Self::SendNotification { .. } => "send_notification",
        }
    }
}

/// 高级规则中的单个条件
///
/// 同一 group_id 内按 order 排序，依次用前一个条件的 combine_with_next 连接；
/// 不同组之间为 OR 关系。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub rule_id: i64,
    #[serde(default)]
    pub group_id: i32,
    #[serde(default)]
    pub order: i32,
    pub field: RuleField,
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub is_case_sensitive: bool,
    #[serde(default)]
    pub combine_with_next: LogicalOperator,
}

impl RuleCondition {
    pub fn new(
        group_id: i32,
        order: i32,
        field: RuleField,
        operator: Operator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            rule_id: 0,
            group_id,
            order,
            field,
            operator,
            value: value.into(),
            negate: false,
            is_case_sensitive: false,
            combine_with_next: LogicalOperator::And,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.is_case_sensitive = true;
        self
    }

    /// 设置与下一个条件的连接方式
    pub fn then(mut self, combine_with_next: LogicalOperator) -> Self {
        self.combine_with_next = combine_with_next;
        self
    }
}

/// 待评估的文章（只读投影）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn new(id: i64, feed_id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            feed_id,
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}

/// 单次评估产生的命中记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    pub rule_id: i64,
    pub rule_name: String,
    pub article_id: i64,
    pub matched: bool,
    pub matched_at: DateTime<Utc>,
}

/// 规则命中统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStatistics {
    pub rule_id: i64,
    pub name: String,
    pub match_count: i64,
    pub last_match_date: Option<DateTime<Utc>>,
}

/// 单条规则的评估结果
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub matched: bool,
    pub rule_id: i64,
    pub rule_name: String,
    pub evaluation_trace: Vec<String>,
}

impl EvaluationResult {
    pub fn new(rule_id: i64, rule_name: String) -> Self {
        Self {
            matched: false,
            rule_id,
            rule_name,
            evaluation_trace: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserialization() {
        let json = r#"
        {
            "id": 12,
            "name": "security alerts",
            "target": "title",
            "operator": "contains",
            "value": "CVE",
            "scope": "specific_feeds",
            "feed_ids": "[3,5]",
            "priority": 2,
            "action": { "type": "apply_tags", "tag_ids": [1, 4] }
        }
        "#;

        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.id, 12);
        assert_eq!(rule.scope, RuleScope::SpecificFeeds);
        assert!(rule.is_enabled);
        assert!(!rule.uses_advanced_conditions);
        assert_eq!(rule.action, RuleAction::ApplyTags { tag_ids: vec![1, 4] });
    }

    #[test]
    fn test_advanced_rule_sets_condition_owner() {
        let rule = Rule::advanced(
            9,
            "adv",
            vec![RuleCondition::new(1, 1, RuleField::Author, Operator::Equals, "alice")],
            RuleAction::MarkAsStarred,
        );

        assert!(rule.uses_advanced_conditions);
        assert_eq!(rule.conditions[0].rule_id, 9);
    }

    #[test]
    fn test_scope_builders_serialize_lists() {
        let rule = Rule::simple(1, "r", RuleField::Title, Operator::Contains, "x", RuleAction::MarkAsRead)
            .for_feeds(&[10, 21]);
        assert_eq!(rule.feed_ids.as_deref(), Some("[10,21]"));
        assert_eq!(rule.scope, RuleScope::SpecificFeeds);
    }

    #[test]
    fn test_notification_action_defaults() {
        let action: RuleAction =
            serde_json::from_str(r#"{ "type": "send_notification" }"#).unwrap();
        assert_eq!(
            action,
            RuleAction::SendNotification {
                template: String::new(),
                priority: NotificationPriority::Normal,
            }
        );
        assert_eq!(action.kind(), "send_notification");
    }
}
