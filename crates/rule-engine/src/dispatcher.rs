//! 动作分发
//!
//! 将命中规则的动作翻译为对 `ActionSink` 的副作用请求。
//! 每种请求按 (文章, 效果) 幂等，重复分发不会重复生效。

use crate::error::Result;
use crate::models::{Article, NotificationPriority, Rule, RuleAction};
use crate::template;
use async_trait::async_trait;
use feed_shared::EngineConfig;
use feed_shared::observability::metrics::RULE_ACTIONS_TOTAL;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 可由规则设置的文章状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    Read,
    Starred,
}

/// 通知请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRequest {
    pub article_id: i64,
    pub rule_id: i64,
    pub rule_name: String,
    /// 已渲染的通知正文
    pub message: String,
    pub priority: NotificationPriority,
}

/// 动作执行端
///
/// 由宿主应用实现（数据库写入、通知服务等）。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// 为文章打标签，已存在的 (文章, 标签) 关联保持不变
    async fn apply_tags(
        &self,
        article_id: i64,
        tag_ids: &[i64],
        applied_by: &str,
        rule_id: i64,
    ) -> Result<()>;

    async fn set_status(&self, article_id: i64, field: StatusField, value: bool) -> Result<()>;

    async fn set_highlight(&self, article_id: i64, color: &str) -> Result<()>;

    async fn create_notification(&self, request: NotificationRequest) -> Result<()>;
}

/// 动作执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied,
    /// 无需执行（如空标签列表）
    Skipped,
    Failed(String),
}

impl ActionOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub rule_id: i64,
    pub article_id: i64,
    pub action: &'static str,
    pub outcome: ActionOutcome,
}

impl ActionResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Failed(_))
    }
}

/// 动作分发器
pub struct ActionDispatcher {
    sink: Arc<dyn ActionSink>,
    applied_by: String,
    default_template: String,
}

impl ActionDispatcher {
    pub fn new(sink: Arc<dyn ActionSink>, config: &EngineConfig) -> Self {
        Self {
            sink,
            applied_by: config.applied_by.clone(),
            default_template: config.default_notification_template.clone(),
        }
    }

    /// 执行规则动作
    ///
    /// 失败只记录日志并返回，不影响统计和其他规则。
    #[instrument(
        skip_all,
        fields(rule_id = rule.id, article_id = article.id, action = rule.action.kind())
    )]
    pub async fn dispatch(&self, rule: &Rule, article: &Article) -> ActionResult {
        let outcome = match self.execute(rule, article).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("规则动作执行失败: {}", e);
                ActionOutcome::Failed(e.to_string())
            }
        };

        let action = rule.action.kind();
        metrics::counter!(RULE_ACTIONS_TOTAL, "action" => action, "outcome" => outcome.label())
            .increment(1);
        debug!(outcome = outcome.label(), "规则动作已分发");

        ActionResult {
            rule_id: rule.id,
            article_id: article.id,
            action,
            outcome,
        }
    }

    async fn execute(&self, rule: &Rule, article: &Article) -> Result<ActionOutcome> {
        match &rule.action {
            RuleAction::MarkAsRead => {
                self.sink.set_status(article.id, StatusField::Read, true).await?;
            }
            RuleAction::MarkAsStarred => {
                self.sink.set_status(article.id, StatusField::Starred, true).await?;
            }
            RuleAction::ApplyTags { tag_ids } if tag_ids.is_empty() => {
                return Ok(ActionOutcome::Skipped);
            }
            RuleAction::ApplyTags { tag_ids } => {
                self.sink
                    .apply_tags(article.id, tag_ids, &self.applied_by, rule.id)
                    .await?;
            }
            RuleAction::HighlightArticle { color } => {
                self.sink.set_highlight(article.id, color).await?;
            }
            RuleAction::SendNotification { template, priority } => {
                let template = if template.trim().is_empty() {
                    self.default_template.as_str()
                } else {
                    template.as_str()
                };

                self.sink
                    .create_notification(NotificationRequest {
                        article_id: article.id,
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        message: template::render(template, &rule.name, article),
                        priority: *priority,
                    })
                    .await?;
            }
        }

        Ok(ActionOutcome::Applied)
    }
}
