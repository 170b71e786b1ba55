//! 规则匹配
//!
//! 对单篇文章按 (priority, name) 顺序遍历快照中的规则：
//! 先判断作用范围，再评估条件。规则之间互不影响，一篇文章可以命中多条规则。

use crate::compiler::CompiledRule;
use crate::executor::ConditionGroupEvaluator;
use crate::models::{Article, EvaluationResult, MatchRecord};
use crate::scope::ScopeResolver;
use crate::snapshot::RuleSetSnapshot;
use chrono::Utc;
use feed_shared::observability::metrics::{
    ARTICLE_EVALUATION_DURATION_SECONDS, RULE_EVALUATION_ERRORS_TOTAL, RULE_MATCHES_TOTAL,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// 评估失败的规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchFailure {
    pub rule_id: i64,
    pub rule_name: String,
    pub kind: &'static str,
    pub message: String,
}

/// 单篇文章的匹配结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchOutcome {
    /// 命中记录，按 (priority, name) 升序
    pub records: Vec<MatchRecord>,
    /// 评估出错而被跳过的规则
    pub failures: Vec<MatchFailure>,
}

/// 规则匹配器
///
/// 每个批次创建一个实例，持有该批次使用的快照。
/// 同一条规则的配置错误在一个实例内只以 warn 级别记录一次。
pub struct RuleMatcher {
    snapshot: Arc<RuleSetSnapshot>,
    evaluator: ConditionGroupEvaluator,
    reported: Mutex<HashSet<i64>>,
}

impl RuleMatcher {
    pub fn new(snapshot: Arc<RuleSetSnapshot>) -> Self {
        Self {
            snapshot,
            evaluator: ConditionGroupEvaluator::new(),
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// 启用评估追踪（`explain` 输出条件级细节）
    pub fn with_trace(mut self) -> Self {
        self.evaluator = self.evaluator.with_trace();
        self
    }

    pub fn snapshot(&self) -> &Arc<RuleSetSnapshot> {
        &self.snapshot
    }

    /// 返回文章命中的所有规则记录
    pub fn match_article(&self, article: &Article) -> Vec<MatchRecord> {
        self.evaluate(article).records
    }

    /// 评估文章，返回命中记录与失败规则
    pub fn evaluate(&self, article: &Article) -> MatchOutcome {
        let start = Instant::now();
        let matched_at = Utc::now();
        let mut outcome = MatchOutcome::default();

        for rule in self.applicable_rules(article) {
            match self.evaluator.evaluate(rule, article) {
                Ok(true) => {
                    metrics::counter!(RULE_MATCHES_TOTAL, "rule_id" => rule.id().to_string())
                        .increment(1);
                    outcome.records.push(MatchRecord {
                        rule_id: rule.id(),
                        rule_name: rule.name().to_string(),
                        article_id: article.id,
                        matched: true,
                        matched_at,
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    metrics::counter!(RULE_EVALUATION_ERRORS_TOTAL, "kind" => e.kind()).increment(1);
                    self.report_failure(rule, article.id, &e.to_string());
                    outcome.failures.push(MatchFailure {
                        rule_id: rule.id(),
                        rule_name: rule.name().to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        metrics::histogram!(ARTICLE_EVALUATION_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());

        debug!(
            article_id = article.id,
            matched = outcome.records.len(),
            failed = outcome.failures.len(),
            "文章评估完成"
        );

        outcome
    }

    /// 输出每条适用规则的评估细节（含未命中的规则）
    pub fn explain(&self, article: &Article) -> Vec<EvaluationResult> {
        self.applicable_rules(article)
            .map(|rule| match self.evaluator.execute(rule, article) {
                Ok(result) => result,
                Err(e) => {
                    let mut result = EvaluationResult::new(rule.id(), rule.name().to_string());
                    result.evaluation_trace.push(format!("error: {}", e));
                    result
                }
            })
            .collect()
    }

    fn applicable_rules<'a>(
        &'a self,
        article: &'a Article,
    ) -> impl Iterator<Item = &'a CompiledRule> + 'a {
        self.snapshot.rules().iter().filter(move |rule| {
            ScopeResolver::applies(&rule.scope, article.feed_id, article.category_id)
        })
    }

    fn report_failure(&self, rule: &CompiledRule, article_id: i64, message: &str) {
        let first = self.reported.lock().insert(rule.id());
        if first {
            warn!(rule_id = rule.id(), article_id, "规则评估失败，按不匹配处理: {}", message);
        } else {
            debug!(rule_id = rule.id(), article_id, "规则评估失败: {}", message);
        }
    }

    /// 本实例内已记录过配置错误的规则数
    pub fn reported_rule_count(&self) -> usize {
        self.reported.lock().len()
    }
}
