//! 规则引擎门面
//!
//! 串联规则存储、快照、匹配、动作分发与命中统计：
//!
//! ```text
//! RuleStore ──reload──▶ RuleSetCache ──load──▶ RuleMatcher ──records──▶ ActionDispatcher
//!                                                            └─────────▶ MatchStatisticsTracker
//! ```

use crate::compiler::RuleCompiler;
use crate::dispatcher::{ActionDispatcher, ActionOutcome, ActionResult, ActionSink};
use crate::error::Result;
use crate::executor::ConditionGroupEvaluator;
use crate::matcher::{MatchOutcome, RuleMatcher};
use crate::models::{Article, EvaluationResult, MatchRecord, Rule, RuleStatistics};
use crate::scope::ScopeResolver;
use crate::snapshot::{ReloadReport, RuleSetCache, RuleSetSnapshot};
use crate::stats::MatchStatisticsTracker;
use crate::store::RuleStore;
use feed_shared::EngineConfig;
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// 失败发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Evaluation,
    Statistics,
    Action,
}

/// 单条规则在处理文章时的局部失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFailure {
    pub rule_id: i64,
    pub stage: FailureStage,
    pub message: String,
}

/// 单篇文章的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct ArticleOutcome {
    pub article_id: i64,
    pub records: Vec<MatchRecord>,
    pub actions: Vec<ActionResult>,
    pub failures: Vec<PartialFailure>,
}

impl ArticleOutcome {
    fn new(article_id: i64) -> Self {
        Self {
            article_id,
            records: Vec::new(),
            actions: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 批量处理报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// 已处理的文章数
    pub processed: usize,
    /// 因取消而未开始的文章数
    pub skipped: usize,
    /// 命中记录总数
    pub matches: usize,
    /// 局部失败总数
    pub failures: usize,
    pub cancelled: bool,
    /// 各文章结果，保持输入顺序
    pub outcomes: Vec<ArticleOutcome>,
}

/// 规则引擎
pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    dispatcher: ActionDispatcher,
    cache: RuleSetCache,
    tracker: MatchStatisticsTracker,
    config: EngineConfig,
}

impl RuleEngine {
    /// 创建引擎；调用 `reload_rules` 之前快照为空
    pub fn new(store: Arc<dyn RuleStore>, sink: Arc<dyn ActionSink>, config: EngineConfig) -> Self {
        Self {
            dispatcher: ActionDispatcher::new(sink, &config),
            store,
            cache: RuleSetCache::new(),
            tracker: MatchStatisticsTracker::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 当前规则快照
    pub fn snapshot(&self) -> Arc<RuleSetSnapshot> {
        self.cache.load()
    }

    /// 从存储重新加载规则并原子替换快照
    #[instrument(skip(self))]
    pub async fn reload_rules(&self) -> Result<ReloadReport> {
        let start = Instant::now();
        let rules = self.store.get_active_rules_ordered_by_priority().await?;

        // 新快照生效前先登记新规则，生效后再收敛到快照中实际加载的规则
        self.tracker.sync_rules(&rules);
        let report = self.cache.install(rules);
        let snapshot = self.cache.load();
        self.tracker
            .sync_rules(snapshot.rules().iter().map(|compiled| &*compiled.rule));

        info!(
            version = report.version,
            loaded = report.loaded,
            rejected = report.rejected.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "规则重载完成"
        );

        Ok(report)
    }

    /// 启用前校验规则
    pub fn validate_rule(&self, rule: &Rule) -> Result<()> {
        RuleCompiler::validate(rule)
    }

    /// 试运行：只匹配，不执行动作，不更新统计
    pub fn evaluate_article(&self, article: &Article) -> MatchOutcome {
        self.matcher().evaluate(article)
    }

    /// 输出当前快照中每条适用规则的评估追踪
    pub fn explain_article(&self, article: &Article) -> Vec<EvaluationResult> {
        RuleMatcher::new(self.cache.load()).with_trace().explain(article)
    }

    /// 处理单篇文章：匹配、记录统计、分发动作
    #[instrument(skip_all, fields(article_id = article.id, feed_id = article.feed_id))]
    pub async fn process_article(&self, article: &Article) -> ArticleOutcome {
        let matcher = self.matcher();
        self.process_with(&matcher, article).await
    }

    /// 批量处理文章
    ///
    /// 最多 `batch_concurrency` 篇文章同时在途。每篇文章开始前检查取消信号，
    /// 已开始的文章总是完整执行统计与动作。
    #[instrument(skip_all, fields(articles = articles.len()))]
    pub async fn process_batch(
        &self,
        articles: &[Article],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let start = Instant::now();
        let matcher = self.matcher();
        let matcher = &matcher;

        let results: Vec<Option<ArticleOutcome>> = stream::iter(articles)
            .map(move |article| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(self.process_with(matcher, article).await)
            })
            .buffered(self.config.effective_concurrency())
            .collect()
            .await;

        let mut report = BatchReport {
            cancelled: cancel.is_cancelled(),
            ..Default::default()
        };
        for result in results {
            match result {
                Some(outcome) => {
                    report.processed += 1;
                    report.matches += outcome.records.len();
                    report.failures += outcome.failures.len();
                    report.outcomes.push(outcome);
                }
                None => report.skipped += 1,
            }
        }

        info!(
            processed = report.processed,
            skipped = report.skipped,
            matches = report.matches,
            failures = report.failures,
            snapshot_version = matcher.snapshot().version(),
            duration_ms = start.elapsed().as_millis() as u64,
            "批量处理完成"
        );

        report
    }

    /// 预览未保存的规则对样例文章的评估结果（始终带追踪）
    pub fn preview_rule(&self, rule: &Rule, articles: &[Article]) -> Result<Vec<EvaluationResult>> {
        let compiled = RuleCompiler::new().compile(rule.clone())?;
        let evaluator = ConditionGroupEvaluator::new().with_trace();

        Ok(articles
            .iter()
            .map(|article| {
                if !ScopeResolver::applies(&compiled.scope, article.feed_id, article.category_id) {
                    let mut result = EvaluationResult::new(compiled.id(), compiled.name().to_string());
                    result
                        .evaluation_trace
                        .push(format!("scope: 不适用于订阅源 {}", article.feed_id));
                    return result;
                }

                evaluator.execute(&compiled, article).unwrap_or_else(|e| {
                    let mut result = EvaluationResult::new(compiled.id(), compiled.name().to_string());
                    result.evaluation_trace.push(format!("error: {}", e));
                    result
                })
            })
            .collect())
    }

    /// 当前规则集中命中次数最多的规则
    ///
    /// 统计范围与快照一致：停用及校验失败的规则不参与排行。
    pub fn top_rules(&self, limit: usize) -> Vec<RuleStatistics> {
        self.tracker.top_rules(limit)
    }

    /// 当前规则集的命中总数
    pub fn total_match_count(&self) -> i64 {
        self.tracker.total_match_count()
    }

    pub fn statistics(&self, rule_id: i64) -> Option<RuleStatistics> {
        self.tracker.get(rule_id)
    }

    /// 清零规则统计（内存与存储）
    #[instrument(skip(self))]
    pub async fn reset_statistics(&self, rule_id: i64) -> Result<()> {
        self.store.reset_statistics(rule_id).await?;
        self.tracker.reset_statistics(rule_id);
        info!("规则统计已清零");
        Ok(())
    }

    fn matcher(&self) -> RuleMatcher {
        let matcher = RuleMatcher::new(self.cache.load());
        if self.config.trace_evaluations {
            matcher.with_trace()
        } else {
            matcher
        }
    }

    async fn process_with(&self, matcher: &RuleMatcher, article: &Article) -> ArticleOutcome {
        let outcome = matcher.evaluate(article);
        let mut result = ArticleOutcome::new(article.id);

        result.failures.extend(outcome.failures.into_iter().map(|f| PartialFailure {
            rule_id: f.rule_id,
            stage: FailureStage::Evaluation,
            message: f.message,
        }));

        for record in &outcome.records {
            let Some(compiled) = matcher.snapshot().get(record.rule_id) else {
                continue;
            };

            self.tracker.record_match(record.rule_id, record.matched_at);
            if let Err(e) = self
                .store
                .increment_match_count(record.rule_id, record.matched_at)
                .await
            {
                warn!(rule_id = record.rule_id, article_id = article.id, "命中统计持久化失败: {}", e);
                result.failures.push(PartialFailure {
                    rule_id: record.rule_id,
                    stage: FailureStage::Statistics,
                    message: e.to_string(),
                });
            }

            let action = self.dispatcher.dispatch(&compiled.rule, article).await;
            if let ActionOutcome::Failed(message) = &action.outcome {
                result.failures.push(PartialFailure {
                    rule_id: record.rule_id,
                    stage: FailureStage::Action,
                    message: message.clone(),
                });
            }
            result.actions.push(action);
        }

        result.records = outcome.records;
        result
    }
}
