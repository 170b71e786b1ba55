//! 规则引擎集成测试
//!
//! 覆盖从规则存储加载、匹配、动作分发到命中统计的完整流程。

use async_trait::async_trait;
use feed_shared::test_utils::{fixed_time, test_engine_config};
use parking_lot::Mutex;
use rule_engine::{
    ActionSink, Article, InMemoryRuleStore, LogicalOperator, NotificationPriority,
    NotificationRequest, Operator, Result, Rule, RuleAction, RuleCondition, RuleEngine, RuleError,
    RuleField, RuleStore, StatusField,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// 记录所有副作用的动作执行端
#[derive(Default)]
struct RecordingSink {
    /// (article_id, tag_id)，重复打标签保持幂等
    tags: Mutex<BTreeSet<(i64, i64)>>,
    statuses: Mutex<HashSet<(i64, StatusField)>>,
    highlights: Mutex<Vec<(i64, String)>>,
    notifications: Mutex<Vec<NotificationRequest>>,
    calls: AtomicUsize,
    fail_highlights: bool,
}

impl RecordingSink {
    fn failing_highlights() -> Self {
        Self {
            fail_highlights: true,
            ..Default::default()
        }
    }

    fn has_status(&self, article_id: i64, field: StatusField) -> bool {
        self.statuses.lock().contains(&(article_id, field))
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn apply_tags(
        &self,
        article_id: i64,
        tag_ids: &[i64],
        _applied_by: &str,
        _rule_id: i64,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut tags = self.tags.lock();
        for tag_id in tag_ids {
            tags.insert((article_id, *tag_id));
        }
        Ok(())
    }

    async fn set_status(&self, article_id: i64, field: StatusField, value: bool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock();
        if value {
            statuses.insert((article_id, field));
        } else {
            statuses.remove(&(article_id, field));
        }
        Ok(())
    }

    async fn set_highlight(&self, article_id: i64, color: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_highlights {
            return Err(RuleError::Action("highlight table is read-only".to_string()));
        }
        self.highlights.lock().push((article_id, color.to_string()));
        Ok(())
    }

    async fn create_notification(&self, request: NotificationRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.notifications.lock().push(request);
        Ok(())
    }
}

fn urgent_for_feed_10() -> Rule {
    Rule::simple(
        1,
        "urgent feed 10",
        RuleField::Title,
        Operator::Contains,
        "urgent",
        RuleAction::MarkAsStarred,
    )
    .for_feeds(&[10])
}

async fn engine_with(
    rules: Vec<Rule>,
    sink: Arc<RecordingSink>,
) -> (RuleEngine, InMemoryRuleStore) {
    let store = InMemoryRuleStore::new();
    for rule in rules {
        store.upsert(rule).unwrap();
    }

    let engine = RuleEngine::new(Arc::new(store.clone()), sink, test_engine_config());
    engine.reload_rules().await.unwrap();
    (engine, store)
}

#[tokio::test]
async fn test_feed_scoped_urgent_rule_end_to_end() {
    let sink = Arc::new(RecordingSink::default());
    let (engine, store) = engine_with(vec![urgent_for_feed_10()], sink.clone()).await;

    let hit = Article::new(1, 10, "URGENT: outage");
    let wrong_feed = Article::new(2, 11, "urgent");
    let calm = Article::new(3, 10, "calm");

    let outcome = engine.process_article(&hit).await;
    assert_eq!(outcome.records.len(), 1);
    assert!(outcome.is_clean());

    assert!(engine.process_article(&wrong_feed).await.records.is_empty());
    assert!(engine.process_article(&calm).await.records.is_empty());

    assert!(sink.has_status(1, StatusField::Starred));
    assert!(!sink.has_status(2, StatusField::Starred));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

    // 统计同时写入内存与存储
    assert_eq!(engine.statistics(1).unwrap().match_count, 1);
    assert_eq!(store.get(1).unwrap().match_count, 1);
}

#[tokio::test]
async fn test_matches_follow_priority_then_name() {
    let rules = vec![
        Rule::simple(1, "c-low", RuleField::AnyText, Operator::Contains, "rust", RuleAction::MarkAsRead)
            .with_priority(5),
        Rule::simple(2, "b-high", RuleField::AnyText, Operator::Contains, "rust", RuleAction::MarkAsRead)
            .with_priority(1),
        Rule::simple(3, "a-high", RuleField::AnyText, Operator::Contains, "rust", RuleAction::MarkAsRead)
            .with_priority(1),
    ];
    let (engine, _) = engine_with(rules, Arc::new(RecordingSink::default())).await;

    let outcome = engine
        .process_article(&Article::new(1, 1, "weekly").with_content("Rust 2024 edition"))
        .await;

    let names: Vec<&str> = outcome.records.iter().map(|r| r.rule_name.as_str()).collect();
    assert_eq!(names, vec!["a-high", "b-high", "c-low"]);

    let action_rules: Vec<i64> = outcome.actions.iter().map(|a| a.rule_id).collect();
    assert_eq!(action_rules, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_advanced_rule_with_notification_and_tags() {
    let security = Rule::advanced(
        10,
        "security",
        vec![
            RuleCondition::new(1, 1, RuleField::Categories, Operator::Equals, "security")
                .then(LogicalOperator::And),
            RuleCondition::new(1, 2, RuleField::Title, Operator::Regex, r"CVE-\d{4}-\d+"),
            RuleCondition::new(2, 1, RuleField::Author, Operator::Equals, "security team"),
        ],
        RuleAction::SendNotification {
            template: "[{RuleName}] {Title} ({Categories})".to_string(),
            priority: NotificationPriority::High,
        },
    );
    let tagging = Rule::simple(
        11,
        "tag security",
        RuleField::Categories,
        Operator::Equals,
        "security",
        RuleAction::ApplyTags { tag_ids: vec![4, 9] },
    );

    let sink = Arc::new(RecordingSink::default());
    let (engine, _) = engine_with(vec![security, tagging], sink.clone()).await;

    let article = Article::new(7, 3, "CVE-2024-3094 in xz")
        .with_categories(["Security", "Linux"])
        .with_published_at(fixed_time(2024, 3, 29, 16));

    let outcome = engine.process_article(&article).await;
    assert_eq!(outcome.records.len(), 2);

    let notifications = sink.notifications.lock();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].message, "[security] CVE-2024-3094 in xz (Security, Linux)");
    assert_eq!(notifications[0].priority, NotificationPriority::High);
    drop(notifications);

    // 重复处理不会产生重复标签
    engine.process_article(&article).await;
    let tags: Vec<(i64, i64)> = sink.tags.lock().iter().copied().collect();
    assert_eq!(tags, vec![(7, 4), (7, 9)]);
    assert_eq!(engine.statistics(11).unwrap().match_count, 2);
}

#[tokio::test]
async fn test_invalid_rules_excluded_and_reported() {
    let duplicate_order = Rule::advanced(
        2,
        "dup",
        vec![
            RuleCondition::new(1, 1, RuleField::Title, Operator::Contains, "a"),
            RuleCondition::new(1, 1, RuleField::Title, Operator::Contains, "b"),
        ],
        RuleAction::MarkAsRead,
    );
    let mut bad_scope = Rule::simple(3, "bad scope", RuleField::Title, Operator::Contains, "a", RuleAction::MarkAsRead);
    bad_scope.scope = rule_engine::RuleScope::SpecificFeeds;
    bad_scope.feed_ids = Some("all of them".to_string());

    let store = InMemoryRuleStore::new();
    store.upsert(urgent_for_feed_10()).unwrap();
    store.upsert(duplicate_order).unwrap();
    store.upsert(bad_scope).unwrap();

    let engine = RuleEngine::new(
        Arc::new(store),
        Arc::new(RecordingSink::default()),
        test_engine_config(),
    );
    let report = engine.reload_rules().await.unwrap();

    assert_eq!(report.loaded, 1);
    let rejected: BTreeSet<i64> = report.rejected.iter().map(|r| r.rule_id).collect();
    assert_eq!(rejected, BTreeSet::from([2, 3]));
}

#[tokio::test]
async fn test_broken_regex_does_not_stop_other_rules() {
    let broken = Rule::simple(1, "broken", RuleField::Title, Operator::Regex, "[unclosed", RuleAction::MarkAsRead);
    let ok = Rule::simple(2, "ok", RuleField::Title, Operator::Contains, "release", RuleAction::MarkAsRead)
        .with_priority(10);

    let sink = Arc::new(RecordingSink::default());
    let (engine, _) = engine_with(vec![broken, ok], sink.clone()).await;

    let outcome = engine.process_article(&Article::new(1, 1, "release notes")).await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].rule_id, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].rule_id, 1);
    assert!(sink.has_status(1, StatusField::Read));
}

#[tokio::test]
async fn test_action_failure_keeps_statistics() {
    let highlight = Rule::simple(
        1,
        "highlight",
        RuleField::Title,
        Operator::StartsWith,
        "breaking",
        RuleAction::HighlightArticle { color: "#ff0000".to_string() },
    );
    let (engine, store) = engine_with(vec![highlight], Arc::new(RecordingSink::failing_highlights())).await;

    let outcome = engine.process_article(&Article::new(1, 1, "Breaking: news")).await;

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].stage, rule_engine::FailureStage::Action);
    assert_eq!(engine.total_match_count(), 1);
    assert_eq!(store.get(1).unwrap().match_count, 1);
}

#[tokio::test]
async fn test_batch_processing_counts_every_match() {
    let rule = Rule::simple(1, "all", RuleField::Title, Operator::Contains, "post", RuleAction::MarkAsRead);
    let sink = Arc::new(RecordingSink::default());
    let (engine, store) = engine_with(vec![rule], sink.clone()).await;

    let articles: Vec<Article> = (0..50).map(|i| Article::new(i, 1, format!("post {}", i))).collect();
    let report = engine.process_batch(&articles, &CancellationToken::new()).await;

    assert_eq!(report.processed, 50);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.matches, 50);
    assert!(!report.cancelled);
    assert_eq!(engine.total_match_count(), 50);
    assert_eq!(store.get(1).unwrap().match_count, 50);

    let ids: Vec<i64> = report.outcomes.iter().map(|o| o.article_id).collect();
    assert_eq!(ids, (0..50).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cancelled_batch_starts_no_articles() {
    let rule = Rule::simple(1, "all", RuleField::Title, Operator::Contains, "post", RuleAction::MarkAsRead);
    let sink = Arc::new(RecordingSink::default());
    let (engine, _) = engine_with(vec![rule], sink.clone()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let articles: Vec<Article> = (0..10).map(|i| Article::new(i, 1, "post")).collect();
    let report = engine.process_batch(&articles, &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.processed, 0);
    assert_eq!(report.skipped, 10);
    assert_eq!(engine.total_match_count(), 0);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
}

/// 在第 N 次动作后触发取消的执行端
struct CancellingSink {
    inner: RecordingSink,
    cancel: CancellationToken,
    after: usize,
}

#[async_trait]
impl ActionSink for CancellingSink {
    async fn apply_tags(&self, article_id: i64, tag_ids: &[i64], applied_by: &str, rule_id: i64) -> Result<()> {
        self.inner.apply_tags(article_id, tag_ids, applied_by, rule_id).await
    }

    async fn set_status(&self, article_id: i64, field: StatusField, value: bool) -> Result<()> {
        self.inner.set_status(article_id, field, value).await?;
        if self.inner.calls.load(Ordering::SeqCst) >= self.after {
            self.cancel.cancel();
        }
        Ok(())
    }

    async fn set_highlight(&self, article_id: i64, color: &str) -> Result<()> {
        self.inner.set_highlight(article_id, color).await
    }

    async fn create_notification(&self, request: NotificationRequest) -> Result<()> {
        self.inner.create_notification(request).await
    }
}

#[tokio::test]
async fn test_cancellation_mid_batch_completes_started_articles() {
    let read = Rule::simple(1, "read", RuleField::Title, Operator::Contains, "post", RuleAction::MarkAsRead);
    let star = Rule::simple(2, "star", RuleField::Title, Operator::Contains, "post", RuleAction::MarkAsStarred);

    let store = InMemoryRuleStore::new();
    store.upsert(read).unwrap();
    store.upsert(star).unwrap();

    let cancel = CancellationToken::new();
    let sink = Arc::new(CancellingSink {
        inner: RecordingSink::default(),
        cancel: cancel.clone(),
        after: 3,
    });

    let mut config = test_engine_config();
    config.batch_concurrency = 1;
    let engine = RuleEngine::new(Arc::new(store.clone()), sink.clone(), config);
    engine.reload_rules().await.unwrap();

    let articles: Vec<Article> = (0..10).map(|i| Article::new(i, 1, "post")).collect();
    let report = engine.process_batch(&articles, &cancel).await;

    assert!(report.cancelled);
    assert!(report.processed >= 2 && report.processed < 10);
    assert_eq!(report.processed + report.skipped, 10);

    // 每篇已开始的文章两条规则都完整执行
    for outcome in &report.outcomes {
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.actions.len(), 2);
    }
    let expected = 2 * report.processed as i64;
    assert_eq!(engine.total_match_count(), expected);
    assert_eq!(
        store.get(1).unwrap().match_count + store.get(2).unwrap().match_count,
        expected
    );
}

#[tokio::test]
async fn test_reload_picks_up_store_changes() {
    let (engine, store) = engine_with(vec![urgent_for_feed_10()], Arc::new(RecordingSink::default())).await;
    let first = engine.snapshot().version();

    store.upsert(urgent_for_feed_10().with_enabled(false)).unwrap();
    assert_eq!(engine.evaluate_article(&Article::new(1, 10, "urgent")).records.len(), 1);

    let report = engine.reload_rules().await.unwrap();
    assert!(report.version > first);
    assert!(engine.evaluate_article(&Article::new(1, 10, "urgent")).records.is_empty());
}

#[tokio::test]
async fn test_top_rules_leaderboard_and_reset() {
    let counts = [42, 18, 31, 0, 7];
    let rules: Vec<Rule> = counts
        .iter()
        .enumerate()
        .map(|(i, count)| {
            Rule::simple(
                i as i64 + 1,
                format!("rule-{}", i),
                RuleField::Title,
                Operator::Contains,
                "x",
                RuleAction::MarkAsRead,
            )
            .with_statistics(*count, None)
        })
        .collect();
    let (engine, store) = engine_with(rules, Arc::new(RecordingSink::default())).await;

    let top: Vec<i64> = engine.top_rules(3).iter().map(|s| s.match_count).collect();
    assert_eq!(top, vec![42, 31, 18]);
    assert_eq!(engine.total_match_count(), 98);

    engine.reset_statistics(1).await.unwrap();
    assert_eq!(engine.total_match_count(), 56);
    assert_eq!(store.get(1).unwrap().match_count, 0);

    assert!(engine.reset_statistics(404).await.is_err());
}

#[tokio::test]
async fn test_store_delete_removes_rule_from_next_snapshot() {
    let (engine, store) = engine_with(vec![urgent_for_feed_10()], Arc::new(RecordingSink::default())).await;

    store.delete(1).unwrap();
    engine.reload_rules().await.unwrap();

    assert!(engine.snapshot().is_empty());
    assert!(engine.statistics(1).is_none());
    assert!(store.get_active_rules_ordered_by_priority().await.unwrap().is_empty());
}
