//! 规则命中统计
//!
//! 计数使用原子操作，并发批次中同一规则的多次命中不会丢失更新。

use crate::models::{Rule, RuleStatistics};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// 无命中时间的哨兵值
const NO_MATCH: i64 = i64::MIN;

struct StatEntry {
    name: String,
    match_count: AtomicI64,
    /// 最近命中时间（微秒时间戳）
    last_match_micros: AtomicI64,
}

impl StatEntry {
    fn new(name: String, match_count: i64, last_match_date: Option<DateTime<Utc>>) -> Self {
        Self {
            name,
            match_count: AtomicI64::new(match_count),
            last_match_micros: AtomicI64::new(
                last_match_date.map_or(NO_MATCH, |d| d.timestamp_micros()),
            ),
        }
    }

    fn snapshot(&self, rule_id: i64) -> RuleStatistics {
        let micros = self.last_match_micros.load(Ordering::Acquire);
        RuleStatistics {
            rule_id,
            name: self.name.clone(),
            match_count: self.match_count.load(Ordering::Acquire),
            last_match_date: if micros == NO_MATCH {
                None
            } else {
                DateTime::from_timestamp_micros(micros)
            },
        }
    }
}

/// 规则命中统计器
///
/// 只跟踪当前生效规则集中的规则（已启用且通过校验），
/// 停用或被拒绝的规则不参与排行与总数。
#[derive(Default)]
pub struct MatchStatisticsTracker {
    entries: DashMap<i64, StatEntry>,
}

impl MatchStatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 与规则集同步
    ///
    /// 新规则以存储中的统计值初始化；已跟踪的规则保留内存中的计数，只更新名称；
    /// 不在规则集中的条目被移除。
    pub fn sync_rules<'a>(&self, rules: impl IntoIterator<Item = &'a Rule>) {
        let mut live = HashSet::new();

        for rule in rules {
            live.insert(rule.id);
            match self.entries.get_mut(&rule.id) {
                Some(mut entry) => {
                    if entry.name != rule.name {
                        entry.name = rule.name.clone();
                    }
                }
                None => {
                    self.entries.insert(
                        rule.id,
                        StatEntry::new(rule.name.clone(), rule.match_count, rule.last_match_date),
                    );
                }
            }
        }

        self.entries.retain(|id, _| live.contains(id));
    }

    /// 记录一次命中，规则未被跟踪时忽略并返回 false
    pub fn record_match(&self, rule_id: i64, when: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get(&rule_id) else {
            debug!(rule_id, "规则不在当前规则集中，忽略命中统计");
            return false;
        };

        entry.match_count.fetch_add(1, Ordering::AcqRel);
        entry
            .last_match_micros
            .fetch_max(when.timestamp_micros(), Ordering::AcqRel);
        true
    }

    /// 当前规则集中命中次数最多的规则，次数相同按名称升序
    pub fn top_rules(&self, limit: usize) -> Vec<RuleStatistics> {
        let mut stats: Vec<RuleStatistics> = self
            .entries
            .iter()
            .map(|e| e.value().snapshot(*e.key()))
            .collect();

        stats.sort_by(|a, b| {
            b.match_count
                .cmp(&a.match_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        stats.truncate(limit);
        stats
    }

    /// 当前规则集中所有规则的命中总数
    pub fn total_match_count(&self) -> i64 {
        self.entries
            .iter()
            .map(|e| e.match_count.load(Ordering::Acquire))
            .sum()
    }

    /// 清零规则统计，规则未被跟踪时返回 false
    pub fn reset_statistics(&self, rule_id: i64) -> bool {
        match self.entries.get(&rule_id) {
            Some(entry) => {
                entry.match_count.store(0, Ordering::Release);
                entry.last_match_micros.store(NO_MATCH, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, rule_id: i64) -> Option<RuleStatistics> {
        self.entries.get(&rule_id).map(|e| e.snapshot(rule_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
