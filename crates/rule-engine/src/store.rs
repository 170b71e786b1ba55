//! 规则存储
//!
//! `RuleStore` 是引擎访问持久化层的唯一接口；`InMemoryRuleStore`
//! 使用 DashMap 提供线程安全的参考实现，供测试、基准以及不带数据库的宿主使用。

use crate::error::{Result, RuleError};
use crate::models::Rule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// 获取所有启用的规则，按 (priority, name) 升序，条件按 (group_id, order) 排好
    async fn get_active_rules_ordered_by_priority(&self) -> Result<Vec<Rule>>;

    /// 命中次数加一并更新最近命中时间
    async fn increment_match_count(&self, rule_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// 清零命中统计
    async fn reset_statistics(&self, rule_id: i64) -> Result<()>;
}

/// 内存规则存储
#[derive(Clone, Default)]
pub struct InMemoryRuleStore {
    rules: Arc<DashMap<i64, Rule>>,
    /// 串行化写入，保证名称唯一性检查与插入原子
    write_lock: Arc<Mutex<()>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 新增或更新规则
    ///
    /// 规则名称区分大小写且全局唯一。
    #[instrument(skip(self, rule), fields(rule_id = rule.id, rule_name = %rule.name))]
    pub fn upsert(&self, mut rule: Rule) -> Result<()> {
        let _guard = self.write_lock.lock();

        let duplicate = self
            .rules
            .iter()
            .any(|entry| *entry.key() != rule.id && entry.value().name == rule.name);
        if duplicate {
            warn!("规则名称重复: {}", rule.name);
            return Err(RuleError::DuplicateRuleName(rule.name));
        }

        for cond in &mut rule.conditions {
            cond.rule_id = rule.id;
        }
        rule.updated_at = Utc::now();

        let rule_id = rule.id;
        self.rules.insert(rule_id, rule);

        info!("规则已保存: {}", rule_id);
        Ok(())
    }

    /// 从 JSON 字符串加载规则
    pub fn load_from_json(&self, json: &str) -> Result<i64> {
        let rule: Rule = serde_json::from_str(json)?;
        let rule_id = rule.id;
        self.upsert(rule)?;
        Ok(rule_id)
    }

    /// 删除规则，条件随规则一起移除
    #[instrument(skip(self))]
    pub fn delete(&self, rule_id: i64) -> Result<Rule> {
        let _guard = self.write_lock.lock();

        match self.rules.remove(&rule_id) {
            Some((_, rule)) => {
                info!(conditions = rule.conditions.len(), "规则已删除: {}", rule_id);
                Ok(rule)
            }
            None => {
                warn!("删除不存在的规则: {}", rule_id);
                Err(RuleError::RuleNotFound(rule_id))
            }
        }
    }

    /// 获取规则
    pub fn get(&self, rule_id: i64) -> Option<Rule> {
        self.rules.get(&rule_id).map(|r| r.clone())
    }

    /// 获取所有规则（含停用规则），按 (priority, name) 排序
    pub fn list_all(&self) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|r| r.value().clone()).collect();
        sort_rules(&mut rules);
        rules
    }

    /// 清空所有规则
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        let count = self.rules.len();
        self.rules.clear();
        info!("已清空 {} 条规则", count);
    }
}

/// 按 (priority, name) 升序排序，条件按 (group_id, order) 排序
pub(crate) fn sort_rules(rules: &mut [Rule]) {
    rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    for rule in rules.iter_mut() {
        rule.conditions.sort_by_key(|c| (c.group_id, c.order));
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn get_active_rules_ordered_by_priority(&self) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.is_enabled)
            .map(|r| r.value().clone())
            .collect();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn increment_match_count(&self, rule_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut rule = self
            .rules
            .get_mut(&rule_id)
            .ok_or(RuleError::RuleNotFound(rule_id))?;

        rule.match_count += 1;
        // 并发写入时保留最新时间
        if rule.last_match_date.is_none_or(|last| at > last) {
            rule.last_match_date = Some(at);
        }
        Ok(())
    }

    async fn reset_statistics(&self, rule_id: i64) -> Result<()> {
        let mut rule = self
            .rules
            .get_mut(&rule_id)
            .ok_or(RuleError::RuleNotFound(rule_id))?;

        rule.match_count = 0;
        rule.last_match_date = None;
        Ok(())
    }
}
