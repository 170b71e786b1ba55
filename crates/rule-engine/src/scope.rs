//! 规则作用范围解析
//!
//! 序列化的订阅源/分类 ID 列表先解析为整数集合再做成员判断，
//! 避免字符串子串匹配带来的误判（如 "1" 命中 "21"）。

use crate::error::{Result, RuleError};
use crate::models::{Rule, RuleScope};
use std::collections::HashSet;

/// 整数 ID 集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    ids: HashSet<i64>,
}

impl ScopeSet {
    /// 解析序列化的 ID 列表
    ///
    /// 支持的格式：
    /// - JSON 数组：`[1,2,3]`
    /// - 逐个加括号：`[1],[2],[3]`
    /// - 逗号/分号/空白分隔：`1, 2; 3`
    ///
    /// `None` 或空串表示没有成员。
    pub fn parse(serialized: Option<&str>) -> Result<Self> {
        let Some(raw) = serialized.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::default());
        };

        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_digit() || c.is_whitespace() || "[],;-".contains(*c)))
        {
            return Err(RuleError::ParseError(format!(
                "ID 列表包含非法字符 '{}': {}",
                bad, raw
            )));
        }

        let ids = raw
            .split(|c: char| c.is_whitespace() || "[],;".contains(c))
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<i64>().map_err(|e| {
                    RuleError::ParseError(format!("无效的 ID '{}': {}", token, e))
                })
            })
            .collect::<Result<HashSet<i64>>>()?;

        Ok(Self { ids })
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<i64> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// 预解析的作用范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledScope {
    AllFeeds,
    Feeds(ScopeSet),
    Categories(ScopeSet),
}

impl CompiledScope {
    /// 从规则解析作用范围，只解析当前 scope 实际使用的列表
    pub fn from_rule(rule: &Rule) -> Result<Self> {
        Ok(match rule.scope {
            RuleScope::AllFeeds => Self::AllFeeds,
            RuleScope::SpecificFeeds => Self::Feeds(ScopeSet::parse(rule.feed_ids.as_deref())?),
            RuleScope::SpecificCategories => {
                Self::Categories(ScopeSet::parse(rule.category_ids.as_deref())?)
            }
        })
    }
}

/// 作用范围判定
pub struct ScopeResolver;

impl ScopeResolver {
    /// 判断规则是否适用于给定的订阅源/分类
    ///
    /// 分类缺失时，按分类限定的规则不适用。
    pub fn applies(scope: &CompiledScope, feed_id: i64, category_id: Option<i64>) -> bool {
        match scope {
            CompiledScope::AllFeeds => true,
            CompiledScope::Feeds(feeds) => feeds.contains(feed_id),
            CompiledScope::Categories(categories) => {
                category_id.is_some_and(|id| categories.contains(id))
            }
        }
    }

    /// 直接基于未编译的规则判断（会即时解析 ID 列表）
    pub fn applies_to_rule(rule: &Rule, feed_id: i64, category_id: Option<i64>) -> Result<bool> {
        let scope = CompiledScope::from_rule(rule)?;
        Ok(Self::applies(&scope, feed_id, category_id))
    }
}
