//! 规则集快照
//!
//! 评估始终基于一个不可变的已编译规则集。快照只在显式重载时整体替换，
//! 读取端通过 `ArcSwap` 原子获取，单个批次内规则集保持一致。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::models::Rule;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use feed_shared::observability::metrics::RULE_SNAPSHOT_RELOADS_TOTAL;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// 不可变的已编译规则集
///
/// 规则按 (priority, name) 升序排列，只包含启用且通过校验的规则。
#[derive(Debug)]
pub struct RuleSetSnapshot {
    version: u64,
    rules: Vec<CompiledRule>,
    loaded_at: DateTime<Utc>,
}

impl RuleSetSnapshot {
    /// 空快照（版本 0），用于首次重载之前
    pub fn empty() -> Self {
        Self {
            version: 0,
            rules: Vec::new(),
            loaded_at: Utc::now(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// 按 ID 查找规则
    pub fn get(&self, rule_id: i64) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id() == rule_id)
    }
}

/// 未能进入快照的规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRule {
    pub rule_id: i64,
    pub rule_name: String,
    pub reason: String,
}

/// 重载结果
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    /// 新快照版本号
    pub version: u64,
    /// 进入快照的规则数
    pub loaded: usize,
    /// 校验失败被排除的规则
    pub rejected: Vec<RejectedRule>,
}

/// 规则集缓存
pub struct RuleSetCache {
    current: ArcSwap<RuleSetSnapshot>,
    compiler: Mutex<RuleCompiler>,
    next_version: AtomicU64,
}

impl RuleSetCache {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleSetSnapshot::empty()),
            compiler: Mutex::new(RuleCompiler::new()),
            next_version: AtomicU64::new(1),
        }
    }

    /// 获取当前快照
    pub fn load(&self) -> Arc<RuleSetSnapshot> {
        self.current.load_full()
    }

    /// 编译规则并替换快照
    ///
    /// 停用的规则直接跳过；校验失败的规则不进入快照并出现在报告中。
    /// 编译、分配版本号与替换快照在同一把锁内完成，并发重载按版本号顺序生效。
    pub fn install(&self, rules: Vec<Rule>) -> ReloadReport {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut rejected = Vec::new();

        let mut compiler = self.compiler.lock();
        for rule in rules.into_iter().filter(|r| r.is_enabled) {
            let (rule_id, rule_name) = (rule.id, rule.name.clone());
            match compiler.compile(rule) {
                Ok(c) => {
                    for err in c.configuration_errors() {
                        warn!(rule_id, "规则包含配置错误，评估时将视为不匹配: {:?}", err);
                    }
                    compiled.push(c);
                }
                Err(e) => {
                    warn!(rule_id, rule_name = %rule_name, "规则校验失败，已排除: {}", e);
                    rejected.push(RejectedRule {
                        rule_id,
                        rule_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        compiled.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let loaded = compiled.len();

        self.current.store(Arc::new(RuleSetSnapshot {
            version,
            rules: compiled,
            loaded_at: Utc::now(),
        }));
        drop(compiler);

        metrics::counter!(RULE_SNAPSHOT_RELOADS_TOTAL).increment(1);

        info!(
            version,
            loaded,
            rejected = rejected.len(),
            "规则快照已更新"
        );

        ReloadReport {
            version,
            loaded,
            rejected,
        }
    }
}

impl Default for RuleSetCache {
    fn default() -> Self {
        Self::new()
    }
}
