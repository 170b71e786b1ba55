//! 文章规则引擎
//!
//! 对订阅源文章评估用户定义的规则并执行命中动作，支持：
//! - 简单规则与分组条件（组内左折叠，组间 OR）
//! - 按订阅源/分类限定作用范围
//! - 启用时预编译，显式重载的不可变规则快照
//! - 幂等动作分发与原子命中统计
//! - 可取消的批量处理

pub mod compiler;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod matcher;
pub mod models;
pub mod operators;
pub mod scope;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod template;

pub use compiler::{CompiledRule, RuleCompiler};
pub use dispatcher::{
    ActionDispatcher, ActionOutcome, ActionResult, ActionSink, NotificationRequest, StatusField,
};
pub use engine::{ArticleOutcome, BatchReport, FailureStage, PartialFailure, RuleEngine};
pub use error::{Result, RuleError, ValidationIssue};
pub use evaluator::ConditionEvaluator;
pub use executor::ConditionGroupEvaluator;
pub use matcher::{MatchFailure, MatchOutcome, RuleMatcher};
pub use models::{
    Article, EvaluationResult, MatchRecord, NotificationPriority, Rule, RuleAction, RuleCondition,
    RuleField, RuleScope, RuleStatistics,
};
pub use operators::{LogicalOperator, Operator};
pub use scope::{CompiledScope, ScopeResolver, ScopeSet};
pub use snapshot::{RejectedRule, ReloadReport, RuleSetCache, RuleSetSnapshot};
pub use stats::MatchStatisticsTracker;
pub use store::{InMemoryRuleStore, RuleStore};
