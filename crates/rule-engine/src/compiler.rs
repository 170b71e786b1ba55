//! 规则编译器
//!
//! 在规则启用/重载时执行一次：校验数据完整性，解析作用范围列表，
//! 预编译正则表达式和比较操作数，生成评估期直接使用的执行结构。

use crate::error::{Result, RuleError, ValidationIssue};
use crate::models::{Rule, RuleAction, RuleCondition, RuleField};
use crate::operators::{LogicalOperator, Operator};
use crate::scope::CompiledScope;
use chrono::{DateTime, NaiveDate, Utc};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// 逐字符小写折叠
///
/// 不依赖上下文（如希腊字母词尾 sigma），保证操作数与字段值折叠结果一致。
pub(crate) fn fold_case(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

/// 条件配置错误
///
/// 编译期发现但不阻止规则启用，评估时以错误返回，规则按不匹配处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    InvalidRegex { pattern: String, reason: String },
    TypeMismatch { expected: String, actual: String },
    Unsupported { operator: Operator, field: RuleField },
}

impl From<&ConfigurationError> for RuleError {
    fn from(err: &ConfigurationError) -> Self {
        match err {
            ConfigurationError::InvalidRegex { pattern, reason } => RuleError::InvalidRegex {
                pattern: pattern.clone(),
                reason: reason.clone(),
            },
            ConfigurationError::TypeMismatch { expected, actual } => RuleError::TypeMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            ConfigurationError::Unsupported { operator, field } => {
                RuleError::UnsupportedOperator {
                    operator: operator.to_string(),
                    field: field.to_string(),
                }
            }
        }
    }
}

/// 预处理后的条件操作数
#[derive(Debug, Clone)]
pub enum Operand {
    /// 字符串操作数；大小写不敏感时已转为小写
    Text(String),
    Pattern(Regex),
    Number(f64),
    Date(DateTime<Utc>),
    Invalid(ConfigurationError),
}

/// 编译后的条件
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub field: RuleField,
    pub operator: Operator,
    /// 原始值，仅用于追踪输出
    pub value: String,
    pub negate: bool,
    pub case_sensitive: bool,
    pub operand: Operand,
    pub combine_with_next: LogicalOperator,
}

impl CompiledCondition {
    /// 编译单个条件
    pub fn compile(
        field: RuleField,
        operator: Operator,
        value: &str,
        negate: bool,
        case_sensitive: bool,
    ) -> Self {
        Self {
            field,
            operator,
            value: value.to_string(),
            negate,
            case_sensitive,
            operand: Self::compile_operand(field, operator, value, case_sensitive),
            combine_with_next: LogicalOperator::And,
        }
    }

    /// 从高级条件编译
    pub fn from_condition(cond: &RuleCondition) -> Self {
        Self {
            combine_with_next: cond.combine_with_next,
            ..Self::compile(
                cond.field,
                cond.operator,
                &cond.value,
                cond.negate,
                cond.is_case_sensitive,
            )
        }
    }

    fn compile_operand(
        field: RuleField,
        operator: Operator,
        value: &str,
        case_sensitive: bool,
    ) -> Operand {
        if operator.is_comparison() {
            return Self::compile_comparison_operand(field, value);
        }

        // 发布时间只支持比较类操作符
        if field == RuleField::PublishedAt {
            return Operand::Invalid(ConfigurationError::Unsupported { operator, field });
        }

        match operator {
            Operator::Regex => match RegexBuilder::new(value)
                .case_insensitive(!case_sensitive)
                .build()
            {
                Ok(regex) => Operand::Pattern(regex),
                Err(e) => Operand::Invalid(ConfigurationError::InvalidRegex {
                    pattern: value.to_string(),
                    reason: e.to_string(),
                }),
            },
            _ if case_sensitive => Operand::Text(value.to_string()),
            _ => Operand::Text(fold_case(value)),
        }
    }

    fn compile_comparison_operand(field: RuleField, value: &str) -> Operand {
        if field == RuleField::PublishedAt {
            return match parse_datetime(value) {
                Some(dt) => Operand::Date(dt),
                None => Operand::Invalid(ConfigurationError::TypeMismatch {
                    expected: "datetime".to_string(),
                    actual: value.to_string(),
                }),
            };
        }

        match value.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Operand::Number(n),
            _ => Operand::Invalid(ConfigurationError::TypeMismatch {
                expected: "number".to_string(),
                actual: value.to_string(),
            }),
        }
    }
}

/// 解析日期时间：RFC 3339 或纯日期（按 UTC 零点）
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// 编译后的条件组，条件已按 order 排序
#[derive(Debug, Clone)]
pub struct CompiledGroup {
    pub group_id: i32,
    pub conditions: Vec<CompiledCondition>,
}

/// 规则主体
#[derive(Debug, Clone)]
pub enum CompiledBody {
    /// 简单规则：单一条件快速路径
    Simple(CompiledCondition),
    /// 高级规则：按 group_id 排序的条件组，组间为 OR
    Advanced(Vec<CompiledGroup>),
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Arc<Rule>,
    pub scope: CompiledScope,
    pub body: CompiledBody,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRule {
    pub fn id(&self) -> i64 {
        self.rule.id
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn priority(&self) -> i32 {
        self.rule.priority
    }

    pub fn action(&self) -> &RuleAction {
        &self.rule.action
    }

    /// 规则中存在的配置错误（不影响启用，但评估时必然失败）
    pub fn configuration_errors(&self) -> Vec<&ConfigurationError> {
        let conditions: Vec<&CompiledCondition> = match &self.body {
            CompiledBody::Simple(cond) => vec![cond],
            CompiledBody::Advanced(groups) => {
                groups.iter().flat_map(|g| g.conditions.iter()).collect()
            }
        };

        conditions
            .into_iter()
            .filter_map(|c| match &c.operand {
                Operand::Invalid(err) => Some(err),
                _ => None,
            })
            .collect()
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRule> {
        let rule: Rule = serde_json::from_str(json)?;
        self.compile(rule)
    }

    /// 编译规则
    pub fn compile(&mut self, rule: Rule) -> Result<CompiledRule> {
        Self::validate(&rule)?;

        let scope = CompiledScope::from_rule(&rule)?;
        let body = if rule.uses_advanced_conditions {
            CompiledBody::Advanced(Self::compile_groups(&rule.conditions))
        } else {
            CompiledBody::Simple(CompiledCondition::compile(
                rule.target,
                rule.operator,
                &rule.value,
                rule.negate,
                rule.is_case_sensitive,
            ))
        };

        self.compile_version += 1;

        Ok(CompiledRule {
            rule: Arc::new(rule),
            scope,
            body,
            compile_version: self.compile_version,
        })
    }

    /// 校验规则的数据完整性
    ///
    /// 一次返回全部问题，便于规则编辑界面集中提示。
    pub fn validate(rule: &Rule) -> Result<()> {
        let mut issues = Vec::new();

        if rule.name.trim().is_empty() {
            issues.push(ValidationIssue::EmptyName);
        }

        if let Err(e) = CompiledScope::from_rule(rule) {
            let field = match rule.scope {
                crate::models::RuleScope::SpecificCategories => "category_ids",
                _ => "feed_ids",
            };
            issues.push(ValidationIssue::MalformedScope {
                field,
                reason: e.to_string(),
            });
        }

        if rule.uses_advanced_conditions {
            let mut seen = HashSet::new();
            for cond in &rule.conditions {
                if !seen.insert((cond.group_id, cond.order)) {
                    let issue = ValidationIssue::DuplicateOrder {
                        group_id: cond.group_id,
                        order: cond.order,
                    };
                    if !issues.contains(&issue) {
                        issues.push(issue);
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(RuleError::Validation {
                rule_id: rule.id,
                issues,
            })
        }
    }

    /// 按 group_id 分组，组内按 order 排序
    fn compile_groups(conditions: &[RuleCondition]) -> Vec<CompiledGroup> {
        let mut grouped: BTreeMap<i32, Vec<&RuleCondition>> = BTreeMap::new();
        for cond in conditions {
            grouped.entry(cond.group_id).or_default().push(cond);
        }

        grouped
            .into_iter()
            .map(|(group_id, mut conds)| {
                conds.sort_by_key(|c| c.order);
                CompiledGroup {
                    group_id,
                    conditions: conds.into_iter().map(CompiledCondition::from_condition).collect(),
                }
            })
            .collect()
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}
