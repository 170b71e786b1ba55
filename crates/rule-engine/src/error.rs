//! 规则引擎错误类型

use thiserror::Error;

/// 规则校验问题
///
/// 在规则启用/重载时检测，出现任一问题的规则保持停用状态。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("规则名称不能为空")]
    EmptyName,

    #[error("条件组 {group_id} 中存在重复的顺序号 {order}")]
    DuplicateOrder { group_id: i32, order: i32 },

    #[error("{field} 列表无法解析: {reason}")]
    MalformedScope { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("无效的正则表达式 '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("类型不匹配: 期望 {expected}, 实际 '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    #[error("无效的操作符: {operator} 不支持字段 {field}")]
    UnsupportedOperator { operator: String, field: String },

    #[error("规则 {rule_id} 校验失败: {}", format_issues(.issues))]
    Validation {
        rule_id: i64,
        issues: Vec<ValidationIssue>,
    },

    #[error("规则未找到: {0}")]
    RuleNotFound(i64),

    #[error("规则名称已存在: {0}")]
    DuplicateRuleName(String),

    #[error("规则存储错误: {0}")]
    Store(String),

    #[error("动作执行失败: {0}")]
    Action(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RuleError {
    /// 是否为规则配置错误（评估期发现，规则视为不匹配）
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRegex { .. } | Self::TypeMismatch { .. } | Self::UnsupportedOperator { .. }
        )
    }

    /// 获取错误分类（用于指标标签）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParseError(_) => "parse",
            Self::InvalidRegex { .. } => "invalid_regex",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::UnsupportedOperator { .. } => "unsupported_operator",
            Self::Validation { .. } => "validation",
            Self::RuleNotFound(_) => "rule_not_found",
            Self::DuplicateRuleName(_) => "duplicate_name",
            Self::Store(_) => "store",
            Self::Action(_) => "action",
            Self::JsonError(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
