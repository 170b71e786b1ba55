//! 条件评估器
//!
//! 实现各种操作符对文章字段的评估逻辑。

use crate::compiler::{CompiledCondition, Operand, fold_case};
use crate::error::{Result, RuleError};
use crate::models::{Article, RuleCondition, RuleField};
use crate::operators::Operator;
use std::borrow::Cow;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估编译后的条件
    ///
    /// 先按操作符得到原始结果，再按 negate 取反。
    /// 配置错误（无效正则、不可解析的比较值等）以错误返回，不做取反。
    pub fn evaluate(cond: &CompiledCondition, article: &Article) -> Result<bool> {
        let raw = Self::evaluate_raw(cond, article)?;
        Ok(raw != cond.negate)
    }

    /// 评估未编译的高级条件（即时编译，适合单次调用）
    pub fn evaluate_condition(cond: &RuleCondition, article: &Article) -> Result<bool> {
        Self::evaluate(&CompiledCondition::from_condition(cond), article)
    }

    fn evaluate_raw(cond: &CompiledCondition, article: &Article) -> Result<bool> {
        match &cond.operand {
            Operand::Invalid(err) => Err(RuleError::from(err)),
            Operand::Text(expected) => Ok(Self::field_texts(cond.field, article)
                .into_iter()
                .any(|text| Self::match_text(cond.operator, text, expected, cond.case_sensitive))),
            Operand::Pattern(regex) => Ok(Self::field_texts(cond.field, article)
                .into_iter()
                .any(|text| regex.is_match(text))),
            Operand::Number(expected) => Ok(Self::field_texts(cond.field, article)
                .into_iter()
                .filter_map(|text| text.trim().parse::<f64>().ok())
                .any(|actual| Self::compare(cond.operator, actual, *expected))),
            // 发布时间缺失视为不匹配
            Operand::Date(expected) => Ok(article
                .published_at
                .is_some_and(|actual| Self::compare(cond.operator, actual, *expected))),
        }
    }

    /// 取出字段对应的文本值
    ///
    /// 缺失的文本按空串处理；分类为空时同样按单个空串处理，
    /// 保证 "不包含" 类取反条件对无分类文章成立。
    fn field_texts(field: RuleField, article: &Article) -> Vec<&str> {
        fn text(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("")
        }

        match field {
            RuleField::Title => vec![text(&article.title)],
            RuleField::Content => vec![text(&article.content)],
            RuleField::Summary => vec![text(&article.summary)],
            RuleField::Author => vec![text(&article.author)],
            RuleField::Categories if article.categories.is_empty() => vec![""],
            RuleField::Categories => article.categories.iter().map(String::as_str).collect(),
            RuleField::AnyText => vec![
                text(&article.title),
                text(&article.summary),
                text(&article.content),
            ],
            RuleField::PublishedAt => Vec::new(),
        }
    }

    /// 字符串匹配
    ///
    /// `expected` 在编译期已按大小写规则处理，这里只需处理字段值。
    fn match_text(operator: Operator, text: &str, expected: &str, case_sensitive: bool) -> bool {
        let text: Cow<'_, str> = if case_sensitive {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(fold_case(text))
        };

        match operator {
            Operator::Contains => text.contains(expected),
            Operator::Equals => text == expected,
            Operator::StartsWith => text.starts_with(expected),
            Operator::EndsWith => text.ends_with(expected),
            Operator::Regex | Operator::GreaterThan | Operator::LessThan => false,
        }
    }

    fn compare<T: PartialOrd>(operator: Operator, actual: T, expected: T) -> bool {
        match operator {
            Operator::GreaterThan => actual > expected,
            Operator::LessThan => actual < expected,
            _ => false,
        }
    }
}
