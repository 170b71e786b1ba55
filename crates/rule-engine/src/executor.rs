//! 条件组评估
//!
//! 组内条件按 order 从左到右折叠，由前一个条件的 combine_with_next 连接；
//! 组与组之间为 OR。折叠结果不会再变化时短路跳过剩余条件。

use crate::compiler::{CompiledBody, CompiledCondition, CompiledGroup, CompiledRule};
use crate::error::Result;
use crate::evaluator::ConditionEvaluator;
use crate::models::{Article, EvaluationResult};
use crate::operators::LogicalOperator;

/// 条件组评估器
pub struct ConditionGroupEvaluator {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl ConditionGroupEvaluator {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// 判断文章是否满足规则条件（不含作用范围判断）
    pub fn evaluate(&self, rule: &CompiledRule, article: &Article) -> Result<bool> {
        let mut trace = Vec::new();
        self.evaluate_body(&rule.body, article, &mut trace)
    }

    /// 执行规则评估并返回带追踪信息的结果
    pub fn execute(&self, rule: &CompiledRule, article: &Article) -> Result<EvaluationResult> {
        let mut result = EvaluationResult::new(rule.id(), rule.name().to_string());
        result.matched = self.evaluate_body(&rule.body, article, &mut result.evaluation_trace)?;
        Ok(result)
    }

    fn evaluate_body(
        &self,
        body: &CompiledBody,
        article: &Article,
        trace: &mut Vec<String>,
    ) -> Result<bool> {
        match body {
            CompiledBody::Simple(cond) => self.evaluate_condition(cond, article, trace, "simple"),
            CompiledBody::Advanced(groups) => {
                if groups.is_empty() && self.trace_enabled {
                    trace.push("advanced: 无条件，规则不匹配".to_string());
                }

                for group in groups {
                    if self.evaluate_group(group, article, trace)? {
                        if self.trace_enabled {
                            trace.push(format!("group[{}]: 匹配，组间 OR 短路", group.group_id));
                        }
                        return Ok(true);
                    }
                }

                Ok(false)
            }
        }
    }

    /// 组内左折叠
    fn evaluate_group(
        &self,
        group: &CompiledGroup,
        article: &Article,
        trace: &mut Vec<String>,
    ) -> Result<bool> {
        let Some((first, rest)) = group.conditions.split_first() else {
            return Ok(false);
        };

        let path = format!("group[{}]", group.group_id);
        let mut acc = self.evaluate_condition(first, article, trace, &path)?;
        let mut link = first.combine_with_next;

        for (i, cond) in rest.iter().enumerate() {
            let settled = matches!(
                (link, acc),
                (LogicalOperator::Or, true) | (LogicalOperator::And, false)
            );

            if settled {
                if self.trace_enabled {
                    trace.push(format!("{}: {} 短路，跳过条件 {}", path, link, i + 1));
                }
            } else {
                let value = self.evaluate_condition(cond, article, trace, &path)?;
                acc = link.combine(acc, value);
            }

            link = cond.combine_with_next;
        }

        if self.trace_enabled {
            trace.push(format!(
                "{}: {}",
                path,
                if acc { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        Ok(acc)
    }

    fn evaluate_condition(
        &self,
        cond: &CompiledCondition,
        article: &Article,
        trace: &mut Vec<String>,
        path: &str,
    ) -> Result<bool> {
        let matched = ConditionEvaluator::evaluate(cond, article)?;

        if self.trace_enabled {
            trace.push(format!(
                "{}: {}{} {} {:?} => {}",
                path,
                if cond.negate { "NOT " } else { "" },
                cond.field,
                cond.operator,
                cond.value,
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        Ok(matched)
    }
}

impl Default for ConditionGroupEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
