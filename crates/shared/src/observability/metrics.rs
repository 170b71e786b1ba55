//! 指标定义
//!
//! 规则引擎通过 metrics facade 上报指标，这里集中维护指标名称与描述。

/// 规则命中次数（标签：rule_id）
pub const RULE_MATCHES_TOTAL: &str = "rule_matches_total";
/// 规则评估出错次数（标签：kind）
pub const RULE_EVALUATION_ERRORS_TOTAL: &str = "rule_evaluation_errors_total";
/// 动作执行次数（标签：action, outcome）
pub const RULE_ACTIONS_TOTAL: &str = "rule_actions_total";
/// 单篇文章评估耗时
pub const ARTICLE_EVALUATION_DURATION_SECONDS: &str = "article_evaluation_duration_seconds";
/// 规则快照重载次数
pub const RULE_SNAPSHOT_RELOADS_TOTAL: &str = "rule_snapshot_reloads_total";

/// 注册规则引擎指标描述
///
/// 这些描述会出现在导出端的 HELP 注释中；未安装 recorder 时为空操作。
pub fn describe_engine_metrics() {
    metrics::describe_counter!(RULE_MATCHES_TOTAL, "Total number of rule matches");
    metrics::describe_counter!(
        RULE_EVALUATION_ERRORS_TOTAL,
        "Total number of rule evaluations that failed with a configuration error"
    );
    metrics::describe_counter!(RULE_ACTIONS_TOTAL, "Total number of dispatched rule actions");
    metrics::describe_histogram!(
        ARTICLE_EVALUATION_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent evaluating the active rule set against one article"
    );
    metrics::describe_counter!(RULE_SNAPSHOT_RELOADS_TOTAL, "Total number of rule snapshot reloads");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_recorder() {
        // 未安装 recorder 时调用不应 panic
        describe_engine_metrics();
    }
}
