//! 测试工具模块
//!
//! 提供集成测试和基准测试共用的配置、ID 与时间辅助函数。

use chrono::{DateTime, TimeZone, Utc};

use crate::config::EngineConfig;

/// 创建测试用引擎配置
///
/// 开启评估追踪，便于断言失败时查看条件级细节
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        batch_concurrency: 2,
        trace_evaluations: true,
        ..Default::default()
    }
}

/// 生成唯一的测试 ID
///
/// 使用原子计数器确保并行测试时的唯一性
pub fn test_id() -> i64 {
    use std::sync::atomic::{AtomicI64, Ordering};
    static COUNTER: AtomicI64 = AtomicI64::new(1);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// 固定时间点，避免测试依赖当前时钟
pub fn fixed_time(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture time {year}-{month}-{day} {hour}:00"))
}
