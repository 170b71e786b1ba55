//! 共享库
//!
//! 包含规则引擎及宿主应用共用的配置、可观测性与测试辅助代码。

pub mod config;
pub mod observability;
pub mod test_utils;

pub use config::{AppConfig, EngineConfig};
pub use observability::ObservabilityConfig;
