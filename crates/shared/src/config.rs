//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::observability::ObservabilityConfig;

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 批量处理时同时在途的文章数
    pub batch_concurrency: usize,
    /// 是否记录条件级评估追踪（调试规则时使用）
    pub trace_evaluations: bool,
    /// 规则打标签时记录的来源标识
    pub applied_by: String,
    /// 规则未配置通知模板时使用的默认模板
    pub default_notification_template: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 4,
            trace_evaluations: false,
            applied_by: "rule".to_string(),
            default_notification_template: "{Title}".to_string(),
        }
    }
}

impl EngineConfig {
    /// 批量并发度，至少为 1
    pub fn effective_concurrency(&self) -> usize {
        self.batch_concurrency.max(1)
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（FEEDRULES_ 前缀，如 FEEDRULES_ENGINE__BATCH_CONCURRENCY -> engine.batch_concurrency）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        // .env 文件仅用于本地开发，缺失不是错误
        dotenvy::dotenv().ok();

        let env = std::env::var("FEEDRULES_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, &env, Path::new(&config_dir))
    }

    /// 从指定目录加载配置，不读取 FEEDRULES_ENV / CONFIG_DIR
    pub fn load_from(
        service_name: &str,
        environment: &str,
        config_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", environment)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", environment))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 嵌套字段使用双下划线分隔，避免与字段名中的下划线冲突
            .add_source(
                Environment::with_prefix("FEEDRULES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.observability.service_name = config.service_name.clone();

        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
