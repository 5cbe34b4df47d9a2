//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// 规则触发策略
///
/// 决定同一个事实上可以有多少条规则被触发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiringPolicy {
    /// 按优先级顺序触发所有匹配的规则
    #[default]
    AllMatches,
    /// 每个事实只触发第一条匹配的规则
    FirstMatch,
}

impl fmt::Display for FiringPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllMatches => write!(f, "all_matches"),
            Self::FirstMatch => write!(f, "first_match"),
        }
    }
}

/// 单条规则执行失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 遇到第一个失败立即中止本次执行并返回错误
    #[default]
    Abort,
    /// 记录失败并继续评估其余规则和事实
    Collect,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Collect => write!(f, "collect"),
        }
    }
}

/// 沙箱求值器的资源限制
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// 表达式源码最大字符数
    pub max_expression_length: usize,
    /// 语法树最大嵌套深度
    pub max_depth: usize,
    /// 拼接或重复产生的字符串最大长度
    pub max_string_length: usize,
    /// 拼接或重复产生的列表最大长度
    pub max_collection_length: usize,
    /// `**` 允许的最大指数绝对值
    pub max_power_exponent: u32,
    /// 追加到内置黑名单的敏感子串（只能扩充，不能缩减）
    pub extra_denied_patterns: Vec<String>,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_expression_length: 4096,
            max_depth: 64,
            max_string_length: 100_000,
            max_collection_length: 10_000,
            max_power_exponent: 1_000,
            extra_denied_patterns: Vec::new(),
        }
    }
}

/// 规则引擎配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub firing_policy: FiringPolicy,
    pub failure_policy: FailurePolicy,
    pub sandbox: SandboxLimits,
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 是否输出 JSON 格式日志（否则为人类可读格式）
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
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
    /// 1. .env 文件（如果存在）
    /// 2. config/default.toml（默认配置）
    /// 3. config/{environment}.toml（环境特定配置）
    /// 4. config/{service_name}.toml（服务特定配置）
    /// 5. 环境变量（MACHINE_RULES_ 前缀，`__` 分隔层级，
    ///    如 MACHINE_RULES_ENGINE__FIRING_POLICY -> engine.firing_policy）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let env =
            std::env::var("MACHINE_RULES_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, &env, Path::new(&config_dir))
    }

    /// 从指定目录加载配置（环境变量覆盖仍然生效）
    pub fn load_from(service_name: &str, env: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix("MACHINE_RULES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.firing_policy, FiringPolicy::AllMatches);
        assert_eq!(config.engine.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.engine.sandbox.max_depth, 64);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from(
            "machine-rules",
            "test",
            Path::new("/nonexistent/config/dir"),
        )
        .unwrap();

        assert_eq!(config.service_name, "machine-rules");
        assert_eq!(config.environment, "test");
        assert_eq!(config.engine.sandbox.max_expression_length, 4096);
        assert!(!config.is_production());
    }

    #[test]
    fn test_policy_deserialization() {
        let engine: EngineConfig = serde_json::from_str(
            r#"{"firing_policy": "first_match", "failure_policy": "collect"}"#,
        )
        .unwrap();

        assert_eq!(engine.firing_policy, FiringPolicy::FirstMatch);
        assert_eq!(engine.failure_policy, FailurePolicy::Collect);
        // 未配置的字段使用默认值
        assert_eq!(engine.sandbox, SandboxLimits::default());
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(FiringPolicy::FirstMatch.to_string(), "first_match");
        assert_eq!(FailurePolicy::Collect.to_string(), "collect");
    }
}
