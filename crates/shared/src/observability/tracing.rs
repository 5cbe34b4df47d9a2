//! 日志初始化模块
//!
//! 基于 tracing-subscriber 构建日志管道，支持 JSON 与人类可读两种输出格式。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// Tracing 资源守卫
///
/// 目前仅标记订阅者已安装；保留为独立类型以便后续挂载需要刷新的导出器。
pub struct TracingGuard {
    _private: (),
}

/// 构建环境过滤器
///
/// RUST_LOG 优先，其次使用配置的日志级别，两者都无效时回退到 info。
pub fn build_env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化 tracing（日志）
///
/// 日志写入 stderr，stdout 留给命令行输出。
/// 重复初始化时返回错误而不是 panic。
pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let env_filter = build_env_filter(config);

    let fmt_layer = if config.json_logs {
        fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(TracingGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        let config = ObservabilityConfig {
            log_level: "not a [valid] directive ===".to_string(),
            json_logs: false,
        };
        // 无效的日志级别不应 panic
        let _ = build_env_filter(&config);
    }

    #[test]
    fn test_double_init_returns_error() {
        let config = ObservabilityConfig::default();
        let first = init(&config);
        let second = init(&config);
        // 同一进程内至多只有一次初始化成功
        assert!(first.is_err() || second.is_err());
    }
}
