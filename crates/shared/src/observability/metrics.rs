//! 指标描述模块
//!
//! 基于 metrics crate 的门面登记规则引擎的指标。
//! 导出器由宿主进程自行安装；未安装 recorder 时所有指标调用均为空操作。

/// 规则执行次数（每次 execute 调用计一次）
pub const RULE_EXECUTIONS_TOTAL: &str = "rule_executions_total";
/// 规则触发次数（条件为真并产生结果）
pub const RULE_FIRINGS_TOTAL: &str = "rule_firings_total";
/// 规则条件或动作执行失败次数
pub const RULE_EXECUTION_FAILURES_TOTAL: &str = "rule_execution_failures_total";
/// 被沙箱安全策略拒绝的表达式数量
pub const EXPRESSION_SECURITY_REJECTIONS_TOTAL: &str = "expression_security_rejections_total";
/// 规则集注册次数
pub const EXECUTION_SET_REGISTRATIONS_TOTAL: &str = "execution_set_registrations_total";
/// 单次 execute 调用耗时
pub const RULE_EXECUTION_DURATION_SECONDS: &str = "rule_execution_duration_seconds";

/// 登记指标描述
///
/// 这些描述会出现在导出端点的 HELP 注释中。
pub fn describe_metrics() {
    metrics::describe_counter!(RULE_EXECUTIONS_TOTAL, "Total number of session executions");
    metrics::describe_counter!(RULE_FIRINGS_TOTAL, "Total number of rule firings");
    metrics::describe_counter!(
        RULE_EXECUTION_FAILURES_TOTAL,
        "Total number of failed rule condition/action evaluations"
    );
    metrics::describe_counter!(
        EXPRESSION_SECURITY_REJECTIONS_TOTAL,
        "Total number of expressions rejected by the sandbox"
    );
    metrics::describe_counter!(
        EXECUTION_SET_REGISTRATIONS_TOTAL,
        "Total number of rule execution set registrations"
    );
    metrics::describe_histogram!(
        RULE_EXECUTION_DURATION_SECONDS,
        "Session execute duration in seconds"
    );
}
