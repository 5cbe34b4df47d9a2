//! 规则匹配执行器
//!
//! 对每个事实按规则集的评估顺序依次评估条件，条件成立时执行动作并收集结果。

use crate::error::{Result, RuleError};
use crate::execution_set::RuleExecutionSet;
use crate::models::Rule;
use machine_rules_shared::config::{FailurePolicy, FiringPolicy};
use machine_rules_shared::observability::metrics::{
    RULE_EXECUTION_FAILURES_TOTAL, RULE_FIRINGS_TOTAL,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// 外部规则过滤器
pub type RuleFilter<'a> = &'a dyn Fn(&Rule) -> bool;

/// 单条规则在单个事实上的失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub fact_index: usize,
    pub code: &'static str,
    pub message: String,
}

impl RuleFailure {
    fn from_error(rule: &Rule, fact_index: usize, err: &RuleError) -> Self {
        let message = match err {
            RuleError::Execution { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            rule: rule.name().to_string(),
            fact_index,
            code: err.code(),
            message,
        }
    }
}

/// 一次执行的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionOutcome {
    /// 按 (事实, 规则) 顺序排列的动作结果，`null` 结果不计入
    pub results: Vec<Value>,
    /// 仅在 `collect` 策略下填充
    pub failures: Vec<RuleFailure>,
    /// 启用追踪时的评估记录
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 规则执行器
pub struct RuleExecutor<'a> {
    firing_policy: FiringPolicy,
    failure_policy: FailurePolicy,
    filter: Option<RuleFilter<'a>>,
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl<'a> RuleExecutor<'a> {
    pub fn new(firing_policy: FiringPolicy, failure_policy: FailurePolicy) -> Self {
        Self {
            firing_policy,
            failure_policy,
            filter: None,
            trace_enabled: false,
        }
    }

    /// 只评估通过过滤器的规则
    pub fn with_filter(mut self, filter: RuleFilter<'a>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 在事实序列上执行规则集
    pub fn execute(
        &self,
        set: &RuleExecutionSet,
        facts: &[Value],
        bindings: &Map<String, Value>,
    ) -> Result<ExecutionOutcome> {
        let mut outcome = ExecutionOutcome::default();
        let rules: Vec<&Rule> = set
            .rules()
            .iter()
            .filter(|rule| self.filter.is_none_or(|keep| keep(rule)))
            .collect();

        for (fact_index, fact) in facts.iter().enumerate() {
            for rule in &rules {
                let fired = match self.apply(rule, fact, bindings, fact_index, &mut outcome) {
                    Ok(fired) => fired,
                    Err(err) => {
                        self.record_failure(rule, fact_index, err, &mut outcome)?;
                        continue;
                    }
                };

                if fired && self.firing_policy == FiringPolicy::FirstMatch {
                    if self.trace_enabled {
                        outcome.trace.push(format!(
                            "fact#{}: first_match 策略，规则 '{}' 之后停止",
                            fact_index,
                            rule.name()
                        ));
                    }
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// 评估一条规则，返回是否触发
    fn apply(
        &self,
        rule: &Rule,
        fact: &Value,
        bindings: &Map<String, Value>,
        fact_index: usize,
        outcome: &mut ExecutionOutcome,
    ) -> Result<bool> {
        let matched = rule.matches(fact, bindings, fact_index)?;
        if self.trace_enabled {
            outcome.trace.push(format!(
                "fact#{}: 规则 '{}' (priority={}) => {}",
                fact_index,
                rule.name(),
                rule.priority(),
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }
        if !matched {
            return Ok(false);
        }

        let result = rule.fire(fact, bindings, fact_index)?;
        metrics::counter!(RULE_FIRINGS_TOTAL).increment(1);
        debug!(rule = %rule.name(), fact_index, "规则已触发");

        if !result.is_null() {
            outcome.results.push(result);
        }
        Ok(true)
    }

    fn record_failure(
        &self,
        rule: &Rule,
        fact_index: usize,
        err: RuleError,
        outcome: &mut ExecutionOutcome,
    ) -> Result<()> {
        metrics::counter!(RULE_EXECUTION_FAILURES_TOTAL).increment(1);
        warn!(
            rule = %rule.name(),
            fact_index,
            code = err.code(),
            error = %err,
            "规则执行失败"
        );

        match self.failure_policy {
            FailurePolicy::Abort => Err(err),
            FailurePolicy::Collect => {
                if self.trace_enabled {
                    outcome.trace.push(format!(
                        "fact#{}: 规则 '{}' 失败，继续执行",
                        fact_index,
                        rule.name()
                    ));
                }
                outcome
                    .failures
                    .push(RuleFailure::from_error(rule, fact_index, &err));
                Ok(())
            }
        }
    }
}

impl Default for RuleExecutor<'_> {
    fn default() -> Self {
        Self::new(FiringPolicy::default(), FailurePolicy::default())
    }
}
