//! 规则引擎领域模型

use crate::error::{Result, RuleError};
use crate::sandbox::{self, CompiledExpression, EvaluationContext, SafeEvaluator};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// 原生条件/动作返回的错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type NativeCondition = Arc<dyn Fn(&Value) -> std::result::Result<bool, BoxError> + Send + Sync>;
pub type NativeAction = Arc<dyn Fn(&Value) -> std::result::Result<Value, BoxError> + Send + Sync>;

/// 规则条件：原生谓词或沙箱表达式
#[derive(Clone)]
pub enum Condition {
    Native(NativeCondition),
    Expression(CompiledExpression),
}

impl Condition {
    pub fn native<F>(predicate: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(predicate))
    }

    /// 总是成立的条件
    pub fn always() -> Self {
        Self::native(|_| Ok(true))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native(..)"),
            Self::Expression(expr) => f.debug_tuple("Expression").field(&expr.source()).finish(),
        }
    }
}

/// 规则动作：原生变换或沙箱表达式
#[derive(Clone)]
pub enum Action {
    Native(NativeAction),
    Expression(CompiledExpression),
}

impl Action {
    pub fn native<F>(transform: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(transform))
    }

    /// 返回固定值的动作
    pub fn constant(value: Value) -> Self {
        Self::native(move |_| Ok(value.clone()))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native(..)"),
            Self::Expression(expr) => f.debug_tuple("Expression").field(&expr.source()).finish(),
        }
    }
}

/// 规则定义
///
/// 构造后不可变；表达式在构造时完成编译和安全检查。
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    condition: Condition,
    action: Action,
    priority: i64,
    description: Option<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>, condition: Condition, action: Action) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuleError::Validation("规则名称不能为空".to_string()));
        }
        Ok(Self {
            name,
            condition,
            action,
            priority: 0,
            description: None,
        })
    }

    /// 使用原生闭包构造规则（不做安全检查）
    pub fn native<C, A>(name: impl Into<String>, condition: C, action: A) -> Result<Self>
    where
        C: Fn(&Value) -> std::result::Result<bool, BoxError> + Send + Sync + 'static,
        A: Fn(&Value) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::new(name, Condition::native(condition), Action::native(action))
    }

    /// 使用文本表达式构造规则，使用默认沙箱限制
    pub fn from_expressions(
        name: impl Into<String>,
        condition: &str,
        action: &str,
    ) -> Result<Self> {
        Self::from_expressions_with(sandbox::default_evaluator(), name, condition, action)
    }

    /// 使用文本表达式构造规则，表达式由给定求值器编译
    pub fn from_expressions_with(
        evaluator: &SafeEvaluator,
        name: impl Into<String>,
        condition: &str,
        action: &str,
    ) -> Result<Self> {
        let name = name.into();
        let condition = evaluator
            .compile(condition)
            .map_err(|e| RuleError::from_compile(&name, "条件", e))?;
        let action = evaluator
            .compile(action)
            .map_err(|e| RuleError::from_compile(&name, "动作", e))?;
        Self::new(name, Condition::Expression(condition), Action::Expression(action))
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// 在单个事实上评估条件
    pub(crate) fn matches(
        &self,
        fact: &Value,
        bindings: &Map<String, Value>,
        fact_index: usize,
    ) -> Result<bool> {
        match &self.condition {
            Condition::Native(predicate) => self.invoke_native(fact_index, || predicate(fact)),
            Condition::Expression(expr) => expr
                .evaluate_truthy(&EvaluationContext::for_fact(fact, bindings))
                .map_err(|e| RuleError::from_eval(&self.name, fact_index, e)),
        }
    }

    /// 在单个事实上执行动作
    pub(crate) fn fire(
        &self,
        fact: &Value,
        bindings: &Map<String, Value>,
        fact_index: usize,
    ) -> Result<Value> {
        match &self.action {
            Action::Native(transform) => self.invoke_native(fact_index, || transform(fact)),
            Action::Expression(expr) => expr
                .evaluate(&EvaluationContext::for_fact(fact, bindings))
                .map_err(|e| RuleError::from_eval(&self.name, fact_index, e)),
        }
    }

    /// 调用原生闭包，错误和 panic 都转换为执行错误
    fn invoke_native<T>(
        &self,
        fact_index: usize,
        f: impl FnOnce() -> std::result::Result<T, BoxError>,
    ) -> Result<T> {
        let execution_error = |message: String| RuleError::Execution {
            rule: self.name.clone(),
            fact_index,
            message,
        };
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(execution_error(err.to_string())),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(execution_error(format!("原生回调 panic: {}", reason)))
            }
        }
    }
}
