//! 规则引擎
//!
//! 提供可嵌入的业务规则执行能力，支持：
//! - 沙箱表达式求值（条件与动作可由半可信方以文本编写）
//! - 按优先级排序的规则集与注册管理
//! - 有状态/无状态会话与可配置的触发、失败策略
//! - YAML 规则文档与 CSV 决策表加载

pub mod administrator;
pub mod decision_table;
pub mod error;
pub mod execution_set;
pub mod executor;
pub mod loader;
pub mod models;
pub mod operators;
pub mod provider;
pub mod runtime;
pub mod sandbox;
pub mod session;

pub use administrator::{RegistrationInfo, RuleAdministrator};
pub use decision_table::DmnRuleLoader;
pub use error::{EvalError, Result, RuleError};
pub use execution_set::RuleExecutionSet;
pub use executor::{ExecutionOutcome, RuleExecutor, RuleFailure, RuleFilter};
pub use loader::YamlRuleLoader;
pub use models::{Action, BoxError, Condition, Rule};
pub use provider::{RuleServiceProvider, RuleServiceProviderManager, DEFAULT_PROVIDER_URIS};
pub use runtime::RuleRuntime;
pub use sandbox::{
    safe_eval, validate_expression, CompiledExpression, EvaluationContext, SafeEvaluator,
};
pub use session::{
    ExecuteOptions, RuleSession, SessionGuard, SessionMode, SessionOptions, SessionState,
};

pub use machine_rules_shared::config::{EngineConfig, FailurePolicy, FiringPolicy, SandboxLimits};
