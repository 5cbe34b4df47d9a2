//! 规则会话
//!
//! 会话把一个规则集快照和一段私有的事实工作内存绑定在一起：
//!
//! ```text
//! create ──> OPEN ──close()──> CLOSED
//!            │  ▲
//!            └──┘ add_facts / execute / get_facts / clear_facts
//! ```
//!
//! 无状态会话每次 `execute` 之后（包括失败返回）清空事实；
//! 有状态会话的事实保留到 `clear_facts` 或 `close`。

use crate::error::{Result, RuleError};
use crate::execution_set::RuleExecutionSet;
use crate::executor::{ExecutionOutcome, RuleExecutor, RuleFilter};
use crate::models::Rule;
use machine_rules_shared::config::{EngineConfig, FailurePolicy, FiringPolicy};
use machine_rules_shared::observability::metrics::{
    RULE_EXECUTIONS_TOTAL, RULE_EXECUTION_DURATION_SECONDS,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// 会话模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Stateless,
    Stateful,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stateless => write!(f, "stateless"),
            Self::Stateful => write!(f, "stateful"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Open,
    Closed,
}

/// 创建会话时的选项
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub mode: SessionMode,
    pub firing_policy: FiringPolicy,
    pub failure_policy: FailurePolicy,
    /// 额外的名称绑定，优先于事实的顶层键
    pub bindings: Map<String, Value>,
}

impl SessionOptions {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// 以引擎配置中的策略为默认值
    pub fn from_config(config: &EngineConfig, mode: SessionMode) -> Self {
        Self {
            mode,
            firing_policy: config.firing_policy,
            failure_policy: config.failure_policy,
            bindings: Map::new(),
        }
    }

    pub fn with_firing_policy(mut self, policy: FiringPolicy) -> Self {
        self.firing_policy = policy;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }
}

/// 单次执行的选项，未设置的策略沿用会话选项
#[derive(Default)]
pub struct ExecuteOptions<'a> {
    pub filter: Option<RuleFilter<'a>>,
    pub firing_policy: Option<FiringPolicy>,
    pub failure_policy: Option<FailurePolicy>,
    pub trace: bool,
}

impl<'a> ExecuteOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: RuleFilter<'a>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_firing_policy(mut self, policy: FiringPolicy) -> Self {
        self.firing_policy = Some(policy);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.trace = true;
        self
    }
}

/// 规则会话
///
/// 会话不是线程安全的共享对象；跨线程使用时由调用方串行化。
#[derive(Debug)]
pub struct RuleSession {
    id: Uuid,
    set_name: String,
    set: Arc<RuleExecutionSet>,
    options: SessionOptions,
    facts: Vec<Value>,
    state: SessionState,
}

impl RuleSession {
    pub(crate) fn new(set_name: &str, set: Arc<RuleExecutionSet>, options: SessionOptions) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            set_name: set_name.to_string(),
            set,
            options,
            facts: Vec::new(),
            state: SessionState::Open,
        };
        info!(
            session_id = %session.id,
            set = %session.set_name,
            mode = %session.options.mode,
            "会话已创建"
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 创建会话时使用的注册名称
    pub fn execution_set_name(&self) -> &str {
        &self.set_name
    }

    /// 创建时绑定的规则集快照
    pub fn execution_set(&self) -> &RuleExecutionSet {
        &self.set
    }

    pub fn mode(&self) -> SessionMode {
        self.options.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn add_fact(&mut self, fact: Value) -> Result<()> {
        self.ensure_open("add_fact")?;
        self.facts.push(fact);
        Ok(())
    }

    pub fn add_facts<I>(&mut self, facts: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        self.ensure_open("add_facts")?;
        self.facts.extend(facts);
        debug!(session_id = %self.id, facts = self.facts.len(), "事实已添加");
        Ok(())
    }

    /// 当前事实的快照
    pub fn get_facts(&self) -> Result<Vec<Value>> {
        self.ensure_open("get_facts")?;
        Ok(self.facts.clone())
    }

    pub fn clear_facts(&mut self) -> Result<()> {
        self.ensure_open("clear_facts")?;
        self.facts.clear();
        debug!(session_id = %self.id, "事实已清空");
        Ok(())
    }

    /// 同 [`clear_facts`](Self::clear_facts)
    pub fn reset(&mut self) -> Result<()> {
        self.clear_facts()
    }

    /// 设置额外绑定；`fact` 这个名称总是指向当前事实，不能被覆盖
    pub fn set_binding(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        self.ensure_open("set_binding")?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuleError::Validation("绑定名称不能为空".to_string()));
        }
        self.options.bindings.insert(name, value);
        Ok(())
    }

    /// 执行所有规则，返回动作结果
    pub fn execute(&mut self) -> Result<Vec<Value>> {
        self.execute_with(&ExecuteOptions::default())
            .map(|outcome| outcome.results)
    }

    /// 只执行通过过滤器的规则
    pub fn execute_filtered(&mut self, filter: &dyn Fn(&Rule) -> bool) -> Result<Vec<Value>> {
        self.execute_with(&ExecuteOptions::new().with_filter(filter))
            .map(|outcome| outcome.results)
    }

    #[instrument(skip(self, options), fields(session_id = %self.id, set = %self.set_name))]
    pub fn execute_with(&mut self, options: &ExecuteOptions<'_>) -> Result<ExecutionOutcome> {
        self.ensure_open("execute")?;

        let firing_policy = options.firing_policy.unwrap_or(self.options.firing_policy);
        let failure_policy = options.failure_policy.unwrap_or(self.options.failure_policy);
        let mut executor = RuleExecutor::new(firing_policy, failure_policy);
        if let Some(filter) = options.filter {
            executor = executor.with_filter(filter);
        }
        if options.trace {
            executor = executor.with_trace();
        }

        let start = Instant::now();
        let result = executor.execute(&self.set, &self.facts, &self.options.bindings);
        let elapsed = start.elapsed();

        metrics::counter!(RULE_EXECUTIONS_TOTAL).increment(1);
        metrics::histogram!(RULE_EXECUTION_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let fact_count = self.facts.len();
        if self.options.mode == SessionMode::Stateless {
            self.facts.clear();
        }

        match &result {
            Ok(outcome) => info!(
                facts = fact_count,
                results = outcome.results.len(),
                failures = outcome.failures.len(),
                elapsed_us = elapsed.as_micros() as u64,
                "规则执行完成"
            ),
            Err(err) => warn!(facts = fact_count, error = %err, "规则执行中止"),
        }
        result
    }

    /// 关闭会话，可重复调用
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.facts.clear();
        self.options.bindings.clear();
        info!(session_id = %self.id, set = %self.set_name, "会话已关闭");
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(RuleError::Session(format!(
                "会话 {} 已关闭，不能执行 {}",
                self.id, operation
            )));
        }
        Ok(())
    }
}

/// 作用域会话守卫，drop 时关闭会话
///
/// 正常返回、`?` 提前返回和 panic 展开都会经过 drop。
#[derive(Debug)]
pub struct SessionGuard {
    session: RuleSession,
}

impl SessionGuard {
    pub fn new(session: RuleSession) -> Self {
        Self { session }
    }
}

impl Deref for SessionGuard {
    type Target = RuleSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.close();
    }
}
