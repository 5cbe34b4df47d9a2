//! 规则运行时：从注册表创建会话

use crate::administrator::RuleAdministrator;
use crate::error::Result;
use crate::session::{RuleSession, SessionGuard, SessionMode, SessionOptions};
use machine_rules_shared::config::EngineConfig;
use tracing::instrument;

/// 规则运行时
///
/// 与 [`RuleAdministrator`] 共享同一个注册表；会话创建时解析规则集快照，
/// 之后的重新注册不影响已打开的会话。
#[derive(Clone, Default)]
pub struct RuleRuntime {
    administrator: RuleAdministrator,
    engine: EngineConfig,
}

impl RuleRuntime {
    pub fn new(administrator: RuleAdministrator) -> Self {
        Self::with_config(administrator, EngineConfig::default())
    }

    /// 会话默认策略取自引擎配置
    pub fn with_config(administrator: RuleAdministrator, engine: EngineConfig) -> Self {
        Self {
            administrator,
            engine,
        }
    }

    pub fn administrator(&self) -> &RuleAdministrator {
        &self.administrator
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// 可用于创建会话的规则集名称
    pub fn registrations(&self) -> Vec<String> {
        self.administrator.registrations()
    }

    pub fn create_session(&self, name: &str, mode: SessionMode) -> Result<RuleSession> {
        self.create_session_with(name, SessionOptions::from_config(&self.engine, mode))
    }

    #[instrument(skip(self, options), fields(mode = %options.mode))]
    pub fn create_session_with(&self, name: &str, options: SessionOptions) -> Result<RuleSession> {
        let set = self.administrator.get_execution_set(name)?;
        Ok(RuleSession::new(name, set, options))
    }

    /// 创建会话并返回作用域守卫
    pub fn open_session(&self, name: &str, options: SessionOptions) -> Result<SessionGuard> {
        self.create_session_with(name, options).map(SessionGuard::new)
    }

    /// 在作用域会话中执行闭包，任何退出路径都会关闭会话
    pub fn with_session<T, F>(&self, name: &str, options: SessionOptions, f: F) -> Result<T>
    where
        F: FnOnce(&mut RuleSession) -> Result<T>,
    {
        let mut guard = self.open_session(name, options)?;
        f(&mut *guard)
    }
}
