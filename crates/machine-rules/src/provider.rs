//! 规则服务提供者注册
//!
//! 进程内唯一的全局状态：URI 到提供者的映射。提供者本身只是
//! 一对共享注册表的 [`RuleAdministrator`] / [`RuleRuntime`]。

use crate::administrator::RuleAdministrator;
use crate::error::{Result, RuleError};
use crate::runtime::RuleRuntime;
use dashmap::DashMap;
use machine_rules_shared::config::EngineConfig;
use std::sync::LazyLock;
use tracing::info;

/// 默认提供者注册的 URI
pub const DEFAULT_PROVIDER_URIS: &[&str] = &["api", "inmemory", "machine"];

static PROVIDERS: LazyLock<DashMap<String, RuleServiceProvider>> = LazyLock::new(DashMap::new);

static DEFAULT_PROVIDER: LazyLock<RuleServiceProvider> = LazyLock::new(RuleServiceProvider::new);

/// 规则服务提供者
#[derive(Clone)]
pub struct RuleServiceProvider {
    administrator: RuleAdministrator,
    runtime: RuleRuntime,
}

impl std::fmt::Debug for RuleServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleServiceProvider").finish_non_exhaustive()
    }
}

impl RuleServiceProvider {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(engine: EngineConfig) -> Self {
        let administrator = RuleAdministrator::new();
        let runtime = RuleRuntime::with_config(administrator.clone(), engine);
        Self {
            administrator,
            runtime,
        }
    }

    pub fn administrator(&self) -> &RuleAdministrator {
        &self.administrator
    }

    pub fn runtime(&self) -> &RuleRuntime {
        &self.runtime
    }
}

impl Default for RuleServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局提供者注册表
pub struct RuleServiceProviderManager;

impl RuleServiceProviderManager {
    /// 注册提供者，同名覆盖
    pub fn register(uri: &str, provider: RuleServiceProvider) -> Result<()> {
        if uri.trim().is_empty() {
            return Err(RuleError::Validation("提供者 URI 不能为空".to_string()));
        }
        PROVIDERS.insert(uri.to_string(), provider);
        info!("规则服务提供者已注册: {}", uri);
        Ok(())
    }

    pub fn get(uri: &str) -> Result<RuleServiceProvider> {
        PROVIDERS
            .get(uri)
            .map(|p| p.value().clone())
            .ok_or_else(|| RuleError::NotFound(format!("规则服务提供者 '{}'", uri)))
    }

    pub fn deregister(uri: &str) -> bool {
        let removed = PROVIDERS.remove(uri).is_some();
        if removed {
            info!("规则服务提供者已注销: {}", uri);
        }
        removed
    }

    /// 已注册的 URI（排序）
    pub fn registered_uris() -> Vec<String> {
        let mut uris: Vec<String> = PROVIDERS.iter().map(|p| p.key().clone()).collect();
        uris.sort();
        uris
    }

    pub fn list_providers() -> Vec<String> {
        Self::registered_uris()
    }

    /// 在默认 URI 下注册共享的默认提供者，可重复调用
    pub fn initialize() -> RuleServiceProvider {
        for uri in DEFAULT_PROVIDER_URIS {
            PROVIDERS
                .entry(uri.to_string())
                .or_insert_with(|| DEFAULT_PROVIDER.clone());
        }
        DEFAULT_PROVIDER.clone()
    }
}
