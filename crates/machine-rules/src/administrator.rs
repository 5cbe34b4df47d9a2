//! 规则集注册管理
//!
//! 注册表是运行时唯一的共享可变状态。所有读写都经过同一把可重入锁，
//! 同一线程在持锁期间再次访问注册表不会死锁。

use crate::error::{Result, RuleError};
use crate::execution_set::RuleExecutionSet;
use chrono::{DateTime, Utc};
use machine_rules_shared::observability::metrics::EXECUTION_SET_REGISTRATIONS_TOTAL;
use parking_lot::ReentrantMutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 值必须是字符串的保留属性
const STRING_PROPERTIES: &[&str] = &["description", "source"];

/// 注册元信息
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationInfo {
    pub name: String,
    /// 注册表内单调递增的版本号
    pub version: u64,
    pub registered_at: DateTime<Utc>,
    pub rule_count: usize,
    pub properties: Map<String, Value>,
}

struct Registration {
    set: Arc<RuleExecutionSet>,
    info: RegistrationInfo,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Registration>,
    next_version: u64,
}

/// 规则集管理器
///
/// 克隆得到的句柄共享同一个注册表。
#[derive(Clone, Default)]
pub struct RuleAdministrator {
    registry: Arc<ReentrantMutex<RefCell<Registry>>>,
}

impl RuleAdministrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册规则集，同名注册会被原子替换
    #[instrument(skip(self, set, properties), fields(set_name = %name, rule_count = set.len()))]
    pub fn register_execution_set(
        &self,
        name: &str,
        set: RuleExecutionSet,
        properties: Option<Map<String, Value>>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(RuleError::Validation("注册名称不能为空".to_string()));
        }

        let mut merged = set.properties().clone();
        if let Some(extra) = properties {
            merged.extend(extra);
        }
        validate_properties(&merged)?;

        let guard = self.registry.lock();
        set.validate()?;
        let replacing = self.contains(name);

        let set = Arc::new(set);
        {
            let mut registry = guard.borrow_mut();
            registry.next_version += 1;
            let info = RegistrationInfo {
                name: name.to_string(),
                version: registry.next_version,
                registered_at: Utc::now(),
                rule_count: set.len(),
                properties: merged,
            };
            registry
                .entries
                .insert(name.to_string(), Registration { set, info });
        }

        metrics::counter!(EXECUTION_SET_REGISTRATIONS_TOTAL).increment(1);
        if replacing {
            info!("规则集已替换: {}", name);
        } else {
            info!("规则集已注册: {}", name);
        }
        Ok(())
    }

    /// 注销规则集；名称不存在时不报错，返回是否确实移除
    #[instrument(skip(self))]
    pub fn deregister_execution_set(&self, name: &str) -> bool {
        let guard = self.registry.lock();
        let removed = guard.borrow_mut().entries.remove(name).is_some();
        if removed {
            info!("规则集已注销: {}", name);
        } else {
            debug!("注销不存在的规则集: {}", name);
        }
        removed
    }

    /// 获取规则集快照
    pub fn get_execution_set(&self, name: &str) -> Result<Arc<RuleExecutionSet>> {
        let guard = self.registry.lock();
        let registry = guard.borrow();
        registry
            .entries
            .get(name)
            .map(|r| Arc::clone(&r.set))
            .ok_or_else(|| RuleError::NotFound(name.to_string()))
    }

    pub fn registration_info(&self, name: &str) -> Option<RegistrationInfo> {
        let guard = self.registry.lock();
        let registry = guard.borrow();
        registry.entries.get(name).map(|r| r.info.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.lock().borrow().entries.contains_key(name)
    }

    /// 已注册的名称（排序）
    pub fn registrations(&self) -> Vec<String> {
        let guard = self.registry.lock();
        let mut names: Vec<String> = guard.borrow().entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// 所有注册的规则集快照
    pub fn get_registrations(&self) -> BTreeMap<String, Arc<RuleExecutionSet>> {
        let guard = self.registry.lock();
        let registry = guard.borrow();
        registry
            .entries
            .iter()
            .map(|(name, r)| (name.clone(), Arc::clone(&r.set)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_properties(properties: &Map<String, Value>) -> Result<()> {
    for (key, value) in properties {
        if key.trim().is_empty() {
            return Err(RuleError::Validation("属性名不能为空".to_string()));
        }
        if STRING_PROPERTIES.contains(&key.as_str()) && !value.is_string() {
            return Err(RuleError::Validation(format!(
                "属性 '{}' 必须是字符串",
                key
            )));
        }
    }
    Ok(())
}
