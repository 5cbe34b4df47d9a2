//! 规则执行集

use crate::error::{Result, RuleError};
use crate::models::Rule;
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::HashSet;

/// 命名的有序规则集合
///
/// 规则在构造时按优先级降序排列，优先级相同的保持插入顺序。
#[derive(Debug, Clone)]
pub struct RuleExecutionSet {
    name: String,
    description: Option<String>,
    rules: Vec<Rule>,
    properties: Map<String, Value>,
}

impl RuleExecutionSet {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuleError::Validation("规则集名称不能为空".to_string()));
        }
        check_rule_names(&name, &rules)?;

        let mut rules = rules;
        // sort_by_key 是稳定排序
        rules.sort_by_key(|rule| Reverse(rule.priority()));

        Ok(Self {
            name,
            description: None,
            rules,
            properties: Map::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// 按评估顺序返回规则
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name() == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 重新检查结构约束（注册时调用）
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::Validation("规则集名称不能为空".to_string()));
        }
        check_rule_names(&self.name, &self.rules)
    }
}

fn check_rule_names(set_name: &str, rules: &[Rule]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rules.len());
    for rule in rules {
        if rule.name().trim().is_empty() {
            return Err(RuleError::Validation(format!(
                "规则集 '{}' 中存在空的规则名称",
                set_name
            )));
        }
        if !seen.insert(rule.name()) {
            return Err(RuleError::Validation(format!(
                "规则集 '{}' 中存在重复的规则名称 '{}'",
                set_name,
                rule.name()
            )));
        }
    }
    Ok(())
}
