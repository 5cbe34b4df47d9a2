//! YAML 规则文档加载
//!
//! 文档格式：
//!
//! ```yaml
//! name: "income_rules"
//! description: "按收入分类"
//! rules:
//!   - name: "high_income"
//!     condition: "fact.get('income', 0) > 100000"
//!     action: "{'category': 'high_income'}"
//!     priority: 10
//! ```
//!
//! 每条规则都经过 [`Rule::from_expressions_with`] 编译和安全检查，
//! 任意一条失败则整个文档被拒绝。加载器本身不注册任何东西。

use crate::error::{Result, RuleError};
use crate::execution_set::RuleExecutionSet;
use crate::models::Rule;
use crate::sandbox::SafeEvaluator;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use serde_yaml::Value as YamlValue;
use std::path::Path;
use tracing::{info, instrument};

const DEFAULT_SET_NAME: &str = "yaml_rules";
const DEFAULT_CONDITION: &str = "True";
const DEFAULT_ACTION: &str = "None";

#[derive(Debug, Deserialize)]
struct RuleDocument {
    #[serde(default = "default_set_name")]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

#[derive(Debug, Deserialize)]
struct RuleDefinition {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    condition: Option<YamlValue>,
    #[serde(default)]
    action: Option<YamlValue>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    description: Option<String>,
}

fn default_set_name() -> String {
    DEFAULT_SET_NAME.to_string()
}

/// YAML 规则加载器
#[derive(Debug, Clone, Default)]
pub struct YamlRuleLoader {
    evaluator: SafeEvaluator,
}

impl YamlRuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定沙箱限制编译表达式
    pub fn with_evaluator(evaluator: SafeEvaluator) -> Self {
        Self { evaluator }
    }

    /// 使用默认限制从字符串加载
    pub fn from_str(source: &str) -> Result<RuleExecutionSet> {
        Self::new().load_str(source)
    }

    /// 使用默认限制从文件加载
    pub fn from_file(path: impl AsRef<Path>) -> Result<RuleExecutionSet> {
        Self::new().load_file(path)
    }

    /// 使用默认限制从已解析的 YAML 值加载
    pub fn from_value(value: YamlValue) -> Result<RuleExecutionSet> {
        Self::new().load_value(value)
    }

    pub fn load_str(&self, source: &str) -> Result<RuleExecutionSet> {
        let value: YamlValue = serde_yaml::from_str(source)?;
        self.load_value(value)
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<RuleExecutionSet> {
        let source = std::fs::read_to_string(path.as_ref())?;
        self.load_str(&source)
    }

    pub fn load_value(&self, value: YamlValue) -> Result<RuleExecutionSet> {
        if value.is_null() {
            return Err(RuleError::Load("规则文档为空".to_string()));
        }
        if !value.is_mapping() {
            return Err(RuleError::Load("规则文档的顶层必须是映射".to_string()));
        }
        let document: RuleDocument = serde_yaml::from_value(value)?;
        self.build(document)
    }

    fn build(&self, document: RuleDocument) -> Result<RuleExecutionSet> {
        let mut rules = Vec::with_capacity(document.rules.len());
        for (index, definition) in document.rules.into_iter().enumerate() {
            rules.push(self.build_rule(index, definition)?);
        }

        let description = document.description.unwrap_or_default();
        let mut properties = Map::new();
        properties.insert("description".to_string(), JsonValue::String(description.clone()));
        properties.insert("source".to_string(), JsonValue::String("yaml".to_string()));

        let set = RuleExecutionSet::new(document.name, rules)?
            .with_description(description)
            .with_properties(properties);

        info!(set = %set.name(), rules = set.len(), "YAML 规则集已加载");
        Ok(set)
    }

    fn build_rule(&self, index: usize, definition: RuleDefinition) -> Result<Rule> {
        let name = definition
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| RuleError::Validation(format!("第 {} 条规则缺少名称", index + 1)))?;

        let condition = expression_text(&name, "condition", definition.condition, DEFAULT_CONDITION)?;
        let action = expression_text(&name, "action", definition.action, DEFAULT_ACTION)?;

        let mut rule = Rule::from_expressions_with(&self.evaluator, name, &condition, &action)?
            .with_priority(definition.priority);
        if let Some(description) = definition.description {
            rule = rule.with_description(description);
        }
        Ok(rule)
    }
}

/// 将 YAML 标量转换为表达式文本；`true`、数字等未加引号的标量按字面量处理
fn expression_text(
    rule: &str,
    field: &str,
    value: Option<YamlValue>,
    default: &str,
) -> Result<String> {
    match value {
        None | Some(YamlValue::Null) => Ok(default.to_string()),
        Some(YamlValue::String(text)) => Ok(text),
        Some(YamlValue::Bool(true)) => Ok("True".to_string()),
        Some(YamlValue::Bool(false)) => Ok("False".to_string()),
        Some(YamlValue::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(RuleError::Validation(format!(
            "规则 '{}' 的 {} 必须是表达式字符串",
            rule, field
        ))),
    }
}
