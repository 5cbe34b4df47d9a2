//! 决策表（DMN 风格）规则加载
//!
//! 表格为带表头的 CSV，第一列是针对输入字段的条件片段，第二列是结果表达式：
//!
//! ```text
//! condition,action
//! >100000,"'high_income'"
//! <=100000,"'standard'"
//! ```
//!
//! 第 N 行生成规则 `rule_N`（从 0 开始），条件为
//! `fact.get('<输入字段>', 0) <条件单元格>`，动作为 `{'result': <动作单元格>}`。
//! 条件单元格为空或为 `-` 时表示任意输入。生成的表达式全部经过沙箱编译，
//! 任意一行失败则整张表被拒绝。

use crate::error::{Result, RuleError};
use crate::execution_set::RuleExecutionSet;
use crate::models::Rule;
use crate::sandbox::SafeEvaluator;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;
use tracing::{info, instrument};

const DEFAULT_SET_NAME: &str = "dmn_rules";
const DEFAULT_INPUT_FIELD: &str = "income";
const ANY_INPUT: &str = "-";

/// 决策表加载器
#[derive(Debug, Clone)]
pub struct DmnRuleLoader {
    evaluator: SafeEvaluator,
    set_name: String,
    input_field: String,
}

impl Default for DmnRuleLoader {
    fn default() -> Self {
        Self {
            evaluator: SafeEvaluator::default(),
            set_name: DEFAULT_SET_NAME.to_string(),
            input_field: DEFAULT_INPUT_FIELD.to_string(),
        }
    }
}

impl DmnRuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluator(mut self, evaluator: SafeEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_set_name(mut self, name: impl Into<String>) -> Self {
        self.set_name = name.into();
        self
    }

    /// 条件所针对的事实字段，必须是标识符
    pub fn with_input_field(mut self, field: impl Into<String>) -> Self {
        self.input_field = field.into();
        self
    }

    /// 使用默认设置从 CSV 文件加载
    pub fn from_csv(path: impl AsRef<Path>) -> Result<RuleExecutionSet> {
        Self::new().load_file(path)
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<RuleExecutionSet> {
        let file = std::fs::File::open(path.as_ref())?;
        self.load_reader(file)
    }

    pub fn load_str(&self, source: &str) -> Result<RuleExecutionSet> {
        self.load_reader(source.as_bytes())
    }

    pub fn load_reader(&self, reader: impl Read) -> Result<RuleExecutionSet> {
        if !is_identifier(&self.input_field) {
            return Err(RuleError::Validation(format!(
                "决策表输入字段 '{}' 不是合法的标识符",
                self.input_field
            )));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut rules = Vec::new();
        for (index, record) in reader.records().enumerate() {
            rules.push(self.build_rule(index, &record?)?);
        }

        let mut properties = Map::new();
        properties.insert("description".to_string(), Value::String(String::new()));
        properties.insert("source".to_string(), Value::String("dmn".to_string()));
        properties.insert(
            "input_field".to_string(),
            Value::String(self.input_field.clone()),
        );

        let set = RuleExecutionSet::new(self.set_name.clone(), rules)?.with_properties(properties);
        info!(set = %set.name(), rules = set.len(), "决策表规则集已加载");
        Ok(set)
    }

    fn build_rule(&self, index: usize, record: &StringRecord) -> Result<Rule> {
        let name = format!("rule_{}", index);
        let (condition_cell, action_cell) = match (record.get(0), record.get(1)) {
            (Some(condition), Some(action)) => (condition, action),
            _ => {
                return Err(RuleError::Validation(format!(
                    "决策表第 {} 行至少需要条件和结果两列",
                    index + 1
                )));
            }
        };
        if action_cell.is_empty() {
            return Err(RuleError::Validation(format!(
                "决策表第 {} 行的结果为空",
                index + 1
            )));
        }

        let condition = if condition_cell.is_empty() || condition_cell == ANY_INPUT {
            "True".to_string()
        } else {
            format!("fact.get('{}', 0) {}", self.input_field, condition_cell)
        };
        let action = format!("{{'result': {}}}", action_cell);

        Rule::from_expressions_with(&self.evaluator, name, &condition, &action)
    }
}

fn is_identifier(field: &str) -> bool {
    let mut chars = field.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const INCOME_TABLE: &str = "condition,action\n>100000,'high_income'\n<=100000,'standard'\n";

    #[test]
    fn test_rules_follow_row_order() {
        let set = DmnRuleLoader::new().load_str(INCOME_TABLE).unwrap();
        assert_eq!(set.name(), "dmn_rules");
        assert_eq!(set.properties()["source"], "dmn");

        let names: Vec<&str> = set.rules().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["rule_0", "rule_1"]);
        assert!(set.rules().iter().all(|r| r.priority() == 0));
    }

    #[test]
    fn test_generated_rules_match_income() {
        let set = DmnRuleLoader::new().load_str(INCOME_TABLE).unwrap();
        let bindings = Map::new();
        let high = serde_json::json!({"income": 150000});

        let rule = set.rule("rule_0").unwrap();
        assert!(rule.matches(&high, &bindings, 0).unwrap());
        assert_eq!(
            rule.fire(&high, &bindings, 0).unwrap(),
            serde_json::json!({"result": "high_income"})
        );
        assert!(!set.rule("rule_1").unwrap().matches(&high, &bindings, 0).unwrap());
    }

    #[test]
    fn test_any_input_condition() {
        let set = DmnRuleLoader::new()
            .with_input_field("age")
            .load_str("condition,action\n-,'fallback'\n")
            .unwrap();
        let rule = set.rule("rule_0").unwrap();
        assert!(rule.matches(&serde_json::json!({}), &Map::new(), 0).unwrap());
        assert_eq!(set.properties()["input_field"], "age");
    }

    #[test]
    fn test_invalid_input_field() {
        let err = DmnRuleLoader::new()
            .with_input_field("income') or ('x")
            .load_str(INCOME_TABLE)
            .unwrap_err();
        assert!(matches!(err, RuleError::Validation(_)));
    }

    #[test]
    fn test_missing_columns_and_empty_action() {
        let err = DmnRuleLoader::new()
            .load_str("condition,action\n>1\n")
            .unwrap_err();
        assert!(matches!(err, RuleError::Validation(_)));

        let err = DmnRuleLoader::new()
            .load_str("condition,action\n>1,\n")
            .unwrap_err();
        assert!(matches!(err, RuleError::Validation(_)));
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("income"));
        assert!(is_identifier("_total_2"));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
