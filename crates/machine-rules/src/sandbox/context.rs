//! 求值上下文（名称绑定）

use serde_json::{Map, Value};

/// 表达式中可见的名称
///
/// 查找顺序：`fact` 永远指向当前事实；其次是显式绑定；最后是事实对象的顶层键。
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationContext<'a> {
    fact: Option<&'a Value>,
    bindings: Option<&'a Map<String, Value>>,
}

impl<'a> EvaluationContext<'a> {
    /// 只包含显式绑定的上下文
    pub fn new(bindings: &'a Map<String, Value>) -> Self {
        Self {
            fact: None,
            bindings: Some(bindings),
        }
    }

    /// 针对单个事实的上下文
    pub fn for_fact(fact: &'a Value, bindings: &'a Map<String, Value>) -> Self {
        Self {
            fact: Some(fact),
            bindings: Some(bindings),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fact(&self) -> Option<&'a Value> {
        self.fact
    }

    pub fn lookup(&self, name: &str) -> Option<&'a Value> {
        if name == "fact" {
            if let Some(fact) = self.fact {
                return Some(fact);
            }
        }
        if let Some(value) = self.bindings.and_then(|b| b.get(name)) {
            return Some(value);
        }
        self.fact
            .and_then(Value::as_object)
            .and_then(|obj| obj.get(name))
    }
}
