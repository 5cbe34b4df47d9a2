//! 沙箱安全策略
//!
//! 两道独立的防线：
//! 1. 源码黑名单：对原始文本做大小写不敏感的子串扫描，命中即拒绝；
//! 2. 结构白名单：遍历语法树，只允许调用白名单内的内置函数和方法，
//!    且禁止脱离调用的属性访问。

use super::ast::Expr;
use super::builtins::{ALLOWED_FUNCTIONS, ALLOWED_METHODS};
use crate::error::EvalError;

/// 内置黑名单
///
/// 按子串匹配且不区分大小写，不看词边界。包含这些片段的普通标识符或字符串
/// 同样会被拒绝，例如 `fact.get('important')`、`fact.get('opening_balance')`、
/// `fact.get('evaluation')`，规则作者需要改用不含这些片段的字段名。
pub const DENIED_PATTERNS: &[&str] = &[
    "__import__",
    "__builtins__",
    "eval",
    "exec",
    "compile",
    "open",
    "__class__",
    "__base__",
    "__subclasses__",
    "__globals__",
    "__code__",
    "lambda",
    "__",
    "import",
    "getattr",
    "setattr",
    "globals",
];

/// 源码黑名单
#[derive(Debug, Clone)]
pub struct Denylist {
    patterns: Vec<String>,
}

impl Denylist {
    /// 内置黑名单加上额外的敏感子串
    pub fn with_extra(extra: &[String]) -> Self {
        let patterns = DENIED_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(
                extra
                    .iter()
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| p.to_lowercase()),
            )
            .collect();
        Self { patterns }
    }

    /// 返回命中的第一个敏感子串
    pub fn find(&self, source: &str) -> Option<&str> {
        let lowered = source.to_lowercase();
        self.patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(|p| p.as_str())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for Denylist {
    fn default() -> Self {
        Self::with_extra(&[])
    }
}

/// 检查语法树只包含白名单内的调用
pub fn check_structure(expr: &Expr) -> Result<(), EvalError> {
    match expr {
        Expr::Literal(_) | Expr::Name(_) => Ok(()),
        Expr::List(items) => items.iter().try_for_each(check_structure),
        Expr::Dict(entries) => entries.iter().try_for_each(|(key, value)| {
            check_structure(key)?;
            check_structure(value)
        }),
        Expr::Unary { operand, .. } => check_structure(operand),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            check_structure(left)?;
            check_structure(right)
        }
        Expr::Compare { left, comparisons } => {
            check_structure(left)?;
            comparisons
                .iter()
                .try_for_each(|(_, right)| check_structure(right))
        }
        Expr::Subscript { value, index } => {
            check_structure(value)?;
            check_structure(index)
        }
        Expr::Attribute { attr, .. } => Err(EvalError::Security(format!(
            "不允许访问属性 '{}'（只能调用白名单内的方法）",
            attr
        ))),
        Expr::Call { func, args } => {
            match func.as_ref() {
                Expr::Name(name) => {
                    if !ALLOWED_FUNCTIONS.contains(&name.as_str()) {
                        return Err(EvalError::Security(format!(
                            "不允许调用函数 '{}'",
                            name
                        )));
                    }
                }
                Expr::Attribute { value, attr } => {
                    if !ALLOWED_METHODS.contains(&attr.as_str()) {
                        return Err(EvalError::Security(format!(
                            "不允许调用方法 '{}'",
                            attr
                        )));
                    }
                    check_structure(value)?;
                }
                other => {
                    return Err(EvalError::Security(format!(
                        "不允许调用 {} 表达式的结果",
                        other.kind()
                    )));
                }
            }
            args.iter().try_for_each(check_structure)
        }
    }
}
