//! 表达式编译器
//!
//! 将表达式源码一次性完成安全检查与解析，得到可重复求值的
//! [`CompiledExpression`]。规则在构造时编译，执行期不再重新解析。

use super::ast::Expr;
use super::context::EvaluationContext;
use super::evaluator::Interpreter;
use super::parser::parse;
use super::policy::{check_structure, Denylist};
use super::value::is_truthy;
use crate::error::EvalError;
use machine_rules_shared::config::SandboxLimits;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// 编译后的表达式
///
/// 克隆代价很低，内部共享语法树；求值时使用编译时的资源限制。
#[derive(Clone)]
pub struct CompiledExpression {
    source: Arc<str>,
    root: Arc<Expr>,
    /// 表达式引用的变量名
    referenced_names: Arc<BTreeSet<String>>,
    limits: Arc<SandboxLimits>,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn referenced_names(&self) -> &BTreeSet<String> {
        &self.referenced_names
    }

    /// 在给定上下文中求值
    pub fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<Value, EvalError> {
        Interpreter::new(*context, &self.limits).eval(&self.root)
    }

    /// 求值并按真值规则转换为布尔
    pub fn evaluate_truthy(&self, context: &EvaluationContext<'_>) -> Result<bool, EvalError> {
        self.evaluate(context).map(|v| is_truthy(&v))
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .field("referenced_names", &self.referenced_names)
            .finish()
    }
}

impl PartialEq for CompiledExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// 表达式编译器
#[derive(Debug, Clone)]
pub struct ExpressionCompiler {
    limits: Arc<SandboxLimits>,
    denylist: Denylist,
}

impl ExpressionCompiler {
    pub fn new(limits: SandboxLimits) -> Self {
        let denylist = Denylist::with_extra(&limits.extra_denied_patterns);
        Self {
            limits: Arc::new(limits),
            denylist,
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub fn denylist(&self) -> &Denylist {
        &self.denylist
    }

    /// 编译表达式
    ///
    /// 检查顺序：空表达式、长度、黑名单、解析（含关键字与深度检查）、结构白名单。
    pub fn compile(&self, source: &str) -> Result<CompiledExpression, EvalError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(EvalError::Syntax("表达式不能为空".to_string()));
        }

        let length = trimmed.chars().count();
        if length > self.limits.max_expression_length {
            return Err(EvalError::Security(format!(
                "表达式长度 {} 超过限制 {}",
                length, self.limits.max_expression_length
            )));
        }

        if let Some(pattern) = self.denylist.find(trimmed) {
            return Err(EvalError::Security(format!(
                "表达式包含禁止的模式 '{}'",
                pattern
            )));
        }

        let root = parse(trimmed, self.limits.max_depth)?;
        check_structure(&root)?;

        let mut referenced_names = BTreeSet::new();
        root.collect_names(&mut referenced_names);

        Ok(CompiledExpression {
            source: Arc::from(trimmed),
            root: Arc::new(root),
            referenced_names: Arc::new(referenced_names),
            limits: Arc::clone(&self.limits),
        })
    }
}

impl Default for ExpressionCompiler {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}
