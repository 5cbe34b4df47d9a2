//! 沙箱表达式求值器
//!
//! 规则条件与动作使用的受限表达式语言：
//! - 字面量：数字、字符串、`True`/`False`/`None`（及小写形式）、列表、字典
//! - 运算：算术、比较链、`in`/`not in`、`and`/`or`/`not`、下标访问
//! - 调用：白名单内的内置函数与方法
//!
//! 任何不在白名单内的语法结构都以 [`EvalError::Security`] 拒绝，
//! 不会执行宿主代码或访问任意属性。

mod ast;
mod builtins;
mod compiler;
mod context;
mod evaluator;
mod lexer;
mod parser;
mod policy;
mod value;

pub use ast::Expr;
pub use builtins::{ALLOWED_FUNCTIONS, ALLOWED_METHODS};
pub use compiler::{CompiledExpression, ExpressionCompiler};
pub use context::EvaluationContext;
pub use parser::FORBIDDEN_KEYWORDS;
pub use policy::{Denylist, DENIED_PATTERNS};
pub use value::is_truthy;

use crate::error::EvalError;
use machine_rules_shared::config::SandboxLimits;
use machine_rules_shared::observability::metrics::EXPRESSION_SECURITY_REJECTIONS_TOTAL;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

static DEFAULT_EVALUATOR: LazyLock<SafeEvaluator> = LazyLock::new(SafeEvaluator::default);

/// 安全表达式求值器
#[derive(Debug, Clone, Default)]
pub struct SafeEvaluator {
    compiler: ExpressionCompiler,
}

impl SafeEvaluator {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            compiler: ExpressionCompiler::new(limits),
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        self.compiler.limits()
    }

    /// 编译表达式，安全拒绝会记录日志和指标
    pub fn compile(&self, expression: &str) -> Result<CompiledExpression, EvalError> {
        self.compiler.compile(expression).inspect_err(|err| {
            if let EvalError::Security(reason) = err {
                metrics::counter!(EXPRESSION_SECURITY_REJECTIONS_TOTAL).increment(1);
                warn!(
                    expression_length = expression.len(),
                    reason = %reason,
                    "表达式被沙箱拒绝"
                );
            }
        })
    }

    /// 只检查表达式能否通过编译，不求值
    pub fn validate(&self, expression: &str) -> bool {
        match self.compile(expression) {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "表达式校验未通过");
                false
            }
        }
    }

    /// 编译并在给定绑定上求值
    pub fn evaluate(
        &self,
        expression: &str,
        bindings: &Map<String, Value>,
    ) -> Result<Value, EvalError> {
        let compiled = self.compile(expression)?;
        compiled.evaluate(&EvaluationContext::new(bindings))
    }

    /// 在给定上下文上求值已编译的表达式
    pub fn evaluate_compiled(
        &self,
        compiled: &CompiledExpression,
        context: &EvaluationContext<'_>,
    ) -> Result<Value, EvalError> {
        compiled.evaluate(context)
    }
}

/// 使用默认限制求值表达式
pub fn safe_eval(expression: &str, bindings: &Map<String, Value>) -> Result<Value, EvalError> {
    DEFAULT_EVALUATOR.evaluate(expression, bindings)
}

/// 使用默认限制检查表达式是否合法
pub fn validate_expression(expression: &str) -> bool {
    DEFAULT_EVALUATOR.validate(expression)
}

/// 默认求值器，供未显式配置限制的规则使用
pub(crate) fn default_evaluator() -> &'static SafeEvaluator {
    &DEFAULT_EVALUATOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_safe_eval_with_bindings() {
        let names = bindings(json!({"fact": {"amount": 100}}));
        assert_eq!(
            safe_eval("fact.get('amount') > 50", &names).unwrap(),
            json!(true)
        );
        assert_eq!(safe_eval("1 + 1", &Map::new()).unwrap(), json!(2));
    }

    #[test]
    fn test_validate_expression() {
        assert!(validate_expression("fact.get('x', 0) >= 0"));
        assert!(!validate_expression("__import__('os')"));
        assert!(!validate_expression("1 +"));
        assert!(!validate_expression(""));
    }

    #[test]
    fn test_security_rejections() {
        let names = Map::new();
        for expression in [
            "__import__('os').system('ls')",
            "eval('1')",
            "open('/etc/passwd')",
            "lambda: 1",
            "().__class__",
            "x = 1",
            "[x for x in range(3)]",
            "getattr(fact, 'x')",
        ] {
            assert!(
                matches!(safe_eval(expression, &names), Err(EvalError::Security(_))),
                "应当拒绝: {}",
                expression
            );
        }
    }

    #[test]
    fn test_undefined_name_is_runtime_error() {
        assert!(matches!(
            safe_eval("missing + 1", &Map::new()),
            Err(EvalError::Runtime(_))
        ));
    }

    #[test]
    fn test_custom_limits() {
        let evaluator = SafeEvaluator::new(SandboxLimits {
            max_depth: 4,
            ..SandboxLimits::default()
        });
        assert!(evaluator.validate("((1))"));
        assert!(!evaluator.validate("((((((((1))))))))"));
        assert_eq!(evaluator.limits().max_depth, 4);
    }
}
