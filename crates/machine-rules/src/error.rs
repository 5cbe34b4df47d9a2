//! 规则引擎错误类型
//!
//! 所有对外暴露的错误都归于 [`RuleError`] 一个根类型；沙箱求值器自身的
//! [`EvalError`] 在规则/会话边界被映射到对应的 `RuleError` 变体。

use thiserror::Error;

/// 沙箱求值错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// 表达式无法解析
    #[error("表达式语法错误: {0}")]
    Syntax(String),

    /// 表达式命中黑名单或使用了白名单之外的语法结构
    #[error("表达式被安全策略拒绝: {0}")]
    Security(String),

    /// 求值过程中的运行时错误（缺失键、类型不匹配、除零等）
    #[error("表达式求值失败: {0}")]
    Runtime(String),

    /// 求值结果超出资源限制
    #[error("表达式超出资源限制: {0}")]
    Limit(String),
}

impl EvalError {
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则校验失败: {0}")]
    Validation(String),

    #[error("安全校验失败: {0}")]
    Security(String),

    #[error("规则执行失败: rule={rule}, fact_index={fact_index}: {message}")]
    Execution {
        rule: String,
        fact_index: usize,
        message: String,
    },

    #[error("会话错误: {0}")]
    Session(String),

    #[error("规则集未找到: {0}")]
    NotFound(String),

    #[error("规则文档加载失败: {0}")]
    Load(String),
}

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Security(_) => "SECURITY_ERROR",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::Session(_) => "SESSION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Load(_) => "LOAD_ERROR",
        }
    }

    /// 是否为安全类错误（调用方可单独告警）
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }

    /// 将构造期的表达式错误映射为规则错误
    ///
    /// 安全拒绝保持为 `Security`，其余一律视为校验失败。
    pub(crate) fn from_compile(rule: &str, part: &str, err: EvalError) -> Self {
        match err {
            EvalError::Security(msg) => {
                Self::Security(format!("规则 '{}' 的 {}: {}", rule, part, msg))
            }
            other => Self::Validation(format!("规则 '{}' 的 {}: {}", rule, part, other)),
        }
    }

    /// 将执行期的表达式错误映射为规则错误
    pub(crate) fn from_eval(rule: &str, fact_index: usize, err: EvalError) -> Self {
        match err {
            EvalError::Security(msg) => Self::Security(format!(
                "规则 '{}' 在事实 #{} 上被拒绝: {}",
                rule, fact_index, msg
            )),
            other => Self::Execution {
                rule: rule.to_string(),
                fact_index,
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_yaml::Error> for RuleError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Load(format!("YAML 解析失败: {}", err))
    }
}

impl From<csv::Error> for RuleError {
    fn from(err: csv::Error) -> Self {
        Self::Load(format!("决策表解析失败: {}", err))
    }
}

impl From<std::io::Error> for RuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Load(format!("读取文件失败: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
