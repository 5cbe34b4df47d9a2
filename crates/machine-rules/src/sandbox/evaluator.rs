//! 表达式解释器
//!
//! 在已通过安全检查的语法树上求值。语法树高度已由解析阶段限制在 `max_depth` 以内，
//! 这里只负责运行时资源限制（字符串长度、集合大小、整数溢出、幂指数）。

use super::ast::Expr;
use super::builtins::{call_function, call_method};
use super::context::EvaluationContext;
use super::value::{
    as_key, as_num, compare_values, is_truthy, type_name, values_equal, Num,
};
use crate::error::EvalError;
use crate::operators::{BinaryOp, CompareOp, LogicalOperator, UnaryOp};
use machine_rules_shared::config::SandboxLimits;
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub(crate) struct Interpreter<'a> {
    context: EvaluationContext<'a>,
    limits: &'a SandboxLimits,
}

impl<'a> Interpreter<'a> {
    pub fn new(context: EvaluationContext<'a>, limits: &'a SandboxLimits) -> Self {
        Self { context, limits }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => {
                self.check_collection(items.len())?;
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            Expr::Dict(entries) => {
                self.check_collection(entries.len())?;
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = as_key(&self.eval(key)?)?;
                    map.insert(key, self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Name(name) => self
                .context
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalError::Runtime(format!("名称 '{}' 未定义", name))),
            Expr::Unary { op, operand } => self.unary(*op, self.eval(operand)?),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                // 短路求值，返回决定结果的操作数本身
                let left = self.eval(left)?;
                match (op, is_truthy(&left)) {
                    (LogicalOperator::And, false) | (LogicalOperator::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Compare { left, comparisons } => {
                let mut current = self.eval(left)?;
                for (op, right) in comparisons {
                    let right = self.eval(right)?;
                    if !Self::compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Subscript { value, index } => {
                let value = self.eval(value)?;
                let index = self.eval(index)?;
                Self::subscript(value, &index)
            }
            Expr::Attribute { attr, .. } => Err(EvalError::Security(format!(
                "不允许访问属性 '{}'",
                attr
            ))),
            Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = match func.as_ref() {
                    Expr::Name(name) => call_function(name, args)?,
                    Expr::Attribute { value, attr } => {
                        let receiver = self.eval(value)?;
                        call_method(&receiver, attr, args)?
                    }
                    other => {
                        return Err(EvalError::Security(format!(
                            "不允许调用 {} 表达式的结果",
                            other.kind()
                        )));
                    }
                };
                self.check_size(&result)?;
                Ok(result)
            }
        }
    }

    fn unary(&self, op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!is_truthy(&operand)));
        }
        let num = as_num(&operand).ok_or_else(|| {
            EvalError::Runtime(format!(
                "一元运算符 '{}' 不支持 {}",
                op,
                type_name(&operand)
            ))
        })?;
        match (op, num) {
            (UnaryOp::Neg, Num::Int(i)) => i
                .checked_neg()
                .map(Value::from)
                .ok_or_else(|| EvalError::Limit("整数溢出".to_string())),
            (UnaryOp::Neg, Num::Float(f)) => Num::Float(-f).into_value(),
            (_, num) => num.into_value(),
        }
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
        match (op, &left, &right) {
            (BinaryOp::Add, Value::String(a), Value::String(b)) => {
                self.check_string(a.chars().count() + b.chars().count())?;
                Ok(Value::String(format!("{}{}", a, b)))
            }
            (BinaryOp::Add, Value::Array(a), Value::Array(b)) => {
                self.check_collection(a.len() + b.len())?;
                Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            (BinaryOp::Mul, Value::String(s), other) | (BinaryOp::Mul, other, Value::String(s))
                if Self::repeat_count(other).is_some() =>
            {
                let times = Self::repeat_count(other).unwrap_or(0);
                self.check_string(s.chars().count().saturating_mul(times))?;
                Ok(Value::String(s.repeat(times)))
            }
            (BinaryOp::Mul, Value::Array(items), other)
            | (BinaryOp::Mul, other, Value::Array(items))
                if Self::repeat_count(other).is_some() =>
            {
                let times = Self::repeat_count(other).unwrap_or(0);
                self.check_collection(items.len().saturating_mul(times))?;
                Ok(Value::Array(
                    std::iter::repeat_n(items.iter(), times)
                        .flatten()
                        .cloned()
                        .collect(),
                ))
            }
            _ => {
                let (Some(a), Some(b)) = (as_num(&left), as_num(&right)) else {
                    return Err(EvalError::Runtime(format!(
                        "运算符 '{}' 不支持 {} 与 {}",
                        op,
                        type_name(&left),
                        type_name(&right)
                    )));
                };
                self.arithmetic(op, a, b)?.into_value()
            }
        }
    }

    /// 序列重复次数；非整数返回 None，负数按 0 处理
    fn repeat_count(value: &Value) -> Option<usize> {
        match value {
            Value::Bool(_) | Value::Number(_) => match as_num(value)? {
                Num::Int(n) => Some(usize::try_from(n.max(0)).unwrap_or(usize::MAX)),
                Num::Float(_) => None,
            },
            _ => None,
        }
    }

    fn arithmetic(&self, op: BinaryOp, a: Num, b: Num) -> Result<Num, EvalError> {
        let overflow = || EvalError::Limit(format!("整数运算 '{}' 溢出", op));
        let zero_division = || EvalError::Runtime("除数为零".to_string());

        match op {
            BinaryOp::Add => match (a, b) {
                (Num::Int(x), Num::Int(y)) => x.checked_add(y).map(Num::Int).ok_or_else(overflow),
                (x, y) => Ok(Num::Float(x.as_f64() + y.as_f64())),
            },
            BinaryOp::Sub => match (a, b) {
                (Num::Int(x), Num::Int(y)) => x.checked_sub(y).map(Num::Int).ok_or_else(overflow),
                (x, y) => Ok(Num::Float(x.as_f64() - y.as_f64())),
            },
            BinaryOp::Mul => match (a, b) {
                (Num::Int(x), Num::Int(y)) => x.checked_mul(y).map(Num::Int).ok_or_else(overflow),
                (x, y) => Ok(Num::Float(x.as_f64() * y.as_f64())),
            },
            BinaryOp::Div => {
                if b.as_f64() == 0.0 {
                    return Err(zero_division());
                }
                Ok(Num::Float(a.as_f64() / b.as_f64()))
            }
            BinaryOp::Mod => match (a, b) {
                (_, divisor) if divisor.as_f64() == 0.0 => Err(zero_division()),
                (Num::Int(x), Num::Int(y)) => {
                    let r = x.checked_rem(y).ok_or_else(overflow)?;
                    // 余数与除数同号
                    Ok(Num::Int(if r != 0 && (r < 0) != (y < 0) { r + y } else { r }))
                }
                (x, y) => {
                    let (x, y) = (x.as_f64(), y.as_f64());
                    let r = x % y;
                    Ok(Num::Float(if r != 0.0 && (r < 0.0) != (y < 0.0) {
                        r + y
                    } else {
                        r
                    }))
                }
            },
            BinaryOp::Pow => self.power(a, b),
        }
    }

    fn power(&self, base: Num, exponent: Num) -> Result<Num, EvalError> {
        let limit = self.limits.max_power_exponent;
        if exponent.as_f64().abs() > limit as f64 {
            return Err(EvalError::Limit(format!(
                "幂指数 {} 超过限制 {}",
                exponent.as_f64(),
                limit
            )));
        }

        match (base, exponent) {
            (Num::Int(b), Num::Int(e)) if e >= 0 => u32::try_from(e)
                .ok()
                .and_then(|e| b.checked_pow(e))
                .map(Num::Int)
                .ok_or_else(|| EvalError::Limit("整数幂运算溢出".to_string())),
            (b, e) => {
                if b.as_f64() == 0.0 && e.as_f64() < 0.0 {
                    return Err(EvalError::Runtime("0 不能取负数次幂".to_string()));
                }
                let result = b.as_f64().powf(e.as_f64());
                if result.is_nan() {
                    return Err(EvalError::Runtime(format!(
                        "{} 的 {} 次幂不是实数",
                        b.as_f64(),
                        e.as_f64()
                    )));
                }
                if result.is_infinite() {
                    return Err(EvalError::Limit("浮点幂运算溢出".to_string()));
                }
                Ok(Num::Float(result))
            }
        }
    }

    fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
        Ok(match op {
            CompareOp::Eq => values_equal(left, right),
            CompareOp::NotEq => !values_equal(left, right),
            CompareOp::Lt => compare_values(left, right)? == Ordering::Less,
            CompareOp::Gt => compare_values(left, right)? == Ordering::Greater,
            CompareOp::LtE => compare_values(left, right)? != Ordering::Greater,
            CompareOp::GtE => compare_values(left, right)? != Ordering::Less,
            CompareOp::In => Self::contains(right, left)?,
            CompareOp::NotIn => !Self::contains(right, left)?,
        })
    }

    fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
        match container {
            Value::String(haystack) => match item {
                Value::String(needle) => Ok(haystack.contains(needle.as_str())),
                other => Err(EvalError::Runtime(format!(
                    "'in <str>' 的左侧必须是 str，实际为 {}",
                    type_name(other)
                ))),
            },
            Value::Array(items) => Ok(items.iter().any(|candidate| values_equal(candidate, item))),
            Value::Object(obj) => Ok(obj.contains_key(&as_key(item)?)),
            other => Err(EvalError::Runtime(format!(
                "{} 不支持 'in' 运算",
                type_name(other)
            ))),
        }
    }

    fn subscript(value: Value, index: &Value) -> Result<Value, EvalError> {
        match value {
            Value::Object(mut obj) => {
                let key = as_key(index)?;
                obj.remove(&key)
                    .ok_or_else(|| EvalError::Runtime(format!("键 '{}' 不存在", key)))
            }
            Value::Array(mut items) => {
                let position = Self::position(index, items.len())?;
                Ok(items.swap_remove(position))
            }
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let position = Self::position(index, chars.len())?;
                Ok(Value::String(chars[position].to_string()))
            }
            other => Err(EvalError::Runtime(format!(
                "{} 不支持下标访问",
                type_name(&other)
            ))),
        }
    }

    /// 负数索引从末尾计数
    fn position(index: &Value, len: usize) -> Result<usize, EvalError> {
        let Some(Num::Int(i)) = as_num(index) else {
            return Err(EvalError::Runtime(format!(
                "索引必须是 int，实际为 {}",
                type_name(index)
            )));
        };
        let resolved = if i < 0 { len as i64 + i } else { i };
        if resolved < 0 || resolved >= len as i64 {
            return Err(EvalError::Runtime(format!(
                "索引 {} 越界（长度 {}）",
                i, len
            )));
        }
        Ok(resolved as usize)
    }

    fn check_size(&self, value: &Value) -> Result<(), EvalError> {
        match value {
            Value::String(s) => self.check_string(s.chars().count()),
            Value::Array(items) => self.check_collection(items.len()),
            Value::Object(obj) => self.check_collection(obj.len()),
            _ => Ok(()),
        }
    }

    fn check_string(&self, len: usize) -> Result<(), EvalError> {
        if len > self.limits.max_string_length {
            return Err(EvalError::Limit(format!(
                "字符串长度 {} 超过限制 {}",
                len, self.limits.max_string_length
            )));
        }
        Ok(())
    }

    fn check_collection(&self, len: usize) -> Result<(), EvalError> {
        if len > self.limits.max_collection_length {
            return Err(EvalError::Limit(format!(
                "集合长度 {} 超过限制 {}",
                len, self.limits.max_collection_length
            )));
        }
        Ok(())
    }
}
