//! 白名单内置函数与方法

use super::value::{as_key, as_num, compare_values, display, is_truthy, type_name, Num};
use crate::error::EvalError;
use serde_json::Value;
use std::cmp::Ordering;

/// 允许直接调用的内置函数
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    "len", "str", "int", "float", "bool", "min", "max", "abs", "round", "sum",
];

/// 允许在值上调用的方法
pub const ALLOWED_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "lower",
    "upper",
    "strip",
    "startswith",
    "endswith",
];

/// 调用内置函数
pub fn call_function(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "len" => {
            let [value] = expect_args::<1>(name, args)?;
            let len = match &value {
                Value::String(s) => s.chars().count(),
                Value::Array(arr) => arr.len(),
                Value::Object(obj) => obj.len(),
                other => {
                    return Err(EvalError::Runtime(format!(
                        "{} 类型没有长度",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::from(len))
        }
        "str" => {
            let [value] = expect_args::<1>(name, args)?;
            Ok(Value::String(display(&value)))
        }
        "bool" => {
            let [value] = expect_args::<1>(name, args)?;
            Ok(Value::Bool(is_truthy(&value)))
        }
        "int" => {
            let [value] = expect_args::<1>(name, args)?;
            to_int(&value).map(Value::from)
        }
        "float" => {
            let [value] = expect_args::<1>(name, args)?;
            Num::Float(to_float(&value)?).into_value()
        }
        "abs" => {
            let [value] = expect_args::<1>(name, args)?;
            match numeric(name, &value)? {
                Num::Int(i) => i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| EvalError::Limit("abs() 整数溢出".to_string())),
                Num::Float(f) => Num::Float(f.abs()).into_value(),
            }
        }
        "round" => round(args),
        "sum" => sum(args),
        "min" => extremum(name, args, Ordering::Less),
        "max" => extremum(name, args, Ordering::Greater),
        other => Err(EvalError::Security(format!("不允许调用函数 '{}'", other))),
    }
}

/// 调用值上的方法
pub fn call_method(receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match (receiver, method) {
        (Value::Object(obj), "get") => {
            if args.is_empty() || args.len() > 2 {
                return Err(arity_error(method, "1 到 2", args.len()));
            }
            let mut args = args.into_iter();
            let key = args.next().map(|k| as_key(&k)).transpose()?;
            let default = args.next().unwrap_or(Value::Null);
            Ok(key
                .and_then(|k| obj.get(&k).cloned())
                .unwrap_or(default))
        }
        (Value::Object(obj), "keys") => {
            expect_args::<0>(method, args)?;
            Ok(Value::Array(
                obj.keys().map(|k| Value::String(k.clone())).collect(),
            ))
        }
        (Value::Object(obj), "values") => {
            expect_args::<0>(method, args)?;
            Ok(Value::Array(obj.values().cloned().collect()))
        }
        (Value::String(s), "lower") => {
            expect_args::<0>(method, args)?;
            Ok(Value::String(s.to_lowercase()))
        }
        (Value::String(s), "upper") => {
            expect_args::<0>(method, args)?;
            Ok(Value::String(s.to_uppercase()))
        }
        (Value::String(s), "strip") => {
            expect_args::<0>(method, args)?;
            Ok(Value::String(s.trim().to_string()))
        }
        (Value::String(s), "startswith" | "endswith") => {
            let [affix] = expect_args::<1>(method, args)?;
            let Value::String(affix) = affix else {
                return Err(EvalError::Runtime(format!(
                    "{}() 的参数必须是 str，实际为 {}",
                    method,
                    type_name(&affix)
                )));
            };
            let matched = if method == "startswith" {
                s.starts_with(affix.as_str())
            } else {
                s.ends_with(affix.as_str())
            };
            Ok(Value::Bool(matched))
        }
        (_, method) if !ALLOWED_METHODS.contains(&method) => {
            Err(EvalError::Security(format!("不允许调用方法 '{}'", method)))
        }
        (other, method) => Err(EvalError::Runtime(format!(
            "{} 对象没有方法 '{}'",
            type_name(other),
            method
        ))),
    }
}

fn expect_args<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], EvalError> {
    let count = args.len();
    args.try_into()
        .map_err(|_| arity_error(name, &N.to_string(), count))
}

fn arity_error(name: &str, expected: &str, actual: usize) -> EvalError {
    EvalError::Runtime(format!(
        "{}() 需要 {} 个参数，实际传入 {} 个",
        name, expected, actual
    ))
}

fn numeric(name: &str, value: &Value) -> Result<Num, EvalError> {
    as_num(value).ok_or_else(|| {
        EvalError::Runtime(format!(
            "{}() 需要数值参数，实际为 {}",
            name,
            type_name(value)
        ))
    })
}

fn float_to_int(f: f64) -> Result<i64, EvalError> {
    let truncated = f.trunc();
    if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(EvalError::Limit(format!("浮点数 {} 超出整数范围", f)));
    }
    Ok(truncated as i64)
}

fn to_int(value: &Value) -> Result<i64, EvalError> {
    match value {
        Value::String(s) => {
            let text: String = s.trim().chars().filter(|c| *c != '_').collect();
            text.parse::<i64>().map_err(|_| {
                EvalError::Runtime(format!("无法将 '{}' 转换为 int", s))
            })
        }
        other => match numeric("int", other)? {
            Num::Int(i) => Ok(i),
            Num::Float(f) => float_to_int(f),
        },
    }
}

fn to_float(value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| EvalError::Runtime(format!("无法将 '{}' 转换为 float", s))),
        other => Ok(numeric("float", other)?.as_f64()),
    }
}

fn round(args: Vec<Value>) -> Result<Value, EvalError> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error("round", "1 到 2", args.len()));
    }
    let number = numeric("round", &args[0])?;
    let digits = match args.get(1) {
        None | Some(Value::Null) => None,
        Some(d) => Some(to_int(d)?),
    };

    match (number, digits) {
        (Num::Int(i), None) => Ok(Value::from(i)),
        // 与 Python 一致：银行家舍入，不带位数时返回 int
        (Num::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::from),
        (Num::Int(i), Some(d)) if d >= 0 => Ok(Value::from(i)),
        (Num::Int(i), Some(d)) => {
            let factor = 10f64.powi(d.unsigned_abs().min(308) as i32);
            float_to_int(((i as f64) / factor).round_ties_even() * factor).map(Value::from)
        }
        (Num::Float(f), Some(d)) => {
            let factor = 10f64.powi(d.clamp(-308, 308) as i32);
            let rounded = (f * factor).round_ties_even() / factor;
            Num::Float(if rounded.is_finite() { rounded } else { f }).into_value()
        }
    }
}

fn sum(args: Vec<Value>) -> Result<Value, EvalError> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error("sum", "1 到 2", args.len()));
    }
    let mut args = args.into_iter();
    let items = match args.next() {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(EvalError::Runtime(format!(
                "sum() 需要 list 参数，实际为 {}",
                type_name(&other)
            )));
        }
        None => Vec::new(),
    };
    let mut total = match args.next() {
        Some(start) => numeric("sum", &start)?,
        None => Num::Int(0),
    };

    for item in &items {
        total = match (total, numeric("sum", item)?) {
            (Num::Int(a), Num::Int(b)) => Num::Int(
                a.checked_add(b)
                    .ok_or_else(|| EvalError::Limit("sum() 整数溢出".to_string()))?,
            ),
            (a, b) => Num::Float(a.as_f64() + b.as_f64()),
        };
    }
    total.into_value()
}

/// `min` / `max`：`wanted` 为 Less 时取最小值
fn extremum(name: &str, args: Vec<Value>, wanted: Ordering) -> Result<Value, EvalError> {
    let candidates = match args.len() {
        0 => return Err(arity_error(name, "至少 1", 0)),
        1 => match args.into_iter().next() {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(EvalError::Runtime(format!(
                    "{}() 的单个参数必须是 list，实际为 {}",
                    name,
                    type_name(&other)
                )));
            }
            None => Vec::new(),
        },
        _ => args,
    };

    let mut iter = candidates.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| EvalError::Runtime(format!("{}() 的参数是空序列", name)))?;
    for candidate in iter {
        if compare_values(&candidate, &best)? == wanted {
            best = candidate;
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Value>) -> Value {
        call_function(name, args).unwrap()
    }

    #[test]
    fn test_len_and_conversions() {
        assert_eq!(call("len", vec![json!("中文")]), json!(2));
        assert_eq!(call("len", vec![json!([1, 2, 3])]), json!(3));
        assert_eq!(call("int", vec![json!(" 42 ")]), json!(42));
        assert_eq!(call("int", vec![json!(-3.9)]), json!(-3));
        assert_eq!(call("float", vec![json!("2.5")]), json!(2.5));
        assert_eq!(call("str", vec![json!(true)]), json!("True"));
        assert_eq!(call("bool", vec![json!([])]), json!(false));
        assert!(call_function("int", vec![json!("abc")]).is_err());
        assert!(call_function("float", vec![json!("inf")]).is_err());
    }

    #[test]
    fn test_min_max_sum() {
        assert_eq!(call("min", vec![json!(3), json!(1), json!(2)]), json!(1));
        assert_eq!(call("max", vec![json!([1, 5.5, 2])]), json!(5.5));
        assert_eq!(call("sum", vec![json!([1, 2, 3])]), json!(6));
        assert_eq!(call("sum", vec![json!([1, 2.5])]), json!(3.5));
        assert_eq!(call("sum", vec![json!([]), json!(10)]), json!(10));
        assert!(call_function("max", vec![json!([])]).is_err());
        assert!(call_function("min", vec![]).is_err());
    }

    #[test]
    fn test_round_ties_even() {
        assert_eq!(call("round", vec![json!(2.5)]), json!(2));
        assert_eq!(call("round", vec![json!(3.5)]), json!(4));
        assert_eq!(call("round", vec![json!(1.2345), json!(2)]), json!(1.23));
        assert_eq!(call("round", vec![json!(1250), json!(-2)]), json!(1200));
        assert_eq!(call("abs", vec![json!(-7)]), json!(7));
    }

    #[test]
    fn test_methods() {
        let obj = json!({"a": 1, "b": 2});
        assert_eq!(call_method(&obj, "get", vec![json!("a")]).unwrap(), json!(1));
        assert_eq!(
            call_method(&obj, "get", vec![json!("z"), json!(0)]).unwrap(),
            json!(0)
        );
        assert_eq!(call_method(&obj, "get", vec![json!("z")]).unwrap(), json!(null));
        assert_eq!(call_method(&obj, "keys", vec![]).unwrap(), json!(["a", "b"]));
        assert_eq!(call_method(&obj, "values", vec![]).unwrap(), json!([1, 2]));

        let s = json!("  Hello ");
        assert_eq!(call_method(&s, "strip", vec![]).unwrap(), json!("Hello"));
        assert_eq!(call_method(&s, "upper", vec![]).unwrap(), json!("  HELLO "));
        assert_eq!(
            call_method(&json!("premium"), "startswith", vec![json!("pre")]).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_method_on_wrong_type() {
        assert!(matches!(
            call_method(&json!([1]), "get", vec![json!(0)]),
            Err(EvalError::Runtime(_))
        ));
        assert!(matches!(
            call_method(&json!({}), "pop", vec![]),
            Err(EvalError::Security(_))
        ));
    }
}
