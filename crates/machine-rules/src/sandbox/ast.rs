//! 受限语法树
//!
//! 节点种类是封闭的：字面量、容器字面量、名称引用、算术/比较/逻辑运算、
//! 下标访问、属性访问与调用。属性访问和调用能否出现由 `policy` 决定。

use crate::operators::{BinaryOp, CompareOp, LogicalOperator, UnaryOp};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// 比较链，如 `0 < x <= 10`
    Compare {
        left: Box<Expr>,
        comparisons: Vec<(CompareOp, Expr)>,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// 节点种类名称，用于错误信息
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Literal(_) => "literal",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Name(_) => "name",
            Self::Unary { .. } => "unary",
            Self::Binary { .. } => "binary",
            Self::Logical { .. } => "logical",
            Self::Compare { .. } => "compare",
            Self::Subscript { .. } => "subscript",
            Self::Attribute { .. } => "attribute",
            Self::Call { .. } => "call",
        }
    }

    /// 语法树高度，叶子节点为 1
    pub fn height(&self) -> usize {
        let children = match self {
            Self::Literal(_) | Self::Name(_) => 0,
            Self::List(items) => items.iter().map(Self::height).max().unwrap_or(0),
            Self::Dict(entries) => entries
                .iter()
                .map(|(key, value)| key.height().max(value.height()))
                .max()
                .unwrap_or(0),
            Self::Unary { operand, .. } => operand.height(),
            Self::Binary { left, right, .. } | Self::Logical { left, right, .. } => {
                left.height().max(right.height())
            }
            Self::Compare { left, comparisons } => comparisons
                .iter()
                .map(|(_, right)| right.height())
                .fold(left.height(), usize::max),
            Self::Subscript { value, index } => value.height().max(index.height()),
            Self::Attribute { value, .. } => value.height(),
            Self::Call { func, args } => args
                .iter()
                .map(Self::height)
                .fold(func.height(), usize::max),
        };
        children + 1
    }

    /// 收集表达式引用的所有变量名（不含函数名和方法名）
    pub fn collect_names(&self, names: &mut BTreeSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::List(items) => {
                for item in items {
                    item.collect_names(names);
                }
            }
            Self::Dict(entries) => {
                for (key, value) in entries {
                    key.collect_names(names);
                    value.collect_names(names);
                }
            }
            Self::Name(name) => {
                names.insert(name.clone());
            }
            Self::Unary { operand, .. } => operand.collect_names(names),
            Self::Binary { left, right, .. } | Self::Logical { left, right, .. } => {
                left.collect_names(names);
                right.collect_names(names);
            }
            Self::Compare { left, comparisons } => {
                left.collect_names(names);
                for (_, right) in comparisons {
                    right.collect_names(names);
                }
            }
            Self::Subscript { value, index } => {
                value.collect_names(names);
                index.collect_names(names);
            }
            Self::Attribute { value, .. } => value.collect_names(names),
            Self::Call { func, args } => {
                // 被调用的函数名不是变量引用
                if !matches!(func.as_ref(), Self::Name(_)) {
                    func.collect_names(names);
                }
                for arg in args {
                    arg.collect_names(names);
                }
            }
        }
    }
}
