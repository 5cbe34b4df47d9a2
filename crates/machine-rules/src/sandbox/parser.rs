//! 表达式语法分析
//!
//! 递归下降解析器，优先级与 Python 表达式一致：
//! `or` < `and` < `not` < 比较 < `+ -` < `* / %` < 一元 `+ -` < `**` < 下标/调用。
//!
//! 语句关键字和白名单之外的操作符在解析前的记号扫描中即被拒绝，
//! 因此 `lambda x: x` 之类的输入报告的是安全错误而不是语法错误。

use super::ast::Expr;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::EvalError;
use crate::operators::{BinaryOp, CompareOp, LogicalOperator, UnaryOp};
use serde_json::{Number, Value};

/// 不允许出现在表达式中的语句/控制流关键字
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "import", "from", "def", "class", "lambda", "for", "while", "if", "else", "elif", "with",
    "yield", "return", "global", "nonlocal", "del", "pass", "async", "await", "try", "except",
    "finally", "raise", "assert", "is", "as", "break", "continue", "match", "case",
];

/// 解析表达式源码
pub fn parse(source: &str, max_depth: usize) -> Result<Expr, EvalError> {
    let tokens = Lexer::new(source).tokenize()?;
    reject_forbidden_tokens(&tokens)?;

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.parse_expression()?;

    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(EvalError::Syntax(format!(
            "位置 {} 出现多余的记号 {}",
            trailing.pos,
            describe(&trailing.kind)
        )));
    }

    Ok(expr)
}

fn reject_forbidden_tokens(tokens: &[Token]) -> Result<(), EvalError> {
    for token in tokens {
        match &token.kind {
            TokenKind::Name(name) if FORBIDDEN_KEYWORDS.contains(&name.as_str()) => {
                return Err(EvalError::Security(format!(
                    "位置 {} 不允许使用关键字 '{}'",
                    token.pos, name
                )));
            }
            TokenKind::Forbidden(op) => {
                return Err(EvalError::Security(format!(
                    "位置 {} 不允许使用操作符 '{}'",
                    token.pos, op
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Int(v) => format!("整数 {}", v),
        TokenKind::Float(v) => format!("浮点数 {}", v),
        TokenKind::Str(s) => format!("字符串 {:?}", s),
        TokenKind::Name(n) => format!("名称 '{}'", n),
        TokenKind::Forbidden(op) => format!("'{}'", op),
        TokenKind::Eof => "表达式结尾".to_string(),
        other => format!("{:?}", other),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn parse_expression(&mut self) -> Result<Expr, EvalError> {
        self.nested(|p| p.parse_or())
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        let mut height = None;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            self.grow(&mut height, &left, right.height())?;
            left = Expr::Logical {
                op: LogicalOperator::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_not()?;
        let mut height = None;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            self.grow(&mut height, &left, right.height())?;
            left = Expr::Logical {
                op: LogicalOperator::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat_keyword("not") {
            let operand = self.nested(|p| p.parse_not())?;
            self.check_height(operand.height() + 1)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let left = self.parse_arith()?;
        let mut comparisons = Vec::new();

        loop {
            let (op, width) = match &self.peek().kind {
                TokenKind::EqEq => (CompareOp::Eq, 1),
                TokenKind::NotEq => (CompareOp::NotEq, 1),
                TokenKind::Lt => (CompareOp::Lt, 1),
                TokenKind::Gt => (CompareOp::Gt, 1),
                TokenKind::LtE => (CompareOp::LtE, 1),
                TokenKind::GtE => (CompareOp::GtE, 1),
                TokenKind::Name(n) if n == "in" => (CompareOp::In, 1),
                TokenKind::Name(n) if n == "not" && self.peek_name_at(1) == Some("in") => {
                    (CompareOp::NotIn, 2)
                }
                _ => break,
            };
            for _ in 0..width {
                self.advance();
            }
            comparisons.push((op, self.parse_arith()?));
        }

        if comparisons.is_empty() {
            return Ok(left);
        }
        let expr = Expr::Compare {
            left: Box::new(left),
            comparisons,
        };
        self.check_height(expr.height())?;
        Ok(expr)
    }

    fn parse_arith(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_term()?;
        let mut height = None;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            self.grow(&mut height, &left, right.height())?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        let mut height = None;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            self.grow(&mut height, &left, right.height())?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.nested(|p| p.parse_unary())?;
        self.check_height(operand.height() + 1)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> Result<Expr, EvalError> {
        let base = self.parse_postfix()?;
        if self.peek().kind == TokenKind::DoubleStar {
            self.advance();
            // `**` 右结合，且右侧允许一元负号：2 ** -1
            let exponent = self.nested(|p| p.parse_unary())?;
            self.check_height(base.height().max(exponent.height()) + 1)?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_atom()?;
        let mut height = None;
        loop {
            match self.peek().kind {
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    self.grow(&mut height, &expr, index.height())?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let token = self.advance();
                    let attr = match token.kind {
                        TokenKind::Name(attr) => attr,
                        other => {
                            return Err(EvalError::Syntax(format!(
                                "位置 {} 的 '.' 之后需要名称，实际为 {}",
                                token.pos,
                                describe(&other)
                            )));
                        }
                    };
                    self.grow(&mut height, &expr, 0)?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_args()?;
                    let widest = args.iter().map(Expr::height).max().unwrap_or(0);
                    self.grow(&mut height, &expr, widest)?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RParen {
                self.advance();
                return Ok(args);
            }
            args.push(self.parse_expression()?);
            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {}
                _ => return Err(self.unexpected("',' 或 ')'")),
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, EvalError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Int(v) => Ok(Expr::Literal(Value::from(v))),
            TokenKind::Float(v) => Number::from_f64(v)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| {
                    EvalError::Syntax(format!("位置 {} 的浮点数字面量超出范围", token.pos))
                }),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Name(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
                "None" | "null" => Ok(Expr::Literal(Value::Null)),
                "and" | "or" | "not" | "in" => Err(EvalError::Syntax(format!(
                    "位置 {} 出现意外的关键字 '{}'",
                    token.pos, name
                ))),
                _ => Ok(Expr::Name(name)),
            },
            TokenKind::LParen => {
                if self.peek().kind == TokenKind::RParen {
                    return Err(EvalError::Syntax(format!(
                        "位置 {} 不支持空元组",
                        token.pos
                    )));
                }
                let inner = self.parse_expression()?;
                if self.peek().kind == TokenKind::Comma {
                    return Err(EvalError::Syntax(format!(
                        "位置 {} 不支持元组，请使用列表",
                        token.pos
                    )));
                }
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_dict(),
            other => Err(EvalError::Syntax(format!(
                "位置 {} 出现意外的 {}",
                token.pos,
                describe(&other)
            ))),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, EvalError> {
        let mut items = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RBracket {
                self.advance();
                let expr = Expr::List(items);
                self.check_height(expr.height())?;
                return Ok(expr);
            }
            items.push(self.parse_expression()?);
            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBracket => {}
                _ => return Err(self.unexpected("',' 或 ']'")),
            }
        }
    }

    fn parse_dict(&mut self) -> Result<Expr, EvalError> {
        let mut entries = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RBrace {
                self.advance();
                let expr = Expr::Dict(entries);
                self.check_height(expr.height())?;
                return Ok(expr);
            }
            let key = self.parse_expression()?;
            self.expect(TokenKind::Colon, "':'")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBrace => {}
                _ => return Err(self.unexpected("',' 或 '}'")),
            }
        }
    }

    /// 进入一层嵌套，超过最大深度时以安全错误拒绝
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        self.depth += 1;
        let result = self.check_depth(0).and_then(|()| f(self));
        self.depth -= 1;
        result
    }

    fn check_depth(&self, extra: usize) -> Result<(), EvalError> {
        if self.depth + extra > self.max_depth {
            return Err(EvalError::Security(format!(
                "表达式嵌套深度超过限制 {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    /// 语法树高度不得超过 max_depth，求值与安全检查的递归深度以此为界
    fn check_height(&self, height: usize) -> Result<(), EvalError> {
        if height > self.max_depth {
            return Err(EvalError::Security(format!(
                "表达式语法树高度 {} 超过限制 {}",
                height, self.max_depth
            )));
        }
        Ok(())
    }

    /// 左结合链再加一层：新节点高度为 max(左侧, 右侧) + 1
    ///
    /// `height` 缓存链上当前左侧的高度，首次使用时才计算。
    fn grow(&self, height: &mut Option<usize>, left: &Expr, right: usize) -> Result<(), EvalError> {
        let base = height.unwrap_or_else(|| left.height());
        let grown = base.max(right) + 1;
        self.check_height(grown)?;
        *height = Some(grown);
        Ok(())
    }

    fn peek(&self) -> &Token {
        // tokens 总以 Eof 结尾，pos 不会越过它
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_name_at(&self, offset: usize) -> Option<&str> {
        match self.tokens.get(self.pos + offset).map(|t| &t.kind) {
            Some(TokenKind::Name(n)) => Some(n.as_str()),
            _ => None,
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_name_at(0) == Some(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<(), EvalError> {
        if self.peek().kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> EvalError {
        let token = self.peek();
        EvalError::Syntax(format!(
            "位置 {} 需要 {}，实际为 {}",
            token.pos,
            expected,
            describe(&token.kind)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_ok(source: &str) -> Expr {
        parse(source, 64).unwrap()
    }

    #[test]
    fn test_precedence() {
        let expr = parse_ok("1 + 2 * 3");
        match expr {
            Expr::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOp::Add);
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = parse_ok("-2 ** 2");
        assert!(matches!(
            expr,
            Expr::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn test_comparison_chain() {
        match parse_ok("0 < x <= 10") {
            Expr::Compare { comparisons, .. } => {
                assert_eq!(comparisons.len(), 2);
                assert_eq!(comparisons[0].0, CompareOp::Lt);
                assert_eq!(comparisons[1].0, CompareOp::LtE);
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_not_in() {
        match parse_ok("'a' not in tags") {
            Expr::Compare { comparisons, .. } => {
                assert_eq!(comparisons[0].0, CompareOp::NotIn);
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_method_call_tree() {
        match parse_ok("fact.get('amount', 0)") {
            Expr::Call { func, args } => {
                assert!(matches!(*func, Expr::Attribute { ref attr, .. } if attr == "get"));
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_ok("True"), Expr::Literal(json!(true)));
        assert_eq!(parse_ok("null"), Expr::Literal(json!(null)));
        assert!(matches!(parse_ok("[1, 2, 3,]"), Expr::List(items) if items.len() == 3));
        assert!(matches!(parse_ok("{'a': 1, 'b': 2}"), Expr::Dict(entries) if entries.len() == 2));
    }

    #[test]
    fn test_forbidden_keyword_is_security_error() {
        assert!(matches!(parse("lambda x: x", 64), Err(EvalError::Security(_))));
        assert!(matches!(parse("[x for x in y]", 64), Err(EvalError::Security(_))));
        assert!(matches!(parse("a if b else c", 64), Err(EvalError::Security(_))));
        assert!(matches!(parse("x = 1", 64), Err(EvalError::Security(_))));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("x +", 64), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("(1, 2)", 64), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("1 2", 64), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("", 64), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(parse(&deep, 64), Err(EvalError::Security(_))));

        let long_chain = vec!["1"; 200].join(" + ");
        assert!(matches!(parse(&long_chain, 64), Err(EvalError::Security(_))));

        let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse(&shallow, 64).is_ok());
    }

    #[test]
    fn test_height_counts_chains_across_parentheses() {
        // 每层括号内 10 个加法，4 层叠加后高度 41
        let mut source = "1".to_string();
        for _ in 0..4 {
            source = format!("({}){}", source, " + 1".repeat(10));
        }
        assert_eq!(parse(&source, 64).unwrap().height(), 41);
        assert!(matches!(parse(&source, 40), Err(EvalError::Security(_))));

        let postfix = format!("x{}", "[0]".repeat(30));
        assert!(parse(&postfix, 31).is_ok());
        assert!(matches!(parse(&postfix, 30), Err(EvalError::Security(_))));

        let unary = format!("{}(1 + 1 + 1)", "-".repeat(20));
        assert!(matches!(parse(&unary, 22), Err(EvalError::Security(_))));
    }
}
