//! 表达式词法分析
//!
//! 只识别受限表达式语言需要的记号；赋值、位运算等不在白名单内的操作符
//! 被识别为 [`TokenKind::Forbidden`]，由语法分析阶段统一以安全错误拒绝。

use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    DoubleStar,

    EqEq,
    NotEq,
    Lt,
    Gt,
    LtE,
    GtE,

    /// 白名单之外的操作符（`=`、`//`、`&`、`;` 等）
    Forbidden(String),

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 记号在源码中的字节偏移
    pub pos: usize,
}

pub struct Lexer<'a> {
    input: &'a [u8],
    source: &'a str,
    cursor: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            input: source.as_bytes(),
            source,
            cursor: 0,
        }
    }

    /// 将整个源码切分为记号序列，末尾总是 `Eof`
    pub fn tokenize(mut self) -> Result<Vec<Token>, EvalError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let pos = self.cursor;
            let Some(byte) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                });
                return Ok(tokens);
            };

            let kind = match byte {
                b'0'..=b'9' => self.lex_number()?,
                b'.' if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => {
                    self.lex_number()?
                }
                b'\'' | b'"' => self.lex_string(byte)?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_name(),
                _ => self.lex_punct()?,
            };
            tokens.push(Token { kind, pos });
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.cursor += 1;
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, EvalError> {
        let start = self.cursor;
        let mut is_float = false;

        self.consume_digits();
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.cursor += 1;
            self.consume_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign_offset).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.cursor += 1 + sign_offset;
                self.consume_digits();
            }
        }
        if self.peek().is_some_and(|b| b.is_ascii_alphabetic() || b == b'_') {
            return Err(EvalError::Syntax(format!(
                "位置 {} 的数字字面量无效",
                start
            )));
        }

        let text: String = self.source[start..self.cursor]
            .chars()
            .filter(|c| *c != '_')
            .collect();

        if is_float {
            let value: f64 = text.parse().map_err(|_| {
                EvalError::Syntax(format!("位置 {} 的浮点数字面量无效: {}", start, text))
            })?;
            Ok(TokenKind::Float(value))
        } else {
            let value: i64 = text.parse().map_err(|_| {
                EvalError::Syntax(format!("位置 {} 的整数字面量无效或溢出: {}", start, text))
            })?;
            Ok(TokenKind::Int(value))
        }
    }

    fn consume_digits(&mut self) {
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_digit() || b == b'_')
        {
            self.cursor += 1;
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<TokenKind, EvalError> {
        let start = self.cursor;
        self.cursor += 1;
        let mut parsed = String::new();

        loop {
            let remaining = &self.source[self.cursor..];
            let Some(current) = remaining.chars().next() else {
                return Err(EvalError::Syntax(format!(
                    "位置 {} 的字符串未闭合",
                    start
                )));
            };
            self.cursor += current.len_utf8();

            match current {
                c if c as u32 == quote as u32 => break,
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(EvalError::Syntax(format!(
                            "位置 {} 的字符串未闭合",
                            start
                        )));
                    };
                    self.cursor += 1;
                    let translated = match escaped {
                        b'\\' => '\\',
                        b'\'' => '\'',
                        b'"' => '"',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        other => {
                            return Err(EvalError::Syntax(format!(
                                "位置 {} 的转义序列无效: \\{}",
                                self.cursor - 2,
                                other as char
                            )));
                        }
                    };
                    parsed.push(translated);
                }
                _ => parsed.push(current),
            }
        }

        Ok(TokenKind::Str(parsed))
    }

    fn lex_name(&mut self) -> TokenKind {
        let start = self.cursor;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.cursor += 1;
        }
        TokenKind::Name(self.source[start..self.cursor].to_string())
    }

    fn lex_punct(&mut self) -> Result<TokenKind, EvalError> {
        let start = self.cursor;
        let byte = self.input[start];
        let next = self.peek_at(1);

        // 先匹配双字符操作符
        let two = match (byte, next) {
            (b'*', Some(b'*')) => Some(TokenKind::DoubleStar),
            (b'=', Some(b'=')) => Some(TokenKind::EqEq),
            (b'!', Some(b'=')) => Some(TokenKind::NotEq),
            (b'<', Some(b'=')) => Some(TokenKind::LtE),
            (b'>', Some(b'=')) => Some(TokenKind::GtE),
            (b'/', Some(b'/')) => Some(TokenKind::Forbidden("//".to_string())),
            (b':', Some(b'=')) => Some(TokenKind::Forbidden(":=".to_string())),
            (b'<', Some(b'<')) => Some(TokenKind::Forbidden("<<".to_string())),
            (b'>', Some(b'>')) => Some(TokenKind::Forbidden(">>".to_string())),
            (b'-', Some(b'>')) => Some(TokenKind::Forbidden("->".to_string())),
            (b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'|' | b'^' | b'@', Some(b'=')) => Some(
                TokenKind::Forbidden(format!("{}=", byte as char)),
            ),
            _ => None,
        };
        if let Some(kind) = two {
            self.cursor += 2;
            return Ok(kind);
        }

        let kind = match byte {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'<' => TokenKind::Lt,
            b'>' => TokenKind::Gt,
            b'=' | b'&' | b'|' | b'^' | b'~' | b'@' | b';' | b'`' | b'$' | b'!' | b'?' => {
                TokenKind::Forbidden((byte as char).to_string())
            }
            _ => {
                let ch = self.source[start..].chars().next().unwrap_or('?');
                return Err(EvalError::Syntax(format!(
                    "位置 {} 出现非法字符 '{}'",
                    start, ch
                )));
            }
        };
        self.cursor += 1;
        Ok(kind)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.cursor).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.cursor + offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 1_000 .5 1e3"),
            vec![
                TokenKind::Int(1),
                TokenKind::Float(2.5),
                TokenKind::Int(1000),
                TokenKind::Float(0.5),
                TokenKind::Float(1000.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_method_call_on_number_like_name() {
        assert_eq!(
            kinds("fact.get('amount')"),
            vec![
                TokenKind::Name("fact".into()),
                TokenKind::Dot,
                TokenKind::Name("get".into()),
                TokenKind::LParen,
                TokenKind::Str("amount".into()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b" '中文'"#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\"b".into()),
                TokenKind::Str("中文".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a ** 2 >= b != c"),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::DoubleStar,
                TokenKind::Int(2),
                TokenKind::GtE,
                TokenKind::Name("b".into()),
                TokenKind::NotEq,
                TokenKind::Name("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_forbidden_operators() {
        assert!(kinds("x = 1").contains(&TokenKind::Forbidden("=".into())));
        assert!(kinds("x += 1").contains(&TokenKind::Forbidden("+=".into())));
        assert!(kinds("a // b").contains(&TokenKind::Forbidden("//".into())));
        assert!(kinds("a; b").contains(&TokenKind::Forbidden(";".into())));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            Lexer::new("'abc").tokenize(),
            Err(EvalError::Syntax(_))
        ));
    }

    #[test]
    fn test_illegal_character() {
        assert!(matches!(
            Lexer::new("a # comment").tokenize(),
            Err(EvalError::Syntax(_))
        ));
    }

    #[test]
    fn test_overflowing_integer() {
        assert!(matches!(
            Lexer::new("99999999999999999999999").tokenize(),
            Err(EvalError::Syntax(_))
        ));
    }
}
