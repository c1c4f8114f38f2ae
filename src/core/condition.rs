//! Boolean predicates for `when` clauses.
//!
//! ```text
//! expr    := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := "(" expr ")" | operand ( CMP operand )?
//! operand := path | {{ path }} | 'str' | "str" | number | true | false | null
//! ```

use crate::core::error::TemplateError;
use crate::core::template::lookup;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Literal(Value),
    Path(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Evaluate `expr` against `ctx`. An empty expression is true.
pub fn evaluate(expr: &str, ctx: &Value) -> Result<bool, TemplateError> {
    let fail = |message: String| TemplateError::Condition {
        expr: expr.to_string(),
        message,
    };
    let source = strip_wrapper(expr.trim());
    if source.is_empty() {
        return Ok(true);
    }
    let tokens = tokenize(source).map_err(fail)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        ctx,
    };
    let result = parser.or_expr().map_err(fail)?;
    if parser.pos < parser.tokens.len() {
        return Err(fail(format!("unexpected token {:?}", parser.tokens[parser.pos])));
    }
    Ok(result)
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// `{{ a == b }}` reads as `a == b` when the braces enclose everything.
fn strip_wrapper(expr: &str) -> &str {
    match expr.strip_prefix("{{").and_then(|e| e.strip_suffix("}}")) {
        Some(inner) if !inner.contains("{{") && !inner.contains("}}") => inner.trim(),
        _ => expr,
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    ('>', true) => CmpOp::Ge,
                    _ => CmpOp::Gt,
                };
                tokens.push(Token::Cmp(op));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '{' if next == Some('{') => {
                let start = i + 2;
                let mut j = start;
                while j + 1 < chars.len() && !(chars[j] == '}' && chars[j + 1] == '}') {
                    j += 1;
                }
                if j + 1 >= chars.len() {
                    return Err("unterminated '{{'".to_string());
                }
                let inner: String = chars[start..j].iter().collect();
                tokens.push(Token::Path(inner.trim().to_string()));
                i = j + 2;
            }
            '"' | '\'' => {
                let mut out = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    match chars[j] {
                        '\\' if j + 1 < chars.len() => {
                            out.push(chars[j + 1]);
                            j += 2;
                        }
                        q if q == c => {
                            closed = true;
                            j += 1;
                            break;
                        }
                        other => {
                            out.push(other);
                            j += 1;
                        }
                    }
                }
                if !closed {
                    return Err("unterminated string".to_string());
                }
                tokens.push(Token::Literal(Value::String(out)));
                i = j;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E')) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = crate::core::literal::number_value(&text)
                    .ok_or_else(|| format!("invalid number '{}'", text))?;
                tokens.push(Token::Literal(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" | "undefined" => Token::Literal(Value::Null),
                    _ => Token::Path(word),
                });
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ctx: &'a Value,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn or_expr(&mut self) -> Result<bool, String> {
        let mut result = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            result = result || rhs;
        }
        Ok(result)
    }

    fn and_expr(&mut self) -> Result<bool, String> {
        let mut result = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            result = result && rhs;
        }
        Ok(result)
    }

    fn unary(&mut self) -> Result<bool, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or_expr()?;
            if self.peek() != Some(&Token::RParen) {
                return Err("expected ')'".to_string());
            }
            self.pos += 1;
            return Ok(inner);
        }
        let lhs = self.operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.operand()?;
            return Ok(compare(op, &lhs, &rhs));
        }
        Ok(truthy(&lhs))
    }

    fn operand(&mut self) -> Result<Value, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::Literal(v) => Ok(v),
            Token::Path(p) => Ok(lookup(self.ctx, &p).cloned().unwrap_or(Value::Null)),
            other => Err(format!("expected a value, found {:?}", other)),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> bool {
    match op {
        CmpOp::Eq => loosely_equal(a, b),
        CmpOp::Ne => !loosely_equal(a, b),
        _ => {
            let ordering = match (a, b) {
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => match (as_number(a), as_number(b)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
    }
}
