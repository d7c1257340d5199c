//! Expression language used by `textExpression` buttons, `check_expression`
//! feedbacks, custom variable expressions and local variables.
//!
//! Grammar (lowest to highest precedence):
//! `?:` → `||` → `&&` → `== !=` → `< <= > >=` → `+ -` → `* / %` → unary `! -`.
//! Operands are numbers, quoted strings, `true`/`false`, `$(label:name)`
//! variable references, parenthesised expressions and function calls.

use crate::error::ExpressionError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Variable(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        match ch {
            c if c.is_whitespace() => pos += 1,
            '0'..='9' | '.' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedChar { ch, pos: start })?;
                tokens.push(Token::Number(number));
            }
            '"' | '\'' => {
                let quote = ch;
                pos += 1;
                let mut text = String::new();
                loop {
                    match chars.get(pos) {
                        None => return Err(ExpressionError::UnexpectedEnd),
                        Some('\\') => {
                            if let Some(next) = chars.get(pos + 1) {
                                text.push(*next);
                            }
                            pos += 2;
                        }
                        Some(c) if *c == quote => {
                            pos += 1;
                            break;
                        }
                        Some(c) => {
                            text.push(*c);
                            pos += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '$' if chars.get(pos + 1) == Some(&'(') => {
                let start = pos + 2;
                let end = chars[start..]
                    .iter()
                    .position(|c| *c == ')')
                    .map(|i| start + i)
                    .ok_or(ExpressionError::UnexpectedEnd)?;
                let id: String = chars[start..end].iter().collect();
                if !id.contains(':') {
                    return Err(ExpressionError::UnexpectedToken(format!("$({})", id)));
                }
                tokens.push(Token::Variable(id));
                pos = end + 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                pos += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                pos += 1;
            }
            _ => {
                let next = chars.get(pos + 1).copied();
                let (op, width) = match (ch, next) {
                    ('=', Some('=')) => ("==", 2),
                    ('!', Some('=')) => ("!=", 2),
                    ('<', Some('=')) => ("<=", 2),
                    ('>', Some('=')) => (">=", 2),
                    ('&', Some('&')) => ("&&", 2),
                    ('|', Some('|')) => ("||", 2),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    ('!', _) => ("!", 1),
                    ('+', _) => ("+", 1),
                    ('-', _) => ("-", 1),
                    ('*', _) => ("*", 1),
                    ('/', _) => ("/", 1),
                    ('%', _) => ("%", 1),
                    _ => return Err(ExpressionError::UnexpectedChar { ch, pos }),
                };
                tokens.push(Token::Op(op));
                pos += width;
            }
        }
    }

    Ok(tokens)
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn binding_power(op: &str) -> Option<(u8, u8)> {
    let bp = match op {
        "||" => (2, 3),
        "&&" => (4, 5),
        "==" | "!=" => (6, 7),
        "<" | "<=" | ">" | ">=" => (8, 9),
        "+" | "-" => (10, 11),
        "*" | "/" | "%" => (12, 13),
        _ => return None,
    };
    Some(bp)
}

const TERNARY_BP: u8 = 1;
const PREFIX_BP: u8 = 14;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(ExpressionError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = match self.next().ok_or(ExpressionError::UnexpectedEnd)? {
            Token::Number(n) => Expr::Literal(number_value(n)),
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::Variable(id) => Expr::Variable(id),
            Token::Ident(name) => match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                _ => {
                    self.expect(&Token::LParen)?;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr(0)?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                Some(t) => {
                                    return Err(ExpressionError::UnexpectedToken(format!("{:?}", t)))
                                }
                                None => return Err(ExpressionError::UnexpectedEnd),
                            }
                        }
                    } else {
                        self.next();
                    }
                    Expr::Call(name, args)
                }
            },
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(&Token::RParen)?;
                inner
            }
            Token::Op(op @ ("!" | "-")) => {
                let operand = self.parse_expr(PREFIX_BP)?;
                Expr::Unary(op, Box::new(operand))
            }
            t => return Err(ExpressionError::UnexpectedToken(format!("{:?}", t))),
        };

        loop {
            match self.peek() {
                Some(Token::Op(op)) => {
                    let op = *op;
                    let Some((left_bp, right_bp)) = binding_power(op) else {
                        return Err(ExpressionError::UnexpectedToken(op.to_string()));
                    };
                    if left_bp < min_bp {
                        break;
                    }
                    self.next();
                    let rhs = self.parse_expr(right_bp)?;
                    lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Question) => {
                    if TERNARY_BP < min_bp {
                        break;
                    }
                    self.next();
                    let then = self.parse_expr(0)?;
                    self.expect(&Token::Colon)?;
                    let otherwise = self.parse_expr(TERNARY_BP)?;
                    lhs = Expr::Ternary(Box::new(lhs), Box::new(then), Box::new(otherwise));
                }
                _ => break,
            }
        }

        Ok(lhs)
    }
}

/// Parse an expression string into a tree
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    match parser.next() {
        None => Ok(expr),
        Some(t) => Err(ExpressionError::UnexpectedToken(format!("{:?}", t))),
    }
}

/// Collect every variable id referenced by the tree
pub fn referenced_variables(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Variable(id) => out.push(id.clone()),
        Expr::Unary(_, inner) => referenced_variables(inner, out),
        Expr::Binary(_, a, b) => {
            referenced_variables(a, out);
            referenced_variables(b, out);
        }
        Expr::Ternary(a, b, c) => {
            referenced_variables(a, out);
            referenced_variables(b, out);
            referenced_variables(c, out);
        }
        Expr::Call(_, args) => args.iter().for_each(|a| referenced_variables(a, out)),
    }
}

/// Wrap an f64 as JSON, keeping integral results integral
pub fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value, op: &str) -> Result<f64, ExpressionError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(op, value)),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid(op, value)),
        _ => Err(invalid(op, value)),
    }
}

fn invalid(op: &str, value: &Value) -> ExpressionError {
    ExpressionError::InvalidOperand {
        op: op.to_string(),
        operand: value.to_string(),
    }
}

/// Text form of a value as it appears on a button face
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (to_number(a, "=="), to_number(b, "==")) {
                (Ok(x), Ok(y)) => x == y,
                _ => value_to_text(a) == value_to_text(b),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => value_to_text(a) == value_to_text(b),
    }
}

/// Evaluate a parsed tree, resolving variables through `lookup`
pub fn evaluate(
    expr: &Expr,
    lookup: &mut dyn FnMut(&str) -> Value,
) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Variable(id) => Ok(lookup(id)),
        Expr::Unary(op, inner) => {
            let v = evaluate(inner, lookup)?;
            match *op {
                "!" => Ok(Value::Bool(!is_truthy(&v))),
                _ => Ok(number_value(-to_number(&v, op)?)),
            }
        }
        Expr::Ternary(cond, then, otherwise) => {
            if is_truthy(&evaluate(cond, lookup)?) {
                evaluate(then, lookup)
            } else {
                evaluate(otherwise, lookup)
            }
        }
        Expr::Binary(op, a, b) => {
            let op = *op;
            match op {
                "&&" => {
                    let left = evaluate(a, lookup)?;
                    if !is_truthy(&left) {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(is_truthy(&evaluate(b, lookup)?)))
                }
                "||" => {
                    let left = evaluate(a, lookup)?;
                    if is_truthy(&left) {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(is_truthy(&evaluate(b, lookup)?)))
                }
                _ => {
                    let left = evaluate(a, lookup)?;
                    let right = evaluate(b, lookup)?;
                    binary(op, &left, &right)
                }
            }
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| evaluate(a, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values)
        }
    }
}

fn binary(op: &str, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        "+" => {
            if left.is_string() || right.is_string() {
                Ok(Value::String(format!(
                    "{}{}",
                    value_to_text(left),
                    value_to_text(right)
                )))
            } else {
                Ok(number_value(to_number(left, op)? + to_number(right, op)?))
            }
        }
        "-" => Ok(number_value(to_number(left, op)? - to_number(right, op)?)),
        "*" => Ok(number_value(to_number(left, op)? * to_number(right, op)?)),
        "/" | "%" => {
            let divisor = to_number(right, op)?;
            if divisor == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            let dividend = to_number(left, op)?;
            let result = if op == "/" {
                dividend / divisor
            } else {
                dividend % divisor
            };
            Ok(number_value(result))
        }
        "==" => Ok(Value::Bool(values_equal(left, right))),
        "!=" => Ok(Value::Bool(!values_equal(left, right))),
        "<" | "<=" | ">" | ">=" => {
            let ordering = if left.is_string() && right.is_string() {
                value_to_text(left).cmp(&value_to_text(right))
            } else {
                let (x, y) = (to_number(left, op)?, to_number(right, op)?);
                x.partial_cmp(&y).ok_or_else(|| invalid(op, left))?
            };
            let result = match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        _ => Err(ExpressionError::UnexpectedToken(op.to_string())),
    }
}

fn expect_args(name: &str, args: &[Value], expected: usize) -> Result<(), ExpressionError> {
    if args.len() != expected {
        return Err(ExpressionError::ArgumentCount {
            name: name.to_string(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn call(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match name {
        "round" | "floor" | "ceil" | "abs" => {
            expect_args(name, args, 1)?;
            let n = to_number(&args[0], name)?;
            let result = match name {
                "round" => n.round(),
                "floor" => n.floor(),
                "ceil" => n.ceil(),
                _ => n.abs(),
            };
            Ok(number_value(result))
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExpressionError::ArgumentCount {
                    name: name.to_string(),
                    expected: 1,
                    actual: 0,
                });
            }
            let mut best = to_number(&args[0], name)?;
            for arg in &args[1..] {
                let n = to_number(arg, name)?;
                best = if name == "min" { best.min(n) } else { best.max(n) };
            }
            Ok(number_value(best))
        }
        "concat" => Ok(Value::String(args.iter().map(value_to_text).collect())),
        "length" => {
            expect_args(name, args, 1)?;
            let len = match &args[0] {
                Value::Array(items) => items.len(),
                other => value_to_text(other).chars().count(),
            };
            Ok(Value::from(len as u64))
        }
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(input: &str) -> Result<Value, ExpressionError> {
        let expr = parse(input)?;
        evaluate(&expr, &mut |id| match id {
            "custom:count" => json!(4),
            "conn:name" => json!("cam"),
            _ => Value::Null,
        })
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval("7 % 4").unwrap(), json!(3));
        assert_eq!(eval("-2 + 5").unwrap(), json!(3));
        assert_eq!(eval("1 / 4").unwrap(), json!(0.25));
    }

    #[test]
    fn test_variables_and_strings() {
        assert_eq!(eval("$(custom:count) * 2").unwrap(), json!(8));
        assert_eq!(eval("$(conn:name) + ' 1'").unwrap(), json!("cam 1"));
        assert_eq!(eval("$(conn:missing) == ''").unwrap(), json!(true));
    }

    #[test]
    fn test_logic_and_ternary() {
        assert_eq!(eval("$(custom:count) > 3 && true").unwrap(), json!(true));
        assert_eq!(eval("!true || false").unwrap(), json!(false));
        assert_eq!(eval("$(custom:count) >= 4 ? 'on' : 'off'").unwrap(), json!("on"));
        assert_eq!(eval("1 == 2 ? 'a' : 2 == 2 ? 'b' : 'c'").unwrap(), json!("b"));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("round(2.6)").unwrap(), json!(3));
        assert_eq!(eval("max(1, 9, 3)").unwrap(), json!(9));
        assert_eq!(eval("concat('a', 1, true)").unwrap(), json!("a1true"));
        assert_eq!(eval("length('four')").unwrap(), json!(4));
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval("1 / 0"), Err(ExpressionError::DivisionByZero));
        assert!(matches!(eval("nope(1)"), Err(ExpressionError::UnknownFunction(_))));
        assert!(matches!(eval("1 +"), Err(ExpressionError::UnexpectedEnd)));
        assert!(matches!(eval("1 # 2"), Err(ExpressionError::UnexpectedChar { ch: '#', .. })));
        assert!(matches!(
            eval("abs(1, 2)"),
            Err(ExpressionError::ArgumentCount { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_referenced_variables() {
        let expr = parse("$(a:x) + max($(b:y), 2)").unwrap();
        let mut out = Vec::new();
        referenced_variables(&expr, &mut out);
        assert_eq!(out, vec!["a:x".to_string(), "b:y".to_string()]);
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!(3.0)), "3");
        assert_eq!(value_to_text(&json!(2.5)), "2.5");
        assert_eq!(value_to_text(&Value::Null), "");
    }
}
