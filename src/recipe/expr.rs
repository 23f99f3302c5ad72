// src/recipe/expr.rs

//! `%if` expression evaluation
//!
//! Feature references (`%{with X}`, `%{without X}`, `0%{?with_X}`,
//! `0%{!?with_X:1}`) stay symbolic; everything else is expanded through the
//! macro table and folded to a constant while the descriptor loads. The
//! result is either a constant, which the loader uses to keep or drop the
//! block, or a [`Condition`] over feature flags stored on the gated items.

use crate::features::Condition;
use crate::recipe::macros::{MacroError, MacroTable};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("{0}")]
    Macro(#[from] MacroError),

    #[error("unexpected {found} in expression")]
    Unexpected { found: String },

    #[error("cannot compare {0}")]
    Incomparable(String),
}

/// Outcome of evaluating an `%if` expression at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Folded {
    Const(bool),
    Cond(Condition),
}

impl Folded {
    pub fn not(self) -> Self {
        match self {
            Self::Const(b) => Self::Const(!b),
            Self::Cond(c) => Self::Cond(c.negate()),
        }
    }

    pub fn and(self, other: Folded) -> Self {
        match (self, other) {
            (Self::Const(false), _) | (_, Self::Const(false)) => Self::Const(false),
            (Self::Const(true), x) | (x, Self::Const(true)) => x,
            (Self::Cond(a), Self::Cond(b)) => Self::Cond(a.and(b)),
        }
    }

    pub fn or(self, other: Folded) -> Self {
        match (self, other) {
            (Self::Const(true), _) | (_, Self::Const(true)) => Self::Const(true),
            (Self::Const(false), x) | (x, Self::Const(false)) => x,
            (Self::Cond(a), Self::Cond(b)) => Self::Cond(a.or(b)),
        }
    }
}

static FLAG_REFS: LazyLock<[(Regex, bool); 4]> = LazyLock::new(|| {
    let re = |p: &str| Regex::new(p).unwrap();
    [
        (re(r"0?%\{!\?with_(\w+)(?::1)?\}"), false),
        (re(r"0?%\{\?with_(\w+)(?::1)?\}"), true),
        (re(r"%\{without\s+(\w+)\}"), false),
        (re(r"%\{with\s+(\w+)\}"), true),
    ]
});

/// First feature flag referenced by `text`, ignoring `%%` escapes
///
/// Feature references only have a meaning inside `%if` expressions.
pub fn feature_reference(text: &str) -> Option<String> {
    if !text.contains('%') {
        return None;
    }
    static ANY_FLAG_REF: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"%\{(?:!?\?!?with_(\w+)|with(?:out)?\s+(\w+)\})").unwrap()
    });
    let text = text.replace("%%", "");
    ANY_FLAG_REF.captures(&text).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Evaluate the text following `%if`
pub fn evaluate_if(expr: &str, macros: &MacroTable) -> Result<Folded, ExprError> {
    let mut text = expr.to_string();
    for (re, positive) in FLAG_REFS.iter() {
        let marker = if *positive { " @with:$1 " } else { " !@with:$1 " };
        text = re.replace_all(&text, marker).into_owned();
    }
    let expanded = macros.expand(&text)?;

    let tokens = tokenize(&expanded)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.or_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(ExprError::Unexpected {
            found: describe(tok),
        });
    }
    value.truth()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(i64),
    Str(String),
    Flag(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Num(n) => format!("number {}", n),
        Token::Str(s) => format!("string \"{}\"", s),
        Token::Flag(f) => format!("feature '{}'", f),
        Token::Op(op) => format!("'{}'", op),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExprError> {
    const OPS: [&str; 10] = ["&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "-"];

    let mut tokens = Vec::new();
    let mut rest = text.trim_start();

    'outer: while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("@with:") {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            tokens.push(Token::Flag(after[..len].to_string()));
            rest = after[len..].trim_start();
            continue;
        }

        let c = rest.chars().next().unwrap_or(' ');
        if c.is_ascii_digit() {
            let len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let n = rest[..len].parse::<i64>().map_err(|_| ExprError::Unexpected {
                found: format!("number {}", &rest[..len]),
            })?;
            tokens.push(Token::Num(n));
            rest = rest[len..].trim_start();
            continue;
        }
        if c == '"' {
            let end = rest[1..].find('"').ok_or_else(|| ExprError::Unexpected {
                found: "unterminated string".to_string(),
            })?;
            tokens.push(Token::Str(rest[1..1 + end].to_string()));
            rest = rest[end + 2..].trim_start();
            continue;
        }
        if c == '(' || c == ')' {
            tokens.push(if c == '(' { Token::LParen } else { Token::RParen });
            rest = rest[1..].trim_start();
            continue;
        }
        for op in OPS {
            if let Some(after) = rest.strip_prefix(op) {
                tokens.push(Token::Op(op));
                rest = after.trim_start();
                continue 'outer;
            }
        }

        let word: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
        return Err(ExprError::Unexpected {
            found: format!("'{}'", word),
        });
    }

    Ok(tokens)
}

/// Intermediate value while folding
#[derive(Debug, Clone)]
enum Value {
    Num(i64),
    Str(String),
    Bool(Folded),
}

impl Value {
    fn truth(self) -> Result<Folded, ExprError> {
        Ok(match self {
            Value::Num(n) => Folded::Const(n != 0),
            Value::Str(s) => Folded::Const(!s.is_empty()),
            Value::Bool(b) => b,
        })
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, op: &str) -> bool {
        match self.peek() {
            Some(Token::Op(o)) if *o == op => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn or_expr(&mut self) -> Result<Value, ExprError> {
        let mut value = self.and_expr()?;
        while self.eat_op("||") {
            let rhs = self.and_expr()?;
            value = Value::Bool(value.truth()?.or(rhs.truth()?));
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<Value, ExprError> {
        let mut value = self.cmp_expr()?;
        while self.eat_op("&&") {
            let rhs = self.cmp_expr()?;
            value = Value::Bool(value.truth()?.and(rhs.truth()?));
        }
        Ok(value)
    }

    fn cmp_expr(&mut self) -> Result<Value, ExprError> {
        let lhs = self.unary()?;
        for op in ["==", "!=", "<=", ">=", "<", ">"] {
            if self.eat_op(op) {
                let rhs = self.unary()?;
                return compare(lhs, op, rhs).map(Value::Bool);
            }
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Value, ExprError> {
        if self.eat_op("!") {
            let inner = self.unary()?;
            return Ok(Value::Bool(inner.truth()?.not()));
        }
        if self.eat_op("-") {
            return match self.unary()? {
                Value::Num(n) => Ok(Value::Num(-n)),
                _ => Err(ExprError::Unexpected {
                    found: "'-' before a non-number".to_string(),
                }),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Value::Num(n)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Flag(name)) => Ok(Value::Bool(Folded::Cond(Condition::flag(name)))),
            Some(Token::LParen) => {
                let value = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    Some(tok) => Err(ExprError::Unexpected {
                        found: describe(&tok),
                    }),
                    None => Err(ExprError::Unexpected {
                        found: "end of expression, missing ')'".to_string(),
                    }),
                }
            }
            Some(tok) => Err(ExprError::Unexpected {
                found: describe(&tok),
            }),
            None => Err(ExprError::Unexpected {
                found: "end of expression".to_string(),
            }),
        }
    }
}

fn holds(ord: Ordering, op: &str) -> bool {
    match op {
        "==" => ord == Ordering::Equal,
        "!=" => ord != Ordering::Equal,
        "<" => ord == Ordering::Less,
        "<=" => ord != Ordering::Greater,
        ">" => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    }
}

fn compare(lhs: Value, op: &str, rhs: Value) -> Result<Folded, ExprError> {
    match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => Ok(Folded::Const(holds(a.cmp(&b), op))),
        (Value::Str(a), Value::Str(b)) => Ok(Folded::Const(holds(a.cmp(&b), op))),
        (Value::Bool(Folded::Const(a)), other) => compare(Value::Num(a as i64), op, other),
        (other, Value::Bool(Folded::Const(b))) => compare(other, op, Value::Num(b as i64)),
        (Value::Bool(Folded::Cond(c)), Value::Num(n)) => {
            Ok(fold_flag_comparison(c, |v| holds(v.cmp(&n), op)))
        }
        (Value::Num(n), Value::Bool(Folded::Cond(c))) => {
            Ok(fold_flag_comparison(c, |v| holds(n.cmp(&v), op)))
        }
        (a, b) => Err(ExprError::Incomparable(format!("{:?} with {:?}", a, b))),
    }
}

/// Reduce `flag OP number` to a constant, the flag, or its negation
fn fold_flag_comparison(cond: Condition, outcome: impl Fn(i64) -> bool) -> Folded {
    match (outcome(0), outcome(1)) {
        (false, false) => Folded::Const(false),
        (true, true) => Folded::Const(true),
        (false, true) => Folded::Cond(cond),
        (true, false) => Folded::Cond(cond.negate()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> Folded {
        let mut macros = MacroTable::new();
        macros.define("fedora", "36");
        macros.define("_arch", "x86_64");
        evaluate_if(expr, &macros).unwrap()
    }

    #[test]
    fn test_flag_reference_forms() {
        let tests = Folded::Cond(Condition::flag("tests"));
        assert_eq!(eval("0%{?with_tests}"), tests);
        assert_eq!(eval("%{with tests}"), tests);
        assert_eq!(eval("%{without tests}"), Folded::Cond(Condition::flag("tests").negate()));
        assert_eq!(eval("0%{!?with_tests:1}"), Folded::Cond(Condition::flag("tests").negate()));
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(eval("0%{?fedora} >= 30"), Folded::Const(true));
        assert_eq!(eval("0%{?rhel}"), Folded::Const(false));
        assert_eq!(eval("\"%{_arch}\" == \"aarch64\""), Folded::Const(false));
        assert_eq!(eval("1 && !0"), Folded::Const(true));
        assert_eq!(eval("-1 < 0"), Folded::Const(true));
    }

    #[test]
    fn test_mixed_flag_and_constant() {
        assert_eq!(
            eval("0%{?with_tests} && 0%{?fedora}"),
            Folded::Cond(Condition::flag("tests"))
        );
        assert_eq!(eval("0%{?with_tests} && 0%{?rhel}"), Folded::Const(false));
        assert_eq!(eval("%{with tests} || 1"), Folded::Const(true));
    }

    #[test]
    fn test_composite_flags() {
        assert_eq!(
            eval("%{with tests} && (%{with weak_deps} || !%{with docs})"),
            Folded::Cond(
                Condition::flag("tests")
                    .and(Condition::flag("weak_deps").or(Condition::flag("docs").negate()))
            )
        );
    }

    #[test]
    fn test_flag_compared_with_number() {
        assert_eq!(eval("0%{?with_tests} == 1"), Folded::Cond(Condition::flag("tests")));
        assert_eq!(
            eval("0%{?with_tests} == 0"),
            Folded::Cond(Condition::flag("tests").negate())
        );
        assert_eq!(eval("0%{?with_tests} >= 0"), Folded::Const(true));
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        let cond = Condition::flag("tests")
            .or(Condition::flag("docs"))
            .and(Condition::flag("weak_deps").negate());
        assert_eq!(eval(&cond.to_string()), Folded::Cond(cond));
    }

    #[test]
    fn test_feature_reference_detection() {
        assert_eq!(feature_reference("--enable-x %{?with_docs:--docs}").as_deref(), Some("docs"));
        assert_eq!(feature_reference("%{with tests}").as_deref(), Some("tests"));
        assert_eq!(feature_reference("%%{with tests}"), None);
        assert_eq!(feature_reference("make %{?_smp_mflags}"), None);
    }

    #[test]
    fn test_errors() {
        let macros = MacroTable::new();
        assert!(evaluate_if("fedora >= 30", &macros).is_err());
        assert!(evaluate_if("(1", &macros).is_err());
        assert!(evaluate_if("1 1", &macros).is_err());
        assert!(evaluate_if("%{with a} == %{with b}", &macros).is_err());
        assert!(evaluate_if("", &macros).is_err());
    }
}
