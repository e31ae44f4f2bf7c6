//! Allow-listed expression language
//!
//! Expressions are small, side-effect free formulas evaluated against a
//! record: paths (`$.user.name`, `items[0].price`), literals, arithmetic,
//! comparisons, boolean logic and calls to a fixed set of built-in functions.
//! Anything outside that set is rejected when the expression is parsed.
//! Rust callers can inject a closure with [`Expression::from_fn`] instead.

use jsonflow_core::path::{self, is_truthy, to_text};
use jsonflow_core::{value_kind, FlowError, Record};
use serde_json::{Number, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Functions callable from expressions.
pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "len",
    "lower",
    "upper",
    "strip",
    "contains",
    "startswith",
    "endswith",
    "exists",
    "sum",
    "min",
    "max",
    "join",
    "split",
    "round",
    "abs",
    "str",
    "int",
    "float",
    "bool",
    "default",
];

/// Errors raised while evaluating an expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// Operand had the wrong type for an operation.
    #[error("type mismatch: {op} cannot be applied to {actual}")]
    TypeMismatch {
        /// Operation name
        op: String,
        /// Offending operand kind(s)
        actual: String,
    },
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Wrong number of arguments to a function.
    #[error("{func}() expects {expected} argument(s), got {actual}")]
    Arity {
        /// Function name
        func: &'static str,
        /// Accepted argument counts
        expected: &'static str,
        /// Supplied argument count
        actual: usize,
    },
    /// Failure reported by an injected closure.
    #[error("{0}")]
    Custom(String),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation (`!`, `not`)
    Not,
    /// Numeric negation
    Neg,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+` (numeric add, string or array concatenation)
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in` (substring, element or key membership)
    In,
    /// `&&`, `and`
    And,
    /// `||`, `or`
    Or,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    /// Constant value
    Literal(Value),
    /// Dotted path into the record; missing paths evaluate to null
    Path(String),
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        expr: Box<ScalarExpr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<ScalarExpr>,
        /// Right operand
        right: Box<ScalarExpr>,
    },
    /// Call of an allow-listed function
    Call {
        /// Function name, one of [`BUILTIN_FUNCTIONS`]
        func: &'static str,
        /// Arguments
        args: Vec<ScalarExpr>,
    },
}

type NativeFn = dyn Fn(&Record) -> Result<Value, EvalError> + Send + Sync;

#[derive(Clone)]
enum ExprKind {
    Parsed(ScalarExpr),
    Native(Arc<NativeFn>),
}

/// A record -> value function, either parsed from text or injected.
#[derive(Clone)]
pub struct Expression {
    source: String,
    kind: ExprKind,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

impl Expression {
    /// Parse an expression, rejecting unknown functions and bad syntax.
    pub fn parse(source: &str) -> Result<Self, FlowError> {
        let tokens = tokenize(source).map_err(|reason| config_error(source, &reason))?;
        let mut parser = Parser { tokens, pos: 0 };
        let tree = parser
            .parse_or()
            .and_then(|tree| parser.expect_end().map(|_| tree))
            .map_err(|reason| config_error(source, &reason))?;
        Ok(Self {
            source: source.to_string(),
            kind: ExprKind::Parsed(tree),
        })
    }

    /// Wrap a Rust closure.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(&Record) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self {
            source: "<native>".to_string(),
            kind: ExprKind::Native(Arc::new(func)),
        }
    }

    /// Expression text (`<native>` for closures).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether this expression can be serialized back to text.
    pub fn is_native(&self) -> bool {
        matches!(self.kind, ExprKind::Native(_))
    }

    /// Parsed tree, if this expression came from text.
    pub fn tree(&self) -> Option<&ScalarExpr> {
        match &self.kind {
            ExprKind::Parsed(tree) => Some(tree),
            ExprKind::Native(_) => None,
        }
    }

    /// Evaluate against a record.
    pub fn evaluate(&self, record: &Record) -> Result<Value, EvalError> {
        match &self.kind {
            ExprKind::Parsed(tree) => tree.eval(record),
            ExprKind::Native(func) => func(record),
        }
    }

    /// Evaluate and interpret the result as a boolean.
    pub fn matches(&self, record: &Record) -> Result<bool, EvalError> {
        self.evaluate(record).map(|value| is_truthy(&value))
    }

    /// Evaluate on behalf of `operator`, mapping failures to operator errors.
    pub fn evaluate_for(&self, operator: &str, record: &Record) -> jsonflow_core::Result<Value> {
        self.evaluate(record).map_err(|err| {
            FlowError::operator(operator, format!("expression '{}': {}", self.source, err))
        })
    }
}

impl TryFrom<&str> for Expression {
    type Error = FlowError;

    fn try_from(source: &str) -> Result<Self, FlowError> {
        Expression::parse(source)
    }
}

fn config_error(source: &str, reason: &str) -> FlowError {
    FlowError::Config(format!("invalid expression '{}': {}", source, reason))
}

impl ScalarExpr {
    /// Evaluate this tree against a record.
    pub fn eval(&self, record: &Record) -> Result<Value, EvalError> {
        match self {
            ScalarExpr::Literal(value) => Ok(value.clone()),
            ScalarExpr::Path(p) => Ok(path::get_all(record, p).unwrap_or(Value::Null)),
            ScalarExpr::Unary { op, expr } => {
                let value = expr.eval(record)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!is_truthy(&value))),
                    UnaryOp::Neg => match &value {
                        Value::Number(n) => match n.as_i64().and_then(i64::checked_neg) {
                            Some(negated) => Ok(Value::from(negated)),
                            None => Ok(float(-n.as_f64().unwrap_or_default())),
                        },
                        other => Err(mismatch("-", other)),
                    },
                }
            }
            ScalarExpr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = left.eval(record)?;
                    if !is_truthy(&l) {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(is_truthy(&right.eval(record)?)))
                }
                BinaryOp::Or => {
                    let l = left.eval(record)?;
                    if is_truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(is_truthy(&right.eval(record)?)))
                }
                _ => binary(*op, left.eval(record)?, right.eval(record)?),
            },
            ScalarExpr::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(record))
                    .collect::<Result<Vec<_>, _>>()?;
                call(func, values)
            }
        }
    }
}

fn mismatch(op: &str, value: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.to_string(),
        actual: value_kind(value).to_string(),
    }
}

fn mismatch2(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.to_string(),
        actual: format!("{} and {}", value_kind(left), value_kind(right)),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn both_ints(left: &Value, right: &Value) -> Option<(i64, i64)> {
    Some((left.as_i64()?, right.as_i64()?))
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    let sym = op.symbol();
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(to_text(&left) + &to_text(&right)))
            }
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arithmetic(op, &left, &right),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, &left, &right)
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => match (as_f64(&left), as_f64(&right)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            }
            .ok_or_else(|| mismatch2(sym, &left, &right))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::In => match &right {
            Value::String(haystack) => Ok(Value::Bool(haystack.contains(&to_text(&left)))),
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|item| loose_eq(item, &left)))),
            Value::Object(map) => Ok(Value::Bool(map.contains_key(&to_text(&left)))),
            Value::Null => Ok(Value::Bool(false)),
            other => Err(mismatch(sym, other)),
        },
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(if op == BinaryOp::And {
            is_truthy(&left) && is_truthy(&right)
        } else {
            is_truthy(&left) || is_truthy(&right)
        })),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let sym = op.symbol();
    if let Some((a, b)) = both_ints(left, right) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                match a.checked_rem(b) {
                    Some(0) => a.checked_div(b),
                    Some(_) => return Ok(float(a as f64 / b as f64)),
                    None => None,
                }
            }
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_rem_euclid(b)
            }
            _ => None,
        };
        if let Some(n) = result {
            return Ok(Value::from(n));
        }
    }
    let (a, b) = match (left, right) {
        (Value::Number(_), Value::Number(_)) => (as_f64(left), as_f64(right)),
        _ => (None, None),
    };
    let (Some(a), Some(b)) = (a, b) else {
        return Err(mismatch2(sym, left, right));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a / b,
        _ => a.rem_euclid(b),
    };
    Ok(float(result))
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn arity(func: &'static str, expected: &'static str, args: &[Value], ok: bool) -> Result<(), EvalError> {
    if ok {
        Ok(())
    } else {
        Err(EvalError::Arity {
            func,
            expected,
            actual: args.len(),
        })
    }
}

fn numbers_of(func: &str, args: Vec<Value>) -> Result<Vec<f64>, EvalError> {
    let items = match args.as_slice() {
        [Value::Array(items)] => items.clone(),
        _ => args,
    };
    items
        .iter()
        .map(|item| as_f64(item).ok_or_else(|| mismatch(func, item)))
        .collect()
}

fn number_value(f: f64, all_ints: bool) -> Value {
    if all_ints && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        float(f)
    }
}

fn all_integers(args: &[Value]) -> bool {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    items.iter().all(|item| item.is_i64() || item.is_u64())
}

fn call(func: &'static str, args: Vec<Value>) -> Result<Value, EvalError> {
    let n = args.len();
    match func {
        "len" => {
            arity(func, "1", &args, n == 1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                Value::Null => Ok(Value::from(0)),
                other => Err(mismatch(func, other)),
            }
        }
        "lower" | "upper" | "strip" => {
            arity(func, "1", &args, n == 1)?;
            let text = to_text(&args[0]);
            Ok(Value::String(match func {
                "lower" => text.to_lowercase(),
                "upper" => text.to_uppercase(),
                _ => text.trim().to_string(),
            }))
        }
        "contains" => {
            arity(func, "2", &args, n == 2)?;
            binary(BinaryOp::In, args[1].clone(), args[0].clone())
        }
        "startswith" | "endswith" => {
            arity(func, "2", &args, n == 2)?;
            let text = to_text(&args[0]);
            let affix = to_text(&args[1]);
            Ok(Value::Bool(if func == "startswith" {
                text.starts_with(&affix)
            } else {
                text.ends_with(&affix)
            }))
        }
        "exists" => {
            arity(func, "1", &args, n == 1)?;
            Ok(Value::Bool(!args[0].is_null()))
        }
        "sum" => {
            let ints = all_integers(&args);
            let total: f64 = numbers_of(func, args)?.into_iter().sum();
            Ok(number_value(total, ints))
        }
        "min" | "max" => {
            let ints = all_integers(&args);
            let numbers = numbers_of(func, args)?;
            let picked = if func == "min" {
                numbers.into_iter().reduce(f64::min)
            } else {
                numbers.into_iter().reduce(f64::max)
            };
            Ok(picked.map_or(Value::Null, |f| number_value(f, ints)))
        }
        "join" => {
            arity(func, "1 or 2", &args, n == 1 || n == 2)?;
            let sep = args.get(1).map(to_text).unwrap_or_default();
            match &args[0] {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(to_text).collect::<Vec<_>>().join(&sep),
                )),
                other => Ok(Value::String(to_text(other))),
            }
        }
        "split" => {
            arity(func, "1 or 2", &args, n == 1 || n == 2)?;
            let text = to_text(&args[0]);
            let parts: Vec<Value> = match args.get(1).map(to_text) {
                Some(sep) if !sep.is_empty() => {
                    text.split(sep.as_str()).map(|p| Value::String(p.into())).collect()
                }
                _ => text
                    .split_whitespace()
                    .map(|p| Value::String(p.into()))
                    .collect(),
            };
            Ok(Value::Array(parts))
        }
        "round" => {
            arity(func, "1 or 2", &args, n == 1 || n == 2)?;
            let x = as_f64(&args[0]).ok_or_else(|| mismatch(func, &args[0]))?;
            let digits = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            if digits <= 0 {
                Ok(number_value(x.round(), true))
            } else {
                let factor = 10f64.powi(digits as i32);
                Ok(float((x * factor).round() / factor))
            }
        }
        "abs" => {
            arity(func, "1", &args, n == 1)?;
            match &args[0] {
                Value::Number(num) if num.is_i64() => {
                    Ok(Value::from(num.as_i64().unwrap_or_default().saturating_abs()))
                }
                other => as_f64(other)
                    .map(|f| float(f.abs()))
                    .ok_or_else(|| mismatch(func, other)),
            }
        }
        "str" => {
            arity(func, "1", &args, n == 1)?;
            Ok(Value::String(to_text(&args[0])))
        }
        "int" | "float" => {
            arity(func, "1", &args, n == 1)?;
            let parsed = match &args[0] {
                Value::String(s) => s.trim().parse::<f64>().ok(),
                other => as_f64(other),
            }
            .ok_or_else(|| mismatch(func, &args[0]))?;
            Ok(if func == "int" {
                Value::from(parsed.trunc() as i64)
            } else {
                float(parsed)
            })
        }
        "bool" => {
            arity(func, "1", &args, n == 1)?;
            Ok(Value::Bool(is_truthy(&args[0])))
        }
        "default" => {
            arity(func, "2", &args, n == 2)?;
            let mut args = args;
            let fallback = args.pop().unwrap_or(Value::Null);
            let value = args.pop().unwrap_or(Value::Null);
            Ok(if value.is_null() { fallback } else { value })
        }
        other => Err(EvalError::Custom(format!("unknown function {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Value),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
];

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$')
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err("unterminated string literal".to_string());
                    };
                    i += 1;
                    if ch == quote {
                        break;
                    }
                    if ch == '\\' {
                        let escaped = chars
                            .get(i)
                            .copied()
                            .ok_or_else(|| "dangling escape".to_string())?;
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    } else {
                        text.push(ch);
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = if text.contains('.') {
                    text.parse::<f64>().ok().map(float)
                } else {
                    text.parse::<i64>().ok().map(Value::from)
                };
                tokens.push(Token::Number(
                    number.ok_or_else(|| format!("invalid number '{}'", text))?,
                ));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() {
                    if is_path_char(chars[i]) {
                        i += 1;
                    } else if chars[i] == '[' {
                        // index or wildcard: `[0]`, `[*]`
                        let close = chars[i..]
                            .iter()
                            .position(|&ch| ch == ']')
                            .ok_or_else(|| "unterminated '['".to_string())?;
                        i += close + 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| format!("unexpected character '{}'", c))?;
                tokens.push(Token::Op(op));
                i += op.chars().count();
            }
        }
    }
    Ok(tokens)
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
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect_end(&self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("unexpected trailing token {:?}", token)),
        }
    }

    fn eat_op(&mut self, ops: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        let found = match self.peek() {
            Some(Token::Op(sym)) => ops.iter().find(|(s, _)| s == sym),
            Some(Token::Ident(word)) => ops.iter().find(|(s, _)| s == word),
            _ => None,
        };
        let op = found.map(|(_, op)| *op)?;
        self.pos += 1;
        Some(op)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Parser) -> Result<ScalarExpr, String>,
    ) -> Result<ScalarExpr, String> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let right = next(self)?;
            left = ScalarExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<ScalarExpr, String> {
        self.binary_level(&[("||", BinaryOp::Or), ("or", BinaryOp::Or)], Parser::parse_and)
    }

    fn parse_and(&mut self) -> Result<ScalarExpr, String> {
        self.binary_level(
            &[("&&", BinaryOp::And), ("and", BinaryOp::And)],
            Parser::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<ScalarExpr, String> {
        self.binary_level(
            &[
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
                ("in", BinaryOp::In),
            ],
            Parser::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<ScalarExpr, String> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Parser::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<ScalarExpr, String> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Mod)],
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<ScalarExpr, String> {
        let op = match self.peek() {
            Some(Token::Op("!")) => Some(UnaryOp::Not),
            Some(Token::Op("-")) => Some(UnaryOp::Neg),
            Some(Token::Ident(word)) if word == "not" => Some(UnaryOp::Not),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let expr = self.parse_unary()?;
                Ok(ScalarExpr::Unary {
                    op,
                    expr: Box::new(expr),
                })
            }
            None => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<ScalarExpr, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(ScalarExpr::Literal(value)),
            Some(Token::Str(text)) => Ok(ScalarExpr::Literal(Value::String(text))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(ScalarExpr::Literal(Value::Bool(true))),
                "false" => Ok(ScalarExpr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(ScalarExpr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => self.parse_call(&word),
                _ => Ok(ScalarExpr::Path(word)),
            },
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<ScalarExpr, String> {
        let func = BUILTIN_FUNCTIONS
            .iter()
            .find(|f| **f == name)
            .copied()
            .ok_or_else(|| format!("function '{}' is not allowed", name))?;
        self.pos += 1; // '('
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(ScalarExpr::Call { func, args });
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(format!("expected ',' or ')' in call to {}", name)),
            }
        }
        Ok(ScalarExpr::Call { func, args })
    }
}
