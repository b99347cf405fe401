// src/core/evaluator.rs
//
// A deliberately small, sandboxed expression language for `${{ ... }}`
// template spans and command conditions. Expressions can only see the
// context values passed in; there is no access to the process, the
// filesystem or any global state.
//
// Grammar (precedence low to high):
//   ternary    := or ('?' ternary ':' ternary)?
//   or         := and ('||' and)*
//   and        := equality ('&&' equality)*
//   equality   := comparison (('==' | '!=') comparison)*
//   comparison := additive (('<' | '<=' | '>' | '>=') additive)*
//   additive   := multiplicative (('+' | '-') multiplicative)*
//   multiplicative := unary (('*' | '/' | '%') unary)*
//   unary      := ('!' | '-') unary | postfix
//   postfix    := primary ('.' ident | '[' expr ']' | '.' ident '(' args ')')*
//   primary    := number | string | 'true' | 'false' | 'null' | ident | '(' expr ')'

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use thiserror::Error;

lazy_static! {
    // Mirrors the `${{ ... }}` span syntax: non-greedy, spans may cover
    // multiple lines.
    static ref TEMPLATE_SPAN: Regex = Regex::new(r"(?s)\$\{\{(.+?)\}\}").expect("valid regex");
}

#[derive(Error, Debug, PartialEq)]
pub enum EvalError {
    #[error("Syntax error in expression '{expression}' at offset {offset}: {message}")]
    Syntax {
        expression: String,
        offset: usize,
        message: String,
    },
    #[error("Failed to evaluate '{expression}': {message}")]
    Eval { expression: String, message: String },
}

// --- VALUES ---

/// A value bound into, or produced by, an expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(ContextMap),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::List(_) | Self::Map(_) => true,
        }
    }

    /// Stringified rendering used when substituting template spans.
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(Self::render)
                .collect::<Vec<_>>()
                .join(","),
            Self::Map(_) => "[object]".to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "object",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// An ordered map with the lookup discipline every context object uses:
/// exact key match first, then a linear case-insensitive scan. Original
/// key casing is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextMap {
    entries: Vec<(String, Value)>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces (by exact key) an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Exact match first, then the first case-insensitive match.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some((_, value)) = self.entries.iter().find(|(k, _)| k == key) {
            return Some(value);
        }
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ContextMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// --- PUBLIC API ---

/// Evaluates one expression against the context bindings.
pub fn evaluate(expression: &str, context: &ContextMap) -> Result<Value, EvalError> {
    let tokens = lex(expression)?;
    let mut parser = Parser {
        expression,
        tokens: &tokens,
        position: 0,
    };
    let ast = parser.parse_expression()?;
    parser.expect_end()?;
    eval_node(&ast, context, expression)
}

/// Replaces every `${{ ... }}` span in `template` with the stringified
/// result of evaluating its inner expression. Spans evaluate independently,
/// left to right; any failure fails the whole template. A template without
/// spans is returned unchanged.
pub fn evaluate_template(template: &str, context: &ContextMap) -> Result<String, EvalError> {
    let mut output = String::with_capacity(template.len());
    let mut last_end = 0;

    for captures in TEMPLATE_SPAN.captures_iter(template) {
        let span = captures.get(0).expect("span match");
        let inner = captures.get(1).expect("span body").as_str();

        output.push_str(&template[last_end..span.start()]);
        output.push_str(&evaluate(inner, context)?.render());
        last_end = span.end();
    }

    output.push_str(&template[last_end..]);
    Ok(output)
}

// --- LEXER ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    String(String),
    Ident(String),
    Punct(&'static str),
}

fn lex(expression: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let mut tokens = Vec::new();
    let bytes = expression.as_bytes();
    let mut i = 0;

    let syntax_error = |offset: usize, message: &str| EvalError::Syntax {
        expression: expression.to_string(),
        offset,
        message: message.to_string(),
    };

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let text = &expression[start..i];
            let number = text
                .parse::<f64>()
                .map_err(|_| syntax_error(start, "invalid number literal"))?;
            tokens.push((start, Token::Number(number)));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = bytes[i];
            let start = i;
            i += 1;
            let mut literal = String::new();
            loop {
                if i >= bytes.len() {
                    return Err(syntax_error(start, "unterminated string literal"));
                }
                let b = bytes[i];
                if b == quote {
                    i += 1;
                    break;
                }
                if b == b'\\' && i + 1 < bytes.len() && bytes[i + 1].is_ascii() {
                    literal.push(match bytes[i + 1] as char {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                // Copy the full UTF-8 sequence for this character.
                let len = utf8_len(b);
                literal.push_str(&expression[i..i + len]);
                i += len;
            }
            tokens.push((start, Token::String(literal)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push((start, Token::Ident(expression[start..i].to_string())));
            continue;
        }

        if !c.is_ascii() {
            return Err(syntax_error(i, &format!("unexpected character '{c}'")));
        }

        // Two-character operators before single-character ones.
        const TWO_CHAR: &[&str] = &["==", "!=", "<=", ">=", "&&", "||"];
        if i + 1 < bytes.len() {
            let pair = &expression[i..i + 2];
            if let Some(op) = TWO_CHAR.iter().find(|op| **op == pair) {
                tokens.push((i, Token::Punct(op)));
                i += 2;
                continue;
            }
        }

        const ONE_CHAR: &[&str] = &[
            "+", "-", "*", "/", "%", "!", "<", ">", "(", ")", "[", "]", ".", ",", "?", ":",
        ];
        let single = &expression[i..i + 1];
        if let Some(op) = ONE_CHAR.iter().find(|op| **op == single) {
            tokens.push((i, Token::Punct(op)));
            i += 1;
            continue;
        }

        return Err(syntax_error(i, &format!("unexpected character '{c}'")));
    }

    Ok(tokens)
}

/// Byte length of the UTF-8 sequence starting with this lead byte.
fn utf8_len(lead: u8) -> usize {
    match lead {
        b if b < 0x80 => 1,
        b if b < 0xE0 => 2,
        b if b < 0xF0 => 3,
        _ => 4,
    }
}

// --- PARSER ---

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Ident(String),
    Unary {
        op: &'static str,
        operand: Box<Node>,
    },
    Binary {
        op: &'static str,
        left: Box<Node>,
        right: Box<Node>,
    },
    Ternary {
        condition: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Member {
        object: Box<Node>,
        property: String,
    },
    Index {
        object: Box<Node>,
        index: Box<Node>,
    },
    Call {
        object: Box<Node>,
        method: String,
        args: Vec<Node>,
    },
}

struct Parser<'a> {
    expression: &'a str,
    tokens: &'a [(usize, Token)],
    position: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> EvalError {
        let offset = self
            .tokens
            .get(self.position)
            .map_or(self.expression.len(), |(offset, _)| *offset);
        EvalError::Syntax {
            expression: self.expression.to_string(),
            offset,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|(_, t)| t.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat_punct(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == op) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, op: &str) -> Result<(), EvalError> {
        if self.eat_punct(op) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{op}'")))
        }
    }

    fn expect_end(&self) -> Result<(), EvalError> {
        if self.position == self.tokens.len() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn parse_expression(&mut self) -> Result<Node, EvalError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Node, EvalError> {
        let condition = self.parse_or()?;
        if self.eat_punct("?") {
            let then = self.parse_ternary()?;
            self.expect_punct(":")?;
            let otherwise = self.parse_ternary()?;
            return Ok(Node::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> Result<Node, EvalError> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let right = self.parse_and()?;
            left = Node::Binary {
                op: "||",
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, EvalError> {
        let mut left = self.parse_equality()?;
        while self.eat_punct("&&") {
            let right = self.parse_equality()?;
            left = Node::Binary {
                op: "&&",
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Node, EvalError>,
    ) -> Result<Node, EvalError> {
        let mut left = next(self)?;
        loop {
            let Some(op) = ops.iter().copied().find(|op| self.eat_punct(op)) else {
                return Ok(left);
            };
            let right = next(self)?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_equality(&mut self) -> Result<Node, EvalError> {
        self.parse_binary_level(&["==", "!="], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Node, EvalError> {
        self.parse_binary_level(&["<=", ">=", "<", ">"], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<Node, EvalError> {
        self.parse_binary_level(&["+", "-"], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, EvalError> {
        self.parse_binary_level(&["*", "/", "%"], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Node, EvalError> {
        for op in ["!", "-"] {
            if self.eat_punct(op) {
                let operand = self.parse_unary()?;
                return Ok(Node::Unary {
                    op,
                    operand: Box::new(operand),
                });
            }
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node, EvalError> {
        let mut node = self.parse_primary()?;

        loop {
            if self.eat_punct(".") {
                let Some(Token::Ident(name)) = self.advance() else {
                    return Err(self.error("expected property name after '.'"));
                };
                if self.eat_punct("(") {
                    let args = self.parse_args()?;
                    node = Node::Call {
                        object: Box::new(node),
                        method: name,
                        args,
                    };
                } else {
                    node = Node::Member {
                        object: Box::new(node),
                        property: name,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.parse_expression()?;
                self.expect_punct("]")?;
                node = Node::Index {
                    object: Box::new(node),
                    index: Box::new(index),
                };
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Node>, EvalError> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Node, EvalError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Node::Literal(Value::Number(n))),
            Some(Token::String(s)) => Ok(Node::Literal(Value::String(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Node::Literal(Value::Null)),
                _ => Ok(Node::Ident(name)),
            },
            Some(Token::Punct("(")) => {
                let inner = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            _ => {
                self.position = self.position.saturating_sub(1);
                Err(self.error("expected an expression"))
            }
        }
    }
}

// --- EVALUATION ---

fn eval_node(node: &Node, context: &ContextMap, expression: &str) -> Result<Value, EvalError> {
    let eval_error = |message: String| EvalError::Eval {
        expression: expression.to_string(),
        message,
    };

    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Ident(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| eval_error(format!("'{name}' is not defined"))),
        Node::Unary { op, operand } => {
            let value = eval_node(operand, context, expression)?;
            match *op {
                "!" => Ok(Value::Bool(!value.is_truthy())),
                "-" => match value {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(eval_error(format!("cannot negate {}", other.type_name()))),
                },
                _ => unreachable!(),
            }
        }
        Node::Binary { op, left, right } => {
            // Short-circuit logic first.
            if *op == "&&" {
                let left = eval_node(left, context, expression)?;
                return if left.is_truthy() {
                    eval_node(right, context, expression)
                } else {
                    Ok(left)
                };
            }
            if *op == "||" {
                let left = eval_node(left, context, expression)?;
                return if left.is_truthy() {
                    Ok(left)
                } else {
                    eval_node(right, context, expression)
                };
            }

            let left = eval_node(left, context, expression)?;
            let right = eval_node(right, context, expression)?;
            eval_binary(op, &left, &right).map_err(eval_error)
        }
        Node::Ternary {
            condition,
            then,
            otherwise,
        } => {
            if eval_node(condition, context, expression)?.is_truthy() {
                eval_node(then, context, expression)
            } else {
                eval_node(otherwise, context, expression)
            }
        }
        Node::Member { object, property } => {
            let object = eval_node(object, context, expression)?;
            member_access(&object, property).map_err(eval_error)
        }
        Node::Index { object, index } => {
            let object = eval_node(object, context, expression)?;
            let index = eval_node(index, context, expression)?;
            match (&object, &index) {
                (Value::Map(_), Value::String(key)) => member_access(&object, key).map_err(eval_error),
                (Value::List(items), Value::Number(n)) => Ok(items
                    .get(*n as usize)
                    .cloned()
                    .unwrap_or(Value::Null)),
                (Value::String(s), Value::Number(n)) => Ok(s
                    .chars()
                    .nth(*n as usize)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null)),
                _ => Err(eval_error(format!(
                    "cannot index {} with {}",
                    object.type_name(),
                    index.type_name()
                ))),
            }
        }
        Node::Call {
            object,
            method,
            args,
        } => {
            let object = eval_node(object, context, expression)?;
            let args = args
                .iter()
                .map(|arg| eval_node(arg, context, expression))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(&object, method, &args).map_err(eval_error)
        }
    }
}

fn eval_binary(op: &str, left: &Value, right: &Value) -> Result<Value, String> {
    use Value::{Bool, Number, String as VString};

    match op {
        "+" => match (left, right) {
            (Number(a), Number(b)) => Ok(Number(a + b)),
            // String concatenation when either side is a string.
            (VString(_), _) | (_, VString(_)) => {
                Ok(VString(format!("{}{}", left.render(), right.render())))
            }
            _ => Err(format!(
                "cannot add {} and {}",
                left.type_name(),
                right.type_name()
            )),
        },
        "-" | "*" | "/" | "%" => match (left, right) {
            (Number(a), Number(b)) => Ok(Number(match op {
                "-" => a - b,
                "*" => a * b,
                "/" => a / b,
                _ => a % b,
            })),
            _ => Err(format!(
                "'{op}' requires numbers, got {} and {}",
                left.type_name(),
                right.type_name()
            )),
        },
        "==" => Ok(Bool(loose_equals(left, right))),
        "!=" => Ok(Bool(!loose_equals(left, right))),
        "<" | "<=" | ">" | ">=" => {
            let ordering = match (left, right) {
                (Number(a), Number(b)) => a.partial_cmp(b),
                (VString(a), VString(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                ));
            };
            Ok(Bool(match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        _ => Err(format!("unsupported operator '{op}'")),
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

fn member_access(object: &Value, property: &str) -> Result<Value, String> {
    match object {
        Value::Map(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::String(s) if property == "length" => Ok(Value::Number(s.chars().count() as f64)),
        Value::List(items) if property == "length" => Ok(Value::Number(items.len() as f64)),
        Value::Null => Err(format!(
            "cannot read property '{property}' of null"
        )),
        other => Err(format!(
            "cannot read property '{property}' of {}",
            other.type_name()
        )),
    }
}

fn call_method(object: &Value, method: &str, args: &[Value]) -> Result<Value, String> {
    let arg_string = |index: usize| -> String {
        args.get(index).map(Value::render).unwrap_or_default()
    };

    match (object, method) {
        (Value::String(s), "startsWith") => Ok(Value::Bool(s.starts_with(&arg_string(0)))),
        (Value::String(s), "endsWith") => Ok(Value::Bool(s.ends_with(&arg_string(0)))),
        (Value::String(s), "includes" | "contains") => {
            Ok(Value::Bool(s.contains(&arg_string(0))))
        }
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
        (Value::List(items), "includes" | "contains") => {
            let needle = args.first().cloned().unwrap_or(Value::Null);
            Ok(Value::Bool(items.iter().any(|i| loose_equals(i, &needle))))
        }
        (Value::List(items), "join") => {
            let separator = if args.is_empty() { ",".to_string() } else { arg_string(0) };
            Ok(Value::String(
                items
                    .iter()
                    .map(Value::render)
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        }
        _ => Err(format!(
            "{} has no method '{method}'",
            object.type_name()
        )),
    }
}
