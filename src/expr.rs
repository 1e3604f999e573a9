//! Matcher expression compiler and evaluator.
//! -------------------------------------------
//! Matchers are Boolean expressions over bound variables (`r.sub`,
//! `p.obj`, ...), role-reachability calls (`g(r.sub, p.sub)`) and
//! registered functions (`keyMatch(r.obj, p.obj)`). An expression string is
//! compiled once into an [`Expr`] tree with a proper tokenizer and
//! precedence-climbing parser, then evaluated many times against cheap
//! per-request binding records. Syntax errors carry an approximate position
//! and a caret snippet.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{EngineError, Result};

/// Runtime value flowing through matcher evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    /// Structured request field (JSON request acceptance).
    Json(serde_json::Value),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render the value the way built-ins consume arguments: strings pass
    /// through, integers and booleans format, JSON serializes compactly.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Json(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Compiled expression tree. One tree is built per distinct matcher string
/// and cached by the enforcer.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    /// `scope.token[.json_path...]`, e.g. `r.sub` or `r.sub.age`.
    Field { scope: String, path: Vec<String> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp { op: CmpOp, left: Box<Expr>, right: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

/// Binding environment handed to the evaluator. The enforcer implements
/// this over its request/rule binding records, its function registry and
/// its role managers.
pub trait EvalScope {
    /// Resolve `scope.path`. `None` means the name is not bound, which is
    /// a runtime evaluation error reported to the caller of `enforce`.
    fn field(&self, scope: &str, path: &[String]) -> Option<Value>;
    /// Invoke a registered or role function by name.
    fn call(&self, name: &str, args: &[Value]) -> Result<Value>;
}

// --- lexer ----------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum TKind {
    Ident(String),
    Str(String),
    Num(String),
    LParen,
    RParen,
    Comma,
    AndAnd,
    OrOr,
    Bang,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug)]
struct Tok {
    kind: TKind,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

// Dots stay inside identifier tokens: `r.sub` lexes as one Ident and is
// split into scope/path at parse time.
fn is_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn caret_snippet(src: &str, pos: usize) -> String {
    // one-line snippet with caret under the column (approximate for ASCII)
    let prefix = &src[..pos.min(src.len())];
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = src[pos.min(src.len())..].find('\n').map(|i| pos + i).unwrap_or(src.len());
    let line = &src[line_start..line_end];
    let col = prefix[line_start..].chars().count();
    let mut caret = String::new();
    for _ in 0..col {
        caret.push(' ');
    }
    caret.push('^');
    format!("{}\n{}", line, caret)
}

fn syntax_error(src: &str, pos: usize, what: &str) -> EngineError {
    EngineError::configuration(format!(
        "syntax error at position {}: {}\n{}",
        pos,
        what,
        caret_snippet(src, pos)
    ))
}

fn lex(input: &str) -> Result<Vec<Tok>> {
    let bytes = input.as_bytes();
    let mut i = 0usize;
    let mut toks: Vec<Tok> = Vec::new();
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        // strings: single-quoted with '' escape; sliced at quote bytes so
        // multi-byte content passes through intact
        if c == '\'' {
            let start = i;
            i += 1;
            let mut s = String::new();
            let mut seg_start = i;
            let mut closed = false;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                        s.push_str(&input[seg_start..i]);
                        s.push('\'');
                        i += 2;
                        seg_start = i;
                        continue;
                    }
                    s.push_str(&input[seg_start..i]);
                    i += 1;
                    closed = true;
                    break;
                }
                i += 1;
            }
            if !closed {
                return Err(syntax_error(input, start, "unterminated string literal"));
            }
            toks.push(Tok { kind: TKind::Str(s), pos: start });
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            i += 1;
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            toks.push(Tok { kind: TKind::Num(input[start..i].to_string()), pos: start });
            continue;
        }
        if is_ident_start(c) {
            let start = i;
            i += 1;
            while i < bytes.len() && is_ident_part(bytes[i] as char) {
                i += 1;
            }
            toks.push(Tok { kind: TKind::Ident(input[start..i].to_string()), pos: start });
            continue;
        }
        match c {
            '(' => {
                toks.push(Tok { kind: TKind::LParen, pos: i });
                i += 1;
            }
            ')' => {
                toks.push(Tok { kind: TKind::RParen, pos: i });
                i += 1;
            }
            ',' => {
                toks.push(Tok { kind: TKind::Comma, pos: i });
                i += 1;
            }
            '&' => {
                if i + 1 < bytes.len() && bytes[i + 1] as char == '&' {
                    toks.push(Tok { kind: TKind::AndAnd, pos: i });
                    i += 2;
                } else {
                    return Err(syntax_error(input, i, "unexpected '&', expected '&&'"));
                }
            }
            '|' => {
                if i + 1 < bytes.len() && bytes[i + 1] as char == '|' {
                    toks.push(Tok { kind: TKind::OrOr, pos: i });
                    i += 2;
                } else {
                    return Err(syntax_error(input, i, "unexpected '|', expected '||'"));
                }
            }
            '=' => {
                if i + 1 < bytes.len() && bytes[i + 1] as char == '=' {
                    toks.push(Tok { kind: TKind::Eq, pos: i });
                    i += 2;
                } else {
                    return Err(syntax_error(input, i, "unexpected '=', expected '=='"));
                }
            }
            '!' => {
                if i + 1 < bytes.len() && bytes[i + 1] as char == '=' {
                    toks.push(Tok { kind: TKind::Ne, pos: i });
                    i += 2;
                } else {
                    toks.push(Tok { kind: TKind::Bang, pos: i });
                    i += 1;
                }
            }
            '<' => {
                if i + 1 < bytes.len() && bytes[i + 1] as char == '=' {
                    toks.push(Tok { kind: TKind::Le, pos: i });
                    i += 2;
                } else {
                    toks.push(Tok { kind: TKind::Lt, pos: i });
                    i += 1;
                }
            }
            '>' => {
                if i + 1 < bytes.len() && bytes[i + 1] as char == '=' {
                    toks.push(Tok { kind: TKind::Ge, pos: i });
                    i += 2;
                } else {
                    toks.push(Tok { kind: TKind::Gt, pos: i });
                    i += 1;
                }
            }
            _ => {
                return Err(syntax_error(input, i, &format!("unexpected character '{}'", c)));
            }
        }
    }
    Ok(toks)
}

// --- parser ---------------------------------------------------------------

#[derive(Clone, Debug)]
struct Cursor {
    toks: Vec<Tok>,
    idx: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.idx)
    }
    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.idx).cloned();
        if t.is_some() {
            self.idx += 1;
        }
        t
    }
    fn peek_kind(&self) -> Option<TKind> {
        self.peek().map(|t| t.kind.clone())
    }
    fn peek_pos(&self) -> Option<usize> {
        self.peek().map(|t| t.pos)
    }
}

fn split_ident(raw: &str, pos: usize, src: &str) -> Result<Expr> {
    let mut parts = raw.split('.');
    let scope = parts.next().unwrap_or("").to_string();
    let path: Vec<String> = parts.map(|p| p.to_string()).collect();
    if scope.is_empty() || path.iter().any(|p| p.is_empty()) {
        return Err(syntax_error(src, pos, &format!("malformed identifier '{}'", raw)));
    }
    Ok(Expr::Field { scope, path })
}

fn parse_primary(cur: &mut Cursor, src: &str) -> Result<Expr> {
    let Some(t) = cur.peek().cloned() else {
        return Err(EngineError::configuration(
            "syntax error: unexpected end of input while parsing expression".to_string(),
        ));
    };
    match t.kind {
        TKind::LParen => {
            cur.next();
            let inner = parse_bool(cur, src, 1)?;
            match cur.peek_kind() {
                Some(TKind::RParen) => {
                    cur.next();
                    Ok(inner)
                }
                _ => {
                    let p = cur.peek_pos().unwrap_or(src.len());
                    Err(syntax_error(src, p, "expected ')'"))
                }
            }
        }
        TKind::Bang => {
            cur.next();
            let inner = parse_primary(cur, src)?;
            Ok(Expr::Not(Box::new(inner)))
        }
        TKind::Str(s) => {
            cur.next();
            Ok(Expr::Lit(Value::Str(s)))
        }
        TKind::Num(n) => {
            cur.next();
            let v: i64 = n
                .parse()
                .map_err(|_| syntax_error(src, t.pos, &format!("invalid integer '{}'", n)))?;
            Ok(Expr::Lit(Value::Int(v)))
        }
        TKind::Ident(name) => {
            cur.next();
            // function call?
            if matches!(cur.peek_kind(), Some(TKind::LParen)) {
                cur.next(); // consume '('
                let mut args: Vec<Expr> = Vec::new();
                if matches!(cur.peek_kind(), Some(TKind::RParen)) {
                    cur.next();
                    return Ok(Expr::Call { name, args });
                }
                loop {
                    args.push(parse_bool(cur, src, 1)?);
                    match cur.peek_kind() {
                        Some(TKind::Comma) => {
                            cur.next();
                        }
                        Some(TKind::RParen) => {
                            cur.next();
                            break;
                        }
                        _ => {
                            let p = cur.peek_pos().unwrap_or(src.len());
                            return Err(syntax_error(src, p, "expected ',' or ')' in argument list"));
                        }
                    }
                }
                return Ok(Expr::Call { name, args });
            }
            match name.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                _ => split_ident(&name, t.pos, src),
            }
        }
        _ => Err(syntax_error(src, t.pos, "expected expression")),
    }
}

fn cmp_op_of(kind: &TKind) -> Option<CmpOp> {
    match kind {
        TKind::Eq => Some(CmpOp::Eq),
        TKind::Ne => Some(CmpOp::Ne),
        TKind::Lt => Some(CmpOp::Lt),
        TKind::Le => Some(CmpOp::Le),
        TKind::Gt => Some(CmpOp::Gt),
        TKind::Ge => Some(CmpOp::Ge),
        _ => None,
    }
}

fn parse_comparison(cur: &mut Cursor, src: &str) -> Result<Expr> {
    let left = parse_primary(cur, src)?;
    if let Some(kind) = cur.peek_kind() {
        if let Some(op) = cmp_op_of(&kind) {
            cur.next();
            let right = parse_primary(cur, src)?;
            return Ok(Expr::Cmp { op, left: Box::new(left), right: Box::new(right) });
        }
    }
    Ok(left)
}

// precedence: OR=1, AND=2, comparisons bind tighter and are handled in
// parse_comparison.
fn parse_bool(cur: &mut Cursor, src: &str, min_prec: u8) -> Result<Expr> {
    let mut left = parse_comparison(cur, src)?;
    loop {
        let prec = match cur.peek_kind() {
            Some(TKind::OrOr) => 1,
            Some(TKind::AndAnd) => 2,
            _ => break,
        };
        if prec < min_prec {
            break;
        }
        let kind = cur.peek_kind().expect("peeked above");
        cur.next();
        let right = parse_bool(cur, src, prec + 1)?;
        left = match kind {
            TKind::OrOr => Expr::Or(Box::new(left), Box::new(right)),
            TKind::AndAnd => Expr::And(Box::new(left), Box::new(right)),
            _ => unreachable!(),
        };
    }
    Ok(left)
}

/// Compile an expression string into an [`Expr`] tree.
pub fn compile(src: &str) -> Result<Expr> {
    let toks = lex(src)?;
    if toks.is_empty() {
        return Err(EngineError::configuration("empty matcher expression".to_string()));
    }
    let mut cur = Cursor { toks, idx: 0 };
    let expr = parse_bool(&mut cur, src, 1)?;
    if let Some(t) = cur.peek() {
        return Err(syntax_error(src, t.pos, "trailing input after expression"));
    }
    Ok(expr)
}

// --- evaluation -----------------------------------------------------------

/// Comparison semantics: when both operands parse as integers the
/// comparison is numeric, otherwise strings compare lexicographically.
fn compare(left: &Value, right: &Value) -> Result<Ordering> {
    let as_int = |v: &Value| -> Option<i64> {
        match v {
            Value::Int(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    };
    if let (Some(l), Some(r)) = (as_int(left), as_int(right)) {
        return Ok(l.cmp(&r));
    }
    match (left, right) {
        (Value::Str(l), Value::Str(r)) => Ok(l.cmp(r)),
        (Value::Str(l), Value::Int(r)) => Ok(l.cmp(&r.to_string())),
        (Value::Int(l), Value::Str(r)) => Ok(l.to_string().cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Ok(l.cmp(r)),
        (Value::Json(l), Value::Json(r)) => {
            if l == r {
                Ok(Ordering::Equal)
            } else {
                // unequal JSON values have no defined order; report as
                // unequal via a stable surrogate
                Ok(l.to_string().cmp(&r.to_string()))
            }
        }
        (l, r) => Err(EngineError::evaluation(format!(
            "cannot compare {:?} with {:?}",
            l, r
        ))),
    }
}

fn eval_bool_value(v: Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(EngineError::evaluation(format!(
            "expected boolean, got '{}'",
            other.to_text()
        ))),
    }
}

/// Evaluate a compiled expression against a binding scope.
pub fn eval(expr: &Expr, scope: &dyn EvalScope) -> Result<Value> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Field { scope: s, path } => scope.field(s, path).ok_or_else(|| {
            EngineError::evaluation(format!(
                "unbound variable '{}{}{}'",
                s,
                if path.is_empty() { "" } else { "." },
                path.join(".")
            ))
        }),
        Expr::Not(inner) => {
            let v = eval_bool_value(eval(inner, scope)?)?;
            Ok(Value::Bool(!v))
        }
        Expr::And(l, r) => {
            if !eval_bool_value(eval(l, scope)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool_value(eval(r, scope)?)?))
        }
        Expr::Or(l, r) => {
            if eval_bool_value(eval(l, scope)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool_value(eval(r, scope)?)?))
        }
        Expr::Cmp { op, left, right } => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            let ord = compare(&l, &r)?;
            let out = match op {
                CmpOp::Eq => ord == Ordering::Equal,
                CmpOp::Ne => ord != Ordering::Equal,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
            };
            Ok(Value::Bool(out))
        }
        Expr::Call { name, args } => {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(eval(a, scope)?);
            }
            scope.call(name, &vals)
        }
    }
}

/// Evaluate and require a boolean result (matchers).
pub fn eval_to_bool(expr: &Expr, scope: &dyn EvalScope) -> Result<bool> {
    eval_bool_value(eval(expr, scope)?)
}

#[cfg(test)]
#[path = "expr_tests.rs"]
mod expr_tests;
