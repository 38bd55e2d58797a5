//! Python interpreter emulation.
//!
//! Runs a small, closed subset of Python: imports, `print`, assignment,
//! REPL echo of bare expressions, literals, f-strings, arithmetic, a few
//! builtins and `open(...)` file access. Anything outside the subset makes
//! the whole snippet [`Outcome::Unrecognized`] so it is never half-applied.

use super::{fail, pip};
use crate::router::{Invocation, Outcome, Rule, RuleTable, ToolGrammar};
use crate::state::SimulatorState;
use crate::types::{CommandResult, Mutation};
use crate::vfs::{NodeKind, VfsError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const VERSION: &str = "3.12.0";

const BANNER: &str = "Python 3.12.0 (main, Jan  1 2024, 00:00:00) [GCC 12.2.0] on linux\n\
Type \"help\", \"copyright\", \"credits\" or \"license\" for more information.";

/// A value bound to a Python variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PyValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{f}")
    }
}

impl PyValue {
    /// What `str()` and `print` show.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            _ => self.repr(),
        }
    }

    /// What the REPL echoes.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('\n', "\\n")
                    .replace('\t', "\\t");
                if s.contains('\'') && !s.contains('"') {
                    format!("\"{escaped}\"")
                } else {
                    format!("'{}'", escaped.replace('\'', "\\'"))
                }
            }
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::None => "None".to_string(),
        }
    }

    const fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "str",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::None => "NoneType",
        }
    }

    fn as_number(&self) -> Option<Num> {
        match self {
            Self::Int(i) => Some(Num::Int(*i)),
            Self::Bool(b) => Some(Num::Int(i64::from(*b))),
            Self::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    #[allow(clippy::cast_precision_loss)]
    const fn float(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PyError {
    /// Outside the emulated subset.
    Unsupported,
    Raise { kind: &'static str, message: String },
}

fn raise(kind: &'static str, message: impl Into<String>) -> PyError {
    PyError::Raise {
        kind,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq)]
enum Val {
    Py(PyValue),
    File { path: String, mode: Mode },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(PyValue),
    Str(String),
    FStr(String),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Dot,
}

const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "=",
];

fn lex_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) -> Result<String, PyError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            None => return Err(raise("SyntaxError", "unterminated string literal")),
            Some(c) if c == quote => return Ok(text),
            Some('\\') => match chars.next() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some(c @ ('\\' | '\'' | '"')) => text.push(c),
                Some(c) => {
                    text.push('\\');
                    text.push(c);
                }
                None => return Err(raise("SyntaxError", "unterminated string literal")),
            },
            Some(c) => text.push(c),
        }
    }
}

fn lex(source: &str) -> Result<Vec<Tok>, PyError> {
    let mut chars = source.chars().peekable();
    let mut toks = Vec::new();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => break,
            '(' | ')' | ',' | '.' if !(c == '.' && matches!(toks.last(), Some(Tok::Op(_)) | None)) => {
                chars.next();
                toks.push(match c {
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    ',' => Tok::Comma,
                    _ => Tok::Dot,
                });
            }
            '\'' | '"' => {
                chars.next();
                toks.push(Tok::Str(lex_string(&mut chars, c)?));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.' || d == '_') {
                        break;
                    }
                    text.push(d);
                    chars.next();
                }
                let text = text.replace('_', "");
                let value = if text.contains('.') {
                    text.parse().map(PyValue::Float).map_err(|_| PyError::Unsupported)?
                } else {
                    text.parse().map(PyValue::Int).map_err(|_| PyError::Unsupported)?
                };
                toks.push(Tok::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_alphanumeric() || d == '_') {
                        break;
                    }
                    name.push(d);
                    chars.next();
                }
                match (name.as_str(), chars.peek()) {
                    ("f" | "F", Some(&q @ ('\'' | '"'))) => {
                        chars.next();
                        toks.push(Tok::FStr(lex_string(&mut chars, q)?));
                    }
                    _ => toks.push(Tok::Name(name)),
                }
            }
            _ => {
                let rest: String = chars.clone().take(2).collect();
                let op = OPERATORS
                    .iter()
                    .copied()
                    .find(|op| rest.starts_with(op))
                    .ok_or(PyError::Unsupported)?;
                for _ in 0..op.len() {
                    chars.next();
                }
                toks.push(Tok::Op(op));
            }
        }
    }
    Ok(toks)
}

static IMPORT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^import\s+(.+)$").ok());
static FROM_IMPORT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^from\s+([A-Za-z_][\w.]*)\s+import\s+(.+)$").ok()
});
static ASSIGN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*(\+|-|\*|/)?=(.*)$").ok()
});
static WITH_OPEN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^with\s+(open\s*\(.*\))\s+as\s+([A-Za-z_]\w*)\s*:$").ok()
});
static KEYWORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(def|class|for|while|if|elif|else|try|except|finally|return|lambda|async|await|yield|global|nonlocal|del|raise|assert|pass|break|continue|match)\b",
    )
    .ok()
});
static STATEMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"^(import\s+[A-Za-z_]|from\s+[A-Za-z_][\w.]*\s+import\s|print\s*\(|with\s+open\s*\(|open\s*\(|[A-Za-z_]\w*(\s+[-+*/]?=\s*[^=\s]|\s*[-+*/]?=\s+\S)|[A-Za-z_][\w.]*\(.*\)\s*$|[fF]?["']|\d[\d_.]*\s*([-+*/%]|$)|(def|class|for|while|if)\s.*:\s*$)"#,
    )
    .ok()
});

fn captures<'t>(re: &LazyLock<Option<Regex>>, text: &'t str) -> Option<regex::Captures<'t>> {
    re.as_ref()?.captures(text)
}

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Whether a line typed at the prompt is Python rather than shell.
#[must_use]
pub fn is_statement(line: &str) -> bool {
    let first = line.lines().next().unwrap_or_default().trim();
    is_match(&STATEMENT, first) && !first.starts_with("echo ")
}

struct Interp<'s> {
    state: &'s mut SimulatorState,
    handles: BTreeMap<String, Val>,
    out: String,
    mutations: Vec<Mutation>,
}

/// Deepest operator or parenthesis nesting the parser follows.
const MAX_NESTING: usize = 100;

struct Parser<'p, 's> {
    toks: Vec<Tok>,
    pos: usize,
    depth: usize,
    interp: &'p mut Interp<'s>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), PyError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(raise("SyntaxError", "invalid syntax"))
        }
    }

    fn value(&mut self) -> Result<PyValue, PyError> {
        match self.expr()? {
            Val::Py(v) => Ok(v),
            Val::File { .. } => Err(PyError::Unsupported),
        }
    }

    fn expr(&mut self) -> Result<Val, PyError> {
        let left = self.additive()?;
        let Some(Tok::Op(op @ ("==" | "!=" | "<" | "<=" | ">" | ">="))) = self.peek().cloned() else {
            return Ok(left);
        };
        self.pos += 1;
        let right = self.additive()?;
        match (left, right) {
            (Val::Py(a), Val::Py(b)) => compare(op, &a, &b).map(|b| Val::Py(PyValue::Bool(b))),
            _ => Err(PyError::Unsupported),
        }
    }

    fn binary_chain(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Val, PyError>,
    ) -> Result<Val, PyError> {
        let mut left = next(self)?;
        while let Some(Tok::Op(op)) = self.peek().cloned() {
            if !ops.contains(&op) {
                break;
            }
            self.pos += 1;
            let right = next(self)?;
            left = match (left, right) {
                (Val::Py(a), Val::Py(b)) => Val::Py(binary(op, &a, &b)?),
                _ => return Err(PyError::Unsupported),
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Val, PyError> {
        self.binary_chain(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> Result<Val, PyError> {
        self.binary_chain(&["*", "/", "//", "%"], Self::unary)
    }

    fn unary(&mut self) -> Result<Val, PyError> {
        if self.depth >= MAX_NESTING {
            return Err(PyError::Unsupported);
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<Val, PyError> {
        match self.peek() {
            Some(Tok::Op("-")) => {
                self.pos += 1;
                match self.unary()? {
                    Val::Py(v) => binary("-", &PyValue::Int(0), &v).map(Val::Py),
                    Val::File { .. } => Err(PyError::Unsupported),
                }
            }
            Some(Tok::Op("+")) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Val, PyError> {
        let base = self.postfix()?;
        if !self.eat(&Tok::Op("**")) {
            return Ok(base);
        }
        let exponent = self.unary()?;
        match (base, exponent) {
            (Val::Py(a), Val::Py(b)) => binary("**", &a, &b).map(Val::Py),
            _ => Err(PyError::Unsupported),
        }
    }

    fn postfix(&mut self) -> Result<Val, PyError> {
        let mut value = self.primary()?;
        while self.eat(&Tok::Dot) {
            let Some(Tok::Name(method)) = self.advance() else {
                return Err(raise("SyntaxError", "invalid syntax"));
            };
            self.expect(&Tok::LParen)?;
            let (args, kwargs) = self.arguments()?;
            if !kwargs.is_empty() {
                return Err(PyError::Unsupported);
            }
            value = self.interp.method(value, &method, args)?;
        }
        Ok(value)
    }

    /// Arguments after an opening parenthesis, through the closing one.
    #[allow(clippy::type_complexity)]
    fn arguments(&mut self) -> Result<(Vec<Val>, Vec<(String, PyValue)>), PyError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            if let (Some(Tok::Name(name)), Some(Tok::Op("="))) =
                (self.toks.get(self.pos).cloned(), self.toks.get(self.pos + 1))
            {
                self.pos += 2;
                kwargs.push((name, self.value()?));
            } else {
                args.push(self.expr()?);
            }
            if self.eat(&Tok::RParen) {
                return Ok((args, kwargs));
            }
            self.expect(&Tok::Comma)?;
            if self.eat(&Tok::RParen) {
                return Ok((args, kwargs));
            }
        }
    }

    fn primary(&mut self) -> Result<Val, PyError> {
        match self.advance() {
            Some(Tok::Num(v)) => Ok(Val::Py(v)),
            Some(Tok::Str(s)) => {
                let mut text = s;
                while let Some(Tok::Str(more)) = self.peek().cloned() {
                    self.pos += 1;
                    text.push_str(&more);
                }
                Ok(Val::Py(PyValue::Str(text)))
            }
            Some(Tok::FStr(template)) => self.interp.format(&template).map(|s| Val::Py(PyValue::Str(s))),
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Name(name)) => {
                if self.eat(&Tok::LParen) {
                    let (args, kwargs) = self.arguments()?;
                    return self.interp.call(&name, args, &kwargs);
                }
                self.interp.lookup(&name)
            }
            _ => Err(raise("SyntaxError", "invalid syntax")),
        }
    }
}

fn compare(op: &str, a: &PyValue, b: &PyValue) -> Result<bool, PyError> {
    let ordering = match (a.as_number(), b.as_number(), a, b) {
        (Some(x), Some(y), _, _) => x.float().partial_cmp(&y.float()),
        (_, _, PyValue::Str(x), PyValue::Str(y)) => Some(x.cmp(y)),
        _ => None,
    };
    match (op, ordering) {
        ("==", o) => Ok(o == Some(std::cmp::Ordering::Equal) || (o.is_none() && a == b)),
        ("!=", o) => Ok(!(o == Some(std::cmp::Ordering::Equal) || (o.is_none() && a == b))),
        (_, None) => Err(raise(
            "TypeError",
            format!(
                "'{op}' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ),
        )),
        ("<", Some(o)) => Ok(o.is_lt()),
        ("<=", Some(o)) => Ok(o.is_le()),
        (">", Some(o)) => Ok(o.is_gt()),
        (_, Some(o)) => Ok(o.is_ge()),
    }
}

fn int_op(op: &str, a: i64, b: i64) -> Result<PyValue, PyError> {
    let zero = || raise("ZeroDivisionError", "division by zero");
    let value = match op {
        "+" => a.checked_add(b),
        "-" => a.checked_sub(b),
        "*" => a.checked_mul(b),
        "//" | "%" => {
            if b == 0 {
                return Err(if op == "%" {
                    raise("ZeroDivisionError", "integer modulo by zero")
                } else {
                    raise("ZeroDivisionError", "integer division or modulo by zero")
                });
            }
            // `i64::MIN % -1` is zero; only the quotient leaves the range.
            let r = a.checked_rem(b).unwrap_or(0);
            let floored = r != 0 && (r < 0) != (b < 0);
            if op == "%" {
                Some(if floored { r + b } else { r })
            } else {
                a.checked_div(b)
                    .and_then(|q| if floored { q.checked_sub(1) } else { Some(q) })
            }
        }
        "/" => {
            if b == 0 {
                return Err(zero());
            }
            #[allow(clippy::cast_precision_loss)]
            return Ok(PyValue::Float(a as f64 / b as f64));
        }
        "**" if b >= 0 => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
        "**" => {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            return Ok(PyValue::Float((a as f64).powi(b as i32)));
        }
        _ => return Err(PyError::Unsupported),
    };
    value.map(PyValue::Int).ok_or(PyError::Unsupported)
}

fn float_op(op: &str, a: f64, b: f64) -> Result<PyValue, PyError> {
    let value = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "**" => a.powf(b),
        "/" | "//" | "%" if b == 0.0 => {
            return Err(raise("ZeroDivisionError", "float division by zero"));
        }
        "/" => a / b,
        "//" => (a / b).floor(),
        "%" => a - b * (a / b).floor(),
        _ => return Err(PyError::Unsupported),
    };
    Ok(PyValue::Float(value))
}

/// Largest string, in bytes, a snippet may build.
const MAX_STR_BYTES: usize = 1 << 20;

fn check_size(bytes: usize) -> Result<(), PyError> {
    if bytes > MAX_STR_BYTES {
        Err(raise("MemoryError", ""))
    } else {
        Ok(())
    }
}

fn binary(op: &'static str, a: &PyValue, b: &PyValue) -> Result<PyValue, PyError> {
    match (a, b, a.as_number(), b.as_number()) {
        (_, _, Some(Num::Int(x)), Some(Num::Int(y))) => int_op(op, x, y),
        (_, _, Some(x), Some(y)) => float_op(op, x.float(), y.float()),
        (PyValue::Str(x), PyValue::Str(y), _, _) if op == "+" => {
            check_size(x.len().saturating_add(y.len()))?;
            Ok(PyValue::Str(format!("{x}{y}")))
        }
        (PyValue::Str(s), _, _, Some(Num::Int(n))) | (_, PyValue::Str(s), Some(Num::Int(n)), _)
            if op == "*" =>
        {
            let count = usize::try_from(n).unwrap_or(0);
            check_size(s.len().saturating_mul(count))?;
            Ok(PyValue::Str(s.repeat(count)))
        }
        (PyValue::Str(_), _, _, _) if op == "%" => Err(PyError::Unsupported),
        _ => Err(raise(
            "TypeError",
            format!(
                "unsupported operand type(s) for {op}: '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

fn single(args: Vec<Val>, name: &str) -> Result<PyValue, PyError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(Val::Py(v)), None) => Ok(v),
        (Some(Val::File { .. }), None) => Err(PyError::Unsupported),
        _ => Err(raise(
            "TypeError",
            format!("{name}() takes exactly one argument"),
        )),
    }
}

fn io_error(error: &VfsError, path: &str) -> PyError {
    match error {
        VfsError::TypeMismatch {
            found: NodeKind::Directory,
            ..
        } => raise("IsADirectoryError", format!("[Errno 21] Is a directory: '{path}'")),
        VfsError::TypeMismatch { .. } => {
            raise("NotADirectoryError", format!("[Errno 20] Not a directory: '{path}'"))
        }
        _ => raise(
            "FileNotFoundError",
            format!("[Errno 2] No such file or directory: '{path}'"),
        ),
    }
}

impl Interp<'_> {
    fn eval(&mut self, source: &str) -> Result<Val, PyError> {
        let toks = lex(source)?;
        if toks.is_empty() {
            return Err(raise("SyntaxError", "invalid syntax"));
        }
        let mut parser = Parser {
            toks,
            pos: 0,
            depth: 0,
            interp: self,
        };
        let value = parser.expr()?;
        if parser.pos < parser.toks.len() {
            return Err(raise("SyntaxError", "invalid syntax"));
        }
        Ok(value)
    }

    fn eval_value(&mut self, source: &str) -> Result<PyValue, PyError> {
        match self.eval(source)? {
            Val::Py(v) => Ok(v),
            Val::File { .. } => Err(PyError::Unsupported),
        }
    }

    fn lookup(&self, name: &str) -> Result<Val, PyError> {
        match name {
            "True" => return Ok(Val::Py(PyValue::Bool(true))),
            "False" => return Ok(Val::Py(PyValue::Bool(false))),
            "None" => return Ok(Val::Py(PyValue::None)),
            _ => {}
        }
        if let Some(handle) = self.handles.get(name) {
            return Ok(handle.clone());
        }
        if let Some(value) = self.state.python.variables.get(name) {
            return Ok(Val::Py(value.clone()));
        }
        if self.state.python.imports.contains(name) {
            return Err(PyError::Unsupported);
        }
        Err(raise("NameError", format!("name '{name}' is not defined")))
    }

    /// Render an f-string template.
    fn format(&mut self, template: &str) -> Result<String, PyError> {
        let mut out = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let field: String = chars.by_ref().take_while(|&c| c != '}').collect();
                    let (expr, spec) = field.split_once(':').unwrap_or((&field, ""));
                    let value = self.eval_value(expr)?;
                    out.push_str(&apply_spec(&value, spec)?);
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn call(&mut self, name: &str, args: Vec<Val>, kwargs: &[(String, PyValue)]) -> Result<Val, PyError> {
        if name != "print" && name != "open" && !kwargs.is_empty() {
            return Err(PyError::Unsupported);
        }
        let value = match name {
            "print" => {
                let mut sep = " ".to_string();
                let mut end = "\n".to_string();
                for (key, value) in kwargs {
                    match key.as_str() {
                        "sep" => sep = value.display(),
                        "end" => end = value.display(),
                        _ => return Err(PyError::Unsupported),
                    }
                }
                let parts = args
                    .into_iter()
                    .map(|a| match a {
                        Val::Py(v) => Ok(v.display()),
                        Val::File { .. } => Err(PyError::Unsupported),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.out.push_str(&parts.join(&sep));
                self.out.push_str(&end);
                PyValue::None
            }
            "len" => match single(args, "len")? {
                PyValue::Str(s) => PyValue::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX)),
                other => {
                    return Err(raise(
                        "TypeError",
                        format!("object of type '{}' has no len()", other.type_name()),
                    ));
                }
            },
            "str" => PyValue::Str(single(args, "str")?.display()),
            "int" => to_int(single(args, "int")?)?,
            "float" => to_float(single(args, "float")?)?,
            "open" => return self.open(args, kwargs),
            _ => return Err(PyError::Unsupported),
        };
        Ok(Val::Py(value))
    }

    fn open(&mut self, args: Vec<Val>, kwargs: &[(String, PyValue)]) -> Result<Val, PyError> {
        if !kwargs.iter().all(|(k, _)| k == "encoding") {
            return Err(PyError::Unsupported);
        }
        let mut args = args.into_iter();
        let Some(Val::Py(PyValue::Str(path))) = args.next() else {
            return Err(PyError::Unsupported);
        };
        let mode = match args.next() {
            None => "r".to_string(),
            Some(Val::Py(PyValue::Str(mode))) => mode,
            Some(_) => return Err(PyError::Unsupported),
        };
        let absolute = self.state.vfs.resolve(&path);
        let (mode, written) = match mode.trim_end_matches('t') {
            "r" => {
                self.state.vfs.read(&absolute).map_err(|e| io_error(&e, &path))?;
                return Ok(Val::File {
                    path: absolute,
                    mode: Mode::Read,
                });
            }
            "w" => (Mode::Write, self.state.vfs.write(&absolute, "", true)),
            "a" => (Mode::Write, self.state.vfs.append(&absolute, "")),
            _ => return Err(PyError::Unsupported),
        };
        let created = written.map_err(|e| io_error(&e, &path))?;
        self.mutations.push(if created {
            Mutation::FileCreated {
                path: absolute.clone(),
            }
        } else {
            Mutation::FileWritten {
                path: absolute.clone(),
            }
        });
        Ok(Val::File {
            path: absolute,
            mode,
        })
    }

    fn method(&mut self, target: Val, method: &str, args: Vec<Val>) -> Result<Val, PyError> {
        match (target, method) {
            (Val::File { path, mode: Mode::Write }, "write") => {
                let PyValue::Str(text) = single(args, "write")? else {
                    return Err(raise("TypeError", "write() argument must be str"));
                };
                self.state
                    .vfs
                    .append(&path, &text)
                    .map_err(|e| io_error(&e, &path))?;
                Ok(Val::Py(PyValue::Int(
                    i64::try_from(text.chars().count()).unwrap_or(i64::MAX),
                )))
            }
            (Val::File { path, mode: Mode::Read }, "read") if args.is_empty() => {
                let content = self.state.vfs.read(&path).map_err(|e| io_error(&e, &path))?;
                Ok(Val::Py(PyValue::Str(content.to_string())))
            }
            (Val::Py(PyValue::Str(s)), name) if args.is_empty() => {
                let value = match name {
                    "upper" => s.to_uppercase(),
                    "lower" => s.to_lowercase(),
                    "strip" => s.trim().to_string(),
                    _ => return Err(PyError::Unsupported),
                };
                Ok(Val::Py(PyValue::Str(value)))
            }
            _ => Err(PyError::Unsupported),
        }
    }

    fn assign(&mut self, name: &str, value: PyValue) {
        self.mutations.push(Mutation::PythonVariableSet {
            name: name.to_string(),
            value: value.repr(),
        });
        self.state.python.variables.insert(name.to_string(), value);
    }

    fn import(&mut self, module: &str) -> Result<(), PyError> {
        let valid = module
            .split('.')
            .all(|part| part.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if !valid {
            return Err(raise("SyntaxError", "invalid syntax"));
        }
        if self.state.python.imports.insert(module.to_string()) {
            self.mutations.push(Mutation::PythonImported {
                module: module.to_string(),
            });
        }
        Ok(())
    }

    fn statement(&mut self, line: &str, echo: bool) -> Result<(), PyError> {
        if is_match(&KEYWORD, line) || line.ends_with(':') {
            return Err(PyError::Unsupported);
        }
        if let Some(caps) = captures(&IMPORT, line) {
            for item in caps[1].split(',') {
                let module = item.split_whitespace().next().unwrap_or_default();
                self.import(module)?;
            }
            return Ok(());
        }
        if let Some(caps) = captures(&FROM_IMPORT, line) {
            return self.import(&caps[1]);
        }
        if let Some(caps) = captures(&ASSIGN, line) {
            let rhs = caps[3].trim_start();
            if !caps[3].starts_with('=') {
                let name = caps[1].to_string();
                let mut value = self.eval_value(rhs)?;
                if let Some(op) = caps.get(2) {
                    let current = match self.lookup(&name)? {
                        Val::Py(v) => v,
                        Val::File { .. } => return Err(PyError::Unsupported),
                    };
                    let op = match op.as_str() {
                        "+" => "+",
                        "-" => "-",
                        "*" => "*",
                        _ => "/",
                    };
                    value = binary(op, &current, &value)?;
                }
                self.assign(&name, value);
                return Ok(());
            }
        }
        match self.eval(line)? {
            Val::Py(PyValue::None) => {}
            Val::Py(value) if echo => {
                self.out.push_str(&value.repr());
                self.out.push('\n');
            }
            Val::Py(_) => {}
            Val::File { .. } if echo => return Err(PyError::Unsupported),
            Val::File { .. } => {}
        }
        Ok(())
    }

    /// Run every line, tracking `with open(...) as f:` blocks.
    fn run(&mut self, code: &str, echo: bool) -> Result<(), (usize, PyError)> {
        let mut block: Option<String> = None;
        for (index, raw) in code.lines().enumerate() {
            let number = index + 1;
            let indented = raw.starts_with([' ', '\t']);
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = &block {
                if indented {
                    self.statement(line, false).map_err(|e| (number, e))?;
                    continue;
                }
                self.handles.remove(name);
                block = None;
            } else if indented {
                return Err((number, raise("IndentationError", "unexpected indent")));
            }
            if let Some(caps) = captures(&WITH_OPEN, line) {
                let handle = self.eval(&caps[1]).map_err(|e| (number, e))?;
                self.handles.insert(caps[2].to_string(), handle);
                block = Some(caps[2].to_string());
                continue;
            }
            self.statement(line, echo).map_err(|e| (number, e))?;
        }
        if let Some(name) = block {
            self.handles.remove(&name);
        }
        Ok(())
    }
}

fn apply_spec(value: &PyValue, spec: &str) -> Result<String, PyError> {
    if spec.is_empty() {
        return Ok(value.display());
    }
    let precision = spec
        .strip_prefix('.')
        .and_then(|p| p.strip_suffix('f'))
        .and_then(|p| p.parse::<usize>().ok())
        .ok_or(PyError::Unsupported)?;
    check_size(precision)?;
    let number = value.as_number().ok_or_else(|| {
        raise(
            "ValueError",
            format!("Unknown format code 'f' for object of type '{}'", value.type_name()),
        )
    })?;
    Ok(format!("{:.precision$}", number.float()))
}

fn to_int(value: PyValue) -> Result<PyValue, PyError> {
    match value {
        PyValue::Int(i) => Ok(PyValue::Int(i)),
        PyValue::Bool(b) => Ok(PyValue::Int(i64::from(b))),
        #[allow(clippy::cast_possible_truncation)]
        PyValue::Float(f) if f.is_finite() => Ok(PyValue::Int(f.trunc() as i64)),
        PyValue::Str(s) => s.trim().parse().map(PyValue::Int).map_err(|_| {
            raise(
                "ValueError",
                format!("invalid literal for int() with base 10: '{s}'"),
            )
        }),
        other => Err(raise(
            "TypeError",
            format!(
                "int() argument must be a string or a real number, not '{}'",
                other.type_name()
            ),
        )),
    }
}

fn to_float(value: PyValue) -> Result<PyValue, PyError> {
    match value {
        PyValue::Str(s) => s
            .trim()
            .parse()
            .map(PyValue::Float)
            .map_err(|_| raise("ValueError", format!("could not convert string to float: '{s}'"))),
        other => other.as_number().map(|n| PyValue::Float(n.float())).ok_or_else(|| {
            raise(
                "TypeError",
                format!(
                    "float() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ),
            )
        }),
    }
}

/// Run code against the state. `origin` names the file in tracebacks.
fn run_code(code: &str, state: &mut SimulatorState, echo: bool, origin: &str) -> Outcome {
    let mut scratch = state.clone();
    let mut interp = Interp {
        state: &mut scratch,
        handles: BTreeMap::new(),
        out: String::new(),
        mutations: Vec::new(),
    };
    let outcome = interp.run(code, echo);
    let stdout = interp.out.strip_suffix('\n').unwrap_or(&interp.out).to_string();
    let mutations = std::mem::take(&mut interp.mutations);
    let result = match outcome {
        Ok(()) => CommandResult::ok(stdout),
        Err((_, PyError::Unsupported)) => return Outcome::Unrecognized,
        Err((line, PyError::Raise { kind, message })) => {
            let error = if message.is_empty() {
                kind.to_string()
            } else {
                format!("{kind}: {message}")
            };
            let mut result = CommandResult::error(
                1,
                format!(
                    "Traceback (most recent call last):\n  File \"{origin}\", line {line}, in <module>\n{error}"
                ),
            );
            result.stdout = stdout;
            result
        }
    };
    *state = scratch;
    result.with_all(mutations).into()
}

/// Run Python typed directly at the prompt, echoing bare expressions.
pub fn run_snippet(code: &str, state: &mut SimulatorState) -> Outcome {
    run_code(code, state, true, "<stdin>")
}

pub fn register(table: &mut RuleTable) {
    table.add_grammar(ToolGrammar {
        verb: "python",
        aliases: &["python3"],
        subcommands: false,
        value_flags: &["c", "m"],
        flag_aliases: &[("version", "V")],
        stop_at_positional: true,
    });
    table.add(Rule {
        verb: "python",
        subcommand: None,
        required: &[],
        optional: &["u", "B"],
        handler: interpreter,
    });
    table.add(Rule {
        verb: "python",
        subcommand: None,
        required: &["V"],
        optional: &[],
        handler: version,
    });
    table.add(Rule {
        verb: "python",
        subcommand: None,
        required: &["c"],
        optional: &["u", "B"],
        handler: command,
    });
    table.add(Rule {
        verb: "python",
        subcommand: None,
        required: &["m"],
        optional: &["u", "B"],
        handler: module,
    });
}

fn version(_inv: &Invocation, _state: &mut SimulatorState) -> Outcome {
    CommandResult::ok(format!("Python {VERSION}")).into()
}

fn interpreter(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(script) = inv.arg(0) else {
        return CommandResult::ok(BANNER).into();
    };
    let path = state.vfs.resolve(script);
    match state.vfs.read(&path) {
        Ok(code) => {
            let code = code.to_string();
            run_code(&code, state, false, &path)
        }
        Err(_) => fail(
            2,
            format!(
                "{}: can't open file '{path}': [Errno 2] No such file or directory",
                inv.program
            ),
        ),
    }
}

fn command(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    match inv.value("c") {
        Some(code) => run_code(code, state, false, "<string>"),
        None => fail(2, "Argument expected for the -c option"),
    }
}

fn module(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    match inv.value("m") {
        Some("venv") => venv(inv, state),
        Some("pip") => {
            let words: Vec<String> = std::iter::once("pip".to_string())
                .chain(inv.args.iter().cloned())
                .collect();
            pip::dispatch(&words, state)
        }
        Some(_) => Outcome::Unrecognized,
        None => fail(2, "Argument expected for the -m option"),
    }
}

fn venv(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(dir) = inv.arg(0) else {
        return fail(2, "usage: venv [-h] ENV_DIR [ENV_DIR ...]\nvenv: error: the following arguments are required: ENV_DIR");
    };
    let root = state.vfs.resolve(dir);
    if state.vfs.is_file(&root) {
        return fail(1, format!("Error: [Errno 17] File exists: '{root}'"));
    }
    let site = format!("{root}/lib/python3.12/site-packages");
    let bin = format!("{root}/bin");
    let mut result = CommandResult::default();
    for path in [&site, &bin] {
        match state.vfs.mkdir(path, true) {
            Ok(created) => result
                .mutations
                .extend(created.into_iter().map(|path| Mutation::DirCreated { path })),
            Err(e) => return fail(1, format!("Error: {e}")),
        }
    }
    let files = [
        (
            format!("{root}/pyvenv.cfg"),
            format!("home = /usr/bin\ninclude-system-site-packages = false\nversion = {VERSION}\n"),
        ),
        (
            format!("{bin}/activate"),
            format!("# source this file\nexport VIRTUAL_ENV=\"{root}\"\nexport PATH=\"$VIRTUAL_ENV/bin:$PATH\"\n"),
        ),
        (format!("{bin}/python"), String::new()),
        (format!("{bin}/pip"), String::new()),
    ];
    for (path, content) in files {
        match state.vfs.write(&path, &content, true) {
            Ok(true) => result.mutations.push(Mutation::FileCreated { path }),
            Ok(false) => {}
            Err(e) => return fail(1, format!("Error: {e}")),
        }
    }
    result.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn snippet(code: &str, state: &mut SimulatorState) -> Result<CommandResult, String> {
        match run_snippet(code, state) {
            Outcome::Done(result) => Ok(result),
            Outcome::Unrecognized => Err(format!("unrecognized: {code}")),
        }
    }

    #[test]
    fn test_is_statement() {
        for line in [
            "print('hi')",
            "import os",
            "from pathlib import Path",
            "x = 5",
            "total += 1",
            "name.upper()",
            "2 + 3",
            "'hello'",
            "with open('a.txt', 'w') as f:",
            "def main():",
        ] {
            assert!(is_statement(line), "{line}");
        }
        for line in ["ls -la", "X=1", "echo x = 1", "git commit -m 'x = 1'", "cd .."] {
            assert!(!is_statement(line), "{line}");
        }
    }

    #[test]
    fn test_print_and_arithmetic() -> TestResult {
        let mut state = SimulatorState::default();
        let result = snippet("print(1 + 2 * 3, 7 / 2, 7 // 2, -7 % 3, 2 ** 10)", &mut state)?;
        assert_eq!(result.stdout, "7 3.5 3 2 1024");
        let result = snippet("print('a', 'b', sep='-')", &mut state)?;
        assert_eq!(result.stdout, "a-b");
        Ok(())
    }

    #[test]
    fn test_assignment_and_repl_echo() -> TestResult {
        let mut state = SimulatorState::default();
        let result = snippet("name = 'world'", &mut state)?;
        assert!(result.stdout.is_empty());
        assert_eq!(
            result.mutations,
            vec![Mutation::PythonVariableSet {
                name: "name".to_string(),
                value: "'world'".to_string()
            }]
        );
        let result = snippet("f\"hello {name.upper()}\"", &mut state)?;
        assert_eq!(result.stdout, "'hello WORLD'");
        let result = snippet("len(name)", &mut state)?;
        assert_eq!(result.stdout, "5");
        let result = snippet("3.0", &mut state)?;
        assert_eq!(result.stdout, "3.0");
        Ok(())
    }

    #[test]
    fn test_name_error_traceback() -> TestResult {
        let mut state = SimulatorState::default();
        let result = snippet("print(missing)", &mut state)?;
        assert_eq!(result.exit_code, 1);
        assert!(result
            .stderr
            .ends_with("NameError: name 'missing' is not defined"));
        let result = snippet("1 / 0", &mut state)?;
        assert!(result.stderr.ends_with("ZeroDivisionError: division by zero"));
        Ok(())
    }

    #[test]
    fn test_imports_are_recorded() -> TestResult {
        let mut state = SimulatorState::default();
        snippet("import os, sys\nfrom pathlib import Path", &mut state)?;
        let imports: Vec<&str> = state.python.imports.iter().map(String::as_str).collect();
        assert_eq!(imports, vec!["os", "pathlib", "sys"]);
        Ok(())
    }

    #[test]
    fn test_from_import_records_module() -> TestResult {
        let mut state = SimulatorState::default();
        let result = snippet("from os import path", &mut state)?;
        assert!(result.success());
        assert_eq!(
            result.mutations,
            vec![Mutation::PythonImported {
                module: "os".to_string()
            }]
        );
        assert!(state.python.imports.contains("os"));
        Ok(())
    }

    #[test]
    fn test_integer_division_edge_cases() -> TestResult {
        let mut state = SimulatorState::default();
        let result = snippet("print(-7 // 2, 7 % -3, -7 % 3, 7 // -2)", &mut state)?;
        assert_eq!(result.stdout, "-4 -2 2 -4");
        let result = snippet("print((-9223372036854775807 - 1) % -1)", &mut state)?;
        assert_eq!(result.stdout, "0");

        let result = snippet("5 // 0", &mut state)?;
        assert!(result
            .stderr
            .ends_with("ZeroDivisionError: integer division or modulo by zero"));
        let result = snippet("5 % 0", &mut state)?;
        assert!(result.stderr.ends_with("ZeroDivisionError: integer modulo by zero"));

        // Results past i64 are left to the fallback rather than wrapped.
        for code in [
            "(-9223372036854775807 - 1) // -1",
            "9223372036854775807 + 1",
            "-(-9223372036854775807 - 1)",
        ] {
            assert_eq!(run_snippet(code, &mut state), Outcome::Unrecognized, "{code}");
        }
        Ok(())
    }

    #[test]
    fn test_oversized_strings_raise_memory_error() -> TestResult {
        let mut state = SimulatorState::default();
        let result = snippet("print(len('ab' * 4000000000000000))", &mut state)?;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.ends_with("\nMemoryError"));

        let result = snippet("f\"{1.5:.999999999f}\"", &mut state)?;
        assert!(result.stderr.ends_with("\nMemoryError"));

        snippet("x = 'a' * 1048576", &mut state)?;
        let result = snippet("x += 'b'", &mut state)?;
        assert!(result.stderr.ends_with("\nMemoryError"));

        let result = snippet("print(len('ab' * 3), f'{2:.2f}')", &mut state)?;
        assert_eq!(result.stdout, "6 2.00");
        Ok(())
    }

    #[test]
    fn test_deep_nesting_is_left_to_fallback() {
        let mut state = SimulatorState::default();
        let deep = format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000));
        assert_eq!(run_snippet(&deep, &mut state), Outcome::Unrecognized);
        let signs = format!("print({}1)", "-".repeat(5_000));
        assert_eq!(run_snippet(&signs, &mut state), Outcome::Unrecognized);
        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert!(matches!(run_snippet(&shallow, &mut state), Outcome::Done(r) if r.stdout == "1"));
    }

    #[tokio::test]
    async fn test_overflowing_remainder_from_command_line() {
        let router = Router::default();
        let (result, _) = router
            .execute(
                "python -c \"print((-9223372036854775807 - 1) % -1)\"",
                &SimulatorState::default(),
            )
            .await;
        assert_eq!(result.stdout, "0");
        assert!(result.success());
    }

    #[test]
    fn test_unrecognized_snippet_applies_nothing() {
        let mut state = SimulatorState::default();
        let before = state.clone();
        let outcome = run_snippet("x = 1\nfor i in range(3):\n    print(i)", &mut state);
        assert_eq!(outcome, Outcome::Unrecognized);
        assert_eq!(state, before);
        assert_eq!(
            run_snippet("import os\nos.getcwd()", &mut SimulatorState::default()),
            Outcome::Unrecognized
        );
    }

    #[test]
    fn test_file_writes() -> TestResult {
        let mut state = SimulatorState::default();
        snippet("open('notes.txt', 'w').write('one\\n')", &mut state)?;
        assert_eq!(state.vfs.read("/home/user/notes.txt")?, "one\n");
        snippet(
            "with open('notes.txt', 'a') as f:\n    f.write('two\\n')\n    f.write('three\\n')\nprint('done')",
            &mut state,
        )?;
        assert_eq!(state.vfs.read("notes.txt")?, "one\ntwo\nthree\n");
        let result = snippet("open('notes.txt').read()", &mut state)?;
        assert_eq!(result.stdout, "'one\\ntwo\\nthree\\n'");
        let result = snippet("open('missing/x.txt', 'w')", &mut state)?;
        assert!(result.stderr.contains("FileNotFoundError"));
        Ok(())
    }

    #[tokio::test]
    async fn test_python_cli_forms() -> TestResult {
        let router = Router::default();
        let state = SimulatorState::default();
        let (version, _) = router.execute("python3 --version", &state).await;
        assert_eq!(version.stdout, "Python 3.12.0");
        let (inline, _) = router.execute("python -c \"print(2 + 2)\"", &state).await;
        assert_eq!(inline.stdout, "4");

        let (_, state) = router
            .execute("echo \"print('from script')\" > app.py", &state)
            .await;
        let (script, _) = router.execute("python3 app.py", &state).await;
        assert_eq!(script.stdout, "from script");
        let (missing, _) = router.execute("python3 nope.py", &state).await;
        assert_eq!(missing.exit_code, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_venv_layout() {
        let router = Router::default();
        let (result, state) = router
            .execute("python3 -m venv .venv", &SimulatorState::default())
            .await;
        assert!(result.success());
        assert!(state.vfs.is_file("/home/user/.venv/bin/activate"));
        assert!(state.vfs.is_dir("/home/user/.venv/lib/python3.12/site-packages"));
        assert!(state.vfs.is_file(".venv/pyvenv.cfg"));
    }
}
