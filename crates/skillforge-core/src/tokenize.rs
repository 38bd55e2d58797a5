//! Shell-style lexing of learner input.
//!
//! Words keep their expansion sites (`$VAR`, `${VAR}`, leading `~`) so each
//! segment of a `&&`/`||`/`;` chain is expanded against the environment as it
//! stands when that segment runs.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("unexpected EOF while looking for matching `{0}'")]
    UnterminatedQuote(char),
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedOperator(String),
    #[error("syntax error: unexpected end of file")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    Var(String),
    Home,
}

/// One shell word, before expansion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Word {
    pieces: Vec<Piece>,
}

impl Word {
    fn push_char(&mut self, c: char) {
        if let Some(Piece::Literal(text)) = self.pieces.last_mut() {
            text.push(c);
        } else {
            self.pieces.push(Piece::Literal(c.to_string()));
        }
    }

    /// Expand variables and `~` against `env`. Unset variables expand to "".
    #[must_use]
    pub fn expand(&self, env: &BTreeMap<String, String>, home: &str) -> String {
        self.pieces
            .iter()
            .map(|piece| match piece {
                Piece::Literal(text) => text.as_str(),
                Piece::Var(name) => env.get(name).map_or("", String::as_str),
                Piece::Home => home,
            })
            .collect()
    }

    /// The word as typed, minus quoting.
    #[must_use]
    pub fn literal(&self) -> String {
        self.pieces
            .iter()
            .map(|piece| match piece {
                Piece::Literal(text) => text.clone(),
                Piece::Var(name) => format!("${name}"),
                Piece::Home => "~".to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    Sequence,
    Pipe,
    Background,
    RedirectOut,
    RedirectAppend,
    RedirectIn,
}

impl Operator {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Sequence => ";",
            Self::Pipe => "|",
            Self::Background => "&",
            Self::RedirectOut => ">",
            Self::RedirectAppend => ">>",
            Self::RedirectIn => "<",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Word),
    Op(Operator),
}

impl Token {
    /// Text used when comparing token sets.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Word(word) => word.literal(),
            Self::Op(op) => op.symbol().to_string(),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    tokens: Vec<Token>,
    current: Option<Word>,
}

impl Lexer<'_> {
    fn word(&mut self) -> &mut Word {
        self.current.get_or_insert_with(Word::default)
    }

    fn finish_word(&mut self) {
        if let Some(word) = self.current.take() {
            self.tokens.push(Token::Word(word));
        }
    }

    fn operator(&mut self, op: Operator) {
        self.finish_word();
        self.tokens.push(Token::Op(op));
    }

    fn variable(&mut self) {
        if self.chars.peek() == Some(&'{') {
            self.chars.next();
            let name: String = self.chars.by_ref().take_while(|&c| c != '}').collect();
            self.word().pieces.push(Piece::Var(name));
            return;
        }
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_name_char(c) {
                break;
            }
            name.push(c);
            self.chars.next();
        }
        if name.is_empty() {
            self.word().push_char('$');
        } else {
            self.word().pieces.push(Piece::Var(name));
        }
    }

    fn double_quoted(&mut self) -> Result<(), TokenizeError> {
        self.word();
        loop {
            match self.chars.next() {
                None => return Err(TokenizeError::UnterminatedQuote('"')),
                Some('"') => return Ok(()),
                Some('\\') => match self.chars.next() {
                    Some(c @ ('"' | '\\' | '$' | '`')) => self.word().push_char(c),
                    Some(c) => {
                        self.word().push_char('\\');
                        self.word().push_char(c);
                    }
                    None => return Err(TokenizeError::UnterminatedQuote('"')),
                },
                Some('$') => self.variable(),
                Some(c) => self.word().push_char(c),
            }
        }
    }

    fn single_quoted(&mut self) -> Result<(), TokenizeError> {
        self.word();
        loop {
            match self.chars.next() {
                None => return Err(TokenizeError::UnterminatedQuote('\'')),
                Some('\'') => return Ok(()),
                Some(c) => self.word().push_char(c),
            }
        }
    }

    fn run(mut self) -> Result<Vec<Token>, TokenizeError> {
        while let Some(c) = self.chars.next() {
            match c {
                c if c.is_whitespace() => self.finish_word(),
                '#' if self.current.is_none() => break,
                '\'' => self.single_quoted()?,
                '"' => self.double_quoted()?,
                '\\' => {
                    if let Some(next) = self.chars.next() {
                        self.word().push_char(next);
                    }
                }
                '$' => self.variable(),
                '~' if self.current.is_none()
                    && matches!(self.chars.peek(), None | Some('/' | ' ' | '\t')) =>
                {
                    self.word().pieces.push(Piece::Home);
                }
                '&' if self.chars.peek() == Some(&'&') => {
                    self.chars.next();
                    self.operator(Operator::And);
                }
                '&' => self.operator(Operator::Background),
                '|' if self.chars.peek() == Some(&'|') => {
                    self.chars.next();
                    self.operator(Operator::Or);
                }
                '|' => self.operator(Operator::Pipe),
                ';' => self.operator(Operator::Sequence),
                '>' if self.chars.peek() == Some(&'>') => {
                    self.chars.next();
                    self.operator(Operator::RedirectAppend);
                }
                '>' => self.operator(Operator::RedirectOut),
                '<' => self.operator(Operator::RedirectIn),
                other => self.word().push_char(other),
            }
        }
        self.finish_word();
        Ok(self.tokens)
    }
}

/// Split input into words and operators.
///
/// # Errors
/// `UnterminatedQuote` when a quote is left open.
pub fn lex(input: &str) -> Result<Vec<Token>, TokenizeError> {
    Lexer {
        chars: input.chars().peekable(),
        tokens: Vec::new(),
        current: None,
    }
    .run()
}

/// How a segment is joined to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub target: Word,
    pub append: bool,
}

/// One simple command of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Connector to the previous segment; `None` for the first.
    pub connector: Option<Connector>,
    pub words: Vec<Word>,
    pub redirect: Option<Redirect>,
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
    pub segments: Vec<Segment>,
    /// First construct the emulators do not model (pipes, background jobs,
    /// input redirection).
    pub unsupported: Option<Operator>,
}

/// Parse input into a chain of simple commands.
///
/// # Errors
/// Lexing errors, a connector with no command on one side, or a redirection
/// with no target.
pub fn parse_line(input: &str) -> Result<Line, TokenizeError> {
    let mut line = Line::default();
    let mut words = Vec::new();
    let mut redirect = None;
    let mut connector = None;
    let mut tokens = lex(input)?.into_iter();

    while let Some(token) = tokens.next() {
        let op = match token {
            Token::Word(word) => {
                words.push(word);
                continue;
            }
            Token::Op(op) => op,
        };
        let next = match op {
            Operator::And => Connector::And,
            Operator::Or => Connector::Or,
            Operator::Sequence => Connector::Sequence,
            Operator::RedirectOut | Operator::RedirectAppend | Operator::RedirectIn => {
                let Some(Token::Word(target)) = tokens.next() else {
                    return Err(TokenizeError::UnexpectedEnd);
                };
                if op == Operator::RedirectIn {
                    line.unsupported.get_or_insert(op);
                } else {
                    redirect = Some(Redirect {
                        target,
                        append: op == Operator::RedirectAppend,
                    });
                }
                continue;
            }
            Operator::Pipe | Operator::Background => {
                line.unsupported.get_or_insert(op);
                Connector::Sequence
            }
        };
        if words.is_empty() {
            return Err(TokenizeError::UnexpectedOperator(op.symbol().to_string()));
        }
        line.segments.push(Segment {
            connector,
            words: std::mem::take(&mut words),
            redirect: redirect.take(),
        });
        connector = Some(next);
    }

    if words.is_empty() {
        if redirect.is_some() {
            return Err(TokenizeError::UnexpectedEnd);
        }
        if matches!(connector, Some(Connector::And | Connector::Or)) {
            return Err(TokenizeError::UnexpectedEnd);
        }
    } else {
        line.segments.push(Segment {
            connector,
            words,
            redirect,
        });
    }
    Ok(line)
}

/// Expand a short flag cluster (`-la` becomes `-l`, `-a`).
///
/// Long flags, lone dashes and negative numbers pass through unchanged.
#[must_use]
pub fn expand_short_cluster(token: &str) -> Vec<String> {
    match token.strip_prefix('-') {
        Some(rest)
            if !rest.is_empty()
                && !rest.starts_with('-')
                && rest.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            rest.chars().map(|c| format!("-{c}")).collect()
        }
        _ => vec![token.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn texts(input: &str) -> Result<Vec<String>, TokenizeError> {
        Ok(lex(input)?.iter().map(Token::text).collect())
    }

    #[test]
    fn test_lex_respects_quotes() -> TestResult {
        assert_eq!(
            texts(r#"git commit -m "first commit" 'a b'"#)?,
            vec!["git", "commit", "-m", "first commit", "a b"]
        );
        assert_eq!(texts(r"echo a\ b")?, vec!["echo", "a b"]);
        assert_eq!(texts(r#"echo "say \"hi\"""#)?, vec!["echo", r#"say "hi""#]);
        Ok(())
    }

    #[test]
    fn test_lex_operators_without_spaces() -> TestResult {
        assert_eq!(
            texts("mkdir a&&cd a;ls>out.txt")?,
            vec!["mkdir", "a", "&&", "cd", "a", ";", "ls", ">", "out.txt"]
        );
        Ok(())
    }

    #[test]
    fn test_comment_is_dropped() -> TestResult {
        assert_eq!(texts("ls # list files")?, vec!["ls"]);
        assert_eq!(texts("echo a#b")?, vec!["echo", "a#b"]);
        Ok(())
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(lex("echo 'oops"), Err(TokenizeError::UnterminatedQuote('\'')));
        assert_eq!(lex("echo \"oops"), Err(TokenizeError::UnterminatedQuote('"')));
    }

    #[test]
    fn test_expansion_outside_single_quotes() -> TestResult {
        let env = BTreeMap::from([("NAME".to_string(), "dev".to_string())]);
        let tokens = lex(r#"$NAME "${NAME}s" '$NAME' ~/src ~x $UNSET"#)?;
        let expanded: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w.expand(&env, "/home/user")),
                Token::Op(_) => None,
            })
            .collect();
        assert_eq!(
            expanded,
            vec!["dev", "devs", "$NAME", "/home/user/src", "~x", ""]
        );
        Ok(())
    }

    #[test]
    fn test_parse_line_segments_and_redirect() -> TestResult {
        let line = parse_line("mkdir project && cd project || echo no; echo hi >> log.txt")?;
        assert_eq!(line.segments.len(), 4);
        assert_eq!(line.segments[0].connector, None);
        assert_eq!(line.segments[1].connector, Some(Connector::And));
        assert_eq!(line.segments[2].connector, Some(Connector::Or));
        assert_eq!(line.segments[3].connector, Some(Connector::Sequence));
        let redirect = line.segments[3].redirect.as_ref().ok_or("no redirect")?;
        assert!(redirect.append);
        assert_eq!(redirect.target.literal(), "log.txt");
        assert!(line.unsupported.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_line_flags_pipe() -> TestResult {
        let line = parse_line("ls | grep txt")?;
        assert_eq!(line.unsupported, Some(Operator::Pipe));
        Ok(())
    }

    #[test]
    fn test_parse_line_errors() {
        assert_eq!(
            parse_line("&& ls"),
            Err(TokenizeError::UnexpectedOperator("&&".to_string()))
        );
        assert_eq!(parse_line("ls &&"), Err(TokenizeError::UnexpectedEnd));
        assert_eq!(parse_line("echo hi >"), Err(TokenizeError::UnexpectedEnd));
        assert!(parse_line("ls;").is_ok());
    }

    #[test]
    fn test_expand_short_cluster() {
        assert_eq!(expand_short_cluster("-la"), vec!["-l", "-a"]);
        assert_eq!(expand_short_cluster("--all"), vec!["--all"]);
        assert_eq!(expand_short_cluster("-5"), vec!["-5"]);
        assert_eq!(expand_short_cluster("-"), vec!["-"]);
    }
}
