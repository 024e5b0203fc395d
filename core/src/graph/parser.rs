//! Parses one graph section's text into `(left_expression, right_task_ref)`
//! edges plus bare-node declarations, per the dependency-chain grammar:
//! `=>` arrows, `&`/`|` groupings, parentheses, `!task` suicide markers, and
//! `name[offset]:qualifier` atom references.

use thiserror::Error;

use super::trigger::{Offset, PrerequisiteAtom, Qualifier, TriggerExpr};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphParseError {
    #[error("unexpected end of input while parsing graph text")]
    UnexpectedEof,
    #[error("unexpected token '{0}' in graph text")]
    UnexpectedToken(String),
    #[error("expected a task reference, found '{0}'")]
    ExpectedTaskRef(String),
    #[error("unclosed '[' in offset suffix: {0}")]
    UnclosedOffset(String),
    #[error("right-hand side of '=>' must be a single task reference, not a boolean expression")]
    CompoundRightSide,
}

/// One compiled `=>` edge: a (possibly compound) left-hand trigger
/// expression and a single right-hand task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub left: TriggerExpr,
    pub right_task: String,
    pub suicide: bool,
}

/// The result of parsing one graph section's text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedGraphText {
    pub edges: Vec<Edge>,
    /// Tasks that appear on a line with no `=>`, declaring existence with no
    /// run prerequisites on this sequence.
    pub bare_nodes: Vec<String>,
}

pub fn parse_graph_text(text: &str) -> Result<ParsedGraphText, GraphParseError> {
    let mut result = ParsedGraphText::default();
    for line in text.lines() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        parse_chain(line, &mut result)?;
    }
    Ok(result)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// `a => b => c` desugars into edges `(a, b)` and `(b, c)`, where the
/// interior term `b` is both a right-hand task and (unsuicided) a fresh
/// left-hand atom for the next arrow.
fn parse_chain(line: &str, out: &mut ParsedGraphText) -> Result<(), GraphParseError> {
    let mut tokens = Tokenizer::new(line).tokenize()?;
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut current = Vec::new();
    for tok in tokens.drain(..) {
        match &tok {
            Token::LParen => {
                depth += 1;
                current.push(tok);
            }
            Token::RParen => {
                depth = depth.saturating_sub(1);
                current.push(tok);
            }
            Token::Arrow if depth == 0 => {
                terms.push(std::mem::take(&mut current));
            }
            _ => current.push(tok),
        }
    }
    terms.push(current);

    if terms.len() == 1 {
        let expr = parse_or(&mut Cursor::new(&terms[0]))?;
        if let TriggerExpr::Atom(atom) = &expr {
            if !matches!(atom.offset, Offset::SamePoint) {
                // offset-only bare reference: still just a declaration, no edge
            }
            out.bare_nodes.push(atom.task_name.clone());
            return Ok(());
        }
        return Err(GraphParseError::CompoundRightSide);
    }

    for pair in terms.windows(2) {
        let left_tokens = &pair[0];
        let right_tokens = &pair[1];
        let left = parse_or(&mut Cursor::new(left_tokens))?;
        let (right_task, suicide) = parse_right_side(right_tokens)?;
        out.edges.push(Edge { left, right_task, suicide });
    }
    Ok(())
}

fn parse_right_side(tokens: &[Token]) -> Result<(String, bool), GraphParseError> {
    let mut suicide = false;
    let mut iter = tokens.iter().peekable();
    if let Some(Token::Bang) = iter.peek() {
        suicide = true;
        iter.next();
    }
    let name = match iter.next() {
        Some(Token::Ident(atom)) => atom.task_name.clone(),
        Some(other) => return Err(GraphParseError::ExpectedTaskRef(format!("{:?}", other))),
        None => return Err(GraphParseError::UnexpectedEof),
    };
    if iter.next().is_some() {
        return Err(GraphParseError::CompoundRightSide);
    }
    Ok((name, suicide))
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }
}

fn parse_or(cur: &mut Cursor) -> Result<TriggerExpr, GraphParseError> {
    let mut items = vec![parse_and(cur)?];
    while matches!(cur.peek(), Some(Token::Pipe)) {
        cur.next();
        items.push(parse_and(cur)?);
    }
    Ok(if items.len() == 1 { items.pop().unwrap() } else { TriggerExpr::Or(items) })
}

fn parse_and(cur: &mut Cursor) -> Result<TriggerExpr, GraphParseError> {
    let mut items = vec![parse_unary(cur)?];
    while matches!(cur.peek(), Some(Token::Amp)) {
        cur.next();
        items.push(parse_unary(cur)?);
    }
    Ok(if items.len() == 1 { items.pop().unwrap() } else { TriggerExpr::And(items) })
}

fn parse_unary(cur: &mut Cursor) -> Result<TriggerExpr, GraphParseError> {
    if matches!(cur.peek(), Some(Token::Bang)) {
        cur.next();
        let inner = parse_unary(cur)?;
        return Ok(TriggerExpr::Suicide(Box::new(inner)));
    }
    parse_primary(cur)
}

fn parse_primary(cur: &mut Cursor) -> Result<TriggerExpr, GraphParseError> {
    match cur.next() {
        Some(Token::LParen) => {
            let inner = parse_or(cur)?;
            match cur.next() {
                Some(Token::RParen) => Ok(inner),
                other => Err(GraphParseError::UnexpectedToken(format!("{:?}", other))),
            }
        }
        Some(Token::Ident(atom)) => Ok(TriggerExpr::Atom(atom.clone())),
        Some(other) => Err(GraphParseError::UnexpectedToken(format!("{:?}", other))),
        None => Err(GraphParseError::UnexpectedEof),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(PrerequisiteAtom),
    Amp,
    Pipe,
    Bang,
    LParen,
    RParen,
    Arrow,
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, GraphParseError> {
        let mut out = Vec::new();
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            let c = bytes[self.pos] as char;
            match c {
                ' ' | '\t' => self.pos += 1,
                '&' => {
                    out.push(Token::Amp);
                    self.pos += 1;
                }
                '|' => {
                    out.push(Token::Pipe);
                    self.pos += 1;
                }
                '!' => {
                    out.push(Token::Bang);
                    self.pos += 1;
                }
                '(' => {
                    out.push(Token::LParen);
                    self.pos += 1;
                }
                ')' => {
                    out.push(Token::RParen);
                    self.pos += 1;
                }
                '=' if self.src[self.pos..].starts_with("=>") => {
                    out.push(Token::Arrow);
                    self.pos += 2;
                }
                c if is_ident_start(c) => {
                    out.push(Token::Ident(self.scan_atom()?));
                }
                other => return Err(GraphParseError::UnexpectedToken(other.to_string())),
            }
        }
        Ok(out)
    }

    fn scan_atom(&mut self) -> Result<PrerequisiteAtom, GraphParseError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && is_ident_char(bytes[self.pos] as char) {
            self.pos += 1;
        }
        let name = self.src[start..self.pos].to_string();

        let mut offset = Offset::SamePoint;
        if self.pos < bytes.len() && bytes[self.pos] as char == '[' {
            let close = self.src[self.pos..]
                .find(']')
                .map(|i| i + self.pos)
                .ok_or_else(|| GraphParseError::UnclosedOffset(self.src.to_string()))?;
            let inner = &self.src[self.pos + 1..close];
            offset = match inner {
                "^" => Offset::Initial,
                "$" => Offset::Final,
                other => Offset::Interval(other.to_string()),
            };
            self.pos = close + 1;
        }

        let mut qualifier = Qualifier::default_qualifier();
        if self.pos < bytes.len() && bytes[self.pos] as char == ':' {
            self.pos += 1;
            let qstart = self.pos;
            while self.pos < bytes.len() && is_ident_char(bytes[self.pos] as char) {
                self.pos += 1;
            }
            qualifier = Qualifier::parse(&self.src[qstart..self.pos]);
        }

        Ok(PrerequisiteAtom::new(name, offset, qualifier))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_edge() {
        let parsed = parse_graph_text("foo => bar").unwrap();
        assert_eq!(parsed.edges.len(), 1);
        assert_eq!(parsed.edges[0].right_task, "bar");
        assert_eq!(parsed.edges[0].left, TriggerExpr::Atom(PrerequisiteAtom::new("foo", Offset::SamePoint, Qualifier::Succeeded)));
    }

    #[test]
    fn test_chain_desugars_into_two_edges() {
        let parsed = parse_graph_text("a => b => c").unwrap();
        assert_eq!(parsed.edges.len(), 2);
        assert_eq!(parsed.edges[0].right_task, "b");
        assert_eq!(parsed.edges[1].right_task, "c");
    }

    #[test]
    fn test_and_or_grouping() {
        let parsed = parse_graph_text("(a & b) | c => d").unwrap();
        match &parsed.edges[0].left {
            TriggerExpr::Or(items) => assert_eq!(items.len(), 2),
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_offset_and_qualifier() {
        let parsed = parse_graph_text("foo[-PT6H]:failed => bar").unwrap();
        let atom = match &parsed.edges[0].left {
            TriggerExpr::Atom(a) => a,
            other => panic!("expected atom, got {:?}", other),
        };
        assert_eq!(atom.offset, Offset::Interval("-PT6H".to_string()));
        assert_eq!(atom.qualifier, Qualifier::Failed);
    }

    #[test]
    fn test_suicide_marker() {
        let parsed = parse_graph_text("a => !b").unwrap();
        assert!(parsed.edges[0].suicide);
        assert_eq!(parsed.edges[0].right_task, "b");
    }

    #[test]
    fn test_bare_node_declaration() {
        let parsed = parse_graph_text("foo").unwrap();
        assert_eq!(parsed.bare_nodes, vec!["foo".to_string()]);
    }

    #[test]
    fn test_compound_right_side_is_error() {
        let err = parse_graph_text("a => b & c").unwrap_err();
        assert_eq!(err, GraphParseError::CompoundRightSide);
    }

    #[test]
    fn test_comment_stripped() {
        let parsed = parse_graph_text("foo => bar  # a comment").unwrap();
        assert_eq!(parsed.edges[0].right_task, "bar");
    }
}
