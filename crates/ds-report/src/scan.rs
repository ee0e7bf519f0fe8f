//! Context-aware scanning over report SQL text.
//!
//! Everything downstream of the parser works on byte offsets into the
//! original text, so all scanning here is position-preserving: no
//! normalization, no token stream that forgets where it came from. String
//! literals use single-quote doubling, identifiers may be double-quoted,
//! and both `--` line comments and `/* */` block comments are recognized.

use ds_core::error::{CoreError, CoreResult};
use std::collections::HashSet;

/// Lexical context of one byte of SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Sql,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

impl Context {
    pub fn is_sql(self) -> bool {
        self == Context::Sql
    }
}

/// Per-byte context map for `text`.
///
/// Quote and comment delimiters carry the context they open or close, so a
/// check "is this offset inside a string or comment" is a single index.
pub fn byte_contexts(text: &str) -> Vec<Context> {
    let bytes = text.as_bytes();
    let mut contexts = vec![Context::Sql; bytes.len()];
    let mut state = Context::Sql;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            Context::Sql => match b {
                b'\'' => {
                    state = Context::SingleQuote;
                    contexts[i] = state;
                }
                b'"' => {
                    state = Context::DoubleQuote;
                    contexts[i] = state;
                }
                b'-' if next == Some(b'-') => {
                    state = Context::LineComment;
                    contexts[i] = state;
                    contexts[i + 1] = state;
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = Context::BlockComment;
                    contexts[i] = state;
                    contexts[i + 1] = state;
                    i += 1;
                }
                _ => {}
            },
            Context::SingleQuote => {
                contexts[i] = state;
                if b == b'\'' {
                    if next == Some(b'\'') {
                        contexts[i + 1] = state;
                        i += 1;
                    } else {
                        state = Context::Sql;
                    }
                }
            }
            Context::DoubleQuote => {
                contexts[i] = state;
                if b == b'"' {
                    if next == Some(b'"') {
                        contexts[i + 1] = state;
                        i += 1;
                    } else {
                        state = Context::Sql;
                    }
                }
            }
            Context::LineComment => {
                if b == b'\n' {
                    state = Context::Sql;
                } else {
                    contexts[i] = state;
                }
            }
            Context::BlockComment => {
                contexts[i] = state;
                if b == b'*' && next == Some(b'/') {
                    contexts[i + 1] = state;
                    i += 1;
                    state = Context::Sql;
                }
            }
        }
        i += 1;
    }
    contexts
}

/// 1-based line number of a byte offset.
pub fn line_of(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset.min(text.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

/// Byte spans of the top-level statements in `text`, split on semicolons
/// outside strings and comments. Empty segments are dropped.
pub fn split_statements(text: &str) -> Vec<(usize, usize)> {
    let contexts = byte_contexts(text);
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b';' && contexts[i].is_sql() {
            push_trimmed(text, start, i, &mut spans);
            start = i + 1;
        }
    }
    push_trimmed(text, start, bytes.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let segment = &text[start..end];
    let trimmed_start = start + (segment.len() - segment.trim_start().len());
    let trimmed_end = end - (segment.len() - segment.trim_end().len());
    if trimmed_start < trimmed_end {
        spans.push((trimmed_start, trimmed_end));
    }
}

/// Statement keywords a report is never allowed to contain.
const FORBIDDEN_KEYWORDS: [&str; 9] = [
    "CREATE", "ATTACH", "INSTALL", "LOAD", "INSERT", "UPDATE", "DELETE", "PRAGMA", "SET",
];

/// Find the first forbidden DDL/DML keyword outside strings and comments.
pub fn find_forbidden_keyword(text: &str) -> Option<(String, usize)> {
    for (word, offset) in words(text) {
        let upper = word.to_ascii_uppercase();
        if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
            return Some((upper, offset));
        }
    }
    None
}

/// Iterate `(word, offset)` pairs at SQL context.
fn words(text: &str) -> impl Iterator<Item = (&str, usize)> {
    let contexts = byte_contexts(text);
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if contexts[i].is_sql() && is_word_start(bytes[i]) {
            let start = i;
            while i < bytes.len() && contexts[i].is_sql() && is_word_byte(bytes[i]) {
                i += 1;
            }
            out.push((&text[start..i], start));
        } else {
            i += 1;
        }
    }
    out.into_iter()
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Lowercased identifiers appearing in a byte range at SQL context.
pub fn referenced_words(text: &str, start: usize, end: usize) -> HashSet<String> {
    words(&text[..end])
        .filter(|&(_, offset)| offset >= start)
        .map(|(word, _)| word.to_ascii_lowercase())
        .collect()
}

/// Materialization marker on a CTE definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeKind {
    /// `AS MATERIALIZE (...)`: fingerprint includes upstream parameters
    Open,
    /// `AS MATERIALIZE_CLOSED (...)`: frozen against downstream parameters
    Closed,
}

/// One CTE definition in the WITH list, with the spans the executor splices.
#[derive(Debug, Clone)]
pub struct CteSpan {
    pub name: String,
    pub materialize: Option<MaterializeKind>,
    /// Span of the `MATERIALIZE`/`MATERIALIZE_CLOSED` keyword plus trailing
    /// whitespace; removed before the SQL reaches the engine.
    pub keyword_span: Option<(usize, usize)>,
    /// Span of the body between the CTE's parentheses (exclusive).
    pub body_span: (usize, usize),
}

/// Scan the leading WITH list of the single statement.
///
/// Reports without a WITH clause yield an empty list. The scanner only
/// walks the comma-separated `name AS [MATERIALIZE[_CLOSED]] ( body )`
/// entries; it never interprets the bodies themselves.
pub fn scan_ctes(text: &str) -> CoreResult<Vec<CteSpan>> {
    let contexts = byte_contexts(text);
    let mut cursor = Cursor {
        text,
        contexts: &contexts,
        pos: 0,
    };
    let mut ctes = Vec::new();

    match cursor.next_word() {
        Some((word, _)) if word.eq_ignore_ascii_case("with") => {}
        _ => return Ok(ctes),
    }

    let mut checkpoint = cursor.pos;
    if let Some((word, _)) = cursor.next_word() {
        if !word.eq_ignore_ascii_case("recursive") {
            cursor.pos = checkpoint;
        }
    } else {
        cursor.pos = checkpoint;
    }

    loop {
        let Some((name, _name_start)) = cursor.next_word() else {
            return Err(malformed(text, cursor.pos, "expected CTE name"));
        };
        let name = name.to_string();

        match cursor.next_word() {
            Some((word, _)) if word.eq_ignore_ascii_case("as") => {}
            _ => return Err(malformed(text, cursor.pos, "expected AS after CTE name")),
        }

        // optional materialization marker
        let mut materialize = None;
        let mut keyword_span = None;
        checkpoint = cursor.pos;
        if let Some((word, start)) = cursor.next_word() {
            let kind = if word.eq_ignore_ascii_case("materialize") {
                Some(MaterializeKind::Open)
            } else if word.eq_ignore_ascii_case("materialize_closed") {
                Some(MaterializeKind::Closed)
            } else {
                None
            };
            match kind {
                Some(kind) => {
                    materialize = Some(kind);
                    let mut end = start + word.len();
                    let bytes = text.as_bytes();
                    while end < bytes.len() && (bytes[end] as char).is_whitespace() {
                        end += 1;
                    }
                    keyword_span = Some((start, end));
                }
                None => cursor.pos = checkpoint,
            }
        }

        if !cursor.eat_punct(b'(') {
            return Err(malformed(text, cursor.pos, "expected ( to open CTE body"));
        }
        let body_start = cursor.pos;
        let body_end = cursor.skip_to_matching_paren()?;

        ctes.push(CteSpan {
            name,
            materialize,
            keyword_span,
            body_span: (body_start, body_end),
        });

        if !cursor.eat_punct(b',') {
            break;
        }
    }

    Ok(ctes)
}

fn malformed(text: &str, offset: usize, detail: &str) -> CoreError {
    CoreError::ForbiddenSqlConstruct {
        detail: format!("{} (line {})", detail, line_of(text, offset)),
    }
}

/// Position-tracking token cursor that skips whitespace and comments.
struct Cursor<'a> {
    text: &'a str,
    contexts: &'a [Context],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_trivia(&mut self) {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            let ctx = self.contexts[self.pos];
            if ctx == Context::LineComment || ctx == Context::BlockComment {
                self.pos += 1;
            } else if (bytes[self.pos] as char).is_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn next_word(&mut self) -> Option<(&'a str, usize)> {
        self.skip_trivia();
        let bytes = self.text.as_bytes();
        if self.pos >= bytes.len() || !is_word_start(bytes[self.pos]) {
            return None;
        }
        let start = self.pos;
        while self.pos < bytes.len() && is_word_byte(bytes[self.pos]) {
            self.pos += 1;
        }
        Some((&self.text[start..self.pos], start))
    }

    fn eat_punct(&mut self, punct: u8) -> bool {
        self.skip_trivia();
        let bytes = self.text.as_bytes();
        if self.pos < bytes.len() && bytes[self.pos] == punct {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Advance past the body of an already-opened parenthesis; returns the
    /// offset of the closing `)` and leaves the cursor after it.
    fn skip_to_matching_paren(&mut self) -> CoreResult<usize> {
        let bytes = self.text.as_bytes();
        let mut depth = 1usize;
        while self.pos < bytes.len() {
            if self.contexts[self.pos].is_sql() {
                match bytes[self.pos] {
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            let close = self.pos;
                            self.pos += 1;
                            return Ok(close);
                        }
                    }
                    _ => {}
                }
            }
            self.pos += 1;
        }
        Err(malformed(
            self.text,
            self.pos,
            "unbalanced parentheses in CTE body",
        ))
    }
}

#[cfg(test)]
#[path = "scan_test.rs"]
mod tests;
