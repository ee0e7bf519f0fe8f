//! Placeholder scanning with recorded spans.
//!
//! A single pass over the (block-blanked) SQL body records every
//! `{{kind name}}` occurrence as a byte span. Placeholders inside comments
//! and ordinary string literals are literal text; the one exception is a
//! single-quoted string that is the argument of `parquet_scan(...)`, where
//! the scan-path rule applies: the literal may contain only placeholders of
//! kinds {config, bind, path, ident} plus literal characters, and the
//! argument itself may not be built from `||` or any other expression.

use crate::scan::{byte_contexts, line_of, Context};
use ds_core::error::{CoreError, CoreResult};

/// Placeholder kind as written in `{{kind name}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    Param,
    Ident,
    Path,
    Bind,
    Mat,
    Import,
    Config,
    Secret,
}

impl PlaceholderKind {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "param" => Self::Param,
            "ident" => Self::Ident,
            "path" => Self::Path,
            "bind" => Self::Bind,
            "mat" => Self::Mat,
            "import" => Self::Import,
            "config" => Self::Config,
            "secret" => Self::Secret,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Param => "param",
            Self::Ident => "ident",
            Self::Path => "path",
            Self::Bind => "bind",
            Self::Mat => "mat",
            Self::Import => "import",
            Self::Config => "config",
            Self::Secret => "secret",
        }
    }
}

/// Kinds permitted inside a parquet_scan path literal.
const SCAN_PATH_KINDS: [PlaceholderKind; 4] = [
    PlaceholderKind::Config,
    PlaceholderKind::Bind,
    PlaceholderKind::Path,
    PlaceholderKind::Ident,
];

/// One recorded `{{kind name}}` occurrence.
#[derive(Debug, Clone)]
pub struct PlaceholderSpan {
    /// Byte offset of the opening `{{`
    pub start: usize,
    /// Byte offset one past the closing `}}`
    pub end: usize,
    pub kind: PlaceholderKind,
    pub name: String,
    /// True when the span lies inside a parquet_scan path literal
    pub in_scan_path: bool,
}

/// Scan the SQL body for placeholder spans, enforcing the scan-path rule.
pub fn scan_placeholders(sql: &str) -> CoreResult<Vec<PlaceholderSpan>> {
    let contexts = byte_contexts(sql);
    let scan_paths = find_scan_path_regions(sql, &contexts)?;
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();

    let mut i = 0;
    while i + 1 < bytes.len() {
        if !(bytes[i] == b'{' && bytes[i + 1] == b'{') {
            i += 1;
            continue;
        }
        let ctx = contexts[i];
        let scan_path = scan_paths
            .iter()
            .any(|&(start, end)| i >= start && i < end);

        if ctx == Context::LineComment || ctx == Context::BlockComment {
            i += 2;
            continue;
        }
        if (ctx == Context::SingleQuote || ctx == Context::DoubleQuote) && !scan_path {
            i += 2;
            continue;
        }

        let span = parse_placeholder(sql, i)?;
        if scan_path && !SCAN_PATH_KINDS.contains(&span.kind) {
            return Err(CoreError::IllegalScanPath {
                detail: format!(
                    "placeholder kind '{}' is not allowed in a scan path",
                    span.kind.as_str()
                ),
                line: line_of(sql, i),
            });
        }
        i = span.end;
        spans.push(PlaceholderSpan {
            in_scan_path: scan_path,
            ..span
        });
    }

    Ok(spans)
}

/// Parse one `{{kind name}}` starting at `start` (pointing at `{{`).
fn parse_placeholder(sql: &str, start: usize) -> CoreResult<PlaceholderSpan> {
    let invalid = |detail: String| CoreError::InvalidPlaceholder {
        detail,
        line: line_of(sql, start),
    };
    let close = sql[start..]
        .find("}}")
        .ok_or_else(|| invalid("unterminated '{{'".to_string()))?;
    let end = start + close + 2;
    let inner = sql[start + 2..start + close].trim();

    let mut parts = inner.split_whitespace();
    let kind_word = parts.next().unwrap_or_default();
    let name = parts.next().unwrap_or_default();
    if parts.next().is_some() || name.is_empty() {
        return Err(invalid(format!("malformed placeholder '{{{{{inner}}}}}'")));
    }
    let kind = PlaceholderKind::parse(kind_word)
        .ok_or_else(|| invalid(format!("unknown placeholder kind '{kind_word}'")))?;
    if !crate::types::is_identifier(name) {
        return Err(invalid(format!("invalid placeholder name '{name}'")));
    }

    Ok(PlaceholderSpan {
        start,
        end,
        kind,
        name: name.to_string(),
        in_scan_path: false,
    })
}

/// Find the inner spans of every parquet_scan path literal, rejecting scan
/// paths built from expressions.
///
/// The first argument of `parquet_scan(...)` must be either one
/// single-quoted string (whose placeholder fragments are limited to
/// {config, bind, path, ident}) or a single `{{mat X}}`/`{{import X}}`
/// placeholder resolving to a quoted absolute path at bind time. The token
/// after it must be `,` or `)`; a `||`, a nested call, or any other
/// expression shape is an `IllegalScanPath`.
fn find_scan_path_regions(sql: &str, contexts: &[Context]) -> CoreResult<Vec<(usize, usize)>> {
    let bytes = sql.as_bytes();
    let mut regions = Vec::new();
    let needle = b"parquet_scan";

    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        if !contexts[i].is_sql() || !bytes[i..i + needle.len()].eq_ignore_ascii_case(needle) {
            i += 1;
            continue;
        }
        // whole-word match only
        if i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_') {
            i += needle.len();
            continue;
        }
        let mut j = i + needle.len();
        j = skip_ws(bytes, j);
        if j >= bytes.len() || bytes[j] != b'(' {
            i += needle.len();
            continue;
        }
        j = skip_ws(bytes, j + 1);

        // whole-argument {{mat X}} / {{import X}} placeholder
        if j + 1 < bytes.len() && bytes[j] == b'{' && bytes[j + 1] == b'{' {
            let span = parse_placeholder(sql, j)?;
            if !matches!(span.kind, PlaceholderKind::Mat | PlaceholderKind::Import) {
                return Err(CoreError::IllegalScanPath {
                    detail: format!(
                        "placeholder kind '{}' cannot be a whole scan path argument",
                        span.kind.as_str()
                    ),
                    line: line_of(sql, j),
                });
            }
            let after = skip_ws(bytes, span.end);
            if after < bytes.len() && bytes[after] != b',' && bytes[after] != b')' {
                return Err(CoreError::IllegalScanPath {
                    detail: "scan path must not use concatenation or expressions".to_string(),
                    line: line_of(sql, after),
                });
            }
            i = span.end;
            continue;
        }

        if j >= bytes.len() || bytes[j] != b'\'' {
            return Err(CoreError::IllegalScanPath {
                detail: "scan path must be a single quoted string literal".to_string(),
                line: line_of(sql, j.min(sql.len().saturating_sub(1))),
            });
        }
        let literal_start = j + 1;
        let literal_end = find_string_end(bytes, literal_start).ok_or_else(|| {
            CoreError::IllegalScanPath {
                detail: "unterminated scan path literal".to_string(),
                line: line_of(sql, literal_start),
            }
        })?;
        let after = skip_ws(bytes, literal_end + 1);
        if after < bytes.len() && bytes[after] != b',' && bytes[after] != b')' {
            return Err(CoreError::IllegalScanPath {
                detail: "scan path must not use concatenation or expressions".to_string(),
                line: line_of(sql, after),
            });
        }
        regions.push((literal_start, literal_end));
        i = literal_end + 1;
    }

    Ok(regions)
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    i
}

/// Offset of the closing quote of a single-quoted string whose content
/// starts at `start`, honoring quote doubling.
fn find_string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
#[path = "placeholder_test.rs"]
mod tests;
