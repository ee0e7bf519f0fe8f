//! Parameter type grammar, typed values, and coercion.
//!
//! The declared type language mirrors the report format: primitives
//! `int|float|bool|date|datetime|str`, the injection-aware types
//! `InjectedStr`, `InjectedIdentLiteral[{...}]` and `InjectedPathStr`
//! (config-only), and the combinators `Optional[T]`, `List[T]`,
//! `Literal[...]`. Coercion turns raw URL values into [`ParamValue`]s;
//! rendering turns values into SQL literals; canonical encoding feeds the
//! fingerprinter.

use chrono::{NaiveDate, NaiveDateTime};
use ds_core::error::{CoreError, CoreResult};
use std::fmt;

/// Declared parameter type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Int,
    Float,
    Bool,
    Date,
    DateTime,
    Str,
    InjectedStr,
    InjectedPathStr,
    Optional(Box<ParamType>),
    List(Box<ParamType>),
    Literal(Vec<LiteralValue>),
    InjectedIdentLiteral(Vec<String>),
}

/// A value inside a `Literal[...]` constraint set.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Int(v) => write!(f, "{v}"),
            LiteralValue::Float(v) => write!(f, "{v:?}"),
            LiteralValue::Bool(v) => write!(f, "{v}"),
            LiteralValue::Str(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

impl ParamType {
    /// Parse a declared type string, e.g. `Optional[Literal['A','B']]`.
    pub fn parse(spec: &str) -> CoreResult<Self> {
        let text = spec.trim();

        if let Some(inner) = bracketed(text, "Optional") {
            return Ok(ParamType::Optional(Box::new(ParamType::parse(inner)?)));
        }
        if let Some(inner) = bracketed(text, "List") {
            return Ok(ParamType::List(Box::new(ParamType::parse(inner)?)));
        }
        if let Some(inner) = bracketed(text, "Literal") {
            return Ok(ParamType::Literal(parse_literal_values(inner, spec)?));
        }
        if let Some(inner) = bracketed(text, "InjectedIdentLiteral") {
            return Ok(ParamType::InjectedIdentLiteral(parse_ident_set(inner, spec)?));
        }

        match text {
            "int" => Ok(ParamType::Int),
            "float" => Ok(ParamType::Float),
            "bool" => Ok(ParamType::Bool),
            "date" => Ok(ParamType::Date),
            "datetime" => Ok(ParamType::DateTime),
            "str" => Ok(ParamType::Str),
            "InjectedStr" => Ok(ParamType::InjectedStr),
            "InjectedPathStr" => Ok(ParamType::InjectedPathStr),
            _ => Err(CoreError::InvalidMetadataBlock {
                block: "PARAMS".to_string(),
                detail: format!("unsupported parameter type '{spec}'"),
            }),
        }
    }

    /// True for `Optional[...]` at the top level.
    pub fn is_optional(&self) -> bool {
        matches!(self, ParamType::Optional(_))
    }

    /// The type with `Optional` stripped.
    pub fn unwrap_optional(&self) -> &ParamType {
        match self {
            ParamType::Optional(inner) => inner.unwrap_optional(),
            other => other,
        }
    }

    /// Coerce raw URL values into a typed value. Zero values on a scalar or
    /// optional type yield [`ParamValue::Absent`].
    pub fn coerce(&self, raw: &[String], param: &str) -> CoreResult<ParamValue> {
        match self {
            ParamType::Optional(inner) => {
                if raw.is_empty() {
                    Ok(ParamValue::Absent)
                } else {
                    inner.coerce(raw, param)
                }
            }
            ParamType::List(inner) => {
                let mut items = Vec::with_capacity(raw.len());
                for value in raw {
                    items.push(inner.coerce_scalar(value, param)?);
                }
                Ok(ParamValue::List(items))
            }
            _ => match raw.first() {
                None => Ok(ParamValue::Absent),
                Some(value) => self.coerce_scalar(value, param),
            },
        }
    }

    fn coerce_scalar(&self, value: &str, param: &str) -> CoreResult<ParamValue> {
        let bad = |detail: String| CoreError::BadParamType {
            param: param.to_string(),
            detail,
        };
        match self {
            ParamType::Int => value
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| bad(format!("'{value}' is not an integer"))),
            ParamType::Float => value
                .trim()
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|_| bad(format!("'{value}' is not a float"))),
            ParamType::Bool => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "t" | "yes" | "on" => Ok(ParamValue::Bool(true)),
                "0" | "false" | "f" | "no" | "off" => Ok(ParamValue::Bool(false)),
                _ => Err(bad(format!("'{value}' is not a boolean"))),
            },
            ParamType::Date => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .map(ParamValue::Date)
                .map_err(|_| bad(format!("'{value}' is not a date (YYYY-MM-DD)"))),
            ParamType::DateTime => {
                let trimmed = value.trim();
                NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
                    .map(ParamValue::DateTime)
                    .map_err(|_| bad(format!("'{value}' is not a datetime")))
            }
            ParamType::Str | ParamType::InjectedStr => Ok(ParamValue::Str(value.to_string())),
            ParamType::InjectedPathStr => {
                Err(bad("InjectedPathStr values resolve from config, never from the URL".into()))
            }
            ParamType::Literal(allowed) => coerce_literal(value, allowed)
                .ok_or_else(|| bad(format!("'{value}' is not one of the allowed literals"))),
            ParamType::InjectedIdentLiteral(allowed) => {
                if allowed.iter().any(|a| a == value) {
                    Ok(ParamValue::Ident(value.to_string()))
                } else {
                    Err(bad(format!("'{value}' is not in the identifier allowlist")))
                }
            }
            ParamType::Optional(inner) => inner.coerce_scalar(value, param),
            ParamType::List(_) => Err(bad("nested lists are not supported".into())),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Int => f.write_str("int"),
            ParamType::Float => f.write_str("float"),
            ParamType::Bool => f.write_str("bool"),
            ParamType::Date => f.write_str("date"),
            ParamType::DateTime => f.write_str("datetime"),
            ParamType::Str => f.write_str("str"),
            ParamType::InjectedStr => f.write_str("InjectedStr"),
            ParamType::InjectedPathStr => f.write_str("InjectedPathStr"),
            ParamType::Optional(inner) => write!(f, "Optional[{inner}]"),
            ParamType::List(inner) => write!(f, "List[{inner}]"),
            ParamType::Literal(values) => {
                f.write_str("Literal[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            ParamType::InjectedIdentLiteral(values) => {
                write!(f, "InjectedIdentLiteral[{{{}}}]", values.join(","))
            }
        }
    }
}

fn bracketed<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(prefix)?;
    let rest = rest.strip_prefix('[')?;
    rest.strip_suffix(']')
}

/// Parse the comma-separated body of `Literal[...]`. Values may be quoted
/// strings, integers, floats, or booleans.
fn parse_literal_values(body: &str, spec: &str) -> CoreResult<Vec<LiteralValue>> {
    let mut values = Vec::new();
    for piece in split_literal_items(body) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        values.push(parse_one_literal(piece, spec)?);
    }
    if values.is_empty() {
        return Err(CoreError::InvalidMetadataBlock {
            block: "PARAMS".to_string(),
            detail: format!("'{spec}' declares an empty literal set"),
        });
    }
    Ok(values)
}

fn parse_one_literal(piece: &str, spec: &str) -> CoreResult<LiteralValue> {
    if (piece.starts_with('\'') && piece.ends_with('\'') && piece.len() >= 2)
        || (piece.starts_with('"') && piece.ends_with('"') && piece.len() >= 2)
    {
        let inner = &piece[1..piece.len() - 1];
        return Ok(LiteralValue::Str(inner.replace("''", "'")));
    }
    if piece.eq_ignore_ascii_case("true") {
        return Ok(LiteralValue::Bool(true));
    }
    if piece.eq_ignore_ascii_case("false") {
        return Ok(LiteralValue::Bool(false));
    }
    if let Ok(v) = piece.parse::<i64>() {
        return Ok(LiteralValue::Int(v));
    }
    if let Ok(v) = piece.parse::<f64>() {
        return Ok(LiteralValue::Float(v));
    }
    Err(CoreError::InvalidMetadataBlock {
        block: "PARAMS".to_string(),
        detail: format!("cannot parse literal '{piece}' in '{spec}'"),
    })
}

/// Split on commas outside quotes.
fn split_literal_items(body: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let bytes = body.as_bytes();
    let mut start = 0;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b',' => {
                    items.push(&body[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    items.push(&body[start..]);
    items
}

/// Parse the allowlist of `InjectedIdentLiteral[...]`: either `{A,B,C}` or a
/// quoted comma list. Every entry must be a bare SQL identifier.
fn parse_ident_set(body: &str, spec: &str) -> CoreResult<Vec<String>> {
    let body = body.trim();
    let body = body
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .unwrap_or(body);
    let mut idents = Vec::new();
    for piece in split_literal_items(body) {
        let piece = piece.trim().trim_matches('\'').trim_matches('"');
        if piece.is_empty() {
            continue;
        }
        if !is_identifier(piece) {
            return Err(CoreError::InvalidMetadataBlock {
                block: "PARAMS".to_string(),
                detail: format!("'{piece}' in '{spec}' is not a valid identifier"),
            });
        }
        idents.push(piece.to_string());
    }
    if idents.is_empty() {
        return Err(CoreError::InvalidMetadataBlock {
            block: "PARAMS".to_string(),
            detail: format!("'{spec}' declares an empty identifier allowlist"),
        });
    }
    Ok(idents)
}

/// Bare SQL identifier check used for ident splicing.
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn coerce_literal(value: &str, allowed: &[LiteralValue]) -> Option<ParamValue> {
    for literal in allowed {
        let matched = match literal {
            LiteralValue::Str(s) => value == s,
            LiteralValue::Int(i) => value.trim().parse::<i64>() == Ok(*i),
            LiteralValue::Float(x) => value.trim().parse::<f64>() == Ok(*x),
            LiteralValue::Bool(b) => {
                matches!(
                    (value.trim().to_ascii_lowercase().as_str(), b),
                    ("1" | "true" | "t" | "yes", true) | ("0" | "false" | "f" | "no", false)
                )
            }
        };
        if matched {
            return Some(match literal {
                LiteralValue::Str(s) => ParamValue::Str(s.clone()),
                LiteralValue::Int(i) => ParamValue::Int(*i),
                LiteralValue::Float(x) => ParamValue::Float(*x),
                LiteralValue::Bool(b) => ParamValue::Bool(*b),
            });
        }
    }
    None
}

/// A coerced parameter value, or the explicit absent marker.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Absent,
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Str(String),
    Ident(String),
    Path(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, ParamValue::Absent)
    }

    /// Number of scalar values carried; used for the client-side cap.
    pub fn arity(&self) -> usize {
        match self {
            ParamValue::Absent => 0,
            ParamValue::List(items) => items.len(),
            _ => 1,
        }
    }

    /// Render as a SQL literal for `{{param X}}` positions. Absent values
    /// become `NULL`, never an empty splice.
    pub fn sql_literal(&self) -> String {
        match self {
            ParamValue::Absent => "NULL".to_string(),
            ParamValue::Int(v) => v.to_string(),
            ParamValue::Float(v) => format!("{v:?}"),
            ParamValue::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            ParamValue::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
            ParamValue::DateTime(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S")),
            ParamValue::Str(v) | ParamValue::Path(v) => format!("'{}'", v.replace('\'', "''")),
            ParamValue::Ident(v) => v.clone(),
            ParamValue::List(items) => {
                if items.is_empty() {
                    "(NULL)".to_string()
                } else {
                    let rendered: Vec<String> =
                        items.iter().map(ParamValue::sql_literal).collect();
                    format!("({})", rendered.join(", "))
                }
            }
        }
    }

    /// Render for `{{ident X}}` positions: a validated bare identifier or
    /// `NULL` when the value cannot be emitted as one.
    pub fn ident_literal(&self) -> String {
        match self {
            ParamValue::Ident(v) => v.clone(),
            ParamValue::Str(v) if is_identifier(v) => v.clone(),
            _ => "NULL".to_string(),
        }
    }

    /// Canonical byte encoding for fingerprints: a tag byte plus a
    /// type-aware payload, lists length-prefixed. Distinct values never
    /// share an encoding.
    pub fn canonical_encode(&self, out: &mut Vec<u8>) {
        match self {
            ParamValue::Absent => out.push(b'n'),
            ParamValue::Int(v) => {
                out.push(b'i');
                out.extend_from_slice(v.to_string().as_bytes());
            }
            ParamValue::Float(v) => {
                out.push(b'f');
                out.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            ParamValue::Bool(v) => {
                out.push(b'b');
                out.push(*v as u8);
            }
            ParamValue::Date(v) => {
                out.push(b'd');
                out.extend_from_slice(v.format("%Y-%m-%d").to_string().as_bytes());
            }
            ParamValue::DateTime(v) => {
                out.push(b't');
                out.extend_from_slice(v.format("%Y-%m-%d %H:%M:%S").to_string().as_bytes());
            }
            ParamValue::Str(v) => encode_tagged_str(out, b's', v),
            ParamValue::Ident(v) => encode_tagged_str(out, b'I', v),
            ParamValue::Path(v) => encode_tagged_str(out, b'p', v),
            ParamValue::List(items) => {
                out.push(b'L');
                out.extend_from_slice(&(items.len() as u64).to_be_bytes());
                for item in items {
                    item.canonical_encode(out);
                }
            }
        }
    }

    /// Canonical bytes as an owned vector.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.canonical_encode(&mut out);
        out
    }

    /// Plain display rendering for manifests (client params).
    pub fn display_string(&self) -> String {
        match self {
            ParamValue::Absent => String::new(),
            ParamValue::Int(v) => v.to_string(),
            ParamValue::Float(v) => format!("{v}"),
            ParamValue::Bool(v) => v.to_string(),
            ParamValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            ParamValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S").to_string(),
            ParamValue::Str(v) | ParamValue::Ident(v) | ParamValue::Path(v) => v.clone(),
            ParamValue::List(items) => {
                let rendered: Vec<String> =
                    items.iter().map(ParamValue::display_string).collect();
                rendered.join(",")
            }
        }
    }
}

fn encode_tagged_str(out: &mut Vec<u8>, tag: u8, value: &str) {
    out.push(tag);
    out.extend_from_slice(&(value.len() as u64).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
