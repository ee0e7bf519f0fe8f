//! Metadata block extraction and strict schemas.
//!
//! A report interleaves SQL with YAML islands delimited by `/***NAME` at a
//! line start and a closing `***/`. Each supported block has a serde schema
//! with `deny_unknown_fields`; anything else is an `InvalidMetadataBlock`.
//! Extraction blanks the islands in place (preserving newlines) so every
//! downstream span refers to offsets in the original file.

use crate::scan::{byte_contexts, line_of};
use ds_core::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Block names accepted in a report, in no particular order.
pub const SUPPORTED_BLOCKS: [&str; 13] = [
    "PARAMS",
    "CONFIG",
    "SOURCES",
    "CACHE",
    "TABLE",
    "SEARCH",
    "FACETS",
    "CHARTS",
    "DERIVED_PARAMS",
    "LITERAL_SOURCES",
    "BINDINGS",
    "IMPORTS",
    "SECRETS",
];

/// Parameter scope: where a value may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamScope {
    /// Applied server-side; affects artifacts
    Data,
    /// Applied client-side only; never referenced in SQL
    View,
    /// Either side, decided per request
    Hybrid,
}

/// Where a wrapper/inline parameter attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppliesTo {
    pub cte: String,
    pub mode: ApplyMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    Wrapper,
    Inline,
}

/// One PARAMS entry as written in YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpecRaw {
    #[serde(rename = "type")]
    pub type_spec: String,
    #[serde(default)]
    pub scope: Option<ParamScope>,
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
    #[serde(default)]
    pub applies_to: Option<AppliesTo>,
}

/// Declared type of a CONFIG constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ConfigType {
    #[serde(rename = "str")]
    Str,
    InjectedPathStr,
}

/// One SOURCES entry: a named scan path usable via `{{path NAME}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub path: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// CACHE block: per-report cache policy overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheBlock {
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub stale_while_revalidate: Option<bool>,
}

/// TABLE block: column presentation for the browser grid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableBlock {
    #[serde(default)]
    pub columns: Vec<TableColumn>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableColumn {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub hidden: Option<bool>,
}

/// SEARCH block: columns the browser's text search covers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchBlock {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
}

/// One FACETS entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FacetSpec {
    pub id: String,
    pub column: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// One CHARTS entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChartSpec {
    pub id: String,
    pub kind: String,
    pub x: String,
    pub y: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// One DERIVED_PARAMS entry: a view-layer declaration surfaced to the
/// browser, never applied server-side.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedParamSpec {
    pub from: String,
    #[serde(default)]
    pub transform: Option<String>,
}

/// One LITERAL_SOURCES entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiteralSourceSpec {
    pub id: String,
    pub from_cte: String,
    pub value_column: String,
}

/// Restricts where a binding may be spliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    /// Permitted inside parquet_scan arguments
    Partition,
    /// Literal positions only
    Demo,
    /// Emitted as an identifier
    Identifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueMode {
    #[default]
    Single,
    List,
}

/// One BINDINGS entry. Exactly one of `key_param`/`key_sql` must be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSpec {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub key_param: Option<String>,
    #[serde(default)]
    pub key_sql: Option<String>,
    pub key_column: String,
    pub value_column: String,
    pub kind: BindingKind,
    #[serde(default)]
    pub value_mode: ValueMode,
}

/// One IMPORTS entry: reuse of another report's base artifact.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportSpec {
    pub id: String,
    pub report: String,
    #[serde(default)]
    pub pass_params: Vec<String>,
}

/// All metadata blocks of one report, each at most once.
#[derive(Debug, Clone, Default)]
pub struct MetadataBlocks {
    pub params: BTreeMap<String, ParamSpecRaw>,
    pub config: BTreeMap<String, ConfigType>,
    pub sources: BTreeMap<String, SourceSpec>,
    pub cache: Option<CacheBlock>,
    pub table: Option<TableBlock>,
    pub search: Option<SearchBlock>,
    pub facets: Vec<FacetSpec>,
    pub charts: Vec<ChartSpec>,
    pub derived_params: BTreeMap<String, DerivedParamSpec>,
    pub literal_sources: Vec<LiteralSourceSpec>,
    pub bindings: Vec<BindingSpec>,
    pub imports: Vec<ImportSpec>,
    pub secrets: Vec<String>,
}

impl MetadataBlocks {
    pub fn binding(&self, id: &str) -> Option<&BindingSpec> {
        self.bindings.iter().find(|b| b.id == id)
    }

    pub fn import(&self, id: &str) -> Option<&ImportSpec> {
        self.imports.iter().find(|i| i.id == id)
    }

    pub fn literal_source(&self, id: &str) -> Option<&LiteralSourceSpec> {
        self.literal_sources.iter().find(|l| l.id == id)
    }
}

/// Extract every metadata block from raw report text, returning the typed
/// blocks plus the SQL body with the islands blanked in place.
pub fn extract_blocks(text: &str) -> CoreResult<(MetadataBlocks, String)> {
    let contexts = byte_contexts(text);
    let mut blocks = MetadataBlocks::default();
    let mut seen: Vec<(String, usize, usize)> = Vec::new();
    let mut blanked = text.as_bytes().to_vec();

    let mut line_start = true;
    let mut i = 0;
    let bytes = text.as_bytes();
    while i < bytes.len() {
        if line_start
            && bytes[i] == b'/'
            && text[i..].starts_with("/***")
            && header_name(&text[i..]).is_some()
        {
            if contexts[i] != crate::scan::Context::BlockComment {
                return Err(CoreError::InvalidMetadataBlock {
                    block: header_name(&text[i..]).unwrap_or_default(),
                    detail: format!(
                        "metadata block inside a SQL string or comment (line {})",
                        line_of(text, i)
                    ),
                });
            }
            let (name, yaml, end) = read_block(text, i)?;
            if seen.iter().any(|(n, _, _)| *n == name) {
                return Err(CoreError::InvalidMetadataBlock {
                    block: name,
                    detail: format!("block declared twice (line {})", line_of(text, i)),
                });
            }
            parse_block(&mut blocks, &name, &yaml)?;
            seen.push((name, i, end));
            blank(&mut blanked, i, end);
            i = end;
            line_start = false;
            continue;
        }
        line_start = bytes[i] == b'\n';
        i += 1;
    }

    // Blocks may not sit inside strings or mid-statement; anything that
    // still looks like a block header after blanking is misplaced.
    let blanked_str = String::from_utf8(blanked).expect("blanking preserves UTF-8");
    if let Some(offset) = find_block_header(&blanked_str) {
        return Err(CoreError::InvalidMetadataBlock {
            block: header_name(&blanked_str[offset..]).unwrap_or_default(),
            detail: format!(
                "metadata block must start at a line start outside SQL (line {})",
                line_of(text, offset)
            ),
        });
    }

    // Adjacent blocks must be separated by whitespace only.
    for pair in seen.windows(2) {
        let (_, _, prev_end) = &pair[0];
        let (name, next_start, _) = &pair[1];
        if !blanked_str[*prev_end..*next_start].trim().is_empty() {
            return Err(CoreError::InvalidMetadataBlock {
                block: name.clone(),
                detail: "metadata blocks must be separated by whitespace, not SQL".to_string(),
            });
        }
    }

    Ok((blocks, blanked_str))
}

/// Read one block starting at `start` (which points at `/***`). Returns
/// (name, yaml text, end offset one past `***/`).
fn read_block(text: &str, start: usize) -> CoreResult<(String, String, usize)> {
    let after_stars = start + 4;
    let name = header_name(&text[start..]).ok_or_else(|| CoreError::InvalidMetadataBlock {
        block: String::new(),
        detail: format!("malformed block header (line {})", line_of(text, start)),
    })?;
    if !SUPPORTED_BLOCKS.contains(&name.as_str()) {
        return Err(CoreError::InvalidMetadataBlock {
            block: name.clone(),
            detail: format!("unsupported block name (line {})", line_of(text, start)),
        });
    }
    let body_start = after_stars + name.len();
    let rel_end = text[body_start..].find("***/").ok_or_else(|| {
        CoreError::InvalidMetadataBlock {
            block: name.clone(),
            detail: format!("missing ***/ terminator (line {})", line_of(text, start)),
        }
    })?;
    let yaml = text[body_start..body_start + rel_end].to_string();
    Ok((name, yaml, body_start + rel_end + 4))
}

/// Parse `/***NAME` returning NAME, if the header shape matches.
fn header_name(text: &str) -> Option<String> {
    let rest = text.strip_prefix("/***")?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_uppercase() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    // header must be followed by whitespace or the terminator
    match rest[name.len()..].chars().next() {
        Some(c) if c.is_whitespace() => Some(name),
        Some('*') | None => Some(name),
        _ => None,
    }
}

/// Find a `/***NAME` header that survived blanking: one inside a string,
/// comment, or not at a line start. Legitimate blocks were blanked already.
fn find_block_header(blanked: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(rel) = blanked[search_from..].find("/***") {
        let offset = search_from + rel;
        if header_name(&blanked[offset..]).is_some() {
            return Some(offset);
        }
        search_from = offset + 4;
    }
    None
}

fn blank(bytes: &mut [u8], start: usize, end: usize) {
    for b in bytes[start..end].iter_mut() {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

fn parse_block(blocks: &mut MetadataBlocks, name: &str, yaml: &str) -> CoreResult<()> {
    let invalid = |detail: String| CoreError::InvalidMetadataBlock {
        block: name.to_string(),
        detail,
    };
    let trimmed = yaml.trim();
    match name {
        "PARAMS" => {
            blocks.params = from_yaml(trimmed).map_err(invalid)?;
        }
        "CONFIG" => {
            blocks.config = from_yaml(trimmed).map_err(invalid)?;
        }
        "SOURCES" => {
            blocks.sources = from_yaml(trimmed).map_err(invalid)?;
        }
        "CACHE" => {
            blocks.cache = Some(from_yaml(trimmed).map_err(invalid)?);
        }
        "TABLE" => {
            blocks.table = Some(from_yaml(trimmed).map_err(invalid)?);
        }
        "SEARCH" => {
            blocks.search = Some(from_yaml(trimmed).map_err(invalid)?);
        }
        "FACETS" => {
            blocks.facets = from_yaml(trimmed).map_err(invalid)?;
        }
        "CHARTS" => {
            blocks.charts = from_yaml(trimmed).map_err(invalid)?;
        }
        "DERIVED_PARAMS" => {
            blocks.derived_params = from_yaml(trimmed).map_err(invalid)?;
        }
        "LITERAL_SOURCES" => {
            blocks.literal_sources = from_yaml(trimmed).map_err(invalid)?;
        }
        "BINDINGS" => {
            blocks.bindings = from_yaml(trimmed).map_err(invalid)?;
        }
        "IMPORTS" => {
            blocks.imports = from_yaml(trimmed).map_err(invalid)?;
        }
        "SECRETS" => {
            blocks.secrets = from_yaml(trimmed).map_err(invalid)?;
        }
        _ => unreachable!("block names are validated before parsing"),
    }
    Ok(())
}

/// Deserialize a block body, treating an empty body as the default value.
fn from_yaml<T>(yaml: &str) -> Result<T, String>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if yaml.is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(yaml).map_err(|e| e.to_string())
}

#[cfg(test)]
#[path = "blocks_test.rs"]
mod tests;
