//! The parsed report intermediate representation.
//!
//! `parse_report_text` runs the whole front half of the pipeline: block
//! extraction, single-statement and forbidden-keyword checks, CTE and
//! placeholder scanning, parameter spec construction with scope inference,
//! and every per-report validation that needs no registry. A report is
//! immutable once parsed.

pub use crate::blocks::{ApplyMode, AppliesTo, ParamScope};

use crate::blocks::{extract_blocks, BindingSpec, MetadataBlocks};
use crate::placeholder::{scan_placeholders, PlaceholderKind, PlaceholderSpan};
use crate::scan::{find_forbidden_keyword, line_of, scan_ctes, split_statements, CteSpan};
use crate::types::{is_identifier, ParamType, ParamValue};
use ds_core::error::{CoreError, CoreResult};
use ds_core::fingerprint::Fingerprint;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One declared parameter with its parsed type and resolved scope.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    /// Canonical-case name as declared
    pub name: String,
    pub ty: ParamType,
    pub scope: ParamScope,
    pub applies_to: Option<AppliesTo>,
    pub default: Option<ParamValue>,
}

/// A parsed report. Identified by its repository-relative path without the
/// `.sql` suffix; never mutated after parsing.
#[derive(Debug, Clone)]
pub struct Report {
    pub id: String,
    pub path: Option<PathBuf>,
    /// SHA-256 of the canonicalized (raw) source text
    pub source_fingerprint: Fingerprint,
    /// SQL body with metadata islands blanked in place
    pub sql: String,
    pub blocks: MetadataBlocks,
    pub params: Vec<ParamSpec>,
    pub placeholders: Vec<PlaceholderSpan>,
    pub ctes: Vec<CteSpan>,
}

impl Report {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Case-insensitive parameter lookup, for URL key folding.
    pub fn param_ci(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn cte(&self, name: &str) -> Option<&CteSpan> {
        self.ctes.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Names of materialized CTEs in lexical order.
    pub fn materialized_ctes(&self) -> Vec<&CteSpan> {
        self.ctes.iter().filter(|c| c.materialize.is_some()).collect()
    }

    /// Placeholder spans lying inside a CTE's body.
    pub fn placeholders_in(&self, cte: &CteSpan) -> impl Iterator<Item = &PlaceholderSpan> {
        let (start, end) = cte.body_span;
        self.placeholders
            .iter()
            .filter(move |s| s.start >= start && s.end <= end)
    }

    /// True when the report's base SQL carries a top-N clause, which makes
    /// client-side filtering unsafe for hybrid parameters.
    pub fn has_limit_clause(&self) -> bool {
        crate::scan::referenced_words(&self.sql, 0, self.sql.len()).contains("limit")
    }
}

/// Canonicalize a report reference into an id: forward slashes, no leading
/// `./`, no `.sql` suffix.
pub fn canonical_report_id(reference: &str) -> String {
    let normalized = reference.replace('\\', "/");
    let trimmed = normalized.trim_start_matches("./").trim_matches('/');
    trimmed.strip_suffix(".sql").unwrap_or(trimmed).to_string()
}

/// Parse a report file.
pub fn parse_report_file(id: &str, path: &Path) -> CoreResult<Report> {
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut report = parse_report_text(id, &text)?;
    report.path = Some(path.to_path_buf());
    Ok(report)
}

/// Parse report text into the immutable IR, validating everything that
/// does not require a registry snapshot.
pub fn parse_report_text(id: &str, text: &str) -> CoreResult<Report> {
    let source_fingerprint = Fingerprint::of_bytes(text.as_bytes());
    let (blocks, sql) = extract_blocks(text)?;

    let statements = split_statements(&sql);
    if statements.len() != 1 {
        return Err(CoreError::ForbiddenSqlConstruct {
            detail: format!(
                "report must contain exactly one SQL statement, found {}",
                statements.len()
            ),
        });
    }
    if let Some((keyword, offset)) = find_forbidden_keyword(&sql) {
        return Err(CoreError::ForbiddenSqlConstruct {
            detail: format!("{} is not allowed (line {})", keyword, line_of(&sql, offset)),
        });
    }

    let ctes = scan_ctes(&sql)?;
    let placeholders = scan_placeholders(&sql)?;
    let params = build_params(&blocks, &placeholders, &ctes)?;

    let report = Report {
        id: canonical_report_id(id),
        path: None,
        source_fingerprint,
        sql,
        blocks,
        params,
        placeholders,
        ctes,
    };
    validate_placeholder_targets(&report)?;
    validate_bindings(&report)?;
    validate_literal_sources(&report)?;
    validate_secrets(&report)?;
    Ok(report)
}

fn build_params(
    blocks: &MetadataBlocks,
    placeholders: &[PlaceholderSpan],
    ctes: &[CteSpan],
) -> CoreResult<Vec<ParamSpec>> {
    let mut params = Vec::with_capacity(blocks.params.len());
    let mut seen_folded: HashSet<String> = HashSet::new();

    for (name, raw) in &blocks.params {
        if !seen_folded.insert(name.to_ascii_lowercase()) {
            return Err(CoreError::InvalidMetadataBlock {
                block: "PARAMS".to_string(),
                detail: format!("parameter names differ only by case: '{name}'"),
            });
        }
        let ty = ParamType::parse(&raw.type_spec)?;

        let referenced = placeholders.iter().any(|s| {
            matches!(
                s.kind,
                PlaceholderKind::Param | PlaceholderKind::Ident | PlaceholderKind::Path
            ) && s.name.eq_ignore_ascii_case(name)
        });
        let scope = match raw.scope {
            Some(scope) => scope,
            None if referenced => ParamScope::Data,
            None => ParamScope::View,
        };
        if scope == ParamScope::View && referenced {
            return Err(CoreError::InvalidMetadataBlock {
                block: "PARAMS".to_string(),
                detail: format!("view-scoped parameter '{name}' is referenced in the SQL body"),
            });
        }

        if let Some(applies_to) = &raw.applies_to {
            enforce_applies_to(applies_to, ctes, name)?;
        }

        let default = match &raw.default {
            Some(value) => Some(coerce_default(value, &ty, name)?),
            None => None,
        };

        params.push(ParamSpec {
            name: name.clone(),
            ty,
            scope,
            applies_to: raw.applies_to.clone(),
            default,
        });
    }

    // derived params must name a declared source param
    for (name, derived) in &blocks.derived_params {
        if !blocks
            .params
            .keys()
            .any(|p| p.eq_ignore_ascii_case(&derived.from))
        {
            return Err(CoreError::UndeclaredName {
                kind: "param".to_string(),
                name: format!("{} (derived param '{}')", derived.from, name),
            });
        }
    }

    Ok(params)
}

fn enforce_applies_to(applies_to: &AppliesTo, ctes: &[CteSpan], param: &str) -> CoreResult<()> {
    let exists = |name: &str| ctes.iter().any(|c| c.name.eq_ignore_ascii_case(name));
    if !exists(&applies_to.cte) {
        return Err(CoreError::InvalidMetadataBlock {
            block: "PARAMS".to_string(),
            detail: format!(
                "parameter '{param}' applies_to CTE '{}' which is not defined",
                applies_to.cte
            ),
        });
    }
    if applies_to.mode == ApplyMode::Wrapper {
        let base = format!("{}_base", applies_to.cte);
        if !exists(&base) {
            return Err(CoreError::InvalidMetadataBlock {
                block: "PARAMS".to_string(),
                detail: format!(
                    "wrapper applies_to on '{param}' expects a '{base}' CTE next to '{}'",
                    applies_to.cte
                ),
            });
        }
    }
    Ok(())
}

fn coerce_default(value: &serde_yaml::Value, ty: &ParamType, name: &str) -> CoreResult<ParamValue> {
    let raw = match value {
        serde_yaml::Value::Null => return Ok(ParamValue::Absent),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        _ => {
            return Err(CoreError::InvalidMetadataBlock {
                block: "PARAMS".to_string(),
                detail: format!("default for '{name}' must be a scalar"),
            });
        }
    };
    ty.coerce(&[raw], name)
}

/// Every placeholder must reference a declared entity of the right family.
fn validate_placeholder_targets(report: &Report) -> CoreResult<()> {
    let undeclared = |kind: &str, name: &str| CoreError::UndeclaredName {
        kind: kind.to_string(),
        name: name.to_string(),
    };
    for span in &report.placeholders {
        match span.kind {
            PlaceholderKind::Param => {
                let param = report
                    .param_ci(&span.name)
                    .ok_or_else(|| undeclared("param", &span.name))?;
                if param.scope == ParamScope::View {
                    return Err(CoreError::InvalidMetadataBlock {
                        block: "PARAMS".to_string(),
                        detail: format!(
                            "view-scoped parameter '{}' is referenced in the SQL body",
                            param.name
                        ),
                    });
                }
            }
            PlaceholderKind::Ident => {
                let param = report
                    .param_ci(&span.name)
                    .ok_or_else(|| undeclared("param", &span.name))?;
                match param.ty.unwrap_optional() {
                    ParamType::InjectedIdentLiteral(_) | ParamType::Str | ParamType::InjectedStr => {}
                    other => {
                        return Err(CoreError::BadParamType {
                            param: param.name.clone(),
                            detail: format!(
                                "type {other} cannot be spliced as an identifier"
                            ),
                        });
                    }
                }
            }
            PlaceholderKind::Path => {
                let is_param = report.param_ci(&span.name).is_some();
                let is_source = report.blocks.sources.contains_key(&span.name);
                if !is_param && !is_source {
                    return Err(undeclared("path", &span.name));
                }
            }
            PlaceholderKind::Bind => {
                if report.blocks.binding(&span.name).is_none() {
                    return Err(undeclared("binding", &span.name));
                }
            }
            PlaceholderKind::Mat => {
                let is_mat = report
                    .cte(&span.name)
                    .map(|c| c.materialize.is_some())
                    .unwrap_or(false);
                if !is_mat {
                    return Err(undeclared("materialization", &span.name));
                }
            }
            PlaceholderKind::Import => {
                if report.blocks.import(&span.name).is_none() {
                    return Err(undeclared("import", &span.name));
                }
            }
            PlaceholderKind::Config => {
                if !report.blocks.config.contains_key(&span.name) {
                    return Err(undeclared("config", &span.name));
                }
            }
            PlaceholderKind::Secret => {
                if !report.blocks.secrets.iter().any(|s| s == &span.name) {
                    return Err(undeclared("secret", &span.name));
                }
            }
        }
    }
    Ok(())
}

fn validate_bindings(report: &Report) -> CoreResult<()> {
    for binding in &report.blocks.bindings {
        validate_binding(report, binding)?;
    }
    Ok(())
}

fn validate_binding(report: &Report, binding: &BindingSpec) -> CoreResult<()> {
    let invalid = |detail: String| CoreError::InvalidMetadataBlock {
        block: "BINDINGS".to_string(),
        detail,
    };
    match (&binding.key_param, &binding.key_sql) {
        (Some(_), Some(_)) => {
            return Err(invalid(format!(
                "binding '{}' cannot set both key_param and key_sql",
                binding.id
            )));
        }
        (None, None) => {
            return Err(invalid(format!(
                "binding '{}' must set key_param or key_sql",
                binding.id
            )));
        }
        _ => {}
    }
    if let Some(key_param) = &binding.key_param {
        if report.param_ci(key_param).is_none() {
            return Err(CoreError::UndeclaredName {
                kind: "param".to_string(),
                name: format!("{} (binding '{}')", key_param, binding.id),
            });
        }
    }
    match report.cte(&binding.source) {
        Some(cte) if cte.materialize.is_some() => {}
        Some(_) => {
            return Err(invalid(format!(
                "binding '{}' source '{}' must be a materialized CTE",
                binding.id, binding.source
            )));
        }
        None => {
            return Err(CoreError::UndeclaredName {
                kind: "cte".to_string(),
                name: format!("{} (binding '{}')", binding.source, binding.id),
            });
        }
    }
    if !is_identifier(&binding.key_column) || !is_identifier(&binding.value_column) {
        return Err(invalid(format!(
            "binding '{}' columns must be bare identifiers",
            binding.id
        )));
    }
    Ok(())
}

fn validate_literal_sources(report: &Report) -> CoreResult<()> {
    for source in &report.blocks.literal_sources {
        match report.cte(&source.from_cte) {
            Some(cte) if cte.materialize.is_some() => {}
            Some(_) => {
                return Err(CoreError::InvalidMetadataBlock {
                    block: "LITERAL_SOURCES".to_string(),
                    detail: format!(
                        "literal source '{}' requires '{}' to be materialized",
                        source.id, source.from_cte
                    ),
                });
            }
            None => {
                return Err(CoreError::UndeclaredName {
                    kind: "cte".to_string(),
                    name: format!("{} (literal source '{}')", source.from_cte, source.id),
                });
            }
        }
        if !is_identifier(&source.value_column) {
            return Err(CoreError::InvalidMetadataBlock {
                block: "LITERAL_SOURCES".to_string(),
                detail: format!("literal source '{}' value_column must be an identifier", source.id),
            });
        }
    }
    Ok(())
}

fn validate_secrets(report: &Report) -> CoreResult<()> {
    for name in &report.blocks.secrets {
        if !is_identifier(name) {
            return Err(CoreError::InvalidMetadataBlock {
                block: "SECRETS".to_string(),
                detail: format!("'{name}' is not a valid secret name"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "report_test.rs"]
mod tests;
