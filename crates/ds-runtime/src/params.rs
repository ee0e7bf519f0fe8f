//! Parameter resolution: URL query pairs → routed, typed values.
//!
//! Incoming keys fold case-insensitively onto declared names. Prefixes pick
//! the routing: `__client__X` stays browser-side, `__server__X` forces the
//! artifact side, bare `X` follows the declared scope, and a global
//! `__force_server=1` promotes everything promotable. Client-only values
//! are collected into a separate bag that never reaches an artifact build.

use ds_core::error::{CoreError, CoreResult};
use ds_report::blocks::ParamScope;
use ds_report::placeholder::PlaceholderKind;
use ds_report::report::{ParamSpec, Report};
use ds_report::types::ParamValue;
use std::collections::BTreeMap;

/// Query keys with meaning outside the parameter namespace.
const RESERVED_KEYS: [&str; 2] = ["report", "format"];

/// Routing class parsed off an incoming key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Routing {
    Client,
    Bare,
    Server,
}

/// Output of resolution: values split by side.
#[derive(Debug, Default)]
pub struct ResolvedParams {
    /// Canonical name → typed value, applied to artifact builds. Declared
    /// data/hybrid params always have an entry (Absent when unset) so every
    /// placeholder position gets a splice.
    pub server: BTreeMap<String, ParamValue>,
    /// Canonical name → raw display value, surfaced through the manifest.
    pub client: BTreeMap<String, String>,
    pub force_server: bool,
}

impl ResolvedParams {
    pub fn server_value(&self, name: &str) -> Option<&ParamValue> {
        self.server.get(name)
    }
}

/// Resolve raw query pairs against a report's declared parameters.
pub fn resolve_params(
    report: &Report,
    raw: &[(String, String)],
    client_values_cap: usize,
) -> CoreResult<ResolvedParams> {
    let force_server = raw.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("__force_server") && is_truthy(v)
    });

    // bucket incoming values per (param, routing), tracking the literal key
    // used so conflicting casings on scalars are detected
    let mut buckets: BTreeMap<(String, Routing), (String, Vec<String>)> = BTreeMap::new();
    for (key, value) in raw {
        if RESERVED_KEYS.iter().any(|r| key.eq_ignore_ascii_case(r))
            || key.eq_ignore_ascii_case("__force_server")
        {
            continue;
        }
        let (routing, stripped) = split_routing(key);
        let Some(param) = report.param_ci(stripped) else {
            log::debug!("ignoring undeclared query key '{key}'");
            continue;
        };
        let is_list = matches!(
            param.ty.unwrap_optional(),
            ds_report::types::ParamType::List(_)
        );

        let entry = buckets
            .entry((param.name.clone(), routing))
            .or_insert_with(|| (key.clone(), Vec::new()));
        if !is_list && entry.0 != *key {
            return Err(CoreError::DuplicateParamCasing {
                name: param.name.clone(),
            });
        }
        // List[T] accepts repeated keys or comma-separated values
        if is_list {
            entry.1.extend(value.split(',').map(str::to_string));
        } else {
            entry.1.push(value.clone());
        }
    }

    let mut resolved = ResolvedParams {
        force_server,
        ..Default::default()
    };

    for param in &report.params {
        let client_bucket = buckets.remove(&(param.name.clone(), Routing::Client));
        let bare_bucket = buckets.remove(&(param.name.clone(), Routing::Bare));
        let server_bucket = buckets.remove(&(param.name.clone(), Routing::Server));

        if param.scope == ParamScope::Data && client_bucket.is_some() {
            return Err(CoreError::BadScopeRouting {
                param: param.name.clone(),
            });
        }

        route_param(
            report,
            param,
            RoutedInput {
                client: client_bucket.map(|(_, v)| v),
                bare: bare_bucket.map(|(_, v)| v),
                server: server_bucket.map(|(_, v)| v),
            },
            force_server,
            client_values_cap,
            &mut resolved,
        )?;
    }

    Ok(resolved)
}

struct RoutedInput {
    client: Option<Vec<String>>,
    bare: Option<Vec<String>>,
    server: Option<Vec<String>>,
}

fn route_param(
    report: &Report,
    param: &ParamSpec,
    input: RoutedInput,
    force_server: bool,
    client_values_cap: usize,
    resolved: &mut ResolvedParams,
) -> CoreResult<()> {
    // precedence: __server__ > bare > __client__
    let (values, routing) = if let Some(v) = input.server {
        (Some(v), Routing::Server)
    } else if let Some(v) = input.bare {
        (Some(v), Routing::Bare)
    } else if let Some(v) = input.client {
        (Some(v), Routing::Client)
    } else {
        (None, Routing::Bare)
    };

    match param.scope {
        ParamScope::View => {
            // view params never affect artifacts, force_server or not
            if let Some(values) = values {
                resolved
                    .client
                    .insert(param.name.clone(), values.join(","));
            } else if let Some(default) = &param.default {
                if !default.is_absent() {
                    resolved
                        .client
                        .insert(param.name.clone(), default.display_string());
                }
            }
        }
        ParamScope::Data => {
            let coerced = coerce_or_default(param, values.as_deref())?;
            resolved.server.insert(param.name.clone(), coerced);
        }
        ParamScope::Hybrid => {
            let client_routed = routing == Routing::Client && !force_server;
            let eligible = client_routed
                && client_eligible(report, param, values.as_deref().unwrap_or(&[]), client_values_cap);
            if client_routed && eligible {
                resolved.server.insert(param.name.clone(), ParamValue::Absent);
                if let Some(values) = values {
                    resolved.client.insert(param.name.clone(), values.join(","));
                }
            } else {
                let coerced = coerce_or_default(param, values.as_deref())?;
                resolved.server.insert(param.name.clone(), coerced);
            }
        }
    }
    Ok(())
}

fn coerce_or_default(param: &ParamSpec, values: Option<&[String]>) -> CoreResult<ParamValue> {
    match values {
        Some(values) => param.ty.coerce(values, &param.name),
        None => Ok(param.default.clone().unwrap_or(ParamValue::Absent)),
    }
}

/// Client-side hybrid eligibility. A value set stays client-side only when
/// applying it in the browser cannot change server-side semantics: the
/// param feeds no materialization, binding, import, or scan path, the base
/// SQL carries no top-N clause, and the value set is bounded.
fn client_eligible(
    report: &Report,
    param: &ParamSpec,
    values: &[String],
    cap: usize,
) -> bool {
    if values.len() > cap {
        return false;
    }
    if report.has_limit_clause() {
        return false;
    }
    if param.applies_to.is_some() {
        return false;
    }

    // referenced inside a materialized CTE body or a scan path?
    for span in &report.placeholders {
        if !span.name.eq_ignore_ascii_case(&param.name) {
            continue;
        }
        if !matches!(
            span.kind,
            PlaceholderKind::Param | PlaceholderKind::Ident | PlaceholderKind::Path
        ) {
            continue;
        }
        if span.in_scan_path {
            return false;
        }
        for cte in report.materialized_ctes() {
            let (start, end) = cte.body_span;
            if span.start >= start && span.end <= end {
                return false;
            }
        }
    }

    // referenced by a binding key?
    for binding in &report.blocks.bindings {
        if binding
            .key_param
            .as_deref()
            .is_some_and(|k| k.eq_ignore_ascii_case(&param.name))
        {
            return false;
        }
        if let Some(key_sql) = &binding.key_sql {
            if key_sql_references(key_sql, &param.name) {
                return false;
            }
        }
    }

    // forwarded to an import?
    for import in &report.blocks.imports {
        if import
            .pass_params
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&param.name))
        {
            return false;
        }
    }

    true
}

/// Does a binding's key_sql reference `{{param name}}`?
pub(crate) fn key_sql_references(key_sql: &str, name: &str) -> bool {
    ds_report::placeholder::scan_placeholders(key_sql)
        .map(|spans| {
            spans.iter().any(|s| {
                matches!(s.kind, PlaceholderKind::Param | PlaceholderKind::Ident)
                    && s.name.eq_ignore_ascii_case(name)
            })
        })
        .unwrap_or(false)
}

fn split_routing(key: &str) -> (Routing, &str) {
    if let Some(stripped) = strip_prefix_ci(key, "__client__") {
        (Routing::Client, stripped)
    } else if let Some(stripped) = strip_prefix_ci(key, "__server__") {
        (Routing::Server, stripped)
    } else {
        (Routing::Bare, key)
    }
}

fn strip_prefix_ci<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    if key.len() >= prefix.len() && key[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&key[prefix.len()..])
    } else {
        None
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "t" | "yes" | "on"
    )
}

#[cfg(test)]
#[path = "params_test.rs"]
mod tests;
