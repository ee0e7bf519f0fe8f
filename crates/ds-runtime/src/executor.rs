//! Plan execution: span-based splicing and artifact builds.
//!
//! The executor never re-orders, re-indents, or re-quotes the report SQL.
//! Every transformation is a positional edit: placeholder spans become
//! resolved literals, materialized CTE bodies become `parquet_scan` reads
//! of their published artifacts, and the `MATERIALIZE` markers vanish.
//! Each node's write goes through the store's single-flight build, so under
//! concurrency the engine runs at most once per fingerprint.

use crate::params::ResolvedParams;
use crate::plan::{NodeKind, Plan, PlanNode};
use ds_cache::kind::ArtifactKind;
use ds_cache::store::{ArtifactHandle, ArtifactStore};
use ds_core::error::{CoreError, CoreResult};
use ds_core::secrets::{wipe_string, SecretsVault};
use ds_engine::error::EngineError;
use ds_engine::pool::{EngineGuard, EnginePool};
use ds_report::blocks::{BindingKind, BindingSpec, ValueMode};
use ds_report::placeholder::{scan_placeholders, PlaceholderKind, PlaceholderSpan};
use ds_report::report::Report;
use ds_report::types::{is_identifier, ParamType, ParamValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything one plan execution needs.
pub struct ExecutionInput<'a> {
    pub report: &'a Report,
    pub resolved: &'a ResolvedParams,
    pub plan: &'a Plan,
    pub store: &'a Arc<ArtifactStore>,
    pub pool: &'a EnginePool,
    pub vault: &'a SecretsVault,
    pub config_values: &'a BTreeMap<String, String>,
    /// Import id → base artifact of the already-dispatched child
    pub import_paths: &'a BTreeMap<String, PathBuf>,
    pub ttl: Duration,
    /// Effective stale-while-revalidate setting for this report
    pub stale_ok: bool,
}

/// Artifacts and values produced by one plan execution.
pub struct ExecutionOutput {
    pub base: ArtifactHandle,
    pub materialize: BTreeMap<String, ArtifactHandle>,
    pub literal_sources: BTreeMap<String, ArtifactHandle>,
    /// Binding id → resolved value (display form)
    pub bindings: BTreeMap<String, String>,
    /// Binding artifacts, held so the sweeper leaves them alone
    pub binding_artifacts: Vec<ArtifactHandle>,
    pub schema: Vec<(String, String)>,
}

/// Execute every node of the plan in order.
pub fn execute(input: &ExecutionInput<'_>) -> CoreResult<ExecutionOutput> {
    let session = acquire_session(input.pool)?;
    let mut state = ExecState {
        input,
        session: &session,
        mat_paths: BTreeMap::new(),
        mat_handles: BTreeMap::new(),
        literal_handles: BTreeMap::new(),
        binding_values: BTreeMap::new(),
        binding_splices: BTreeMap::new(),
        binding_artifacts: Vec::new(),
    };

    for node in &input.plan.nodes {
        match node.kind {
            NodeKind::Import => {}
            NodeKind::Materialize => state.run_materialize(node)?,
            NodeKind::Binding => state.run_binding(node)?,
            NodeKind::LiteralSource => state.run_literal_source(node)?,
            NodeKind::Base => {}
        }
    }

    let base_node = input.plan.base();
    let (base, schema) = state.run_base(base_node)?;

    Ok(ExecutionOutput {
        base,
        materialize: state.mat_handles,
        literal_sources: state.literal_handles,
        bindings: state.binding_values,
        binding_artifacts: state.binding_artifacts,
        schema,
    })
}

/// Acquire an engine session, retrying once on transient failure.
fn acquire_session(pool: &EnginePool) -> CoreResult<EngineGuard<'_>> {
    match pool.acquire() {
        Ok(session) => Ok(session),
        Err(EngineError::Connection(first)) => {
            log::warn!("engine connection failed ({first}), retrying once");
            std::thread::sleep(Duration::from_millis(250));
            pool.acquire().map_err(|e| CoreError::EngineUnavailable {
                detail: e.to_string(),
            })
        }
        Err(other) => Err(CoreError::EngineUnavailable {
            detail: other.to_string(),
        }),
    }
}

struct ExecState<'a, 'i> {
    input: &'a ExecutionInput<'i>,
    session: &'a EngineGuard<'a>,
    mat_paths: BTreeMap<String, PathBuf>,
    mat_handles: BTreeMap<String, ArtifactHandle>,
    literal_handles: BTreeMap<String, ArtifactHandle>,
    binding_values: BTreeMap<String, String>,
    binding_splices: BTreeMap<String, String>,
    binding_artifacts: Vec<ArtifactHandle>,
}

impl<'a, 'i> ExecState<'a, 'i> {
    fn report(&self) -> &'i Report {
        self.input.report
    }

    fn engine_err(&self, node: &str, err: EngineError) -> CoreError {
        match err {
            EngineError::Connection(detail) => CoreError::EngineUnavailable { detail },
            EngineError::Execution(detail) => {
                let first_line = detail.lines().next().unwrap_or("").to_string();
                CoreError::SqlExecutionError {
                    report: self.report().id.clone(),
                    node: node.to_string(),
                    detail: self.input.vault.redact(&first_line),
                }
            }
        }
    }

    fn sql_err(&self, node: &str, detail: String) -> CoreError {
        CoreError::SqlExecutionError {
            report: self.report().id.clone(),
            node: node.to_string(),
            detail,
        }
    }

    fn run_materialize(&mut self, node: &PlanNode) -> CoreResult<()> {
        let report = self.report();
        let cte = report
            .cte(&node.name)
            .expect("plan nodes reference scanned CTEs");
        let (body_start, body_end) = cte.body_span;

        // non-materialized CTEs defined earlier must travel with the body;
        // materialized ones are attached as views
        let mut select = String::new();
        let mut prelude: Vec<String> = Vec::new();
        for earlier in &report.ctes {
            if earlier.body_span.0 >= body_start {
                break;
            }
            if earlier.materialize.is_none() {
                let body = self.render_range(earlier.body_span.0, earlier.body_span.1)?;
                prelude.push(format!("{} AS ({})", earlier.name, body));
            }
        }
        if !prelude.is_empty() {
            select.push_str("WITH ");
            select.push_str(&prelude.join(", "));
            select.push(' ');
        }
        select.push_str(&self.render_range(body_start, body_end)?);

        let has_secret = self.range_has_secret(body_start, body_end);
        let session = self.session;
        let node_name = node.name.clone();
        let result = self.input.store.get_or_build(
            ArtifactKind::Materialize,
            node.fingerprint,
            self.input.ttl,
            self.input.stale_ok,
            &node_name,
            |tmp| {
                session
                    .copy_to_parquet(&select, tmp)
                    .map_err(|e| self.engine_err(&node_name, e))
            },
        );
        let mut select = select;
        if has_secret {
            wipe_string(&mut select);
        }
        let handle = result?;

        self.session
            .attach_parquet_view(&cte.name, handle.path())
            .map_err(|e| self.engine_err(&node.name, e))?;
        self.mat_paths.insert(cte.name.clone(), handle.path().to_path_buf());
        self.mat_handles.insert(cte.name.clone(), handle);
        Ok(())
    }

    fn run_binding(&mut self, node: &PlanNode) -> CoreResult<()> {
        let report = self.report();
        let binding = report
            .blocks
            .binding(&node.name)
            .expect("plan nodes reference declared bindings")
            .clone();
        let source = report
            .cte(&binding.source)
            .expect("binding sources are validated at parse time")
            .name
            .clone();

        let key_filter = self.binding_key_filter(&binding)?;
        let values_sql = format!(
            "SELECT {} FROM {} WHERE {}",
            binding.value_column, source, key_filter
        );
        let values = self
            .session
            .query_strings(&values_sql)
            .map_err(|e| self.engine_err(&node.name, e))?;

        let (display, splice) = self.binding_value(&binding, values)?;
        self.binding_values.insert(binding.id.clone(), display);
        self.binding_splices.insert(binding.id.clone(), splice);

        // publish the key/value artifact for the browser runtime
        let session = self.session;
        let copy_sql = format!(
            "SELECT {} AS key, {} AS value FROM {}",
            binding.key_column, binding.value_column, source
        );
        let node_name = node.name.clone();
        let handle = self.input.store.get_or_build(
            ArtifactKind::Binding,
            node.fingerprint,
            self.input.ttl,
            self.input.stale_ok,
            &node_name,
            |tmp| {
                session
                    .copy_to_parquet(&copy_sql, tmp)
                    .map_err(|e| self.engine_err(&node_name, e))
            },
        )?;
        self.binding_artifacts.push(handle);
        Ok(())
    }

    /// WHERE clause selecting the binding's keys.
    fn binding_key_filter(&self, binding: &BindingSpec) -> CoreResult<String> {
        if let Some(key_param) = &binding.key_param {
            let param = self
                .report()
                .param_ci(key_param)
                .expect("binding key params are validated at parse time");
            let value = self
                .input
                .resolved
                .server
                .get(&param.name)
                .filter(|v| !v.is_absent())
                .ok_or_else(|| {
                    self.sql_err(
                        &binding.id,
                        format!("binding '{}' requires server parameter {}", binding.id, param.name),
                    )
                })?;
            return Ok(format!("{} = {}", binding.key_column, value.sql_literal()));
        }

        let key_sql = binding
            .key_sql
            .as_ref()
            .expect("bindings carry exactly one key source");
        let resolved_key_sql = self.render_snippet(key_sql, &binding.id)?;
        let count = self
            .session
            .query_count(&format!(
                "SELECT {} FROM ({}) AS ds_keys",
                binding.key_column, resolved_key_sql
            ))
            .map_err(|e| self.engine_err(&binding.id, e))?;
        if count == 0 {
            return Err(self.sql_err(
                &binding.id,
                format!("No binding keys produced for '{}'", binding.id),
            ));
        }
        Ok(format!(
            "{} IN (SELECT {} FROM ({}) AS ds_keys)",
            binding.key_column, binding.key_column, resolved_key_sql
        ))
    }

    /// Turn looked-up rows into the manifest value and the SQL splice.
    fn binding_value(
        &self,
        binding: &BindingSpec,
        values: Vec<String>,
    ) -> CoreResult<(String, String)> {
        match binding.value_mode {
            ValueMode::Single => {
                if values.is_empty() {
                    return Err(self.sql_err(
                        &binding.id,
                        format!("No binding value produced for '{}'", binding.id),
                    ));
                }
                if values.len() > 1 {
                    return Err(self.sql_err(
                        &binding.id,
                        format!("Multiple binding values for {}", binding.id),
                    ));
                }
                let value = values.into_iter().next().expect("checked non-empty");
                let splice = match binding.kind {
                    BindingKind::Identifier => {
                        if !is_identifier(&value) {
                            return Err(self.sql_err(
                                &binding.id,
                                format!("binding '{}' produced a non-identifier value", binding.id),
                            ));
                        }
                        value.clone()
                    }
                    _ => format!("'{}'", value.replace('\'', "''")),
                };
                Ok((value, splice))
            }
            ValueMode::List => {
                let rendered: Vec<String> = values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect();
                Ok((values.join(","), format!("[{}]", rendered.join(", "))))
            }
        }
    }

    fn run_literal_source(&mut self, node: &PlanNode) -> CoreResult<()> {
        let report = self.report();
        let spec = report
            .blocks
            .literal_source(&node.name)
            .expect("plan nodes reference declared literal sources")
            .clone();
        let from = report
            .cte(&spec.from_cte)
            .expect("literal source CTEs are validated at parse time")
            .name
            .clone();

        let session = self.session;
        let copy_sql = format!("SELECT DISTINCT {} FROM {}", spec.value_column, from);
        let node_name = node.name.clone();
        let handle = self.input.store.get_or_build(
            ArtifactKind::LiteralSource,
            node.fingerprint,
            self.input.ttl,
            self.input.stale_ok,
            &node_name,
            |tmp| {
                session
                    .copy_to_parquet(&copy_sql, tmp)
                    .map_err(|e| self.engine_err(&node_name, e))
            },
        )?;
        self.literal_handles.insert(spec.id.clone(), handle);
        Ok(())
    }

    fn run_base(&mut self, node: &PlanNode) -> CoreResult<(ArtifactHandle, Vec<(String, String)>)> {
        let mut resolved = self.render_base()?;
        let has_secret = self
            .report()
            .placeholders
            .iter()
            .any(|s| s.kind == PlaceholderKind::Secret);

        let session = self.session;
        let result = self.input.store.get_or_build(
            ArtifactKind::Base,
            node.fingerprint,
            self.input.ttl,
            self.input.stale_ok,
            "base",
            |tmp| {
                session
                    .copy_to_parquet(&resolved, tmp)
                    .map_err(|e| self.engine_err("base", e))
            },
        );
        if has_secret {
            wipe_string(&mut resolved);
        }
        let handle = result?;

        let schema = self
            .session
            .describe_parquet(handle.path())
            .map_err(|e| self.engine_err("base", e))?;
        Ok((handle, schema))
    }

    /// Resolve placeholders inside a byte range of the report SQL.
    fn render_range(&self, start: usize, end: usize) -> CoreResult<String> {
        let sql = &self.report().sql;
        let mut out = String::with_capacity(end - start);
        let mut cursor = start;
        for span in &self.report().placeholders {
            if span.start < start || span.end > end {
                continue;
            }
            out.push_str(&sql[cursor..span.start]);
            out.push_str(&self.resolve_span(span)?);
            cursor = span.end;
        }
        out.push_str(&sql[cursor..end]);
        Ok(out)
    }

    /// Resolve the full statement: placeholder splices plus materialized
    /// CTE rewrites, then the trailing semicolon drop.
    fn render_base(&self) -> CoreResult<String> {
        let report = self.report();
        let sql = &report.sql;

        // (start, end, replacement) edits, applied in order
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        for cte in report.materialized_ctes() {
            if let Some((kw_start, kw_end)) = cte.keyword_span {
                edits.push((kw_start, kw_end, String::new()));
            }
            let path = self.mat_paths.get(&cte.name).ok_or_else(|| {
                CoreError::CacheCorrupt {
                    detail: format!("materialization '{}' missing before base", cte.name),
                }
            })?;
            edits.push((
                cte.body_span.0,
                cte.body_span.1,
                format!("SELECT * FROM parquet_scan('{}')", escape_sql_path(path)),
            ));
        }
        for span in &report.placeholders {
            let inside_mat_body = report.materialized_ctes().iter().any(|c| {
                span.start >= c.body_span.0 && span.end <= c.body_span.1
            });
            if !inside_mat_body {
                edits.push((span.start, span.end, self.resolve_span(span)?));
            }
        }
        edits.sort_by_key(|(start, _, _)| *start);

        let mut out = String::with_capacity(sql.len());
        let mut cursor = 0;
        for (start, end, replacement) in edits {
            out.push_str(&sql[cursor..start]);
            out.push_str(&replacement);
            cursor = end;
        }
        out.push_str(&sql[cursor..]);

        let trimmed = out.trim_end().trim_end_matches(';').trim_end().to_string();
        Ok(trimmed)
    }

    /// Resolve placeholders in a metadata-carried SQL snippet (key_sql).
    fn render_snippet(&self, snippet: &str, node: &str) -> CoreResult<String> {
        let spans = scan_placeholders(snippet)?;
        let mut out = String::with_capacity(snippet.len());
        let mut cursor = 0;
        for span in &spans {
            out.push_str(&snippet[cursor..span.start]);
            match span.kind {
                PlaceholderKind::Param | PlaceholderKind::Ident => {
                    let param = self.report().param_ci(&span.name).ok_or_else(|| {
                        CoreError::UndeclaredName {
                            kind: "param".to_string(),
                            name: span.name.clone(),
                        }
                    })?;
                    let value =
                        self.input.resolved.server.get(&param.name).ok_or_else(|| {
                            self.sql_err(
                                node,
                                format!("binding '{node}' requires server parameter {}", param.name),
                            )
                        })?;
                    if span.kind == PlaceholderKind::Param {
                        out.push_str(&value.sql_literal());
                    } else {
                        out.push_str(&value.ident_literal());
                    }
                }
                _ => out.push_str(&self.resolve_span(span)?),
            }
            cursor = span.end;
        }
        out.push_str(&snippet[cursor..]);
        Ok(out)
    }

    /// Resolve one placeholder span into its splice text.
    fn resolve_span(&self, span: &PlaceholderSpan) -> CoreResult<String> {
        let report = self.report();
        let undeclared = |kind: &str| CoreError::UndeclaredName {
            kind: kind.to_string(),
            name: span.name.clone(),
        };
        match span.kind {
            PlaceholderKind::Param => {
                let param = report.param_ci(&span.name).ok_or_else(|| undeclared("param"))?;
                let value = self
                    .input
                    .resolved
                    .server
                    .get(&param.name)
                    .cloned()
                    .unwrap_or(ParamValue::Absent);
                Ok(value.sql_literal())
            }
            PlaceholderKind::Ident => {
                let param = report.param_ci(&span.name).ok_or_else(|| undeclared("param"))?;
                let value = self
                    .input
                    .resolved
                    .server
                    .get(&param.name)
                    .cloned()
                    .unwrap_or(ParamValue::Absent);
                Ok(value.ident_literal())
            }
            PlaceholderKind::Path => self.resolve_path(span),
            PlaceholderKind::Bind => {
                let splice = if span.in_scan_path {
                    let binding = report.blocks.binding(&span.name).ok_or_else(|| undeclared("binding"))?;
                    if binding.value_mode == ValueMode::List {
                        return Err(self.sql_err(
                            &span.name,
                            format!("list binding '{}' cannot form a scan path", span.name),
                        ));
                    }
                    let value = self
                        .binding_values
                        .get(&span.name)
                        .ok_or_else(|| undeclared("binding"))?;
                    value.replace('\'', "''")
                } else {
                    self.binding_splices
                        .get(&span.name)
                        .ok_or_else(|| undeclared("binding"))?
                        .clone()
                };
                Ok(splice)
            }
            PlaceholderKind::Mat => {
                let name = &report.cte(&span.name).ok_or_else(|| undeclared("materialization"))?.name;
                let path = self.mat_paths.get(name).ok_or_else(|| undeclared("materialization"))?;
                Ok(format!("'{}'", escape_sql_path(path)))
            }
            PlaceholderKind::Import => {
                let path = self
                    .input
                    .import_paths
                    .get(&span.name)
                    .ok_or_else(|| undeclared("import"))?;
                Ok(format!("'{}'", escape_sql_path(path)))
            }
            PlaceholderKind::Config => {
                let value = self
                    .input
                    .config_values
                    .get(&span.name)
                    .ok_or_else(|| undeclared("config"))?;
                Ok(quote_in_context(value, span.in_scan_path))
            }
            PlaceholderKind::Secret => {
                let secret = self.input.vault.get(&span.name)?;
                Ok(format!("'{}'", secret.reveal().replace('\'', "''")))
            }
        }
    }

    /// `{{path X}}`: a str param's value, an InjectedPathStr constant, or a
    /// SOURCES entry, rendered for the surrounding context.
    fn resolve_path(&self, span: &PlaceholderSpan) -> CoreResult<String> {
        let report = self.report();
        if let Some(param) = report.param_ci(&span.name) {
            if *param.ty.unwrap_optional() == ParamType::InjectedPathStr {
                let value = self.input.config_values.get(&param.name).ok_or_else(|| {
                    CoreError::UndeclaredName {
                        kind: "config".to_string(),
                        name: param.name.clone(),
                    }
                })?;
                return Ok(quote_in_context(value, span.in_scan_path));
            }
            let value = self
                .input
                .resolved
                .server
                .get(&param.name)
                .cloned()
                .unwrap_or(ParamValue::Absent);
            return match value {
                ParamValue::Absent if span.in_scan_path => Err(self.sql_err(
                    &span.name,
                    format!("path parameter '{}' is absent inside a scan path", param.name),
                )),
                ParamValue::Absent => Ok("NULL".to_string()),
                ParamValue::Str(s) | ParamValue::Path(s) => {
                    Ok(quote_in_context(&s, span.in_scan_path))
                }
                other => Ok(other.sql_literal()),
            };
        }
        if let Some(source) = report.blocks.sources.get(&span.name) {
            let root = &self.input.store.layout().root;
            let path = Path::new(&source.path);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            };
            return Ok(quote_in_context(
                &absolute.to_string_lossy(),
                span.in_scan_path,
            ));
        }
        Err(CoreError::UndeclaredName {
            kind: "path".to_string(),
            name: span.name.clone(),
        })
    }

    fn range_has_secret(&self, start: usize, end: usize) -> bool {
        self.report()
            .placeholders
            .iter()
            .any(|s| s.kind == PlaceholderKind::Secret && s.start >= start && s.end <= end)
    }
}

/// Render a value for its surrounding context: a raw fragment inside a scan
/// path literal, a quoted SQL string elsewhere.
fn quote_in_context(value: &str, in_scan_path: bool) -> String {
    let escaped = value.replace('\'', "''");
    if in_scan_path {
        escaped
    } else {
        format!("'{escaped}'")
    }
}

fn escape_sql_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod tests;
