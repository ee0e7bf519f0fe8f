//! The public dispatcher: `(report_id, raw_params)` → manifest.
//!
//! Wires the whole pipeline together: registry lookup, parameter
//! resolution, recursive import dispatch (each import reuses its target's
//! base artifact), plan building, and execution. One dispatcher instance
//! owns the process-wide store, pool, and vault.

use crate::executor::{execute, ExecutionInput, ExecutionOutput};
use crate::manifest::{Manifest, SchemaColumn};
use crate::params::resolve_params;
use crate::plan::{build_plan, PlanContext};
use ds_cache::store::ArtifactStore;
use ds_core::config::RootConfig;
use ds_core::error::{CoreError, CoreResult};
use ds_core::fingerprint::Fingerprint;
use ds_core::secrets::SecretsVault;
use ds_engine::pool::EnginePool;
use ds_report::placeholder::PlaceholderKind;
use ds_report::registry::ReportRegistry;
use ds_report::report::{canonical_report_id, Report};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Entry point for report requests.
pub struct Dispatcher {
    config: RootConfig,
    registry: Arc<ReportRegistry>,
    store: Arc<ArtifactStore>,
    pool: Arc<EnginePool>,
    vault: Arc<SecretsVault>,
}

/// A child dispatch outcome an importing parent consumes.
struct ImportedBase {
    fingerprint: Fingerprint,
    path: PathBuf,
}

impl Dispatcher {
    pub fn new(
        config: RootConfig,
        registry: Arc<ReportRegistry>,
        store: Arc<ArtifactStore>,
        pool: Arc<EnginePool>,
        vault: Arc<SecretsVault>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            pool,
            vault,
        }
    }

    pub fn registry(&self) -> &Arc<ReportRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<EnginePool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Dispatch one request. `raw_params` are the decoded query pairs in
    /// arrival order.
    pub fn dispatch(
        &self,
        report_ref: &str,
        raw_params: &[(String, String)],
    ) -> CoreResult<Manifest> {
        let mut seen = Vec::new();
        let (manifest, _imported) = self.dispatch_inner(report_ref, raw_params, &mut seen)?;
        Ok(manifest)
    }

    fn dispatch_inner(
        &self,
        report_ref: &str,
        raw_params: &[(String, String)],
        seen: &mut Vec<String>,
    ) -> CoreResult<(Manifest, ImportedBase)> {
        let report_id = canonical_report_id(report_ref);
        if seen.contains(&report_id) {
            let mut cycle = seen.clone();
            cycle.push(report_id);
            return Err(CoreError::ImportCycle {
                cycle: cycle.join(" -> "),
            });
        }
        seen.push(report_id.clone());
        let result = self.dispatch_report(&report_id, raw_params, seen);
        seen.pop();
        result
    }

    fn dispatch_report(
        &self,
        report_id: &str,
        raw_params: &[(String, String)],
        seen: &mut Vec<String>,
    ) -> CoreResult<(Manifest, ImportedBase)> {
        let snapshot = self.registry.snapshot();
        let report = snapshot.report(report_id)?;

        let resolved = resolve_params(
            &report,
            raw_params,
            self.config.limits.client_values_cap,
        )?;

        // imports first: each contributes its target's base artifact
        let mut import_fingerprints = BTreeMap::new();
        let mut import_paths = BTreeMap::new();
        for import in &report.blocks.imports {
            let child_params = select_import_params(raw_params, &import.pass_params);
            let (_, imported) =
                self.dispatch_inner(&import.report, &child_params, seen)?;
            import_fingerprints.insert(import.id.clone(), imported.fingerprint);
            import_paths.insert(import.id.clone(), imported.path);
        }

        let config_values = self.config_values_for(&report)?;
        let ctx = PlanContext {
            report: &report,
            resolved: &resolved,
            deployment_id: &self.config.deployment_id,
            config_values: &config_values,
            import_fingerprints: &import_fingerprints,
        };
        let plan = build_plan(&ctx)?;
        let ttl = self.ttl_for(&report);
        let stale_ok = report
            .blocks
            .cache
            .as_ref()
            .and_then(|c| c.stale_while_revalidate)
            .unwrap_or(self.store.policy().stale_while_revalidate);

        let output = execute(&ExecutionInput {
            report: &report,
            resolved: &resolved,
            plan: &plan,
            store: &self.store,
            pool: &self.pool,
            vault: &self.vault,
            config_values: &config_values,
            import_paths: &import_paths,
            ttl,
            stale_ok,
        })?;

        let base_fp = plan.base().fingerprint;
        let base_path = output.base.path().to_path_buf();
        let manifest = self.build_manifest(&report, &resolved, output, ttl);
        Ok((
            manifest,
            ImportedBase {
                fingerprint: base_fp,
                path: base_path,
            },
        ))
    }

    fn build_manifest(
        &self,
        report: &Report,
        resolved: &crate::params::ResolvedParams,
        output: ExecutionOutput,
        ttl: Duration,
    ) -> Manifest {
        let relative = |handle: &ds_cache::store::ArtifactHandle| handle.relative();

        let materialize = output
            .materialize
            .iter()
            .map(|(name, handle)| (name.clone(), relative(handle)))
            .collect();
        let literal_sources = output
            .literal_sources
            .iter()
            .map(|(id, handle)| (id.clone(), relative(handle)))
            .collect();
        let derived_params = report
            .blocks
            .derived_params
            .iter()
            .map(|(name, spec)| (name.clone(), spec.from.clone()))
            .collect();

        Manifest {
            report: report.id.clone(),
            base_parquet: output.base.relative(),
            materialize,
            literal_sources,
            bindings: output.bindings,
            client_params: resolved.client.clone(),
            derived_params,
            ttl_seconds: ttl.as_secs(),
            schema: output
                .schema
                .into_iter()
                .map(|(name, data_type)| SchemaColumn { name, data_type })
                .collect(),
        }
    }

    /// Values of the config constants a report references, validated
    /// against its CONFIG declarations.
    fn config_values_for(&self, report: &Report) -> CoreResult<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for name in report.blocks.config.keys() {
            let value = self.config.constant(name).ok_or_else(|| {
                CoreError::ConfigInvalid {
                    detail: format!(
                        "report '{}' requires constant '{}' missing from config.toml",
                        report.id, name
                    ),
                }
            })?;
            values.insert(name.clone(), value.to_string());
        }
        // InjectedPathStr params also resolve from config constants
        for param in &report.params {
            if *param.ty.unwrap_optional() == ds_report::types::ParamType::InjectedPathStr {
                if let Some(value) = self.config.constant(&param.name) {
                    values.insert(param.name.clone(), value.to_string());
                }
            }
        }
        // a secret placeholder must never appear where a config constant is
        // expected; cross-check while we are here
        debug_assert!(report
            .placeholders
            .iter()
            .filter(|s| s.kind == PlaceholderKind::Config)
            .all(|s| values.contains_key(&s.name)));
        Ok(values)
    }

    fn ttl_for(&self, report: &Report) -> Duration {
        let seconds = report
            .blocks
            .cache
            .as_ref()
            .and_then(|c| c.ttl_seconds)
            .unwrap_or(self.config.cache.ttl_seconds);
        Duration::from_secs(seconds)
    }
}

/// Filter parent query pairs down to an import's pass_params, keeping
/// routing prefixes and the global force flag.
fn select_import_params(
    raw: &[(String, String)],
    pass_params: &[String],
) -> Vec<(String, String)> {
    raw.iter()
        .filter(|(key, _)| {
            if key.eq_ignore_ascii_case("__force_server") {
                return true;
            }
            let stripped = key
                .strip_prefix("__client__")
                .or_else(|| key.strip_prefix("__server__"))
                .unwrap_or(key);
            pass_params
                .iter()
                .any(|p| p.eq_ignore_ascii_case(stripped))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
