//! Plan building: topological ordering plus deterministic fingerprints.
//!
//! Every plan node hashes the deployment id, the report source fingerprint,
//! its kind and name, the sorted fingerprints of its upstream nodes, and
//! the canonical bytes of every input it consumes. Parameters flow through
//! the graph: a node's fingerprint covers upstream parameters via upstream
//! fingerprints, so closed materializations are naturally frozen against
//! everything downstream of them.

use crate::params::{key_sql_references, ResolvedParams};
use ds_cache::kind::ArtifactKind;
use ds_core::error::{CoreError, CoreResult};
use ds_core::fingerprint::{Fingerprint, FingerprintBuilder};
use ds_report::blocks::BindingSpec;
use ds_report::placeholder::PlaceholderKind;
use ds_report::report::Report;
use ds_report::scan::{referenced_words, CteSpan, MaterializeKind};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap, HashSet};

/// What a plan node executes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Reuse of an imported report's base artifact; built by the child
    /// dispatch, carried here for ordering and fingerprint flow.
    Import,
    Materialize,
    Binding,
    LiteralSource,
    Base,
}

impl NodeKind {
    fn tag(&self) -> &'static str {
        match self {
            NodeKind::Import => "import",
            NodeKind::Materialize => "materialize",
            NodeKind::Binding => "binding",
            NodeKind::LiteralSource => "literal_source",
            NodeKind::Base => "base",
        }
    }

    /// Cache directory for artifacts this node publishes.
    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        match self {
            NodeKind::Import => None,
            NodeKind::Materialize => Some(ArtifactKind::Materialize),
            NodeKind::Binding => Some(ArtifactKind::Binding),
            NodeKind::LiteralSource => Some(ArtifactKind::LiteralSource),
            NodeKind::Base => Some(ArtifactKind::Base),
        }
    }
}

/// One node in execution order.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub kind: NodeKind,
    /// CTE name, binding id, import id, or "base"
    pub name: String,
    pub fingerprint: Fingerprint,
    pub upstream: Vec<Fingerprint>,
}

/// Ordered execution plan for one request.
#[derive(Debug, Clone)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
}

impl Plan {
    pub fn node(&self, kind: &NodeKind, name: &str) -> Option<&PlanNode> {
        self.nodes
            .iter()
            .find(|n| n.kind == *kind && n.name == name)
    }

    pub fn base(&self) -> &PlanNode {
        self.nodes
            .iter()
            .find(|n| n.kind == NodeKind::Base)
            .expect("every plan has a base node")
    }
}

/// Everything fingerprints may draw from.
pub struct PlanContext<'a> {
    pub report: &'a Report,
    pub resolved: &'a ResolvedParams,
    pub deployment_id: &'a str,
    /// Values of config constants referenced by the report
    pub config_values: &'a BTreeMap<String, String>,
    /// Import id → base fingerprint of the already-dispatched child
    pub import_fingerprints: &'a BTreeMap<String, Fingerprint>,
}

/// Build the topologically ordered plan.
pub fn build_plan(ctx: &PlanContext<'_>) -> CoreResult<Plan> {
    let report = ctx.report;

    let mut graph: DiGraph<(NodeKind, String), ()> = DiGraph::new();
    let mut index: HashMap<(NodeKind, String), NodeIndex> = HashMap::new();

    let mut add = |graph: &mut DiGraph<(NodeKind, String), ()>, kind: NodeKind, name: &str| {
        let key = (kind.clone(), name.to_string());
        if let Some(&idx) = index.get(&key) {
            idx
        } else {
            let idx = graph.add_node(key.clone());
            index.insert(key, idx);
            idx
        }
    };

    // stable insertion order: imports, materializations, bindings, literal
    // sources, base
    for import in &report.blocks.imports {
        add(&mut graph, NodeKind::Import, &import.id);
    }
    for cte in report.materialized_ctes() {
        add(&mut graph, NodeKind::Materialize, &cte.name);
    }
    for binding in &report.blocks.bindings {
        add(&mut graph, NodeKind::Binding, &binding.id);
    }
    for source in &report.blocks.literal_sources {
        add(&mut graph, NodeKind::LiteralSource, &source.id);
    }
    let base_idx = add(&mut graph, NodeKind::Base, "base");

    // edges: dependency -> dependent
    for cte in report.materialized_ctes() {
        let this = index[&(NodeKind::Materialize, cte.name.clone())];
        let (start, end) = cte.body_span;
        let words = referenced_words(&report.sql, start, end);

        for other in report.materialized_ctes() {
            if other.name != cte.name && words.contains(&other.name.to_ascii_lowercase()) {
                let dep = index[&(NodeKind::Materialize, other.name.clone())];
                graph.add_edge(dep, this, ());
            }
        }
        for span in report.placeholders_in(cte) {
            match span.kind {
                PlaceholderKind::Bind => {
                    let dep = index[&(NodeKind::Binding, span.name.clone())];
                    graph.add_edge(dep, this, ());
                }
                PlaceholderKind::Mat => {
                    let target = cte_name(report, &span.name)?;
                    if target != cte.name {
                        let dep = index[&(NodeKind::Materialize, target)];
                        graph.add_edge(dep, this, ());
                    }
                }
                PlaceholderKind::Import => {
                    let dep = index[&(NodeKind::Import, span.name.clone())];
                    graph.add_edge(dep, this, ());
                }
                _ => {}
            }
        }
        graph.add_edge(this, base_idx, ());
    }

    for binding in &report.blocks.bindings {
        let this = index[&(NodeKind::Binding, binding.id.clone())];
        let source = index[&(NodeKind::Materialize, source_cte_name(report, binding)?)];
        graph.add_edge(source, this, ());
        graph.add_edge(this, base_idx, ());
    }

    for source in &report.blocks.literal_sources {
        let this = index[&(NodeKind::LiteralSource, source.id.clone())];
        let from = index[&(NodeKind::Materialize, cte_name(report, &source.from_cte)?)];
        graph.add_edge(from, this, ());
    }

    for import in &report.blocks.imports {
        let this = index[&(NodeKind::Import, import.id.clone())];
        graph.add_edge(this, base_idx, ());
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let node = &graph[cycle.node_id()];
        CoreError::ImportCycle {
            cycle: cycle_path(&graph, cycle.node_id(), node),
        }
    })?;

    // fingerprints in dependency order
    let mut fingerprints: HashMap<(NodeKind, String), Fingerprint> = HashMap::new();
    let mut nodes = Vec::with_capacity(order.len());
    for idx in order {
        let (kind, name) = graph[idx].clone();
        let mut upstream: Vec<Fingerprint> = graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| {
                let dep = &graph[e.source()];
                fingerprints[dep]
            })
            .collect();
        upstream.sort();
        upstream.dedup();

        let fingerprint = match kind {
            NodeKind::Import => *ctx.import_fingerprints.get(&name).ok_or_else(|| {
                CoreError::UndeclaredName {
                    kind: "import".to_string(),
                    name: name.clone(),
                }
            })?,
            _ => fingerprint_for(ctx, &kind, &name, &upstream)?,
        };
        fingerprints.insert((kind.clone(), name.clone()), fingerprint);
        nodes.push(PlanNode {
            kind,
            name,
            fingerprint,
            upstream,
        });
    }

    Ok(Plan { nodes })
}

fn fingerprint_for(
    ctx: &PlanContext<'_>,
    kind: &NodeKind,
    name: &str,
    upstream: &[Fingerprint],
) -> CoreResult<Fingerprint> {
    let report = ctx.report;
    let mut builder = FingerprintBuilder::new(ctx.deployment_id)
        .source(report.source_fingerprint)
        .kind(kind.tag())
        .name(name);
    for fp in upstream {
        builder = builder.upstream(*fp);
    }

    let inputs: BTreeMap<String, Vec<u8>> = match kind {
        NodeKind::Materialize => {
            let cte = report
                .cte(name)
                .expect("plan nodes reference scanned CTEs");
            materialize_inputs(ctx, cte)
        }
        NodeKind::Binding => {
            let binding = report
                .blocks
                .binding(name)
                .expect("plan nodes reference declared bindings");
            binding_inputs(ctx, binding)
        }
        NodeKind::LiteralSource => BTreeMap::new(),
        NodeKind::Base => base_inputs(ctx),
        NodeKind::Import => unreachable!("import fingerprints come from the child dispatch"),
    };
    for (input_name, bytes) in inputs {
        builder = builder.input(&input_name, bytes);
    }
    Ok(builder.finish())
}

/// Parameters and config constants feeding one materialization.
///
/// Open materializations take direct references plus `applies_to`
/// attachments; closed ones are frozen to direct references only.
fn materialize_inputs(ctx: &PlanContext<'_>, cte: &CteSpan) -> BTreeMap<String, Vec<u8>> {
    let report = ctx.report;
    let mut inputs = BTreeMap::new();

    for span in report.placeholders_in(cte) {
        collect_span_input(ctx, span.kind, &span.name, &mut inputs);
    }

    if cte.materialize == Some(MaterializeKind::Open) {
        for param in &report.params {
            let Some(applies_to) = &param.applies_to else {
                continue;
            };
            if applies_to.cte.eq_ignore_ascii_case(&cte.name) {
                if let Some(value) = ctx.resolved.server.get(&param.name) {
                    inputs.insert(format!("param:{}", param.name), value.canonical_bytes());
                }
            }
        }
    }

    inputs
}

fn binding_inputs(ctx: &PlanContext<'_>, binding: &BindingSpec) -> BTreeMap<String, Vec<u8>> {
    let mut inputs = BTreeMap::new();
    if let Some(key_param) = &binding.key_param {
        if let Some(param) = ctx.report.param_ci(key_param) {
            if let Some(value) = ctx.resolved.server.get(&param.name) {
                inputs.insert(format!("param:{}", param.name), value.canonical_bytes());
            }
        }
    }
    if let Some(key_sql) = &binding.key_sql {
        inputs.insert("key_sql".to_string(), key_sql.as_bytes().to_vec());
        for param in &ctx.report.params {
            if key_sql_references(key_sql, &param.name) {
                if let Some(value) = ctx.resolved.server.get(&param.name) {
                    inputs.insert(format!("param:{}", param.name), value.canonical_bytes());
                }
            }
        }
    }
    inputs
}

/// The base covers every server-applied parameter and every referenced
/// config constant; upstream fingerprints cover the rest.
fn base_inputs(ctx: &PlanContext<'_>) -> BTreeMap<String, Vec<u8>> {
    let mut inputs = BTreeMap::new();
    for (name, value) in &ctx.resolved.server {
        inputs.insert(format!("param:{name}"), value.canonical_bytes());
    }
    for span in &ctx.report.placeholders {
        if span.kind == PlaceholderKind::Config {
            if let Some(value) = ctx.config_values.get(&span.name) {
                inputs.insert(format!("config:{}", span.name), value.as_bytes().to_vec());
            }
        }
    }
    inputs
}

fn collect_span_input(
    ctx: &PlanContext<'_>,
    kind: PlaceholderKind,
    name: &str,
    inputs: &mut BTreeMap<String, Vec<u8>>,
) {
    match kind {
        PlaceholderKind::Param | PlaceholderKind::Ident | PlaceholderKind::Path => {
            if let Some(param) = ctx.report.param_ci(name) {
                if let Some(value) = ctx.resolved.server.get(&param.name) {
                    inputs.insert(format!("param:{}", param.name), value.canonical_bytes());
                }
            }
            if let Some(value) = ctx.config_values.get(name) {
                inputs.insert(format!("config:{name}"), value.as_bytes().to_vec());
            }
        }
        PlaceholderKind::Config => {
            if let Some(value) = ctx.config_values.get(name) {
                inputs.insert(format!("config:{name}"), value.as_bytes().to_vec());
            }
        }
        // secrets fingerprint by reference name only; the name is part of
        // the report source, never the value
        PlaceholderKind::Secret => {}
        // upstream fingerprints cover these
        PlaceholderKind::Bind | PlaceholderKind::Mat | PlaceholderKind::Import => {}
    }
}

fn source_cte_name(report: &Report, binding: &BindingSpec) -> CoreResult<String> {
    cte_name(report, &binding.source)
}

fn cte_name(report: &Report, reference: &str) -> CoreResult<String> {
    report
        .cte(reference)
        .map(|c| c.name.clone())
        .ok_or_else(|| CoreError::UndeclaredName {
            kind: "cte".to_string(),
            name: reference.to_string(),
        })
}

fn cycle_path(
    graph: &DiGraph<(NodeKind, String), ()>,
    start: NodeIndex,
    start_node: &(NodeKind, String),
) -> String {
    let mut path = vec![format!("{}:{}", start_node.0.tag(), start_node.1)];
    let mut current = start;
    let mut visited = HashSet::new();
    visited.insert(current);

    while let Some(edge) = graph.edges(current).next() {
        let target = edge.target();
        let (kind, name) = &graph[target];
        path.push(format!("{}:{}", kind.tag(), name));
        if target == start || visited.contains(&target) {
            break;
        }
        visited.insert(target);
        current = target;
    }
    path.join(" -> ")
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
