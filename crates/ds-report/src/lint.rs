//! Root-wide static validation.
//!
//! Per-report checks run inside the parser; the linter adds the checks that
//! need a registry snapshot: import targets must resolve, and the import
//! graph must be acyclic. `ducksearch lint` walks the whole root and exits
//! non-zero on any finding.

use crate::registry::RegistrySnapshot;
use ds_core::error::CoreError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// One lint finding, attributable to a report.
#[derive(Debug, Clone)]
pub struct LintFinding {
    pub report: String,
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for LintFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: [{}] {}", self.report, self.code, self.message)
    }
}

/// Lint every report in a snapshot. Empty result means a clean root.
pub fn lint_snapshot(snapshot: &RegistrySnapshot) -> Vec<LintFinding> {
    let mut findings = Vec::new();

    for record in snapshot.records() {
        if let Err(err) = &record.parsed {
            findings.push(LintFinding {
                report: record.id.clone(),
                code: err.code(),
                message: err.to_string(),
            });
        }
    }

    findings.extend(lint_imports(snapshot));
    findings.sort_by(|a, b| a.report.cmp(&b.report).then(a.message.cmp(&b.message)));
    findings
}

/// Check import targets and reject cycles in the import graph.
fn lint_imports(snapshot: &RegistrySnapshot) -> Vec<LintFinding> {
    let mut findings = Vec::new();
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();

    let mut node_for = |graph: &mut DiGraph<String, ()>, id: &str| -> NodeIndex {
        if let Some(&idx) = nodes.get(id) {
            idx
        } else {
            let idx = graph.add_node(id.to_string());
            nodes.insert(id.to_string(), idx);
            idx
        }
    };

    for record in snapshot.records() {
        let Ok(report) = &record.parsed else {
            continue;
        };
        for import in &report.blocks.imports {
            let target = crate::report::canonical_report_id(&import.report);
            if snapshot.get(&target).is_none() {
                findings.push(LintFinding {
                    report: record.id.clone(),
                    code: "UndeclaredName",
                    message: format!(
                        "import '{}' targets unknown report '{}'",
                        import.id, target
                    ),
                });
                continue;
            }
            // edge target -> importer so toposort yields dependencies first
            let from = node_for(&mut graph, &target);
            let to = node_for(&mut graph, &record.id);
            graph.add_edge(from, to, ());
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        let cycle_str = find_cycle_path(&graph, cycle.node_id());
        let report = graph[cycle.node_id()].clone();
        let err = CoreError::ImportCycle { cycle: cycle_str };
        findings.push(LintFinding {
            report,
            code: err.code(),
            message: err.to_string(),
        });
    }

    findings
}

/// Follow edges from a node known to sit on a cycle, for error reporting.
fn find_cycle_path(graph: &DiGraph<String, ()>, start: NodeIndex) -> String {
    let mut path: Vec<String> = vec![graph[start].clone()];
    let mut current = start;
    let mut visited = std::collections::HashSet::new();
    visited.insert(current);

    while let Some(edge) = graph.edges(current).next() {
        let target = edge.target();
        path.push(graph[target].clone());
        if target == start || visited.contains(&target) {
            break;
        }
        visited.insert(target);
        current = target;
    }

    path.join(" -> ")
}

#[cfg(test)]
#[path = "lint_test.rs"]
mod tests;
