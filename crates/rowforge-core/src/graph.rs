use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;

/// Summary of the table dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOrderSummary {
    pub nodes: usize,
    pub edges: usize,
}

/// Load order for generated tables: referenced tables come first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOrderReport {
    pub summary: LoadOrderSummary,
    pub topo_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

/// Build a deterministic load order from captured field dependencies.
///
/// `tables` lists tables that should appear even when nothing references them.
pub fn build_load_order_report<'a>(
    dependencies: impl IntoIterator<Item = &'a Dependency>,
    tables: impl IntoIterator<Item = &'a str>,
) -> LoadOrderReport {
    let graph = build_adjacency(dependencies, tables);
    let nodes = graph.len();
    let edges = graph.values().map(|targets| targets.len()).sum();
    let summary = LoadOrderSummary { nodes, edges };

    match toposort(&graph) {
        Ok(order) => LoadOrderReport {
            summary,
            topo_order: Some(order),
            cycle: None,
        },
        Err(cycle) => LoadOrderReport {
            summary,
            topo_order: None,
            cycle: Some(cycle),
        },
    }
}

fn build_adjacency<'a>(
    dependencies: impl IntoIterator<Item = &'a Dependency>,
    tables: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for table in tables {
        graph.entry(table.to_string()).or_default();
    }

    for dependency in dependencies {
        graph.entry(dependency.table_name_from.clone()).or_default();
        graph
            .entry(dependency.table_name_to.clone())
            .or_default()
            .insert(dependency.table_name_from.clone());
    }

    graph
}

fn toposort(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>, Vec<String>> {
    let mut indegree: BTreeMap<String, usize> =
        graph.keys().map(|node| (node.clone(), 0)).collect();

    for targets in graph.values() {
        for target in targets {
            *indegree.entry(target.clone()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<String> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| node.clone())
        .collect();

    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = ready.pop_first() {
        if let Some(targets) = graph.get(&node) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(target.clone());
                    }
                }
            }
        }
        order.push(node);
    }

    if order.len() == graph.len() {
        Ok(order)
    } else {
        Err(indegree
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(node, _)| node)
            .collect())
    }
}
