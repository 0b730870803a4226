use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::DependencyCycleError;
use crate::workload::Workload;

/// Dependency graph over workloads.
///
/// Edges point from a dependency to its dependents, so a node's downstream
/// set is everything that must wait for it. Sorted maps keep every traversal
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  /// Adjacency list: workload_id -> dependents.
  adjacency: BTreeMap<String, BTreeSet<String>>,
  /// Reverse adjacency: workload_id -> dependencies.
  reverse_adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
  /// Build a graph from node ids and `(dependency, dependent)` edges.
  ///
  /// Edges whose endpoints are not in `nodes` are ignored.
  pub fn new<I, S>(nodes: I, edges: &[(String, String)]) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut reverse_adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for node_id in nodes {
      let node_id = node_id.into();
      adjacency.entry(node_id.clone()).or_default();
      reverse_adjacency.entry(node_id).or_default();
    }

    for (from, to) in edges {
      if !adjacency.contains_key(from) || !adjacency.contains_key(to) {
        continue;
      }
      adjacency.entry(from.clone()).or_default().insert(to.clone());
      reverse_adjacency
        .entry(to.clone())
        .or_default()
        .insert(from.clone());
    }

    Self {
      adjacency,
      reverse_adjacency,
    }
  }

  /// Build the graph of a workload inventory.
  pub fn from_workloads<'a>(workloads: impl IntoIterator<Item = &'a Workload>) -> Self {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for workload in workloads {
      nodes.push(workload.workload_id.clone());
      for dependency in &workload.dependencies {
        edges.push((dependency.clone(), workload.workload_id.clone()));
      }
    }
    Self::new(nodes, &edges)
  }

  pub fn len(&self) -> usize {
    self.adjacency.len()
  }

  pub fn is_empty(&self) -> bool {
    self.adjacency.is_empty()
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.adjacency.contains_key(node_id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &str> {
    self.adjacency.keys().map(String::as_str)
  }

  /// Workloads that depend directly on `node_id`.
  pub fn downstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .adjacency
      .get(node_id)
      .into_iter()
      .flatten()
      .map(String::as_str)
  }

  /// Direct dependencies of `node_id`.
  pub fn upstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .reverse_adjacency
      .get(node_id)
      .into_iter()
      .flatten()
      .map(String::as_str)
  }

  /// Induced subgraph over `keep`; edges leaving the set are dropped.
  pub fn subgraph(&self, keep: &BTreeSet<String>) -> Graph {
    let edges: Vec<(String, String)> = self
      .adjacency
      .iter()
      .filter(|(from, _)| keep.contains(*from))
      .flat_map(|(from, tos)| {
        tos
          .iter()
          .filter(|to| keep.contains(*to))
          .map(move |to| (from.clone(), to.clone()))
      })
      .collect();

    Graph::new(
      self.adjacency.keys().filter(|id| keep.contains(*id)).cloned(),
      &edges,
    )
  }

  /// Kahn layering: each layer holds the nodes whose dependencies all sit in
  /// earlier layers. Layers are sorted by id.
  pub fn layers(&self) -> Result<Vec<Vec<String>>, DependencyCycleError> {
    let mut in_degree: BTreeMap<&str, usize> = self
      .reverse_adjacency
      .iter()
      .map(|(id, upstream)| (id.as_str(), upstream.len()))
      .collect();

    let mut current: Vec<&str> = in_degree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(id, _)| *id)
      .collect();

    let mut layers = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
      placed += current.len();
      let mut next = BTreeSet::new();

      for id in &current {
        for dependent in self.downstream(id) {
          if let Some(degree) = in_degree.get_mut(dependent) {
            *degree -= 1;
            if *degree == 0 {
              next.insert(dependent);
            }
          }
        }
      }

      layers.push(current.iter().map(|id| id.to_string()).collect());
      current = next.into_iter().collect();
    }

    if placed < self.len() {
      let remaining = in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(id, _)| id.to_string())
        .collect();
      return Err(DependencyCycleError { remaining });
    }

    Ok(layers)
  }

  /// Every node after all of its dependencies, ties broken by id.
  pub fn topological_order(&self) -> Result<Vec<String>, DependencyCycleError> {
    Ok(self.layers()?.into_iter().flatten().collect())
  }

  /// Transitive dependents of `roots`, not including the roots themselves
  /// unless one depends on another.
  pub fn dependents_closure<'a>(
    &self,
    roots: impl IntoIterator<Item = &'a str>,
  ) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = roots.into_iter().collect();

    while let Some(id) = queue.pop_front() {
      for dependent in self.downstream(id) {
        if seen.insert(dependent.to_string()) {
          queue.push_back(dependent);
        }
      }
    }

    seen
  }
}
