use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::StackError;

/// Dependency graph over logical ids.
///
/// Edges run from a dependency to its dependent (`upstream -> downstream`), so
/// entry points are the resources that depend on nothing. Ordered maps keep
/// every traversal deterministic for a given template.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: logical_id -> resources that depend on it.
  adjacency: BTreeMap<String, BTreeSet<String>>,
  /// Reverse adjacency: logical_id -> resources it depends on.
  reverse_adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
  /// Build a graph from node ids and `(dependency, dependent)` edges.
  ///
  /// Edges that mention unknown nodes are ignored; callers validate
  /// references before building the graph.
  pub fn new<'a>(
    node_ids: impl IntoIterator<Item = &'a str>,
    edges: &[(String, String)],
  ) -> Self {
    let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut reverse_adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for node_id in node_ids {
      adjacency.entry(node_id.to_string()).or_default();
      reverse_adjacency.entry(node_id.to_string()).or_default();
    }

    for (from, to) in edges {
      if !adjacency.contains_key(from) || !adjacency.contains_key(to) || from == to {
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

  pub fn len(&self) -> usize {
    self.adjacency.len()
  }

  pub fn is_empty(&self) -> bool {
    self.adjacency.is_empty()
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.adjacency.contains_key(node_id)
  }

  /// Nodes with no dependencies.
  pub fn entry_points(&self) -> Vec<&str> {
    self
      .reverse_adjacency
      .iter()
      .filter(|(_, upstream)| upstream.is_empty())
      .map(|(id, _)| id.as_str())
      .collect()
  }

  /// Resources that depend directly on `node_id`.
  pub fn downstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .adjacency
      .get(node_id)
      .into_iter()
      .flat_map(|set| set.iter().map(String::as_str))
  }

  /// Resources `node_id` depends on directly.
  pub fn upstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .reverse_adjacency
      .get(node_id)
      .into_iter()
      .flat_map(|set| set.iter().map(String::as_str))
  }

  /// Every resource that transitively depends on `node_id`.
  pub fn dependents(&self, node_id: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = self.downstream(node_id).collect();
    while let Some(next) = queue.pop_front() {
      if seen.insert(next.to_string()) {
        queue.extend(self.downstream(next));
      }
    }
    seen
  }

  /// Group nodes into batches; every node's dependencies sit in earlier batches.
  ///
  /// Nodes inside one batch are independent of each other and may be applied
  /// concurrently.
  pub fn batches(&self) -> Result<Vec<Vec<String>>, StackError> {
    let mut remaining: BTreeMap<&str, usize> = self
      .reverse_adjacency
      .iter()
      .map(|(id, upstream)| (id.as_str(), upstream.len()))
      .collect();

    let mut batches = Vec::new();
    let mut ready: Vec<&str> = remaining
      .iter()
      .filter(|(_, count)| **count == 0)
      .map(|(id, _)| *id)
      .collect();

    while !ready.is_empty() {
      for id in &ready {
        remaining.remove(id);
      }

      let mut next = BTreeSet::new();
      for id in &ready {
        for downstream in self.downstream(id) {
          if let Some(count) = remaining.get_mut(downstream) {
            *count -= 1;
            if *count == 0 {
              next.insert(downstream);
            }
          }
        }
      }

      batches.push(ready.iter().map(|id| id.to_string()).collect());
      ready = next.into_iter().collect();
    }

    if !remaining.is_empty() {
      return Err(StackError::CycleDetected);
    }

    Ok(batches)
  }

  /// All nodes, dependencies first.
  pub fn topological_order(&self) -> Result<Vec<String>, StackError> {
    Ok(self.batches()?.into_iter().flatten().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn edges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
      .iter()
      .map(|(a, b)| (a.to_string(), b.to_string()))
      .collect()
  }

  #[test]
  fn test_batches_follow_dependencies() {
    let graph = Graph::new(
      ["bucket", "oac", "dist", "policy", "user"],
      &edges(&[
        ("bucket", "dist"),
        ("oac", "dist"),
        ("bucket", "policy"),
        ("dist", "policy"),
      ]),
    );

    let batches = graph.batches().unwrap();
    assert_eq!(
      batches,
      vec![
        vec!["bucket".to_string(), "oac".to_string(), "user".to_string()],
        vec!["dist".to_string()],
        vec!["policy".to_string()],
      ]
    );
  }

  #[test]
  fn test_cycle_is_rejected() {
    let graph = Graph::new(["a", "b", "c"], &edges(&[("a", "b"), ("b", "c"), ("c", "a")]));
    assert!(matches!(graph.batches(), Err(StackError::CycleDetected)));
  }

  #[test]
  fn test_dependents_are_transitive() {
    let graph = Graph::new(["a", "b", "c", "d"], &edges(&[("a", "b"), ("b", "c")]));
    let deps = graph.dependents("a");
    assert!(deps.contains("b"));
    assert!(deps.contains("c"));
    assert!(!deps.contains("d"));
  }

  #[test]
  fn test_entry_points_and_neighbours() {
    let graph = Graph::new(["a", "b"], &edges(&[("a", "b")]));
    assert_eq!(graph.entry_points(), vec!["a"]);
    assert_eq!(graph.upstream("b").collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(graph.downstream("a").collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(graph.upstream("missing").count(), 0);
  }

  #[test]
  fn test_unknown_edges_are_ignored() {
    let graph = Graph::new(["a"], &edges(&[("a", "ghost")]));
    assert_eq!(graph.topological_order().unwrap(), vec!["a".to_string()]);
  }
}
