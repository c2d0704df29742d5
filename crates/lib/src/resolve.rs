//! Build ordering over package configs.
//!
//! [`DependencyResolver`] builds a graph with one node per package name and
//! an edge `package -> dependency` for every `DependsOn` entry, rejects
//! cycles, and orders configs so every dependency is built before the
//! packages using it. Iteration is always in sorted name order, so the same
//! context yields the same order on every run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::context::{ContextError, ContextManager};

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("circular dependency detected - {}", .0.join(" -> "))]
  CircularDependency(Vec<String>),

  #[error(transparent)]
  Context(#[from] ContextError),
}

/// Which packages of the context to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSelection {
  All,
  /// One package, every build type, no dependencies.
  Package(String),
  /// One package and its whole dependency closure.
  WithDeps(String),
  /// The packages depending on one package, each with its own dependency
  /// closure. The package itself is only included when `with_deps` is set,
  /// together with its own closure.
  DependsOn {
    name: String,
    recursive: bool,
    with_deps: bool,
  },
}

impl BuildSelection {
  pub fn package_name(&self) -> Option<&str> {
    match self {
      BuildSelection::All => None,
      BuildSelection::Package(name) | BuildSelection::WithDeps(name) => Some(name.as_str()),
      BuildSelection::DependsOn { name, .. } => Some(name.as_str()),
    }
  }
}

pub struct DependencyResolver {
  configs: BTreeMap<String, Vec<Config>>,
  graph: DiGraph<String, ()>,
  nodes: BTreeMap<String, NodeIndex>,
}

impl DependencyResolver {
  /// Group `configs` by package name and build the dependency graph.
  pub fn new(configs: impl IntoIterator<Item = Config>) -> Self {
    let mut by_name: BTreeMap<String, Vec<Config>> = BTreeMap::new();
    for config in configs {
      by_name.entry(config.package.name.clone()).or_default().push(config);
    }

    let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (name, configs) in &by_name {
      let deps = edges.entry(name.as_str()).or_default();
      deps.extend(configs.iter().flat_map(|c| c.depends_on.iter().map(String::as_str)));
    }

    let mut graph = DiGraph::new();
    let mut nodes = BTreeMap::new();
    let names: BTreeSet<&str> = edges
      .iter()
      .flat_map(|(name, deps)| std::iter::once(*name).chain(deps.iter().copied()))
      .collect();
    for name in names {
      nodes.insert(name.to_string(), graph.add_node(name.to_string()));
    }
    for (name, deps) in &edges {
      for dep in deps {
        graph.add_edge(nodes[*name], nodes[*dep], ());
      }
    }

    Self {
      configs: by_name,
      graph,
      nodes,
    }
  }

  /// Resolve the configs at `paths`. Configs that fail to load are logged
  /// and skipped.
  pub fn from_paths(paths: &[PathBuf]) -> Self {
    let configs = paths.iter().filter_map(|path| match Config::load(path) {
      Ok(config) => Some(config),
      Err(e) => {
        error!(path = %path.display(), error = %e, "couldn't load JSON config");
        None
      }
    });
    Self::new(configs)
  }

  fn name(&self, index: NodeIndex) -> &str {
    &self.graph[index]
  }

  /// Dependencies of `index` in name order.
  fn dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
    let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(index, Direction::Outgoing).collect();
    deps.sort_by(|a, b| self.name(*a).cmp(self.name(*b)));
    deps
  }

  fn find_cycle(
    &self,
    index: NodeIndex,
    stack: &mut Vec<NodeIndex>,
    finished: &mut BTreeSet<NodeIndex>,
  ) -> Option<Vec<String>> {
    stack.push(index);
    for dep in self.dependencies(index) {
      if stack.contains(&dep) {
        let mut path: Vec<String> = stack.iter().map(|i| self.name(*i).to_string()).collect();
        path.push(self.name(dep).to_string());
        return Some(path);
      }
      if finished.contains(&dep) {
        continue;
      }
      if let Some(path) = self.find_cycle(dep, stack, finished) {
        return Some(path);
      }
    }
    stack.pop();
    finished.insert(index);
    None
  }

  /// Fail with the first cycle found, rendered from the package where the
  /// walk started.
  pub fn check_cycles(&self) -> Result<(), ResolveError> {
    if !is_cyclic_directed(&self.graph) {
      return Ok(());
    }
    let mut finished = BTreeSet::new();
    for index in self.nodes.values() {
      let mut stack = Vec::new();
      if let Some(path) = self.find_cycle(*index, &mut stack, &mut finished) {
        return Err(ResolveError::CircularDependency(path));
      }
    }
    Ok(())
  }

  /// Packages no other package depends on, in name order.
  pub fn roots(&self) -> Vec<&str> {
    self
      .nodes
      .iter()
      .filter(|(name, index)| {
        self.configs.contains_key(name.as_str())
          && self.graph.neighbors_directed(**index, Direction::Incoming).next().is_none()
      })
      .map(|(name, _)| name.as_str())
      .collect()
  }

  /// Depth-first post-order: every dependency of `index` lands in `out`
  /// before `index` itself. Later siblings are walked first.
  fn post_order(&self, index: NodeIndex, visited: &mut BTreeSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    if !visited.insert(index) {
      return;
    }
    for dep in self.dependencies(index).into_iter().rev() {
      self.post_order(dep, visited, out);
    }
    out.push(index);
  }

  /// Every config in build order: dependencies first, each
  /// `(name, is_debug)` pair once.
  pub fn build_order(&self) -> Result<Vec<Config>, ResolveError> {
    self.check_cycles()?;

    let mut visited = BTreeSet::new();
    let mut emitted = Vec::new();
    for root in self.roots().into_iter().rev() {
      self.post_order(self.nodes[root], &mut visited, &mut emitted);
    }

    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();
    for index in emitted {
      let Some(configs) = self.configs.get(self.name(index)) else {
        continue;
      };
      for config in configs {
        if seen.insert((config.package.name.clone(), config.package.is_debug)) {
          ordered.push(config.clone());
        }
      }
    }
    debug!(
      order = ?ordered.iter().map(|c| c.package.name.as_str()).collect::<Vec<_>>(),
      "build order resolved"
    );
    Ok(ordered)
  }
}

/// Ordered configs for `selection`.
///
/// [`BuildSelection::Package`] keeps the package's configs in file order
/// without dependency resolution. The other selections are ordered by
/// [`DependencyResolver::build_order`].
pub fn select(context: &ContextManager, selection: &BuildSelection) -> Result<Vec<Config>, ResolveError> {
  let paths = match selection {
    BuildSelection::All => context.all_package_json_paths()?.into_values().flatten().collect(),
    BuildSelection::Package(name) => {
      let mut configs = Vec::new();
      for path in context.package_json_paths(name)? {
        match Config::load(&path) {
          Ok(config) => configs.push(config),
          Err(e) => error!(path = %path.display(), error = %e, "couldn't load JSON config"),
        }
      }
      return Ok(configs);
    }
    BuildSelection::WithDeps(name) => context.package_with_deps_json_paths(name)?,
    BuildSelection::DependsOn {
      name,
      recursive,
      with_deps,
    } => {
      let mut paths = if *with_deps {
        context.package_with_deps_json_paths(name)?
      } else {
        Vec::new()
      };
      for path in context.depends_on_json_paths(name, *recursive)? {
        if !paths.contains(&path) {
          paths.push(path);
        }
      }
      paths
    }
  };
  DependencyResolver::from_paths(&paths).build_order()
}
