use crate::error::{GraphError, Result};
use crate::registry::{Registry, Task};
use crate::types::TaskName;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Ordered partition of a dependency closure into waves.
///
/// Every task in wave `n` depends only on tasks in waves `< n`; tasks
/// inside a wave are ordered by registration. Task definitions are
/// snapshotted at resolution time so executing a plan never touches the
/// registry again.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    requested: Vec<TaskName>,
    waves: Vec<Vec<TaskName>>,
    tasks: HashMap<TaskName, Arc<Task>>,
    wave_index: HashMap<TaskName, usize>,
}

impl ExecutionPlan {
    pub fn requested(&self) -> &[TaskName] {
        &self.requested
    }

    pub fn waves(&self) -> &[Vec<TaskName>] {
        &self.waves
    }

    /// All tasks, wave by wave
    pub fn order(&self) -> impl Iterator<Item = &TaskName> + Clone {
        self.waves.iter().flatten()
    }

    pub fn task(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.wave_index.get(name).copied()
    }

    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.tasks
            .get(name)
            .map(|task| task.dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Number of tasks in the plan
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Resolve the requested tasks and their transitive dependencies into an
/// [`ExecutionPlan`].
///
/// # Errors
/// - `UnknownTask` if a requested name is not registered
/// - `UnresolvedDependency` naming the referencing task and the missing one
/// - `CyclicDependency` with one concrete cycle, e.g. `[x, y, x]` for
///   `x` depending on `y` depending on `x`
pub fn resolve<S: AsRef<str>>(registry: &Registry, requested: &[S]) -> Result<ExecutionPlan> {
    let mut roots = Vec::with_capacity(requested.len());
    for name in requested {
        let task = registry.get(name.as_ref())?;
        if !roots.contains(&task.name) {
            roots.push(task.name.clone());
        }
    }

    let closure = dependency_closure(registry, &roots)?;

    // Nodes are added in registration order, so node indices double as the tie-break
    let mut ordered: Vec<&Task> = closure;
    ordered.sort_by_key(|task| registry.position(task.name.as_str()));

    let mut graph: DiGraph<&Task, ()> = DiGraph::with_capacity(ordered.len(), 0);
    let mut nodes: HashMap<&TaskName, NodeIndex> = HashMap::with_capacity(ordered.len());
    for task in &ordered {
        nodes.insert(&task.name, graph.add_node(*task));
    }

    // Edge from dependency to dependent (dep -> task)
    for task in &ordered {
        let to = nodes[&task.name];
        for dep in &task.dependencies {
            graph.add_edge(nodes[dep], to, ());
        }
    }

    let layers = layer(&graph);
    let placed: usize = layers.iter().map(Vec::len).sum();
    if placed < graph.node_count() {
        let cycle = find_cycle(&graph)
            .into_iter()
            .map(|node| graph[node].name.clone())
            .collect();
        return Err(GraphError::CyclicDependency { cycle });
    }

    let mut waves = Vec::with_capacity(layers.len());
    let mut tasks = HashMap::with_capacity(placed);
    let mut wave_index = HashMap::with_capacity(placed);
    for (index, layer) in layers.into_iter().enumerate() {
        let wave: Vec<TaskName> = layer
            .into_iter()
            .map(|node| {
                let task = graph[node];
                tasks.insert(task.name.clone(), Arc::new(task.clone()));
                wave_index.insert(task.name.clone(), index);
                task.name.clone()
            })
            .collect();
        waves.push(wave);
    }

    tracing::debug!(
        "Resolved {} requested tasks into {} tasks across {} waves",
        roots.len(),
        tasks.len(),
        waves.len()
    );

    Ok(ExecutionPlan {
        requested: roots,
        waves,
        tasks,
        wave_index,
    })
}

/// Collect every task reachable from `roots` through dependency edges.
fn dependency_closure<'r>(registry: &'r Registry, roots: &[TaskName]) -> Result<Vec<&'r Task>> {
    let mut seen: HashSet<&TaskName> = HashSet::new();
    let mut closure = Vec::new();
    let mut stack: Vec<&Task> = Vec::new();

    for root in roots.iter().rev() {
        stack.push(registry.get(root.as_str())?);
    }

    while let Some(task) = stack.pop() {
        if !seen.insert(&task.name) {
            continue;
        }
        closure.push(task);

        for dep in task.dependencies.iter().rev() {
            let dep_task =
                registry
                    .get(dep.as_str())
                    .map_err(|_| GraphError::UnresolvedDependency {
                        task: task.name.clone(),
                        missing: dep.clone(),
                    })?;
            if !seen.contains(&dep_task.name) {
                stack.push(dep_task);
            }
        }
    }

    Ok(closure)
}

/// Kahn's algorithm, keeping each round of zero in-degree nodes together.
///
/// Returns fewer nodes than the graph holds when a cycle blocks progress.
fn layer(graph: &DiGraph<&Task, ()>) -> Vec<Vec<NodeIndex>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut current: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .collect();

    let mut layers = Vec::new();
    while !current.is_empty() {
        let mut next = Vec::new();
        for &node in &current {
            for dependent in graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort();
        layers.push(std::mem::replace(&mut current, next));
    }

    layers
}

/// Find one concrete cycle, reported in dependency direction and closed
/// (first element repeated at the end).
///
/// Picks the strongly connected component holding the earliest-registered
/// node that sits on a cycle, then walks dependency edges breadth-first
/// from that node until it is reached again.
fn find_cycle(graph: &DiGraph<&Task, ()>) -> Vec<NodeIndex> {
    let component = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| {
            scc.len() > 1 || scc.iter().any(|&n| graph.find_edge(n, n).is_some())
        })
        .min_by_key(|scc| scc.iter().min().copied());

    let Some(component) = component else {
        return Vec::new();
    };

    let members: HashSet<NodeIndex> = component.iter().copied().collect();
    let start = component.iter().min().copied().unwrap_or(component[0]);

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        let mut deps: Vec<NodeIndex> = graph
            .neighbors_directed(node, Direction::Incoming)
            .filter(|n| members.contains(n))
            .collect();
        deps.sort();
        deps.dedup();

        for dep in deps {
            if dep == start {
                let mut path = vec![node];
                let mut cursor = node;
                while cursor != start {
                    cursor = parent[&cursor];
                    path.push(cursor);
                }
                path.reverse();
                path.push(start);
                return path;
            }
            if let std::collections::hash_map::Entry::Vacant(slot) = parent.entry(dep) {
                slot.insert(node);
                queue.push_back(dep);
            }
        }
    }

    vec![start, start]
}
