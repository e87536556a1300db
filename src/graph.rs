//! Static task graph construction.
//!
//! Given a [`Flow`], the builder walks providers transitively — depth-first,
//! memoized on entity name — to derive every entity's key space and task
//! list, then instantiates one [`TaskState`] node per distinct task and
//! wires the dependency edges. The resulting graph is immutable except for
//! task completion, which the resolver records in the node weights.
//!
//! Task states reference each other purely by [`NodeIndex`]; the graph owns
//! every node.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ResolverError;
use crate::flow::Flow;
use crate::key::{KeySpace, TaskKey};
use crate::provider::{DepKeySpaces, DepTaskKeys};
use crate::query::EntityResult;
use crate::task::Task;

/// A graph node wrapping one task and tracking its completion.
///
/// A state is complete iff `results_by_name` is populated; it is blocked iff
/// any of its parents (incoming neighbors) is not complete.
#[derive(Debug)]
pub(crate) struct TaskState {
    pub task: Task,
    pub results_by_name: Option<BTreeMap<String, EntityResult>>,
}

impl TaskState {
    fn new(task: Task) -> Self {
        Self {
            task,
            results_by_name: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.results_by_name.is_some()
    }
}

#[derive(Debug)]
pub(crate) struct TaskGraph {
    pub graph: DiGraph<TaskState, ()>,
    pub states_by_key: HashMap<TaskKey, NodeIndex>,
    pub key_spaces_by_name: BTreeMap<String, KeySpace>,
    pub task_lists_by_name: BTreeMap<String, Vec<Task>>,
}

impl TaskGraph {
    pub fn build(flow: &Flow) -> Result<Self, ResolverError> {
        let mut key_spaces = BTreeMap::new();
        let mut task_lists = BTreeMap::new();

        let mut visiting = Vec::new();
        for name in flow.names() {
            populate_entity_info(flow, name, &mut key_spaces, &mut task_lists, &mut visiting)?;
        }

        // One state per distinct task; every key of a joint task maps to the
        // same node.
        let mut graph = DiGraph::new();
        let mut states_by_key: HashMap<TaskKey, NodeIndex> = HashMap::new();
        for tasks in task_lists.values() {
            for task in tasks {
                if states_by_key.contains_key(&task.keys[0]) {
                    continue;
                }
                let index = graph.add_node(TaskState::new(task.clone()));
                for key in &task.keys {
                    states_by_key.insert(key.clone(), index);
                }
            }
        }

        // Wire parent/child edges, once per distinct state.
        let mut wired = HashSet::new();
        for tasks in task_lists.values() {
            for task in tasks {
                let index = match states_by_key.get(&task.keys[0]) {
                    Some(&index) => index,
                    None => continue,
                };
                if !wired.insert(index) {
                    continue;
                }
                for dep_key in &task.dep_keys {
                    let dep = states_by_key.get(dep_key).copied().ok_or_else(|| {
                        ResolverError::Internal(format!(
                            "dependency task key `{dep_key}` has no task state"
                        ))
                    })?;
                    if graph.find_edge(dep, index).is_none() {
                        graph.add_edge(dep, index, ());
                    }
                }
            }
        }

        Ok(Self {
            graph,
            states_by_key,
            key_spaces_by_name: key_spaces,
            task_lists_by_name: task_lists,
        })
    }

    pub fn is_blocked(&self, index: NodeIndex) -> bool {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .any(|parent| !self.graph[parent].is_complete())
    }
}

/// Recursively derives the key space and task list of one entity, populating
/// dependencies first.
///
/// An entity re-entered before it is finalized means a provider transitively
/// requests itself; this fails fast rather than recursing forever.
fn populate_entity_info(
    flow: &Flow,
    entity_name: &str,
    key_spaces: &mut BTreeMap<String, KeySpace>,
    task_lists: &mut BTreeMap<String, Vec<Task>>,
    visiting: &mut Vec<String>,
) -> Result<(), ResolverError> {
    if task_lists.contains_key(entity_name) {
        return Ok(());
    }

    if let Some(position) = visiting.iter().position(|name| name == entity_name) {
        let mut chain = visiting[position..].to_vec();
        chain.push(entity_name.to_string());
        return Err(ResolverError::CycleDetected(chain.join(" -> ")));
    }

    visiting.push(entity_name.to_string());

    let provider = flow.get_provider(entity_name)?;
    let dep_names = provider.dependency_names();

    for dep_name in &dep_names {
        populate_entity_info(flow, dep_name, key_spaces, task_lists, visiting)?;
    }

    let dep_key_spaces: DepKeySpaces = dep_names
        .iter()
        .filter_map(|dep| Some((dep.clone(), key_spaces.get(dep)?.clone())))
        .collect();

    let dep_task_keys: DepTaskKeys = dep_names
        .iter()
        .filter_map(|dep| {
            let keys = task_lists
                .get(dep)?
                .iter()
                .filter_map(|task| task.key_for_entity(dep).cloned())
                .collect();
            Some((dep.clone(), keys))
        })
        .collect();

    let key_space = provider.key_space(&dep_key_spaces);
    let tasks = provider.tasks(&dep_key_spaces, &dep_task_keys);

    // A joint provider finalizes all of its co-produced entities at once,
    // sharing one key space and one task list.
    for name in &provider.attrs().names {
        key_spaces.insert(name.clone(), key_space.clone());
        task_lists.insert(name.clone(), tasks.clone());
    }

    visiting.pop();
    Ok(())
}
