//! The work-list evaluation engine behind [`Resolver::resolve`].
//!
//! Resolution happens in two stages. Building the task graph makes the
//! resolver *bootstrap-ready*: it can evaluate any task that stays in
//! memory. Full readiness additionally requires the persistent cache, which
//! is itself obtained by resolving the internal `core__persistent_cache`
//! entity through the bootstrap path — the resolver stands up its own cache
//! infrastructure from entities of the same kind it serves. Tasks marked for
//! persistence are rejected below full readiness.
//!
//! Evaluation is single-threaded and synchronous: an explicit LIFO work list
//! of graph indices, plus a set of blocked task-key tuples, drives tasks in
//! topological order. Every task is computed at most once per resolver
//! lifetime; completed states are served from the in-memory result table.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::cache::{ArtifactCache, CACHE_ENTITY, CacheHandle};
use crate::core::Dynamic;
use crate::error::ResolverError;
use crate::export::{self, DagNode};
use crate::flow::Flow;
use crate::graph::TaskGraph;
use crate::key::{TaskKey, entity_is_internal};
use crate::provenance::Provenance;
use crate::query::{EntityResult, Query, ResultGroup};

pub struct Resolver {
    flow: Flow,
    graph: Option<TaskGraph>,
    cache: Option<Arc<dyn ArtifactCache>>,
}

impl Resolver {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            graph: None,
            cache: None,
        }
    }

    /// Makes sure this resolver is ready to [`resolve`](Self::resolve).
    /// Calling this is not necessary but allows errors to surface earlier.
    /// Idempotent.
    pub fn get_ready(&mut self) -> Result<(), ResolverError> {
        if self.cache.is_some() {
            return Ok(());
        }

        if self.graph.is_none() {
            self.graph = Some(TaskGraph::build(&self.flow)?);
        }

        let value = self.bootstrap_singleton(CACHE_ENTITY)?;
        let handle = value.downcast_ref::<CacheHandle>().ok_or_else(|| {
            ResolverError::Internal(format!(
                "bootstrap entity `{CACHE_ENTITY}` did not produce a cache handle"
            ))
        })?;
        self.cache = Some(handle.0.clone());

        Ok(())
    }

    /// Computes and returns all results for the entity across its key space.
    ///
    /// Results are memoized for the lifetime of the resolver; a second call
    /// returns the same values without recomputing anything.
    pub fn resolve(&mut self, entity_name: &str) -> Result<ResultGroup, ResolverError> {
        self.get_ready()?;
        self.compute_result_group(entity_name)
    }

    /// A labeled node/edge representation of the task DAG, suitable for
    /// external visualization. Internal entities are hidden unless
    /// `include_core` is set.
    pub fn export_dag(&mut self, include_core: bool) -> Result<DiGraph<DagNode, ()>, ResolverError> {
        self.get_ready()?;
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| ResolverError::Internal("resolver ready without a graph".into()))?;
        Ok(export::export_dag(graph, include_core))
    }

    /// True iff the name denotes one of the resolver's own bootstrap
    /// entities.
    pub fn entity_is_internal(&self, entity_name: &str) -> bool {
        entity_is_internal(entity_name)
    }

    /// Resolves an internal entity through the bootstrap path; its key space
    /// must produce exactly one value.
    fn bootstrap_singleton(&mut self, entity_name: &str) -> Result<Dynamic, ResolverError> {
        let group = self.compute_result_group(entity_name)?;
        let count = group.len();
        let mut results = group.results;

        if count != 1 {
            return Err(ResolverError::BootstrapCardinality {
                name: entity_name.to_string(),
                count,
            });
        }

        Ok(results.remove(0).value)
    }

    fn compute_result_group(&mut self, entity_name: &str) -> Result<ResultGroup, ResolverError> {
        let Self { flow, graph, cache } = self;
        let full_ready = cache.is_some();
        let cache = cache.clone();
        let graph = graph
            .as_mut()
            .ok_or_else(|| ResolverError::Internal("resolution before graph construction".into()))?;

        let tasks = graph
            .task_lists_by_name
            .get(entity_name)
            .cloned()
            .ok_or_else(|| ResolverError::UndefinedEntity(entity_name.to_string()))?;

        let requested: Vec<NodeIndex> = tasks
            .iter()
            .map(|task| {
                graph.states_by_key.get(&task.keys[0]).copied().ok_or_else(|| {
                    ResolverError::Internal(format!("task `{}` has no state", task.keys[0]))
                })
            })
            .collect::<Result<_, _>>()?;

        let mut ready: Vec<NodeIndex> = requested.clone();
        let mut blocked: HashSet<Vec<TaskKey>> = HashSet::new();
        let mut logged: HashSet<TaskKey> = HashSet::new();

        while let Some(index) = ready.pop() {
            if graph.graph[index].is_complete() {
                for key in &graph.graph[index].task.keys {
                    if logged.insert(key.clone()) {
                        log_line(full_ready, format!("Accessed  {key} from in-memory cache"));
                    }
                }
                continue;
            }

            if !graph.is_blocked(index) {
                compute_task_state(flow, graph, cache.as_ref(), full_ready, index)?;

                for key in &graph.graph[index].task.keys {
                    logged.insert(key.clone());
                }

                // Children waiting only on this task become ready.
                let children: Vec<NodeIndex> = graph
                    .graph
                    .neighbors_directed(index, Direction::Outgoing)
                    .collect();
                for child in children {
                    let child_keys = graph.graph[child].task.keys.clone();
                    if blocked.contains(&child_keys) && !graph.is_blocked(child) {
                        blocked.remove(&child_keys);
                        ready.push(child);
                    }
                }
                continue;
            }

            // Blocked: queue the unmet parents and park this state until its
            // last parent completes.
            let parents: Vec<NodeIndex> = graph
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .collect();
            for parent in parents {
                if !graph.graph[parent].is_complete() {
                    ready.push(parent);
                }
            }
            blocked.insert(graph.graph[index].task.keys.clone());
        }

        // The DAG is acyclic, so nothing can stay blocked forever.
        if !blocked.is_empty() {
            return Err(ResolverError::Internal(format!(
                "work list exited with {} tasks still blocked",
                blocked.len()
            )));
        }
        for &index in &requested {
            if !graph.graph[index].is_complete() {
                return Err(ResolverError::Internal(format!(
                    "task `{}` incomplete after resolution",
                    graph.graph[index].task.keys[0]
                )));
            }
        }

        let results = requested
            .iter()
            .map(|&index| {
                graph.graph[index]
                    .results_by_name
                    .as_ref()
                    .and_then(|results| results.get(entity_name))
                    .cloned()
                    .ok_or_else(|| {
                        ResolverError::Internal(format!(
                            "completed task holds no result for `{entity_name}`"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let key_space = graph
            .key_spaces_by_name
            .get(entity_name)
            .cloned()
            .ok_or_else(|| {
                ResolverError::Internal(format!("entity `{entity_name}` has no key space"))
            })?;

        Ok(ResultGroup { results, key_space })
    }
}

/// Evaluates one unblocked task state: gathers dependency results, builds
/// provenance and queries, consults the persistent cache, computes and
/// validates where needed, and installs the results.
fn compute_task_state(
    flow: &Flow,
    graph: &mut TaskGraph,
    cache: Option<&Arc<dyn ArtifactCache>>,
    full_ready: bool,
    index: NodeIndex,
) -> Result<(), ResolverError> {
    let task = graph.graph[index].task.clone();

    let mut dep_results = Vec::with_capacity(task.dep_keys.len());
    for dep_key in &task.dep_keys {
        let dep_index = graph.states_by_key.get(dep_key).copied().ok_or_else(|| {
            ResolverError::Internal(format!("dependency `{dep_key}` has no task state"))
        })?;
        let result = graph.graph[dep_index]
            .results_by_name
            .as_ref()
            .and_then(|results| results.get(&dep_key.entity_name))
            .cloned()
            .ok_or_else(|| {
                ResolverError::Internal(format!("dependency `{dep_key}` evaluated out of order"))
            })?;
        dep_results.push(result);
    }

    // All joint keys must agree on one provider and one case key.
    let provider = flow.get_provider(&task.keys[0].entity_name)?;
    for key in &task.keys[1..] {
        let other = flow.get_provider(&key.entity_name)?;
        if !Arc::ptr_eq(&provider, &other) {
            return Err(ResolverError::Internal(format!(
                "joint task keys {:?} disagree on provider",
                task.keys
            )));
        }
        if key.case_key != task.keys[0].case_key {
            return Err(ResolverError::Internal(format!(
                "joint task keys {:?} disagree on case key",
                task.keys
            )));
        }
    }
    let case_key = task.keys[0].case_key.clone();

    let provenance = Provenance::from_computation(
        provider.code_id(&case_key),
        case_key.clone(),
        dep_results
            .iter()
            .map(|dep| (dep.query.name.clone(), dep.query.provenance.clone()))
            .collect(),
    );

    // "tk" prefixes lists that line up with the task's list of keys.
    let tk_queries: Vec<Query> = task
        .keys
        .iter()
        .map(|key| Query {
            name: key.entity_name.clone(),
            protocol: provider.protocol_for(&key.entity_name),
            case_key: case_key.clone(),
            provenance: provenance.clone(),
        })
        .collect();

    let should_persist = provider.attrs().should_persist;

    let mut tk_results: Option<Vec<EntityResult>> = None;

    if should_persist {
        if !full_ready {
            return Err(ResolverError::BootstrapPersistence {
                names: provider.attrs().names.clone(),
            });
        }
        let cache = cache.ok_or_else(|| {
            ResolverError::Internal("full readiness without a persistent cache".into())
        })?;

        // All outputs must hit; a partial hit is discarded and the task is
        // recomputed as a whole.
        let mut loaded = Vec::with_capacity(tk_queries.len());
        for (query, key) in tk_queries.iter().zip(&task.keys) {
            match cache.load(query) {
                Some(result) => {
                    log_line(full_ready, format!("Loaded    {key} from file cache"));
                    loaded.push(result);
                }
                None => {
                    loaded.clear();
                    break;
                }
            }
        }
        if loaded.len() == tk_queries.len() {
            tk_results = Some(loaded);
        }
    }

    let tk_results = match tk_results {
        Some(results) => results,
        None => {
            if !task.is_simple_lookup {
                for key in &task.keys {
                    log_line(full_ready, format!("Computing {key} ..."));
                }
            }

            let dep_values: Vec<Dynamic> =
                dep_results.iter().map(|dep| dep.value.clone()).collect();

            let tk_values = task
                .compute
                .call(&dep_values)
                .map_err(|source| ResolverError::Compute {
                    key: task.keys[0].clone(),
                    source,
                })?;

            if tk_values.len() != task.keys.len() {
                return Err(ResolverError::Internal(format!(
                    "task `{}` produced {} values for {} keys",
                    task.keys[0],
                    tk_values.len(),
                    task.keys.len()
                )));
            }

            let mut results = Vec::with_capacity(tk_values.len());
            for ((value, query), key) in tk_values.into_iter().zip(tk_queries).zip(&task.keys) {
                query
                    .protocol
                    .validate(&value)
                    .map_err(|source| ResolverError::Protocol {
                        key: key.clone(),
                        source,
                    })?;

                let mut result = EntityResult { query, value };
                if should_persist {
                    let cache = cache.ok_or_else(|| {
                        ResolverError::Internal("full readiness without a persistent cache".into())
                    })?;
                    cache.save(&result)?;
                    // The reloaded value is canonical: callers observe the
                    // serialized→deserialized form whether or not the cache
                    // was hit.
                    result = cache.load(&result.query).ok_or_else(|| {
                        ResolverError::Internal(format!(
                            "cache returned no record for `{key}` immediately after save"
                        ))
                    })?;
                }

                if task.is_simple_lookup {
                    log_line(full_ready, format!("Accessed  {key} from definition"));
                } else {
                    log_line(full_ready, format!("Computed  {key}"));
                }

                results.push(result);
            }
            results
        }
    };

    let results_by_name: BTreeMap<String, EntityResult> = task
        .keys
        .iter()
        .map(|key| key.entity_name.clone())
        .zip(tk_results)
        .collect();
    graph.graph[index].results_by_name = Some(results_by_name);

    Ok(())
}

/// Resolver messages land at `info` once full-ready and at `debug` before,
/// so bootstrap traffic stays quiet by default.
fn log_line(full_ready: bool, message: String) {
    if full_ready {
        tracing::info!("{message}");
    } else {
        tracing::debug!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::cache::{FileCache, MemoryCache};
    use crate::error::ProtocolError;
    use crate::key::CaseKey;
    use crate::protocol::{OpaqueProtocol, Protocol, TypedProtocol};
    use crate::provenance::CodeId;
    use crate::provider::{FunctionProvider, ValueProvider};

    // ── log capture ──────────────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct Capture {
        events: Arc<Mutex<Vec<(Level, String)>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Capture {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Visitor<'a>(&'a mut Option<String>);

            impl tracing::field::Visit for Visitor<'_> {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        *self.0 = Some(format!("{value:?}"));
                    }
                }
            }

            let mut message = None;
            event.record(&mut Visitor(&mut message));
            if let Some(message) = message {
                self.events
                    .lock()
                    .unwrap()
                    .push((*event.metadata().level(), message));
            }
        }
    }

    fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<(Level, String)>) {
        let capture = Capture::default();
        let events = capture.events.clone();
        let subscriber = tracing_subscriber::registry().with(capture);
        let out = tracing::subscriber::with_default(subscriber, f);
        let events = events.lock().unwrap().clone();
        (out, events)
    }

    fn messages(events: &[(Level, String)]) -> Vec<&str> {
        events.iter().map(|(_, message)| message.as_str()).collect()
    }

    // ── flow construction helpers ────────────────────────────────────────

    fn int_protocol() -> Arc<dyn Protocol> {
        TypedProtocol::<i64>::new().arc()
    }

    fn constant(name: &str, value: i64) -> ValueProvider {
        ValueProvider::new(name, int_protocol()).value(Arc::new(value))
    }

    fn counted<F>(
        name: &str,
        deps: Vec<String>,
        counter: Arc<AtomicUsize>,
        func: F,
    ) -> FunctionProvider
    where
        F: Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync + 'static,
    {
        FunctionProvider::new(name, int_protocol(), deps, move |values| {
            counter.fetch_add(1, Ordering::SeqCst);
            func(values)
        })
    }

    fn int(values: &[Dynamic], at: usize) -> i64 {
        *values[at].downcast_ref::<i64>().unwrap()
    }

    fn bootstrap_query(name: &str, code: &str) -> Query {
        Query {
            name: name.to_string(),
            protocol: int_protocol(),
            case_key: CaseKey::new(),
            provenance: Provenance::from_computation(
                CodeId::new(code),
                CaseKey::new(),
                BTreeMap::new(),
            ),
        }
    }

    // ── end-to-end scenarios ─────────────────────────────────────────────

    #[test]
    fn single_constant_resolves_from_definition() {
        let flow = Flow::new()
            .register(constant("x", 7))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        let (group, logs) = capture_logs(|| resolver.resolve("x"));
        let group = group.unwrap();

        assert_eq!(group.len(), 1);
        assert_eq!(group[0].value_as::<i64>(), Some(&7));
        assert!(messages(&logs).contains(&"Accessed  x() from definition"));
    }

    #[test]
    fn chain_resolves_and_memoizes_in_memory() {
        let computes = Arc::new(AtomicUsize::new(0));
        let flow = Flow::new()
            .register(constant("a", 2))
            .register(counted("b", vec!["a".into()], computes.clone(), |values| {
                Ok(Arc::new(int(values, 0) * 3) as Dynamic)
            }))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        let first = resolver.resolve("b").unwrap();
        assert_eq!(first[0].value_as::<i64>(), Some(&6));
        assert_eq!(computes.load(Ordering::SeqCst), 1);

        let (second, logs) = capture_logs(|| resolver.resolve("b"));
        let second = second.unwrap();
        assert_eq!(second[0].value_as::<i64>(), Some(&6));
        assert_eq!(computes.load(Ordering::SeqCst), 1);
        assert!(messages(&logs).contains(&"Accessed  b() from in-memory cache"));
    }

    #[test]
    fn parameterized_results_follow_key_space_order() {
        let flow = Flow::new()
            .register(
                ValueProvider::new("p", int_protocol())
                    .case(CaseKey::of([("n", "1")]), Arc::new(10i64))
                    .case(CaseKey::of([("n", "2")]), Arc::new(20i64)),
            )
            .register(FunctionProvider::new(
                "q",
                int_protocol(),
                ["p"],
                |values| Ok(Arc::new(int(values, 0) * int(values, 0)) as Dynamic),
            ))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        let group = resolver.resolve("q").unwrap();
        let values: Vec<i64> = group.iter().map(|r| *r.value_as::<i64>().unwrap()).collect();
        assert_eq!(values, vec![100, 400]);

        let cases: Vec<String> = group.key_space.iter().map(CaseKey::to_string).collect();
        assert_eq!(cases, vec!["n=1", "n=2"]);
    }

    #[test]
    fn persistent_cache_hit_skips_compute() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .save(&EntityResult {
                query: bootstrap_query("w", "w@0"),
                value: Arc::new(99i64),
            })
            .unwrap();

        let computes = Arc::new(AtomicUsize::new(0));
        let flow = Flow::new()
            .register(
                counted("w", vec![], computes.clone(), |_| {
                    Ok(Arc::new(42i64) as Dynamic)
                })
                .persisted(),
            )
            .with_cache(cache);
        let mut resolver = Resolver::new(flow);

        let (group, logs) = capture_logs(|| resolver.resolve("w"));
        let group = group.unwrap();

        assert_eq!(group[0].value_as::<i64>(), Some(&99));
        assert_eq!(computes.load(Ordering::SeqCst), 0);
        assert!(messages(&logs).contains(&"Loaded    w() from file cache"));
    }

    #[test]
    fn persistence_miss_computes_saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileCache::new(dir.path().to_str().unwrap()));

        let computes = Arc::new(AtomicUsize::new(0));
        let flow = Flow::new()
            .register(
                counted("w", vec![], computes.clone(), |_| {
                    Ok(Arc::new(42i64) as Dynamic)
                })
                .persisted(),
            )
            .with_cache(cache.clone());
        let mut resolver = Resolver::new(flow);

        let (group, logs) = capture_logs(|| resolver.resolve("w"));
        let group = group.unwrap();

        assert_eq!(computes.load(Ordering::SeqCst), 1);
        assert!(messages(&logs).contains(&"Computed  w()"));

        // The returned value is the reloaded, canonical form.
        let reloaded = cache.load(&bootstrap_query("w", "w@0")).unwrap();
        assert_eq!(
            group[0].value_as::<i64>(),
            reloaded.value_as::<i64>(),
        );
        assert_eq!(group[0].value_as::<i64>(), Some(&42));
    }

    #[test]
    fn joint_outputs_share_one_computation() {
        let computes = Arc::new(AtomicUsize::new(0));
        let counter = computes.clone();
        let flow = Flow::new()
            .register(FunctionProvider::joint(
                vec![
                    ("u".to_string(), int_protocol()),
                    ("v".to_string(), int_protocol()),
                ],
                Vec::<String>::new(),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![Arc::new(3i64) as Dynamic, Arc::new(4i64) as Dynamic])
                },
            ))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        let u = resolver.resolve("u").unwrap();
        assert_eq!(u[0].value_as::<i64>(), Some(&3));

        let v = resolver.resolve("v").unwrap();
        assert_eq!(v[0].value_as::<i64>(), Some(&4));

        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    // ── boundary behaviors ───────────────────────────────────────────────

    #[test]
    fn undefined_entity_is_reported() {
        let flow = Flow::new()
            .register(constant("x", 1))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        match resolver.resolve("nope") {
            Err(ResolverError::UndefinedEntity(name)) => assert_eq!(name, "nope"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_cache_entity_fails_readiness() {
        let flow = Flow::new().register(constant("x", 1));
        let mut resolver = Resolver::new(flow);

        match resolver.get_ready() {
            Err(ResolverError::UndefinedEntity(name)) => assert_eq!(name, CACHE_ENTITY),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn persistent_bootstrap_entity_is_rejected() {
        let flow = Flow::new().register(
            FunctionProvider::new(
                CACHE_ENTITY,
                Arc::new(OpaqueProtocol),
                Vec::<String>::new(),
                |_| {
                    let cache: Arc<dyn ArtifactCache> = Arc::new(MemoryCache::new());
                    Ok(Arc::new(CacheHandle(cache)) as Dynamic)
                },
            )
            .persisted(),
        );
        let mut resolver = Resolver::new(flow);

        match resolver.get_ready() {
            Err(ResolverError::BootstrapPersistence { names }) => {
                assert_eq!(names, vec![CACHE_ENTITY.to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bootstrap_cardinality_zero_and_many() {
        let empty = Flow::new().register(ValueProvider::new(CACHE_ENTITY, Arc::new(OpaqueProtocol)));
        match Resolver::new(empty).get_ready() {
            Err(ResolverError::BootstrapCardinality { name, count }) => {
                assert_eq!(name, CACHE_ENTITY);
                assert_eq!(count, 0);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let handle = || {
            let cache: Arc<dyn ArtifactCache> = Arc::new(MemoryCache::new());
            Arc::new(CacheHandle(cache)) as Dynamic
        };
        let doubled = Flow::new().register(
            ValueProvider::new(CACHE_ENTITY, Arc::new(OpaqueProtocol))
                .case(CaseKey::of([("n", "1")]), handle())
                .case(CaseKey::of([("n", "2")]), handle()),
        );
        match Resolver::new(doubled).get_ready() {
            Err(ResolverError::BootstrapCardinality { count, .. }) => assert_eq!(count, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejected_value_leaves_state_incomplete() {
        let computes = Arc::new(AtomicUsize::new(0));
        let counter = computes.clone();
        let flow = Flow::new()
            .register(FunctionProvider::new(
                "x",
                TypedProtocol::<i64>::new()
                    .with_check(|n| (*n >= 0).then_some(()).ok_or("negative".to_string()))
                    .arc(),
                Vec::<String>::new(),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(-1i64) as Dynamic)
                },
            ))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        for _ in 0..2 {
            match resolver.resolve("x") {
                Err(ResolverError::Protocol { key, source }) => {
                    assert_eq!(key.to_string(), "x()");
                    assert!(matches!(source, ProtocolError::Rejected(_)));
                }
                other => panic!("unexpected: {other:?}"),
            }
        }

        // The failing state was never marked complete, so it recomputed.
        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cycle_is_fatal_during_readiness() {
        let cyclic = |name: &str, dep: &str| {
            FunctionProvider::new(name, int_protocol(), [dep.to_string()], |values| {
                Ok(values[0].clone())
            })
        };
        let flow = Flow::new()
            .register(cyclic("a", "b"))
            .register(cyclic("b", "a"))
            .with_cache(Arc::new(MemoryCache::new()));

        assert!(matches!(
            Resolver::new(flow).get_ready(),
            Err(ResolverError::CycleDetected(_))
        ));
    }

    // ── invariants ───────────────────────────────────────────────────────

    #[test]
    fn diamond_evaluates_each_state_once() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let c = Arc::new(AtomicUsize::new(0));
        let d = Arc::new(AtomicUsize::new(0));

        let flow = Flow::new()
            .register(counted("a", vec![], a.clone(), |_| {
                Ok(Arc::new(1i64) as Dynamic)
            }))
            .register(counted("b", vec!["a".into()], b.clone(), |values| {
                Ok(Arc::new(int(values, 0) + 1) as Dynamic)
            }))
            .register(counted("c", vec!["a".into()], c.clone(), |values| {
                Ok(Arc::new(int(values, 0) + 2) as Dynamic)
            }))
            .register(counted(
                "d",
                vec!["b".into(), "c".into()],
                d.clone(),
                |values| Ok(Arc::new(int(values, 0) + int(values, 1)) as Dynamic),
            ))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        let group = resolver.resolve("d").unwrap();
        assert_eq!(group[0].value_as::<i64>(), Some(&5));

        resolver.resolve("d").unwrap();

        for counter in [&a, &b, &c, &d] {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn cache_hit_loads_exactly_once_per_query() {
        struct CountingCache {
            inner: MemoryCache,
            loads: AtomicUsize,
        }

        impl ArtifactCache for CountingCache {
            fn load(&self, query: &Query) -> Option<EntityResult> {
                self.loads.fetch_add(1, Ordering::SeqCst);
                self.inner.load(query)
            }

            fn save(&self, result: &EntityResult) -> Result<(), crate::error::CacheError> {
                self.inner.save(result)
            }
        }

        let cache = Arc::new(CountingCache {
            inner: MemoryCache::new(),
            loads: AtomicUsize::new(0),
        });
        cache
            .inner
            .save(&EntityResult {
                query: bootstrap_query("w", "w@0"),
                value: Arc::new(99i64),
            })
            .unwrap();

        let computes = Arc::new(AtomicUsize::new(0));
        let flow = Flow::new()
            .register(
                counted("w", vec![], computes.clone(), |_| {
                    Ok(Arc::new(42i64) as Dynamic)
                })
                .persisted(),
            )
            .with_cache(cache.clone());
        let mut resolver = Resolver::new(flow);

        resolver.resolve("w").unwrap();
        assert_eq!(cache.loads.load(Ordering::SeqCst), 1);
        assert_eq!(computes.load(Ordering::SeqCst), 0);

        // The second resolve is served from memory, not the cache.
        resolver.resolve("w").unwrap();
        assert_eq!(cache.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn provenance_threads_through_dependencies() {
        let flow = Flow::new()
            .register(constant("a", 2))
            .register(FunctionProvider::new(
                "b",
                int_protocol(),
                ["a"],
                |values| Ok(Arc::new(int(values, 0) * 3) as Dynamic),
            ))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        let group = resolver.resolve("b").unwrap();
        let provenance = &group[0].query.provenance;

        assert_eq!(provenance.code_id().as_str(), "b@0");
        let dep = &provenance.dep_provenances_by_name()["a"];
        assert_eq!(dep.code_id().as_str(), "a@0");
    }

    #[test]
    fn bootstrap_messages_log_at_debug() {
        let flow = Flow::new()
            .register(constant("x", 7))
            .with_cache(Arc::new(MemoryCache::new()));
        let mut resolver = Resolver::new(flow);

        let (ready, logs) = capture_logs(|| resolver.get_ready());
        ready.unwrap();
        let bootstrap = format!("Accessed  {CACHE_ENTITY}() from definition");
        assert!(logs.contains(&(Level::DEBUG, bootstrap)));

        // Once full-ready, messages are promoted to info.
        let (group, logs) = capture_logs(|| resolver.resolve("x"));
        group.unwrap();
        assert!(logs.contains(&(Level::INFO, "Accessed  x() from definition".to_string())));
    }
}
