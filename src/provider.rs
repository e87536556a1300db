//! The contract between user-declared entities and the resolver.
//!
//! A [`Provider`] is the implementation behind one or more entities: it
//! declares dependencies, derives the entity's key space from its
//! dependencies' key spaces, and materializes the actual [`Task`]s. The
//! resolver never inspects provider internals; it drives everything through
//! this interface.
//!
//! Two stock providers cover the common cases: [`ValueProvider`] for fixed
//! definitions and [`FunctionProvider`] for computations over dependencies.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::Dynamic;
use crate::key::{CaseKey, KeySpace, TaskKey};
use crate::protocol::Protocol;
use crate::provenance::CodeId;
use crate::task::{ComputeFn, Task};

/// Key spaces of a provider's dependencies, by entity name.
pub type DepKeySpaces = BTreeMap<String, KeySpace>;

/// Task keys of a provider's dependencies, by entity name, ordered by the
/// dependency's key space.
pub type DepTaskKeys = BTreeMap<String, Vec<TaskKey>>;

/// Static attributes of a provider.
#[derive(Debug, Clone)]
pub struct ProviderAttrs {
    /// The entity names this provider produces. More than one name means the
    /// provider emits joint tasks covering all of them at once.
    pub names: Vec<String>,
    /// Whether outputs may be stored in the persistent artifact cache.
    pub should_persist: bool,
}

/// The capability interface of an entity implementation.
///
/// All methods are pure with respect to resolver state; the graph builder
/// calls them once per entity during construction.
pub trait Provider: Send + Sync {
    fn attrs(&self) -> &ProviderAttrs;

    fn dependency_names(&self) -> Vec<String>;

    /// Derives this entity's key space from its dependencies' key spaces.
    fn key_space(&self, dep_key_spaces: &DepKeySpaces) -> KeySpace;

    /// Materializes one task per case of this entity (or per joint case of
    /// all co-produced entities).
    fn tasks(&self, dep_key_spaces: &DepKeySpaces, dep_task_keys: &DepTaskKeys) -> Vec<Task>;

    /// Identifier for the provider code behind the given case, recorded in
    /// provenance.
    fn code_id(&self, case_key: &CaseKey) -> CodeId;

    fn protocol_for(&self, name: &str) -> Arc<dyn Protocol>;
}

/// A provider for fixed definitions: one value per declared case, no
/// dependencies, evaluated as a simple lookup.
pub struct ValueProvider {
    attrs: ProviderAttrs,
    protocol: Arc<dyn Protocol>,
    values: Vec<(CaseKey, Dynamic)>,
    version: u32,
}

impl ValueProvider {
    pub fn new(name: impl Into<String>, protocol: Arc<dyn Protocol>) -> Self {
        Self {
            attrs: ProviderAttrs {
                names: vec![name.into()],
                should_persist: false,
            },
            protocol,
            values: Vec::new(),
            version: 0,
        }
    }

    /// Declares the single value of an unparameterized entity.
    pub fn value(self, value: Dynamic) -> Self {
        self.case(CaseKey::new(), value)
    }

    /// Declares the value for one case of a parameterized entity. Case order
    /// here defines the entity's key-space order.
    pub fn case(mut self, case_key: CaseKey, value: Dynamic) -> Self {
        self.values.push((case_key, value));
        self
    }

    pub fn persisted(mut self) -> Self {
        self.attrs.should_persist = true;
        self
    }

    /// Bumping the version changes provenance, invalidating cached artifacts
    /// derived from earlier definitions.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl Provider for ValueProvider {
    fn attrs(&self) -> &ProviderAttrs {
        &self.attrs
    }

    fn dependency_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn key_space(&self, _: &DepKeySpaces) -> KeySpace {
        self.values.iter().map(|(case, _)| case.clone()).collect()
    }

    fn tasks(&self, _: &DepKeySpaces, _: &DepTaskKeys) -> Vec<Task> {
        let name = &self.attrs.names[0];

        self.values
            .iter()
            .map(|(case, value)| {
                let value = value.clone();
                Task::new(
                    vec![TaskKey::new(name.clone(), case.clone())],
                    vec![],
                    ComputeFn::new(move |_| Ok(vec![value.clone()])),
                )
                .simple_lookup()
            })
            .collect()
    }

    fn code_id(&self, _: &CaseKey) -> CodeId {
        CodeId::new(format!("{}@{}", self.attrs.names[0], self.version))
    }

    fn protocol_for(&self, _: &str) -> Arc<dyn Protocol> {
        self.protocol.clone()
    }
}

/// A provider computing one or more entities from declared dependencies.
///
/// The key space is the compatible cartesian product of the dependency key
/// spaces; one task is materialized per case, wired to the dependency task
/// keys whose case keys are compatible with that case.
pub struct FunctionProvider {
    attrs: ProviderAttrs,
    deps: Vec<String>,
    protocols: BTreeMap<String, Arc<dyn Protocol>>,
    func: ComputeFn,
    version: u32,
}

impl FunctionProvider {
    /// A single-output provider. The closure receives dependency values in
    /// declaration order and returns the entity's value.
    pub fn new<I, S, F>(
        name: impl Into<String>,
        protocol: Arc<dyn Protocol>,
        deps: I,
        func: F,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            attrs: ProviderAttrs {
                names: vec![name.clone()],
                should_persist: false,
            },
            deps: deps.into_iter().map(Into::into).collect(),
            protocols: BTreeMap::from([(name, protocol)]),
            func: ComputeFn::new(move |values| Ok(vec![func(values)?])),
            version: 0,
        }
    }

    /// A joint-output provider: one computation defining several entities at
    /// the same case key. The closure must return one value per output name,
    /// in declaration order.
    pub fn joint<I, S, F>(outputs: Vec<(String, Arc<dyn Protocol>)>, deps: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&[Dynamic]) -> anyhow::Result<Vec<Dynamic>> + Send + Sync + 'static,
    {
        Self {
            attrs: ProviderAttrs {
                names: outputs.iter().map(|(name, _)| name.clone()).collect(),
                should_persist: false,
            },
            deps: deps.into_iter().map(Into::into).collect(),
            protocols: outputs.into_iter().collect(),
            func: ComputeFn::new(func),
            version: 0,
        }
    }

    pub fn persisted(mut self) -> Self {
        self.attrs.should_persist = true;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl Provider for FunctionProvider {
    fn attrs(&self) -> &ProviderAttrs {
        &self.attrs
    }

    fn dependency_names(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn key_space(&self, dep_key_spaces: &DepKeySpaces) -> KeySpace {
        if self.deps.is_empty() {
            return KeySpace::trivial();
        }

        // The graph builder supplies a space for every declared dependency;
        // a missing one collapses to the empty space.
        let spaces: Option<Vec<_>> = self
            .deps
            .iter()
            .map(|dep| dep_key_spaces.get(dep))
            .collect();

        match spaces {
            Some(spaces) => KeySpace::product(spaces),
            None => KeySpace::default(),
        }
    }

    fn tasks(&self, dep_key_spaces: &DepKeySpaces, dep_task_keys: &DepTaskKeys) -> Vec<Task> {
        self.key_space(dep_key_spaces)
            .iter()
            .filter_map(|case| {
                // Every case of the compatible product has exactly one
                // compatible task key per dependency.
                let dep_keys: Option<Vec<TaskKey>> = self
                    .deps
                    .iter()
                    .map(|dep| {
                        dep_task_keys.get(dep)?.iter().find_map(|key| {
                            key.case_key.is_subset_of(case).then(|| key.clone())
                        })
                    })
                    .collect();

                let keys = self
                    .attrs
                    .names
                    .iter()
                    .map(|name| TaskKey::new(name.clone(), case.clone()))
                    .collect();

                Some(Task::new(keys, dep_keys?, self.func.clone()))
            })
            .collect()
    }

    fn code_id(&self, _: &CaseKey) -> CodeId {
        CodeId::new(format!("{}@{}", self.attrs.names.join("+"), self.version))
    }

    fn protocol_for(&self, name: &str) -> Arc<dyn Protocol> {
        self.protocols
            .get(name)
            .cloned()
            .expect("protocol registered for every output name")
    }
}
