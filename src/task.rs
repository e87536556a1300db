use std::fmt::Debug;
use std::sync::Arc;

use crate::core::Dynamic;
use crate::key::TaskKey;

/// Compute function pointer used to produce a task's values. The type is
/// erased at run time behind the `dyn Fn` existential type.
type ComputeFnPtr = Arc<dyn Fn(&[Dynamic]) -> anyhow::Result<Vec<Dynamic>> + Send + Sync>;

/// Wraps `ComputeFnPtr` and implements the `Debug` trait for it.
#[derive(Clone)]
pub struct ComputeFn(ComputeFnPtr);

impl ComputeFn {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Dynamic]) -> anyhow::Result<Vec<Dynamic>> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// **Pure** — maps ordered dependency values to ordered output values.
    pub fn call(&self, dep_values: &[Dynamic]) -> anyhow::Result<Vec<Dynamic>> {
        (self.0)(dep_values)
    }
}

impl Debug for ComputeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Compute(*)")
    }
}

/// A unit of computation in the task graph.
///
/// A task produces values for one or more task keys at once — more than one
/// when a joint provider defines several entities through a single
/// computation. Output values line up with `keys` by position.
#[derive(Debug, Clone)]
pub struct Task {
    /// The task keys this computation produces, in output order.
    pub keys: Vec<TaskKey>,
    /// The task keys this computation consumes, in argument order.
    pub dep_keys: Vec<TaskKey>,
    pub compute: ComputeFn,
    /// Marks constant/definition lookups; only affects log verbosity.
    pub is_simple_lookup: bool,
}

impl Task {
    pub fn new(keys: Vec<TaskKey>, dep_keys: Vec<TaskKey>, compute: ComputeFn) -> Self {
        Self {
            keys,
            dep_keys,
            compute,
            is_simple_lookup: false,
        }
    }

    pub fn simple_lookup(mut self) -> Self {
        self.is_simple_lookup = true;
        self
    }

    /// The key under which this task produces the given entity, if any.
    pub fn key_for_entity(&self, entity_name: &str) -> Option<&TaskKey> {
        self.keys.iter().find(|key| key.entity_name == entity_name)
    }
}
