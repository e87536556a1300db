//! Identity model for producible artifacts.
//!
//! An *entity* is a named artifact. A parameterized entity has one instance
//! per [`CaseKey`], and the pair of entity name and case key — a [`TaskKey`] —
//! addresses exactly one producible artifact in the universe. The set of case
//! keys an entity is defined over is its [`KeySpace`].

use std::collections::BTreeMap;
use std::fmt;

/// Entity names starting with this prefix are reserved for the resolver's
/// own bootstrap entities.
pub const INTERNAL_PREFIX: &str = "core__";

/// Returns true if the entity name denotes an internal bootstrap entity.
pub fn entity_is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

/// An ordered mapping from parameter name to value, identifying one instance
/// of a parameterized entity.
///
/// Two case keys are equal iff they hold identical name→value mappings. The
/// entries iterate in name order, which is also the order used when the key
/// is rendered into log messages.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaseKey(BTreeMap<String, String>);

impl CaseKey {
    /// The empty case key, used by entities with a single instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns a copy of this case key with one more parameter bound.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every entry of `self` appears in `other` with the same value.
    pub fn is_subset_of(&self, other: &CaseKey) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).is_some_and(|o| o == v))
    }

    /// Unions two case keys, or returns `None` when they bind the same
    /// parameter to different values.
    pub fn merge(&self, other: &CaseKey) -> Option<CaseKey> {
        let mut merged = self.0.clone();
        for (k, v) in &other.0 {
            match merged.get(k) {
                Some(existing) if existing != v => return None,
                _ => {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        Some(CaseKey(merged))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CaseKey {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Addresses a single producible artifact: one entity at one case key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub entity_name: String,
    pub case_key: CaseKey,
}

impl TaskKey {
    pub fn new(entity_name: impl Into<String>, case_key: CaseKey) -> Self {
        Self {
            entity_name: entity_name.into(),
            case_key,
        }
    }
}

/// Renders as `entity_name(k1=v1, k2=v2)` — the task string used by every
/// resolver log message.
impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.entity_name, self.case_key)
    }
}

/// The ordered set of case keys one entity is defined over.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySpace(Vec<CaseKey>);

impl KeySpace {
    /// The key space of an unparameterized entity: exactly one empty case.
    pub fn trivial() -> Self {
        Self(vec![CaseKey::new()])
    }

    /// Builds a key space from cases, dropping duplicates but preserving the
    /// order of first appearance.
    pub fn from_cases(cases: impl IntoIterator<Item = CaseKey>) -> Self {
        let mut seen = Vec::new();
        for case in cases {
            if !seen.contains(&case) {
                seen.push(case);
            }
        }
        Self(seen)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaseKey> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The compatible cartesian product of several key spaces.
    ///
    /// Cases are merged pairwise; combinations that bind the same parameter
    /// to different values are dropped. The product of the trivial key space
    /// with X is X, so unparameterized dependencies never widen the result.
    pub fn product<'a>(spaces: impl IntoIterator<Item = &'a KeySpace>) -> KeySpace {
        let mut acc = vec![CaseKey::new()];
        for space in spaces {
            let mut next = Vec::new();
            for left in &acc {
                for right in space.iter() {
                    if let Some(merged) = left.merge(right) {
                        next.push(merged);
                    }
                }
            }
            acc = next;
        }
        KeySpace::from_cases(acc)
    }
}

impl FromIterator<CaseKey> for KeySpace {
    fn from_iter<I: IntoIterator<Item = CaseKey>>(iter: I) -> Self {
        Self::from_cases(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_key_display() {
        let key = TaskKey::new("p", CaseKey::new().with("n", "1"));
        assert_eq!(key.to_string(), "p(n=1)");

        let bare = TaskKey::new("x", CaseKey::new());
        assert_eq!(bare.to_string(), "x()");
    }

    #[test]
    fn case_key_display_orders_by_name() {
        let case = CaseKey::of([("b", "2"), ("a", "1")]);
        assert_eq!(case.to_string(), "a=1, b=2");
    }

    #[test]
    fn case_key_equality_is_structural() {
        let a = CaseKey::of([("n", "1"), ("m", "2")]);
        let b = CaseKey::new().with("m", "2").with("n", "1");
        assert_eq!(a, b);
    }

    #[test]
    fn merge_rejects_conflicts() {
        let a = CaseKey::of([("n", "1")]);
        let b = CaseKey::of([("n", "2")]);
        assert_eq!(a.merge(&b), None);

        let c = CaseKey::of([("m", "3")]);
        let merged = a.merge(&c).unwrap();
        assert_eq!(merged, CaseKey::of([("n", "1"), ("m", "3")]));
    }

    #[test]
    fn product_with_trivial_is_identity() {
        let p = KeySpace::from_cases([CaseKey::of([("n", "1")]), CaseKey::of([("n", "2")])]);
        let product = KeySpace::product([&KeySpace::trivial(), &p]);
        assert_eq!(product, p);
    }

    #[test]
    fn product_merges_shared_parameters() {
        let p = KeySpace::from_cases([CaseKey::of([("n", "1")]), CaseKey::of([("n", "2")])]);
        let q = KeySpace::from_cases([
            CaseKey::of([("n", "1"), ("m", "a")]),
            CaseKey::of([("n", "2"), ("m", "b")]),
        ]);
        let product = KeySpace::product([&p, &q]);
        // Conflicting `n` assignments are dropped.
        assert_eq!(product, q);
    }

    #[test]
    fn internal_prefix() {
        assert!(entity_is_internal("core__persistent_cache"));
        assert!(!entity_is_internal("core"));
        assert!(!entity_is_internal("x"));
    }
}
