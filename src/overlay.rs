//! Per-lookup annotations attached to otherwise immutable records.
//!
//! A [`Decorated`] value wraps a record together with a small keyed map of
//! opaque values. Equality and hashing only look at the wrapped record, so a
//! set of decorated contacts behaves like a set of contacts no matter what
//! bookkeeping a lookup has attached to them.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Mutex, PoisonError};

type Annotation = Box<dyn Any + Send + Sync>;

pub struct Decorated<T> {
    data: T,
    annotations: Mutex<HashMap<&'static str, Annotation>>,
}

impl<T> Decorated<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            annotations: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped record.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Drop the annotations and return the wrapped record.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Read an annotation.
    ///
    /// Returns `None` when the key is absent or holds a value of another type.
    pub fn get<V: Clone + 'static>(&self, key: &str) -> Option<V> {
        let annotations = self
            .annotations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        annotations
            .get(key)
            .and_then(|value| value.downcast_ref::<V>())
            .cloned()
    }

    pub fn get_or<V: Clone + 'static>(&self, key: &str, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Attach or overwrite an annotation.
    pub fn put<V: Any + Send + Sync>(&self, key: &'static str, value: V) {
        let mut annotations = self
            .annotations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        annotations.insert(key, Box::new(value));
    }

    pub fn contains(&self, key: &str) -> bool {
        let annotations = self
            .annotations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        annotations.contains_key(key)
    }
}

impl<T> From<T> for Decorated<T> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: PartialEq> PartialEq for Decorated<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T: Eq> Eq for Decorated<T> {}

impl<T: Hash> Hash for Decorated<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Decorated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&'static str> = {
            let annotations = self
                .annotations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            annotations.keys().copied().collect()
        };
        f.debug_struct("Decorated")
            .field("data", &self.data)
            .field("annotations", &keys)
            .finish()
    }
}

/// Wrap every record in a fresh, unannotated [`Decorated`].
pub fn decorate<T, I>(records: I) -> Vec<Decorated<T>>
where
    I: IntoIterator<Item = T>,
{
    records.into_iter().map(Decorated::new).collect()
}

/// Copy the records back out of a sequence of decorated values, keeping order.
///
/// Accepts anything that dereferences to a [`Decorated`], so owned values,
/// references and `Arc`s all work.
pub fn undecorate<T, D, I>(decorated: I) -> Vec<T>
where
    T: Clone,
    D: Deref<Target = Decorated<T>>,
    I: IntoIterator<Item = D>,
{
    decorated
        .into_iter()
        .map(|entry| entry.data().clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn annotations_round_trip_by_type() {
        let record = Decorated::new("peer-a");
        assert_eq!(record.get::<bool>("response"), None);
        assert!(!record.get_or("response", false));

        record.put("response", true);
        record.put("attempts", 3u32);
        assert_eq!(record.get::<bool>("response"), Some(true));
        assert_eq!(record.get::<u32>("attempts"), Some(3));
        assert!(record.contains("attempts"));
    }

    #[test]
    fn wrong_type_reads_as_absent() {
        let record = Decorated::new(1u8);
        record.put("requested", 42u64);
        assert_eq!(record.get::<bool>("requested"), None);
        assert_eq!(record.get_or::<u32>("requested", 7), 7);
        assert_eq!(record.get::<u64>("requested"), Some(42));
    }

    #[test]
    fn identity_ignores_annotations() {
        let a = Decorated::new("same");
        let b = Decorated::new("same");
        b.put("response", true);
        assert_eq!(a, b);

        let set: HashSet<Decorated<&str>> = decorate(["same", "same", "other"])
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn decorate_and_undecorate_preserve_order() {
        let wrapped = decorate(vec![3, 1, 2]);
        assert!(wrapped.iter().all(|entry| !entry.contains("requested")));
        assert_eq!(undecorate(wrapped.iter()), vec![3, 1, 2]);

        let shared: Vec<Arc<Decorated<i32>>> = wrapped.into_iter().map(Arc::new).collect();
        assert_eq!(undecorate(shared), vec![3, 1, 2]);
    }

    #[test]
    fn concurrent_reader_tolerates_writer() {
        let record = Arc::new(Decorated::new("peer"));
        thread::scope(|scope| {
            let writer = record.clone();
            scope.spawn(move || {
                for round in 0..1_000u32 {
                    writer.put("round", round);
                }
            });
            for _ in 0..1_000 {
                let seen = record.get_or("round", 0u32);
                assert!(seen < 1_000);
            }
        });
        assert_eq!(record.get::<u32>("round"), Some(999));
    }
}
