use std::sync::Arc;

use crate::resources::{Meta, ObjectKey};

/// Cached objects keyed by `namespace/name`, kept in sorted order for cheap namespace scans and
/// deterministic iteration. Cloning is O(1), so snapshots can be handed out freely.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resources<T>(imbl::OrdMap<ObjectKey, Arc<T>>);

impl<T> Default for Resources<T> {
    fn default() -> Self {
        Self(Default::default())
    }
}

impl<T: Meta + Clone> Resources<T> {
    /// Insert or replace the object stored under its key, returning the previous one.
    pub fn upsert(&mut self, res: T) -> Option<Arc<T>> {
        self.0.insert(res.key(), Arc::new(res))
    }

    pub fn remove(&mut self, key: &ObjectKey) -> Option<Arc<T>> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&T> {
        self.0.get(key).map(|r| r.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.values().map(|r| r.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.0.keys()
    }

    pub fn in_namespace<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.0
            .range(ObjectKey::new(namespace, "")..)
            .take_while(move |(k, _)| k.namespace == namespace)
            .map(|(_, r)| r.as_ref())
    }

    /// The object in `namespace` whose metadata carries `uid`.
    pub fn with_uid<'a>(&'a self, namespace: &'a str, uid: &str) -> Option<&'a T> {
        self.in_namespace(namespace)
            .find(|r| !uid.is_empty() && r.metadata().uid == uid)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Meta + Clone> FromIterator<T> for Resources<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut rv = Resources::default();
        for v in iter {
            rv.upsert(v);
        }
        rv
    }
}
