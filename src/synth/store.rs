//! Session-scoped registry of view classes.
//!
//! Views are looked up by full name or by any of their document paths. The
//! registry is bounded: once `capacity` views exist, the least recently used
//! one is evicted. Each view sits behind its own lock so edits to one view
//! are serialized while edits to different views proceed independently.
//!
//! Eviction forgets a view's documents but not its version history: the
//! highest version emitted per full name is kept, and a re-created view
//! continues from there so an emitted type name is never reused.
//!
//! The registry lock is never held while a view lock is taken by this
//! module, so callers may hold a view lock while calling [`ViewStore::reindex`]
//! or [`ViewStore::record_version`].

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::view::ViewClass;

pub type ViewHandle = Arc<Mutex<ViewClass>>;

/// Lookup keys of one view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewKeys {
    pub full_name: Option<String>,
    pub paths: Vec<PathBuf>,
}

impl ViewKeys {
    pub fn of(view: &ViewClass) -> Self {
        Self {
            full_name: Some(view.full_name()),
            paths: view.paths(),
        }
    }
}

pub struct ViewStore {
    inner: Mutex<Index>,
}

struct Index {
    views: LruCache<u64, ViewHandle>,
    keys: FxHashMap<u64, ViewKeys>,
    by_name: FxHashMap<String, u64>,
    by_path: FxHashMap<PathBuf, u64>,
    /// Highest emitted version per full name, kept across eviction.
    versions: FxHashMap<String, u64>,
    next_id: u64,
}

impl ViewStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Index {
                views: LruCache::new(capacity),
                keys: FxHashMap::default(),
                by_name: FxHashMap::default(),
                by_path: FxHashMap::default(),
                versions: FxHashMap::default(),
                next_id: 1,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_by_name(&self, full_name: &str) -> Option<ViewHandle> {
        self.find(Some(full_name), &[])
    }

    pub fn get_by_path(&self, path: &Path) -> Option<ViewHandle> {
        self.find(None, &[path])
    }

    /// Find a view by name first, then by each path in order.
    pub fn find(&self, full_name: Option<&str>, paths: &[&Path]) -> Option<ViewHandle> {
        let mut index = self.inner.lock();
        let id = index.lookup(full_name, paths)?;
        index.views.get(&id).cloned()
    }

    /// Find a view, creating it with `make` when none matches.
    ///
    /// `make` runs under the registry lock and must not touch the store.
    pub fn find_or_insert(
        &self,
        full_name: Option<&str>,
        paths: &[&Path],
        make: impl FnOnce() -> ViewClass,
    ) -> ViewHandle {
        let mut index = self.inner.lock();
        if let Some(id) = index.lookup(full_name, paths)
            && let Some(view) = index.views.get(&id)
        {
            return Arc::clone(view);
        }

        let mut view = make();
        let id = index.next_id;
        index.next_id += 1;
        view.id = id;
        view.version = view.version.max(index.last_version(&view.full_name()));

        let keys = ViewKeys::of(&view);
        let handle = Arc::new(Mutex::new(view));
        if let Some((evicted, _)) = index.views.push(id, Arc::clone(&handle))
            && evicted != id
        {
            crate::debug!("synth"; "evicted view #{}", evicted);
            index.forget(evicted);
        }
        index.assign(id, keys);
        handle
    }

    /// Replace the lookup keys of view `id` after its identity changed.
    ///
    /// A key held by another view moves to `id`.
    pub fn reindex(&self, id: u64, keys: ViewKeys) {
        let mut index = self.inner.lock();
        if !index.views.contains(&id) {
            return;
        }
        index.release(id);
        index.assign(id, keys);
    }

    /// Highest version ever emitted under `full_name`.
    pub fn last_version(&self, full_name: &str) -> u64 {
        self.inner.lock().last_version(full_name)
    }

    /// Remember that `full_name` was emitted at `version`.
    pub fn record_version(&self, full_name: &str, version: u64) {
        let mut index = self.inner.lock();
        let last = index.versions.entry(full_name.to_string()).or_default();
        *last = (*last).max(version);
    }
}

impl Index {
    fn last_version(&self, full_name: &str) -> u64 {
        self.versions.get(full_name).copied().unwrap_or(0)
    }

    fn lookup(&self, full_name: Option<&str>, paths: &[&Path]) -> Option<u64> {
        full_name
            .and_then(|name| self.by_name.get(name))
            .or_else(|| paths.iter().find_map(|p| self.by_path.get(*p)))
            .copied()
    }

    fn assign(&mut self, id: u64, keys: ViewKeys) {
        if let Some(name) = &keys.full_name
            && let Some(prev) = self.by_name.insert(name.clone(), id)
            && prev != id
            && let Some(other) = self.keys.get_mut(&prev)
        {
            other.full_name = None;
        }
        for path in &keys.paths {
            if let Some(prev) = self.by_path.insert(path.clone(), id)
                && prev != id
                && let Some(other) = self.keys.get_mut(&prev)
            {
                other.paths.retain(|p| p != path);
            }
        }
        self.keys.insert(id, keys);
    }

    /// Drop every key still pointing at `id`.
    fn release(&mut self, id: u64) {
        let Some(keys) = self.keys.remove(&id) else {
            return;
        };
        if let Some(name) = keys.full_name
            && self.by_name.get(&name) == Some(&id)
        {
            self.by_name.remove(&name);
        }
        for path in keys.paths {
            if self.by_path.get(&path) == Some(&id) {
                self.by_path.remove(&path);
            }
        }
    }

    fn forget(&mut self, id: u64) {
        self.release(id);
        self.views.pop(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(name: &str, markup: &str) -> ViewClass {
        ViewClass {
            markup_path: Some(PathBuf::from(markup)),
            ..ViewClass::new(name, Some("Demo".into()))
        }
    }

    #[test]
    fn test_find_or_insert_reuses_view() {
        let store = ViewStore::new(8);
        let a = store.find_or_insert(Some("Demo.A"), &[], || view("A", "A.xaml"));
        let b = store.find_or_insert(None, &[Path::new("A.xaml")], || view("X", "X.xaml"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_lookup_by_name_and_path() {
        let store = ViewStore::new(8);
        store.find_or_insert(None, &[], || view("A", "A.xaml"));

        assert!(store.get_by_name("Demo.A").is_some());
        assert!(store.get_by_path(Path::new("A.xaml")).is_some());
        assert!(store.get_by_name("Demo.B").is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let store = ViewStore::new(2);
        store.find_or_insert(None, &[], || view("A", "A.xaml"));
        store.find_or_insert(None, &[], || view("B", "B.xaml"));

        // touch A so B becomes least recently used
        store.get_by_name("Demo.A");
        store.find_or_insert(None, &[], || view("C", "C.xaml"));

        assert_eq!(store.len(), 2);
        assert!(store.get_by_name("Demo.A").is_some());
        assert!(store.get_by_name("Demo.B").is_none());
        assert!(store.get_by_path(Path::new("B.xaml")).is_none());
        assert!(store.get_by_name("Demo.C").is_some());
    }

    #[test]
    fn test_version_history_survives_eviction() {
        let store = ViewStore::new(1);
        let a = store.find_or_insert(None, &[], || view("A", "A.xaml"));
        a.lock().version = 3;
        store.record_version("Demo.A", 3);

        store.find_or_insert(None, &[], || view("B", "B.xaml"));
        assert!(store.get_by_name("Demo.A").is_none());

        let again = store.find_or_insert(Some("Demo.A"), &[], || view("A", "A.xaml"));
        assert!(!Arc::ptr_eq(&a, &again));
        assert_eq!(again.lock().version, 3);
        assert_eq!(store.last_version("Demo.B"), 0);
    }

    #[test]
    fn test_reindex_renames_view() {
        let store = ViewStore::new(8);
        let handle = store.find_or_insert(None, &[], || view("A", "A.xaml"));
        let id = {
            let mut v = handle.lock();
            v.class_name = "Renamed".into();
            v.behavior_path = Some(PathBuf::from("A.xaml.cs"));
            store.reindex(v.id, ViewKeys::of(&v));
            v.id
        };

        assert!(store.get_by_name("Demo.A").is_none());
        let found = store.get_by_name("Demo.Renamed").unwrap();
        assert_eq!(found.lock().id, id);
        assert!(store.get_by_path(Path::new("A.xaml.cs")).is_some());
    }

    #[test]
    fn test_reindex_moves_contested_key() {
        let store = ViewStore::new(8);
        store.find_or_insert(None, &[], || view("Card", "Card.xaml"));
        let b = store.find_or_insert(None, &[], || view("Other", "Other.xaml"));

        let id = b.lock().id;
        store.reindex(
            id,
            ViewKeys {
                full_name: Some("Demo.Card".into()),
                paths: vec![PathBuf::from("Other.xaml")],
            },
        );

        let found = store.get_by_name("Demo.Card").unwrap();
        assert!(Arc::ptr_eq(&found, &b));
        assert!(store.get_by_path(Path::new("Card.xaml")).is_some());
    }
}
