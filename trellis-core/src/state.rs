//! Application-wide shared state.
//!
//! [`AppState`] is a type-keyed map of `Arc` values attached to a router with
//! [`Router::with_state`](crate::Router::with_state). Every request context
//! holds a cheap clone of it, so handlers reach shared resources through
//! [`Context::state`](crate::Context::state) or the
//! [`State`](crate::extractor::State) extractor.
//!
//! One value is stored per type. Wrap values in distinct newtypes when two of
//! the same underlying type are needed.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

type Entry = Arc<dyn Any + Send + Sync>;

/// Type-keyed shared state. Clones share the same storage.
#[derive(Clone, Default)]
pub struct AppState {
    values: Arc<DashMap<TypeId, Entry>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any earlier value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.values.insert(TypeId::of::<T>(), value);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<T: Send + Sync + 'static>(self, value: Arc<T>) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let entry = self.values.get(&TypeId::of::<T>())?.value().clone();
        entry.downcast::<T>().ok()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let (_, entry) = self.values.remove(&TypeId::of::<T>())?;
        entry.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").field("len", &self.len()).finish()
    }
}
