//! Typed per-container state registry.
//!
//! Subsystems attach their own state to a [`ServiceContext`] or an
//! [`OperationContext`] without the runtime crate depending on them. A
//! decoration is keyed by its Rust type: one value of each type per
//! container, created lazily on first access.
//!
//! Two containers never share decorations, which is what gives tests
//! per-service isolation: each `ServiceContext` gets its own session
//! catalog, its own routers, and so on.
//!
//! [`ServiceContext`]: crate::ServiceContext
//! [`OperationContext`]: crate::OperationContext

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A typed state registry attached to a context.
///
/// Values are stored as `Arc<T>`; readers get a clone of the `Arc`, so a
/// decoration outlives removal as long as someone still holds it.
#[derive(Default)]
pub struct Decorations {
    slots: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Decorations {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the decoration of type `T`, if one has been attached.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let slots = self.slots.read().expect("decoration registry poisoned");
        slots
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Returns the decoration of type `T`, creating it with `init` if it
    /// has not been attached yet.
    pub fn get_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>() {
            return existing;
        }

        let mut slots = self.slots.write().expect("decoration registry poisoned");
        // Re-check: another thread may have initialized between the read
        // and the write lock.
        if let Some(existing) = slots.get(&TypeId::of::<T>()) {
            if let Ok(typed) = Arc::clone(existing).downcast::<T>() {
                return typed;
            }
        }
        let value = Arc::new(init());
        slots.insert(TypeId::of::<T>(), Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        value
    }

    /// Attaches `value` as the decoration of type `T`, replacing any
    /// previous value.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut slots = self.slots.write().expect("decoration registry poisoned");
        slots.insert(TypeId::of::<T>(), Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        value
    }

    /// Removes the decoration of type `T`, returning it if present.
    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut slots = self.slots.write().expect("decoration registry poisoned");
        slots
            .remove(&TypeId::of::<T>())
            .and_then(|any| any.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for Decorations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read().expect("decoration registry poisoned");
        f.debug_struct("Decorations").field("count", &slots.len()).finish()
    }
}
