// src/expr/scope.rs

//! Variable scope of a STAX-Thread.
//!
//! A `Scope` is a handle: cloning it shares the same variables (used by the
//! finally thread, which must see and update its parent's variables), while
//! [`Scope::fork`] makes an independent copy (used for every other child
//! thread and for functions with `scope = "local"`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Value;

#[derive(Clone, Default)]
pub struct Scope {
    vars: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("vars", &self.guard().len())
            .finish()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.vars.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.guard().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.guard().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.guard().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.guard().contains_key(name)
    }

    /// Copy of every variable, in name order.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.guard().clone()
    }

    /// Independent copy of this scope.
    pub fn fork(&self) -> Scope {
        Scope {
            vars: Arc::new(Mutex::new(self.snapshot())),
        }
    }

    /// True if both handles refer to the same variables.
    pub fn shares_with(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.vars, &other.vars)
    }
}
