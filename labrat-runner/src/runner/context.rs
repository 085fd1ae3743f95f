// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{any::Any, cell::RefCell, collections::HashMap, fmt, rc::Rc};

/// A typed map shared by the hooks and tests of one experiment.
///
/// Every experiment gets its own context when it starts running, forked from its parent's context
/// at that point. Values inserted by a `before` hook are therefore visible to the experiment's
/// tests and to its child experiments, but values inserted inside a child experiment never leak
/// back to the parent.
///
/// `Context` is cheap to clone: clones refer to the same map.
#[derive(Clone, Default)]
pub struct Context {
    values: Rc<RefCell<HashMap<String, Rc<dyn Any>>>>,
}

impl Context {
    /// Creates a new, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value for the key.
    pub fn insert<T: 'static>(&self, key: impl Into<String>, value: T) {
        self.values.borrow_mut().insert(key.into(), Rc::new(value));
    }

    /// Returns the value for `key`, if present and of type `T`.
    pub fn get<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        let value = self.values.borrow().get(key).cloned()?;
        value.downcast().ok()
    }

    /// Removes the value for `key`. Returns true if a value was present.
    pub fn remove(&self, key: &str) -> bool {
        self.values.borrow_mut().remove(key).is_some()
    }

    /// Returns true if the context has a value for `key`, of any type.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.borrow().contains_key(key)
    }

    /// Returns a new context holding the same values. Values themselves are shared, not cloned.
    pub(crate) fn fork(&self) -> Self {
        Self {
            values: Rc::new(RefCell::new(self.values.borrow().clone())),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.borrow();
        let mut keys: Vec<_> = values.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}
