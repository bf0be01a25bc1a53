//! Named per-worker singletons.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Late-bound services looked up by name, owned by one worker.
///
/// Values are reference counted so a handler can hold one across a yield
/// without keeping the registry borrowed.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RefCell<HashMap<String, Rc<dyn Any>>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `name`, returning the service it replaced.
    pub fn register<T: 'static>(&self, name: &str, value: T) -> Option<Rc<dyn Any>> {
        self.services
            .borrow_mut()
            .insert(name.to_string(), Rc::new(value))
    }

    /// Look up a service by name and type.
    ///
    /// Returns `None` if nothing is registered under `name` or the service is
    /// not a `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        let service = self.services.borrow().get(name).cloned()?;
        service.downcast::<T>().ok()
    }

    /// Check whether a service is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.borrow().contains_key(name)
    }

    /// Remove a service.
    pub fn remove(&self, name: &str) -> Option<Rc<dyn Any>> {
        self.services.borrow_mut().remove(name)
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.borrow().len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.borrow().is_empty()
    }
}
