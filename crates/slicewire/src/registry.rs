// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Factory registry consulted by decoders.
//!
//! A [`FactoryRegistry`] maps type ids to constructors for class instances
//! and user exceptions, and compact (numeric) type ids to type id strings.
//! It is populated by the owning application at startup, shared (typically
//! as `Arc<FactoryRegistry>`) with every decoding thread, passed by reference
//! into each [`InputStream`](crate::input::InputStream), and torn down with
//! [`FactoryRegistry::clear`]. Decoders only ever read from it.
//!
//! # Thread Safety
//!
//! - Factory tables: `DashMap` (lock-free reads, sharded writes)
//! - Compact-id resolver: `parking_lot::RwLock` (swapped rarely, read per lookup)
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(FactoryRegistry::new());
//! registry.register_value::<Node>("::Demo::Node")?;
//! registry.register_compact_id(7, "::Demo::Node");
//!
//! let mut input = InputStream::new(bytes, &registry);
//! ```

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Error, HookError, Result};
use crate::exception::UserException;
use crate::value::Value;

/// Creates an instance for a type id, or declines with `None`.
pub type ValueFactory = Arc<dyn Fn(&str) -> Option<Box<dyn Value>> + Send + Sync>;

/// Creates an exception for a type id, or declines with `None`.
pub type ExceptionFactory = Arc<dyn Fn(&str) -> Option<Box<dyn UserException>> + Send + Sync>;

/// External translation of compact type ids.
pub trait CompactIdResolver: Send + Sync {
    /// Type id for `compact_id`, `None` (or an empty string) when unknown.
    fn resolve(&self, compact_id: i32) -> core::result::Result<Option<String>, HookError>;
}

impl<F> CompactIdResolver for F
where
    F: Fn(i32) -> Option<String> + Send + Sync,
{
    fn resolve(&self, compact_id: i32) -> core::result::Result<Option<String>, HookError> {
        Ok(self(compact_id))
    }
}

const VALUE_KIND: &str = "value";
const EXCEPTION_KIND: &str = "exception";

/// Type id under which the catch-all value factory is registered.
pub const DEFAULT_FACTORY_ID: &str = "";

/// Type id → factory tables plus compact-id translation.
#[derive(Default)]
pub struct FactoryRegistry {
    values: DashMap<String, ValueFactory>,
    exceptions: DashMap<String, ExceptionFactory>,
    compact_ids: DashMap<i32, String>,
    resolver: RwLock<Option<Arc<dyn CompactIdResolver>>>,
}

impl FactoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value factory; fails if `type_id` already has one.
    pub fn add_value_factory(&self, type_id: &str, factory: ValueFactory) -> Result<()> {
        match self.values.entry(type_id.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyRegistered {
                kind: VALUE_KIND,
                id: type_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                Ok(())
            }
        }
    }

    /// Register `T::default()` as the factory for `type_id`.
    pub fn register_value<T: Value + Default>(&self, type_id: &str) -> Result<()> {
        let factory = |_: &str| -> Option<Box<dyn Value>> { Some(Box::new(T::default())) };
        self.add_value_factory(type_id, Arc::new(factory))
    }

    /// Register the catch-all factory tried after the type-specific one.
    pub fn add_default_value_factory(&self, factory: ValueFactory) -> Result<()> {
        self.add_value_factory(DEFAULT_FACTORY_ID, factory)
    }

    pub fn remove_value_factory(&self, type_id: &str) -> Result<()> {
        self.values
            .remove(type_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotRegistered {
                kind: VALUE_KIND,
                id: type_id.to_string(),
            })
    }

    pub fn find_value_factory(&self, type_id: &str) -> Option<ValueFactory> {
        self.values.get(type_id).map(|f| Arc::clone(f.value()))
    }

    /// Instantiate `type_id`: the type-specific factory first, then the catch-all.
    pub fn new_value(&self, type_id: &str) -> Option<Box<dyn Value>> {
        if let Some(factory) = self.find_value_factory(type_id) {
            if let Some(value) = factory(type_id) {
                return Some(value);
            }
        }
        self.find_value_factory(DEFAULT_FACTORY_ID)
            .and_then(|factory| factory(type_id))
    }

    /// Register an exception factory; fails if `type_id` already has one.
    pub fn add_exception_factory(&self, type_id: &str, factory: ExceptionFactory) -> Result<()> {
        match self.exceptions.entry(type_id.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyRegistered {
                kind: EXCEPTION_KIND,
                id: type_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                Ok(())
            }
        }
    }

    /// Register `T::default()` as the factory for exception `type_id`.
    pub fn register_exception<T: UserException + Default>(&self, type_id: &str) -> Result<()> {
        let factory =
            |_: &str| -> Option<Box<dyn UserException>> { Some(Box::new(T::default())) };
        self.add_exception_factory(type_id, Arc::new(factory))
    }

    pub fn remove_exception_factory(&self, type_id: &str) -> Result<()> {
        self.exceptions
            .remove(type_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotRegistered {
                kind: EXCEPTION_KIND,
                id: type_id.to_string(),
            })
    }

    pub fn find_exception_factory(&self, type_id: &str) -> Option<ExceptionFactory> {
        self.exceptions.get(type_id).map(|f| Arc::clone(f.value()))
    }

    /// Map a compact id to its type id in the static table.
    pub fn register_compact_id(&self, compact_id: i32, type_id: &str) {
        self.compact_ids.insert(compact_id, type_id.to_string());
    }

    /// Install (or remove) the external compact-id resolver.
    pub fn set_compact_id_resolver(&self, resolver: Option<Arc<dyn CompactIdResolver>>) {
        *self.resolver.write() = resolver;
    }

    /// Translate a compact id: external resolver first, static table second.
    pub fn resolve_compact_id(&self, compact_id: i32) -> Result<Option<String>> {
        let resolver = self.resolver.read().clone();
        if let Some(resolver) = resolver {
            let resolved = resolver.resolve(compact_id).map_err(|e| {
                Error::marshal(format!(
                    "exception in compact id resolver for ID {}:\n{}",
                    compact_id, e
                ))
            })?;
            if let Some(type_id) = resolved.filter(|id| !id.is_empty()) {
                return Ok(Some(type_id));
            }
        }
        Ok(self.compact_ids.get(&compact_id).map(|id| id.value().clone()))
    }

    pub fn value_factory_count(&self) -> usize {
        self.values.len()
    }

    pub fn exception_factory_count(&self) -> usize {
        self.exceptions.len()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.values.clear();
        self.exceptions.clear();
        self.compact_ids.clear();
        *self.resolver.write() = None;
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("values", &self.values.len())
            .field("exceptions", &self.exceptions.len())
            .field("compact_ids", &self.compact_ids.len())
            .field("resolver", &self.resolver.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::UnknownSlicedValue;

    fn placeholder_factory(tag: &'static str) -> ValueFactory {
        Arc::new(move |_: &str| -> Option<Box<dyn Value>> {
            Some(Box::new(UnknownSlicedValue::new(tag)))
        })
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = FactoryRegistry::new();
        registry
            .add_value_factory("::Demo::A", placeholder_factory("a"))
            .expect("first registration should succeed");
        let err = registry
            .add_value_factory("::Demo::A", placeholder_factory("a"))
            .unwrap_err();
        assert_eq!(
            err,
            Error::AlreadyRegistered {
                kind: "value",
                id: "::Demo::A".into()
            }
        );
    }

    #[test]
    fn test_specific_then_default_factory() {
        let registry = FactoryRegistry::new();
        registry
            .add_value_factory("::Demo::A", placeholder_factory("specific"))
            .expect("register");
        registry
            .add_default_value_factory(placeholder_factory("fallback"))
            .expect("register default");

        let a = registry.new_value("::Demo::A").expect("specific factory");
        assert_eq!(a.ice_id(), "specific");
        let b = registry.new_value("::Demo::B").expect("default factory");
        assert_eq!(b.ice_id(), "fallback");

        registry.remove_value_factory("").expect("remove default");
        assert!(registry.new_value("::Demo::B").is_none());
        assert!(registry.remove_value_factory("").is_err());
    }

    #[test]
    fn test_compact_id_resolution_order() {
        let registry = FactoryRegistry::new();
        registry.register_compact_id(3, "::Demo::FromTable");
        registry.register_compact_id(4, "::Demo::Four");
        assert_eq!(
            registry.resolve_compact_id(3).expect("resolve"),
            Some("::Demo::FromTable".to_string())
        );

        let resolver = |id: i32| (id == 3).then(|| "::Demo::FromResolver".to_string());
        registry.set_compact_id_resolver(Some(Arc::new(resolver)));
        assert_eq!(
            registry.resolve_compact_id(3).expect("resolve"),
            Some("::Demo::FromResolver".to_string())
        );
        // Resolver declines; static table answers.
        assert_eq!(
            registry.resolve_compact_id(4).expect("resolve"),
            Some("::Demo::Four".to_string())
        );
        assert_eq!(registry.resolve_compact_id(9).expect("resolve"), None);
    }

    #[test]
    fn test_failing_resolver_is_marshal_error() {
        struct Failing;
        impl CompactIdResolver for Failing {
            fn resolve(&self, _: i32) -> core::result::Result<Option<String>, HookError> {
                Err("resolver offline".into())
            }
        }

        let registry = FactoryRegistry::new();
        registry.set_compact_id_resolver(Some(Arc::new(Failing)));
        match registry.resolve_compact_id(1) {
            Err(Error::Marshal(reason)) => assert!(reason.contains("resolver offline")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_clear_tears_everything_down() {
        let registry = FactoryRegistry::new();
        registry
            .add_value_factory("::Demo::A", placeholder_factory("a"))
            .expect("register");
        registry.register_compact_id(1, "::Demo::A");
        registry.clear();
        assert_eq!(registry.value_factory_count(), 0);
        assert_eq!(registry.resolve_compact_id(1).expect("resolve"), None);
    }

    #[test]
    fn test_shared_across_threads() {
        let registry = Arc::new(FactoryRegistry::new());
        registry
            .add_value_factory("::Demo::A", placeholder_factory("a"))
            .expect("register");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.new_value("::Demo::A").is_some())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("thread should not panic"));
        }
    }
}
