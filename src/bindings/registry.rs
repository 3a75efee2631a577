//! The host-owned table of live bindings.

use std::collections::BTreeMap;

use super::factory::BindingFactory;
use super::instance::BindingInstance;
use super::protocol::BindingId;
use super::value::ConfigMap;
use crate::core::{CallError, CallResult};
use crate::platform::{WindowKey, WindowSystem};

/// Live bindings by id.
///
/// Ids start at 1 and are never reused, so a stale id can always be told
/// apart from one that was never handed out.
pub struct BindingRegistry {
    next_id: u64,
    bindings: BTreeMap<BindingId, Box<dyn BindingInstance>>,
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            bindings: BTreeMap::new(),
        }
    }

    /// Constructs a binding and registers it.
    ///
    /// The id is only consumed when construction succeeds.
    pub fn create(
        &mut self,
        factory: &BindingFactory,
        type_tag: &str,
        config: &ConfigMap,
        windows: &mut dyn WindowSystem,
    ) -> CallResult<BindingId> {
        let id = BindingId(self.next_id);
        let instance = factory.create(id, type_tag, config, windows)?;
        self.next_id += 1;
        self.bindings.insert(id, instance);
        tracing::debug!(target: "exo::host", binding = %id, type_tag, "binding created");
        Ok(id)
    }

    /// Registers an already-constructed instance.
    pub fn insert(&mut self, instance: Box<dyn BindingInstance>) -> BindingId {
        let id = BindingId(self.next_id);
        self.next_id += 1;
        self.bindings.insert(id, instance);
        id
    }

    /// Looks up a live binding.
    ///
    /// Absent ids fail with `BindingGone` if they were ever allocated and
    /// `UnknownBinding` otherwise.
    pub fn lookup(&mut self, id: BindingId) -> CallResult<&mut Box<dyn BindingInstance>> {
        let allocated = id.0 >= 1 && id.0 < self.next_id;
        self.bindings.get_mut(&id).ok_or(if allocated {
            CallError::BindingGone(id)
        } else {
            CallError::UnknownBinding(id)
        })
    }

    /// Removes a binding and runs its dispose hook.
    pub fn dispose(&mut self, id: BindingId) -> Option<Box<dyn BindingInstance>> {
        let mut instance = self.bindings.remove(&id)?;
        instance.dispose();
        tracing::debug!(target: "exo::host", binding = %id, "binding disposed");
        Some(instance)
    }

    /// Disposes every binding, in id order.
    pub fn dispose_all(&mut self) -> Vec<BindingId> {
        let ids: Vec<BindingId> = self.bindings.keys().copied().collect();
        for id in &ids {
            self.dispose(*id);
        }
        ids
    }

    pub fn find_by_window(&self, key: WindowKey) -> Option<BindingId> {
        self.bindings
            .iter()
            .find(|(_, instance)| instance.window_key() == Some(key))
            .map(|(id, _)| *id)
    }

    pub fn contains(&self, id: BindingId) -> bool {
        self.bindings.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::HeadlessWindowSystem;

    fn registry_with_shell() -> (BindingRegistry, BindingFactory, HeadlessWindowSystem) {
        (
            BindingRegistry::new(),
            BindingFactory::with_defaults(),
            HeadlessWindowSystem::new(),
        )
    }

    #[test]
    fn test_lookup_errors() {
        let (mut registry, factory, mut windows) = registry_with_shell();
        let id = registry
            .create(&factory, "shell", &ConfigMap::new(), &mut windows)
            .unwrap();
        assert_eq!(id, BindingId(1));
        assert!(registry.lookup(id).is_ok());

        registry.dispose(id).unwrap();
        assert_eq!(registry.lookup(id).err(), Some(CallError::BindingGone(id)));
        assert_eq!(
            registry.lookup(BindingId(99)).err(),
            Some(CallError::UnknownBinding(BindingId(99)))
        );
        assert_eq!(
            registry.lookup(BindingId(0)).err(),
            Some(CallError::UnknownBinding(BindingId(0)))
        );
    }

    #[test]
    fn test_failed_create_does_not_consume_id() {
        let (mut registry, factory, mut windows) = registry_with_shell();
        assert!(registry
            .create(&factory, "nope", &ConfigMap::new(), &mut windows)
            .is_err());

        windows.fail_next_open("no display");
        assert!(registry
            .create(&factory, "shell", &ConfigMap::new(), &mut windows)
            .is_err());

        let id = registry
            .create(&factory, "shell", &ConfigMap::new(), &mut windows)
            .unwrap();
        assert_eq!(id, BindingId(1));
    }

    #[test]
    fn test_ids_never_reused() {
        let (mut registry, factory, mut windows) = registry_with_shell();
        let first = registry
            .create(&factory, "shell", &ConfigMap::new(), &mut windows)
            .unwrap();
        registry.dispose(first);
        let second = registry
            .create(&factory, "shell", &ConfigMap::new(), &mut windows)
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_find_by_window() {
        let (mut registry, factory, mut windows) = registry_with_shell();
        let id = registry
            .create(&factory, "shell", &ConfigMap::new(), &mut windows)
            .unwrap();
        let key = windows.keys()[0];
        assert_eq!(registry.find_by_window(key), Some(id));

        assert_eq!(registry.dispose_all(), vec![id]);
        assert!(registry.is_empty());
        assert!(windows.snapshot(key).unwrap().closed);
    }
}
