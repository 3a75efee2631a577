//! Binding construction by type tag.

use std::collections::BTreeMap;

use super::instance::BindingInstance;
use super::protocol::BindingId;
use super::shell::ShellBinding;
use super::value::ConfigMap;
use crate::core::{CallError, CallResult};
use crate::platform::WindowSystem;

/// Builds one kind of binding from its configuration map.
pub trait BindingConstructor {
    fn construct(
        &self,
        id: BindingId,
        config: &ConfigMap,
        windows: &mut dyn WindowSystem,
    ) -> CallResult<Box<dyn BindingInstance>>;
}

impl<F> BindingConstructor for F
where
    F: Fn(BindingId, &ConfigMap, &mut dyn WindowSystem) -> CallResult<Box<dyn BindingInstance>>,
{
    fn construct(
        &self,
        id: BindingId,
        config: &ConfigMap,
        windows: &mut dyn WindowSystem,
    ) -> CallResult<Box<dyn BindingInstance>> {
        self(id, config, windows)
    }
}

/// Maps type tags to constructors.
#[derive(Default)]
pub struct BindingFactory {
    constructors: BTreeMap<String, Box<dyn BindingConstructor>>,
}

impl BindingFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that knows the built-in `"shell"` window binding.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(ShellBinding::TYPE_TAG, ShellBinding::create);
        factory
    }

    /// Registers (or replaces) the constructor for `type_tag`.
    pub fn register<C>(&mut self, type_tag: impl Into<String>, constructor: C)
    where
        C: BindingConstructor + 'static,
    {
        self.constructors
            .insert(type_tag.into(), Box::new(constructor));
    }

    pub fn create(
        &self,
        id: BindingId,
        type_tag: &str,
        config: &ConfigMap,
        windows: &mut dyn WindowSystem,
    ) -> CallResult<Box<dyn BindingInstance>> {
        let constructor = self
            .constructors
            .get(type_tag)
            .ok_or_else(|| CallError::Init(format!("unknown binding type '{type_tag}'")))?;
        constructor.construct(id, config, windows)
    }

    pub fn type_tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
