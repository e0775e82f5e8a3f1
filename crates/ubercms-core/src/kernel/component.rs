use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::error::Result;

/// Lifecycle shared by every kernel component.
#[async_trait]
pub trait KernelComponent: Any + Send + Sync + Debug {
    fn name(&self) -> &'static str;
    async fn initialize(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Components keyed by the TypeId of their concrete type.
#[derive(Default, Debug)]
pub struct DependencyRegistry {
    instances: HashMap<TypeId, Arc<dyn KernelComponent>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self {
            instances: HashMap::new(),
        }
    }

    /// Register `instance` under its concrete type, replacing any previous one.
    pub fn register_instance<V>(&mut self, instance: Arc<V>)
    where
        V: KernelComponent + 'static,
    {
        self.instances.insert(TypeId::of::<V>(), instance);
    }

    pub fn get_component_by_id(&self, type_id: &TypeId) -> Option<Arc<dyn KernelComponent>> {
        self.instances.get(type_id).cloned()
    }

    /// Look up a component by concrete type.
    pub fn get_concrete<T: KernelComponent + 'static>(&self) -> Option<Arc<T>> {
        self.instances.get(&TypeId::of::<T>()).and_then(|component| {
            let any: Arc<dyn Any + Send + Sync> = component.clone();
            Arc::downcast::<T>(any).ok()
        })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
