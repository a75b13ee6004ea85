use crate::di::{Container, Injectable, Lifetime};
use crate::error::Result;
use crate::interceptor::Interceptor;
use std::sync::Arc;

/// Builder for constructing a dependency injection container
///
/// Use this to configure and register services and interceptors before
/// building the final shared container.
///
/// # Example
/// ```
/// use callweave::prelude::*;
/// use std::sync::Arc;
///
/// let container = ContainerBuilder::new()
///     .provide::<dyn CacheStore>(Arc::new(MemoryCacheStore::new()))
///     .injectable::<CacheInterceptor>(Lifetime::Singleton)
///     .injectable::<LogInterceptor>(Lifetime::Transient)
///     .build();
/// assert!(container.contains::<dyn CacheStore>());
/// ```
#[derive(Default)]
pub struct ContainerBuilder {
    container: Container,
}

impl ContainerBuilder {
    /// Create a new container builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service instance
    pub fn register<T: 'static + Send + Sync>(mut self, instance: T) -> Self {
        self.container.register(instance);
        self
    }

    /// Register a shared service, typically an `Arc<dyn Trait>`
    pub fn provide<T: ?Sized + 'static + Send + Sync>(mut self, instance: Arc<T>) -> Self {
        self.container.provide(instance);
        self
    }

    /// Register an interceptor with an explicit constructor
    pub fn interceptor<I, F>(mut self, lifetime: Lifetime, constructor: F) -> Self
    where
        I: Interceptor,
        F: Fn(&Container) -> Result<I> + Send + Sync + 'static,
    {
        self.container.add_interceptor(lifetime, constructor);
        self
    }

    /// Register an interceptor built through its [`Injectable`] impl
    pub fn injectable<I: Interceptor + Injectable>(self, lifetime: Lifetime) -> Self {
        self.interceptor(lifetime, I::inject)
    }

    /// Register a ready-made shared interceptor
    pub fn singleton<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.container.add_singleton(interceptor);
        self
    }

    /// Build the container
    pub fn build(self) -> Arc<Container> {
        Arc::new(self.container)
    }
}
