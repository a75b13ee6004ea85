use crate::config::DecoratorOptions;
use crate::di::Container;
use crate::error::{BoxError, CallerError, CallweaveError, Result};
use crate::interceptor::{
    Arguments, Decorated, Interceptable, Interceptor, InterceptorKey, Invoker, MethodChain,
    MethodDecoratorMap, Returnable,
};
use crate::worker::WorkerPool;
use futures::future::BoxFuture;
use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

/// Builds the interceptor instance for a declared interceptor type
pub type InterceptorFactory =
    Arc<dyn Fn(InterceptorKey) -> std::result::Result<Arc<dyn Interceptor>, BoxError> + Send + Sync>;

/// Produces intercepting proxies for target objects.
///
/// A decorator is created once per process (or per container) and used once
/// per target object. Each `decorate` call resolves the interceptors the
/// target's declarations name, reusing one instance per interceptor type, and
/// freezes them into per-method chains.
///
/// # Example
/// ```
/// use callweave::prelude::*;
/// use std::sync::Arc;
///
/// struct Greeter;
///
/// impl Decorated for Greeter {
///     fn declare(declarations: &mut DeclarationBuilder) {
///         declarations.method("greet", [Declaration::of::<LogInterceptor>()]);
///     }
/// }
///
/// let container = ContainerBuilder::new()
///     .injectable::<LogInterceptor>(Lifetime::Singleton)
///     .build();
/// let decorator = Decorator::builder().container(&container).build().unwrap();
///
/// let greeter = decorator.decorate(Arc::new(Greeter)).unwrap();
/// let greeting: Result<String, CallweaveError> =
///     greeter.call_blocking("greet", Arguments::new, |_| Ok("hello".to_string()));
/// assert_eq!(greeting.unwrap(), "hello");
/// ```
#[derive(Clone)]
pub struct Decorator {
    factory: InterceptorFactory,
    map: Arc<MethodDecoratorMap>,
    worker: WorkerPool,
}

impl Decorator {
    pub fn builder() -> DecoratorBuilder {
        DecoratorBuilder::default()
    }

    /// Decorator over the global method map and the shared worker pool
    pub fn new(factory: InterceptorFactory) -> Result<Self> {
        Self::builder().factory(factory).build()
    }

    pub fn map(&self) -> &Arc<MethodDecoratorMap> {
        &self.map
    }

    /// Resolves the per-method chains of `T`.
    ///
    /// Every interceptor type is requested from the factory at most once per
    /// call, so methods sharing an interceptor share its instance.
    pub fn invoker_for<T: Decorated>(&self) -> Result<Invoker> {
        let table = self.map.get::<T>();
        let mut resolved: HashMap<TypeId, Arc<dyn Interceptor>> = HashMap::new();
        let mut chains = HashMap::with_capacity(table.len());

        for (name, declarations) in table.methods() {
            let mut interceptors = Vec::with_capacity(declarations.len());
            for declaration in declarations.iter() {
                let key = declaration.interceptor();
                let instance = match resolved.entry(key.id()) {
                    Entry::Occupied(entry) => Arc::clone(entry.get()),
                    Entry::Vacant(entry) => {
                        let instance = (self.factory)(key).map_err(|e| construction_error(key, e))?;
                        Arc::clone(entry.insert(instance))
                    }
                };
                interceptors.push(instance);
            }
            chains.insert(name, MethodChain::new(interceptors, Arc::clone(declarations)));
        }

        tracing::debug!(
            "Resolved {} interceptors across {} methods of {}",
            resolved.len(),
            chains.len(),
            table.type_name()
        );

        Ok(Invoker::new(table.type_name(), chains, self.worker.clone()))
    }

    /// Wraps a concrete target
    pub fn decorate<T: Decorated>(&self, target: Arc<T>) -> Result<Proxy<T>> {
        let invoker = self.invoker_for::<T>()?;
        Ok(Proxy { target, invoker })
    }

    /// Wraps a concrete target behind one of its `#[interceptable]` traits
    ///
    /// `cast` is the unsizing coercion, usually `|target| target`. Fails when
    /// `T` does not register every method of the trait, typically because its
    /// declarations lack `implements::<dyn Trait>()`.
    pub fn decorate_as<I, T, F>(&self, target: Arc<T>, cast: F) -> Result<Arc<I>>
    where
        I: ?Sized + Interceptable,
        T: Decorated,
        F: FnOnce(Arc<T>) -> Arc<I>,
    {
        let invoker = self.invoker_for::<T>()?;
        if let Some(missing) = I::methods().iter().find(|method| !invoker.knows(method)) {
            return Err(CallweaveError::UnknownMethod {
                type_name: invoker.type_name().to_string(),
                method: missing.to_string(),
            });
        }
        tracing::debug!(
            "Creating {} proxy over {}",
            I::interface_name(),
            invoker.type_name()
        );
        Ok(I::create_proxy(cast(target), invoker))
    }
}

fn construction_error(key: InterceptorKey, error: BoxError) -> CallweaveError {
    match error.downcast::<CallweaveError>() {
        Ok(own) => *own,
        Err(source) => CallweaveError::InterceptorConstruction {
            type_name: key.name().to_string(),
            source,
        },
    }
}

#[derive(Default)]
pub struct DecoratorBuilder {
    factory: Option<InterceptorFactory>,
    map: Option<Arc<MethodDecoratorMap>>,
    worker: Option<WorkerPool>,
    options: Option<DecoratorOptions>,
}

impl DecoratorBuilder {
    pub fn factory(mut self, factory: InterceptorFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Uses the container's interceptor registrations, and its
    /// `DecoratorOptions` when one is registered
    pub fn container(mut self, container: &Arc<Container>) -> Self {
        self.factory = Some(container.factory());
        if self.options.is_none() {
            self.options = container
                .resolve::<DecoratorOptions>()
                .ok()
                .map(|options| options.as_ref().clone());
        }
        self
    }

    /// Method map to read declarations from; defaults to the global one
    pub fn map(mut self, map: Arc<MethodDecoratorMap>) -> Self {
        self.map = Some(map);
        self
    }

    pub fn worker(mut self, worker: WorkerPool) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn options(mut self, options: DecoratorOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn build(self) -> Result<Decorator> {
        let factory = self.factory.ok_or(CallweaveError::FactoryNotConfigured)?;
        let worker = match (self.worker, self.options) {
            (Some(worker), _) => worker,
            (None, Some(options)) => WorkerPool::new(options.worker_threads)?,
            (None, None) => WorkerPool::shared()?,
        };
        Ok(Decorator {
            factory,
            map: self.map.unwrap_or_else(MethodDecoratorMap::global),
            worker,
        })
    }
}

/// A decorated concrete target.
///
/// Dereferences to the target for plain access; intercepted methods are
/// called through [`call`](Self::call), [`call_unit`](Self::call_unit) or
/// [`call_blocking`](Self::call_blocking) with the method's declared name.
pub struct Proxy<T> {
    target: Arc<T>,
    invoker: Invoker,
}

impl<T: Send + Sync + 'static> Proxy<T> {
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn call_blocking<R, E, A, F>(&self, method: &'static str, arguments: A, f: F) -> std::result::Result<R, E>
    where
        R: Returnable,
        E: CallerError,
        A: FnOnce() -> Arguments,
        F: Fn(&T) -> std::result::Result<R, E> + Send + Sync,
    {
        let target = self.target.as_ref();
        self.invoker
            .invoke_blocking(method, arguments, move || f(target))
    }

    pub async fn call<'a, R, E, A, F, Fut>(
        &'a self,
        method: &'static str,
        arguments: A,
        f: F,
    ) -> std::result::Result<R, E>
    where
        R: Returnable,
        E: CallerError,
        A: FnOnce() -> Arguments + Send,
        F: Fn(&'a T) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'a,
    {
        let target = self.target.as_ref();
        self.invoker
            .invoke_async(method, arguments, move || f(target))
            .await
    }

    pub fn call_unit<'a, E, A, F, Fut>(
        &'a self,
        method: &'static str,
        arguments: A,
        f: F,
    ) -> std::result::Result<BoxFuture<'a, std::result::Result<(), E>>, E>
    where
        E: CallerError,
        A: FnOnce() -> Arguments,
        F: Fn(&'a T) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'a,
    {
        let target = self.target.as_ref();
        self.invoker
            .invoke_async_unit(method, arguments, move || f(target))
    }
}

impl<T> Deref for Proxy<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

impl<T> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            invoker: self.invoker.clone(),
        }
    }
}
