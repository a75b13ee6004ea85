use crate::decorator::InterceptorFactory;
use crate::error::{BoxError, CallweaveError, Result};
use crate::interceptor::{Interceptor, InterceptorKey};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock};

/// How long an interceptor instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Lifetime {
    /// One instance shared by every decorator using this container
    Singleton,
    /// A fresh instance each time the factory is asked
    Transient,
}

type Constructor =
    Arc<dyn Fn(&Container) -> Result<Arc<dyn Interceptor>> + Send + Sync>;

#[derive(Clone)]
struct InterceptorRegistration {
    name: &'static str,
    lifetime: Lifetime,
    constructor: Constructor,
    instance: Arc<OnceLock<Arc<dyn Interceptor>>>,
}

#[derive(Clone)]
struct ServiceEntry {
    /// Holds an `Arc<T>`, so unsized services resolve the same way as sized ones
    instance: Arc<dyn Any + Send + Sync>,
}

/// Thread-safe dependency injection container.
///
/// Holds the services interceptors depend on (cache stores, loggers,
/// localizers, options) and knows how to build every registered interceptor.
#[derive(Clone, Default)]
pub struct Container {
    services: DashMap<TypeId, ServiceEntry>,
    interceptors: DashMap<TypeId, InterceptorRegistration>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: 'static + Send + Sync>(&mut self, instance: T) -> &mut Self {
        self.provide(Arc::new(instance))
    }

    /// Registers a shared service, sized or `dyn Trait`
    pub fn provide<T: ?Sized + 'static + Send + Sync>(&mut self, instance: Arc<T>) -> &mut Self {
        let entry = ServiceEntry {
            instance: Arc::new(instance),
        };
        self.services.insert(TypeId::of::<T>(), entry);
        self
    }

    pub fn resolve<T: ?Sized + 'static + Send + Sync>(&self) -> Result<Arc<T>> {
        let entry = self.services.get(&TypeId::of::<T>()).ok_or_else(|| {
            CallweaveError::DependencyNotFound {
                type_name: std::any::type_name::<T>().to_string(),
            }
        })?;
        entry
            .instance
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| CallweaveError::Internal(format!(
                "Service entry for {} holds another type",
                std::any::type_name::<T>()
            )))
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Registers how to build interceptor `I`
    pub fn add_interceptor<I, F>(&mut self, lifetime: Lifetime, constructor: F) -> &mut Self
    where
        I: Interceptor,
        F: Fn(&Container) -> Result<I> + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move |container| {
            constructor(container).map(|interceptor| Arc::new(interceptor) as Arc<dyn Interceptor>)
        });
        self.interceptors.insert(
            TypeId::of::<I>(),
            InterceptorRegistration {
                name: std::any::type_name::<I>(),
                lifetime,
                constructor,
                instance: Arc::default(),
            },
        );
        self
    }

    /// Registers a ready-made interceptor shared by everyone
    pub fn add_singleton<I: Interceptor>(&mut self, interceptor: I) -> &mut Self {
        let instance = Arc::new(interceptor) as Arc<dyn Interceptor>;
        let cell = OnceLock::new();
        let _ = cell.set(Arc::clone(&instance));
        self.interceptors.insert(
            TypeId::of::<I>(),
            InterceptorRegistration {
                name: std::any::type_name::<I>(),
                lifetime: Lifetime::Singleton,
                constructor: Arc::new(move |_| Ok(Arc::clone(&instance))),
                instance: Arc::new(cell),
            },
        );
        self
    }

    pub fn has_interceptor(&self, key: InterceptorKey) -> bool {
        self.interceptors.contains_key(&key.id())
    }

    /// Builds, or fetches the shared instance of, the interceptor named by `key`
    pub fn resolve_interceptor(&self, key: InterceptorKey) -> Result<Arc<dyn Interceptor>> {
        let registration = self
            .interceptors
            .get(&key.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CallweaveError::InterceptorNotFound {
                type_name: key.name().to_string(),
            })?;

        match registration.lifetime {
            Lifetime::Transient => self.construct(&registration),
            Lifetime::Singleton => {
                if let Some(instance) = registration.instance.get() {
                    return Ok(Arc::clone(instance));
                }
                let built = self.construct(&registration)?;
                Ok(Arc::clone(registration.instance.get_or_init(|| built)))
            }
        }
    }

    fn construct(&self, registration: &InterceptorRegistration) -> Result<Arc<dyn Interceptor>> {
        tracing::debug!(
            "Constructing {} interceptor {}",
            registration.lifetime,
            registration.name
        );
        (registration.constructor)(self).map_err(|e| match e {
            CallweaveError::InterceptorConstruction { .. } => e,
            other => CallweaveError::InterceptorConstruction {
                type_name: registration.name.to_string(),
                source: Box::new(other),
            },
        })
    }

    /// Interceptor factory backed by this container
    pub fn factory(self: &Arc<Self>) -> InterceptorFactory {
        let container = Arc::clone(self);
        Arc::new(move |key| {
            container
                .resolve_interceptor(key)
                .map_err(|e| Box::new(e) as BoxError)
        })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{Call, InterceptorResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestService {
        value: i32,
    }

    trait MyTrait: Send + Sync {
        fn get_value(&self) -> i32;
    }

    struct MyTraitImpl {
        value: i32,
    }

    impl MyTrait for MyTraitImpl {
        fn get_value(&self) -> i32 {
            self.value
        }
    }

    struct Counting;

    #[async_trait]
    impl Interceptor for Counting {
        async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
            call.next().await
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut container = Container::new();
        container.register(TestService { value: 42 });
        let service = container.resolve::<TestService>().unwrap();
        assert_eq!(service.value, 42);
    }

    #[test]
    fn test_provide_and_resolve_trait() {
        let mut container = Container::new();
        container.provide::<dyn MyTrait>(Arc::new(MyTraitImpl { value: 99 }));
        let trait_instance = container.resolve::<dyn MyTrait>().unwrap();
        assert_eq!(trait_instance.get_value(), 99);
        assert!(container.contains::<dyn MyTrait>());
    }

    #[test]
    fn test_missing_dependency() {
        let container = Container::new();
        assert!(matches!(
            container.resolve::<TestService>(),
            Err(CallweaveError::DependencyNotFound { .. })
        ));
    }

    #[test]
    fn test_interceptor_lifetimes() {
        for (lifetime, expected) in [(Lifetime::Singleton, 1), (Lifetime::Transient, 3)] {
            let built = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&built);
            let mut container = Container::new();
            container.add_interceptor(lifetime, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Counting)
            });

            let key = InterceptorKey::of::<Counting>();
            let instances: Vec<_> = (0..3)
                .map(|_| container.resolve_interceptor(key).unwrap())
                .collect();

            assert_eq!(built.load(Ordering::SeqCst), expected);
            let shared = Arc::ptr_eq(&instances[0], &instances[1]);
            assert_eq!(shared, lifetime == Lifetime::Singleton);
        }
    }

    #[test]
    fn test_singleton_instance_is_reused() {
        let mut container = Container::new();
        container.add_singleton(Counting);
        let key = InterceptorKey::of::<Counting>();
        assert!(container.has_interceptor(key));
        assert!(Arc::ptr_eq(
            &container.resolve_interceptor(key).unwrap(),
            &container.resolve_interceptor(key).unwrap()
        ));
    }

    #[test]
    fn test_factory_reports_unregistered_interceptor() {
        let container = Arc::new(Container::new());
        let factory = container.factory();
        let err = factory(InterceptorKey::of::<Counting>()).err().unwrap();
        assert!(err.to_string().contains("Counting"));
    }

    #[test]
    fn test_construction_failure_is_wrapped() {
        let mut container = Container::new();
        container.add_interceptor::<Counting, _>(Lifetime::Transient, |c| {
            c.resolve::<TestService>().map(|_| Counting)
        });

        let err = container
            .resolve_interceptor(InterceptorKey::of::<Counting>())
            .err()
            .unwrap();
        assert!(matches!(err, CallweaveError::InterceptorConstruction { .. }));
    }
}
