use super::{Interceptor, InterceptorKey, Invoker};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Names an interceptor that must wrap a method, together with the
/// interceptor-specific settings for that method (cache key, timeout, ...).
#[derive(Clone)]
pub struct Declaration {
    interceptor: InterceptorKey,
    settings: Option<Arc<dyn Any + Send + Sync>>,
}

impl Declaration {
    /// Declares an interceptor without settings
    pub fn of<I: Interceptor>() -> Self {
        Self {
            interceptor: InterceptorKey::of::<I>(),
            settings: None,
        }
    }

    /// Declares an interceptor carrying typed settings
    pub fn with<I: Interceptor, S: Any + Send + Sync>(settings: S) -> Self {
        Self {
            interceptor: InterceptorKey::of::<I>(),
            settings: Some(Arc::new(settings)),
        }
    }

    pub fn interceptor(&self) -> InterceptorKey {
        self.interceptor
    }

    pub fn settings<S: Any>(&self) -> Option<&S> {
        self.settings.as_deref()?.downcast_ref::<S>()
    }
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Declaration")
            .field("interceptor", &self.interceptor)
            .field("has_settings", &self.settings.is_some())
            .finish()
    }
}

/// Declares which interceptors wrap the methods of a concrete type.
///
/// This is the registration table that stands in for attribute discovery:
/// class-level declarations apply to every listed method, method-level ones to
/// a single method, and `implements` pulls in the declarations written on an
/// `#[interceptable]` trait.
///
/// # Example
/// ```
/// use callweave::prelude::*;
///
/// struct UserService;
///
/// impl Decorated for UserService {
///     fn declare(declarations: &mut DeclarationBuilder) {
///         declarations
///             .class(Declaration::of::<LogInterceptor>())
///             .method("get_user", [CacheSettings::keyed("user").timeout_secs(300).into()])
///             .method("rename", []);
///     }
/// }
/// ```
pub trait Decorated: Send + Sync + 'static {
    fn declare(declarations: &mut DeclarationBuilder);
}

/// Implemented for `dyn Trait` by `#[interceptable]`.
///
/// This is the dispatch-provider seam: given the target and an [`Invoker`],
/// it produces an object exposing the same trait whose every method is routed
/// through the invocation pipeline.
pub trait Interceptable: 'static {
    fn interface_name() -> &'static str;

    /// Every method of the interface, in declaration order
    fn methods() -> &'static [&'static str];

    /// Interface-level declarations, keyed by method name
    fn declarations() -> Vec<(&'static str, Declaration)> {
        Vec::new()
    }

    fn create_proxy(target: Arc<Self>, invoker: Invoker) -> Arc<Self>;
}

/// Collects class, method and interface declarations for one concrete type
#[derive(Default)]
pub struct DeclarationBuilder {
    class: Vec<Declaration>,
    methods: Vec<(&'static str, Vec<Declaration>)>,
    interface: Vec<(&'static str, Vec<Declaration>)>,
}

impl DeclarationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declaration applying to every interceptable method of the type
    pub fn class(&mut self, declaration: impl Into<Declaration>) -> &mut Self {
        self.class.push(declaration.into());
        self
    }

    /// Registers an interceptable method with its own declarations (may be empty)
    pub fn method(
        &mut self,
        name: &'static str,
        declarations: impl IntoIterator<Item = Declaration>,
    ) -> &mut Self {
        let entry = entry_for(&mut self.methods, name);
        entry.extend(declarations);
        self
    }

    /// Registers interceptable methods that carry no method-level declarations
    pub fn methods(&mut self, names: impl IntoIterator<Item = &'static str>) -> &mut Self {
        for name in names {
            entry_for(&mut self.methods, name);
        }
        self
    }

    /// Pulls in the methods and interface-level declarations of an implemented trait
    pub fn implements<I: ?Sized + Interceptable>(&mut self) -> &mut Self {
        for name in I::methods() {
            entry_for(&mut self.interface, name);
        }
        for (name, declaration) in I::declarations() {
            entry_for(&mut self.interface, name).push(declaration);
        }
        self
    }

    /// Resolves the deduplicated declaration list of every method.
    ///
    /// Union order is method-level, class-level, then interface-level; a later
    /// declaration of an interceptor already seen is dropped.
    pub(crate) fn resolve(self) -> Vec<(&'static str, Arc<[Declaration]>)> {
        let mut names: Vec<&'static str> = self.methods.iter().map(|(name, _)| *name).collect();
        for (name, _) in &self.interface {
            if !names.contains(name) {
                names.push(name);
            }
        }

        names
            .into_iter()
            .map(|name| {
                let method_level = find(&self.methods, name);
                let interface_level = find(&self.interface, name);

                let mut seen = HashSet::new();
                let resolved: Vec<Declaration> = method_level
                    .iter()
                    .chain(self.class.iter())
                    .chain(interface_level.iter())
                    .filter(|declaration| seen.insert(declaration.interceptor()))
                    .cloned()
                    .collect();

                (name, Arc::from(resolved))
            })
            .collect()
    }
}

fn entry_for<'a>(
    entries: &'a mut Vec<(&'static str, Vec<Declaration>)>,
    name: &'static str,
) -> &'a mut Vec<Declaration> {
    let index = match entries.iter().position(|(existing, _)| *existing == name) {
        Some(index) => index,
        None => {
            entries.push((name, Vec::new()));
            entries.len() - 1
        }
    };
    &mut entries[index].1
}

fn find<'a>(entries: &'a [(&'static str, Vec<Declaration>)], name: &str) -> &'a [Declaration] {
    entries
        .iter()
        .find(|(existing, _)| *existing == name)
        .map(|(_, declarations)| declarations.as_slice())
        .unwrap_or(&[])
}
