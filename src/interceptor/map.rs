use super::{Decorated, Declaration, DeclarationBuilder};
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::{Arc, LazyLock};

static GLOBAL: LazyLock<Arc<MethodDecoratorMap>> = LazyLock::new(Arc::default);

/// The resolved declarations of every interceptable method of one type
#[derive(Debug)]
pub struct MethodTable {
    type_name: &'static str,
    methods: Vec<(&'static str, Arc<[Declaration]>)>,
}

impl MethodTable {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn get(&self, method: &str) -> Option<&Arc<[Declaration]>> {
        self.methods
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, declarations)| declarations)
    }

    pub fn methods(&self) -> impl Iterator<Item = (&'static str, &Arc<[Declaration]>)> {
        self.methods.iter().map(|(name, declarations)| (*name, declarations))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Per-type cache of method declaration tables.
///
/// Tables are built on first request and never change afterwards. Two threads
/// racing on the same new type may both build it; the first insert wins and
/// both observe that table.
#[derive(Default)]
pub struct MethodDecoratorMap {
    tables: DashMap<TypeId, Arc<MethodTable>>,
}

impl MethodDecoratorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide map used by decorators unless one is supplied
    pub fn global() -> Arc<MethodDecoratorMap> {
        Arc::clone(&GLOBAL)
    }

    pub fn get<T: Decorated>(&self) -> Arc<MethodTable> {
        let type_id = TypeId::of::<T>();
        if let Some(table) = self.tables.get(&type_id) {
            return Arc::clone(table.value());
        }

        let table = Arc::new(Self::build::<T>());
        Arc::clone(self.tables.entry(type_id).or_insert(table).value())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.tables.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drops every cached table
    pub fn clear(&self) {
        self.tables.clear();
    }

    fn build<T: Decorated>() -> MethodTable {
        let mut builder = DeclarationBuilder::new();
        T::declare(&mut builder);
        let methods = builder.resolve();

        tracing::debug!(
            "Built method table for {} ({} methods)",
            std::any::type_name::<T>(),
            methods.len()
        );

        MethodTable {
            type_name: std::any::type_name::<T>(),
            methods,
        }
    }
}
