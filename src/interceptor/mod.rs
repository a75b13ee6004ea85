use crate::error::BoxError;
use async_trait::async_trait;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

pub mod cache;
mod call;
mod declaration;
mod invoker;
pub mod logging;
mod map;
pub mod response;
mod returns;

pub use call::{Argument, Arguments, Call, InvocationKind, MethodInfo};
pub use declaration::{Decorated, Declaration, DeclarationBuilder, Interceptable};
pub use invoker::{Invoker, MethodChain};
pub use map::{MethodDecoratorMap, MethodTable};
pub use returns::{ReturnType, Returnable, defaults_of};

/// Standard return type for interceptors
pub type InterceptorResult = Result<(), BoxError>;

/// The Interceptor trait
///
/// An interceptor runs around every call of the methods it is declared on.
/// It receives the per-invocation [`Call`] and decides whether and when to
/// continue with [`Call::next`]. Interceptors are shared between concurrent
/// calls, so all per-call state belongs in the `Call`.
///
/// # Example
/// ```
/// use callweave::prelude::*;
///
/// struct TimingInterceptor;
///
/// #[async_trait]
/// impl Interceptor for TimingInterceptor {
///     async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
///         let start = std::time::Instant::now();
///         let result = call.next().await;
///         tracing::debug!("{} took {:?}", call.method(), start.elapsed());
///         result
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Position in the chain. Lower values run first and wrap the rest.
    fn order(&self) -> i32 {
        0
    }

    async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult;
}

/// Identity of an interceptor type, as named by declarations
#[derive(Clone, Copy)]
pub struct InterceptorKey {
    id: TypeId,
    name: &'static str,
}

impl InterceptorKey {
    pub fn of<I: Interceptor>() -> Self {
        Self {
            id: TypeId::of::<I>(),
            name: std::any::type_name::<I>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for InterceptorKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for InterceptorKey {}

impl Hash for InterceptorKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for InterceptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for InterceptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
