use crate::cache::CacheStore;
use crate::config::DecoratorOptions;
use crate::di::Container;
use crate::error::Result;
use crate::interceptor::cache::CacheInterceptor;
use crate::interceptor::logging::{CallLogger, LogInterceptor, TracingCallLogger};
use crate::interceptor::response::{Localizer, NoopLocalizer, ResponseInterceptor};
use std::sync::Arc;

/// Types that can be built from the services registered in a [`Container`]
///
/// # Example
/// ```
/// use callweave::prelude::*;
/// use std::sync::Arc;
///
/// struct AuditInterceptor {
///     logger: Arc<dyn CallLogger>,
/// }
///
/// impl Injectable for AuditInterceptor {
///     fn inject(container: &Container) -> callweave::Result<Self> {
///         Ok(Self { logger: container.resolve::<dyn CallLogger>()? })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// # Errors
    /// Returns an error if any required dependency is not found in the container.
    fn inject(container: &Container) -> Result<Self>;
}

/// Requires an `Arc<dyn CacheStore>`
impl Injectable for CacheInterceptor {
    fn inject(container: &Container) -> Result<Self> {
        Ok(CacheInterceptor::new(container.resolve::<dyn CacheStore>()?))
    }
}

/// Uses the registered `Arc<dyn CallLogger>` and `DecoratorOptions` when present
impl Injectable for LogInterceptor {
    fn inject(container: &Container) -> Result<Self> {
        let logger = container
            .resolve::<dyn CallLogger>()
            .unwrap_or_else(|_| Arc::new(TracingCallLogger));
        let options = container
            .resolve::<DecoratorOptions>()
            .map(|options| options.as_ref().clone())
            .unwrap_or_default();
        Ok(LogInterceptor::from_options(logger, &options))
    }
}

/// Uses the registered `Arc<dyn Localizer>` when present
impl Injectable for ResponseInterceptor {
    fn inject(container: &Container) -> Result<Self> {
        let localizer = container
            .resolve::<dyn Localizer>()
            .unwrap_or_else(|_| Arc::new(NoopLocalizer));
        Ok(ResponseInterceptor::new(localizer))
    }
}
