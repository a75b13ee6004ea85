//! # Callweave
//!
//! Declarative method interception for Rust services.
//!
//! Callweave wraps the methods of an object in an ordered chain of
//! interceptors. Each interceptor runs logic before and after the original
//! method, may replace its return value, or may skip it entirely. Caching,
//! structured call logging and response shaping ship as built-in
//! interceptors.
//!
//! ## Features
//!
//! - **Declarations**: attach interceptors per method, per type, or on a trait
//!   with `#[intercept(...)]`
//! - **Ordered chains**: interceptors run by ascending order, ties keep
//!   declaration order
//! - **Three call shapes**: blocking calls, async calls resolving to `()`,
//!   async calls resolving to a value
//! - **Transparent errors**: the caller receives exactly the error the
//!   target returned
//! - **DI integration**: interceptors are built by a container honoring
//!   singleton and transient lifetimes
//!
//! ## Quick Start
//!
//! ```rust
//! use callweave::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl Returnable for User {}
//!
//! // 1. Describe the service as an interceptable trait
//! #[interceptable]
//! pub trait UserService: Send + Sync {
//!     #[intercept(CacheInterceptor, CacheSettings::keyed("user").timeout_secs(300))]
//!     async fn get_user(&self, id: u64) -> Result<User, CallweaveError>;
//! }
//!
//! // 2. Implement it and list the traits it exposes
//! struct Users;
//!
//! #[async_trait]
//! impl UserService for Users {
//!     async fn get_user(&self, id: u64) -> Result<User, CallweaveError> {
//!         Ok(User { id, name: "Ann".into() })
//!     }
//! }
//!
//! impl Decorated for Users {
//!     fn declare(declarations: &mut DeclarationBuilder) {
//!         declarations
//!             .class(Declaration::of::<LogInterceptor>())
//!             .implements::<dyn UserService>();
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CallweaveError> {
//!     // 3. Register the interceptors and the services they need
//!     let container = ContainerBuilder::new()
//!         .provide::<dyn CacheStore>(Arc::new(MemoryCacheStore::new()))
//!         .injectable::<CacheInterceptor>(Lifetime::Singleton)
//!         .injectable::<LogInterceptor>(Lifetime::Singleton)
//!         .build();
//!
//!     // 4. Decorate the target and call through the proxy
//!     let decorator = Decorator::builder().container(&container).build()?;
//!     let users: Arc<dyn UserService> =
//!         decorator.decorate_as::<dyn UserService, _, _>(Arc::new(Users), |users| users)?;
//!
//!     let user = users.get_user(7).await?;
//!     assert_eq!(user.name, "Ann");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod common;
pub mod config;
pub mod context;
pub mod decorator;
pub mod di;
pub mod error;
pub mod interceptor;
pub mod worker;

// Re-export core types
pub use common::ApiResponse;
pub use context::CallerContext;
pub use decorator::{Decorator, DecoratorBuilder, InterceptorFactory, Proxy};
pub use di::{Container, ContainerBuilder, Injectable, Lifetime};
pub use error::{BoxError, CallerError, CallweaveError, Result};

// Re-export macros
pub use callweave_macro::interceptable;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use futures;

/// Prelude module for convenient imports
///
/// ```
/// use callweave::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cache::{CacheStore, MemoryCacheStore};
    pub use crate::common::{ApiError, ApiResponse};
    pub use crate::config::{ConfigService, DecoratorOptions};
    pub use crate::context::CallerContext;
    pub use crate::decorator::{Decorator, DecoratorBuilder, InterceptorFactory, Proxy};
    pub use crate::di::{Container, ContainerBuilder, Injectable, Lifetime};
    pub use crate::error::{BoxError, CallerError, CallweaveError};
    pub use crate::interceptor::cache::{CacheInterceptor, CacheSettings};
    pub use crate::interceptor::logging::{
        CallLogger, CallRecord, LogEnricher, LogInterceptor, LogMode, LogSettings,
        TracingCallLogger,
    };
    pub use crate::interceptor::response::{
        FieldMeta, FieldRule, Localizer, NoopLocalizer, ResponseInterceptor,
    };
    pub use crate::interceptor::{
        Arguments, Call, Declaration, DeclarationBuilder, Decorated, Interceptable, Interceptor,
        InterceptorKey, InterceptorResult, InvocationKind, MethodDecoratorMap, MethodInfo,
        Returnable, defaults_of,
    };
    pub use crate::interceptable;
    pub use crate::worker::WorkerPool;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
