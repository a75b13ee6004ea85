use thiserror::Error;

pub type Result<T> = std::result::Result<T, CallweaveError>;

/// A type-erased error travelling through an interceptor chain
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum CallweaveError {
    #[error("Dependency not found: {type_name}")]
    DependencyNotFound { type_name: String },

    #[error("Interceptor factory is not configured")]
    FactoryNotConfigured,

    #[error("Interceptor not registered: {type_name}")]
    InterceptorNotFound { type_name: String },

    #[error("Failed to instantiate interceptor {type_name}: {source}")]
    InterceptorConstruction {
        type_name: String,
        #[source]
        source: BoxError,
    },

    #[error("{type_name} has no interceptable method named {method}")]
    UnknownMethod { type_name: String, method: String },

    #[error("No return value produced by {method}")]
    MissingReturnValue { method: String },

    #[error("Return value of {method} is not a {expected}")]
    ReturnTypeMismatch {
        method: String,
        expected: &'static str,
    },

    #[error("Synchronous call to {method} would block a current-thread runtime")]
    BlockingOnCurrentThread { method: String },

    #[error("Cannot reset hidden fields of {type_name}: {reason}")]
    Shaping {
        type_name: &'static str,
        reason: String,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache store error: {0}")]
    Cache(String),

    #[error("Worker pool error: {0}")]
    Worker(String),

    #[error(transparent)]
    Interceptor(BoxError),

    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallweaveError {
    /// Wraps an error raised further down the chain.
    ///
    /// The pipeline strips every `Wrapped` layer before the error reaches the
    /// caller, so interceptors may use this to annotate without changing what
    /// the caller observes.
    pub fn wrap(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Wrapped {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Strips nested [`CallweaveError::Wrapped`] layers down to the innermost cause.
pub fn unwrap_innermost(mut error: BoxError) -> BoxError {
    loop {
        match error.downcast::<CallweaveError>() {
            Ok(inner) => match *inner {
                CallweaveError::Wrapped { source, .. } => error = source,
                other => return Box::new(other),
            },
            Err(original) => return original,
        }
    }
}

/// Error types that intercepted methods may return.
///
/// Implemented for every error that can absorb a [`CallweaveError`], so a
/// failure raised by the target comes back to the caller as the very same
/// value, while pipeline failures are converted through `From`.
pub trait CallerError: std::error::Error + Send + Sync + Sized + 'static {
    fn from_fault(fault: BoxError) -> Self;
}

impl<E> CallerError for E
where
    E: std::error::Error + Send + Sync + 'static + From<CallweaveError>,
{
    fn from_fault(fault: BoxError) -> Self {
        match unwrap_innermost(fault).downcast::<E>() {
            Ok(own) => *own,
            Err(other) => match other.downcast::<CallweaveError>() {
                Ok(pipeline) => E::from(*pipeline),
                Err(foreign) => E::from(CallweaveError::Interceptor(foreign)),
            },
        }
    }
}
