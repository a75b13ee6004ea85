use serde_json::{Map, Value};
use std::future::Future;

tokio::task_local! {
    /// Task-local storage for the identity of whoever is making calls.
    ///
    /// Every `Call` snapshots this when it is created, so interceptors see
    /// the caller even when the chain itself runs on a worker thread.
    static CALLER: CallerContext;
}

/// Who is calling, as seen by the built-in interceptors.
///
/// Roles drive the visibility rules of the response interceptor; properties
/// are copied into every call record emitted by the log interceptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallerContext {
    roles: Vec<String>,
    properties: Map<String, Value>,
}

impl CallerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// The context of the current task, if one was scoped
    pub fn current() -> Option<CallerContext> {
        CALLER.try_with(Clone::clone).ok()
    }

    /// Runs `future` with this context as the current caller
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CALLER.scope(self, future).await
    }

    /// Runs a synchronous closure with this context as the current caller
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CALLER.sync_scope(self, f)
    }
}
