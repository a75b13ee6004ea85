use super::invoker::MethodChain;
use super::response::FieldMeta;
use super::returns::{ErasedValue, ReturnType, Returnable};
use super::{Declaration, Interceptor, InterceptorResult};
use crate::context::CallerContext;
use crate::error::{BoxError, CallweaveError};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The original method, erased to a re-invocable closure
pub(crate) type Target<'a> =
    Box<dyn FnMut() -> BoxFuture<'a, Result<ErasedValue, BoxError>> + Send + Sync + 'a>;

/// The shape of an intercepted method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvocationKind {
    /// Plain function; the caller blocks until the chain completes
    Sync,
    /// Async method resolving to `()`
    AsyncUnit,
    /// Async method resolving to a value
    AsyncValue,
}

/// Identity of the intercepted method
#[derive(Debug, Clone)]
pub struct MethodInfo {
    type_name: &'static str,
    name: &'static str,
    kind: InvocationKind,
}

impl MethodInfo {
    pub fn new(type_name: &'static str, name: &'static str, kind: InvocationKind) -> Self {
        Self {
            type_name,
            name,
            kind,
        }
    }

    /// Fully qualified name of the concrete target type
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> InvocationKind {
        self.kind
    }

    /// Module path of the target type
    pub fn namespace(&self) -> &'static str {
        split_type_name(self.type_name).0
    }

    /// Target type name without its module path
    pub fn class(&self) -> &'static str {
        split_type_name(self.type_name).1
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.class(), self.name)
    }
}

fn split_type_name(full: &'static str) -> (&'static str, &'static str) {
    let base_end = full.find('<').unwrap_or(full.len());
    match full[..base_end].rfind("::") {
        Some(pos) => (&full[..pos], &full[pos + 2..]),
        None => ("", full),
    }
}

/// A positional argument, captured as JSON for hashing and logging
#[derive(Debug, Clone)]
pub struct Argument {
    name: &'static str,
    value: Value,
    token: bool,
}

impl Argument {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Cancellation tokens are forwarded to the target but never hashed or logged
    pub fn is_token(&self) -> bool {
        self.token
    }
}

#[derive(Debug, Clone, Default)]
pub struct Arguments {
    items: Vec<Argument>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures an argument.
    ///
    /// Arguments only feed cache keys and call records, so a value that fails
    /// to serialize is recorded as a placeholder instead of failing the call.
    pub fn push<V: Serialize + ?Sized>(&mut self, name: &'static str, value: &V) -> &mut Self {
        let value = serde_json::to_value(value).unwrap_or_else(|err| {
            tracing::debug!("Argument {} is not serializable: {}", name, err);
            Value::String(format!("<{}>", std::any::type_name::<V>()))
        });
        self.items.push(Argument {
            name,
            value,
            token: false,
        });
        self
    }

    pub fn with<V: Serialize + ?Sized>(mut self, name: &'static str, value: &V) -> Self {
        self.push(name, value);
        self
    }

    /// Records the position of a cancellation token
    pub fn token(&mut self, name: &'static str) -> &mut Self {
        self.items.push(Argument {
            name,
            value: Value::Null,
            token: true,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.items.iter().find(|argument| argument.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Non-token argument values in positional order
    pub fn payload(&self) -> Vec<&Value> {
        self.items
            .iter()
            .filter(|argument| !argument.token)
            .map(|argument| &argument.value)
            .collect()
    }

    /// Non-token arguments keyed by parameter name
    pub fn to_map(&self) -> Map<String, Value> {
        self.items
            .iter()
            .filter(|argument| !argument.token)
            .map(|argument| (argument.name.to_string(), argument.value.clone()))
            .collect()
    }
}

/// Per-invocation context handed down the interceptor chain.
///
/// A `Call` is created for a single invocation and dropped when it returns.
/// Interceptors may inspect the arguments, replace the return value, and
/// decide whether the original method runs at all.
pub struct Call<'a> {
    method: MethodInfo,
    arguments: Arguments,
    return_type: ReturnType,
    return_value: Option<ErasedValue>,
    proceed: bool,
    chain: Arc<[Arc<dyn Interceptor>]>,
    declarations: Arc<[Declaration]>,
    position: usize,
    caller: Option<Arc<CallerContext>>,
    target: Target<'a>,
}

impl<'a> Call<'a> {
    pub(crate) fn new(
        method: MethodInfo,
        arguments: Arguments,
        return_type: ReturnType,
        chain: &MethodChain,
        target: Target<'a>,
    ) -> Self {
        Self {
            method,
            arguments,
            return_type,
            return_value: None,
            proceed: true,
            chain: Arc::clone(chain.interceptors()),
            declarations: Arc::clone(chain.declarations()),
            position: 0,
            caller: CallerContext::current().map(Arc::new),
            target,
        }
    }

    pub fn method(&self) -> &MethodInfo {
        &self.method
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn return_type(&self) -> &ReturnType {
        &self.return_type
    }

    /// Caller context captured when the call was made
    pub fn caller(&self) -> Option<&CallerContext> {
        self.caller.as_deref()
    }

    /// The resolved chain, in execution order
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.chain
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Settings of the first declaration on this method carrying an `S`
    pub fn settings<S: Any>(&self) -> Option<&S> {
        self.declarations
            .iter()
            .find_map(|declaration| declaration.settings::<S>())
    }

    pub fn proceed_to_original(&self) -> bool {
        self.proceed
    }

    /// When false, reaching the end of the chain no longer runs the original method
    pub fn set_proceed_to_original(&mut self, proceed: bool) {
        self.proceed = proceed;
    }

    pub fn has_return_value(&self) -> bool {
        self.return_value.is_some()
    }

    pub fn return_value<T: 'static>(&self) -> Option<&T> {
        self.return_value.as_deref()?.downcast_ref::<T>()
    }

    pub fn return_value_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.return_value.as_deref_mut()?.downcast_mut::<T>()
    }

    pub fn set_return_value<T: Returnable>(&mut self, value: T) -> Result<(), CallweaveError> {
        if !self.return_type.is::<T>() {
            return Err(CallweaveError::ReturnTypeMismatch {
                method: self.method.to_string(),
                expected: self.return_type.name(),
            });
        }
        self.return_value = Some(Box::new(value));
        Ok(())
    }

    pub fn clear_return_value(&mut self) -> bool {
        self.return_value.take().is_some()
    }

    /// The current return value serialized to JSON
    pub fn return_json(&self) -> Option<Result<Value, CallweaveError>> {
        let value = self.return_value.as_deref()?;
        let encoded = self.return_type.encode(value)?;
        Some(encoded.map_err(CallweaveError::from))
    }

    /// Replaces the return value by decoding JSON into the method's return type
    pub fn set_return_json(&mut self, value: Value) -> Result<(), CallweaveError> {
        let decoded = self.return_type.decode(value)?;
        self.return_value = Some(decoded);
        Ok(())
    }

    pub fn succeeded(&self) -> Option<bool> {
        let value = self.return_value.as_deref()?;
        self.return_type.succeeded(value)
    }

    pub fn mark_from_cache(&mut self) {
        if let Some(value) = self.return_value.as_deref_mut() {
            self.return_type.mark_from_cache(value);
        }
    }

    pub fn take_metadata(&mut self) -> Option<Value> {
        let value = self.return_value.as_deref_mut()?;
        self.return_type.take_metadata(value)
    }

    pub fn restore_metadata(&mut self, metadata: Value) {
        if let Some(value) = self.return_value.as_deref_mut() {
            self.return_type.restore_metadata(value, metadata);
        }
    }

    pub fn attach_fields(&mut self, fields: Vec<FieldMeta>) {
        if let Some(value) = self.return_value.as_deref_mut() {
            self.return_type.attach_fields(value, fields);
        }
    }

    /// Continues the chain.
    ///
    /// Runs the next interceptor if one remains; otherwise runs the original
    /// method unless [`set_proceed_to_original`](Self::set_proceed_to_original)
    /// turned it off. May be called more than once.
    pub async fn next(&mut self) -> InterceptorResult {
        if let Some(interceptor) = self.chain.get(self.position).cloned() {
            self.position += 1;
            let outcome = interceptor.on_invoke(self).await;
            self.position -= 1;
            return outcome;
        }

        if !self.proceed {
            return Ok(());
        }

        let value = (self.target)().await?;
        debug_assert!(self.return_type.matches(value.as_ref()));
        self.return_value = Some(value);
        Ok(())
    }

    /// Consumes the call, yielding the final return value
    pub(crate) fn into_return<T: Returnable>(self) -> Result<T, CallweaveError> {
        let value = match self.return_value {
            Some(value) => value,
            None => self.return_type.decode(Value::Null).map_err(|_| {
                CallweaveError::MissingReturnValue {
                    method: self.method.to_string(),
                }
            })?,
        };

        value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| CallweaveError::ReturnTypeMismatch {
                method: self.method.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }
}

impl fmt::Debug for Call<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("arguments", &self.arguments)
            .field("return_type", &self.return_type)
            .field("has_return_value", &self.return_value.is_some())
            .field("proceed", &self.proceed)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_info_splits_type_name() {
        let info = MethodInfo::new("app::users::UserService", "get_user", InvocationKind::Sync);
        assert_eq!(info.namespace(), "app::users");
        assert_eq!(info.class(), "UserService");
        assert_eq!(info.to_string(), "UserService::get_user");

        let generic = MethodInfo::new(
            "app::Repo<app::users::User>",
            "find",
            InvocationKind::AsyncValue,
        );
        assert_eq!(generic.namespace(), "app");
        assert_eq!(generic.class(), "Repo<app::users::User>");
        assert_eq!(InvocationKind::AsyncUnit.to_string(), "async_unit");
    }

    #[test]
    fn test_arguments_exclude_tokens_from_payload() {
        let mut arguments = Arguments::new();
        arguments.push("id", &7u64).token("cancel").push("name", "Ann");

        assert_eq!(arguments.len(), 3);
        assert!(arguments.get("cancel").unwrap().is_token());
        assert_eq!(arguments.payload(), vec![&json!(7), &json!("Ann")]);

        let map = arguments.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["name"], json!("Ann"));
    }
}
