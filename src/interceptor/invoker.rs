use super::call::{Target, Call, InvocationKind, MethodInfo};
use super::returns::{ErasedValue, ReturnType, Returnable};
use super::{Arguments, Declaration, Interceptor, InterceptorResult};
use crate::error::{BoxError, CallerError, CallweaveError};
use crate::worker::WorkerPool;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::{Future, ready};
use std::sync::Arc;
use std::task::{Context, Poll};

/// The ordered interceptors and declarations of one method
#[derive(Clone)]
pub struct MethodChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    declarations: Arc<[Declaration]>,
}

impl MethodChain {
    /// Builds a chain, ordering interceptors by ascending `order()`.
    /// Ties keep their declaration order.
    pub fn new(
        mut interceptors: Vec<Arc<dyn Interceptor>>,
        declarations: Arc<[Declaration]>,
    ) -> Self {
        interceptors.sort_by_key(|interceptor| interceptor.order());
        Self {
            interceptors: interceptors.into(),
            declarations,
        }
    }

    pub fn interceptors(&self) -> &Arc<[Arc<dyn Interceptor>]> {
        &self.interceptors
    }

    pub fn declarations(&self) -> &Arc<[Declaration]> {
        &self.declarations
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

struct InvokerInner {
    type_name: &'static str,
    chains: HashMap<&'static str, MethodChain>,
    worker: WorkerPool,
}

/// Routes intercepted calls of one target object through their chains.
///
/// Proxies hand every call to one of the three entry points, matching the
/// shape of the method: [`invoke_blocking`](Self::invoke_blocking),
/// [`invoke_async_unit`](Self::invoke_async_unit) and
/// [`invoke_async`](Self::invoke_async). Methods without interceptors are
/// forwarded straight to the target.
#[derive(Clone)]
pub struct Invoker {
    inner: Arc<InvokerInner>,
}

impl Invoker {
    pub fn new(
        type_name: &'static str,
        chains: HashMap<&'static str, MethodChain>,
        worker: WorkerPool,
    ) -> Self {
        Self {
            inner: Arc::new(InvokerInner {
                type_name,
                chains,
                worker,
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    pub fn chain(&self, method: &str) -> Option<&MethodChain> {
        self.inner.chains.get(method).filter(|chain| !chain.is_empty())
    }

    pub fn is_intercepted(&self, method: &str) -> bool {
        self.chain(method).is_some()
    }

    /// Whether `method` was registered for the target type, intercepted or not
    pub fn knows(&self, method: &str) -> bool {
        self.inner.chains.contains_key(method)
    }

    /// Chain of a registered method, `None` when it has no interceptors.
    /// Names the target type never registered are rejected.
    fn route<E: CallerError>(&self, method: &str) -> Result<Option<&MethodChain>, E> {
        match self.inner.chains.get(method) {
            Some(chain) if chain.is_empty() => Ok(None),
            Some(chain) => Ok(Some(chain)),
            None => {
                tracing::warn!(
                    "Call to unregistered method {} of {}",
                    method,
                    self.inner.type_name
                );
                Err(E::from_fault(Box::new(CallweaveError::UnknownMethod {
                    type_name: self.inner.type_name.to_string(),
                    method: method.to_string(),
                })))
            }
        }
    }

    /// Entry point for synchronous methods.
    ///
    /// Blocks until the whole chain has finished; see
    /// [`WorkerPool::block_on`] for where the chain runs.
    pub fn invoke_blocking<T, E, A, F>(
        &self,
        method: &'static str,
        arguments: A,
        mut target: F,
    ) -> Result<T, E>
    where
        T: Returnable,
        E: CallerError,
        A: FnOnce() -> Arguments,
        F: FnMut() -> Result<T, E> + Send + Sync,
    {
        let Some(chain) = self.route::<E>(method)? else {
            return target();
        };

        let call = self.prepare::<T>(
            method,
            InvocationKind::Sync,
            arguments,
            chain,
            erase(move || ready(target())),
        );
        let label = call.method().to_string();

        let run = async move {
            let mut call = call;
            let outcome = call.next().await;
            (call, outcome)
        };

        let (call, outcome) = self
            .inner
            .worker
            .block_on(&label, run)
            .map_err(|err| E::from_fault(Box::new(err)))?;
        finish(call, outcome)
    }

    /// Entry point for async methods resolving to `()`.
    ///
    /// The chain starts immediately. A failure raised before the chain first
    /// suspends is returned right away; otherwise the pending future is handed
    /// back for the caller to await.
    pub fn invoke_async_unit<'a, E, A, F, Fut>(
        &'a self,
        method: &'static str,
        arguments: A,
        mut target: F,
    ) -> Result<BoxFuture<'a, Result<(), E>>, E>
    where
        E: CallerError,
        A: FnOnce() -> Arguments,
        F: FnMut() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Result<(), E>> + Send + 'a,
    {
        let Some(chain) = self.route::<E>(method)? else {
            return Ok(Box::pin(target()));
        };

        let mut call = self.prepare::<()>(
            method,
            InvocationKind::AsyncUnit,
            arguments,
            chain,
            erase(target),
        );
        let mut pending: BoxFuture<'a, Result<(), E>> = Box::pin(async move {
            let outcome = call.next().await;
            finish(call, outcome)
        });

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match pending.as_mut().poll(&mut cx) {
            Poll::Ready(Err(err)) => Err(err),
            Poll::Ready(Ok(())) => Ok(Box::pin(ready(Ok(())))),
            Poll::Pending => Ok(pending),
        }
    }

    /// Entry point for async methods resolving to a value
    pub async fn invoke_async<'a, T, E, A, F, Fut>(
        &'a self,
        method: &'static str,
        arguments: A,
        mut target: F,
    ) -> Result<T, E>
    where
        T: Returnable,
        E: CallerError,
        A: FnOnce() -> Arguments + Send,
        F: FnMut() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        let Some(chain) = self.route::<E>(method)? else {
            return target().await;
        };

        let mut call = self.prepare::<T>(
            method,
            InvocationKind::AsyncValue,
            arguments,
            chain,
            erase(target),
        );
        let outcome = call.next().await;
        finish(call, outcome)
    }

    fn prepare<'a, T: Returnable>(
        &self,
        method: &'static str,
        kind: InvocationKind,
        arguments: impl FnOnce() -> Arguments,
        chain: &MethodChain,
        target: Target<'a>,
    ) -> Call<'a> {
        Call::new(
            MethodInfo::new(self.inner.type_name, method, kind),
            arguments(),
            ReturnType::of::<T>(),
            chain,
            target,
        )
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.inner.chains.keys().collect();
        methods.sort();
        f.debug_struct("Invoker")
            .field("type_name", &self.inner.type_name)
            .field("methods", &methods)
            .finish()
    }
}

fn erase<'a, T, E, F, Fut>(mut target: F) -> Target<'a>
where
    T: Returnable,
    E: CallerError,
    F: FnMut() -> Fut + Send + Sync + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    Box::new(move || {
        let future = target();
        Box::pin(async move {
            future
                .await
                .map(|value| Box::new(value) as ErasedValue)
                .map_err(|err| Box::new(err) as BoxError)
        })
    })
}

fn finish<T: Returnable, E: CallerError>(call: Call<'_>, outcome: InterceptorResult) -> Result<T, E> {
    outcome.map_err(E::from_fault)?;
    call.into_return::<T>()
        .map_err(|err| E::from_fault(Box::new(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallweaveError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    enum ServiceError {
        #[error("user {0} not found")]
        NotFound(u64),
        #[error("pipeline: {0}")]
        Pipeline(String),
    }

    impl From<CallweaveError> for ServiceError {
        fn from(err: CallweaveError) -> Self {
            ServiceError::Pipeline(err.to_string())
        }
    }

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recording {
        label: &'static str,
        order: i32,
        journal: Journal,
    }

    #[async_trait]
    impl Interceptor for Recording {
        fn order(&self) -> i32 {
            self.order
        }

        async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
            self.journal.lock().unwrap().push(format!("{}:before", self.label));
            let outcome = call.next().await;
            self.journal.lock().unwrap().push(format!("{}:after", self.label));
            outcome
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor for ShortCircuit {
        async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
            call.set_return_value(99u64)?;
            Ok(())
        }
    }

    struct SkipOriginal;

    #[async_trait]
    impl Interceptor for SkipOriginal {
        fn order(&self) -> i32 {
            -1
        }

        async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
            call.set_return_value(5u64)?;
            call.set_proceed_to_original(false);
            call.next().await
        }
    }

    struct Retry;

    #[async_trait]
    impl Interceptor for Retry {
        async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
            match call.next().await {
                Ok(()) => Ok(()),
                Err(_) => call.next().await,
            }
        }
    }

    struct Annotating;

    #[async_trait]
    impl Interceptor for Annotating {
        async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
            call.next()
                .await
                .map_err(|err| CallweaveError::wrap("annotated", CallweaveError::wrap("again", err)).into())
        }
    }

    struct Suspending;

    #[async_trait]
    impl Interceptor for Suspending {
        async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
            tokio::task::yield_now().await;
            call.next().await
        }
    }

    fn invoker(chains: Vec<(&'static str, Vec<Arc<dyn Interceptor>>)>) -> Invoker {
        let chains = chains
            .into_iter()
            .map(|(name, interceptors)| (name, MethodChain::new(interceptors, Arc::from(Vec::new()))))
            .collect();
        Invoker::new("tests::Service", chains, WorkerPool::new(2).unwrap())
    }

    fn recording(label: &'static str, order: i32, journal: &Journal) -> Arc<dyn Interceptor> {
        Arc::new(Recording {
            label,
            order,
            journal: Arc::clone(journal),
        })
    }

    #[tokio::test]
    async fn test_passthrough_without_chain() {
        let invoker = invoker(vec![("empty", vec![])]);
        let built = AtomicUsize::new(0);

        let value: Result<u64, ServiceError> = invoker
            .invoke_async(
                "empty",
                || {
                    built.fetch_add(1, Ordering::SeqCst);
                    Arguments::new()
                },
                || async { Ok(7) },
            )
            .await;

        assert_eq!(value, Ok(7));
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(!invoker.is_intercepted("empty"));
        assert!(!invoker.is_intercepted("unknown"));
    }

    #[tokio::test]
    async fn test_unregistered_method_name_is_rejected() {
        let journal: Journal = Arc::default();
        let invoker = invoker(vec![("get", vec![recording("log", 0, &journal)])]);
        let executed = AtomicUsize::new(0);

        let value: Result<u64, ServiceError> = invoker
            .invoke_async("get_usr", Arguments::new, || {
                executed.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;
        assert!(matches!(value, Err(ServiceError::Pipeline(msg)) if msg.contains("get_usr")));

        let unit = invoker.invoke_async_unit("notfy", Arguments::new, || {
            executed.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), ServiceError>(()) }
        });
        assert!(matches!(unit.err(), Some(ServiceError::Pipeline(msg)) if msg.contains("notfy")));

        assert!(invoker.knows("get"));
        assert!(!invoker.knows("get_usr"));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unregistered_sync_method_name_is_rejected() {
        let invoker = invoker(vec![("sum", vec![])]);

        let value: Result<u32, ServiceError> =
            invoker.invoke_blocking("summ", Arguments::new, || Ok(1));

        assert!(matches!(value, Err(ServiceError::Pipeline(msg)) if msg.contains("no interceptable method named summ")));
    }

    #[tokio::test]
    async fn test_chain_runs_in_ascending_order() {
        let journal: Journal = Arc::default();
        let invoker = invoker(vec![(
            "get",
            vec![
                recording("log", 0, &journal),
                recording("user", -5, &journal),
                recording("late", 10, &journal),
            ],
        )]);

        let calls = Arc::clone(&journal);
        let value: Result<String, ServiceError> = invoker
            .invoke_async("get", Arguments::new, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.lock().unwrap().push("target".into());
                    Ok("done".to_string())
                }
            })
            .await;

        assert_eq!(value.unwrap(), "done");
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "user:before",
                "log:before",
                "late:before",
                "target",
                "late:after",
                "log:after",
                "user:after"
            ]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_never_runs_target() {
        let invoker = invoker(vec![("get", vec![Arc::new(ShortCircuit) as Arc<dyn Interceptor>])]);
        let executed = AtomicUsize::new(0);

        let value: Result<u64, ServiceError> = invoker
            .invoke_async("get", Arguments::new, || {
                executed.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;

        assert_eq!(value, Ok(99));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skip_original_still_runs_downstream_interceptors() {
        let journal: Journal = Arc::default();
        let invoker = invoker(vec![(
            "get",
            vec![recording("log", 0, &journal), Arc::new(SkipOriginal)],
        )]);
        let executed = AtomicUsize::new(0);

        let value: Result<u64, ServiceError> = invoker
            .invoke_async("get", Arguments::new, || {
                executed.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;

        assert_eq!(value, Ok(5));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert_eq!(*journal.lock().unwrap(), vec!["log:before", "log:after"]);
    }

    #[tokio::test]
    async fn test_async_error_reaches_caller_unwrapped() {
        let invoker = invoker(vec![("get", vec![Arc::new(Annotating) as Arc<dyn Interceptor>])]);

        let value: Result<u64, ServiceError> = invoker
            .invoke_async("get", Arguments::new, || async { Err(ServiceError::NotFound(7)) })
            .await;

        assert_eq!(value, Err(ServiceError::NotFound(7)));
    }

    #[test]
    fn test_sync_error_reaches_caller_unwrapped() {
        let invoker = invoker(vec![("get", vec![Arc::new(Annotating) as Arc<dyn Interceptor>])]);

        let value: Result<u64, ServiceError> =
            invoker.invoke_blocking("get", Arguments::new, || Err(ServiceError::NotFound(3)));

        assert_eq!(value, Err(ServiceError::NotFound(3)));
    }

    #[test]
    fn test_sync_call_returns_chain_result() {
        let journal: Journal = Arc::default();
        let invoker = invoker(vec![("sum", vec![recording("log", 0, &journal)])]);

        let (a, b) = (2u32, 3u32);
        let value: Result<u32, ServiceError> = invoker.invoke_blocking(
            "sum",
            || Arguments::new().with("a", &a).with("b", &b),
            || Ok(a + b),
        );

        assert_eq!(value, Ok(5));
        assert_eq!(journal.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_call_on_current_thread_runtime_is_rejected() {
        let journal: Journal = Arc::default();
        let invoker = invoker(vec![("sum", vec![recording("log", 0, &journal)])]);

        let value: Result<u32, ServiceError> =
            invoker.invoke_blocking("sum", Arguments::new, || Ok(1));

        assert!(matches!(value, Err(ServiceError::Pipeline(msg)) if msg.contains("current-thread")));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interceptor_may_invoke_target_again() {
        let invoker = invoker(vec![("flaky", vec![Arc::new(Retry) as Arc<dyn Interceptor>])]);
        let attempts = AtomicUsize::new(0);

        let value: Result<u64, ServiceError> = invoker
            .invoke_async("flaky", Arguments::new, || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(ServiceError::NotFound(1))
                    } else {
                        Ok(10)
                    }
                }
            })
            .await;

        assert_eq!(value, Ok(10));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_unit_fails_eagerly_before_suspension() {
        let invoker = invoker(vec![("notify", vec![Arc::new(Annotating) as Arc<dyn Interceptor>])]);

        let prepared = invoker.invoke_async_unit("notify", Arguments::new, || async {
            Err::<(), _>(ServiceError::NotFound(9))
        });

        assert_eq!(prepared.err(), Some(ServiceError::NotFound(9)));
    }

    #[tokio::test]
    async fn test_async_unit_returns_pending_future() {
        let invoker = invoker(vec![("notify", vec![Arc::new(Suspending) as Arc<dyn Interceptor>])]);
        let executed = AtomicUsize::new(0);

        let pending = invoker
            .invoke_async_unit("notify", Arguments::new, || {
                executed.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), ServiceError>(()) }
            })
            .unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 0);

        pending.await.unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_return_value_is_reported() {
        struct Swallow;

        #[async_trait]
        impl Interceptor for Swallow {
            async fn on_invoke(&self, _call: &mut Call<'_>) -> InterceptorResult {
                Ok(())
            }
        }

        let invoker = invoker(vec![("get", vec![Arc::new(Swallow) as Arc<dyn Interceptor>])]);
        let value: Result<u64, ServiceError> = invoker
            .invoke_async("get", Arguments::new, || async { Ok(1) })
            .await;

        assert!(matches!(value, Err(ServiceError::Pipeline(msg)) if msg.contains("No return value")));
    }
}
