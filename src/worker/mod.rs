use crate::error::{CallweaveError, Result};
use rayon::ThreadPool;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Dedicated threads that drive synchronous intercepted calls.
///
/// A synchronous call site must observe a finished result even though the
/// interceptor chain is asynchronous. The chain is therefore run to completion
/// on one of these threads while the caller waits, instead of blocking the
/// caller's own executor thread on it.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("callweave-worker-{index}"))
            .build()
            .map_err(|e| CallweaveError::Worker(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Shared pool sized to the number of CPUs
    pub fn shared() -> Result<Self> {
        static SHARED: std::sync::OnceLock<WorkerPool> = std::sync::OnceLock::new();
        if let Some(pool) = SHARED.get() {
            return Ok(pool.clone());
        }
        let pool = Self::new(num_cpus::get())?;
        Ok(SHARED.get_or_init(|| pool).clone())
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `future` to completion on a worker thread and returns its output.
    ///
    /// Inside a multi-threaded tokio runtime the future is driven through the
    /// runtime handle so timers and I/O keep working. A current-thread runtime
    /// cannot make progress while its only thread waits here, so that case is
    /// rejected with [`CallweaveError::BlockingOnCurrentThread`].
    pub fn block_on<F>(&self, method: &str, future: F) -> Result<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        match Handle::try_current() {
            Ok(handle) => {
                if matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) {
                    return Err(CallweaveError::BlockingOnCurrentThread {
                        method: method.to_string(),
                    });
                }
                Ok(tokio::task::block_in_place(|| {
                    self.pool.install(move || handle.block_on(future))
                }))
            }
            Err(_) => Ok(self
                .pool
                .install(move || futures::executor::block_on(future))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_without_runtime() {
        let pool = WorkerPool::new(2).unwrap();
        let borrowed = String::from("borrowed");
        let out = pool
            .block_on("test", async { format!("{} value", borrowed) })
            .unwrap();
        assert_eq!(out, "borrowed value");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_on_inside_multi_thread_runtime() {
        let pool = WorkerPool::new(1).unwrap();
        let out = pool
            .block_on("test", async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                42
            })
            .unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_block_on_current_thread_runtime_fails_fast() {
        let pool = WorkerPool::new(1).unwrap();
        let err = pool.block_on("Svc::load", async { 1 }).unwrap_err();
        assert!(matches!(
            err,
            CallweaveError::BlockingOnCurrentThread { method } if method == "Svc::load"
        ));
    }
}
