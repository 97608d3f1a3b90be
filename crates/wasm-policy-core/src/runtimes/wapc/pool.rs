use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::runtimes::wapc::callback::host_callback;
use crate::runtimes::wapc::errors::WapcRuntimeError;
use crate::runtimes::wapc::stack_pre::StackPre;

/// Fixed-size free-list of pre-warmed `wapc::WapcHost` instances, the
/// "bounded semaphore + ring buffer" design note of spec.md §9. A
/// `std::sync::Condvar` provides the 30 second acquire timeout (spec.md
/// §4.2) without pulling in an async runtime for what is otherwise a fully
/// synchronous call path.
pub(crate) struct Pool {
    stack_pre: StackPre,
    free: Mutex<Vec<wapc::WapcHost>>,
    available: Condvar,
}

impl Pool {
    pub(crate) fn new(stack_pre: StackPre, size: usize) -> Result<Self, WapcRuntimeError> {
        let mut hosts = Vec::with_capacity(size);
        for _ in 0..size {
            hosts.push(new_host(&stack_pre)?);
        }
        Ok(Self {
            stack_pre,
            free: Mutex::new(hosts),
            available: Condvar::new(),
        })
    }

    /// Borrows an instance, waiting up to `timeout` for one to free up.
    /// Returns [`WapcRuntimeError::Busy`] on timeout.
    pub(crate) fn acquire(&self, timeout: Duration) -> Result<PooledHost<'_>, WapcRuntimeError> {
        let deadline = Instant::now() + timeout;
        let mut free = self.free.lock().expect("wapc pool mutex poisoned");
        loop {
            if let Some(host) = free.pop() {
                return Ok(PooledHost {
                    pool: self,
                    host: Some(host),
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WapcRuntimeError::Busy);
            }
            let (guard, result) = self
                .available
                .wait_timeout(free, remaining)
                .expect("wapc pool mutex poisoned");
            free = guard;
            if result.timed_out() && free.is_empty() {
                return Err(WapcRuntimeError::Busy);
            }
        }
    }

    fn release(&self, host: wapc::WapcHost) {
        self.free
            .lock()
            .expect("wapc pool mutex poisoned")
            .push(host);
        self.available.notify_one();
    }

    fn rebuild(&self) -> Result<wapc::WapcHost, WapcRuntimeError> {
        new_host(&self.stack_pre)
    }
}

fn new_host(stack_pre: &StackPre) -> Result<wapc::WapcHost, WapcRuntimeError> {
    let engine_provider = stack_pre.rehydrate().map_err(WapcRuntimeError::Build)?;
    wapc::WapcHost::new(Box::new(engine_provider), Some(Box::new(host_callback)))
        .map_err(WapcRuntimeError::Build)
}

/// RAII handle: returns its `WapcHost` to the pool's free-list on drop. See
/// [`PooledHost::reset`] for the epoch-interruption recovery path.
pub(crate) struct PooledHost<'a> {
    pool: &'a Pool,
    host: Option<wapc::WapcHost>,
}

impl PooledHost<'_> {
    pub(crate) fn call(&self, op: &str, payload: &[u8]) -> Result<Vec<u8>, wapc::errors::Error> {
        self.host
            .as_ref()
            .expect("host taken before drop")
            .call(op, payload)
    }

    /// Discards the current `WapcHost` and replaces it with a freshly
    /// rehydrated one. Required after an epoch-interruption trap: the
    /// guest's `wasmtime::Store` is left in an undefined state and must
    /// never be reused (see spec.md §4 and the teacher's
    /// `runtimes::wapc::runtime` comment on the same recovery dance).
    pub(crate) fn reset(&mut self) -> Result<(), WapcRuntimeError> {
        self.host = Some(self.pool.rebuild()?);
        Ok(())
    }
}

impl Drop for PooledHost<'_> {
    fn drop(&mut self) {
        if let Some(host) = self.host.take() {
            self.pool.release(host);
        }
    }
}
