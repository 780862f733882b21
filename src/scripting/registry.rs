//! Execution context registry
//!
//! One [`ExecContext`] exists per in-flight script invocation. Contexts are
//! registered in a process-global set so that a worker servicing SCRIPT KILL
//! can mark scripts running on other workers for cancellation. Cancellation
//! is purely cooperative: another worker only ever writes the atomic flags;
//! the owning worker's monitor hook observes them at instruction-count
//! boundaries and raises the fatal error itself.
//!
//! Contexts are unregistered on every exit path of an invocation. A kill
//! request addressed to an identifier with no live context is a no-op;
//! nothing is queued across invocations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lazy_static::lazy_static;

/// Per-invocation bookkeeping used for monitoring and cancellation
pub struct ExecContext {
    /// Invocation start, monotonic
    started: Instant,

    /// Bare function identifier (hex sha1, without the `f_` prefix)
    func: String,

    /// Wall-clock budget exceeded at least once
    timeout: AtomicBool,

    /// Explicit SCRIPT KILL requested
    kill: AtomicBool,

    /// Abort requested by a failed assertion
    abort: AtomicBool,
}

impl ExecContext {
    pub fn new(func: impl Into<String>) -> Self {
        ExecContext {
            started: Instant::now(),
            func: func.into(),
            timeout: AtomicBool::new(false),
            kill: AtomicBool::new(false),
            abort: AtomicBool::new(false),
        }
    }

    /// Bare identifier of the executing function
    pub fn func(&self) -> &str {
        &self.func
    }

    /// Milliseconds since invocation start
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn mark_timed_out(&self) {
        self.timeout.store(true, Ordering::SeqCst);
    }

    pub fn timed_out(&self) -> bool {
        self.timeout.load(Ordering::SeqCst)
    }

    pub fn request_kill(&self) {
        self.kill.store(true, Ordering::SeqCst);
    }

    pub fn kill_requested(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

lazy_static! {
    static ref CONTEXTS: Mutex<Vec<Arc<ExecContext>>> = Mutex::new(Vec::new());
}

/// Register a context at invocation start
pub fn register(ctx: Arc<ExecContext>) {
    let mut contexts = CONTEXTS.lock().unwrap();
    contexts.push(ctx);
}

/// Unregister a context at invocation end; must run on every exit path
pub fn unregister(ctx: &Arc<ExecContext>) {
    let mut contexts = CONTEXTS.lock().unwrap();
    contexts.retain(|c| !Arc::ptr_eq(c, ctx));
}

/// Mark live contexts for cancellation: those matching the given bare
/// identifier, or all of them when `func` is `None`
pub fn kill(func: Option<&str>) {
    let contexts = CONTEXTS.lock().unwrap();
    for ctx in contexts.iter() {
        if func.map_or(true, |f| f == ctx.func()) {
            ctx.request_kill();
        }
    }
}

/// Number of live contexts
pub fn live_count() -> usize {
    CONTEXTS.lock().unwrap().len()
}
