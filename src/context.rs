//! Runtime context
//!
//! A [`Context`] bundles everything the reactive core needs from its
//! embedding application:
//!
//! - the optional asynchronous executor hook used for coroutine watchers,
//!   async references and asynchronous `rx` steps,
//! - the [`Diagnostics`] record warnings are reported to,
//! - the [`Comparator`] deciding whether `onlychanged` watchers fire,
//! - the internal classes backing reactive expressions.
//!
//! The core never runs an event loop itself. When something asynchronous has
//! to happen it hands a [`Thunk`] to the configured [`AsyncExecutor`] and
//! fails with [`ParamError::NoAsyncExecutor`] when none is configured.

use std::cell::{OnceCell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::diagnostics::Diagnostics;
use crate::error::{ParamError, Result};
use crate::reactive::Internals;
use crate::value::comparator::Comparator;

/// A unit of deferred work handed to an executor.
pub type Thunk = Box<dyn FnOnce() -> Result<()>>;

/// Scheduling hook supplied by the embedding application.
pub trait AsyncExecutor {
    /// Schedule `thunk` to run later. Errors returned by the thunk are the
    /// executor's responsibility.
    fn schedule(&self, thunk: Thunk);
}

/// Executor collecting thunks until [`run_pending`](QueueExecutor::run_pending) is called.
///
/// This is the closest model of an event loop: work is deferred until the
/// application decides to drive it.
#[derive(Default)]
pub struct QueueExecutor {
    queue: RefCell<VecDeque<Thunk>>,
}

impl QueueExecutor {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of thunks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run queued thunks, including ones scheduled while running, until the
    /// queue is empty.
    ///
    /// # Returns
    ///
    /// The number of thunks executed, or the first error raised by one of them.
    pub fn run_pending(&self) -> Result<usize> {
        let mut count = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(thunk) = next else {
                return Ok(count);
            };
            count += 1;
            thunk()?;
        }
    }

    /// Run only the oldest queued thunk.
    pub fn run_one(&self) -> Result<bool> {
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some(thunk) => thunk().map(|_| true),
            None => Ok(false),
        }
    }
}

impl AsyncExecutor for QueueExecutor {
    fn schedule(&self, thunk: Thunk) {
        self.queue.borrow_mut().push_back(thunk);
    }
}

/// Executor running every thunk as soon as it is scheduled.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

impl AsyncExecutor for ImmediateExecutor {
    fn schedule(&self, thunk: Thunk) {
        if let Err(err) = thunk() {
            tracing::warn!("scheduled task failed: {}", err);
        }
    }
}

struct ContextInner {
    executor: RefCell<Option<Rc<dyn AsyncExecutor>>>,
    diagnostics: Diagnostics,
    comparator: RefCell<Comparator>,
    internals: OnceCell<Internals>,
}

/// Shared handle to the runtime configuration.
#[derive(Clone)]
pub struct Context(Rc<ContextInner>);

thread_local! {
    static GLOBAL: Context = Context::new();
}

impl Context {
    /// Create an isolated context without an executor.
    pub fn new() -> Self {
        Context(Rc::new(ContextInner {
            executor: RefCell::new(None),
            diagnostics: Diagnostics::new(),
            comparator: RefCell::new(Comparator::new()),
            internals: OnceCell::new(),
        }))
    }

    /// The per-thread default context used by classes and expressions that
    /// were not given one explicitly.
    pub fn global() -> Self {
        GLOBAL.with(|ctx| ctx.clone())
    }

    pub fn set_executor(&self, executor: Rc<dyn AsyncExecutor>) {
        *self.0.executor.borrow_mut() = Some(executor);
    }

    pub fn clear_executor(&self) {
        self.0.executor.borrow_mut().take();
    }

    pub fn has_executor(&self) -> bool {
        self.0.executor.borrow().is_some()
    }

    /// Hand `thunk` to the executor.
    ///
    /// `what` names the deferred function in the error raised when no
    /// executor is configured.
    pub fn schedule(&self, what: &str, thunk: Thunk) -> Result<()> {
        let executor = self.0.executor.borrow().clone();
        match executor {
            Some(executor) => {
                tracing::trace!(function = what, "scheduling deferred task");
                executor.schedule(thunk);
                Ok(())
            }
            None => Err(ParamError::NoAsyncExecutor {
                function: what.to_string(),
            }),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.0.diagnostics
    }

    pub fn comparator(&self) -> Ref<'_, Comparator> {
        self.0.comparator.borrow()
    }

    pub fn comparator_mut(&self) -> RefMut<'_, Comparator> {
        self.0.comparator.borrow_mut()
    }

    pub(crate) fn internals(&self) -> Result<&Internals> {
        if let Some(internals) = self.0.internals.get() {
            return Ok(internals);
        }
        let built = Internals::build(self)?;
        Ok(self.0.internals.get_or_init(|| built))
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("has_executor", &self.has_executor())
            .field("warnings", &self.0.diagnostics.warning_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_schedule_without_executor() {
        let ctx = Context::new();
        let err = ctx.schedule("fetch", Box::new(|| Ok(()))).unwrap_err();
        assert_eq!(
            err,
            ParamError::NoAsyncExecutor {
                function: "fetch".to_string()
            }
        );
    }

    #[test]
    fn test_queue_executor() {
        let ctx = Context::new();
        let executor = QueueExecutor::new();
        ctx.set_executor(executor.clone());

        let runs = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let runs = runs.clone();
            ctx.schedule("task", Box::new(move || {
                runs.set(runs.get() + 1);
                Ok(())
            }))
            .unwrap();
        }

        assert_eq!(executor.pending(), 3);
        assert_eq!(runs.get(), 0);
        assert_eq!(executor.run_pending().unwrap(), 3);
        assert_eq!(runs.get(), 3);
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_immediate_executor() {
        let ctx = Context::new();
        ctx.set_executor(Rc::new(ImmediateExecutor));
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        ctx.schedule("task", Box::new(move || {
            flag.set(true);
            Ok(())
        }))
        .unwrap();
        assert!(ran.get());

        ctx.clear_executor();
        assert!(!ctx.has_executor());
    }

    #[test]
    fn test_internal_classes_are_built_once() {
        let ctx = Context::new();
        let first = ctx.internals().unwrap();
        let second = ctx.internals().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(!std::ptr::eq(first, Context::new().internals().unwrap()));
    }

    #[test]
    fn test_global_context_is_shared_per_thread() {
        assert!(Context::global().ptr_eq(&Context::global()));
        assert!(!Context::global().ptr_eq(&Context::new()));
    }
}
