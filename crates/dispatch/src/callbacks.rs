//! User-facing callback set invoked by the result monitor.
//!
//! Mirrors the Python original's keyword-callback constructor; built with
//! a manual builder rather than `clap::Parser` (the same builder pattern
//! `ServerConfig` uses, but callbacks are closures, not CLI-parseable
//! fields).

/// Callbacks invoked synchronously on the monitor task, one at a time, in
/// result-channel arrival order. A callback that blocks stalls the whole
/// run - the caller owns callback runtime.
pub struct Callbacks<O> {
    pub(crate) on_success: Box<dyn FnMut(u64, O, usize) + Send>,
    pub(crate) on_error: Option<Box<dyn FnMut(u64, String, usize) + Send>>,
    pub(crate) on_timeout: Option<Box<dyn FnMut(u64, f64, usize) + Send>>,
    pub(crate) on_setup_fail: Option<Box<dyn FnMut(usize, String) + Send>>,
    pub(crate) on_task_start: Option<Box<dyn FnMut(u64, usize) + Send>>,
    pub(crate) on_exit: Option<Box<dyn FnOnce() + Send>>,
}

/// Builds a [`Callbacks`]. `on_success` is mandatory; everything else
/// defaults to a no-op.
pub struct CallbacksBuilder<O> {
    on_success: Option<Box<dyn FnMut(u64, O, usize) + Send>>,
    on_error: Option<Box<dyn FnMut(u64, String, usize) + Send>>,
    on_timeout: Option<Box<dyn FnMut(u64, f64, usize) + Send>>,
    on_setup_fail: Option<Box<dyn FnMut(usize, String) + Send>>,
    on_task_start: Option<Box<dyn FnMut(u64, usize) + Send>>,
    on_exit: Option<Box<dyn FnOnce() + Send>>,
}

impl<O> Default for CallbacksBuilder<O> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_timeout: None,
            on_setup_fail: None,
            on_task_start: None,
            on_exit: None,
        }
    }
}

impl<O> CallbacksBuilder<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl FnMut(u64, O, usize) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(u64, String, usize) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl FnMut(u64, f64, usize) + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    pub fn on_setup_fail(mut self, f: impl FnMut(usize, String) + Send + 'static) -> Self {
        self.on_setup_fail = Some(Box::new(f));
        self
    }

    pub fn on_task_start(mut self, f: impl FnMut(u64, usize) + Send + 'static) -> Self {
        self.on_task_start = Some(Box::new(f));
        self
    }

    pub fn on_exit(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_exit = Some(Box::new(f));
        self
    }

    /// Finalizes the builder. Panics if `on_success` was never set - every
    /// run needs somewhere to send its successful results.
    pub fn build(self) -> Callbacks<O> {
        Callbacks {
            on_success: self.on_success.expect("CallbacksBuilder requires on_success"),
            on_error: self.on_error,
            on_timeout: self.on_timeout,
            on_setup_fail: self.on_setup_fail,
            on_task_start: self.on_task_start,
            on_exit: self.on_exit,
        }
    }
}
