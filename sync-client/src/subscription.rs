//! Handles for background listeners.

use tokio::task::JoinHandle;

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

/// A running background listener. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) stops the listener.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
    cleanup: Option<Cleanup>,
}

impl Subscription {
    /// Wrap a spawned listener task.
    pub fn new(task: JoinHandle<()>) -> Self {
        Self {
            task: Some(task),
            cleanup: None,
        }
    }

    /// Run `cleanup` once the listener is stopped.
    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Check if the listener has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the listener.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.task.is_some())
            .finish()
    }
}
