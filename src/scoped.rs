//! Scoped-release primitive.
//!
//! Runs a cleanup action on scope exit. Connections use it to keep the
//! per-driver live counters honest no matter which exit path tears the
//! session down.

/// Runs its action exactly once, when dropped, unless dismissed first.
pub struct ScopeGuard {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl ScopeGuard {
    /// Arm a guard with a release action.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Disarm the guard; the action will not run.
    pub fn dismiss(&mut self) {
        self.action = None;
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("armed", &self.action.is_some())
            .finish()
    }
}
