//! Execution-role tokens for the content and impl sides of the compositor.
//!
//! Impl-side entry points take an [`ImplRole`] by reference so that the call
//! chain, not a process-wide flag, states which role is running. Tokens can
//! only be minted through a [`RoleTracker`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Proof that the caller acts as the content role.
#[derive(Debug)]
pub struct ContentRole {
    _private: (),
}

/// Proof that the caller acts as the impl role.
#[derive(Debug)]
pub struct ImplRole {
    _private: (),
}

#[derive(Debug, Clone, Default)]
pub struct RoleTracker {
    content_blocked: Arc<AtomicBool>,
}

impl RoleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_role(&self) -> ContentRole {
        ContentRole { _private: () }
    }

    pub fn impl_role(&self) -> ImplRole {
        ImplRole { _private: () }
    }

    /// Marks the content role blocked until the returned scope is dropped.
    ///
    /// Commit runs inside this scope: the content-side tree must not change
    /// while the impl side copies it.
    pub fn block_content(&self) -> ContentBlockedScope {
        let was_blocked = self.content_blocked.swap(true, Ordering::AcqRel);
        if was_blocked {
            panic!("content role blocked twice; nested commit scope");
        }
        ContentBlockedScope {
            content_blocked: Arc::clone(&self.content_blocked),
        }
    }

    pub fn is_content_blocked(&self) -> bool {
        self.content_blocked.load(Ordering::Acquire)
    }

    pub fn assert_content_not_blocked(&self, operation: &'static str) {
        if self.is_content_blocked() {
            panic!("{operation} mutated content state while commit holds the content role blocked");
        }
    }
}

#[derive(Debug)]
pub struct ContentBlockedScope {
    content_blocked: Arc<AtomicBool>,
}

impl Drop for ContentBlockedScope {
    fn drop(&mut self) {
        self.content_blocked.store(false, Ordering::Release);
    }
}
