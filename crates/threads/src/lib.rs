//! Synchronization building blocks shared by the content and impl roles.

mod completion;
mod role;

pub use completion::CompletionEvent;
pub use role::{ContentBlockedScope, ContentRole, ImplRole, RoleTracker};
