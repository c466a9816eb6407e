//! Server-side session state.
//!
//! The browser holds only an opaque [`SessionId`]; tokens stay in the
//! [`SessionStore`], in process memory. Nothing here survives a restart.

mod store;
mod types;

pub use store::{SessionGuard, SessionStore};
pub use types::{SessionId, UserSession};
