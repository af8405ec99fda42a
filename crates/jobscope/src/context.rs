//! Thread-local default session for code that does not receive a session explicitly.
//!
//! Installing a default session is opt-in. The stack of default sessions is thread-local and
//! supports nesting; [`default_session`] returns the most recently pushed one. Each entry is an
//! `Rc`, so a default session never leaves the thread that installed it.
//!
//! ```rust,ignore
//! let session = Rc::new(Session::initialized(SessionConfig::default())?);
//! with_default_session(Rc::clone(&session), || {
//!     // helpers deep in the call tree can reach the session
//!     let scope = jobscope::context::current_scope()?;
//!     Ok(scope)
//! })
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ScopeError, ScopeResult};
use crate::scope::Scope;
use crate::session::Session;

thread_local! {
    static SESSION_STACK: RefCell<Vec<Rc<Session>>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard that restores the previous default session when dropped.
pub struct SessionGuard {
    session: Rc<Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSION_STACK.with(|stack| {
            let popped = stack
                .borrow_mut()
                .pop()
                .expect("default session stack underflow: unmatched pop");
            assert!(
                Rc::ptr_eq(&popped, &self.session),
                "default session stack pop mismatch"
            );
        });
    }
}

/// Pushes a default session for the current thread and returns a guard that restores it on drop.
pub fn push_default_session(session: Rc<Session>) -> SessionGuard {
    SESSION_STACK.with(|stack| {
        stack.borrow_mut().push(Rc::clone(&session));
    });
    SessionGuard { session }
}

/// Runs `f` with `session` installed as the current default.
pub fn with_default_session<F, R>(session: Rc<Session>, f: F) -> R
where
    F: FnOnce() -> R,
{
    let guard = push_default_session(session);
    let result = f();
    drop(guard);
    result
}

pub fn default_session() -> Option<Rc<Session>> {
    SESSION_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Current scope of the default session.
pub fn current_scope() -> ScopeResult<Scope> {
    default_session()
        .ok_or(ScopeError::Uninitialized)?
        .current_scope()
}
