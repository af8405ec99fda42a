//! LIFO stack of scopes whose top is the current scope.
//!
//! The stack is empty until the initial scope is installed and never becomes empty again
//! afterwards: the initial scope can not be popped. Every failing operation leaves the stack
//! exactly as it was.

use crate::error::{ScopeError, ScopeResult};
use crate::scope::Scope;

#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    /// Creates an uninitialized stack.
    pub fn new() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn with_initial(scope: Scope) -> Self {
        Self {
            scopes: vec![scope],
        }
    }

    /// Installs `scope` as the sole element.
    pub fn install_initial(&mut self, scope: Scope) -> ScopeResult<()> {
        if self.is_initialized() {
            return Err(ScopeError::AlreadyInitialized);
        }
        self.scopes.push(scope);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        !self.scopes.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current(&self) -> ScopeResult<&Scope> {
        self.scopes.last().ok_or(ScopeError::Uninitialized)
    }

    pub fn initial(&self) -> ScopeResult<&Scope> {
        self.scopes.first().ok_or(ScopeError::Uninitialized)
    }

    pub fn push(&mut self, scope: Scope) -> ScopeResult<()> {
        if !self.is_initialized() {
            return Err(ScopeError::Uninitialized);
        }
        self.scopes.push(scope);
        Ok(())
    }

    pub fn pop(&mut self) -> ScopeResult<Scope> {
        match self.scopes.len() {
            0 => Err(ScopeError::Uninitialized),
            1 => Err(ScopeError::invariant("attempted to pop the initial scope")),
            _ => Ok(self.scopes.pop().expect("stack length checked above")),
        }
    }

    /// Pops the top only if it is `expected`; detects misordered nested scopes.
    pub fn pop_expecting(&mut self, expected: &Scope) -> ScopeResult<Scope> {
        let top = self.current()?;
        if !top.is(expected) {
            return Err(ScopeError::invariant(format!(
                "expected {expected} on top of the scope stack, found {top}"
            )));
        }
        self.pop()
    }

    /// Scopes from the initial one up to the current one.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Scope> {
        self.scopes.iter()
    }
}
