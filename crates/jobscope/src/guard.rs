use crate::error::ScopeResult;
use crate::scope::Scope;
use crate::session::Session;

/// RAII guard that keeps a scope entered on a session's stack.
///
/// On exit the guard checks that its scope is still current, pops it, and checks that the
/// scope current before entry is current again. A mismatch means scopes were exited out of
/// order. [`ScopeGuard::exit`] reports it as an error; dropping the guard panics instead,
/// unless the thread is already unwinding, in which case the violation is logged.
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct ScopeGuard<'s> {
    session: &'s Session,
    scope: Scope,
    previous: Scope,
    active: bool,
}

impl<'s> ScopeGuard<'s> {
    pub(crate) fn new(session: &'s Session, scope: Scope, previous: Scope) -> Self {
        Self {
            session,
            scope,
            previous,
            active: true,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Scope that becomes current again once this guard exits.
    pub fn previous(&self) -> &Scope {
        &self.previous
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// Exits the scope, returning the ordering violation instead of panicking.
    pub fn exit(mut self) -> ScopeResult<()> {
        self.active = false;
        self.session.exit_scope(&self.scope, &self.previous)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(err) = self.session.exit_scope(&self.scope, &self.previous) {
            if std::thread::panicking() {
                tracing::error!(
                    session = %self.session.id(),
                    scope = %self.scope,
                    error = %err,
                    "scope exit failed while unwinding"
                );
            } else {
                panic!("{err}");
            }
        }
    }
}

impl std::fmt::Debug for ScopeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &self.scope)
            .field("previous", &self.previous.id())
            .field("active", &self.active)
            .finish()
    }
}
