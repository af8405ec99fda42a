//! Job-construction session owning a scope stack.
//!
//! A [`Session`] bundles the stack with the backend that builds scopes and the attribute
//! defaults used to validate overrides. The stack lives in a `RefCell`, which makes the
//! session `!Sync`: a stack is mutated only by the thread that constructs the job, and threads
//! that need their own construction context create their own session.
//!
//! ## Usage Pattern
//!
//! ```rust,ignore
//! let session = Session::initialized(SessionConfig::default())?;
//! let _gpu = session.placement_scope(DeviceTag::Cuda, &[MachineDeviceIds::range(0, 0, 3)?], None)?;
//! {
//!     let _ckpt = session.scope_config([("checkpointing", true)])?;
//!     // operations built here see cuda placement and checkpointing
//! }
//! // checkpointing scope exited, cuda placement still active
//! ```

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::attr::{AttrDefaultProvider, AttrOverrides, AttrValue};
use crate::backend::{ScopeBackend, SymbolTableBackend};
use crate::config::SessionConfig;
use crate::device::{DeviceTag, Hierarchy, MachineDeviceIds, ParallelDesc};
use crate::error::{ScopeError, ScopeResult};
use crate::guard::ScopeGuard;
use crate::ids::{next_session_id, SessionId};
use crate::job::JobConfig;
use crate::scope::{Scope, ScopeConf};
use crate::stack::ScopeStack;

pub struct Session {
    id: SessionId,
    config: SessionConfig,
    backend: Arc<dyn ScopeBackend>,
    attr_defaults: Arc<dyn AttrDefaultProvider>,
    stack: RefCell<ScopeStack>,
    building: Cell<bool>,
}

/// Marks the session as running a backend build callback until dropped.
struct BuildingFlag<'a>(&'a Cell<bool>);

impl Drop for BuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Session {
    /// Creates a session with an uninitialized stack backed by an in-process symbol table.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_backend(config, Arc::new(SymbolTableBackend::new()))
    }

    pub fn with_backend(config: SessionConfig, backend: Arc<dyn ScopeBackend>) -> Self {
        let attr_defaults = Arc::new(config.attr_defaults());
        Self::with_parts(config, backend, attr_defaults)
    }

    pub fn with_parts(
        config: SessionConfig,
        backend: Arc<dyn ScopeBackend>,
        attr_defaults: Arc<dyn AttrDefaultProvider>,
    ) -> Self {
        Self {
            id: next_session_id(),
            config,
            backend,
            attr_defaults,
            stack: RefCell::new(ScopeStack::new()),
            building: Cell::new(false),
        }
    }

    /// Creates a session and installs the initial scope described by `config`.
    pub fn initialized(config: SessionConfig) -> ScopeResult<Self> {
        let session = Self::new(config);
        session.init_scope_stack()?;
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ScopeBackend {
        self.backend.as_ref()
    }

    pub fn attr_defaults(&self) -> &dyn AttrDefaultProvider {
        self.attr_defaults.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.stack.borrow().is_initialized()
    }

    pub fn scope_depth(&self) -> usize {
        self.stack.borrow().depth()
    }

    /// Installs the initial scope described by the session config.
    pub fn init_scope_stack(&self) -> ScopeResult<Scope> {
        let placement = self.config.placement()?;
        self.make_initial_scope(
            &self.config.job,
            placement.device_tag,
            &placement.machine_device_ids,
            placement.hierarchy.as_ref(),
            self.config.mirrored,
        )
    }

    /// Builds the root scope and installs it as the only element of the stack.
    pub fn make_initial_scope(
        &self,
        job: &JobConfig,
        device_tag: DeviceTag,
        machine_device_ids: &[MachineDeviceIds],
        hierarchy: Option<&Hierarchy>,
        mirrored: bool,
    ) -> ScopeResult<Scope> {
        self.check_not_building("install the initial scope")?;
        if self.is_initialized() {
            return Err(ScopeError::AlreadyInitialized);
        }
        let scope = self.backend.build_initial_scope(
            self.id,
            job,
            device_tag,
            machine_device_ids,
            hierarchy,
            mirrored,
        )?;
        self.stack.borrow_mut().install_initial(scope.clone())?;
        tracing::debug!(
            session = %self.id,
            scope = %scope,
            backend = self.backend.backend_name(),
            "installed initial scope"
        );
        Ok(scope)
    }

    pub fn current_scope(&self) -> ScopeResult<Scope> {
        self.stack.borrow().current().cloned()
    }

    pub fn initial_scope(&self) -> ScopeResult<Scope> {
        self.stack.borrow().initial().cloned()
    }

    /// Builds a new scope from the current one without pushing it.
    ///
    /// `build` receives the current scope and the backend. The stack can not be mutated while
    /// it runs.
    pub fn make_derived<F>(&self, build: F) -> ScopeResult<Scope>
    where
        F: FnOnce(&Scope, &dyn ScopeBackend) -> ScopeResult<Scope>,
    {
        self.check_not_building("build a scope")?;
        let old = self.current_scope()?;
        self.building.set(true);
        let _flag = BuildingFlag(&self.building);
        build(&old, self.backend.as_ref())
    }

    /// Derives a scope by editing a copy of the current scope's conf.
    ///
    /// The edited attributes go through the same validation as [`Session::override_attrs`].
    pub fn derive_scope<F>(&self, edit: F) -> ScopeResult<Scope>
    where
        F: FnOnce(&mut ScopeConf) -> ScopeResult<()>,
    {
        let defaults = self.attr_defaults.as_ref();
        self.make_derived(|old, backend| {
            let mut conf = old.derive_conf();
            edit(&mut conf)?;
            let attrs = std::mem::take(&mut conf.attrs);
            conf.attrs = AttrOverrides::resolve(defaults, attrs)?.into_map();
            backend.build_scope(conf)
        })
    }

    /// Derives a scope with attribute overrides; every pair is validated before any is applied.
    pub fn override_attrs<I, K, V>(&self, overrides: I) -> ScopeResult<Scope>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let resolved = AttrOverrides::resolve(self.attr_defaults.as_ref(), overrides)?;
        self.make_derived(|old, backend| backend.build_scope_by_attribute_override(old, &resolved))
    }

    pub fn push_scope(&self, scope: Scope) -> ScopeResult<()> {
        self.check_not_building("push a scope")?;
        self.check_owned(&scope)?;
        let id = scope.id();
        let mut stack = self.stack.borrow_mut();
        stack.push(scope)?;
        tracing::debug!(
            session = %self.id,
            scope = %id,
            depth = stack.depth(),
            "pushed scope"
        );
        Ok(())
    }

    pub fn pop_scope(&self) -> ScopeResult<Scope> {
        self.check_not_building("pop a scope")?;
        let mut stack = self.stack.borrow_mut();
        let popped = stack.pop()?;
        tracing::debug!(
            session = %self.id,
            scope = %popped.id(),
            depth = stack.depth(),
            "popped scope"
        );
        Ok(popped)
    }

    /// Pops the current scope only if it is `expected`.
    pub fn pop_scope_expecting(&self, expected: &Scope) -> ScopeResult<Scope> {
        self.check_not_building("pop a scope")?;
        let mut stack = self.stack.borrow_mut();
        let popped = stack.pop_expecting(expected)?;
        tracing::debug!(
            session = %self.id,
            scope = %popped.id(),
            depth = stack.depth(),
            "popped scope"
        );
        Ok(popped)
    }

    /// Pushes `scope` and returns a guard that restores the previous scope when it exits.
    pub fn enter(&self, scope: Scope) -> ScopeResult<ScopeGuard<'_>> {
        let previous = self.current_scope()?;
        self.push_scope(scope.clone())?;
        Ok(ScopeGuard::new(self, scope, previous))
    }

    /// Runs `f` with `scope` entered and exits it afterwards.
    pub fn with_scope<F, R>(&self, scope: Scope, f: F) -> ScopeResult<R>
    where
        F: FnOnce(&Scope) -> R,
    {
        let guard = self.enter(scope)?;
        let result = f(guard.scope());
        guard.exit()?;
        Ok(result)
    }

    /// Enters a scope with the given attribute overrides.
    pub fn scope_config<I, K, V>(&self, overrides: I) -> ScopeResult<ScopeGuard<'_>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let scope = self.override_attrs(overrides)?;
        self.enter(scope)
    }

    /// Enters a scope that places subsequent operations on a different set of devices.
    pub fn placement_scope(
        &self,
        device_tag: DeviceTag,
        machine_device_ids: &[MachineDeviceIds],
        hierarchy: Option<Hierarchy>,
    ) -> ScopeResult<ScopeGuard<'_>> {
        let placement = ParallelDesc::new(device_tag, machine_device_ids.to_vec(), hierarchy)?;
        let scope = self.derive_scope(|conf| {
            conf.placement = placement;
            Ok(())
        })?;
        self.enter(scope)
    }

    /// Enters a mirrored (`true`) or consistent (`false`) logical view.
    pub fn logical_view_scope(&self, mirrored: bool) -> ScopeResult<ScopeGuard<'_>> {
        let scope = self.derive_scope(|conf| {
            conf.mirrored = mirrored;
            Ok(())
        })?;
        self.enter(scope)
    }

    /// Enters a scope that adds `name` to the op-name prefix.
    pub fn name_scope(&self, name: &str) -> ScopeResult<ScopeGuard<'_>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScopeError::InvalidName(
                "name scope requires a non-empty name".to_string(),
            ));
        }
        let scope = self.derive_scope(|conf| {
            conf.name_prefixes.push(name.to_string());
            Ok(())
        })?;
        self.enter(scope)
    }

    /// Checks and pops `scope` on behalf of a guard.
    pub(crate) fn exit_scope(&self, scope: &Scope, previous: &Scope) -> ScopeResult<()> {
        self.check_not_building("exit a scope")?;
        let mut stack = self.stack.borrow_mut();
        let top = stack.current()?;
        if !top.is(scope) {
            return Err(ScopeError::invariant(format!(
                "exiting {scope} but the current scope is {top}"
            )));
        }
        stack.pop()?;
        let restored = stack.current()?;
        if !restored.is(previous) {
            return Err(ScopeError::invariant(format!(
                "exiting {scope} restored {restored} instead of {previous}"
            )));
        }
        tracing::debug!(
            session = %self.id,
            scope = %scope.id(),
            depth = stack.depth(),
            "exited scope"
        );
        Ok(())
    }

    fn check_not_building(&self, action: &str) -> ScopeResult<()> {
        if self.building.get() {
            return Err(ScopeError::invariant(format!(
                "cannot {action} from inside a scope build callback"
            )));
        }
        Ok(())
    }

    fn check_owned(&self, scope: &Scope) -> ScopeResult<()> {
        if scope.session_id() != self.id {
            return Err(ScopeError::invariant(format!(
                "{scope} belongs to {} and cannot be pushed onto {}",
                scope.session_id(),
                self.id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("backend", &self.backend.backend_name())
            .field("depth", &self.scope_depth())
            .finish()
    }
}
