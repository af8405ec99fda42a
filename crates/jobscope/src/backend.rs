//! Job-construction backends that materialize scope confs into scope symbols.
//!
//! A backend is the only place a [`Scope`] is created. Sessions hand it a validated draft and
//! get back an immutable snapshot; the backend decides how symbols are identified and stored.
//! Calls are synchronous and must not touch the scope stack of the session that issued them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::attr::{AttrOverrides, AttrValue};
use crate::device::{DeviceTag, Hierarchy, MachineDeviceIds, ParallelDesc};
use crate::error::{ScopeError, ScopeResult};
use crate::ids::{ScopeId, SessionId};
use crate::job::JobConfig;
use crate::scope::{Scope, ScopeConf};

pub trait ScopeBackend: Send + Sync {
    /// Human-readable backend identifier used in log messages.
    fn backend_name(&self) -> &str;

    /// Materializes `conf` into an immutable scope.
    fn build_scope(&self, conf: ScopeConf) -> ScopeResult<Scope>;

    /// Builds the root scope of a session.
    fn build_initial_scope(
        &self,
        session_id: SessionId,
        job: &JobConfig,
        device_tag: DeviceTag,
        machine_device_ids: &[MachineDeviceIds],
        hierarchy: Option<&Hierarchy>,
        mirrored: bool,
    ) -> ScopeResult<Scope> {
        let placement =
            ParallelDesc::new(device_tag, machine_device_ids.to_vec(), hierarchy.cloned())?;
        self.build_scope(ScopeConf::new(session_id, job.clone(), placement, mirrored))
    }

    /// Builds a child of `old` with `overrides` applied on top of its attributes.
    fn build_scope_by_attribute_override(
        &self,
        old: &Scope,
        overrides: &AttrOverrides,
    ) -> ScopeResult<Scope> {
        let mut conf = old.derive_conf();
        overrides.apply_to(&mut conf.attrs);
        self.build_scope(conf)
    }
}

/// Content hash of a scope conf; identical confs intern to the same symbol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct ScopeFingerprint([u8; 32]);

fn fingerprint(conf: &ScopeConf) -> ScopeResult<ScopeFingerprint> {
    let canonical = serde_json::to_vec(conf)
        .map_err(|err| ScopeError::Backend(format!("failed to encode scope conf: {err}")))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"jobscope:scope-conf:v1");
    hasher.update(&canonical);
    // JSON writes every non-finite double as `null`; mix in the exact bits.
    for (name, value) in &conf.attrs {
        if let AttrValue::Double(v) = value {
            hasher.update(name.as_bytes());
            hasher.update(&v.to_bits().to_le_bytes());
        }
    }
    Ok(ScopeFingerprint(*hasher.finalize().as_bytes()))
}

/// In-process backend that interns scopes in a symbol table.
pub struct SymbolTableBackend {
    next_id: AtomicU64,
    symbols: Mutex<HashMap<ScopeFingerprint, Scope>>,
}

impl SymbolTableBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            symbols: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct scopes built so far.
    pub fn symbol_count(&self) -> usize {
        self.symbols.lock().expect("scope symbol table poisoned").len()
    }
}

impl Default for SymbolTableBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeBackend for SymbolTableBackend {
    fn backend_name(&self) -> &str {
        "symbol-table"
    }

    fn build_scope(&self, conf: ScopeConf) -> ScopeResult<Scope> {
        conf.placement.validate()?;
        let key = fingerprint(&conf)?;

        let mut symbols = self.symbols.lock().expect("scope symbol table poisoned");
        if let Some(existing) = symbols.get(&key) {
            tracing::trace!(scope = %existing.id(), "reusing interned scope");
            return Ok(existing.clone());
        }
        let id = ScopeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let scope = Scope::from_conf(id, conf);
        tracing::trace!(scope = %id, parent = ?scope.parent(), "interned new scope");
        symbols.insert(key, scope.clone());
        Ok(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{ScopeAttrDefaults, CHECKPOINTING};

    fn initial(backend: &SymbolTableBackend) -> Scope {
        backend
            .build_initial_scope(
                SessionId(1),
                &JobConfig::default(),
                DeviceTag::Cpu,
                &[MachineDeviceIds::single(0, 0)],
                None,
                false,
            )
            .unwrap()
    }

    #[test]
    fn identical_confs_intern_to_one_symbol() {
        let backend = SymbolTableBackend::new();
        let a = initial(&backend);
        let b = initial(&backend);
        assert!(a.is(&b));
        assert_eq!(backend.symbol_count(), 1);
    }

    #[test]
    fn attribute_override_derives_child() {
        let backend = SymbolTableBackend::new();
        let root = initial(&backend);
        let defaults = ScopeAttrDefaults::builtin();
        let overrides = AttrOverrides::resolve(&defaults, [(CHECKPOINTING, true)]).unwrap();

        let child = backend
            .build_scope_by_attribute_override(&root, &overrides)
            .unwrap();
        assert_eq!(child.parent(), Some(root.id()));
        assert_eq!(child.attr(CHECKPOINTING).and_then(|v| v.as_bool()), Some(true));
        assert!(root.attr(CHECKPOINTING).is_none());
        assert_eq!(backend.symbol_count(), 2);
    }

    #[test]
    fn non_finite_doubles_intern_separately() {
        let backend = SymbolTableBackend::new();
        let root = initial(&backend);
        let build = |v: f64| {
            let mut conf = root.derive_conf();
            conf.attrs.insert("loss_scale".to_string(), AttrValue::Double(v));
            backend.build_scope(conf).unwrap()
        };
        let inf = build(f64::INFINITY);
        let nan = build(f64::NAN);
        let neg = build(f64::NEG_INFINITY);
        assert!(!inf.is(&nan));
        assert!(!inf.is(&neg));
        assert!(nan.attr("loss_scale").and_then(|v| v.as_f64()).unwrap().is_nan());
        assert!(inf.is(&build(f64::INFINITY)));
    }

    #[test]
    fn invalid_placement_is_not_interned() {
        let backend = SymbolTableBackend::new();
        let root = initial(&backend);
        let mut conf = root.derive_conf();
        conf.placement.machine_device_ids.clear();
        assert!(matches!(
            backend.build_scope(conf),
            Err(ScopeError::InvalidPlacement(_))
        ));
        assert_eq!(backend.symbol_count(), 1);
    }
}
