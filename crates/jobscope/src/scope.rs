//! Immutable scope snapshots and the draft they are built from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attr::AttrValue;
use crate::device::{DeviceTag, Hierarchy, MachineDeviceIds, ParallelDesc};
use crate::ids::{ScopeId, SessionId};
use crate::job::JobConfig;

/// Mutable description of a scope. Backends turn a conf into an immutable [`Scope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeConf {
    pub session_id: SessionId,
    pub job: JobConfig,
    pub placement: ParallelDesc,
    pub mirrored: bool,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub name_prefixes: Vec<String>,
    #[serde(default)]
    pub parent: Option<ScopeId>,
}

impl ScopeConf {
    pub fn new(
        session_id: SessionId,
        job: JobConfig,
        placement: ParallelDesc,
        mirrored: bool,
    ) -> Self {
        Self {
            session_id,
            job,
            placement,
            mirrored,
            attrs: BTreeMap::new(),
            name_prefixes: Vec::new(),
            parent: None,
        }
    }
}

struct ScopeInner {
    id: ScopeId,
    conf: ScopeConf,
}

/// Immutable snapshot of the execution configuration active while building operations.
///
/// Cloning is cheap and preserves identity: two `Scope` values compare equal only when they
/// share the same snapshot.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Wraps a conf that a backend has accepted under symbol `id`.
    pub fn from_conf(id: ScopeId, conf: ScopeConf) -> Self {
        Self {
            inner: Arc::new(ScopeInner { id, conf }),
        }
    }

    /// Identity comparison.
    pub fn is(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.conf.session_id
    }

    pub fn conf(&self) -> &ScopeConf {
        &self.inner.conf
    }

    pub fn job(&self) -> &JobConfig {
        &self.inner.conf.job
    }

    pub fn placement(&self) -> &ParallelDesc {
        &self.inner.conf.placement
    }

    pub fn device_tag(&self) -> DeviceTag {
        self.inner.conf.placement.device_tag
    }

    pub fn machine_device_ids(&self) -> &[MachineDeviceIds] {
        &self.inner.conf.placement.machine_device_ids
    }

    pub fn hierarchy(&self) -> Option<&Hierarchy> {
        self.inner.conf.placement.hierarchy.as_ref()
    }

    pub fn is_mirrored(&self) -> bool {
        self.inner.conf.mirrored
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.inner.conf.attrs.get(name)
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.inner.conf.attrs
    }

    pub fn name_prefixes(&self) -> &[String] {
        &self.inner.conf.name_prefixes
    }

    /// Prefix prepended to names of operations built under this scope, e.g. `"block1-attn-"`.
    pub fn op_name_prefix(&self) -> String {
        let prefixes = &self.inner.conf.name_prefixes;
        if prefixes.is_empty() {
            return String::new();
        }
        let mut out = prefixes.join("-");
        out.push('-');
        out
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.inner.conf.parent
    }

    /// Starts a draft for a child of this scope.
    pub fn derive_conf(&self) -> ScopeConf {
        let mut conf = self.inner.conf.clone();
        conf.parent = Some(self.inner.id);
        conf
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.is(other)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("device_tag", &self.device_tag())
            .field("machine_device_ids", &self.machine_device_ids())
            .field("hierarchy", &self.hierarchy())
            .field("mirrored", &self.is_mirrored())
            .field("attrs", &self.attrs())
            .finish()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.inner.id, self.device_tag())?;
        for ids in self.machine_device_ids() {
            write!(f, " {ids}")?;
        }
        if let Some(hierarchy) = self.hierarchy() {
            write!(f, " hierarchy={:?}", hierarchy.dims())?;
        }
        if self.is_mirrored() {
            f.write_str(" mirrored")?;
        }
        f.write_str(")")
    }
}
