//! Hierarchical scope stack for job construction.
//!
//! A [`Scope`] is an immutable snapshot of the configuration that operations built "now"
//! should use: device placement, distribution hierarchy, logical view, job settings and
//! attribute overrides. A [`Session`] owns a [`ScopeStack`] whose top is the current scope;
//! entering a configuration context pushes a derived scope and the returned [`ScopeGuard`]
//! pops it again, checking that nested contexts unwind in order.

pub mod attr;
pub mod backend;
pub mod config;
pub mod context;
pub mod device;
mod env;
pub mod error;
mod guard;
pub mod ids;
pub mod job;
pub mod scope;
pub mod session;
pub mod stack;

pub use attr::{AttrDefaultProvider, AttrOverrides, AttrType, AttrValue, ScopeAttrDefaults};
pub use backend::{ScopeBackend, SymbolTableBackend};
pub use config::SessionConfig;
pub use device::{DeviceTag, Hierarchy, MachineDeviceIds, ParallelDesc};
pub use error::{ScopeError, ScopeResult};
pub use guard::ScopeGuard;
pub use ids::{ScopeId, SessionId};
pub use job::{JobConfig, JobMode};
pub use scope::{Scope, ScopeConf};
pub use session::Session;
pub use stack::ScopeStack;
