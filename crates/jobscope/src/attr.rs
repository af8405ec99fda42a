//! Typed scope attributes and the default-configuration provider used to validate overrides.
//!
//! Every attribute a scope may carry must first be registered with a default value. The
//! default fixes the attribute's type: overrides are checked against it before anything is
//! applied, so a batch of overrides either lands completely or not at all.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ScopeError, ScopeResult};

pub const CHECKPOINTING: &str = "checkpointing";
pub const PIPELINE_STAGE_ID_HINT: &str = "pipeline_stage_id_hint";

/// Value stored under a named scope attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    ListInt64(Vec<i64>),
    ListString(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrType {
    Bool,
    Int64,
    Double,
    String,
    ListInt64,
    ListString,
}

impl AttrType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttrType::Bool => "bool",
            AttrType::Int64 => "int64",
            AttrType::Double => "double",
            AttrType::String => "string",
            AttrType::ListInt64 => "list<int64>",
            AttrType::ListString => "list<string>",
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Bool(_) => AttrType::Bool,
            AttrValue::Int64(_) => AttrType::Int64,
            AttrValue::Double(_) => AttrType::Double,
            AttrValue::String(_) => AttrType::String,
            AttrValue::ListInt64(_) => AttrType::ListInt64,
            AttrValue::ListString(_) => AttrType::ListString,
        }
    }

    /// Converts `self` to `target`, allowing only lossless widenings.
    ///
    /// Integers widen to doubles, and an empty integer list (what an untyped `[]` deserializes
    /// to) is accepted where a string list is expected.
    pub fn coerce_to(self, target: AttrType) -> Option<AttrValue> {
        match (self, target) {
            (value, target) if value.attr_type() == target => Some(value),
            (AttrValue::Int64(v), AttrType::Double) => Some(AttrValue::Double(v as f64)),
            (AttrValue::ListInt64(v), AttrType::ListString) if v.is_empty() => {
                Some(AttrValue::ListString(Vec::new()))
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int64(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int64(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Double(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(value: Vec<i64>) -> Self {
        AttrValue::ListInt64(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::ListString(value)
    }
}

/// Source of default values for the attributes a scope may override.
pub trait AttrDefaultProvider: Send + Sync {
    fn default_value(&self, name: &str) -> Option<AttrValue>;
}

/// Map-backed attribute defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeAttrDefaults {
    values: BTreeMap<String, AttrValue>,
}

impl ScopeAttrDefaults {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Defaults for the attributes every session understands.
    pub fn builtin() -> Self {
        let mut defaults = Self::empty();
        defaults
            .values
            .insert(CHECKPOINTING.to_string(), AttrValue::Bool(false));
        defaults
            .values
            .insert(PIPELINE_STAGE_ID_HINT.to_string(), AttrValue::Int64(0));
        defaults
    }

    /// Registers (or replaces) the default for `name`.
    pub fn register(&mut self, name: impl Into<String>, default: impl Into<AttrValue>) {
        self.values.insert(name.into(), default.into());
    }

    pub fn with_extra<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = (String, AttrValue)>,
    {
        self.values.extend(extra);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AttrDefaultProvider for ScopeAttrDefaults {
    fn default_value(&self, name: &str) -> Option<AttrValue> {
        self.values.get(name).cloned()
    }
}

fn is_list(value: &AttrValue) -> bool {
    matches!(value, AttrValue::ListInt64(_) | AttrValue::ListString(_))
}

fn is_empty_list(value: &AttrValue) -> bool {
    match value {
        AttrValue::ListInt64(v) => v.is_empty(),
        AttrValue::ListString(v) => v.is_empty(),
        _ => false,
    }
}

/// Attribute overrides that have been checked against a default provider.
///
/// The only way to obtain one is [`AttrOverrides::resolve`], so a scope backend never sees an
/// unknown name or a mistyped value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrOverrides {
    values: BTreeMap<String, AttrValue>,
}

impl AttrOverrides {
    /// Validates all pairs before returning any of them.
    pub fn resolve<I, K, V>(provider: &dyn AttrDefaultProvider, pairs: I) -> ScopeResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let mut values = BTreeMap::new();
        for (name, value) in pairs {
            let name = name.into();
            let value = value.into();
            let default = provider
                .default_value(&name)
                .ok_or_else(|| ScopeError::UnknownAttribute { name: name.clone() })?;
            let expected = default.attr_type();
            let found = value.attr_type();
            let coerced = if is_empty_list(&default) && is_list(&value) {
                // An empty list default carries no element type.
                Some(value)
            } else {
                value.coerce_to(expected)
            }
            .ok_or_else(|| ScopeError::AttrTypeMismatch {
                name: name.clone(),
                expected,
                found,
            })?;
            if let AttrValue::Double(v) = coerced {
                if !v.is_finite() {
                    return Err(ScopeError::InvalidAttrValue {
                        name,
                        reason: format!("{v} is not a finite number"),
                    });
                }
            }
            values.insert(name, coerced);
        }
        Ok(Self { values })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn into_map(self) -> BTreeMap<String, AttrValue> {
        self.values
    }

    pub(crate) fn apply_to(&self, attrs: &mut BTreeMap<String, AttrValue>) {
        for (name, value) in &self.values {
            attrs.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_accepts_registered_names() {
        let defaults = ScopeAttrDefaults::builtin();
        let overrides =
            AttrOverrides::resolve(&defaults, [(CHECKPOINTING, AttrValue::Bool(true))]).unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(
            overrides.iter().next(),
            Some((CHECKPOINTING, &AttrValue::Bool(true)))
        );
    }

    #[test]
    fn resolve_rejects_unknown_name_even_after_valid_ones() {
        let defaults = ScopeAttrDefaults::builtin();
        let err = AttrOverrides::resolve(
            &defaults,
            [
                (PIPELINE_STAGE_ID_HINT, AttrValue::Int64(2)),
                ("no_such_attr", AttrValue::Int64(1)),
            ],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ScopeError::UnknownAttribute {
                name: "no_such_attr".to_string()
            }
        );
    }

    #[test]
    fn resolve_checks_type_against_default() {
        let defaults = ScopeAttrDefaults::builtin();
        let err =
            AttrOverrides::resolve(&defaults, [(CHECKPOINTING, AttrValue::from("yes"))]).unwrap_err();
        assert_eq!(
            err,
            ScopeError::AttrTypeMismatch {
                name: CHECKPOINTING.to_string(),
                expected: AttrType::Bool,
                found: AttrType::String,
            }
        );
    }

    #[test]
    fn integers_widen_to_double_defaults() {
        let mut defaults = ScopeAttrDefaults::empty();
        defaults.register("loss_scale", 1.0f64);
        let overrides = AttrOverrides::resolve(&defaults, [("loss_scale", 4i64)]).unwrap();
        assert_eq!(
            overrides.iter().next().map(|(_, v)| v.clone()),
            Some(AttrValue::Double(4.0))
        );
    }

    #[test]
    fn non_finite_doubles_are_rejected() {
        let mut defaults = ScopeAttrDefaults::empty();
        defaults.register("loss_scale", 1.0f64);
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let err = AttrOverrides::resolve(&defaults, [("loss_scale", bad)]).unwrap_err();
            assert!(matches!(err, ScopeError::InvalidAttrValue { .. }), "{bad}: {err:?}");
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn empty_list_default_accepts_either_list_type() {
        let mut defaults = ScopeAttrDefaults::empty();
        defaults.register("tags", serde_json::from_str::<AttrValue>("[]").unwrap());
        let overrides =
            AttrOverrides::resolve(&defaults, [("tags", vec!["a".to_string()])]).unwrap();
        assert_eq!(
            overrides.iter().next().map(|(_, v)| v.clone()),
            Some(AttrValue::ListString(vec!["a".to_string()]))
        );
        let err = AttrOverrides::resolve(&defaults, [("tags", true)]).unwrap_err();
        assert!(matches!(err, ScopeError::AttrTypeMismatch { .. }));
    }

    #[test]
    fn untyped_empty_list_matches_string_list() {
        let value: AttrValue = serde_json::from_str("[]").unwrap();
        assert_eq!(value, AttrValue::ListInt64(Vec::new()));
        assert_eq!(
            value.coerce_to(AttrType::ListString),
            Some(AttrValue::ListString(Vec::new()))
        );
        assert_eq!(
            AttrValue::ListInt64(vec![1]).coerce_to(AttrType::ListString),
            None
        );
    }
}
