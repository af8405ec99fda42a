//! Session configuration: what the initial scope looks like and which attributes exist.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::attr::{AttrValue, ScopeAttrDefaults};
use crate::device::{DeviceTag, Hierarchy, MachineDeviceIds, ParallelDesc};
use crate::env::{self, DEVICE_TAG_VAR, MACHINE_DEVICE_IDS_VAR, MIRRORED_VAR};
use crate::error::ScopeResult;
use crate::job::JobConfig;

/// Every field is optional in JSON; missing fields take the defaults of a single-cpu,
/// non-mirrored predict job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub job: JobConfig,
    pub device_tag: DeviceTag,
    pub machine_device_ids: Vec<MachineDeviceIds>,
    pub hierarchy: Option<Hierarchy>,
    pub mirrored: bool,
    /// Attributes registered on top of the built-in ones, with their defaults.
    pub attr_defaults: BTreeMap<String, AttrValue>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            job: JobConfig::default(),
            device_tag: DeviceTag::Cpu,
            machine_device_ids: vec![MachineDeviceIds::single(0, 0)],
            hierarchy: None,
            mirrored: false,
            attr_defaults: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(src: &str) -> Result<Self> {
        serde_json::from_str(src).context("failed to parse session config")
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read session config {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("invalid session config {}", path.display()))
    }

    /// Defaults overridden by `JOBSCOPE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides_from(env::process_var)
    }

    /// Applies overrides using `lookup` in place of the process environment.
    pub fn with_env_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(DEVICE_TAG_VAR) {
            self.device_tag = raw
                .parse()
                .with_context(|| format!("invalid {DEVICE_TAG_VAR}"))?;
        }
        if let Some(raw) = lookup(MACHINE_DEVICE_IDS_VAR) {
            self.machine_device_ids = MachineDeviceIds::parse_list(&raw)
                .with_context(|| format!("invalid {MACHINE_DEVICE_IDS_VAR}"))?;
            // A hierarchy sized for the old device list no longer applies.
            self.hierarchy = None;
        }
        if let Some(raw) = lookup(MIRRORED_VAR) {
            self.mirrored = env::parse_bool(&raw);
        }
        Ok(self)
    }

    pub fn placement(&self) -> ScopeResult<ParallelDesc> {
        ParallelDesc::new(
            self.device_tag,
            self.machine_device_ids.clone(),
            self.hierarchy.clone(),
        )
    }

    pub fn attr_defaults(&self) -> ScopeAttrDefaults {
        ScopeAttrDefaults::builtin().with_extra(self.attr_defaults.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::job::JobMode;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_describe_single_cpu_predict_job() {
        let config = SessionConfig::default();
        assert_eq!(config.device_tag, DeviceTag::Cpu);
        assert_eq!(config.machine_device_ids, vec![MachineDeviceIds::single(0, 0)]);
        assert_eq!(config.job.mode, JobMode::Predict);
        assert_eq!(config.job.job_name, "");
        assert!(!config.mirrored);
        assert!(config.hierarchy.is_none());
    }

    #[test]
    fn json_fields_are_optional() {
        let config = SessionConfig::from_json_str(
            r#"{
                "device_tag": "cuda",
                "machine_device_ids": ["0:0-3"],
                "hierarchy": [2, 2],
                "job": { "job_name": "train_step", "mode": "train" },
                "attr_defaults": { "loss_scale": 1.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.device_tag, DeviceTag::Cuda);
        assert_eq!(config.placement().unwrap().parallel_num(), 4);
        assert!(config.job.is_train());
        assert_eq!(
            config.attr_defaults().get("loss_scale"),
            Some(&AttrValue::Double(1.0))
        );
        assert!(config.attr_defaults().get("checkpointing").is_some());

        assert_eq!(
            SessionConfig::from_json_str("{}").unwrap(),
            SessionConfig::default()
        );
    }

    #[test]
    fn bad_json_reports_context() {
        let err = SessionConfig::from_json_str(r#"{ "machine_device_ids": ["zero"] }"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse session config"));
    }

    #[test]
    fn oversized_hierarchy_is_a_parse_error() {
        let err = SessionConfig::from_json_str(r#"{ "hierarchy": [4294967296, 4294967296] }"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse session config"));
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        let config = SessionConfig::default()
            .with_env_overrides_from(lookup(&[
                (DEVICE_TAG_VAR, "gpu"),
                (MACHINE_DEVICE_IDS_VAR, "0:0-1,1:0-1"),
                (MIRRORED_VAR, "yes"),
            ]))
            .unwrap();
        assert_eq!(config.device_tag, DeviceTag::Cuda);
        assert_eq!(config.machine_device_ids.len(), 2);
        assert!(config.mirrored);

        let err = SessionConfig::default()
            .with_env_overrides_from(lookup(&[(DEVICE_TAG_VAR, "tpu")]))
            .unwrap_err();
        assert!(err.to_string().contains(DEVICE_TAG_VAR));
    }

    #[test]
    fn load_json_reports_missing_file() {
        let err = SessionConfig::load_json("/nonexistent/jobscope.json").unwrap_err();
        assert!(err.to_string().contains("failed to read session config"));
    }
}
